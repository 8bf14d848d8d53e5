//! Error types for provisioning, registry and queue operations.

use thiserror::Error;

/// Error type for all queue-service client operations.
///
/// Cloneable so that a single batch failure can be fanned out to every
/// caller whose entry was part of that batch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("Queue not found: {queue}")]
    QueueNotFound { queue: String },

    #[error("Message not found or receipt expired: {receipt}")]
    InvalidReceipt { receipt: String },

    #[error("Operation timed out: {message}")]
    Timeout { message: String },

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Request throttled: {message}")]
    Throttled { message: String },

    #[error("Message too large: {size} bytes (max: {max_size})")]
    MessageTooLarge { size: usize, max_size: usize },

    #[error("Batch size {size} exceeds maximum {max_size}")]
    BatchTooLarge { size: usize, max_size: usize },

    #[error("Provider error ({provider}): {code} - {message}")]
    ProviderError {
        provider: String,
        code: String,
        message: String,
    },

    #[error("Client has been shut down")]
    ClientShutdown,

    #[error("Validation error: {0}")]
    ValidationError(#[from] ValidationError),
}

impl QueueError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::QueueNotFound { .. } => false,
            Self::InvalidReceipt { .. } => false,
            Self::Timeout { .. } => true,
            Self::ConnectionFailed { .. } => true,
            Self::AuthenticationFailed { .. } => false,
            Self::Throttled { .. } => true,
            Self::MessageTooLarge { .. } => false,
            Self::BatchTooLarge { .. } => false,
            Self::ProviderError { .. } => true, // Provider-specific errors are usually transient
            Self::ClientShutdown => false,
            Self::ValidationError(_) => false,
        }
    }

    pub(crate) fn provider(provider: &str, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProviderError {
            provider: provider.to_string(),
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Validation errors for request values
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

/// Failure to construct a queue-service client.
///
/// Raised by client factories and provisioners. It is never retried
/// locally; the registry reports it as an initialization failure.
#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("Invalid setting '{setting}': {message}")]
    InvalidSettings {
        setting: &'static str,
        message: String,
    },

    /// A [`QueueClientFactory`](crate::QueueClientFactory) could not produce a
    /// client from valid settings.
    ///
    /// The built-in factories validate everything up front and report
    /// problems as `InvalidSettings`; this variant is for custom factories
    /// whose construction can fail at runtime.
    #[error("Client construction failed: {message}")]
    ClientConstruction { message: String },

    #[error("Failed to resolve dependency {component}: {source}")]
    Dependency {
        component: &'static str,
        #[source]
        source: Box<RegistryError>,
    },
}

impl ProvisioningError {
    pub(crate) fn invalid(setting: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidSettings {
            setting,
            message: message.into(),
        }
    }
}

/// Errors reported by the component registry
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Component already registered: {component}")]
    AlreadyRegistered { component: &'static str },

    #[error("Component not registered: {component}")]
    NotRegistered { component: &'static str },

    #[error("Initialization of {component} failed: {source}")]
    Initialization {
        component: &'static str,
        #[source]
        source: ProvisioningError,
    },

    #[error("Stored instance does not match requested type {component}")]
    TypeMismatch { component: &'static str },

    #[error("Registry has been shut down")]
    ShutDown,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Configuration parsing failed: {0}")]
    Parsing(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] ProvisioningError),

    #[error("Failed to register configured component: {0}")]
    Registry(#[from] RegistryError),
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
