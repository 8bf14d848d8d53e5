//! Optional collaborator settings for client construction.
//!
//! Each of the three collaborators is independently optional. When present
//! in the [`ComponentRegistry`](crate::registry::ComponentRegistry) they are
//! registered under these capabilities:
//!
//! - `dyn CredentialsSource` - how access credentials are obtained
//! - `dyn RegionSource` - which service region to talk to
//! - [`NetworkConfig`] - timeouts, retries and endpoint tuning
//!
//! Absence is valid and means "use the SDK default".

use crate::error::ProvisioningError;
use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_sdk_sqs::config::{Credentials, SharedCredentialsProvider};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use zeroize::{Zeroize, ZeroizeOnDrop};

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;

/// Region used when neither a region source nor the environment names one
pub const DEFAULT_REGION: &str = "us-west-2";

// ============================================================================
// Credentials
// ============================================================================

/// Capability for supplying access credentials
pub trait CredentialsSource: Send + Sync + fmt::Debug {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Build the SDK credentials provider
    fn credentials_provider(&self) -> Result<SharedCredentialsProvider, ProvisioningError>;
}

/// Fixed access key credentials
///
/// Secrets are zeroized on drop and never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct StaticCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl StaticCredentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Result<Self, ProvisioningError> {
        let credentials = Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token,
        };

        if credentials.access_key_id.trim().is_empty() {
            return Err(ProvisioningError::invalid(
                "credentials.access_key_id",
                "must not be empty",
            ));
        }
        if credentials.secret_access_key.is_empty() {
            return Err(ProvisioningError::invalid(
                "credentials.secret_access_key",
                "must not be empty",
            ));
        }

        Ok(credentials)
    }

    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }
}

impl fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl CredentialsSource for StaticCredentials {
    fn name(&self) -> &str {
        "static"
    }

    fn credentials_provider(&self) -> Result<SharedCredentialsProvider, ProvisioningError> {
        Ok(SharedCredentialsProvider::new(Credentials::new(
            self.access_key_id.clone(),
            self.secret_access_key.clone(),
            self.session_token.clone(),
            None,
            "queue-provisioner-static",
        )))
    }
}

/// Credentials from a named shared-config profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileCredentials {
    profile_name: String,
}

impl ProfileCredentials {
    pub fn new(profile_name: impl Into<String>) -> Result<Self, ProvisioningError> {
        let profile_name = profile_name.into();
        if profile_name.trim().is_empty() {
            return Err(ProvisioningError::invalid(
                "credentials.profile_name",
                "must not be empty",
            ));
        }
        Ok(Self { profile_name })
    }

    pub fn profile_name(&self) -> &str {
        &self.profile_name
    }
}

impl CredentialsSource for ProfileCredentials {
    fn name(&self) -> &str {
        "profile"
    }

    fn credentials_provider(&self) -> Result<SharedCredentialsProvider, ProvisioningError> {
        let provider = aws_config::profile::ProfileFileCredentialsProvider::builder()
            .profile_name(&self.profile_name)
            .build();
        Ok(SharedCredentialsProvider::new(provider))
    }
}

/// Credentials from `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and
/// `AWS_SESSION_TOKEN`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnvironmentCredentials;

impl CredentialsSource for EnvironmentCredentials {
    fn name(&self) -> &str {
        "environment"
    }

    fn credentials_provider(&self) -> Result<SharedCredentialsProvider, ProvisioningError> {
        Ok(SharedCredentialsProvider::new(
            aws_config::environment::EnvironmentVariableCredentialsProvider::new(),
        ))
    }
}

// ============================================================================
// Region
// ============================================================================

/// Capability for supplying the target service region
pub trait RegionSource: Send + Sync + fmt::Debug {
    /// The region to use, or `None` to fall back to defaults
    fn region(&self) -> Option<String>;
}

/// A fixed, validated region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticRegion(String);

impl StaticRegion {
    pub fn new(region: impl Into<String>) -> Result<Self, ProvisioningError> {
        let region = region.into();
        validate_region(&region)?;
        Ok(Self(region))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl RegionSource for StaticRegion {
    fn region(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Region from `AWS_REGION`, then `AWS_DEFAULT_REGION`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnvironmentRegion;

impl RegionSource for EnvironmentRegion {
    fn region(&self) -> Option<String> {
        ["AWS_REGION", "AWS_DEFAULT_REGION"]
            .iter()
            .filter_map(|key| std::env::var(key).ok())
            .map(|value| value.trim().to_string())
            .find(|value| !value.is_empty())
    }
}

/// Region names are lowercase ASCII letters, digits and hyphens.
pub fn validate_region(region: &str) -> Result<(), ProvisioningError> {
    if region.is_empty() {
        return Err(ProvisioningError::invalid("region", "must not be empty"));
    }

    if region.starts_with('-')
        || region.ends_with('-')
        || !region
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(ProvisioningError::invalid(
            "region",
            format!(
                "'{}' must contain only lowercase letters, digits and inner hyphens",
                region
            ),
        ));
    }

    Ok(())
}

// ============================================================================
// Network configuration
// ============================================================================

/// Retry strategy for the underlying transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryMode {
    Standard,
    Adaptive,
    Disabled,
}

/// Timeouts, retries and endpoint tuning for the underlying transport
///
/// Every field is optional; `None` keeps the SDK default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub connect_timeout_ms: Option<u64>,
    pub read_timeout_ms: Option<u64>,
    /// Budget for a whole operation including retries
    pub operation_timeout_ms: Option<u64>,
    /// Budget for a single attempt
    pub operation_attempt_timeout_ms: Option<u64>,
    pub max_attempts: Option<u32>,
    pub initial_backoff_ms: Option<u64>,
    pub retry_mode: Option<RetryMode>,
    /// Endpoint override, e.g. a local emulator
    pub endpoint_url: Option<String>,
    /// Application name added to the user agent
    pub app_name: Option<String>,
}

impl NetworkConfig {
    /// Check values the SDK would otherwise reject or misinterpret
    pub fn validate(&self) -> Result<(), ProvisioningError> {
        let timeouts = [
            ("network.connect_timeout_ms", self.connect_timeout_ms),
            ("network.read_timeout_ms", self.read_timeout_ms),
            ("network.operation_timeout_ms", self.operation_timeout_ms),
            (
                "network.operation_attempt_timeout_ms",
                self.operation_attempt_timeout_ms,
            ),
        ];
        for (setting, value) in timeouts {
            if value == Some(0) {
                return Err(ProvisioningError::invalid(setting, "must be greater than zero"));
            }
        }

        if self.max_attempts == Some(0) {
            return Err(ProvisioningError::invalid(
                "network.max_attempts",
                "must be at least 1",
            ));
        }

        if let Some(endpoint) = &self.endpoint_url {
            let parsed = url::Url::parse(endpoint).map_err(|e| {
                ProvisioningError::invalid("network.endpoint_url", format!("'{}': {}", endpoint, e))
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ProvisioningError::invalid(
                    "network.endpoint_url",
                    format!("unsupported scheme '{}'", parsed.scheme()),
                ));
            }
        }

        if let Some(app_name) = &self.app_name {
            aws_config::AppName::new(app_name.clone()).map_err(|e| {
                ProvisioningError::invalid("network.app_name", e.to_string())
            })?;
        }

        Ok(())
    }

    /// Timeout configuration for the SDK
    pub fn timeout_config(&self) -> TimeoutConfig {
        let mut builder = TimeoutConfig::builder();
        if let Some(ms) = self.connect_timeout_ms {
            builder = builder.connect_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.read_timeout_ms {
            builder = builder.read_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.operation_timeout_ms {
            builder = builder.operation_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.operation_attempt_timeout_ms {
            builder = builder.operation_attempt_timeout(Duration::from_millis(ms));
        }
        builder.build()
    }

    /// Retry configuration for the SDK
    pub fn retry_config(&self) -> RetryConfig {
        let mut config = match self.retry_mode.unwrap_or(RetryMode::Standard) {
            RetryMode::Disabled => return RetryConfig::disabled(),
            RetryMode::Standard => RetryConfig::standard(),
            RetryMode::Adaptive => RetryConfig::adaptive(),
        };
        if let Some(max_attempts) = self.max_attempts {
            config = config.with_max_attempts(max_attempts);
        }
        if let Some(ms) = self.initial_backoff_ms {
            config = config.with_initial_backoff(Duration::from_millis(ms));
        }
        config
    }
}

// ============================================================================
// Client settings
// ============================================================================

/// The optional inputs a client is built from
#[derive(Clone, Default)]
pub struct ClientSettings {
    pub credentials: Option<Arc<dyn CredentialsSource>>,
    pub region: Option<Arc<dyn RegionSource>>,
    pub network: Option<Arc<NetworkConfig>>,
}

impl ClientSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialsSource>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_region(mut self, region: Arc<dyn RegionSource>) -> Self {
        self.region = Some(region);
        self
    }

    pub fn with_network(mut self, network: Arc<NetworkConfig>) -> Self {
        self.network = Some(network);
        self
    }

    /// Region named by the region source, validated.
    ///
    /// `Ok(None)` when there is no source or it has no opinion.
    pub fn explicit_region(&self) -> Result<Option<String>, ProvisioningError> {
        match self.region.as_ref().and_then(|source| source.region()) {
            Some(region) => {
                validate_region(&region)?;
                Ok(Some(region))
            }
            None => Ok(None),
        }
    }
}

impl fmt::Debug for ClientSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSettings")
            .field(
                "credentials",
                &self.credentials.as_ref().map(|c| c.name().to_string()),
            )
            .field("region", &self.region)
            .field("network", &self.network)
            .finish()
    }
}
