//! Provisioner configuration loading.
//!
//! Sources, later overriding earlier:
//!
//! 1. An optional file; the format follows the extension (yaml, json, toml).
//! 2. Environment variables prefixed `QUEUE_PROVISIONER__` with `__` between
//!    nested keys, e.g. `QUEUE_PROVISIONER__BUFFER__MAX_BATCH_OPEN_MS=50`.
//!
//! Every field has a default, so an empty environment yields a valid
//! configuration in which all three collaborators are absent.

use crate::buffered::QueueBufferConfig;
use crate::error::{ConfigurationError, ProvisioningError, RegistryError};
use crate::registry::ComponentRegistry;
use crate::settings::{
    validate_region, CredentialsSource, EnvironmentCredentials, NetworkConfig,
    ProfileCredentials, RegionSource, StaticCredentials, StaticRegion,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use zeroize::Zeroize;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Prefix of configuration environment variables
pub const ENV_PREFIX: &str = "QUEUE_PROVISIONER";

/// Resolved provisioner configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionerConfig {
    /// Service region; absent means the default region chain
    pub region: Option<String>,
    pub credentials: Option<CredentialsConfig>,
    pub network: Option<NetworkConfig>,
    pub buffer: QueueBufferConfig,
}

/// Where credentials come from
///
/// Secrets are never serialized.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialsConfig {
    Static {
        access_key_id: String,
        #[serde(skip_serializing)]
        secret_access_key: String,
        #[serde(default, skip_serializing)]
        session_token: Option<String>,
    },
    Profile {
        profile_name: String,
    },
    Environment,
}

impl CredentialsConfig {
    /// Build the credentials source this entry describes
    pub fn to_source(&self) -> Result<Arc<dyn CredentialsSource>, ProvisioningError> {
        Ok(match self {
            Self::Static {
                access_key_id,
                secret_access_key,
                session_token,
            } => Arc::new(StaticCredentials::new(
                access_key_id.clone(),
                secret_access_key.clone(),
                session_token.clone(),
            )?),
            Self::Profile { profile_name } => {
                Arc::new(ProfileCredentials::new(profile_name.clone())?)
            }
            Self::Environment => Arc::new(EnvironmentCredentials),
        })
    }
}

impl fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static { access_key_id, .. } => f
                .debug_struct("Static")
                .field("access_key_id", access_key_id)
                .field("secret_access_key", &"<redacted>")
                .finish(),
            Self::Profile { profile_name } => f
                .debug_struct("Profile")
                .field("profile_name", profile_name)
                .finish(),
            Self::Environment => f.write_str("Environment"),
        }
    }
}

impl Drop for CredentialsConfig {
    fn drop(&mut self) {
        if let Self::Static {
            secret_access_key,
            session_token,
            ..
        } = self
        {
            secret_access_key.zeroize();
            session_token.zeroize();
        }
    }
}

impl ProvisionerConfig {
    /// Load from an optional file and the environment, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigurationError::FileNotFound {
                    path: path.display().to_string(),
                });
            }
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config: Self = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ProvisioningError> {
        if let Some(region) = &self.region {
            validate_region(region)?;
        }
        if let Some(credentials) = &self.credentials {
            credentials.to_source()?;
        }
        if let Some(network) = &self.network {
            network.validate()?;
        }
        self.buffer.validate()
    }

    pub fn region_source(&self) -> Result<Option<Arc<dyn RegionSource>>, ProvisioningError> {
        self.region
            .as_ref()
            .map(|region| Ok(Arc::new(StaticRegion::new(region.clone())?) as Arc<dyn RegionSource>))
            .transpose()
    }

    pub fn credentials_source(
        &self,
    ) -> Result<Option<Arc<dyn CredentialsSource>>, ProvisioningError> {
        self.credentials.as_ref().map(CredentialsConfig::to_source).transpose()
    }

    /// Register each configured collaborator the registry does not have yet.
    pub fn register_collaborators(
        &self,
        registry: &ComponentRegistry,
    ) -> Result<(), ConfigurationError> {
        if let Some(credentials) = self.credentials_source()? {
            register_if_missing(registry.register::<dyn CredentialsSource>(credentials))?;
        }
        if let Some(region) = self.region_source()? {
            register_if_missing(registry.register::<dyn RegionSource>(region))?;
        }
        if let Some(network) = &self.network {
            register_if_missing(registry.register(Arc::new(network.clone())))?;
        }
        Ok(())
    }
}

fn register_if_missing(outcome: Result<(), RegistryError>) -> Result<(), RegistryError> {
    match outcome {
        Err(RegistryError::AlreadyRegistered { component }) => {
            debug!(component, "Collaborator already registered, keeping existing");
            Ok(())
        }
        other => other,
    }
}
