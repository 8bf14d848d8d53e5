//! Conditional, lazy provisioning of the managed queue-service client.
//!
//! [`SqsClientProvisioner`] is registered as the factory for the
//! `dyn QueueServiceClient` capability, but only if nothing else provides
//! that capability already. On first request it:
//!
//! 1. Looks up the optional collaborators (`dyn CredentialsSource`,
//!    `dyn RegionSource`, [`NetworkConfig`]) in the registry.
//! 2. Builds a base client from whichever are present.
//! 3. Wraps it in a [`BufferedQueueClient`].
//! 4. Hands the registry a teardown hook that shuts the client down.
//!
//! Construction failures are reported once and never retried here.
//!
//! # Examples
//!
//! ```rust
//! use queue_provisioner::providers::InMemoryClientFactory;
//! use queue_provisioner::provisioner::SqsClientProvisioner;
//! use queue_provisioner::registry::ComponentRegistry;
//! use queue_provisioner::QueueServiceClient;
//!
//! # tokio_test::block_on(async {
//! let registry = ComponentRegistry::new();
//! SqsClientProvisioner::new()
//!     .with_factory(InMemoryClientFactory::new())
//!     .register(&registry)
//!     .unwrap();
//!
//! let client = registry.require::<dyn QueueServiceClient>().await.unwrap();
//! assert_eq!(client.backend(), "in-memory");
//! registry.shutdown().await;
//! # });
//! ```

use crate::buffered::{BufferedQueueClient, QueueBufferConfig};
use crate::client::{ManagedClient, QueueClientFactory, QueueServiceClient};
use crate::config::ProvisionerConfig;
use crate::error::{ProvisioningError, RegistryError};
use crate::providers::AwsSqsClientFactory;
use crate::registry::{ComponentFactory, ComponentRegistry, Provisioned, Registration};
use crate::settings::{ClientSettings, CredentialsSource, NetworkConfig, RegionSource};
use async_trait::async_trait;
use futures::FutureExt;
use std::sync::Arc;
use tracing::{debug, info};

#[cfg(test)]
#[path = "provisioner_tests.rs"]
mod tests;

/// Factory for the buffered `dyn QueueServiceClient` singleton
#[derive(Clone)]
pub struct SqsClientProvisioner {
    factory: Arc<dyn QueueClientFactory>,
    buffer: QueueBufferConfig,
}

impl SqsClientProvisioner {
    /// Provisioner building AWS SQS clients with the default buffer policy
    pub fn new() -> Self {
        Self {
            factory: Arc::new(AwsSqsClientFactory::new()),
            buffer: QueueBufferConfig::default(),
        }
    }

    /// Build base clients with a different backend
    pub fn with_factory(mut self, factory: impl QueueClientFactory + 'static) -> Self {
        self.factory = Arc::new(factory);
        self
    }

    pub fn with_buffer_config(mut self, buffer: QueueBufferConfig) -> Self {
        self.buffer = buffer;
        self
    }

    /// Provisioner using the buffer policy from loaded configuration
    pub fn from_config(config: &ProvisionerConfig) -> Self {
        Self::new().with_buffer_config(config.buffer.clone())
    }

    /// Register as the lazy provider of `dyn QueueServiceClient`.
    ///
    /// Returns [`Registration::Skipped`] when a client is already provided.
    pub fn register(self, registry: &ComponentRegistry) -> Result<Registration, RegistryError> {
        let outcome = registry.register_lazy_if_missing(self)?;
        match outcome {
            Registration::Registered => debug!("Queue client provisioner registered"),
            Registration::Skipped => {
                info!("Queue client already provided, provisioner not registered")
            }
        }
        Ok(outcome)
    }

    /// Build the managed client from whichever collaborators are present.
    pub async fn provide_client(
        &self,
        registry: &ComponentRegistry,
    ) -> Result<Provisioned<dyn QueueServiceClient>, ProvisioningError> {
        self.buffer.validate()?;

        let mut settings = ClientSettings::new();
        if let Some(credentials) =
            collaborator::<dyn CredentialsSource>(registry, "credentials").await?
        {
            settings = settings.with_credentials(credentials);
        }
        if let Some(region) = collaborator::<dyn RegionSource>(registry, "region").await? {
            settings = settings.with_region(region);
        }
        if let Some(network) = collaborator::<NetworkConfig>(registry, "network").await? {
            settings = settings.with_network(network);
        }
        debug!(?settings, "Provisioning queue client");

        let base = self.factory.build(&settings).await?;
        let client = Arc::new(BufferedQueueClient::new(base, self.buffer.clone())?);

        info!(
            backend = client.backend(),
            region = ?client.region(),
            "Queue client provisioned"
        );

        let handle = Arc::clone(&client);
        Ok(Provisioned::new(client as ManagedClient).with_teardown(Box::new(move || {
            async move { handle.shutdown().await }.boxed()
        })))
    }
}

impl Default for SqsClientProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ComponentFactory for SqsClientProvisioner {
    type Component = dyn QueueServiceClient;

    async fn create(
        &self,
        registry: &ComponentRegistry,
    ) -> Result<Provisioned<Self::Component>, ProvisioningError> {
        self.provide_client(registry).await
    }
}

async fn collaborator<T>(
    registry: &ComponentRegistry,
    component: &'static str,
) -> Result<Option<Arc<T>>, ProvisioningError>
where
    T: ?Sized + Send + Sync + 'static,
{
    registry
        .resolve::<T>()
        .await
        .map_err(|source| ProvisioningError::Dependency {
            component,
            source: Box::new(source),
        })
}

/// Register the default provisioner if no client is provided, then resolve
/// the client.
pub async fn provision_client(registry: &ComponentRegistry) -> Result<ManagedClient, RegistryError> {
    SqsClientProvisioner::new().register(registry)?;
    registry.require::<dyn QueueServiceClient>().await
}
