//! # Queue Provisioner
//!
//! Lazy, registry-managed provisioning of a buffered AWS SQS client.
//!
//! This library provides:
//! - A component registry holding at most one instance per capability
//! - Conditional, lazy construction of the queue-service client from
//!   whichever optional collaborators (credentials, region, network
//!   settings) are present
//! - A request-buffering decorator that batches sends, deletes and
//!   visibility changes
//! - Teardown of the client exactly once when the registry shuts down
//!
//! ## Module Organization
//!
//! - [`registry`] - Component registry, lazy factories and teardown hooks
//! - [`settings`] - Optional collaborator settings
//! - [`client`] - Queue-service client and factory traits
//! - [`providers`] - AWS SQS and in-memory backends
//! - [`buffered`] - Request-buffering decorator
//! - [`provisioner`] - The client provisioner
//! - [`config`] - File and environment configuration
//! - [`message`] - Message types
//! - [`error`] - Error types
//!
//! ## Example
//!
//! ```rust
//! use queue_provisioner::providers::InMemoryClientFactory;
//! use queue_provisioner::{ComponentRegistry, OutboundMessage, QueueServiceClient, SqsClientProvisioner};
//!
//! # tokio_test::block_on(async {
//! let registry = ComponentRegistry::new();
//! SqsClientProvisioner::new()
//!     .with_factory(InMemoryClientFactory::new())
//!     .register(&registry)
//!     .unwrap();
//!
//! let client = registry.require::<dyn QueueServiceClient>().await.unwrap();
//! let url = client.get_queue_url("orders").await.unwrap();
//! client.send_message(&url, OutboundMessage::new("hello")).await.unwrap();
//!
//! registry.shutdown().await;
//! # });
//! ```

pub mod buffered;
pub mod client;
pub mod config;
pub mod error;
pub mod message;
pub mod providers;
pub mod provisioner;
pub mod registry;
pub mod settings;

pub use buffered::{BufferedQueueClient, QueueBufferConfig};
pub use client::{ManagedClient, QueueClientFactory, QueueServiceClient};
pub use config::{CredentialsConfig, ProvisionerConfig};
pub use error::{ConfigurationError, ProvisioningError, QueueError, RegistryError, ValidationError};
pub use message::{
    MessageId, OutboundMessage, QueueName, ReceiveOptions, ReceivedMessage, SendReceipt,
    VisibilityChange,
};
pub use provisioner::{provision_client, SqsClientProvisioner};
pub use registry::{ComponentFactory, ComponentRegistry, Provisioned, Registration, TeardownHook};
pub use settings::{
    ClientSettings, CredentialsSource, EnvironmentCredentials, EnvironmentRegion, NetworkConfig,
    ProfileCredentials, RegionSource, RetryMode, StaticCredentials, StaticRegion,
};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
