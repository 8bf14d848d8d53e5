//! Client traits for queue-service operations.
//!
//! [`QueueServiceClient`] is the capability that gets registered in the
//! [`ComponentRegistry`](crate::registry::ComponentRegistry). Base clients
//! (AWS, in-memory) and the buffering decorator all implement it, and
//! [`QueueClientFactory`] builds base clients from optional settings.

use crate::error::{ProvisioningError, QueueError};
use crate::message::{OutboundMessage, ReceiveOptions, ReceivedMessage, SendReceipt, VisibilityChange};
use crate::settings::ClientSettings;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// The decorated client handed to consumers.
pub type ManagedClient = Arc<dyn QueueServiceClient>;

/// Main interface for queue-service operations across all backends
///
/// Batch operations return exactly one result per entry, in entry order.
#[async_trait]
pub trait QueueServiceClient: Send + Sync {
    /// Resolve the URL of a named queue
    async fn get_queue_url(&self, queue_name: &str) -> Result<String, QueueError>;

    /// Send single message to queue
    async fn send_message(
        &self,
        queue_url: &str,
        message: OutboundMessage,
    ) -> Result<SendReceipt, QueueError>;

    /// Send up to ten messages in one request
    async fn send_message_batch(
        &self,
        queue_url: &str,
        messages: Vec<OutboundMessage>,
    ) -> Result<Vec<Result<SendReceipt, QueueError>>, QueueError>;

    /// Receive messages from queue
    async fn receive_messages(
        &self,
        queue_url: &str,
        options: ReceiveOptions,
    ) -> Result<Vec<ReceivedMessage>, QueueError>;

    /// Delete a received message
    async fn delete_message(&self, queue_url: &str, receipt_handle: &str) -> Result<(), QueueError>;

    /// Delete up to ten received messages in one request
    async fn delete_message_batch(
        &self,
        queue_url: &str,
        receipt_handles: Vec<String>,
    ) -> Result<Vec<Result<(), QueueError>>, QueueError>;

    /// Change how long a received message stays invisible
    async fn change_message_visibility(
        &self,
        queue_url: &str,
        receipt_handle: &str,
        timeout: Duration,
    ) -> Result<(), QueueError>;

    /// Change visibility of up to ten received messages in one request
    async fn change_message_visibility_batch(
        &self,
        queue_url: &str,
        changes: Vec<VisibilityChange>,
    ) -> Result<Vec<Result<(), QueueError>>, QueueError>;

    /// Release the client's resources. Calling it again has no effect.
    async fn shutdown(&self);

    /// Short name of the backend, e.g. `"aws-sqs"`
    fn backend(&self) -> &'static str;

    /// Region the client talks to, if the backend has one
    fn region(&self) -> Option<String> {
        None
    }
}

/// Builds base clients from optional settings
#[async_trait]
pub trait QueueClientFactory: Send + Sync {
    /// Build a client, using backend defaults for any absent setting
    async fn build(
        &self,
        settings: &ClientSettings,
    ) -> Result<Arc<dyn QueueServiceClient>, ProvisioningError>;
}

/// Check a batch request against the service's entry limit
pub(crate) fn check_batch_size(size: usize) -> Result<(), QueueError> {
    if size == 0 {
        return Err(QueueError::ValidationError(
            crate::error::ValidationError::Required {
                field: "entries".to_string(),
            },
        ));
    }
    if size > crate::message::MAX_BATCH_ENTRIES {
        return Err(QueueError::BatchTooLarge {
            size,
            max_size: crate::message::MAX_BATCH_ENTRIES,
        });
    }
    Ok(())
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
