//! In-memory queue-service client for testing and development.
//!
//! This module provides a fully functional in-process backend that:
//! - Creates queues on first URL lookup (`memory://<name>`)
//! - Implements delivery delays, visibility timeouts and receipt handles
//! - Counts requests per operation so batching can be observed
//! - Counts shutdown calls so teardown can be verified
//!
//! [`InMemoryClientFactory`] builds these clients through the same
//! [`QueueClientFactory`] seam the AWS backend uses.

use crate::client::{check_batch_size, QueueClientFactory, QueueServiceClient};
use crate::error::{ProvisioningError, QueueError};
use crate::message::{
    MessageId, OutboundMessage, ReceiveOptions, ReceivedMessage, SendReceipt, VisibilityChange,
};
use crate::settings::{ClientSettings, NetworkConfig, DEFAULT_REGION};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

const URL_SCHEME: &str = "memory://";

/// Visibility timeout applied when a receive call does not name one
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Internal Storage Structures
// ============================================================================

#[derive(Default)]
struct MemoryState {
    queues: HashMap<String, VecDeque<StoredMessage>>,
    requests: HashMap<&'static str, usize>,
}

/// A message stored in the queue with metadata
struct StoredMessage {
    message_id: MessageId,
    body: String,
    attributes: HashMap<String, String>,
    receive_count: u32,
    sent_at: DateTime<Utc>,
    visible_at: Instant,
    receipt_handle: Option<String>,
}

// ============================================================================
// InMemoryQueueClient
// ============================================================================

/// In-process implementation of [`QueueServiceClient`]
pub struct InMemoryQueueClient {
    state: Mutex<MemoryState>,
    region: Option<String>,
    shut_down: AtomicBool,
    shutdown_calls: AtomicUsize,
}

impl InMemoryQueueClient {
    pub fn new() -> Self {
        Self::with_region(None)
    }

    pub fn with_region(region: Option<String>) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            region,
            shut_down: AtomicBool::new(false),
            shutdown_calls: AtomicUsize::new(0),
        }
    }

    /// Create a queue and return its URL
    pub fn create_queue(&self, queue_name: &str) -> String {
        let url = format!("{}{}", URL_SCHEME, queue_name);
        self.lock()
            .queues
            .entry(url.clone())
            .or_default();
        url
    }

    /// Number of messages stored in a queue, visible or not
    pub fn queue_depth(&self, queue_url: &str) -> usize {
        self.lock().queues.get(queue_url).map_or(0, VecDeque::len)
    }

    /// Number of requests made for one operation, e.g. `"SendMessageBatch"`
    pub fn request_count(&self, operation: &str) -> usize {
        self.lock().requests.get(operation).copied().unwrap_or(0)
    }

    /// Number of requests across all operations
    pub fn total_requests(&self) -> usize {
        self.lock().requests.values().sum()
    }

    /// Number of times `shutdown` actually released the client
    pub fn shutdown_count(&self) -> usize {
        self.shutdown_calls.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a request and hand out the locked state.
    fn begin(&self, operation: &'static str) -> Result<std::sync::MutexGuard<'_, MemoryState>, QueueError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(QueueError::ClientShutdown);
        }
        let mut state = self.lock();
        *state.requests.entry(operation).or_insert(0) += 1;
        Ok(state)
    }

    fn queue_mut<'a>(
        state: &'a mut MemoryState,
        queue_url: &str,
    ) -> Result<&'a mut VecDeque<StoredMessage>, QueueError> {
        state
            .queues
            .get_mut(queue_url)
            .ok_or_else(|| QueueError::QueueNotFound {
                queue: queue_url.to_string(),
            })
    }

    fn enqueue(queue: &mut VecDeque<StoredMessage>, message: OutboundMessage) -> Result<SendReceipt, QueueError> {
        message.validate()?;
        let message_id = MessageId::new();
        let now = Instant::now();
        queue.push_back(StoredMessage {
            message_id: message_id.clone(),
            body: message.body,
            attributes: message.attributes,
            receive_count: 0,
            sent_at: Utc::now(),
            visible_at: now + message.delay.unwrap_or_default(),
            receipt_handle: None,
        });
        Ok(SendReceipt { message_id })
    }

    fn delete(queue: &mut VecDeque<StoredMessage>, receipt_handle: &str) -> Result<(), QueueError> {
        let position = queue
            .iter()
            .position(|m| m.receipt_handle.as_deref() == Some(receipt_handle))
            .ok_or_else(|| QueueError::InvalidReceipt {
                receipt: receipt_handle.to_string(),
            })?;
        queue.remove(position);
        Ok(())
    }

    fn change_visibility(
        queue: &mut VecDeque<StoredMessage>,
        receipt_handle: &str,
        timeout: Duration,
    ) -> Result<(), QueueError> {
        let message = queue
            .iter_mut()
            .find(|m| m.receipt_handle.as_deref() == Some(receipt_handle))
            .ok_or_else(|| QueueError::InvalidReceipt {
                receipt: receipt_handle.to_string(),
            })?;
        message.visible_at = Instant::now() + timeout;
        Ok(())
    }
}

impl Default for InMemoryQueueClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueServiceClient for InMemoryQueueClient {
    async fn get_queue_url(&self, queue_name: &str) -> Result<String, QueueError> {
        drop(self.begin("GetQueueUrl")?);
        Ok(self.create_queue(queue_name))
    }

    async fn send_message(
        &self,
        queue_url: &str,
        message: OutboundMessage,
    ) -> Result<SendReceipt, QueueError> {
        let mut state = self.begin("SendMessage")?;
        let queue = Self::queue_mut(&mut state, queue_url)?;
        Self::enqueue(queue, message)
    }

    async fn send_message_batch(
        &self,
        queue_url: &str,
        messages: Vec<OutboundMessage>,
    ) -> Result<Vec<Result<SendReceipt, QueueError>>, QueueError> {
        check_batch_size(messages.len())?;
        let mut state = self.begin("SendMessageBatch")?;
        let queue = Self::queue_mut(&mut state, queue_url)?;
        Ok(messages
            .into_iter()
            .map(|message| Self::enqueue(queue, message))
            .collect())
    }

    async fn receive_messages(
        &self,
        queue_url: &str,
        options: ReceiveOptions,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        options.validate()?;
        let mut state = self.begin("ReceiveMessage")?;
        let queue = Self::queue_mut(&mut state, queue_url)?;

        let now = Instant::now();
        let visibility = options
            .visibility_timeout
            .unwrap_or(DEFAULT_VISIBILITY_TIMEOUT);

        let received: Vec<ReceivedMessage> = queue
            .iter_mut()
            .filter(|m| m.visible_at <= now)
            .take(options.max_messages as usize)
            .map(|m| {
                let receipt = uuid::Uuid::new_v4().to_string();
                m.receive_count += 1;
                m.visible_at = now + visibility;
                m.receipt_handle = Some(receipt.clone());
                ReceivedMessage {
                    message_id: m.message_id.clone(),
                    receipt_handle: receipt,
                    body: m.body.clone(),
                    attributes: m.attributes.clone(),
                    receive_count: m.receive_count,
                    sent_at: Some(m.sent_at),
                }
            })
            .collect();

        debug!(queue_url, count = received.len(), "Received in-memory messages");
        Ok(received)
    }

    async fn delete_message(&self, queue_url: &str, receipt_handle: &str) -> Result<(), QueueError> {
        let mut state = self.begin("DeleteMessage")?;
        let queue = Self::queue_mut(&mut state, queue_url)?;
        Self::delete(queue, receipt_handle)
    }

    async fn delete_message_batch(
        &self,
        queue_url: &str,
        receipt_handles: Vec<String>,
    ) -> Result<Vec<Result<(), QueueError>>, QueueError> {
        check_batch_size(receipt_handles.len())?;
        let mut state = self.begin("DeleteMessageBatch")?;
        let queue = Self::queue_mut(&mut state, queue_url)?;
        Ok(receipt_handles
            .iter()
            .map(|handle| Self::delete(queue, handle))
            .collect())
    }

    async fn change_message_visibility(
        &self,
        queue_url: &str,
        receipt_handle: &str,
        timeout: Duration,
    ) -> Result<(), QueueError> {
        let mut state = self.begin("ChangeMessageVisibility")?;
        let queue = Self::queue_mut(&mut state, queue_url)?;
        Self::change_visibility(queue, receipt_handle, timeout)
    }

    async fn change_message_visibility_batch(
        &self,
        queue_url: &str,
        changes: Vec<VisibilityChange>,
    ) -> Result<Vec<Result<(), QueueError>>, QueueError> {
        check_batch_size(changes.len())?;
        let mut state = self.begin("ChangeMessageVisibilityBatch")?;
        let queue = Self::queue_mut(&mut state, queue_url)?;
        Ok(changes
            .iter()
            .map(|change| Self::change_visibility(queue, &change.receipt_handle, change.timeout))
            .collect())
    }

    async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            debug!("In-memory client already shut down");
            return;
        }
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        debug!("In-memory client shut down");
    }

    fn backend(&self) -> &'static str {
        "in-memory"
    }

    fn region(&self) -> Option<String> {
        self.region.clone()
    }
}

// ============================================================================
// InMemoryClientFactory
// ============================================================================

/// What a factory saw when it built a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsSummary {
    /// Name of the credentials source, if one was supplied
    pub credentials: Option<String>,
    /// Region the client was configured with
    pub region: String,
    /// Whether the region came from the settings rather than the default
    pub explicit_region: bool,
    pub network: Option<NetworkConfig>,
}

#[derive(Default)]
struct FactoryLog {
    summaries: Vec<SettingsSummary>,
    clients: Vec<Arc<InMemoryQueueClient>>,
}

/// Builds [`InMemoryQueueClient`]s and remembers what it built.
///
/// Clones share the same log, so a test can keep one handle and give
/// another to a provisioner.
#[derive(Clone, Default)]
pub struct InMemoryClientFactory {
    log: Arc<Mutex<FactoryLog>>,
}

impl InMemoryClientFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of clients built so far
    pub fn build_count(&self) -> usize {
        self.lock().clients.len()
    }

    /// Settings seen by the most recent build
    pub fn last_settings(&self) -> Option<SettingsSummary> {
        self.lock().summaries.last().cloned()
    }

    /// Every client built so far, oldest first
    pub fn clients(&self) -> Vec<Arc<InMemoryQueueClient>> {
        self.lock().clients.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FactoryLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl QueueClientFactory for InMemoryClientFactory {
    async fn build(
        &self,
        settings: &ClientSettings,
    ) -> Result<Arc<dyn QueueServiceClient>, ProvisioningError> {
        if let Some(network) = &settings.network {
            network.validate()?;
        }
        if let Some(credentials) = &settings.credentials {
            credentials.credentials_provider()?;
        }

        let explicit = settings.explicit_region()?;
        let summary = SettingsSummary {
            credentials: settings.credentials.as_ref().map(|c| c.name().to_string()),
            explicit_region: explicit.is_some(),
            region: explicit.unwrap_or_else(|| DEFAULT_REGION.to_string()),
            network: settings.network.as_deref().cloned(),
        };

        let client = Arc::new(InMemoryQueueClient::with_region(Some(summary.region.clone())));
        debug!(region = %summary.region, "Built in-memory queue client");

        let mut log = self.lock();
        log.summaries.push(summary);
        log.clients.push(Arc::clone(&client));

        Ok(client)
    }
}
