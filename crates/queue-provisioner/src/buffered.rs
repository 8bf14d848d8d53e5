//! Request-buffering decorator for queue-service clients.
//!
//! [`BufferedQueueClient`] wraps any [`QueueServiceClient`] and turns single
//! sends, deletes and visibility changes into batch calls:
//!
//! - Entries are grouped per queue URL and operation.
//! - A batch is dispatched when it reaches [`QueueBufferConfig::max_batch_size`]
//!   entries or [`QueueBufferConfig::max_batch_size_bytes`] bytes, or when it
//!   has been open for [`QueueBufferConfig::max_batch_open_ms`].
//! - At most [`QueueBufferConfig::max_inflight_outbound_batches`] batch calls
//!   run at once.
//! - Each caller gets back the result for its own entry.
//!
//! Queue URL lookups are cached. Receives and explicit batch calls pass
//! straight through to the wrapped client.

use crate::client::QueueServiceClient;
use crate::error::{ProvisioningError, QueueError};
use crate::message::{
    OutboundMessage, ReceiveOptions, ReceivedMessage, SendReceipt, VisibilityChange,
    MAX_BATCH_ENTRIES, MAX_MESSAGE_SIZE,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{oneshot, watch, OnceCell, Semaphore};
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "buffered_tests.rs"]
mod tests;

// ============================================================================
// Configuration
// ============================================================================

/// Batching policy for [`BufferedQueueClient`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueBufferConfig {
    /// Entries per batch, 1-10
    pub max_batch_size: usize,
    /// Payload bytes per batch
    pub max_batch_size_bytes: usize,
    /// How long a batch may stay open before it is sent
    pub max_batch_open_ms: u64,
    /// Batch calls allowed in flight at once
    pub max_inflight_outbound_batches: usize,
}

impl Default for QueueBufferConfig {
    fn default() -> Self {
        Self {
            max_batch_size: MAX_BATCH_ENTRIES,
            max_batch_size_bytes: MAX_MESSAGE_SIZE,
            max_batch_open_ms: 200,
            max_inflight_outbound_batches: 5,
        }
    }
}

impl QueueBufferConfig {
    pub fn validate(&self) -> Result<(), ProvisioningError> {
        if self.max_batch_size == 0 || self.max_batch_size > MAX_BATCH_ENTRIES {
            return Err(ProvisioningError::invalid(
                "buffer.max_batch_size",
                format!("must be 1-{}", MAX_BATCH_ENTRIES),
            ));
        }
        if self.max_batch_size_bytes == 0 || self.max_batch_size_bytes > MAX_MESSAGE_SIZE {
            return Err(ProvisioningError::invalid(
                "buffer.max_batch_size_bytes",
                format!("must be 1-{}", MAX_MESSAGE_SIZE),
            ));
        }
        if self.max_batch_open_ms == 0 {
            return Err(ProvisioningError::invalid(
                "buffer.max_batch_open_ms",
                "must be greater than zero",
            ));
        }
        if self.max_inflight_outbound_batches == 0 {
            return Err(ProvisioningError::invalid(
                "buffer.max_inflight_outbound_batches",
                "must be at least 1",
            ));
        }
        Ok(())
    }

    fn open_duration(&self) -> Duration {
        Duration::from_millis(self.max_batch_open_ms)
    }
}

// ============================================================================
// Pending batches
// ============================================================================

type Reply<T> = oneshot::Sender<Result<T, QueueError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum BatchKind {
    Send,
    Delete,
    ChangeVisibility,
}

impl BatchKind {
    fn operation(self) -> &'static str {
        match self {
            Self::Send => "SendMessageBatch",
            Self::Delete => "DeleteMessageBatch",
            Self::ChangeVisibility => "ChangeMessageVisibilityBatch",
        }
    }
}

enum Entry {
    Send(OutboundMessage, Reply<SendReceipt>),
    Delete(String, Reply<()>),
    ChangeVisibility(VisibilityChange, Reply<()>),
}

impl Entry {
    fn kind(&self) -> BatchKind {
        match self {
            Self::Send(..) => BatchKind::Send,
            Self::Delete(..) => BatchKind::Delete,
            Self::ChangeVisibility(..) => BatchKind::ChangeVisibility,
        }
    }

    fn size(&self) -> usize {
        match self {
            Self::Send(message, _) => message.encoded_size(),
            Self::Delete(handle, _) => handle.len(),
            Self::ChangeVisibility(change, _) => change.receipt_handle.len(),
        }
    }
}

type BatchKey = (String, BatchKind);

struct OpenBatch {
    id: u64,
    entries: Vec<Entry>,
    bytes: usize,
}

fn abandoned() -> QueueError {
    QueueError::provider("buffered", "BatchAbandoned", "batch ended without a result")
}

fn fan_out<T>(senders: Vec<Reply<T>>, outcome: Result<Vec<Result<T, QueueError>>, QueueError>) {
    match outcome {
        Ok(results) => {
            let mut results = results.into_iter();
            for sender in senders {
                let result = results.next().unwrap_or_else(|| Err(abandoned()));
                let _ = sender.send(result);
            }
        }
        Err(error) => {
            for sender in senders {
                let _ = sender.send(Err(error.clone()));
            }
        }
    }
}

// ============================================================================
// Shared state
// ============================================================================

struct Shared {
    client: Arc<dyn QueueServiceClient>,
    config: QueueBufferConfig,
    batches: Mutex<HashMap<BatchKey, OpenBatch>>,
    next_batch_id: AtomicU64,
    permits: Semaphore,
    /// Batches dispatched but not yet answered
    outstanding: watch::Sender<usize>,
    queue_urls: RwLock<HashMap<String, String>>,
    closed: AtomicBool,
    shutdown: OnceCell<()>,
}

impl Shared {
    fn lock_batches(&self) -> std::sync::MutexGuard<'_, HashMap<BatchKey, OpenBatch>> {
        self.batches.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add an entry to its open batch, dispatching as limits require.
    fn enqueue(self: &Arc<Self>, queue_url: &str, entry: Entry) -> Result<(), QueueError> {
        let mut batches = self.lock_batches();
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::ClientShutdown);
        }

        let key = (queue_url.to_string(), entry.kind());
        let size = entry.size();

        let overflows = batches.get(&key).is_some_and(|batch| {
            !batch.entries.is_empty() && batch.bytes + size > self.config.max_batch_size_bytes
        });
        if overflows {
            if let Some(batch) = batches.remove(&key) {
                self.dispatch(key.clone(), batch);
            }
        }

        let batch = batches.entry(key.clone()).or_insert_with(|| {
            let id = self.next_batch_id.fetch_add(1, Ordering::Relaxed);
            self.schedule_timer(key.clone(), id);
            OpenBatch {
                id,
                entries: Vec::new(),
                bytes: 0,
            }
        });
        batch.entries.push(entry);
        batch.bytes += size;

        let full = batch.entries.len() >= self.config.max_batch_size
            || batch.bytes >= self.config.max_batch_size_bytes;
        if full {
            if let Some(batch) = batches.remove(&key) {
                self.dispatch(key, batch);
            }
        }

        Ok(())
    }

    fn schedule_timer(self: &Arc<Self>, key: BatchKey, id: u64) {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(shared.config.open_duration()).await;
            let mut batches = shared.lock_batches();
            if batches.get(&key).is_some_and(|batch| batch.id == id) {
                if let Some(batch) = batches.remove(&key) {
                    shared.dispatch(key, batch);
                }
            }
        });
    }

    /// Dispatch every open batch.
    fn dispatch_all(self: &Arc<Self>) {
        let mut batches = self.lock_batches();
        for (key, batch) in batches.drain() {
            self.dispatch(key, batch);
        }
    }

    fn dispatch(self: &Arc<Self>, key: BatchKey, batch: OpenBatch) {
        self.outstanding.send_modify(|count| *count += 1);
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let (queue_url, kind) = key;
            shared.run_batch(&queue_url, kind, batch.entries).await;
            shared.outstanding.send_modify(|count| *count -= 1);
        });
    }

    async fn run_batch(&self, queue_url: &str, kind: BatchKind, entries: Vec<Entry>) {
        let _permit = self.permits.acquire().await.ok();
        debug!(
            queue_url,
            batch_size = entries.len(),
            operation = kind.operation(),
            "Dispatching buffered batch"
        );

        match kind {
            BatchKind::Send => {
                let (messages, senders): (Vec<_>, Vec<_>) = entries
                    .into_iter()
                    .filter_map(|entry| match entry {
                        Entry::Send(message, sender) => Some((message, sender)),
                        _ => None,
                    })
                    .unzip();
                let outcome = self.client.send_message_batch(queue_url, messages).await;
                if let Err(error) = &outcome {
                    warn!(queue_url, error = %error, "Buffered send batch failed");
                }
                fan_out(senders, outcome);
            }
            BatchKind::Delete => {
                let (handles, senders): (Vec<_>, Vec<_>) = entries
                    .into_iter()
                    .filter_map(|entry| match entry {
                        Entry::Delete(handle, sender) => Some((handle, sender)),
                        _ => None,
                    })
                    .unzip();
                let outcome = self.client.delete_message_batch(queue_url, handles).await;
                if let Err(error) = &outcome {
                    warn!(queue_url, error = %error, "Buffered delete batch failed");
                }
                fan_out(senders, outcome);
            }
            BatchKind::ChangeVisibility => {
                let (changes, senders): (Vec<_>, Vec<_>) = entries
                    .into_iter()
                    .filter_map(|entry| match entry {
                        Entry::ChangeVisibility(change, sender) => Some((change, sender)),
                        _ => None,
                    })
                    .unzip();
                let outcome = self
                    .client
                    .change_message_visibility_batch(queue_url, changes)
                    .await;
                if let Err(error) = &outcome {
                    warn!(queue_url, error = %error, "Buffered visibility batch failed");
                }
                fan_out(senders, outcome);
            }
        }
    }

    async fn wait_idle(&self) {
        let mut outstanding = self.outstanding.subscribe();
        let _ = outstanding.wait_for(|count| *count == 0).await;
    }
}

// ============================================================================
// BufferedQueueClient
// ============================================================================

/// Batching decorator over a [`QueueServiceClient`]
pub struct BufferedQueueClient {
    shared: Arc<Shared>,
}

impl BufferedQueueClient {
    pub fn new(
        client: Arc<dyn QueueServiceClient>,
        config: QueueBufferConfig,
    ) -> Result<Self, ProvisioningError> {
        config.validate()?;
        let (outstanding, _) = watch::channel(0);
        Ok(Self {
            shared: Arc::new(Shared {
                client,
                permits: Semaphore::new(config.max_inflight_outbound_batches),
                config,
                batches: Mutex::new(HashMap::new()),
                next_batch_id: AtomicU64::new(0),
                outstanding,
                queue_urls: RwLock::new(HashMap::new()),
                closed: AtomicBool::new(false),
                shutdown: OnceCell::new(),
            }),
        })
    }

    pub fn config(&self) -> &QueueBufferConfig {
        &self.shared.config
    }

    /// The wrapped client
    pub fn inner(&self) -> &Arc<dyn QueueServiceClient> {
        &self.shared.client
    }

    /// Entries waiting in open batches
    pub fn open_entries(&self) -> usize {
        self.shared
            .lock_batches()
            .values()
            .map(|batch| batch.entries.len())
            .sum()
    }

    /// Dispatch all open batches and wait for every in-flight batch.
    pub async fn flush(&self) {
        self.shared.dispatch_all();
        self.shared.wait_idle().await;
    }

    async fn submit<T>(
        &self,
        queue_url: &str,
        entry: impl FnOnce(Reply<T>) -> Entry,
    ) -> Result<T, QueueError> {
        let (sender, receiver) = oneshot::channel();
        self.shared.enqueue(queue_url, entry(sender))?;
        receiver.await.unwrap_or_else(|_| Err(abandoned()))
    }
}

#[async_trait]
impl QueueServiceClient for BufferedQueueClient {
    async fn get_queue_url(&self, queue_name: &str) -> Result<String, QueueError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(QueueError::ClientShutdown);
        }

        let cached = self
            .shared
            .queue_urls
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(queue_name)
            .cloned();
        if let Some(url) = cached {
            return Ok(url);
        }

        let url = self.shared.client.get_queue_url(queue_name).await?;
        self.shared
            .queue_urls
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(queue_name.to_string(), url.clone());
        Ok(url)
    }

    async fn send_message(
        &self,
        queue_url: &str,
        message: OutboundMessage,
    ) -> Result<SendReceipt, QueueError> {
        message.validate()?;
        self.submit(queue_url, |reply| Entry::Send(message, reply))
            .await
    }

    async fn send_message_batch(
        &self,
        queue_url: &str,
        messages: Vec<OutboundMessage>,
    ) -> Result<Vec<Result<SendReceipt, QueueError>>, QueueError> {
        self.shared.client.send_message_batch(queue_url, messages).await
    }

    async fn receive_messages(
        &self,
        queue_url: &str,
        options: ReceiveOptions,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        self.shared.client.receive_messages(queue_url, options).await
    }

    async fn delete_message(&self, queue_url: &str, receipt_handle: &str) -> Result<(), QueueError> {
        let handle = receipt_handle.to_string();
        self.submit(queue_url, |reply| Entry::Delete(handle, reply))
            .await
    }

    async fn delete_message_batch(
        &self,
        queue_url: &str,
        receipt_handles: Vec<String>,
    ) -> Result<Vec<Result<(), QueueError>>, QueueError> {
        self.shared
            .client
            .delete_message_batch(queue_url, receipt_handles)
            .await
    }

    async fn change_message_visibility(
        &self,
        queue_url: &str,
        receipt_handle: &str,
        timeout: Duration,
    ) -> Result<(), QueueError> {
        let change = VisibilityChange::new(receipt_handle, timeout);
        self.submit(queue_url, |reply| Entry::ChangeVisibility(change, reply))
            .await
    }

    async fn change_message_visibility_batch(
        &self,
        queue_url: &str,
        changes: Vec<VisibilityChange>,
    ) -> Result<Vec<Result<(), QueueError>>, QueueError> {
        self.shared
            .client
            .change_message_visibility_batch(queue_url, changes)
            .await
    }

    async fn shutdown(&self) {
        let shared = &self.shared;
        shared
            .shutdown
            .get_or_init(|| async {
                {
                    let _batches = shared.lock_batches();
                    shared.closed.store(true, Ordering::SeqCst);
                }
                shared.dispatch_all();
                shared.wait_idle().await;
                shared.client.shutdown().await;
                info!(backend = shared.client.backend(), "Buffered client shut down");
            })
            .await;
    }

    fn backend(&self) -> &'static str {
        self.shared.client.backend()
    }

    fn region(&self) -> Option<String> {
        self.shared.client.region()
    }
}
