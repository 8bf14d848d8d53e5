//! AWS SQS client built on the official SDK.
//!
//! [`AwsSqsClientFactory`] turns optional [`ClientSettings`] into a
//! configured SDK client:
//!
//! - **Region**: the region source if it names one, otherwise
//!   `AWS_REGION`/`AWS_DEFAULT_REGION`, then the shared profile, then
//!   [`DEFAULT_REGION`]. Instance metadata is never consulted.
//! - **Credentials**: the credentials source if present, otherwise the SDK's
//!   default provider chain (resolved lazily on first request).
//! - **Network**: timeouts, retries, endpoint override and app name when a
//!   [`NetworkConfig`](crate::settings::NetworkConfig) is present, otherwise
//!   the SDK defaults.
//!
//! Service error codes are mapped onto [`QueueError`] variants by
//! [`classify_error_code`].
//!
//! ## Example
//!
//! ```no_run
//! use queue_provisioner::client::QueueClientFactory;
//! use queue_provisioner::providers::AwsSqsClientFactory;
//! use queue_provisioner::settings::{ClientSettings, StaticRegion};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = ClientSettings::new().with_region(Arc::new(StaticRegion::new("eu-west-1")?));
//! let client = AwsSqsClientFactory::new().build(&settings).await?;
//! let url = client.get_queue_url("orders").await?;
//! # Ok(())
//! # }
//! ```

use crate::client::{check_batch_size, QueueClientFactory, QueueServiceClient};
use crate::error::{ProvisioningError, QueueError, ValidationError};
use crate::message::{
    MessageId, OutboundMessage, ReceiveOptions, ReceivedMessage, SendReceipt, VisibilityChange,
};
use crate::settings::{ClientSettings, DEFAULT_REGION};
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::{AppName, BehaviorVersion, Region};
use aws_sdk_sqs::error::{BuildError, DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_sqs::types::{
    BatchResultErrorEntry, ChangeMessageVisibilityBatchRequestEntry,
    DeleteMessageBatchRequestEntry, MessageAttributeValue, MessageSystemAttributeName,
    SendMessageBatchRequestEntry,
};
use chrono::DateTime;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

#[cfg(test)]
#[path = "aws_tests.rs"]
mod tests;

const BACKEND: &str = "aws-sqs";

// ============================================================================
// Error Mapping
// ============================================================================

/// Map a service error code onto a [`QueueError`]
pub fn classify_error_code(code: &str, message: impl Into<String>) -> QueueError {
    let message = message.into();
    match code {
        "AWS.SimpleQueueService.NonExistentQueue" | "QueueDoesNotExist" => {
            QueueError::QueueNotFound { queue: message }
        }
        "ReceiptHandleIsInvalid" | "InvalidReceiptHandle" => {
            QueueError::InvalidReceipt { receipt: message }
        }
        "InvalidClientTokenId"
        | "UnrecognizedClientException"
        | "SignatureDoesNotMatch"
        | "AccessDenied"
        | "AccessDeniedException" => QueueError::AuthenticationFailed {
            message: format!("{}: {}", code, message),
        },
        "RequestThrottled" | "ThrottlingException" | "OverLimit" => {
            QueueError::Throttled { message }
        }
        _ => QueueError::provider(BACKEND, code, message),
    }
}

fn map_sdk_error<E, R>(error: SdkError<E, R>) -> QueueError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match &error {
        SdkError::TimeoutError(_) => QueueError::Timeout {
            message: DisplayErrorContext(&error).to_string(),
        },
        SdkError::DispatchFailure(failure) if failure.is_timeout() => QueueError::Timeout {
            message: DisplayErrorContext(&error).to_string(),
        },
        SdkError::DispatchFailure(_) => QueueError::ConnectionFailed {
            message: DisplayErrorContext(&error).to_string(),
        },
        _ => match error.code() {
            Some(code) => classify_error_code(code, error.message().unwrap_or_default()),
            None => QueueError::provider(BACKEND, "Unknown", DisplayErrorContext(&error).to_string()),
        },
    }
}

fn map_build_error(error: BuildError) -> QueueError {
    QueueError::ValidationError(ValidationError::InvalidFormat {
        field: "entry".to_string(),
        message: error.to_string(),
    })
}

fn map_entry_error(entry: &BatchResultErrorEntry) -> QueueError {
    classify_error_code(entry.code(), entry.message().unwrap_or_default())
}

fn seconds(duration: Duration) -> i32 {
    i32::try_from(duration.as_secs()).unwrap_or(i32::MAX)
}

/// Place batch results by entry id, which is the entry's index.
fn collect_batch_results<T>(
    size: usize,
    successful: impl IntoIterator<Item = (String, T)>,
    failed: &[BatchResultErrorEntry],
) -> Vec<Result<T, QueueError>> {
    let mut results: Vec<Option<Result<T, QueueError>>> = (0..size).map(|_| None).collect();

    for (id, value) in successful {
        if let Some(slot) = id.parse::<usize>().ok().and_then(|i| results.get_mut(i)) {
            *slot = Some(Ok(value));
        }
    }
    for entry in failed {
        if let Some(slot) = entry.id().parse::<usize>().ok().and_then(|i| results.get_mut(i)) {
            *slot = Some(Err(map_entry_error(entry)));
        }
    }

    results
        .into_iter()
        .map(|result| {
            result.unwrap_or_else(|| {
                Err(QueueError::provider(
                    BACKEND,
                    "MissingBatchResult",
                    "service returned no result for entry",
                ))
            })
        })
        .collect()
}

// ============================================================================
// AwsSqsClient
// ============================================================================

/// [`QueueServiceClient`] backed by the AWS SDK
pub struct AwsSqsClient {
    client: aws_sdk_sqs::Client,
    shut_down: AtomicBool,
}

impl AwsSqsClient {
    pub fn new(client: aws_sdk_sqs::Client) -> Self {
        Self {
            client,
            shut_down: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), QueueError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(QueueError::ClientShutdown);
        }
        Ok(())
    }

    fn message_attributes(
        message: &OutboundMessage,
    ) -> Result<Option<HashMap<String, MessageAttributeValue>>, QueueError> {
        if message.attributes.is_empty() {
            return Ok(None);
        }

        let mut attributes = HashMap::with_capacity(message.attributes.len());
        for (key, value) in &message.attributes {
            let attribute = MessageAttributeValue::builder()
                .data_type("String")
                .string_value(value)
                .build()
                .map_err(map_build_error)?;
            attributes.insert(key.clone(), attribute);
        }
        Ok(Some(attributes))
    }

    fn batch_entry(
        index: usize,
        message: OutboundMessage,
    ) -> Result<SendMessageBatchRequestEntry, QueueError> {
        message.validate()?;
        let attributes = Self::message_attributes(&message)?;
        SendMessageBatchRequestEntry::builder()
            .id(index.to_string())
            .message_body(message.body)
            .set_delay_seconds(message.delay.map(seconds))
            .set_message_attributes(attributes)
            .set_message_group_id(message.group_id)
            .set_message_deduplication_id(message.deduplication_id)
            .build()
            .map_err(map_build_error)
    }

    fn convert_received(message: &aws_sdk_sqs::types::Message) -> Option<ReceivedMessage> {
        let receipt_handle = message.receipt_handle()?.to_string();
        let message_id = message
            .message_id()
            .and_then(|id| id.parse::<MessageId>().ok())
            .unwrap_or_default();

        let system = message.attributes();
        let receive_count = system
            .and_then(|a| a.get(&MessageSystemAttributeName::ApproximateReceiveCount))
            .and_then(|v| v.parse().ok())
            .unwrap_or(1);
        let sent_at = system
            .and_then(|a| a.get(&MessageSystemAttributeName::SentTimestamp))
            .and_then(|v| v.parse::<i64>().ok())
            .and_then(DateTime::from_timestamp_millis);

        let attributes = message
            .message_attributes()
            .map(|attrs| {
                attrs
                    .iter()
                    .filter_map(|(k, v)| v.string_value().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        Some(ReceivedMessage {
            message_id,
            receipt_handle,
            body: message.body().unwrap_or_default().to_string(),
            attributes,
            receive_count,
            sent_at,
        })
    }
}

#[async_trait]
impl QueueServiceClient for AwsSqsClient {
    #[instrument(skip(self))]
    async fn get_queue_url(&self, queue_name: &str) -> Result<String, QueueError> {
        self.ensure_open()?;
        let output = self
            .client
            .get_queue_url()
            .queue_name(queue_name)
            .send()
            .await
            .map_err(map_sdk_error)?;

        output
            .queue_url()
            .map(str::to_string)
            .ok_or_else(|| QueueError::QueueNotFound {
                queue: queue_name.to_string(),
            })
    }

    #[instrument(skip(self, message), fields(size = message.encoded_size()))]
    async fn send_message(
        &self,
        queue_url: &str,
        message: OutboundMessage,
    ) -> Result<SendReceipt, QueueError> {
        self.ensure_open()?;
        message.validate()?;
        let attributes = Self::message_attributes(&message)?;

        let output = self
            .client
            .send_message()
            .queue_url(queue_url)
            .message_body(message.body)
            .set_delay_seconds(message.delay.map(seconds))
            .set_message_attributes(attributes)
            .set_message_group_id(message.group_id)
            .set_message_deduplication_id(message.deduplication_id)
            .send()
            .await
            .map_err(map_sdk_error)?;

        let message_id = output
            .message_id()
            .and_then(|id| id.parse().ok())
            .unwrap_or_default();
        debug!(%message_id, "Sent message");
        Ok(SendReceipt { message_id })
    }

    #[instrument(skip(self, messages), fields(count = messages.len()))]
    async fn send_message_batch(
        &self,
        queue_url: &str,
        messages: Vec<OutboundMessage>,
    ) -> Result<Vec<Result<SendReceipt, QueueError>>, QueueError> {
        self.ensure_open()?;
        check_batch_size(messages.len())?;
        let size = messages.len();

        // Entries that fail local validation keep their slot and skip the request
        let mut rejected: Vec<(usize, QueueError)> = Vec::new();
        let mut entries = Vec::with_capacity(size);
        for (index, message) in messages.into_iter().enumerate() {
            match Self::batch_entry(index, message) {
                Ok(entry) => entries.push(entry),
                Err(error) => rejected.push((index, error)),
            }
        }

        if entries.is_empty() {
            return Ok(rejected.into_iter().map(|(_, error)| Err(error)).collect());
        }

        let output = self
            .client
            .send_message_batch()
            .queue_url(queue_url)
            .set_entries(Some(entries))
            .send()
            .await
            .map_err(map_sdk_error)?;

        let successful = output.successful().iter().map(|entry| {
            let message_id = entry.message_id().parse().unwrap_or_default();
            (entry.id().to_string(), SendReceipt { message_id })
        });
        let mut results = collect_batch_results(size, successful, output.failed());

        for (index, error) in rejected {
            results[index] = Err(error);
        }
        Ok(results)
    }

    #[instrument(skip(self))]
    async fn receive_messages(
        &self,
        queue_url: &str,
        options: ReceiveOptions,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        self.ensure_open()?;
        options.validate()?;

        let output = self
            .client
            .receive_message()
            .queue_url(queue_url)
            .max_number_of_messages(options.max_messages as i32)
            .set_wait_time_seconds(options.wait_time.map(seconds))
            .set_visibility_timeout(options.visibility_timeout.map(seconds))
            .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount)
            .message_system_attribute_names(MessageSystemAttributeName::SentTimestamp)
            .message_attribute_names("All")
            .send()
            .await
            .map_err(map_sdk_error)?;

        let messages: Vec<ReceivedMessage> = output
            .messages()
            .iter()
            .filter_map(|message| {
                let converted = Self::convert_received(message);
                if converted.is_none() {
                    warn!("Dropping received message without receipt handle");
                }
                converted
            })
            .collect();

        debug!(count = messages.len(), "Received messages");
        Ok(messages)
    }

    #[instrument(skip(self, receipt_handle))]
    async fn delete_message(&self, queue_url: &str, receipt_handle: &str) -> Result<(), QueueError> {
        self.ensure_open()?;
        self.client
            .delete_message()
            .queue_url(queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(())
    }

    #[instrument(skip(self, receipt_handles), fields(count = receipt_handles.len()))]
    async fn delete_message_batch(
        &self,
        queue_url: &str,
        receipt_handles: Vec<String>,
    ) -> Result<Vec<Result<(), QueueError>>, QueueError> {
        self.ensure_open()?;
        check_batch_size(receipt_handles.len())?;
        let size = receipt_handles.len();

        let entries = receipt_handles
            .into_iter()
            .enumerate()
            .map(|(index, handle)| {
                DeleteMessageBatchRequestEntry::builder()
                    .id(index.to_string())
                    .receipt_handle(handle)
                    .build()
                    .map_err(map_build_error)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let output = self
            .client
            .delete_message_batch()
            .queue_url(queue_url)
            .set_entries(Some(entries))
            .send()
            .await
            .map_err(map_sdk_error)?;

        let successful = output
            .successful()
            .iter()
            .map(|entry| (entry.id().to_string(), ()));
        Ok(collect_batch_results(size, successful, output.failed()))
    }

    #[instrument(skip(self, receipt_handle))]
    async fn change_message_visibility(
        &self,
        queue_url: &str,
        receipt_handle: &str,
        timeout: Duration,
    ) -> Result<(), QueueError> {
        self.ensure_open()?;
        self.client
            .change_message_visibility()
            .queue_url(queue_url)
            .receipt_handle(receipt_handle)
            .visibility_timeout(seconds(timeout))
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(())
    }

    #[instrument(skip(self, changes), fields(count = changes.len()))]
    async fn change_message_visibility_batch(
        &self,
        queue_url: &str,
        changes: Vec<VisibilityChange>,
    ) -> Result<Vec<Result<(), QueueError>>, QueueError> {
        self.ensure_open()?;
        check_batch_size(changes.len())?;
        let size = changes.len();

        let entries = changes
            .into_iter()
            .enumerate()
            .map(|(index, change)| {
                ChangeMessageVisibilityBatchRequestEntry::builder()
                    .id(index.to_string())
                    .receipt_handle(change.receipt_handle)
                    .visibility_timeout(seconds(change.timeout))
                    .build()
                    .map_err(map_build_error)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let output = self
            .client
            .change_message_visibility_batch()
            .queue_url(queue_url)
            .set_entries(Some(entries))
            .send()
            .await
            .map_err(map_sdk_error)?;

        let successful = output
            .successful()
            .iter()
            .map(|entry| (entry.id().to_string(), ()));
        Ok(collect_batch_results(size, successful, output.failed()))
    }

    async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(region = ?self.region(), "AWS SQS client shut down");
    }

    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn region(&self) -> Option<String> {
        self.client.config().region().map(|r| r.to_string())
    }
}

// ============================================================================
// AwsSqsClientFactory
// ============================================================================

/// Builds [`AwsSqsClient`]s from optional settings
#[derive(Debug, Clone, Copy, Default)]
pub struct AwsSqsClientFactory;

impl AwsSqsClientFactory {
    pub fn new() -> Self {
        Self
    }

    /// Region to use when the settings do not name one
    async fn default_region() -> Region {
        RegionProviderChain::first_try(
            aws_config::environment::EnvironmentVariableRegionProvider::new(),
        )
        .or_else(aws_config::profile::ProfileFileRegionProvider::new())
        .or_else(Region::from_static(DEFAULT_REGION))
        .region()
        .await
        .unwrap_or_else(|| Region::from_static(DEFAULT_REGION))
    }
}

#[async_trait]
impl QueueClientFactory for AwsSqsClientFactory {
    async fn build(
        &self,
        settings: &ClientSettings,
    ) -> Result<Arc<dyn QueueServiceClient>, ProvisioningError> {
        if let Some(network) = &settings.network {
            network.validate()?;
        }

        let region = match settings.explicit_region()? {
            Some(region) => Region::new(region),
            None => Self::default_region().await,
        };

        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region.clone());

        if let Some(credentials) = &settings.credentials {
            debug!(source = credentials.name(), "Using supplied credentials source");
            loader = loader.credentials_provider(credentials.credentials_provider()?);
        }

        if let Some(network) = &settings.network {
            loader = loader
                .retry_config(network.retry_config())
                .timeout_config(network.timeout_config());
            if let Some(endpoint) = &network.endpoint_url {
                loader = loader.endpoint_url(endpoint.clone());
            }
            if let Some(app_name) = &network.app_name {
                let app_name = AppName::new(app_name.clone()).map_err(|e| {
                    ProvisioningError::invalid("network.app_name", e.to_string())
                })?;
                loader = loader.app_name(app_name);
            }
        }

        let sdk_config = loader.load().await;
        let client = aws_sdk_sqs::Client::new(&sdk_config);

        info!(
            region = %region,
            credentials = settings.credentials.is_some(),
            network = settings.network.is_some(),
            "Built AWS SQS client"
        );

        Ok(Arc::new(AwsSqsClient::new(client)))
    }
}
