//! Message types for queue-service client operations.

use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;

/// Maximum number of entries in a single batch request
pub const MAX_BATCH_ENTRIES: usize = 10;

/// Maximum message payload size, body plus attributes
pub const MAX_MESSAGE_SIZE: usize = 256 * 1024;

/// Maximum long-poll wait for a receive call
pub const MAX_WAIT_TIME: Duration = Duration::from_secs(20);

/// Maximum delivery delay for a message
pub const MAX_DELAY: Duration = Duration::from_secs(15 * 60);

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Validated queue name with length and character restrictions
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueName(String);

impl QueueName {
    /// Create new queue name with validation
    ///
    /// Names are 1-80 characters of ASCII alphanumerics, hyphens and
    /// underscores. FIFO queues carry a `.fifo` suffix which counts towards
    /// the limit.
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        if name.is_empty() || name.len() > 80 {
            return Err(ValidationError::OutOfRange {
                field: "queue_name".to_string(),
                message: "must be 1-80 characters".to_string(),
            });
        }

        let base = name.strip_suffix(".fifo").unwrap_or(&name);
        if base.is_empty()
            || !base
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "only ASCII alphanumeric, hyphens, and underscores allowed".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Whether this names a FIFO queue
    pub fn is_fifo(&self) -> bool {
        self.0.ends_with(".fifo")
    }

    /// Get queue name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Service-assigned identifier of a sent message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

// ============================================================================
// Outbound Messages
// ============================================================================

/// A message to be sent to a queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub body: String,
    pub delay: Option<Duration>,
    pub attributes: HashMap<String, String>,
    /// Message group for FIFO queues
    pub group_id: Option<String>,
    /// Deduplication token for FIFO queues
    pub deduplication_id: Option<String>,
}

impl OutboundMessage {
    /// Create a message with the given body
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            delay: None,
            attributes: HashMap::new(),
            group_id: None,
            deduplication_id: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_deduplication_id(mut self, deduplication_id: impl Into<String>) -> Self {
        self.deduplication_id = Some(deduplication_id.into());
        self
    }

    /// Payload size as counted against the message size limit
    pub fn encoded_size(&self) -> usize {
        self.body.len()
            + self
                .attributes
                .iter()
                .map(|(k, v)| k.len() + v.len() + "String".len())
                .sum::<usize>()
    }

    /// Check size and delay limits
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.body.is_empty() {
            return Err(ValidationError::Required {
                field: "body".to_string(),
            });
        }

        let size = self.encoded_size();
        if size > MAX_MESSAGE_SIZE {
            return Err(ValidationError::OutOfRange {
                field: "body".to_string(),
                message: format!("{} bytes exceeds {} bytes", size, MAX_MESSAGE_SIZE),
            });
        }

        if let Some(delay) = self.delay {
            if delay > MAX_DELAY {
                return Err(ValidationError::OutOfRange {
                    field: "delay".to_string(),
                    message: "maximum 900 seconds".to_string(),
                });
            }
        }

        Ok(())
    }
}

/// Acknowledgement of a sent message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    pub message_id: MessageId,
}

// ============================================================================
// Receiving
// ============================================================================

/// Parameters for a receive call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveOptions {
    /// Number of messages to request, 1-10
    pub max_messages: u32,
    /// Long-poll wait; `None` uses the queue default
    pub wait_time: Option<Duration>,
    /// Visibility timeout for received messages; `None` uses the queue default
    pub visibility_timeout: Option<Duration>,
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        Self {
            max_messages: 1,
            wait_time: None,
            visibility_timeout: None,
        }
    }
}

impl ReceiveOptions {
    pub fn with_max_messages(mut self, max_messages: u32) -> Self {
        self.max_messages = max_messages;
        self
    }

    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = Some(wait_time);
        self
    }

    pub fn with_visibility_timeout(mut self, visibility_timeout: Duration) -> Self {
        self.visibility_timeout = Some(visibility_timeout);
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_messages == 0 || self.max_messages as usize > MAX_BATCH_ENTRIES {
            return Err(ValidationError::OutOfRange {
                field: "max_messages".to_string(),
                message: format!("must be 1-{}", MAX_BATCH_ENTRIES),
            });
        }

        if let Some(wait) = self.wait_time {
            if wait > MAX_WAIT_TIME {
                return Err(ValidationError::OutOfRange {
                    field: "wait_time".to_string(),
                    message: "maximum 20 seconds".to_string(),
                });
            }
        }

        Ok(())
    }
}

/// A message delivered by a receive call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedMessage {
    pub message_id: MessageId,
    /// Handle used to delete the message or change its visibility
    pub receipt_handle: String,
    pub body: String,
    pub attributes: HashMap<String, String>,
    /// Number of times the message has been received, including this one
    pub receive_count: u32,
    pub sent_at: Option<DateTime<Utc>>,
}

/// One entry of a visibility-timeout change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibilityChange {
    pub receipt_handle: String,
    pub timeout: Duration,
}

impl VisibilityChange {
    pub fn new(receipt_handle: impl Into<String>, timeout: Duration) -> Self {
        Self {
            receipt_handle: receipt_handle.into(),
            timeout,
        }
    }
}
