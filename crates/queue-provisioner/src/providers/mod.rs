//! Queue-service backends.
//!
//! This module contains the concrete implementations of
//! [`QueueServiceClient`](crate::client::QueueServiceClient) and
//! [`QueueClientFactory`](crate::client::QueueClientFactory).

pub mod aws;
pub mod memory;

pub use aws::{AwsSqsClient, AwsSqsClientFactory};
pub use memory::{InMemoryClientFactory, InMemoryQueueClient, SettingsSummary};
