//! Tests for message types.

use super::*;

#[test]
fn test_queue_name_validation() {
    // Valid names
    assert!(QueueName::new("orders").is_ok());
    assert!(QueueName::new("queue_123-dlq").is_ok());
    assert!(QueueName::new("events.fifo").is_ok());
    assert!(QueueName::new("a".repeat(80)).is_ok());

    // Invalid names
    assert!(QueueName::new("").is_err());
    assert!(QueueName::new(".fifo").is_err());
    assert!(QueueName::new("a".repeat(81)).is_err());
    assert!(QueueName::new("special@chars").is_err());
    assert!(QueueName::new("dotted.name").is_err());
}

#[test]
fn test_queue_name_fifo_detection() {
    assert!(QueueName::new("events.fifo").unwrap().is_fifo());
    assert!(!QueueName::new("events").unwrap().is_fifo());
}

#[test]
fn test_message_id_parsing() {
    assert!("".parse::<MessageId>().is_err());
    assert_eq!(
        "4ff5c1a2".parse::<MessageId>().unwrap().as_str(),
        "4ff5c1a2"
    );
    assert_ne!(MessageId::new(), MessageId::new());
}

#[test]
fn test_outbound_message_builder() {
    let message = OutboundMessage::new("payload")
        .with_attribute("kind", "order")
        .with_group_id("customer-1")
        .with_deduplication_id("order-17")
        .with_delay(Duration::from_secs(5));

    assert_eq!(message.body, "payload");
    assert_eq!(message.attributes.get("kind"), Some(&"order".to_string()));
    assert_eq!(message.group_id.as_deref(), Some("customer-1"));
    assert_eq!(message.deduplication_id.as_deref(), Some("order-17"));
    assert_eq!(message.delay, Some(Duration::from_secs(5)));
    assert!(message.validate().is_ok());
}

#[test]
fn test_encoded_size_counts_attributes() {
    let plain = OutboundMessage::new("12345");
    let with_attribute = OutboundMessage::new("12345").with_attribute("ab", "cd");

    assert_eq!(plain.encoded_size(), 5);
    assert_eq!(with_attribute.encoded_size(), 5 + 2 + 2 + "String".len());
}

#[test]
fn test_outbound_message_limits() {
    assert!(OutboundMessage::new("").validate().is_err());
    assert!(OutboundMessage::new("x".repeat(MAX_MESSAGE_SIZE + 1))
        .validate()
        .is_err());
    assert!(OutboundMessage::new("late")
        .with_delay(Duration::from_secs(901))
        .validate()
        .is_err());
}

#[test]
fn test_receive_options_validation() {
    assert!(ReceiveOptions::default().validate().is_ok());
    assert!(ReceiveOptions::default()
        .with_max_messages(10)
        .with_wait_time(Duration::from_secs(20))
        .validate()
        .is_ok());

    assert!(ReceiveOptions::default()
        .with_max_messages(0)
        .validate()
        .is_err());
    assert!(ReceiveOptions::default()
        .with_max_messages(11)
        .validate()
        .is_err());
    assert!(ReceiveOptions::default()
        .with_wait_time(Duration::from_secs(21))
        .validate()
        .is_err());
}
