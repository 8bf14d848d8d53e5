//! Tests for the crate-level wiring.

use super::*;
use crate::providers::InMemoryClientFactory;
use std::sync::Arc;

#[tokio::test]
async fn test_config_to_client_wiring() {
    // Arrange
    let registry = ComponentRegistry::new();
    let config = ProvisionerConfig {
        region: Some("eu-central-1".to_string()),
        credentials: Some(CredentialsConfig::Profile {
            profile_name: "deploy".to_string(),
        }),
        buffer: QueueBufferConfig {
            max_batch_open_ms: 20,
            ..Default::default()
        },
        ..Default::default()
    };
    let factory = InMemoryClientFactory::new();

    // Act
    config.register_collaborators(&registry).unwrap();
    SqsClientProvisioner::from_config(&config)
        .with_factory(factory.clone())
        .register(&registry)
        .unwrap();
    let client = registry.require::<dyn QueueServiceClient>().await.unwrap();

    // Assert
    assert_eq!(client.region().as_deref(), Some("eu-central-1"));
    let summary = factory.last_settings().unwrap();
    assert_eq!(summary.credentials.as_deref(), Some("profile"));
    assert_eq!(summary.network, None);

    registry.shutdown().await;
    assert_eq!(factory.clients()[0].shutdown_count(), 1);
}

#[tokio::test]
async fn test_preregistered_client_wins_over_configuration() {
    let registry = ComponentRegistry::new();
    let existing: ManagedClient = Arc::new(providers::InMemoryQueueClient::new());
    registry
        .register::<dyn QueueServiceClient>(existing.clone())
        .unwrap();

    let client = provision_client(&registry).await.unwrap();

    assert!(Arc::ptr_eq(&client, &existing));
}

#[test]
fn test_error_conversions_at_crate_root() {
    let validation = ValidationError::Required {
        field: "body".to_string(),
    };
    let queue_error: QueueError = validation.into();
    assert!(!queue_error.is_transient());

    let provisioning = ProvisioningError::ClientConstruction {
        message: "boom".to_string(),
    };
    let config_error: ConfigurationError = provisioning.into();
    assert!(config_error.to_string().contains("boom"));
}
