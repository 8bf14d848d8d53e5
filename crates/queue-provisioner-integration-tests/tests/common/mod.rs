//! Common test utilities for queue-provisioner integration tests
//!
//! This module provides:
//! - A client factory that fails a set number of times before succeeding
//! - A lazily built region collaborator
//! - Registry setup helpers

use async_trait::async_trait;
use queue_provisioner::providers::InMemoryClientFactory;
use queue_provisioner::{
    ClientSettings, ComponentFactory, ComponentRegistry, Provisioned, ProvisioningError,
    QueueClientFactory, QueueServiceClient, RegionSource, SqsClientProvisioner, StaticRegion,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// ============================================================================
// Flaky Client Factory
// ============================================================================

/// Fails the first `failures` builds, then delegates to an in-memory factory
#[derive(Clone)]
#[allow(dead_code)]
pub struct FlakyFactory {
    pub inner: InMemoryClientFactory,
    failures: usize,
    attempts: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl FlakyFactory {
    pub fn new(failures: usize) -> Self {
        Self {
            inner: InMemoryClientFactory::new(),
            failures,
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueueClientFactory for FlakyFactory {
    async fn build(
        &self,
        settings: &ClientSettings,
    ) -> Result<Arc<dyn QueueServiceClient>, ProvisioningError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            return Err(ProvisioningError::ClientConstruction {
                message: format!("attempt {} refused", attempt + 1),
            });
        }
        self.inner.build(settings).await
    }
}

// ============================================================================
// Lazy Region Collaborator
// ============================================================================

/// Builds a fixed region on first request and counts builds
#[allow(dead_code)]
pub struct LazyRegion {
    pub region: &'static str,
    pub builds: Arc<AtomicUsize>,
}

#[async_trait]
impl ComponentFactory for LazyRegion {
    type Component = dyn RegionSource;

    async fn create(
        &self,
        _registry: &ComponentRegistry,
    ) -> Result<Provisioned<dyn RegionSource>, ProvisioningError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(Provisioned::new(Arc::new(StaticRegion::new(self.region)?)))
    }
}

// ============================================================================
// Registry Helpers
// ============================================================================

/// Registry with an in-memory provisioner registered
#[allow(dead_code)]
pub fn in_memory_registry() -> (Arc<ComponentRegistry>, InMemoryClientFactory) {
    let registry = Arc::new(ComponentRegistry::new());
    let factory = InMemoryClientFactory::new();
    SqsClientProvisioner::new()
        .with_factory(factory.clone())
        .register(&registry)
        .unwrap();
    (registry, factory)
}
