//! Tests for [`ComponentRegistry`].

use super::*;
use futures::FutureExt;
use std::sync::atomic::AtomicUsize;

// ============================================================================
// Test Helpers
// ============================================================================

trait Greeter: Send + Sync {
    fn greet(&self) -> String;
}

struct English;

impl Greeter for English {
    fn greet(&self) -> String {
        "hello".to_string()
    }
}

/// Factory that counts how often it runs and records teardown order.
struct CountingGreeterFactory {
    builds: Arc<AtomicUsize>,
    teardown_log: Arc<Mutex<Vec<&'static str>>>,
    fail: bool,
}

impl CountingGreeterFactory {
    fn new() -> Self {
        Self {
            builds: Arc::new(AtomicUsize::new(0)),
            teardown_log: Arc::new(Mutex::new(Vec::new())),
            fail: false,
        }
    }
}

#[async_trait]
impl ComponentFactory for CountingGreeterFactory {
    type Component = dyn Greeter;

    async fn create(
        &self,
        _registry: &ComponentRegistry,
    ) -> Result<Provisioned<dyn Greeter>, ProvisioningError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;

        if self.fail {
            return Err(ProvisioningError::ClientConstruction {
                message: "boom".to_string(),
            });
        }

        let log = Arc::clone(&self.teardown_log);
        Ok(Provisioned::new(Arc::new(English) as Arc<dyn Greeter>).with_teardown(Box::new(
            move || {
                async move {
                    log.lock().unwrap().push("greeter");
                }
                .boxed()
            },
        )))
    }
}

/// Factory that depends on an optional `String` collaborator.
struct PrefixFactory;

#[async_trait]
impl ComponentFactory for PrefixFactory {
    type Component = u64;

    async fn create(
        &self,
        registry: &ComponentRegistry,
    ) -> Result<Provisioned<u64>, ProvisioningError> {
        let prefix = registry
            .resolve::<String>()
            .await
            .map_err(|e| ProvisioningError::Dependency {
                component: "String",
                source: Box::new(e),
            })?;
        Ok(Provisioned::new(Arc::new(
            prefix.map(|p| p.len() as u64).unwrap_or(0),
        )))
    }
}

/// Factory that blocks until released, so shutdown can overlap initialization.
struct GatedFactory {
    started: Arc<tokio::sync::Notify>,
    release: Arc<tokio::sync::Notify>,
    teardowns: Arc<AtomicUsize>,
}

#[async_trait]
impl ComponentFactory for GatedFactory {
    type Component = u32;

    async fn create(
        &self,
        _registry: &ComponentRegistry,
    ) -> Result<Provisioned<u32>, ProvisioningError> {
        self.started.notify_one();
        self.release.notified().await;

        let teardowns = Arc::clone(&self.teardowns);
        Ok(Provisioned::new(Arc::new(5)).with_teardown(Box::new(move || {
            async move {
                teardowns.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        })))
    }
}

// ============================================================================
// Registration Tests
// ============================================================================

mod registration {
    use super::*;

    #[tokio::test]
    async fn test_eager_registration_resolves_same_instance() {
        let registry = ComponentRegistry::new();
        let value = Arc::new("shared".to_string());

        registry.register::<String>(Arc::clone(&value)).unwrap();

        let resolved = registry.require::<String>().await.unwrap();
        assert!(Arc::ptr_eq(&value, &resolved));
        assert!(registry.contains::<String>());
        assert!(registry.is_initialized::<String>());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let registry = ComponentRegistry::new();
        registry.register::<u32>(Arc::new(1)).unwrap();

        let result = registry.register::<u32>(Arc::new(2));

        assert!(matches!(
            result,
            Err(RegistryError::AlreadyRegistered { .. })
        ));
    }

    #[test]
    fn test_conditional_registration_skips_when_present() {
        let registry = ComponentRegistry::new();
        registry
            .register::<dyn Greeter>(Arc::new(English))
            .unwrap();

        let factory = CountingGreeterFactory::new();
        let builds = Arc::clone(&factory.builds);

        let outcome = registry.register_lazy_if_missing(factory).unwrap();

        assert_eq!(outcome, Registration::Skipped);
        assert_eq!(builds.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_conditional_registration_registers_when_missing() {
        let registry = ComponentRegistry::new();

        let outcome = registry
            .register_lazy_if_missing(CountingGreeterFactory::new())
            .unwrap();

        assert_eq!(outcome, Registration::Registered);
        assert!(registry.contains::<dyn Greeter>());
        assert!(!registry.is_initialized::<dyn Greeter>());
    }

    #[tokio::test]
    async fn test_missing_capability_resolves_to_none() {
        let registry = ComponentRegistry::new();

        assert!(registry.resolve::<dyn Greeter>().await.unwrap().is_none());
        assert!(matches!(
            registry.require::<dyn Greeter>().await,
            Err(RegistryError::NotRegistered { .. })
        ));
    }
}

// ============================================================================
// Lazy Initialization Tests
// ============================================================================

mod lazy_initialization {
    use super::*;

    #[tokio::test]
    async fn test_factory_not_run_before_first_request() {
        let registry = ComponentRegistry::new();
        let factory = CountingGreeterFactory::new();
        let builds = Arc::clone(&factory.builds);

        registry.register_lazy(factory).unwrap();

        assert_eq!(builds.load(Ordering::SeqCst), 0);

        let greeter = registry.require::<dyn Greeter>().await.unwrap();
        assert_eq!(greeter.greet(), "hello");
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_repeated_requests_share_one_instance() {
        let registry = ComponentRegistry::new();
        let factory = CountingGreeterFactory::new();
        let builds = Arc::clone(&factory.builds);
        registry.register_lazy(factory).unwrap();

        let first = registry.require::<dyn Greeter>().await.unwrap();
        let second = registry.require::<dyn Greeter>().await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_requests_build_once() {
        let registry = Arc::new(ComponentRegistry::new());
        let factory = CountingGreeterFactory::new();
        let builds = Arc::clone(&factory.builds);
        registry.register_lazy(factory).unwrap();

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.require::<dyn Greeter>().await.map(|_| ()) })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_initialization_leaves_slot_empty() {
        let registry = ComponentRegistry::new();
        let mut factory = CountingGreeterFactory::new();
        factory.fail = true;
        let builds = Arc::clone(&factory.builds);
        registry.register_lazy(factory).unwrap();

        let first = registry.require::<dyn Greeter>().await;
        match first {
            Err(RegistryError::Initialization { source, .. }) => {
                assert!(matches!(
                    source,
                    ProvisioningError::ClientConstruction { .. }
                ));
            }
            other => panic!("Expected initialization failure, got: {:?}", other.map(|_| ())),
        }
        assert!(!registry.is_initialized::<dyn Greeter>());

        // A later request tries again; the registry itself never retries.
        let _ = registry.require::<dyn Greeter>().await;
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_factory_sees_optional_collaborators() {
        let without = ComponentRegistry::new();
        without.register_lazy(PrefixFactory).unwrap();
        assert_eq!(*without.require::<u64>().await.unwrap(), 0);

        let with = ComponentRegistry::new();
        with.register::<String>(Arc::new("abcd".to_string())).unwrap();
        with.register_lazy(PrefixFactory).unwrap();
        assert_eq!(*with.require::<u64>().await.unwrap(), 4);
    }
}

// ============================================================================
// Shutdown Tests
// ============================================================================

mod shutdown {
    use super::*;

    #[tokio::test]
    async fn test_teardown_runs_once() {
        let registry = ComponentRegistry::new();
        let factory = CountingGreeterFactory::new();
        let log = Arc::clone(&factory.teardown_log);
        registry.register_lazy(factory).unwrap();
        registry.require::<dyn Greeter>().await.unwrap();

        registry.shutdown().await;
        registry.shutdown().await;

        assert_eq!(*log.lock().unwrap(), vec!["greeter"]);
        assert!(registry.is_shut_down());
    }

    #[tokio::test]
    async fn test_uninitialized_lazy_component_has_no_teardown() {
        let registry = ComponentRegistry::new();
        let factory = CountingGreeterFactory::new();
        let log = Arc::clone(&factory.teardown_log);
        let builds = Arc::clone(&factory.builds);
        registry.register_lazy(factory).unwrap();

        registry.shutdown().await;

        assert!(log.lock().unwrap().is_empty());
        assert_eq!(builds.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_teardown_runs_in_reverse_initialization_order() {
        let registry = ComponentRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            let hook: TeardownHook = Box::new(move || {
                async move {
                    order.lock().unwrap().push(name);
                }
                .boxed()
            });
            match name {
                "first" => registry.register_with_teardown::<u8>(Arc::new(1), hook),
                "second" => registry.register_with_teardown::<u16>(Arc::new(2), hook),
                _ => registry.register_with_teardown::<u32>(Arc::new(3), hook),
            }
            .unwrap();
        }

        registry.shutdown().await;

        assert_eq!(*order.lock().unwrap(), vec!["third", "second", "first"]);
    }

    #[tokio::test]
    async fn test_registry_rejects_use_after_shutdown() {
        let registry = ComponentRegistry::new();
        registry.register::<u32>(Arc::new(7)).unwrap();

        registry.shutdown().await;

        assert!(matches!(
            registry.resolve::<u32>().await,
            Err(RegistryError::ShutDown)
        ));
        assert!(matches!(
            registry.register::<u64>(Arc::new(1)),
            Err(RegistryError::ShutDown)
        ));
    }

    #[tokio::test]
    async fn test_initialization_finishing_after_shutdown_is_torn_down() {
        let registry = Arc::new(ComponentRegistry::new());
        let started = Arc::new(tokio::sync::Notify::new());
        let release = Arc::new(tokio::sync::Notify::new());
        let teardowns = Arc::new(AtomicUsize::new(0));
        registry
            .register_lazy(GatedFactory {
                started: Arc::clone(&started),
                release: Arc::clone(&release),
                teardowns: Arc::clone(&teardowns),
            })
            .unwrap();

        let pending = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.resolve::<u32>().await })
        };
        started.notified().await;

        registry.shutdown().await;
        assert_eq!(teardowns.load(Ordering::SeqCst), 0);
        release.notify_one();

        let result = pending.await.unwrap();

        assert!(matches!(result, Err(RegistryError::ShutDown)));
        assert_eq!(teardowns.load(Ordering::SeqCst), 1);
        registry.shutdown().await;
        assert_eq!(teardowns.load(Ordering::SeqCst), 1);
    }
}
