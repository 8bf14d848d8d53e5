//! Component registry for singleton components and their teardown hooks.
//!
//! [`ComponentRegistry`] maps a *capability* (any `'static` type, usually a
//! trait object such as `dyn QueueServiceClient`) to at most one shared
//! instance. Instances are either registered eagerly or produced on first
//! request by a [`ComponentFactory`]. Teardown hooks are collected as
//! components come to life and run in reverse order by
//! [`ComponentRegistry::shutdown`].
//!
//! # Examples
//!
//! ```rust
//! use queue_provisioner::registry::ComponentRegistry;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let registry = ComponentRegistry::new();
//! registry.register::<String>(Arc::new("eu-west-1".to_string())).unwrap();
//!
//! let value = registry.require::<String>().await.unwrap();
//! assert_eq!(value.as_str(), "eu-west-1");
//! assert!(registry.resolve::<u32>().await.unwrap().is_none());
//! # });
//! ```
//!
//! A factory must not resolve its own capability; the first request would
//! wait on itself forever.

use crate::error::{ProvisioningError, RegistryError};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;

/// Release callback invoked once when the registry shuts down.
pub type TeardownHook = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// A freshly constructed component together with its release callback.
pub struct Provisioned<T: ?Sized> {
    pub component: Arc<T>,
    pub teardown: Option<TeardownHook>,
}

impl<T: ?Sized> Provisioned<T> {
    /// Wrap a component that needs no teardown.
    pub fn new(component: Arc<T>) -> Self {
        Self {
            component,
            teardown: None,
        }
    }

    /// Attach a teardown hook.
    pub fn with_teardown(mut self, teardown: TeardownHook) -> Self {
        self.teardown = Some(teardown);
        self
    }
}

/// Deferred constructor for a registry component.
///
/// The factory receives the registry so that it can look up optional
/// collaborators at construction time.
#[async_trait]
pub trait ComponentFactory: Send + Sync + 'static {
    /// Capability the produced component is registered under
    type Component: ?Sized + Send + Sync + 'static;

    /// Build the component
    async fn create(
        &self,
        registry: &ComponentRegistry,
    ) -> Result<Provisioned<Self::Component>, ProvisioningError>;
}

/// Outcome of a conditional registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Registered,
    /// The capability was already present; nothing was registered.
    Skipped,
}

type ErasedComponent = Box<dyn Any + Send + Sync>;

#[async_trait]
trait ErasedFactory: Send + Sync {
    async fn create_erased(
        &self,
        registry: &ComponentRegistry,
    ) -> Result<(ErasedComponent, Option<TeardownHook>), ProvisioningError>;
}

#[async_trait]
impl<F: ComponentFactory> ErasedFactory for F {
    async fn create_erased(
        &self,
        registry: &ComponentRegistry,
    ) -> Result<(ErasedComponent, Option<TeardownHook>), ProvisioningError> {
        let Provisioned {
            component,
            teardown,
        } = self.create(registry).await?;
        Ok((Box::new(component) as ErasedComponent, teardown))
    }
}

/// One capability entry. The cell holds an `Arc<T>` boxed as `Any`.
struct Slot {
    name: &'static str,
    cell: OnceCell<ErasedComponent>,
    factory: Option<Box<dyn ErasedFactory>>,
}

/// Process-wide container of singleton components.
///
/// ## Thread Safety
///
/// The registry is `Send + Sync` and is normally shared behind an `Arc`.
/// Concurrent first requests for a lazy component run its factory once;
/// the other callers wait for that result.
pub struct ComponentRegistry {
    slots: RwLock<HashMap<TypeId, Arc<Slot>>>,
    teardown: Mutex<Vec<(&'static str, TeardownHook)>>,
    shut_down: AtomicBool,
}

impl ComponentRegistry {
    /// Create a new, empty registry.
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            teardown: Mutex::new(Vec::new()),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Register a ready-made instance under capability `T`.
    pub fn register<T>(&self, component: Arc<T>) -> Result<(), RegistryError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.insert_slot::<T>(Slot {
            name: std::any::type_name::<T>(),
            cell: OnceCell::new_with(Some(Box::new(component) as ErasedComponent)),
            factory: None,
        })
    }

    /// Register a ready-made instance along with its release callback.
    pub fn register_with_teardown<T>(
        &self,
        component: Arc<T>,
        teardown: TeardownHook,
    ) -> Result<(), RegistryError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.register(component)?;
        match self.push_teardown(std::any::type_name::<T>(), teardown) {
            None => Ok(()),
            Some(_) => Err(RegistryError::ShutDown),
        }
    }

    /// Register a factory that builds the component on first request.
    pub fn register_lazy<F>(&self, factory: F) -> Result<(), RegistryError>
    where
        F: ComponentFactory,
    {
        self.insert_slot::<F::Component>(Slot {
            name: std::any::type_name::<F::Component>(),
            cell: OnceCell::new(),
            factory: Some(Box::new(factory)),
        })
    }

    /// Register a factory only if nothing provides its capability yet.
    pub fn register_lazy_if_missing<F>(&self, factory: F) -> Result<Registration, RegistryError>
    where
        F: ComponentFactory,
    {
        match self.register_lazy(factory) {
            Ok(()) => Ok(Registration::Registered),
            Err(RegistryError::AlreadyRegistered { component }) => {
                debug!(component, "Capability already provided, skipping registration");
                Ok(Registration::Skipped)
            }
            Err(e) => Err(e),
        }
    }

    /// Check whether capability `T` is registered (built or not).
    pub fn contains<T: ?Sized + 'static>(&self) -> bool {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&TypeId::of::<T>())
    }

    /// Check whether capability `T` has a live instance.
    pub fn is_initialized<T: ?Sized + 'static>(&self) -> bool {
        self.slot(TypeId::of::<T>())
            .map(|slot| slot.cell.initialized())
            .unwrap_or(false)
    }

    /// Number of registered capabilities
    pub fn len(&self) -> usize {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Look up capability `T`, building it if it was registered lazily.
    ///
    /// Returns `Ok(None)` when nothing provides `T`. A failed build leaves
    /// the component uninitialized.
    pub async fn resolve<T>(&self) -> Result<Option<Arc<T>>, RegistryError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        if self.is_shut_down() {
            return Err(RegistryError::ShutDown);
        }

        let Some(slot) = self.slot(TypeId::of::<T>()) else {
            return Ok(None);
        };

        let erased = slot
            .cell
            .get_or_try_init(|| self.initialize(&slot))
            .await?;

        (**erased)
            .downcast_ref::<Arc<T>>()
            .cloned()
            .map(Some)
            .ok_or(RegistryError::TypeMismatch {
                component: slot.name,
            })
    }

    /// Like [`resolve`](Self::resolve) but fails when `T` is absent.
    pub async fn require<T>(&self) -> Result<Arc<T>, RegistryError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.resolve::<T>()
            .await?
            .ok_or(RegistryError::NotRegistered {
                component: std::any::type_name::<T>(),
            })
    }

    /// Run every teardown hook once, most recently initialized first.
    ///
    /// Subsequent calls do nothing.
    pub async fn shutdown(&self) {
        // The flag flips under the hook lock so a concurrent initialization
        // either lands its hook before the drain or sees the flag.
        let hooks = {
            let mut teardown = self.teardown.lock().unwrap_or_else(PoisonError::into_inner);
            if self.shut_down.swap(true, Ordering::SeqCst) {
                debug!("Registry already shut down");
                return;
            }
            std::mem::take(&mut *teardown)
        };
        info!(hooks = hooks.len(), "Shutting down component registry");

        for (component, hook) in hooks.into_iter().rev() {
            debug!(component, "Running teardown hook");
            hook().await;
        }
    }

    async fn initialize(&self, slot: &Slot) -> Result<ErasedComponent, RegistryError> {
        // Eager slots are created initialized, so a missing factory cannot be reached.
        let factory = slot.factory.as_ref().ok_or(RegistryError::NotRegistered {
            component: slot.name,
        })?;

        info!(component = slot.name, "Initializing lazy component");
        let (component, teardown) = factory.create_erased(self).await.map_err(|source| {
            warn!(component = slot.name, error = %source, "Component initialization failed");
            RegistryError::Initialization {
                component: slot.name,
                source,
            }
        })?;

        if let Some(hook) = teardown {
            if let Some(hook) = self.push_teardown(slot.name, hook) {
                warn!(
                    component = slot.name,
                    "Component finished initializing after shutdown, releasing it now"
                );
                hook().await;
                return Err(RegistryError::ShutDown);
            }
        }

        Ok(component)
    }

    fn insert_slot<T: ?Sized + 'static>(&self, slot: Slot) -> Result<(), RegistryError> {
        if self.is_shut_down() {
            return Err(RegistryError::ShutDown);
        }

        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let key = TypeId::of::<T>();
        if slots.contains_key(&key) {
            return Err(RegistryError::AlreadyRegistered {
                component: slot.name,
            });
        }

        debug!(component = slot.name, lazy = slot.factory.is_some(), "Registering component");
        slots.insert(key, Arc::new(slot));
        Ok(())
    }

    fn slot(&self, key: TypeId) -> Option<Arc<Slot>> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned()
    }

    /// Queue a hook for shutdown, handing it back if shutdown already began.
    fn push_teardown(&self, component: &'static str, hook: TeardownHook) -> Option<TeardownHook> {
        let mut teardown = self.teardown.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_shut_down() {
            return Some(hook);
        }
        teardown.push((component, hook));
        None
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("components", &self.len())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}
