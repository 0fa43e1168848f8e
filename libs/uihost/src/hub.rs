//! Typed service hub.
//!
//! A small `TypeId`-keyed container: every registration is stored as
//! `Arc<T>` behind `dyn Any`, so trait objects (`Arc<dyn Trait>`) are
//! registered and resolved the same way as concrete types.
//!
//! Lifetimes:
//! - **singleton**: created on first request under the registration's lock,
//!   then cached until [`ServiceHub::dispose`].
//! - **transient**: the factory runs on every request.
//! - **instance**: a pre-built value handed in at registration time.

use crate::contracts::HostedService;
use parking_lot::Mutex;
use std::any::{type_name, Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;

type Erased = Arc<dyn Any + Send + Sync>;
type Factory = Arc<dyn Fn(&ServiceHub) -> anyhow::Result<Erased> + Send + Sync>;
type HostedResolver = fn(&ServiceHub) -> Result<Arc<dyn HostedService>, ResolveError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceLifetime {
    Singleton,
    Transient,
    Instance,
}

struct Registration {
    type_name: &'static str,
    lifetime: ServiceLifetime,
    factory: Option<Factory>,
    slot: Mutex<Option<Erased>>,
}

/// Errors raised while resolving a service.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("service '{type_name}' is not registered")]
    NotRegistered { type_name: &'static str },

    #[error("dependency cycle while resolving: {path}")]
    Cycle { path: String },

    #[error("factory for '{type_name}' failed")]
    Factory {
        type_name: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("service hub is disposed (requested '{type_name}')")]
    Disposed { type_name: &'static str },

    #[error("registration for '{type_name}' holds a value of another type")]
    TypeMismatch { type_name: &'static str },
}

/// Errors raised by [`ServiceHubBuilder::build`].
#[derive(Debug, Error)]
pub enum HubBuildError {
    #[error("duplicate registrations: {}", .0.join(", "))]
    Duplicates(Vec<&'static str>),
}

thread_local! {
    static RESOLVING: RefCell<Vec<(usize, TypeId, &'static str)>> = const { RefCell::new(Vec::new()) };
}

/// Marks a type as "being resolved" on this thread for the guard's lifetime.
struct ResolveGuard;

impl ResolveGuard {
    fn enter(hub: usize, key: TypeId, name: &'static str) -> Result<Self, ResolveError> {
        RESOLVING.with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(pos) = stack.iter().position(|(h, k, _)| *h == hub && *k == key) {
                let mut path: Vec<&str> = stack[pos..].iter().map(|(_, _, n)| *n).collect();
                path.push(name);
                return Err(ResolveError::Cycle {
                    path: path.join(" -> "),
                });
            }
            stack.push((hub, key, name));
            Ok(ResolveGuard)
        })
    }
}

impl Drop for ResolveGuard {
    fn drop(&mut self) {
        RESOLVING.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Collects registrations; produces an immutable [`ServiceHub`].
#[derive(Default)]
pub struct ServiceHubBuilder {
    registrations: HashMap<TypeId, Registration>,
    hosted: Vec<(&'static str, HostedResolver)>,
    duplicates: Vec<&'static str>,
}

impl ServiceHubBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_singleton<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&ServiceHub) -> anyhow::Result<Arc<T>> + Send + Sync + 'static,
    {
        self.insert::<T>(ServiceLifetime::Singleton, Some(erase(factory)), None)
    }

    pub fn add_transient<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&ServiceHub) -> anyhow::Result<Arc<T>> + Send + Sync + 'static,
    {
        self.insert::<T>(ServiceLifetime::Transient, Some(erase(factory)), None)
    }

    pub fn add_instance<T>(&mut self, value: Arc<T>) -> &mut Self
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let erased: Erased = Arc::new(value);
        self.insert::<T>(ServiceLifetime::Instance, None, Some(erased))
    }

    /// Register `S` as a singleton and as a hosted service driven by the host.
    pub fn add_hosted_service<S, F>(&mut self, factory: F) -> &mut Self
    where
        S: HostedService,
        F: Fn(&ServiceHub) -> anyhow::Result<Arc<S>> + Send + Sync + 'static,
    {
        let name = type_name::<S>();
        if self.hosted.iter().any(|(n, _)| *n == name) {
            self.duplicates.push(name);
            return self;
        }
        self.hosted.push((name, resolve_hosted::<S>));
        self.add_singleton::<S, F>(factory)
    }

    pub fn contains<T: ?Sized + 'static>(&self) -> bool {
        self.registrations.contains_key(&TypeId::of::<T>())
    }

    fn insert<T: ?Sized + 'static>(
        &mut self,
        lifetime: ServiceLifetime,
        factory: Option<Factory>,
        value: Option<Erased>,
    ) -> &mut Self {
        let key = TypeId::of::<T>();
        let name = type_name::<T>();
        if self.registrations.contains_key(&key) {
            tracing::warn!(service = name, "Duplicate service registration");
            self.duplicates.push(name);
            return self;
        }
        self.registrations.insert(
            key,
            Registration {
                type_name: name,
                lifetime,
                factory,
                slot: Mutex::new(value),
            },
        );
        self
    }

    pub fn build(self) -> Result<Arc<ServiceHub>, HubBuildError> {
        if !self.duplicates.is_empty() {
            return Err(HubBuildError::Duplicates(self.duplicates));
        }
        tracing::debug!(
            services = self.registrations.len(),
            hosted = self.hosted.len(),
            "Service hub built"
        );
        let registrations = self.registrations;
        let hosted = self.hosted;
        Ok(Arc::new_cyclic(|weak| ServiceHub {
            weak_self: weak.clone(),
            registrations,
            hosted,
            created: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        }))
    }
}

fn erase<T, F>(factory: F) -> Factory
where
    T: ?Sized + Send + Sync + 'static,
    F: Fn(&ServiceHub) -> anyhow::Result<Arc<T>> + Send + Sync + 'static,
{
    Arc::new(move |hub| {
        let value = factory(hub)?;
        Ok(Arc::new(value) as Erased)
    })
}

fn resolve_hosted<S: HostedService>(hub: &ServiceHub) -> Result<Arc<dyn HostedService>, ResolveError> {
    let svc: Arc<S> = hub.get::<S>()?;
    Ok(svc)
}

/// Resolved, immutable registration table.
pub struct ServiceHub {
    weak_self: Weak<ServiceHub>,
    registrations: HashMap<TypeId, Registration>,
    hosted: Vec<(&'static str, HostedResolver)>,
    created: Mutex<Vec<TypeId>>,
    disposed: AtomicBool,
}

impl ServiceHub {
    pub fn builder() -> ServiceHubBuilder {
        ServiceHubBuilder::new()
    }

    /// Resolve `T`, creating it according to its registered lifetime.
    pub fn get<T>(&self) -> Result<Arc<T>, ResolveError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let name = type_name::<T>();
        if self.is_disposed() {
            return Err(ResolveError::Disposed { type_name: name });
        }
        let key = TypeId::of::<T>();
        let reg = self
            .registrations
            .get(&key)
            .ok_or(ResolveError::NotRegistered { type_name: name })?;

        let value = self.resolve_entry(key, reg)?;
        value
            .downcast_ref::<Arc<T>>()
            .cloned()
            .ok_or(ResolveError::TypeMismatch { type_name: name })
    }

    pub fn contains<T: ?Sized + 'static>(&self) -> bool {
        self.registrations.contains_key(&TypeId::of::<T>())
    }

    pub fn lifetime_of<T: ?Sized + 'static>(&self) -> Option<ServiceLifetime> {
        self.registrations.get(&TypeId::of::<T>()).map(|r| r.lifetime)
    }

    /// Hosted services in registration order.
    pub fn hosted_services(&self) -> Result<Vec<Arc<dyn HostedService>>, ResolveError> {
        self.hosted.iter().map(|(_, resolve)| resolve(self)).collect()
    }

    /// Non-owning handle to this hub, for services that resolve lazily.
    pub fn weak_self(&self) -> Weak<ServiceHub> {
        self.weak_self.clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Release cached singletons and instances in reverse creation order.
    /// Later resolutions fail with [`ResolveError::Disposed`].
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let created = std::mem::take(&mut *self.created.lock());
        for key in created.iter().rev() {
            if let Some(reg) = self.registrations.get(key) {
                tracing::trace!(service = reg.type_name, "Releasing singleton");
                let value = reg.slot.lock().take();
                drop(value);
            }
        }
        for reg in self.registrations.values() {
            if reg.lifetime == ServiceLifetime::Instance {
                let value = reg.slot.lock().take();
                drop(value);
            }
        }
        tracing::debug!(released = created.len(), "Service hub disposed");
    }

    fn resolve_entry(&self, key: TypeId, reg: &Registration) -> Result<Erased, ResolveError> {
        let hub_id = self as *const ServiceHub as usize;
        let _guard = ResolveGuard::enter(hub_id, key, reg.type_name)?;

        match (reg.lifetime, reg.factory.as_ref()) {
            (ServiceLifetime::Instance, _) | (_, None) => reg.slot.lock().clone().ok_or(ResolveError::Disposed {
                type_name: reg.type_name,
            }),
            (ServiceLifetime::Transient, Some(factory)) => self.invoke(reg, factory),
            (ServiceLifetime::Singleton, Some(factory)) => {
                let mut slot = reg.slot.lock();
                if let Some(existing) = slot.as_ref() {
                    return Ok(existing.clone());
                }
                let value = self.invoke(reg, factory)?;
                *slot = Some(value.clone());
                self.created.lock().push(key);
                tracing::trace!(service = reg.type_name, "Singleton created");
                Ok(value)
            }
        }
    }

    fn invoke(&self, reg: &Registration, factory: &Factory) -> Result<Erased, ResolveError> {
        factory(self).map_err(|source| match source.downcast::<ResolveError>() {
            // Keep cycle reports intact when they bubble through nested factories.
            Ok(cycle @ ResolveError::Cycle { .. }) => cycle,
            Ok(other) => ResolveError::Factory {
                type_name: reg.type_name,
                source: other.into(),
            },
            Err(source) => ResolveError::Factory {
                type_name: reg.type_name,
                source,
            },
        })
    }
}

impl std::fmt::Debug for ServiceHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceHub")
            .field("services", &self.registrations.len())
            .field("hosted", &self.hosted.len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
