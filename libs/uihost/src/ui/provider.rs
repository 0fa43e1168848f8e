use super::form::Form;
use crate::hub::{ResolveError, ServiceHub};
use std::any::type_name;
use std::sync::{Arc, Weak};

/// Resolves forms by type.
///
/// Whether a form is shared or fresh per call depends on how it was
/// registered (singleton or transient).
pub struct FormProvider {
    hub: Weak<ServiceHub>,
}

impl FormProvider {
    pub fn new(hub: Weak<ServiceHub>) -> Self {
        Self { hub }
    }

    pub fn get_form<F: Form>(&self) -> Result<Arc<F>, ResolveError> {
        let hub = self.hub.upgrade().ok_or(ResolveError::Disposed {
            type_name: type_name::<F>(),
        })?;
        hub.get::<F>()
    }
}
