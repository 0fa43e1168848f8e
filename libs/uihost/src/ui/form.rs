use super::window::Window;
use crate::hub::ServiceHub;

/// An application window type.
///
/// Forms are built by the service hub, so `create` may resolve whatever
/// the form needs. The form owns its [`Window`].
pub trait Form: Send + Sync + 'static {
    fn window(&self) -> &Window;

    fn create(hub: &ServiceHub) -> anyhow::Result<Self>
    where
        Self: Sized;
}
