use super::app_context::ApplicationContext;
use super::form::Form;
use super::hosted_service::UiHostedService;
use super::provider::FormProvider;
use super::shutdown_handler::{MessageLoopContext, ShutdownRequestHandler, UiThreadObserver};
use super::ui_runtime::UiRuntime;
use crate::hub::ServiceHubBuilder;
use crate::lifetime::HostLifetime;
use std::sync::Arc;
use uihost_bootstrap::AppConfig;

/// Registers the UI lifecycle bridge on a service hub.
pub trait UiHostingExt {
    /// Host `F` as the main form on `runtime`.
    ///
    /// Registers the runtime, `F` (singleton, unless already registered),
    /// [`FormProvider`], [`ApplicationContext<F>`] under its own type and as
    /// `dyn MessageLoopContext` / `dyn ShutdownRequestHandler`, and the
    /// [`UiHostedService`]. Expects [`HostLifetime`] and [`AppConfig`] to be
    /// registered, which `HostBuilder` does. A `dyn UiThreadObserver`
    /// registration, if present, is attached to the hosted service.
    fn add_ui_hosting<F: Form>(&mut self, runtime: Arc<dyn UiRuntime>) -> &mut Self;
}

impl UiHostingExt for ServiceHubBuilder {
    fn add_ui_hosting<F: Form>(&mut self, runtime: Arc<dyn UiRuntime>) -> &mut Self {
        self.add_instance::<dyn UiRuntime>(runtime);

        if !self.contains::<F>() {
            self.add_singleton::<F, _>(|hub| Ok(Arc::new(F::create(hub)?)));
        }
        if !self.contains::<FormProvider>() {
            self.add_singleton::<FormProvider, _>(|hub| Ok(Arc::new(FormProvider::new(hub.weak_self()))));
        }

        self.add_singleton::<ApplicationContext<F>, _>(|hub| {
            let config = hub.get::<AppConfig>()?;
            let ctx = ApplicationContext::new(
                hub.get::<HostLifetime>()?,
                hub.get::<dyn UiRuntime>()?,
                hub.get::<F>()?,
                config.ui.close_veto,
            )?;
            Ok(ctx)
        });
        self.add_singleton::<dyn MessageLoopContext, _>(|hub| {
            let ctx: Arc<dyn MessageLoopContext> = hub.get::<ApplicationContext<F>>()?;
            Ok(ctx)
        });
        self.add_singleton::<dyn ShutdownRequestHandler, _>(|hub| {
            let ctx: Arc<dyn ShutdownRequestHandler> = hub.get::<ApplicationContext<F>>()?;
            Ok(ctx)
        });

        self.add_hosted_service::<UiHostedService, _>(|hub| {
            let config = hub.get::<AppConfig>()?;
            let mut service = UiHostedService::new(
                hub.get::<HostLifetime>()?,
                hub.get::<dyn MessageLoopContext>()?,
                hub.get::<dyn ShutdownRequestHandler>()?,
                &config.ui,
                config.host.environment.clone(),
            );
            if hub.contains::<dyn UiThreadObserver>() {
                service = service.with_observer(hub.get::<dyn UiThreadObserver>()?);
            }
            Ok(Arc::new(service))
        })
    }
}
