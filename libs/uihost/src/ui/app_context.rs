//! Application context: owns the main form for the life of the message loop.
//!
//! Two paths lead out of the loop and both converge here:
//! - the user closes the main form: the closed handler asks the host to stop
//!   and exits the loop;
//! - the host stops first: [`ShutdownRequestHandler::request_shutdown_from_host`]
//!   marshals a close onto the UI thread, which then takes the first path.
//!
//! The closed handler is guarded by an atomic flag, so whichever side moves
//! first, the host sees one stop request and the loop sees one exit.

use super::error::UiError;
use super::form::Form;
use super::shutdown_handler::{MessageLoopContext, ShutdownRequestHandler};
use super::ui_runtime::UiRuntime;
use super::window::{CloseOutcome, CloseReason, ClosedSubscription, Window};
use crate::lifetime::HostLifetime;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use uihost_bootstrap::CloseVetoPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ContextState {
    Created = 0,
    Running = 1,
    ClosedNotified = 2,
    LoopExiting = 3,
    Disposed = 4,
}

impl ContextState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ContextState::Created,
            1 => ContextState::Running,
            2 => ContextState::ClosedNotified,
            3 => ContextState::LoopExiting,
            _ => ContextState::Disposed,
        }
    }
}

pub struct ApplicationContext<F: Form> {
    lifetime: Arc<HostLifetime>,
    runtime: Arc<dyn UiRuntime>,
    main_form: Arc<F>,
    close_veto: CloseVetoPolicy,
    closed_subscription: Mutex<Option<ClosedSubscription>>,
    handled: AtomicBool,
    state: AtomicU8,
}

impl<F: Form> ApplicationContext<F> {
    pub fn new(
        lifetime: Arc<HostLifetime>,
        runtime: Arc<dyn UiRuntime>,
        main_form: Arc<F>,
        close_veto: CloseVetoPolicy,
    ) -> Result<Arc<Self>, UiError> {
        validate_window(main_form.window())?;

        let ctx = Arc::new(Self {
            lifetime,
            runtime,
            main_form,
            close_veto,
            closed_subscription: Mutex::new(None),
            handled: AtomicBool::new(false),
            state: AtomicU8::new(ContextState::Created as u8),
        });

        let weak = Arc::downgrade(&ctx);
        let sub = ctx.main_form.window().subscribe_closed(move |event| {
            if let Some(ctx) = weak.upgrade() {
                ctx.handle_main_form_closed(event.reason);
            }
        })?;
        *ctx.closed_subscription.lock() = Some(sub);

        tracing::debug!(
            window = %ctx.main_form.window().id(),
            title = ctx.main_form.window().title(),
            "Application context created"
        );
        Ok(ctx)
    }

    pub fn main_form(&self) -> &Arc<F> {
        &self.main_form
    }

    pub fn state(&self) -> ContextState {
        ContextState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_disposed(&self) -> bool {
        self.state() == ContextState::Disposed
    }

    fn advance(&self, to: ContextState) {
        self.state.fetch_max(to as u8, Ordering::AcqRel);
    }

    /// Main-form closed handler. Runs on the UI thread; only the first call
    /// has any effect.
    pub fn handle_main_form_closed(&self, reason: CloseReason) {
        if self.is_disposed() {
            tracing::trace!("Main form closed after context disposal; ignoring");
            return;
        }
        if self.handled.swap(true, Ordering::AcqRel) {
            tracing::trace!("Main form closed notification already handled");
            return;
        }

        if let Some(sub) = self.closed_subscription.lock().take() {
            self.main_form.window().unsubscribe_closed(sub);
        }
        self.advance(ContextState::ClosedNotified);

        if !self.lifetime.is_stopping_requested() {
            tracing::info!(?reason, "Main form closed; requesting host stop");
            self.lifetime.stop_application();
        } else {
            tracing::debug!(?reason, "Main form closed; host already stopping");
        }

        self.advance(ContextState::LoopExiting);
        match self.runtime.exit_message_loop() {
            Ok(()) => {}
            Err(e) if e.is_teardown() => {
                tracing::debug!(error = %e, "Message loop already gone");
            }
            Err(e) => tracing::warn!(error = %e, "Failed to exit message loop"),
        }
    }

    /// Release the main form. Idempotent; also runs on drop.
    pub fn dispose(&self) {
        let prev = self.state.swap(ContextState::Disposed as u8, Ordering::AcqRel);
        if prev == ContextState::Disposed as u8 {
            return;
        }
        if let Some(sub) = self.closed_subscription.lock().take() {
            self.main_form.window().unsubscribe_closed(sub);
        }
        self.main_form.window().dispose();
        tracing::debug!("Application context disposed");
    }
}

fn validate_window(window: &Window) -> Result<(), UiError> {
    if window.is_disposed() {
        return Err(UiError::InvalidMainWindow(format!(
            "window '{}' is disposed",
            window.title()
        )));
    }
    if window.is_closed() {
        return Err(UiError::InvalidMainWindow(format!(
            "window '{}' is already closed",
            window.title()
        )));
    }
    Ok(())
}

/// Runs on the UI thread in response to a host stop.
fn close_for_host<F: Form>(runtime: &dyn UiRuntime, form: &F, policy: CloseVetoPolicy) {
    let window = form.window();
    match runtime.request_close(window, CloseReason::HostShutdown) {
        Ok(CloseOutcome::Closed) | Ok(CloseOutcome::AlreadyClosed) => {}
        Ok(CloseOutcome::Cancelled) => match policy {
            CloseVetoPolicy::Override => {
                tracing::warn!(window = %window.id(), "Host-initiated close was vetoed; forcing close");
                if let Err(e) = window.force_close(CloseReason::HostShutdown) {
                    tracing::warn!(error = %e, "Forced close failed");
                }
            }
            CloseVetoPolicy::Honor => {
                tracing::warn!(
                    window = %window.id(),
                    "Host-initiated close was vetoed; the UI keeps running until its stop timeout"
                );
            }
        },
        Err(e) if e.is_teardown() => tracing::debug!(error = %e, "Window already gone"),
        Err(e) => tracing::warn!(error = %e, "Host-initiated close failed"),
    }
}

impl<F: Form> ShutdownRequestHandler for ApplicationContext<F> {
    fn request_shutdown_from_host(&self) {
        if self.is_disposed() {
            tracing::warn!("Shutdown requested after application context disposal");
            return;
        }
        let window = self.main_form.window();
        if window.is_disposed() {
            tracing::warn!("Shutdown requested but the main form is disposed");
            return;
        }
        if window.is_closed() {
            tracing::trace!("Shutdown requested; main form already closed");
            return;
        }
        if !window.has_native_handle() {
            // Posted work only runs once the loop has created the handle.
            tracing::debug!("Main form not shown yet; close queued for loop start");
        }

        tracing::debug!(window = %window.id(), "Marshaling host shutdown onto the UI thread");
        // Weak: the work is queued inside the runtime itself.
        let runtime = Arc::downgrade(&self.runtime);
        let form = self.main_form.clone();
        let policy = self.close_veto;
        let posted = self.runtime.invoke_on_ui_thread(Box::new(move || {
            if let Some(runtime) = runtime.upgrade() {
                close_for_host(runtime.as_ref(), form.as_ref(), policy);
            }
        }));
        if let Err(e) = posted {
            tracing::warn!(error = %e, "Could not post shutdown to the UI thread");
        }
    }
}

impl<F: Form> MessageLoopContext for ApplicationContext<F> {
    fn prepare_thread(&self) -> Result<(), UiError> {
        self.runtime.prepare_thread()
    }

    fn main_window(&self) -> &Window {
        self.main_form.window()
    }

    fn validate(&self) -> Result<(), UiError> {
        if self.is_disposed() {
            return Err(UiError::InvalidMainWindow("application context is disposed".into()));
        }
        validate_window(self.main_form.window())
    }

    fn run(&self) -> Result<(), UiError> {
        self.validate()?;
        self.advance(ContextState::Running);
        self.runtime.run_message_loop(self.main_form.window())
    }
}

impl<F: Form> Drop for ApplicationContext<F> {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::ServiceHub;
    use crate::ui::headless::QueueRuntime;
    use std::thread;

    struct Main {
        window: Window,
    }

    impl Form for Main {
        fn window(&self) -> &Window {
            &self.window
        }

        fn create(_hub: &ServiceHub) -> anyhow::Result<Self> {
            Ok(Self {
                window: Window::new("main"),
            })
        }
    }

    fn main_form() -> Arc<Main> {
        Arc::new(Main {
            window: Window::new("main"),
        })
    }

    fn context(
        policy: CloseVetoPolicy,
    ) -> (Arc<HostLifetime>, Arc<QueueRuntime>, Arc<ApplicationContext<Main>>) {
        let lifetime = Arc::new(HostLifetime::new());
        let runtime = Arc::new(QueueRuntime::new());
        let ctx = ApplicationContext::new(lifetime.clone(), runtime.clone(), main_form(), policy).unwrap();
        (lifetime, runtime, ctx)
    }

    fn run_loop(ctx: &Arc<ApplicationContext<Main>>) -> thread::JoinHandle<Result<(), UiError>> {
        let ctx = ctx.clone();
        thread::spawn(move || ctx.run())
    }

    #[test]
    fn rejects_disposed_or_closed_main_form() {
        let lifetime = Arc::new(HostLifetime::new());
        let runtime: Arc<dyn UiRuntime> = Arc::new(QueueRuntime::new());

        let disposed = main_form();
        disposed.window().dispose();
        let err = ApplicationContext::new(lifetime.clone(), runtime.clone(), disposed, CloseVetoPolicy::Override)
            .err()
            .unwrap();
        assert!(matches!(err, UiError::InvalidMainWindow(_)));

        let closed = main_form();
        closed.window().create_handle().unwrap();
        closed.window().close(CloseReason::UserClosing).unwrap();
        let err = ApplicationContext::new(lifetime, runtime, closed, CloseVetoPolicy::Override)
            .err()
            .unwrap();
        assert!(matches!(err, UiError::InvalidMainWindow(_)));
    }

    #[test]
    fn user_close_stops_host_and_exits_loop() {
        let (lifetime, runtime, ctx) = context(CloseVetoPolicy::Override);
        let form = ctx.main_form().clone();
        runtime
            .invoke_on_ui_thread(Box::new(move || {
                form.window().close(CloseReason::UserClosing).unwrap();
            }))
            .unwrap();

        run_loop(&ctx).join().unwrap().unwrap();
        assert!(lifetime.is_stopping_requested());
        assert_eq!(lifetime.stop_requests(), 1);
        assert_eq!(ctx.state(), ContextState::LoopExiting);
        assert_eq!(ctx.main_form().window().closed_subscribers(), 0);
    }

    #[test]
    fn host_request_closes_window_without_second_stop() {
        let (lifetime, runtime, ctx) = context(CloseVetoPolicy::Override);
        let handle = run_loop(&ctx);
        while !runtime.is_running() {
            thread::yield_now();
        }

        lifetime.stop_application();
        ctx.request_shutdown_from_host();
        handle.join().unwrap().unwrap();

        assert!(ctx.main_form().window().is_closed());
        assert_eq!(lifetime.stop_requests(), 1);
    }

    #[test]
    fn vetoed_host_close_is_forced_by_default() {
        let (lifetime, runtime, ctx) = context(CloseVetoPolicy::Override);
        ctx.main_form().window().on_closing(|_| true);
        let handle = run_loop(&ctx);
        while !runtime.is_running() {
            thread::yield_now();
        }

        lifetime.stop_application();
        ctx.request_shutdown_from_host();
        handle.join().unwrap().unwrap();
        assert!(ctx.main_form().window().is_closed());
    }

    #[test]
    fn honored_veto_keeps_the_loop_running() {
        let (lifetime, runtime, ctx) = context(CloseVetoPolicy::Honor);
        ctx.main_form().window().on_closing(|reason| reason == CloseReason::HostShutdown);
        let handle = run_loop(&ctx);
        while !runtime.is_running() {
            thread::yield_now();
        }

        lifetime.stop_application();
        ctx.request_shutdown_from_host();
        // Let the marshaled close run, then close as the user would.
        let form = ctx.main_form().clone();
        runtime
            .invoke_on_ui_thread(Box::new(move || {
                assert!(!form.window().is_closed());
                form.window().close(CloseReason::UserClosing).unwrap();
            }))
            .unwrap();
        handle.join().unwrap().unwrap();
        assert!(ctx.main_form().window().is_closed());
        assert_eq!(runtime.dispatched(), 2);
    }

    #[test]
    fn repeated_closed_notifications_are_ignored() {
        let (lifetime, runtime, ctx) = context(CloseVetoPolicy::Override);
        let c = ctx.clone();
        runtime
            .invoke_on_ui_thread(Box::new(move || {
                c.handle_main_form_closed(CloseReason::UserClosing);
                c.handle_main_form_closed(CloseReason::UserClosing);
            }))
            .unwrap();
        run_loop(&ctx).join().unwrap().unwrap();
        assert_eq!(lifetime.stop_requests(), 1);
    }

    #[test]
    fn undelivered_close_does_not_keep_runtime_alive() {
        let (_lifetime, runtime, ctx) = context(CloseVetoPolicy::Override);
        ctx.request_shutdown_from_host();

        let weak = Arc::downgrade(&runtime);
        drop(ctx);
        drop(runtime);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn handler_after_dispose_is_a_no_op() {
        let (lifetime, _runtime, ctx) = context(CloseVetoPolicy::Override);
        ctx.dispose();
        ctx.dispose();
        assert!(ctx.main_form().window().is_disposed());

        ctx.handle_main_form_closed(CloseReason::UserClosing);
        ctx.request_shutdown_from_host();
        assert!(!lifetime.is_stopping_requested());
        assert_eq!(ctx.state(), ContextState::Disposed);
    }

    #[test]
    fn shutdown_before_loop_is_delivered_once_it_runs() {
        let (lifetime, runtime, ctx) = context(CloseVetoPolicy::Override);
        ctx.request_shutdown_from_host();
        assert!(!lifetime.is_stopping_requested());
        assert_eq!(runtime.dispatched(), 0);

        run_loop(&ctx).join().unwrap().unwrap();
        assert!(ctx.main_form().window().is_closed());
        assert!(lifetime.is_stopping_requested());
        assert_eq!(runtime.dispatched(), 1);
    }
}
