//! Hosted service that owns the dedicated UI thread.
//!
//! `start` registers the host-stopping bridge, spawns the UI thread and a
//! background task that waits for the loop to begin and then joins the
//! thread. `stop` races that task against `ui.stop_timeout` and the host's
//! cancellation, and classifies the result as a [`StopOutcome`].
//!
//! A UI thread that overruns the timeout is abandoned, never killed.

use super::error::{panic_message, UiError, UiThreadError, UiThreadFault};
use super::gate::StartupGate;
use super::shutdown_handler::{MessageLoopContext, ShutdownRequestHandler, UiThreadObserver};
use crate::contracts::HostedService;
use crate::lifetime::{CallbackRegistration, HostLifetime};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uihost_bootstrap::UiConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The UI thread ended and was joined.
    Clean,
    /// The UI thread ended with an error or panic, or never spawned.
    Faulted,
    /// Waiting for the loop to start was cancelled; the thread was abandoned.
    Cancelled,
    /// The stop budget ran out (timeout or host cancellation).
    TimedOut,
    /// `start` never ran, or `stop` already consumed the wait task.
    NotStarted,
}

type UiThreadResult = Result<(), UiThreadFault>;

pub struct UiHostedService {
    lifetime: Arc<HostLifetime>,
    context: Arc<dyn MessageLoopContext>,
    handler: Arc<dyn ShutdownRequestHandler>,
    observer: Option<Arc<dyn UiThreadObserver>>,
    environment: String,
    thread_name: String,
    stop_timeout: Duration,
    gate: Arc<StartupGate>,
    started: AtomicBool,
    disposed: AtomicBool,
    stopping_registration: Mutex<Option<CallbackRegistration>>,
    wait_task: Mutex<Option<JoinHandle<Result<(), UiThreadError>>>>,
    last_outcome: Mutex<Option<StopOutcome>>,
    threads_spawned: AtomicUsize,
}

impl UiHostedService {
    pub fn new(
        lifetime: Arc<HostLifetime>,
        context: Arc<dyn MessageLoopContext>,
        handler: Arc<dyn ShutdownRequestHandler>,
        ui: &UiConfig,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            lifetime,
            context,
            handler,
            observer: None,
            environment: environment.into(),
            thread_name: ui.thread_name.clone(),
            stop_timeout: ui.stop_timeout,
            gate: Arc::new(StartupGate::new()),
            started: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            stopping_registration: Mutex::new(None),
            wait_task: Mutex::new(None),
            last_outcome: Mutex::new(None),
            threads_spawned: AtomicUsize::new(0),
        }
    }

    /// Attach application hooks for UI thread exit and faults.
    pub fn with_observer(mut self, observer: Arc<dyn UiThreadObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn stop_timeout(&self) -> Duration {
        self.stop_timeout
    }

    pub fn last_stop_outcome(&self) -> Option<StopOutcome> {
        *self.last_outcome.lock()
    }

    pub fn threads_spawned(&self) -> usize {
        self.threads_spawned.load(Ordering::Acquire)
    }

    pub fn is_loop_started(&self) -> bool {
        self.gate.is_set()
    }

    fn start_ui(&self, cancel: CancellationToken) -> Result<(), UiThreadError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(UiThreadError::AlreadyStarted);
        }
        tracing::trace!(environment = %self.environment, "Hosting environment");

        let handler = self.handler.clone();
        let registration = self
            .lifetime
            .on_stopping(move || handler.request_shutdown_from_host());
        *self.stopping_registration.lock() = Some(registration);

        let exited = CancellationToken::new();
        let spawned = {
            let context = self.context.clone();
            let gate = self.gate.clone();
            let lifetime = self.lifetime.clone();
            let observer = self.observer.clone();
            let exited = exited.clone();
            thread::Builder::new()
                .name(self.thread_name.clone())
                .spawn(move || ui_thread_main(context, gate, lifetime, observer, exited))
        };

        let handle = match spawned {
            Ok(handle) => {
                self.threads_spawned.fetch_add(1, Ordering::AcqRel);
                tracing::debug!(thread = %self.thread_name, "UI thread spawned");
                Ok(handle)
            }
            Err(e) => {
                tracing::error!(error = %e, thread = %self.thread_name, "Failed to spawn UI thread");
                if !self.lifetime.is_stopping_requested() {
                    self.lifetime.stop_application();
                }
                Err(e)
            }
        };

        let task = tokio::spawn(wait_for_ui_thread(handle, self.gate.clone(), exited, cancel));
        *self.wait_task.lock() = Some(task);
        Ok(())
    }

    /// Wait for the UI thread to finish, bounded by the configured timeout
    /// and by `cancel`. Never fails; the outcome is logged and returned.
    pub async fn stop_ui(&self, cancel: CancellationToken) -> StopOutcome {
        let task = self.wait_task.lock().take();
        let outcome = match task {
            None => {
                tracing::debug!("UI thread was never started; nothing to stop");
                StopOutcome::NotStarted
            }
            Some(mut task) => {
                tokio::select! {
                    res = &mut task => classify(res),
                    _ = tokio::time::sleep(self.stop_timeout) => {
                        tracing::warn!(
                            timeout = ?self.stop_timeout,
                            "UI thread did not stop in time; abandoning it"
                        );
                        StopOutcome::TimedOut
                    }
                    _ = cancel.cancelled() => {
                        tracing::warn!("Host stop cancelled while waiting for the UI thread; abandoning it");
                        StopOutcome::TimedOut
                    }
                }
            }
        };
        *self.last_outcome.lock() = Some(outcome);
        outcome
    }

    /// Release the stopping registration and the startup gate. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(reg) = self.stopping_registration.lock().take() {
            reg.dispose();
        }
        self.gate.dispose();
        tracing::trace!("UI hosted service disposed");
    }
}

fn classify(res: Result<Result<(), UiThreadError>, tokio::task::JoinError>) -> StopOutcome {
    match res {
        Ok(Ok(())) => {
            tracing::info!("UI thread stopped");
            StopOutcome::Clean
        }
        Ok(Err(UiThreadError::Cancelled)) => {
            tracing::warn!("UI thread startup wait was cancelled");
            StopOutcome::Cancelled
        }
        Ok(Err(e)) => {
            tracing::error!(error = %e, cause = ?std::error::Error::source(&e), "UI thread faulted");
            StopOutcome::Faulted
        }
        Err(e) => {
            tracing::error!(error = %e, "UI wait task failed");
            StopOutcome::Faulted
        }
    }
}

/// Runs an observer hook, containing panics.
fn notify_observer(
    observer: Option<&Arc<dyn UiThreadObserver>>,
    hook: &'static str,
    f: impl FnOnce(&dyn UiThreadObserver),
) {
    let Some(observer) = observer else {
        return;
    };
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| f(observer.as_ref()))) {
        tracing::error!(hook, panic = %panic_message(payload.as_ref()), "UI thread observer panicked");
    }
}

/// Notifies the observer, requests host stop and signals the waiter when
/// the UI thread ends, whatever the reason.
struct ExitGuard {
    lifetime: Arc<HostLifetime>,
    observer: Option<Arc<dyn UiThreadObserver>>,
    exited: CancellationToken,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        notify_observer(self.observer.as_ref(), "on_ui_exit", |o| o.on_ui_exit());
        if !self.lifetime.is_stopping_requested() {
            tracing::info!("UI thread ended; requesting host stop");
            self.lifetime.stop_application();
        }
        self.exited.cancel();
    }
}

fn ui_thread_main(
    context: Arc<dyn MessageLoopContext>,
    gate: Arc<StartupGate>,
    lifetime: Arc<HostLifetime>,
    observer: Option<Arc<dyn UiThreadObserver>>,
    exited: CancellationToken,
) -> UiThreadResult {
    let _exit = ExitGuard {
        lifetime: lifetime.clone(),
        observer: observer.clone(),
        exited,
    };

    let body = || -> Result<(), UiError> {
        context.prepare_thread()?;
        context.validate()?;
        if lifetime.is_stopping_requested() {
            tracing::info!("Host is already stopping; skipping the message loop");
            return Ok(());
        }
        gate.set();
        tracing::debug!(window = %context.main_window().id(), "Entering message loop");
        context.run()
    };

    let fault = match catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(())) => {
            tracing::debug!("Message loop finished");
            return Ok(());
        }
        Ok(Err(e)) => UiThreadFault::Ui(e),
        Err(payload) => UiThreadFault::Panicked(panic_message(payload.as_ref())),
    };
    notify_observer(observer.as_ref(), "on_ui_fault", |o| o.on_ui_fault(&fault));
    Err(fault)
}

async fn wait_for_ui_thread(
    handle: std::io::Result<thread::JoinHandle<UiThreadResult>>,
    gate: Arc<StartupGate>,
    exited: CancellationToken,
    cancel: CancellationToken,
) -> Result<(), UiThreadError> {
    let handle = handle.map_err(UiThreadError::Spawn)?;

    tokio::select! {
        biased;
        res = gate.wait() => {
            if res.is_err() {
                return Err(UiThreadError::Cancelled);
            }
        }
        _ = exited.cancelled() => {}
        _ = cancel.cancelled() => return Err(UiThreadError::Cancelled),
    }

    // `exited` is cancelled as the thread body returns, so the join only
    // waits for thread teardown and no blocking job is left on the runtime.
    exited.cancelled().await;

    match handle.join() {
        Ok(Ok(())) => Ok(()),
        Ok(Err(fault)) => Err(UiThreadError::Faulted(fault)),
        Err(payload) => Err(UiThreadError::Faulted(UiThreadFault::Panicked(panic_message(
            payload.as_ref(),
        )))),
    }
}

#[async_trait]
impl HostedService for UiHostedService {
    fn name(&self) -> &'static str {
        "ui"
    }

    async fn start(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        self.start_ui(cancel)?;
        Ok(())
    }

    async fn stop(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        self.stop_ui(cancel).await;
        Ok(())
    }

    fn dispose(&self) {
        UiHostedService::dispose(self);
    }
}

impl Drop for UiHostedService {
    fn drop(&mut self) {
        UiHostedService::dispose(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::window::Window;

    /// Loop context whose loop fails immediately.
    struct Failing {
        window: Window,
        panic: bool,
    }

    impl MessageLoopContext for Failing {
        fn prepare_thread(&self) -> Result<(), UiError> {
            Ok(())
        }
        fn main_window(&self) -> &Window {
            &self.window
        }
        fn validate(&self) -> Result<(), UiError> {
            Ok(())
        }
        fn run(&self) -> Result<(), UiError> {
            if self.panic {
                panic!("loop exploded");
            }
            Err(UiError::ThreadPreparation("no display".into()))
        }
    }

    impl ShutdownRequestHandler for Failing {
        fn request_shutdown_from_host(&self) {}
    }

    fn service(panic: bool) -> (Arc<HostLifetime>, UiHostedService) {
        let lifetime = Arc::new(HostLifetime::new());
        let ctx = Arc::new(Failing {
            window: Window::new("main"),
            panic,
        });
        let ui = UiConfig {
            stop_timeout: Duration::from_secs(2),
            ..UiConfig::default()
        };
        let svc = UiHostedService::new(lifetime.clone(), ctx.clone(), ctx, &ui, "Test");
        (lifetime, svc)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn loop_error_is_a_fault_and_stops_the_host() {
        let (lifetime, svc) = service(false);
        svc.start(CancellationToken::new()).await.unwrap();
        lifetime.application_stopping().cancelled().await;

        svc.stop(CancellationToken::new()).await.unwrap();
        assert_eq!(svc.last_stop_outcome(), Some(StopOutcome::Faulted));
        assert_eq!(svc.threads_spawned(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn panic_is_a_fault() {
        let (_lifetime, svc) = service(true);
        svc.start(CancellationToken::new()).await.unwrap();
        assert_eq!(svc.stop_ui(CancellationToken::new()).await, StopOutcome::Faulted);
    }

    #[derive(Default)]
    struct Recorder {
        exits: AtomicUsize,
        faults: Mutex<Vec<String>>,
    }

    impl UiThreadObserver for Recorder {
        fn on_ui_exit(&self) {
            self.exits.fetch_add(1, Ordering::AcqRel);
        }

        fn on_ui_fault(&self, fault: &UiThreadFault) {
            self.faults.lock().push(fault.to_string());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn observer_sees_fault_and_exit() {
        let (_lifetime, svc) = service(true);
        let recorder = Arc::new(Recorder::default());
        let svc = svc.with_observer(recorder.clone());

        svc.start(CancellationToken::new()).await.unwrap();
        assert_eq!(svc.stop_ui(CancellationToken::new()).await, StopOutcome::Faulted);

        assert_eq!(recorder.exits.load(Ordering::Acquire), 1);
        let faults = recorder.faults.lock();
        assert_eq!(faults.len(), 1);
        assert!(faults[0].contains("loop exploded"), "{}", faults[0]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn observer_sees_exit_without_fault_when_loop_is_skipped() {
        let (lifetime, svc) = service(true);
        let recorder = Arc::new(Recorder::default());
        let svc = svc.with_observer(recorder.clone());
        lifetime.stop_application();

        svc.start(CancellationToken::new()).await.unwrap();
        assert_eq!(svc.stop_ui(CancellationToken::new()).await, StopOutcome::Clean);
        assert_eq!(recorder.exits.load(Ordering::Acquire), 1);
        assert!(recorder.faults.lock().is_empty());
    }

    struct PanickingObserver;

    impl UiThreadObserver for PanickingObserver {
        fn on_ui_fault(&self, _fault: &UiThreadFault) {
            panic!("observer exploded");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn panicking_observer_does_not_change_the_outcome() {
        let (lifetime, svc) = service(false);
        let svc = svc.with_observer(Arc::new(PanickingObserver));
        svc.start(CancellationToken::new()).await.unwrap();
        assert_eq!(svc.stop_ui(CancellationToken::new()).await, StopOutcome::Faulted);
        assert!(lifetime.is_stopping_requested());
    }

    /// Loop context whose loop blocks until released.
    struct Hung {
        window: Window,
        release: Mutex<std::sync::mpsc::Receiver<()>>,
    }

    impl MessageLoopContext for Hung {
        fn prepare_thread(&self) -> Result<(), UiError> {
            Ok(())
        }
        fn main_window(&self) -> &Window {
            &self.window
        }
        fn validate(&self) -> Result<(), UiError> {
            Ok(())
        }
        fn run(&self) -> Result<(), UiError> {
            let _ = self.release.lock().recv();
            Ok(())
        }
    }

    impl ShutdownRequestHandler for Hung {
        fn request_shutdown_from_host(&self) {}
    }

    #[test]
    fn runtime_shuts_down_after_abandoning_a_hung_ui_thread() {
        let (release, rx) = std::sync::mpsc::channel();
        let ctx = Arc::new(Hung {
            window: Window::new("main"),
            release: Mutex::new(rx),
        });
        let ui = UiConfig {
            stop_timeout: Duration::from_millis(200),
            ..UiConfig::default()
        };
        let lifetime = Arc::new(HostLifetime::new());
        let svc = UiHostedService::new(lifetime, ctx.clone(), ctx, &ui, "Test");

        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let outcome = rt.block_on(async {
            svc.start(CancellationToken::new()).await.unwrap();
            while !svc.is_loop_started() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            svc.stop_ui(CancellationToken::new()).await
        });
        assert_eq!(outcome, StopOutcome::TimedOut);

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            drop(rt);
            let _ = done_tx.send(());
        });
        let dropped = done_rx.recv_timeout(Duration::from_secs(5)).is_ok();

        release.send(()).unwrap();
        assert!(dropped, "runtime shutdown waited on the abandoned UI thread");
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let (_lifetime, svc) = service(false);
        svc.start(CancellationToken::new()).await.unwrap();
        let err = svc.start(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<UiThreadError>(),
            Some(UiThreadError::AlreadyStarted)
        ));
        assert_eq!(svc.threads_spawned(), 1);
    }

    #[tokio::test]
    async fn stop_without_start_reports_not_started() {
        let (_lifetime, svc) = service(false);
        assert_eq!(svc.stop_ui(CancellationToken::new()).await, StopOutcome::NotStarted);
        svc.dispose();
        svc.dispose();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn host_stopping_before_loop_skips_it() {
        let (lifetime, svc) = service(true);
        lifetime.stop_application();
        svc.start(CancellationToken::new()).await.unwrap();
        assert_eq!(svc.stop_ui(CancellationToken::new()).await, StopOutcome::Clean);
        assert!(!svc.is_loop_started());
    }
}
