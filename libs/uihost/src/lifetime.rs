//! Host lifetime signals.
//!
//! Three one-shot signals (`started`, `stopping`, `stopped`), each exposed as
//! a [`CancellationToken`] for async waiters and as a callback list for code
//! that cannot await (the UI thread, drop paths). A callback registered after
//! its signal fired runs immediately on the registering thread.

use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;

type Callback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct SignalState {
    fired: bool,
    next_id: u64,
    callbacks: Vec<(u64, Callback)>,
}

struct Signal {
    name: &'static str,
    token: CancellationToken,
    state: Mutex<SignalState>,
}

impl Signal {
    fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            token: CancellationToken::new(),
            state: Mutex::new(SignalState::default()),
        })
    }

    /// Returns `false` if the signal had already fired.
    fn fire(&self) -> bool {
        let callbacks = {
            let mut st = self.state.lock();
            if st.fired {
                return false;
            }
            st.fired = true;
            std::mem::take(&mut st.callbacks)
        };

        self.token.cancel();
        tracing::debug!(signal = self.name, callbacks = callbacks.len(), "Lifetime signal fired");
        for (_, cb) in callbacks {
            run_callback(self.name, cb);
        }
        true
    }

    fn is_fired(&self) -> bool {
        self.state.lock().fired
    }

    fn register(self: &Arc<Self>, cb: Callback) -> CallbackRegistration {
        let mut st = self.state.lock();
        if st.fired {
            drop(st);
            run_callback(self.name, cb);
            return CallbackRegistration::empty();
        }
        st.next_id += 1;
        let id = st.next_id;
        st.callbacks.push((id, cb));
        CallbackRegistration {
            signal: Arc::downgrade(self),
            id: Some(id),
        }
    }

    fn unregister(&self, id: u64) -> bool {
        let mut st = self.state.lock();
        let before = st.callbacks.len();
        st.callbacks.retain(|(cid, _)| *cid != id);
        st.callbacks.len() != before
    }
}

fn run_callback(signal: &'static str, cb: Callback) {
    if catch_unwind(AssertUnwindSafe(cb)).is_err() {
        tracing::error!(signal, "Lifetime callback panicked");
    }
}

/// Handle for a callback registered on a lifetime signal.
///
/// Dropping it unregisters the callback if the signal has not fired yet.
#[must_use = "dropping the registration unregisters the callback"]
pub struct CallbackRegistration {
    signal: Weak<Signal>,
    id: Option<u64>,
}

impl CallbackRegistration {
    fn empty() -> Self {
        Self {
            signal: Weak::new(),
            id: None,
        }
    }

    /// Whether the callback is still pending on its signal.
    pub fn is_active(&self) -> bool {
        match (self.id, self.signal.upgrade()) {
            (Some(id), Some(signal)) => signal.state.lock().callbacks.iter().any(|(c, _)| *c == id),
            _ => false,
        }
    }

    pub fn dispose(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let (Some(id), Some(signal)) = (self.id.take(), self.signal.upgrade()) {
            signal.unregister(id);
        }
    }
}

impl Drop for CallbackRegistration {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for CallbackRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistration")
            .field("id", &self.id)
            .finish()
    }
}

/// The host's application lifetime: the shared coordination point between
/// the host runtime and anything it hosts.
pub struct HostLifetime {
    started: Arc<Signal>,
    stopping: Arc<Signal>,
    stopped: Arc<Signal>,
    stop_requests: AtomicUsize,
}

impl Default for HostLifetime {
    fn default() -> Self {
        Self::new()
    }
}

impl HostLifetime {
    pub fn new() -> Self {
        Self {
            started: Signal::new("started"),
            stopping: Signal::new("stopping"),
            stopped: Signal::new("stopped"),
            stop_requests: AtomicUsize::new(0),
        }
    }

    /// Cancelled once every hosted service has started.
    pub fn application_started(&self) -> &CancellationToken {
        &self.started.token
    }

    /// Cancelled when a stop has been requested.
    pub fn application_stopping(&self) -> &CancellationToken {
        &self.stopping.token
    }

    /// Cancelled once the stop sequence has finished.
    pub fn application_stopped(&self) -> &CancellationToken {
        &self.stopped.token
    }

    pub fn on_started<F>(&self, f: F) -> CallbackRegistration
    where
        F: FnOnce() + Send + 'static,
    {
        self.started.register(Box::new(f))
    }

    pub fn on_stopping<F>(&self, f: F) -> CallbackRegistration
    where
        F: FnOnce() + Send + 'static,
    {
        self.stopping.register(Box::new(f))
    }

    pub fn on_stopped<F>(&self, f: F) -> CallbackRegistration
    where
        F: FnOnce() + Send + 'static,
    {
        self.stopped.register(Box::new(f))
    }

    /// Request the host to stop. Safe from any thread.
    ///
    /// Returns `true` for the caller whose request actually fired the
    /// stopping signal; later callers get `false`.
    pub fn stop_application(&self) -> bool {
        self.stop_requests.fetch_add(1, Ordering::AcqRel);
        let fired = self.stopping.fire();
        if fired {
            tracing::info!("Application stop requested");
        } else {
            tracing::trace!("Application stop already requested");
        }
        fired
    }

    pub fn is_stopping_requested(&self) -> bool {
        self.stopping.is_fired()
    }

    pub fn is_started(&self) -> bool {
        self.started.is_fired()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.is_fired()
    }

    /// Number of `stop_application` calls, effective or not.
    pub fn stop_requests(&self) -> usize {
        self.stop_requests.load(Ordering::Acquire)
    }

    pub(crate) fn notify_started(&self) {
        self.started.fire();
    }

    pub(crate) fn notify_stopped(&self) {
        self.stopped.fire();
    }
}

impl std::fmt::Debug for HostLifetime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostLifetime")
            .field("started", &self.is_started())
            .field("stopping", &self.is_stopping_requested())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn first_stop_request_wins() {
        let lt = HostLifetime::new();
        assert!(!lt.is_stopping_requested());
        assert!(lt.stop_application());
        assert!(!lt.stop_application());
        assert!(lt.is_stopping_requested());
        assert!(lt.application_stopping().is_cancelled());
        assert_eq!(lt.stop_requests(), 2);
    }

    #[test]
    fn stopping_callbacks_run_once() {
        let lt = HostLifetime::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let _reg = lt.on_stopping(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });

        lt.stop_application();
        lt.stop_application();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn late_registration_runs_immediately() {
        let lt = HostLifetime::new();
        lt.stop_application();

        let ran = Arc::new(AtomicBool::new(false));
        let r = ran.clone();
        let reg = lt.on_stopping(move || r.store(true, Ordering::SeqCst));
        assert!(ran.load(Ordering::SeqCst));
        assert!(!reg.is_active());
    }

    #[test]
    fn dropped_registration_is_not_invoked() {
        let lt = HostLifetime::new();
        let ran = Arc::new(AtomicBool::new(false));
        let r = ran.clone();
        let reg = lt.on_stopping(move || r.store(true, Ordering::SeqCst));
        assert!(reg.is_active());
        reg.dispose();

        lt.stop_application();
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn callback_may_request_stop_reentrantly() {
        let lt = Arc::new(HostLifetime::new());
        let inner = lt.clone();
        let _reg = lt.on_stopping(move || {
            // Re-entering from inside the callback must not deadlock.
            assert!(!inner.stop_application());
        });
        assert!(lt.stop_application());
        assert_eq!(lt.stop_requests(), 2);
    }

    #[test]
    fn panicking_callback_does_not_block_others() {
        let lt = HostLifetime::new();
        let ran = Arc::new(AtomicBool::new(false));
        let r = ran.clone();
        let _a = lt.on_stopped(|| panic!("boom"));
        let _b = lt.on_stopped(move || r.store(true, Ordering::SeqCst));
        lt.notify_stopped();
        assert!(ran.load(Ordering::SeqCst));
        assert!(lt.is_stopped());
    }

    #[tokio::test]
    async fn tokens_wake_async_waiters() {
        let lt = Arc::new(HostLifetime::new());
        let waiter = {
            let lt = lt.clone();
            tokio::spawn(async move { lt.application_stopping().cancelled().await })
        };
        lt.stop_application();
        waiter.await.unwrap();
    }
}
