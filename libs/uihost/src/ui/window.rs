//! Thread-affine window state.
//!
//! A [`Window`] binds to the thread that creates its native handle (the
//! thread running the message loop). From then on `close` and friends are
//! only accepted from that thread. Closed handlers run after the state
//! change, outside any internal lock, so they may unsubscribe themselves or
//! touch the window again.

use super::error::UiError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The user dismissed the window.
    UserClosing,
    /// The host asked the UI to shut down.
    HostShutdown,
    /// The application is exiting for another reason.
    ApplicationExit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    Closed,
    /// A closing hook vetoed the close.
    Cancelled,
    AlreadyClosed,
}

#[derive(Debug, Clone)]
pub struct ClosedEvent {
    pub window_id: Uuid,
    pub reason: CloseReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum WindowPhase {
    Created = 0,
    Shown = 1,
    Closed = 2,
    Disposed = 3,
}

impl WindowPhase {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => WindowPhase::Created,
            1 => WindowPhase::Shown,
            2 => WindowPhase::Closed,
            _ => WindowPhase::Disposed,
        }
    }
}

/// Subscription id returned by [`Window::subscribe_closed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClosedSubscription(u64);

/// Returns `true` to cancel the close.
type ClosingHook = Arc<dyn Fn(CloseReason) -> bool + Send + Sync>;
type ClosedHandler = Arc<dyn Fn(&ClosedEvent) + Send + Sync>;

#[derive(Default)]
struct Handlers {
    next_id: u64,
    closing: Vec<ClosingHook>,
    closed: Vec<(u64, ClosedHandler)>,
}

pub struct Window {
    id: Uuid,
    title: String,
    phase: AtomicU8,
    owner: Mutex<Option<ThreadId>>,
    handlers: Mutex<Handlers>,
}

impl Window {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            phase: AtomicU8::new(WindowPhase::Created as u8),
            owner: Mutex::new(None),
            handlers: Mutex::new(Handlers::default()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn phase(&self) -> WindowPhase {
        WindowPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn is_disposed(&self) -> bool {
        self.phase() == WindowPhase::Disposed
    }

    pub fn is_closed(&self) -> bool {
        self.phase() >= WindowPhase::Closed
    }

    pub fn has_native_handle(&self) -> bool {
        self.phase() == WindowPhase::Shown
    }

    pub fn owner_thread(&self) -> Option<ThreadId> {
        *self.owner.lock()
    }

    /// Bind the window to the calling thread and create its native handle.
    pub fn create_handle(&self) -> Result<(), UiError> {
        match self.phase() {
            WindowPhase::Disposed => return Err(UiError::Disposed),
            WindowPhase::Closed => {
                return Err(UiError::InvalidMainWindow(format!(
                    "window '{}' is already closed",
                    self.title
                )))
            }
            _ => {}
        }
        {
            let mut owner = self.owner.lock();
            match *owner {
                Some(t) if t != thread::current().id() => {
                    return Err(UiError::CrossThreadAccess {
                        operation: "create_handle",
                    })
                }
                _ => *owner = Some(thread::current().id()),
            }
        }
        let _ = self.phase.compare_exchange(
            WindowPhase::Created as u8,
            WindowPhase::Shown as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        tracing::trace!(window = %self.id, title = %self.title, "Native handle created");
        Ok(())
    }

    /// Register a hook consulted before every non-forced close.
    /// The hook returns `true` to cancel.
    pub fn on_closing<H>(&self, hook: H)
    where
        H: Fn(CloseReason) -> bool + Send + Sync + 'static,
    {
        self.handlers.lock().closing.push(Arc::new(hook));
    }

    pub fn subscribe_closed<H>(&self, handler: H) -> Result<ClosedSubscription, UiError>
    where
        H: Fn(&ClosedEvent) + Send + Sync + 'static,
    {
        if self.is_disposed() {
            return Err(UiError::Disposed);
        }
        let mut h = self.handlers.lock();
        h.next_id += 1;
        let id = h.next_id;
        h.closed.push((id, Arc::new(handler)));
        Ok(ClosedSubscription(id))
    }

    pub fn unsubscribe_closed(&self, sub: ClosedSubscription) -> bool {
        let mut h = self.handlers.lock();
        let before = h.closed.len();
        h.closed.retain(|(id, _)| *id != sub.0);
        h.closed.len() != before
    }

    pub fn closed_subscribers(&self) -> usize {
        self.handlers.lock().closed.len()
    }

    /// Close the window, consulting closing hooks first. UI thread only.
    pub fn close(&self, reason: CloseReason) -> Result<CloseOutcome, UiError> {
        self.check_closable("close")?;
        if self.is_closed() {
            return Ok(CloseOutcome::AlreadyClosed);
        }

        let hooks: Vec<ClosingHook> = self.handlers.lock().closing.clone();
        if hooks.iter().any(|hook| hook(reason)) {
            tracing::debug!(window = %self.id, ?reason, "Close cancelled by closing hook");
            return Ok(CloseOutcome::Cancelled);
        }
        Ok(self.finish_close(reason))
    }

    /// Close without consulting closing hooks. UI thread only.
    pub fn force_close(&self, reason: CloseReason) -> Result<CloseOutcome, UiError> {
        self.check_closable("force_close")?;
        Ok(self.finish_close(reason))
    }

    /// Release the window. Idempotent; callable from any thread.
    pub fn dispose(&self) {
        let prev = self.phase.swap(WindowPhase::Disposed as u8, Ordering::AcqRel);
        if prev == WindowPhase::Disposed as u8 {
            return;
        }
        let mut h = self.handlers.lock();
        h.closing.clear();
        h.closed.clear();
        tracing::trace!(window = %self.id, title = %self.title, "Window disposed");
    }

    fn check_closable(&self, operation: &'static str) -> Result<(), UiError> {
        match self.phase() {
            WindowPhase::Disposed => return Err(UiError::Disposed),
            WindowPhase::Created => return Err(UiError::HandleNotCreated),
            _ => {}
        }
        match self.owner_thread() {
            Some(t) if t == thread::current().id() => Ok(()),
            _ => Err(UiError::CrossThreadAccess { operation }),
        }
    }

    fn finish_close(&self, reason: CloseReason) -> CloseOutcome {
        if self
            .phase
            .compare_exchange(
                WindowPhase::Shown as u8,
                WindowPhase::Closed as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return CloseOutcome::AlreadyClosed;
        }

        let handlers: Vec<ClosedHandler> = self
            .handlers
            .lock()
            .closed
            .iter()
            .map(|(_, h)| h.clone())
            .collect();
        tracing::debug!(window = %self.id, ?reason, handlers = handlers.len(), "Window closed");

        let event = ClosedEvent {
            window_id: self.id,
            reason,
        };
        for handler in handlers {
            handler(&event);
        }
        CloseOutcome::Closed
    }
}

impl std::fmt::Debug for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Window")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("phase", &self.phase())
            .finish()
    }
}
