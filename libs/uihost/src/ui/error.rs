use thiserror::Error;

/// Errors raised by the UI runtime and by thread-affine window operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UiError {
    #[error("window is disposed")]
    Disposed,

    #[error("message loop has already exited")]
    LoopExited,

    #[error("message loop has already run on this runtime")]
    LoopAlreadyRan,

    #[error("'{operation}' must be called on the UI thread")]
    CrossThreadAccess { operation: &'static str },

    #[error("window has no native handle")]
    HandleNotCreated,

    #[error("main window is not usable: {0}")]
    InvalidMainWindow(String),

    #[error("thread preparation failed: {0}")]
    ThreadPreparation(String),
}

impl UiError {
    /// Errors that only mean "the UI is already gone".
    pub fn is_teardown(&self) -> bool {
        matches!(self, UiError::Disposed | UiError::LoopExited)
    }
}

/// Why the UI thread ended abnormally.
#[derive(Debug, Error)]
pub enum UiThreadFault {
    #[error(transparent)]
    Ui(#[from] UiError),

    #[error("UI thread panicked: {0}")]
    Panicked(String),
}

/// Failures observed by the task waiting on the UI thread.
#[derive(Debug, Error)]
pub enum UiThreadError {
    #[error("failed to spawn UI thread")]
    Spawn(#[source] std::io::Error),

    #[error("UI thread faulted")]
    Faulted(#[from] UiThreadFault),

    #[error("waiting for the UI thread was cancelled")]
    Cancelled,

    #[error("UI hosted service was already started")]
    AlreadyStarted,
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
