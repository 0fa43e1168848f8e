use super::error::UiError;
use super::window::{CloseOutcome, CloseReason, Window};

/// Work marshaled onto the UI thread.
pub type UiWork = Box<dyn FnOnce() + Send + 'static>;

/// Adapter over a single-threaded GUI toolkit.
///
/// `run_message_loop` blocks the calling thread until the loop is torn
/// down. `request_close` and `exit_message_loop` are only valid on the loop
/// thread; `invoke_on_ui_thread` is the way to get there from anywhere else.
pub trait UiRuntime: Send + Sync + 'static {
    /// Per-thread toolkit initialization, run on the UI thread before the
    /// loop starts.
    fn prepare_thread(&self) -> Result<(), UiError> {
        Ok(())
    }

    fn run_message_loop(&self, root: &Window) -> Result<(), UiError>;

    fn exit_message_loop(&self) -> Result<(), UiError>;

    /// Schedule `work` on the UI thread. Never blocks. Work posted before
    /// the loop starts runs once it does, after the root handle exists.
    fn invoke_on_ui_thread(&self, work: UiWork) -> Result<(), UiError>;

    fn request_close(&self, window: &Window, reason: CloseReason) -> Result<CloseOutcome, UiError> {
        window.close(reason)
    }
}
