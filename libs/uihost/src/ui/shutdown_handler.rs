use super::error::{UiError, UiThreadFault};
use super::window::Window;

/// Entry point the host uses to ask the UI to wind down.
///
/// Implementations must be safe to call from any thread, must not block,
/// and must tolerate being called after the UI is already gone.
pub trait ShutdownRequestHandler: Send + Sync + 'static {
    fn request_shutdown_from_host(&self);
}

/// What the dedicated UI thread runs.
pub trait MessageLoopContext: Send + Sync + 'static {
    /// Toolkit per-thread initialization; runs first on the UI thread.
    fn prepare_thread(&self) -> Result<(), UiError>;

    fn main_window(&self) -> &Window;

    /// Fails with [`UiError::InvalidMainWindow`] if the main window cannot
    /// host a message loop.
    fn validate(&self) -> Result<(), UiError>;

    /// Block on the message loop until it exits.
    fn run(&self) -> Result<(), UiError>;
}

/// Optional application hooks for the end of the UI thread.
///
/// Both run on the UI thread itself. `on_ui_fault` fires first when the
/// loop failed or panicked; `on_ui_exit` fires on every exit, before the
/// host is asked to stop. A panicking hook is contained and logged.
pub trait UiThreadObserver: Send + Sync + 'static {
    fn on_ui_exit(&self) {}

    fn on_ui_fault(&self, _fault: &UiThreadFault) {}
}
