//! UI lifecycle bridge: the dedicated UI thread, its message loop and the
//! two-way shutdown signaling between the loop and the host.

mod app_context;
mod error;
mod form;
mod gate;
mod headless;
mod hosted_service;
mod hosting;
mod provider;
mod shutdown_handler;
mod ui_runtime;
mod window;

pub use app_context::{ApplicationContext, ContextState};
pub use error::{UiError, UiThreadError, UiThreadFault};
pub use form::Form;
pub use gate::{GateDisposed, StartupGate};
pub use headless::{LoopState, QueueRuntime};
pub use hosted_service::{StopOutcome, UiHostedService};
pub use hosting::UiHostingExt;
pub use provider::FormProvider;
pub use shutdown_handler::{MessageLoopContext, ShutdownRequestHandler, UiThreadObserver};
pub use ui_runtime::{UiRuntime, UiWork};
pub use window::{CloseOutcome, CloseReason, ClosedEvent, ClosedSubscription, Window, WindowPhase};
