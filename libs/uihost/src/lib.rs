//! # uihost - UI lifecycle bridge for an async service host
//!
//! Runs a single-threaded GUI message loop on a dedicated OS thread and ties
//! its lifetime to an async host:
//!
//! - the host starts, and the UI thread spins up and enters the loop;
//! - the user closes the main form, and the host is asked to stop;
//! - the host stops first, and the close is marshaled onto the UI thread;
//! - stop waits for the UI thread with a bound and reports how it ended.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use uihost::{Form, Host, QueueRuntime, ServiceHub, ShutdownOptions, UiHostingExt, Window};
//!
//! struct MainForm { window: Window }
//!
//! impl Form for MainForm {
//!     fn window(&self) -> &Window { &self.window }
//!     fn create(_hub: &ServiceHub) -> anyhow::Result<Self> {
//!         Ok(Self { window: Window::new("Main") })
//!     }
//! }
//!
//! let host = Host::builder(config)
//!     .configure_services(|s| {
//!         s.add_ui_hosting::<MainForm>(Arc::new(QueueRuntime::new()));
//!     })
//!     .build()?;
//! uihost::run(host, ShutdownOptions::Signals).await?;
//! ```

pub use anyhow::Result;
pub use async_trait::async_trait;

pub mod contracts;
pub mod hub;
pub mod lifetime;
pub mod runtime;
pub mod ui;

pub use contracts::HostedService;
pub use hub::{HubBuildError, ResolveError, ServiceHub, ServiceHubBuilder, ServiceLifetime};
pub use lifetime::{CallbackRegistration, HostLifetime};
pub use runtime::{run, Host, HostBuilder, HostError, ShutdownOptions};
pub use ui::{
    ApplicationContext, CloseOutcome, CloseReason, ClosedEvent, ContextState, Form, FormProvider,
    MessageLoopContext, QueueRuntime, ShutdownRequestHandler, StartupGate, StopOutcome, UiError,
    UiHostedService, UiHostingExt, UiRuntime, UiThreadError, UiThreadFault, UiThreadObserver, UiWork,
    Window,
};
