use std::sync::Arc;
use std::time::Duration;

use uihost::{CloseReason, Form, ServiceHub, UiThreadFault, UiThreadObserver, Window};

/// Demo knobs coming from the command line.
#[derive(Debug, Clone, Default)]
pub struct DemoOptions {
    /// Close the main form as a user would, after this delay.
    pub auto_close: Option<Duration>,
    /// Main form vetoes host-initiated closes ("unsaved changes").
    pub confirm_exit: bool,
}

pub struct MainForm {
    window: Window,
}

impl Form for MainForm {
    fn window(&self) -> &Window {
        &self.window
    }

    fn create(hub: &ServiceHub) -> anyhow::Result<Self> {
        let options = hub.get::<DemoOptions>()?;
        let window = Window::new("uihost demo");

        if options.confirm_exit {
            window.on_closing(|reason| {
                let veto = reason == CloseReason::HostShutdown;
                if veto {
                    tracing::info!("Main form: unsaved changes, refusing host close");
                }
                veto
            });
        }

        window.on_closing(|reason| {
            tracing::info!(?reason, "Main form closing");
            false
        });

        Ok(Self { window })
    }
}

/// Secondary window, registered as transient and opened through the
/// form provider.
pub struct SettingsForm {
    window: Window,
}

impl Form for SettingsForm {
    fn window(&self) -> &Window {
        &self.window
    }

    fn create(_hub: &ServiceHub) -> anyhow::Result<Self> {
        Ok(Self {
            window: Window::new("Settings"),
        })
    }
}

pub fn register_settings_form(s: &mut uihost::ServiceHubBuilder) {
    s.add_transient::<SettingsForm, _>(|hub| Ok(Arc::new(SettingsForm::create(hub)?)));
}

/// Reports how the UI thread ended.
pub struct ExitReporter;

impl UiThreadObserver for ExitReporter {
    fn on_ui_exit(&self) {
        tracing::info!("UI thread exited");
    }

    fn on_ui_fault(&self, fault: &UiThreadFault) {
        tracing::error!(error = %fault, "UI thread fault");
    }
}
