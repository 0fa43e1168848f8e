use anyhow::Result;
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use uihost_bootstrap::{AppConfig, CliArgs};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use uihost::{
    run, CloseReason, Form, FormProvider, Host, QueueRuntime, ShutdownOptions, UiHostingExt,
    UiRuntime, UiThreadObserver,
};

mod forms;
use forms::{DemoOptions, ExitReporter, MainForm, SettingsForm};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// uihost demo - a headless main form hosted on a dedicated UI thread
#[derive(Parser)]
#[command(name = "uihost-demo")]
#[command(about = "uihost demo - a headless main form hosted on a dedicated UI thread")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print effective configuration (YAML) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Host environment name (overrides config)
    #[arg(long)]
    environment: Option<String>,

    /// How long stop waits for the UI thread, e.g. "5s" (overrides config)
    #[arg(long, value_parser = humantime::parse_duration)]
    stop_timeout: Option<Duration>,

    /// Close the main form as a user would after this delay, e.g. "3s"
    #[arg(long, value_parser = humantime::parse_duration)]
    auto_close: Option<Duration>,

    /// Main form refuses host-initiated closes
    #[arg(long)]
    confirm_exit: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the host and the UI
    Run,
    /// Validate configuration and exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Prepare CLI args that flow into AppConfig merge logic.
    let args = CliArgs {
        config: cli.config.as_ref().map(|p| p.to_string_lossy().to_string()),
        print_config: cli.print_config,
        verbose: cli.verbose,
        environment: cli.environment.clone(),
        stop_timeout: cli.stop_timeout,
    };

    // Layered config:
    // 1) defaults -> 2) YAML (if provided) -> 3) env (APP__*) -> 4) CLI overrides
    // Also normalizes + creates host.home_dir.
    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    config.apply_cli_overrides(&args);

    let logging_config = config.logging.as_ref().cloned().unwrap_or_default();
    uihost_bootstrap::logging::init_logging_unified(&logging_config, &config.home_dir());

    tracing::info!(environment = %config.host.environment, "uihost demo starting");

    if cli.print_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    let options = DemoOptions {
        auto_close: cli.auto_close,
        confirm_exit: cli.confirm_exit,
    };

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_host(config, options).await,
        Commands::Check => check_config(config),
    }
}

async fn run_host(config: AppConfig, options: DemoOptions) -> Result<()> {
    let runtime = Arc::new(QueueRuntime::new());
    let ui: Arc<dyn UiRuntime> = runtime.clone();
    let auto_close = options.auto_close;

    let host = Host::builder(config)
        .configure_services(|s| {
            s.add_instance(Arc::new(options));
            forms::register_settings_form(s);
            s.add_instance::<dyn UiThreadObserver>(Arc::new(ExitReporter));
            s.add_ui_hosting::<MainForm>(ui);
        })
        .build()?;

    let main_form = host.services().get::<MainForm>()?;
    let provider = host.services().get::<FormProvider>()?;
    let lifetime = host.lifetime().clone();

    // Once the loop is up, open the settings form through the provider.
    {
        let runtime = runtime.clone();
        let started = lifetime.application_started().clone();
        tokio::spawn(async move {
            started.cancelled().await;
            let posted = runtime.invoke_on_ui_thread(Box::new(move || {
                match provider.get_form::<SettingsForm>() {
                    Ok(settings) => tracing::info!(
                        title = settings.window().title(),
                        window = %settings.window().id(),
                        "Settings form opened"
                    ),
                    Err(e) => tracing::warn!(error = %e, "Could not open settings form"),
                }
            }));
            if let Err(e) = posted {
                tracing::debug!(error = %e, "UI already gone; settings form not opened");
            }
        });
    }

    if let Some(delay) = auto_close {
        let runtime = runtime.clone();
        let started = lifetime.application_started().clone();
        tokio::spawn(async move {
            started.cancelled().await;
            tokio::time::sleep(delay).await;
            tracing::info!(after = ?delay, "Auto-closing the main form");
            let posted = runtime.invoke_on_ui_thread(Box::new(move || {
                if let Err(e) = main_form.window().close(CloseReason::UserClosing) {
                    tracing::warn!(error = %e, "Auto-close failed");
                }
            }));
            if let Err(e) = posted {
                tracing::debug!(error = %e, "UI already gone; nothing to auto-close");
            }
        });
    }

    tracing::info!("Close the main form or press Ctrl+C to stop");
    run(host, ShutdownOptions::Signals).await
}

fn check_config(config: AppConfig) -> Result<()> {
    tracing::info!("Checking configuration…");
    // If load_layered/load_or_default succeeded and home_dir normalized, we're good.
    println!("Configuration is valid");
    println!("{}", config.to_yaml()?);
    Ok(())
}
