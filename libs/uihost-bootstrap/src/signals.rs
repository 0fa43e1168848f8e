use anyhow::Result;
use tokio::signal;

/// Resolve once the process is asked to terminate (Ctrl+C, or SIGTERM on unix).
pub async fn wait_for_shutdown() -> Result<()> {
    let ctrl_c = async {
        signal::ctrl_c().await.map_err(|e| {
            tracing::error!(%e, "Failed to install Ctrl+C handler");
            e
        })
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate()).map_err(|e| {
            tracing::error!(%e, "Failed to install SIGTERM handler");
            e
        })?;
        sigterm.recv().await;
        Ok::<(), std::io::Error>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<std::io::Result<()>>();

    let source = tokio::select! {
        result = ctrl_c => { result?; "ctrl_c" },
        result = terminate => { result?; "sigterm" },
    };

    tracing::info!(signal = source, "Termination signal received, requesting host stop");
    Ok(())
}
