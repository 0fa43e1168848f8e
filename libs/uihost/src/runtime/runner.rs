//! Host runner.
//!
//! Wires an external shutdown trigger into the host's lifetime and then
//! runs the host's full cycle. Shutdown can be driven by OS signals, an
//! external `CancellationToken`, or an arbitrary future. Whichever trigger
//! fires, the effect is a single `stop_application` call.

use crate::runtime::Host;
use std::{future::Future, pin::Pin};
use tokio_util::sync::CancellationToken;

/// How the runner should decide when to stop.
pub enum ShutdownOptions {
    /// Listen for OS signals (Ctrl+C / SIGTERM).
    Signals,
    /// An external `CancellationToken` controls the lifecycle.
    Token(CancellationToken),
    /// An arbitrary future; when it completes, we initiate shutdown.
    Future(Pin<Box<dyn Future<Output = ()> + Send>>),
    /// Only hosted services (e.g. the UI closing) stop the host.
    None,
}

/// Full cycle with an external shutdown trigger attached.
pub async fn run(host: Host, shutdown: ShutdownOptions) -> anyhow::Result<()> {
    let lifetime = host.lifetime().clone();
    let stopping = lifetime.application_stopping().clone();

    let waiter = match shutdown {
        ShutdownOptions::Signals => Some(tokio::spawn(async move {
            tokio::select! {
                res = uihost_bootstrap::wait_for_shutdown() => {
                    if let Err(e) = res {
                        tracing::warn!(
                            error = %e,
                            "shutdown: primary waiter failed; falling back to ctrl_c()"
                        );
                        let _ = tokio::signal::ctrl_c().await;
                    }
                    lifetime.stop_application();
                }
                _ = stopping.cancelled() => {}
            }
        })),
        ShutdownOptions::Token(token) => {
            tracing::info!("shutdown: external token will control lifecycle");
            Some(tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::info!("shutdown: external token cancelled");
                        lifetime.stop_application();
                    }
                    _ = stopping.cancelled() => {}
                }
            }))
        }
        ShutdownOptions::Future(fut) => Some(tokio::spawn(async move {
            tokio::select! {
                _ = fut => {
                    tracing::info!("shutdown: external future completed");
                    lifetime.stop_application();
                }
                _ = stopping.cancelled() => {}
            }
        })),
        ShutdownOptions::None => None,
    };

    let result = host.run_full_cycle().await;
    if let Some(waiter) = waiter {
        waiter.abort();
    }
    result.map_err(Into::into)
}
