use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// A unit of work whose lifetime is driven by the [`Host`](crate::Host).
///
/// Services are started in registration order and stopped in reverse order.
/// `start` should return promptly; long-running work belongs on a spawned
/// task or thread owned by the service.
#[async_trait]
pub trait HostedService: Send + Sync + 'static {
    /// Stable name used in logs and errors.
    fn name(&self) -> &'static str;

    /// The token is cancelled when startup is abandoned (host stopping).
    async fn start(&self, cancel: CancellationToken) -> anyhow::Result<()>;

    /// The token is cancelled when the host's shutdown budget runs out.
    async fn stop(&self, cancel: CancellationToken) -> anyhow::Result<()>;

    /// Release resources after `stop`. Must be idempotent.
    fn dispose(&self) {}
}
