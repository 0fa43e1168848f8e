//! Host Runtime - drives hosted services through their lifecycle
//!
//! Phase order: **resolve → start → wait → stop → dispose**.
//! The host waits on the lifetime's stopping signal, so a stop can come
//! from anywhere that holds the [`HostLifetime`]: OS signals, a hosted
//! service (the UI closing), or an embedding application.

use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uihost_bootstrap::AppConfig;

use crate::contracts::HostedService;
use crate::hub::{HubBuildError, ResolveError, ServiceHub, ServiceHubBuilder};
use crate::lifetime::HostLifetime;

/// Structured errors for the host lifecycle.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("service registration failed")]
    Build(#[from] HubBuildError),

    #[error("failed to resolve hosted services")]
    Resolve(#[from] ResolveError),

    #[error("start failed for '{service}'")]
    Start {
        service: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

/// Collects configuration and service registrations for a [`Host`].
pub struct HostBuilder {
    config: AppConfig,
    services: ServiceHubBuilder,
    lifetime: Arc<HostLifetime>,
}

impl HostBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            services: ServiceHubBuilder::new(),
            lifetime: Arc::new(HostLifetime::new()),
        }
    }

    pub fn configure_services<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut ServiceHubBuilder),
    {
        f(&mut self.services);
        self
    }

    /// The lifetime the built host will use; handy for stopping it from
    /// outside before `build` returns.
    pub fn lifetime(&self) -> Arc<HostLifetime> {
        self.lifetime.clone()
    }

    pub fn build(self) -> Result<Host, HostError> {
        let Self {
            config,
            mut services,
            lifetime,
        } = self;
        let config = Arc::new(config);

        services
            .add_instance(lifetime.clone())
            .add_instance(config.clone());
        let hub = services.build()?;

        Ok(Host {
            hub,
            lifetime,
            config,
        })
    }
}

/// Host owns the service hub and the application lifetime and runs the
/// hosted services from start to dispose.
pub struct Host {
    hub: Arc<ServiceHub>,
    lifetime: Arc<HostLifetime>,
    config: Arc<AppConfig>,
}

impl Host {
    pub fn builder(config: AppConfig) -> HostBuilder {
        HostBuilder::new(config)
    }

    pub fn services(&self) -> &Arc<ServiceHub> {
        &self.hub
    }

    pub fn lifetime(&self) -> &Arc<HostLifetime> {
        &self.lifetime
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// START phase: services start in registration order. On the first
    /// failure the services already started are stopped in reverse.
    async fn start_services(
        &self,
        services: &[Arc<dyn HostedService>],
    ) -> Result<Vec<Arc<dyn HostedService>>, HostError> {
        tracing::info!(services = services.len(), "Phase: start");
        let startup = self.lifetime.application_stopping().child_token();

        let mut started = Vec::with_capacity(services.len());
        for svc in services {
            tracing::debug!(service = svc.name(), "Starting hosted service");
            if let Err(source) = svc.start(startup.clone()).await {
                tracing::error!(service = svc.name(), error = %source, "Hosted service failed to start");
                self.stop_services(&started).await;
                return Err(HostError::Start {
                    service: svc.name(),
                    source,
                });
            }
            started.push(svc.clone());
        }
        Ok(started)
    }

    /// STOP phase: reverse order, bounded by `host.shutdown_timeout`.
    /// Errors are logged; every service gets its turn.
    async fn stop_services(&self, started: &[Arc<dyn HostedService>]) {
        tracing::info!(services = started.len(), "Phase: stop");
        let budget = CancellationToken::new();
        let timer = {
            let budget = budget.clone();
            let timeout = self.config.host.shutdown_timeout;
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                tracing::warn!(timeout = ?timeout, "Shutdown timeout elapsed; cancelling remaining stops");
                budget.cancel();
            })
        };

        for svc in started.iter().rev() {
            tracing::debug!(service = svc.name(), "Stopping hosted service");
            if let Err(e) = svc.stop(budget.clone()).await {
                tracing::warn!(service = svc.name(), error = %e, "Hosted service failed to stop cleanly");
            }
        }
        timer.abort();
    }

    fn dispose(&self, services: &[Arc<dyn HostedService>]) {
        for svc in services.iter().rev() {
            svc.dispose();
        }
        self.hub.dispose();
    }

    /// Full cycle: resolve → start → wait → stop → dispose.
    pub async fn run_full_cycle(&self) -> Result<(), HostError> {
        tracing::info!(environment = %self.config.host.environment, "Phase: resolve");
        let services = self.hub.hosted_services()?;

        let started = match self.start_services(&services).await {
            Ok(started) => started,
            Err(e) => {
                self.lifetime.stop_application();
                self.lifetime.notify_stopped();
                self.dispose(&services);
                return Err(e);
            }
        };
        self.lifetime.notify_started();
        tracing::info!("Host started");

        tracing::info!("Phase: wait");
        self.lifetime.application_stopping().cancelled().await;

        self.stop_services(&started).await;
        self.lifetime.notify_stopped();
        self.dispose(&services);
        tracing::info!("Host stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail_start: bool,
    }

    #[async_trait]
    impl HostedService for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn start(&self, _cancel: CancellationToken) -> anyhow::Result<()> {
            if self.fail_start {
                anyhow::bail!("refusing to start");
            }
            self.log.lock().push(format!("start:{}", self.name));
            Ok(())
        }

        async fn stop(&self, _cancel: CancellationToken) -> anyhow::Result<()> {
            self.log.lock().push(format!("stop:{}", self.name));
            Ok(())
        }

        fn dispose(&self) {
            self.log.lock().push(format!("dispose:{}", self.name));
        }
    }

    struct First(Recorder);
    struct Second(Recorder);

    macro_rules! delegate {
        ($t:ident) => {
            #[async_trait]
            impl HostedService for $t {
                fn name(&self) -> &'static str {
                    self.0.name()
                }
                async fn start(&self, c: CancellationToken) -> anyhow::Result<()> {
                    self.0.start(c).await
                }
                async fn stop(&self, c: CancellationToken) -> anyhow::Result<()> {
                    self.0.stop(c).await
                }
                fn dispose(&self) {
                    self.0.dispose()
                }
            }
        };
    }
    delegate!(First);
    delegate!(Second);

    fn host(log: &Arc<Mutex<Vec<String>>>, fail_second: bool) -> Host {
        let (l1, l2) = (log.clone(), log.clone());
        Host::builder(AppConfig::default())
            .configure_services(move |s| {
                s.add_hosted_service::<First, _>(move |_| {
                    Ok(Arc::new(First(Recorder {
                        name: "first",
                        log: l1.clone(),
                        fail_start: false,
                    })))
                });
                s.add_hosted_service::<Second, _>(move |_| {
                    Ok(Arc::new(Second(Recorder {
                        name: "second",
                        log: l2.clone(),
                        fail_start: fail_second,
                    })))
                });
            })
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn services_start_in_order_and_stop_in_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let host = host(&log, false);
        let lifetime = host.lifetime().clone();

        let _stopper = lifetime.clone().on_started(move || {
            lifetime.stop_application();
        });
        tokio::time::timeout(Duration::from_secs(5), host.run_full_cycle())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            *log.lock(),
            vec![
                "start:first",
                "start:second",
                "stop:second",
                "stop:first",
                "dispose:second",
                "dispose:first"
            ]
        );
        assert!(host.lifetime().is_stopped());
        assert!(host.services().is_disposed());
    }

    #[tokio::test]
    async fn start_failure_rolls_back_started_services() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let host = host(&log, true);

        let err = host.run_full_cycle().await.unwrap_err();
        assert!(matches!(err, HostError::Start { service: "second", .. }));
        assert_eq!(
            *log.lock(),
            vec!["start:first", "stop:first", "dispose:second", "dispose:first"]
        );
        assert!(host.lifetime().is_stopping_requested());
        assert!(host.lifetime().is_stopped());
    }

    #[test]
    fn builder_registers_lifetime_and_config() {
        let host = Host::builder(AppConfig::default()).build().unwrap();
        let lifetime = host.services().get::<HostLifetime>().unwrap();
        assert!(Arc::ptr_eq(&lifetime, host.lifetime()));
        assert!(host.services().get::<AppConfig>().is_ok());
    }

    #[test]
    fn duplicate_registration_fails_build() {
        let res = Host::builder(AppConfig::default())
            .configure_services(|s| {
                s.add_instance(Arc::new(HostLifetime::new()));
            })
            .build();
        assert!(matches!(res, Err(HostError::Build(_))));
    }
}
