//! Enhanced failure monitoring: a background per-host liveness probe, shared
//! across every alias of a host, plus the plugin that races user calls
//! against it (spec.md §4.12).

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lazy_static::lazy_static;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::cache::SlidingExpirationCache;
use crate::driver::{DbClient, Driver};
use crate::error::{Error, ErrorKind, Result};
use crate::host_info::{HostAvailability, HostInfo};
use crate::plugin::{Method, PipelineContext, Plugin};
use crate::runtime::{self, CancellationToken};

use super::context::MonitorConnectionContext;

/// Detection parameters a [`Monitor`] is configured with (spec.md §4.12).
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub failure_detection_time: Duration,
    pub failure_detection_interval: Duration,
    pub failure_detection_count: u32,
    pub monitor_disposal_time: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            failure_detection_time: Duration::from_secs(30),
            failure_detection_interval: Duration::from_secs(5),
            failure_detection_count: 3,
            monitor_disposal_time: Duration::from_secs(60),
        }
    }
}

/// A single host's background liveness probe. Runs for as long as any
/// [`MonitorConnectionContext`] is active against it, then self-disposes
/// after [`MonitorSettings::monitor_disposal_time`] of inactivity.
pub struct Monitor {
    host: Arc<HostInfo>,
    driver: Arc<dyn Driver>,
    settings: MonitorSettings,
    contexts: RwLock<Vec<Arc<MonitorConnectionContext>>>,
    token: CancellationToken,
    handle: StdMutex<Option<JoinHandle<()>>>,
}

impl Monitor {
    pub fn new(host: Arc<HostInfo>, driver: Arc<dyn Driver>, settings: MonitorSettings) -> Arc<Self> {
        let monitor = Arc::new(Self {
            host,
            driver,
            settings,
            contexts: RwLock::new(Vec::new()),
            token: CancellationToken::new(),
            handle: StdMutex::new(None),
        });
        let task_monitor = monitor.clone();
        let handle = runtime::spawn(async move { task_monitor.run().await });
        *monitor.handle.lock().unwrap() = Some(handle);
        monitor
    }

    pub async fn register(&self, ctx: Arc<MonitorConnectionContext>) {
        self.contexts.write().await.push(ctx);
    }

    pub async fn deregister(&self, ctx: &Arc<MonitorConnectionContext>) {
        let mut contexts = self.contexts.write().await;
        contexts.retain(|c| !Arc::ptr_eq(c, ctx));
    }

    pub fn stop(&self) {
        self.token.cancel();
    }

    async fn active_contexts(&self) -> Vec<Arc<MonitorConnectionContext>> {
        self.contexts
            .read()
            .await
            .iter()
            .filter(|c| c.is_active())
            .cloned()
            .collect()
    }

    async fn run(self: Arc<Self>) {
        if !self.token.sleep(self.settings.failure_detection_time).await {
            return;
        }

        let consecutive_failures = AtomicU32::new(0);
        let mut last_active = Instant::now();
        let mut maintenance_client: Option<Arc<dyn DbClient>> = None;
        let mut first_probe = true;

        loop {
            if first_probe {
                first_probe = false;
            } else if !self.token.sleep(self.settings.failure_detection_interval).await {
                return;
            }

            let active = self.active_contexts().await;
            if active.is_empty() {
                if last_active.elapsed() >= self.settings.monitor_disposal_time {
                    return;
                }
            } else {
                last_active = Instant::now();
            }

            if maintenance_client.is_none() {
                maintenance_client = self.driver.connect(&self.host).await.ok();
            }

            let probe_ok = match &maintenance_client {
                Some(client) => self
                    .driver
                    .execute_query(client.as_ref(), "SELECT 1")
                    .await
                    .is_ok(),
                None => false,
            };

            if probe_ok {
                consecutive_failures.store(0, Ordering::SeqCst);
            } else {
                maintenance_client = None;
                let failures = consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.settings.failure_detection_count {
                    for ctx in &active {
                        ctx.set_host_unhealthy();
                    }
                }
            }
        }
    }
}

/// Shares [`Monitor`]s across every alias of a host via a sliding-expiration
/// cache (spec.md §4.12: "monitors shared across aliases of the same
/// host").
pub struct EfmMonitors {
    cache: SlidingExpirationCache<String, Arc<Monitor>>,
    driver: Arc<dyn Driver>,
    settings: MonitorSettings,
}

impl EfmMonitors {
    pub fn new(driver: Arc<dyn Driver>, settings: MonitorSettings) -> Self {
        Self {
            cache: SlidingExpirationCache::with_disposal(
                settings.monitor_disposal_time,
                |_m: &Arc<Monitor>| true,
                |m: Arc<Monitor>| m.stop(),
            ),
            driver,
            settings,
        }
    }

    pub async fn monitor_for(&self, host: &Arc<HostInfo>) -> Arc<Monitor> {
        for alias in host.all_aliases() {
            if let Some(monitor) = self.cache.get(&alias).await {
                return monitor;
            }
        }
        let monitor = Monitor::new(host.clone(), self.driver.clone(), self.settings.clone());
        for alias in host.all_aliases() {
            self.cache
                .put(alias, monitor.clone(), self.settings.monitor_disposal_time)
                .await;
        }
        monitor
    }
}

impl std::fmt::Debug for EfmMonitors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EfmMonitors")
    }
}

lazy_static! {
    /// The process-wide `EfmMonitors`, shared by every `EfmPlugin` regardless
    /// of which `Client` constructed it (spec.md §5: "at most one EFM Monitor
    /// per host key"). `EfmMonitors` already keys its internal cache by host
    /// alias, so one shared instance here is enough to make that policy
    /// process-wide rather than scoped per `Client`; the first `Client` to
    /// request one wins and later callers reuse it, matching
    /// `TOPOLOGY_CACHES`/`CLUSTER_MONITORS` in `src/client/mod.rs`.
    static ref SHARED_EFM_MONITORS: StdMutex<Option<Arc<EfmMonitors>>> = StdMutex::new(None);
}

/// Returns the process-wide [`EfmMonitors`], constructing it from `driver`
/// and `settings` on first use.
pub fn shared_efm_monitors(driver: Arc<dyn Driver>, settings: MonitorSettings) -> Arc<EfmMonitors> {
    let mut slot = SHARED_EFM_MONITORS.lock().unwrap();
    slot.get_or_insert_with(|| Arc::new(EfmMonitors::new(driver, settings)))
        .clone()
}

/// The plugin wrapping `execute` calls with EFM detection (spec.md §4.12).
#[derive(Debug)]
pub struct EfmPlugin {
    monitors: Arc<EfmMonitors>,
}

impl EfmPlugin {
    pub fn new(monitors: Arc<EfmMonitors>) -> Self {
        Self { monitors }
    }
}

#[async_trait]
impl Plugin for EfmPlugin {
    fn name(&self) -> &'static str {
        "efm"
    }

    fn subscribes_to(&self, method: Method) -> bool {
        matches!(method, Method::Execute)
    }

    async fn execute_query(
        &self,
        ctx: &PipelineContext,
        client: &Arc<dyn DbClient>,
        sql: &str,
        next: crate::plugin::pipeline::ExecuteNext<'_>,
    ) -> Result<Vec<crate::driver::Row>> {
        let monitor = self.monitors.monitor_for(&ctx.host_info).await;

        let monitor_context = Arc::new(MonitorConnectionContext::new(
            client,
            ctx.host_info.canonical_alias(),
        ));
        monitor.register(monitor_context.clone()).await;

        let result = tokio::select! {
            result = next.call(ctx, client, sql) => result,
            _ = wait_unhealthy(&monitor_context) => Err(Error::new(ErrorKind::UnavailableHost {
                host: ctx.host_info.canonical_alias(),
                message: "host declared unhealthy by the failure-detection monitor".to_string(),
            })),
        };

        monitor_context.deactivate();
        monitor.deregister(&monitor_context).await;

        if monitor_context.is_host_unhealthy() {
            ctx.host_info.set_availability(HostAvailability::NotAvailable);
            if !client.is_valid() {
                client.abort();
            }
        }

        result
    }
}

async fn wait_unhealthy(ctx: &MonitorConnectionContext) {
    loop {
        if ctx.is_host_unhealthy() || !ctx.is_active() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::driver::Row;
    use crate::host_info::HostInfoBuilder;

    #[derive(Debug)]
    struct NullClient;
    impl DbClient for NullClient {
        fn is_valid(&self) -> bool {
            true
        }
        fn abort(&self) {}
        fn is_in_transaction(&self) -> bool {
            false
        }
    }

    struct AlwaysOkDriver;
    #[async_trait]
    impl Driver for AlwaysOkDriver {
        async fn connect(&self, _host: &HostInfo) -> Result<Arc<dyn DbClient>> {
            Ok(Arc::new(NullClient))
        }
        async fn close(&self, _client: Arc<dyn DbClient>) {}
        async fn execute_query(&self, _client: &dyn DbClient, _sql: &str) -> Result<Vec<Row>> {
            Ok(vec![])
        }
        async fn server_version(&self, _client: &dyn DbClient) -> Result<String> {
            Ok("x".to_string())
        }
    }

    #[tokio::test]
    async fn monitor_is_shared_across_aliases() {
        let host = Arc::new(
            HostInfoBuilder::new()
                .host("db-1")
                .port(1)
                .alias("db-1.internal")
                .build()
                .unwrap(),
        );
        let monitors = EfmMonitors::new(Arc::new(AlwaysOkDriver), MonitorSettings::default());
        let first = monitors.monitor_for(&host).await;
        let second = monitors.monitor_for(&host).await;
        assert!(Arc::ptr_eq(&first, &second));
    }
}
