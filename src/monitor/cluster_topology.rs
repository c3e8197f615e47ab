//! The high-frequency cluster topology monitor: a background task that
//! keeps the shared topology cache warm, racing per-host probes to recover
//! from a stale or failed monitoring connection (spec.md §4.11).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

use crate::dialect::Dialect;
use crate::driver::{DbClient, Driver};
use crate::error::{Error, ErrorKind, Result};
use crate::host_list_provider::rds::TopologyCache;
use crate::runtime::{self, CancellationToken};
use crate::topology::Topology;

/// Once panic mode recovers a writer, the monitor refreshes at a higher
/// cadence for this long (spec.md §4.11).
pub const HIGH_REFRESH_WINDOW: Duration = Duration::from_secs(30);
/// Forced-refresh requests made within this long after a panic recovery are
/// served from cache rather than triggering another probe round.
pub const QUIET_WINDOW: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Normal,
    Panic,
}

struct State {
    mode: Mode,
    monitoring_client: Option<Arc<dyn DbClient>>,
    last_panic_recovery: Option<Instant>,
}

/// Keeps `cache[cluster_id]` warm for one cluster. Holds its background task
/// handle and a cancellation token so callers can stop monitoring cleanly.
pub struct ClusterTopologyMonitor {
    cluster_id: String,
    driver: Arc<dyn Driver>,
    dialect: Arc<dyn Dialect>,
    cache: TopologyCache,
    seed_hosts: Vec<Arc<crate::host_info::HostInfo>>,
    refresh_rate: Duration,
    state: RwLock<State>,
    refreshed: watch::Sender<u64>,
    token: CancellationToken,
    handle: StdMutex<Option<JoinHandle<()>>>,
    high_refresh_until: StdMutex<Option<Instant>>,
    panicking: AtomicBool,
}

impl ClusterTopologyMonitor {
    pub fn start(
        cluster_id: impl Into<String>,
        driver: Arc<dyn Driver>,
        dialect: Arc<dyn Dialect>,
        cache: TopologyCache,
        seed_hosts: Vec<Arc<crate::host_info::HostInfo>>,
        refresh_rate: Duration,
    ) -> Arc<Self> {
        let (refreshed, _) = watch::channel(0u64);
        let monitor = Arc::new(Self {
            cluster_id: cluster_id.into(),
            driver,
            dialect,
            cache,
            seed_hosts,
            refresh_rate,
            state: RwLock::new(State {
                mode: Mode::Normal,
                monitoring_client: None,
                last_panic_recovery: None,
            }),
            refreshed,
            token: CancellationToken::new(),
            handle: StdMutex::new(None),
            high_refresh_until: StdMutex::new(None),
            panicking: AtomicBool::new(false),
        });

        let task_monitor = monitor.clone();
        let handle = runtime::spawn(async move { task_monitor.run().await });
        *monitor.handle.lock().unwrap() = Some(handle);
        monitor
    }

    pub fn stop(&self) {
        self.token.cancel();
    }

    fn current_refresh_rate(&self) -> Duration {
        let high_until = *self.high_refresh_until.lock().unwrap();
        match high_until {
            Some(until) if Instant::now() < until => self.refresh_rate.min(Duration::from_millis(100)),
            _ => self.refresh_rate,
        }
    }

    async fn run(self: Arc<Self>) {
        loop {
            if !self.token.sleep(self.current_refresh_rate()).await {
                return;
            }

            let mode = self.state.read().await.mode;
            match mode {
                Mode::Normal => self.run_normal_tick().await,
                Mode::Panic => self.run_panic_round().await,
            }
        }
    }

    async fn run_normal_tick(&self) {
        let client = {
            let state = self.state.read().await;
            state.monitoring_client.clone()
        };

        let client = match client {
            Some(client) => client,
            None => {
                let seed = self
                    .cache
                    .get(&self.cluster_id)
                    .await
                    .and_then(|t| t.hosts().first().cloned())
                    .or_else(|| self.seed_hosts.first().cloned());

                let Some(seed) = seed else {
                    self.enter_panic_mode().await;
                    return;
                };

                match self.driver.connect(&seed).await {
                    Ok(client) => {
                        self.state.write().await.monitoring_client = Some(client.clone());
                        client
                    }
                    Err(_) => {
                        self.enter_panic_mode().await;
                        return;
                    }
                }
            }
        };

        match self
            .driver
            .execute_query(client.as_ref(), self.dialect.topology_query())
            .await
        {
            Ok(rows) => match self.dialect.parse_topology_rows(&rows) {
                Ok(topology_rows) => {
                    let filtered =
                        crate::dialect::filter_stale_rows(topology_rows, std::time::SystemTime::now());
                    self.publish(build_topology(&self.cluster_id, filtered)).await;
                }
                Err(_) => self.enter_panic_mode().await,
            },
            Err(_) => {
                self.state.write().await.monitoring_client = None;
                self.enter_panic_mode().await;
            }
        }
    }

    async fn enter_panic_mode(&self) {
        self.state.write().await.mode = Mode::Panic;
        self.panicking.store(true, Ordering::SeqCst);
    }

    /// Probes every last-known host for a writer, one sub-task per host
    /// raced concurrently; the first to find one wins and the monitor
    /// returns to Normal mode. Losing sub-tasks that are still in flight
    /// once a winner is found are aborted.
    async fn run_panic_round(&self) {
        let Some(topology) = self.cache.get(&self.cluster_id).await else {
            return;
        };
        if topology.is_empty() {
            return;
        }

        let (tx, mut rx) = tokio::sync::mpsc::channel::<Arc<dyn DbClient>>(1);
        let mut handles = Vec::with_capacity(topology.hosts().len());
        for host in topology.hosts().iter().cloned() {
            let driver = self.driver.clone();
            let dialect = self.dialect.clone();
            let tx = tx.clone();
            handles.push(runtime::spawn(async move {
                let Ok(client) = driver.connect(&host).await else {
                    return;
                };
                match dialect.get_host_role(driver.as_ref(), client.as_ref()).await {
                    Ok(crate::host_info::HostRole::Writer) => {
                        let _ = tx.send(client).await;
                    }
                    _ => driver.close(client).await,
                }
            }));
        }
        drop(tx);

        let winner = rx.recv().await;
        for handle in &handles {
            handle.abort();
        }

        if let Some(client) = winner {
            let mut state = self.state.write().await;
            state.monitoring_client = Some(client);
            state.mode = Mode::Normal;
            state.last_panic_recovery = Some(Instant::now());
            drop(state);
            *self.high_refresh_until.lock().unwrap() = Some(Instant::now() + HIGH_REFRESH_WINDOW);
            self.panicking.store(false, Ordering::SeqCst);
        }
    }

    async fn publish(&self, topology: Topology) {
        crate::trace::tracing_debug!(
            target: crate::trace::TOPOLOGY_TRACING_EVENT_TARGET,
            cluster_id = self.cluster_id.as_str(),
            "cluster topology refreshed"
        );
        self.cache
            .put(self.cluster_id.clone(), topology, self.refresh_rate * 10)
            .await;
        let next = *self.refreshed.borrow() + 1;
        let _ = self.refreshed.send(next);
    }

    /// Requests an out-of-band refresh. Within the post-panic quiet window,
    /// returns the cached topology instead of triggering another probe round
    /// (spec.md §4.11).
    pub async fn force_monitoring_refresh(
        &self,
        verify_writer: bool,
        timeout: Duration,
    ) -> Result<Topology> {
        let in_quiet_window = {
            let state = self.state.read().await;
            state
                .last_panic_recovery
                .map(|t| t.elapsed() < QUIET_WINDOW)
                .unwrap_or(false)
        };

        if in_quiet_window {
            if let Some(topology) = self.cache.get(&self.cluster_id).await {
                return Ok(topology);
            }
        }

        if verify_writer {
            self.state.write().await.monitoring_client = None;
        }

        let mut rx = self.refreshed.subscribe();
        let wait = async {
            let _ = rx.changed().await;
        };
        match runtime::timeout(timeout, wait).await {
            Ok(()) => self.cache.get(&self.cluster_id).await.ok_or_else(|| {
                Error::new(ErrorKind::TopologyQuery {
                    host: self.cluster_id.clone(),
                    message: "topology cache was not refreshed in time".to_string(),
                })
            }),
            Err(_) => Err(Error::new(ErrorKind::Timeout {
                host: Some(self.cluster_id.clone()),
                elapsed: timeout,
            })),
        }
    }
}

fn build_topology(cluster_id: &str, rows: Vec<crate::dialect::TopologyRow>) -> Topology {
    use crate::host_info::{HostInfoBuilder, HostRole};
    let hosts = rows
        .into_iter()
        .map(|row| {
            let role = if row.is_writer {
                HostRole::Writer
            } else {
                HostRole::Reader
            };
            Arc::new(
                HostInfoBuilder::new()
                    .host(row.server_id.clone())
                    .host_id(row.server_id)
                    .role(role)
                    .build()
                    .expect("topology row always carries a non-empty server id"),
            )
        })
        .collect();
    Topology::new(cluster_id.to_string(), hosts)
}
