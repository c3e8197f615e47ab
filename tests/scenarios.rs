//! End-to-end scenarios with literal values, one test per concrete scenario
//! in spec.md §8 (S1, endpoint classification, is covered inline by
//! `url_classifier`'s own test module).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use cluster_wrapper::dialect::FailoverFlags;
use cluster_wrapper::driver::{DbClient, Driver, Row};
use cluster_wrapper::error::Result;
use cluster_wrapper::failover::{ReaderFailoverHandler, WriterFailoverHandler};
use cluster_wrapper::host_info::{HostAvailability, HostInfo, HostInfoBuilder, HostRole};
use cluster_wrapper::host_list_provider::HostListProvider;
use cluster_wrapper::monitor::efm::{EfmMonitors, EfmPlugin, MonitorSettings};
use cluster_wrapper::plugin::{Pipeline, PipelineContext, Plugin};
use cluster_wrapper::selector::{HostSelector, RoundRobinSelector};
use cluster_wrapper::topology::Topology;

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

fn reader(name: &str, availability: HostAvailability) -> Arc<HostInfo> {
    Arc::new(
        HostInfoBuilder::new()
            .host(name)
            .port(5432)
            .role(HostRole::Reader)
            .availability(availability)
            .build()
            .unwrap(),
    )
}

fn writer(name: &str) -> Arc<HostInfo> {
    Arc::new(
        HostInfoBuilder::new()
            .host(name)
            .port(5432)
            .role(HostRole::Writer)
            .availability(HostAvailability::Available)
            .build()
            .unwrap(),
    )
}

/// S2 — Round-robin with weights: hosts `[A, B]` both AVAILABLE, property
/// `"A:3,B:1"`, default weight 1. Successive selections: A, A, A, B, ...
#[tokio::test]
async fn s2_round_robin_with_weights() {
    let hosts = vec![
        reader("A", HostAvailability::Available),
        reader("B", HostAvailability::Available),
    ];
    let selector = RoundRobinSelector::new("s2-cluster");
    let mut props = HashMap::new();
    props.insert("round_robin_host_weight_pairs".to_string(), "A:3,B:1".to_string());

    let mut picks = Vec::new();
    for _ in 0..8 {
        let host = selector.get_host(&hosts, HostRole::Reader, &props).await.unwrap();
        picks.push(host.host().to_string());
    }
    assert_eq!(picks, vec!["A", "A", "A", "B", "A", "A", "A", "B"]);
}

/// S3 — Round-robin fallback: hosts `[A, B, C]`, no weight-pair property.
/// Successive selections cycle alphabetically by host.
#[tokio::test]
async fn s3_round_robin_fallback_cycles_alphabetically() {
    let hosts = vec![
        reader("C", HostAvailability::Available),
        reader("A", HostAvailability::Available),
        reader("B", HostAvailability::Available),
    ];
    let selector = RoundRobinSelector::new("s3-cluster");
    let props = HashMap::new();

    let mut picks = Vec::new();
    for _ in 0..6 {
        let host = selector.get_host(&hosts, HostRole::Reader, &props).await.unwrap();
        picks.push(host.host().to_string());
    }
    assert_eq!(picks, vec!["A", "B", "C", "A", "B", "C"]);
}

/// S4 — Reader failover strict mode: topology `[W, R1(available),
/// R2(not available)]`, `strictReader=true`. R1 connects quickly; W is
/// never returned.
struct S4Driver;

#[async_trait]
impl Driver for S4Driver {
    async fn connect(&self, host: &HostInfo) -> Result<Arc<dyn DbClient>> {
        if host.host() == "R2" {
            return Err(cluster_wrapper::error::Error::new(
                cluster_wrapper::error::ErrorKind::Network {
                    host: host.host().to_string(),
                    message: "unreachable".to_string(),
                },
            ));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
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

struct S4Provider {
    topology: Topology,
}

#[async_trait]
impl HostListProvider for S4Provider {
    fn initial_hosts(&self) -> Vec<Arc<HostInfo>> {
        self.topology.hosts().to_vec()
    }
    async fn refresh(&self, _client: &dyn DbClient) -> Result<Topology> {
        Ok(self.topology.clone())
    }
    async fn force_refresh(&self, _client: &dyn DbClient) -> Result<Topology> {
        Ok(self.topology.clone())
    }
}

#[tokio::test]
async fn s4_reader_failover_strict_mode_never_returns_writer() {
    let w = writer("W");
    let r1 = reader("R1", HostAvailability::Available);
    let r2 = reader("R2", HostAvailability::NotAvailable);
    let topology = Topology::new("s4-cluster", vec![w, r1.clone(), r2]);

    let driver = Arc::new(S4Driver);
    let provider = S4Provider {
        topology: topology.clone(),
    };
    let handler = ReaderFailoverHandler::new(
        driver,
        Duration::from_secs(5),
        Duration::from_secs(2),
        true,
    );

    let result = handler.failover(&topology, None, &provider).await.unwrap();
    assert!(result.is_connected);
    assert_eq!(result.host.host(), "R1");
}

/// S5 — Writer failover, new writer elected: Task A never succeeds
/// (original writer unreachable), Task B connects a reader, observes the
/// new writer, and connects to it.
struct S5Driver;

#[async_trait]
impl Driver for S5Driver {
    async fn connect(&self, host: &HostInfo) -> Result<Arc<dyn DbClient>> {
        if host.host() == "Wold" {
            return Err(cluster_wrapper::error::Error::new(
                cluster_wrapper::error::ErrorKind::Network {
                    host: host.host().to_string(),
                    message: "unreachable".to_string(),
                },
            ));
        }
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

struct S5Provider {
    new_topology: Topology,
}

#[async_trait]
impl HostListProvider for S5Provider {
    fn initial_hosts(&self) -> Vec<Arc<HostInfo>> {
        vec![]
    }
    async fn refresh(&self, _client: &dyn DbClient) -> Result<Topology> {
        Ok(self.new_topology.clone())
    }
    async fn force_refresh(&self, _client: &dyn DbClient) -> Result<Topology> {
        Ok(self.new_topology.clone())
    }
}

#[tokio::test]
async fn s5_writer_failover_elects_new_writer() {
    let w_old = writer("Wold");
    let r1 = reader("R1", HostAvailability::Available);
    let r2 = reader("R2", HostAvailability::Available);
    let original_topology = Topology::new("s5-cluster", vec![w_old, r1.clone(), r2.clone()]);

    let w_new = writer("Wnew");
    let new_topology = Topology::new("s5-cluster", vec![w_new, r1, r2]);

    let driver = Arc::new(S5Driver);
    let reader_handler = Arc::new(ReaderFailoverHandler::new(
        driver.clone(),
        Duration::from_secs(5),
        Duration::from_secs(1),
        false,
    ));
    let handler = WriterFailoverHandler::new(
        driver,
        reader_handler,
        Duration::from_secs(5),
        Duration::from_millis(20),
        Duration::from_millis(20),
    );
    let provider: Arc<dyn HostListProvider> = Arc::new(S5Provider { new_topology });

    let result = handler
        .failover(&original_topology, provider, FailoverFlags::default())
        .await;

    assert!(result.is_connected);
    assert!(result.is_new_host);
    let topology = result.topology.expect("new topology observed");
    assert_eq!(topology.writer().unwrap().host(), "Wnew");
}

/// S6 — EFM abort: `failureDetectionTimeMs=1000`,
/// `failureDetectionIntervalMs=500`, `failureDetectionCount=3`. The probe
/// fails three times in a row; the user's call is aborted and the host is
/// marked unavailable.
struct S6Driver;

#[async_trait]
impl Driver for S6Driver {
    async fn connect(&self, _host: &HostInfo) -> Result<Arc<dyn DbClient>> {
        Ok(Arc::new(NullClient))
    }
    async fn close(&self, _client: Arc<dyn DbClient>) {}
    async fn execute_query(&self, _client: &dyn DbClient, sql: &str) -> Result<Vec<Row>> {
        if sql == "SELECT 1" {
            return Err(cluster_wrapper::error::Error::new(
                cluster_wrapper::error::ErrorKind::Network {
                    host: "h".to_string(),
                    message: "probe failed".to_string(),
                },
            ));
        }
        std::future::pending::<()>().await;
        unreachable!()
    }
    async fn server_version(&self, _client: &dyn DbClient) -> Result<String> {
        Ok("x".to_string())
    }
}

#[tokio::test(start_paused = true)]
async fn s6_efm_aborts_hung_call_and_marks_host_unavailable() {
    let driver = Arc::new(S6Driver);
    let settings = MonitorSettings {
        failure_detection_time: Duration::from_millis(1000),
        failure_detection_interval: Duration::from_millis(500),
        failure_detection_count: 3,
        monitor_disposal_time: Duration::from_secs(60),
    };
    let monitors = Arc::new(EfmMonitors::new(driver.clone(), settings));
    let plugin: Arc<dyn Plugin> = Arc::new(EfmPlugin::new(monitors));
    let pipeline = Pipeline::new(vec![plugin], driver);

    let host = Arc::new(
        HostInfoBuilder::new()
            .host("h")
            .port(1)
            .role(HostRole::Reader)
            .availability(HostAvailability::Available)
            .build()
            .unwrap(),
    );
    let ctx = PipelineContext::new(host.clone(), HashMap::new());
    let client: Arc<dyn DbClient> = Arc::new(NullClient);

    let result = pipeline.execute_query(&ctx, &client, "SELECT * FROM t").await;

    assert!(result.is_err());
    let err = result.unwrap_err();
    assert!(matches!(
        err.kind(),
        cluster_wrapper::error::ErrorKind::UnavailableHost { .. }
    ));
    assert_eq!(host.raw_availability(), HostAvailability::NotAvailable);
}
