//! The RDS-aware host-list provider: fetches live topology via the
//! dialect's topology query and caches it process-wide under a cluster id
//! (spec.md §4.3, §5).

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;

use super::HostListProvider;
use crate::cache::SlidingExpirationCache;
use crate::dialect::{self, Dialect};
use crate::driver::{DbClient, Driver};
use crate::error::{Error, ErrorKind, Result};
use crate::host_info::{HostInfo, HostInfoBuilder, HostRole};
use crate::topology::Topology;

/// Topology entries are considered fresh for this long before
/// [`RdsHostListProvider::refresh`] re-queries the server.
pub const TOPOLOGY_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// The process-wide cache type shared by every `RdsHostListProvider`
/// instance pointed at the same cluster id (spec.md §5: "Topology cache:
/// process-wide, keyed by clusterId").
pub type TopologyCache = SlidingExpirationCache<String, Topology>;

pub fn new_topology_cache() -> TopologyCache {
    SlidingExpirationCache::new(TOPOLOGY_CACHE_TTL)
}

pub struct RdsHostListProvider {
    cluster_id: String,
    initial_hosts: Vec<Arc<HostInfo>>,
    cache: TopologyCache,
    driver: Arc<dyn Driver>,
    dialect: Arc<dyn Dialect>,
    default_port: u16,
}

impl RdsHostListProvider {
    pub fn new(
        cluster_id: impl Into<String>,
        initial_hosts: Vec<Arc<HostInfo>>,
        cache: TopologyCache,
        driver: Arc<dyn Driver>,
        dialect: Arc<dyn Dialect>,
    ) -> Result<Self> {
        if initial_hosts.is_empty() {
            return Err(Error::new(ErrorKind::IllegalArgument {
                message: "connection string yielded an empty host list".to_string(),
            }));
        }
        let cluster_id = cluster_id.into();
        if cluster_id.is_empty() {
            return Err(Error::new(ErrorKind::IllegalArgument {
                message: "RDS host-list provider requires a non-empty cluster id".to_string(),
            }));
        }
        let default_port = dialect.default_port();
        Ok(Self {
            cluster_id,
            initial_hosts,
            cache,
            driver,
            dialect,
            default_port,
        })
    }

    async fn query_topology(&self, client: &dyn DbClient) -> Result<Topology> {
        let rows = self
            .driver
            .execute_query(client, self.dialect.topology_query())
            .await
            .map_err(|e| {
                Error::new(ErrorKind::TopologyQuery {
                    host: self.cluster_id.clone(),
                    message: e.to_string(),
                })
            })?;

        let topology_rows = self.dialect.parse_topology_rows(&rows)?;
        let filtered = dialect::filter_stale_rows(topology_rows, SystemTime::now());

        let hosts: Vec<Arc<HostInfo>> = filtered
            .into_iter()
            .map(|row| {
                let role = if row.is_writer {
                    HostRole::Writer
                } else {
                    HostRole::Reader
                };
                HostInfoBuilder::new()
                    .host(row.server_id.clone())
                    .port(self.default_port)
                    .host_id(row.server_id)
                    .role(role)
                    .build()
                    .map(Arc::new)
            })
            .collect::<std::result::Result<_, _>>()?;

        Ok(Topology::new(self.cluster_id.clone(), hosts))
    }
}

#[async_trait]
impl HostListProvider for RdsHostListProvider {
    fn initial_hosts(&self) -> Vec<Arc<HostInfo>> {
        self.initial_hosts.clone()
    }

    async fn all_known_hosts(&self) -> Vec<Arc<HostInfo>> {
        match self.cache.get(&self.cluster_id).await {
            Some(topology) => topology.hosts().to_vec(),
            None => self.initial_hosts.clone(),
        }
    }

    fn is_dynamic(&self) -> bool {
        true
    }

    async fn refresh(&self, client: &dyn DbClient) -> Result<Topology> {
        if let Some(cached) = self.cache.get(&self.cluster_id).await {
            return Ok(cached);
        }
        self.force_refresh(client).await
    }

    async fn force_refresh(&self, client: &dyn DbClient) -> Result<Topology> {
        let topology = self.query_topology(client).await?;
        self.cache
            .put(self.cluster_id.clone(), topology.clone(), TOPOLOGY_CACHE_TTL)
            .await;
        Ok(topology)
    }

    /// Queries `client` for its own instance id, then looks it up in the
    /// latest topology. On a miss, forces exactly one refresh before giving
    /// up (spec.md §4.3).
    async fn identify_connection(&self, client: &dyn DbClient) -> Result<Option<Arc<HostInfo>>> {
        let instance_id = self.dialect.identify_self(self.driver.as_ref(), client).await?;

        let topology = self.refresh(client).await?;
        if let Some(host) = find_by_host_id(&topology, &instance_id) {
            return Ok(Some(host));
        }

        let topology = self.force_refresh(client).await?;
        Ok(find_by_host_id(&topology, &instance_id))
    }

    async fn get_host_role(&self, client: &dyn DbClient) -> Result<HostRole> {
        self.dialect.get_host_role(self.driver.as_ref(), client).await
    }
}

fn find_by_host_id(topology: &Topology, instance_id: &str) -> Option<Arc<HostInfo>> {
    topology
        .hosts()
        .iter()
        .find(|h| h.host_id() == Some(instance_id))
        .cloned()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::driver::{Row, Value};
    use std::collections::HashMap;
    use std::sync::Mutex;

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

    struct FakeDriver {
        rows: Mutex<Vec<Row>>,
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl Driver for FakeDriver {
        async fn connect(&self, _host: &HostInfo) -> Result<Arc<dyn DbClient>> {
            Ok(Arc::new(NullClient))
        }
        async fn close(&self, _client: Arc<dyn DbClient>) {}
        async fn execute_query(&self, _client: &dyn DbClient, _sql: &str) -> Result<Vec<Row>> {
            *self.calls.lock().unwrap() += 1;
            Ok(self.rows.lock().unwrap().clone())
        }
        async fn server_version(&self, _client: &dyn DbClient) -> Result<String> {
            Ok("aurora-mysql-8".to_string())
        }
    }

    fn topology_row(server_id: &str, is_writer: bool) -> Row {
        let mut cols = HashMap::new();
        cols.insert("server_id".to_string(), Value::Text(server_id.to_string()));
        cols.insert("is_writer".to_string(), Value::Bool(is_writer));
        Row::new(cols)
    }

    fn host(name: &str) -> Arc<HostInfo> {
        Arc::new(HostInfoBuilder::new().host(name).port(3306).build().unwrap())
    }

    #[tokio::test]
    async fn force_refresh_always_requeries_refresh_uses_cache() {
        let driver = Arc::new(FakeDriver {
            rows: Mutex::new(vec![topology_row("i-1", true), topology_row("i-2", false)]),
            calls: Mutex::new(0),
        });
        let dialect: Arc<dyn Dialect> = Arc::new(crate::dialect::AuroraMysqlDialect);
        let provider = RdsHostListProvider::new(
            "cluster-1",
            vec![host("seed")],
            new_topology_cache(),
            driver.clone(),
            dialect,
        )
        .unwrap();

        let topology = provider.refresh(&NullClient).await.unwrap();
        assert_eq!(topology.hosts().len(), 2);
        assert_eq!(*driver.calls.lock().unwrap(), 1);

        // second refresh hits the cache, no additional query.
        provider.refresh(&NullClient).await.unwrap();
        assert_eq!(*driver.calls.lock().unwrap(), 1);

        // force_refresh always requeries.
        provider.force_refresh(&NullClient).await.unwrap();
        assert_eq!(*driver.calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn empty_initial_hosts_is_fatal() {
        let driver = Arc::new(FakeDriver {
            rows: Mutex::new(vec![]),
            calls: Mutex::new(0),
        });
        let dialect: Arc<dyn Dialect> = Arc::new(crate::dialect::AuroraMysqlDialect);
        let result = RdsHostListProvider::new("cluster-1", vec![], new_topology_cache(), driver, dialect);
        assert!(result.is_err());
    }
}
