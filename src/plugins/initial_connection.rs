//! Initial-connection-strategy and stale-DNS handling (spec.md §4.14): when
//! connecting through a cluster DNS endpoint, verify the connection actually
//! landed on a host of the expected role, and retry against the identified
//! host if a (possibly stale) DNS resolution sent it to the wrong one.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::driver::{DbClient, Driver};
use crate::error::Result;
use crate::host_info::HostRole;
use crate::host_list_provider::HostListProvider;
use crate::plugin::pipeline::ConnectNext;
use crate::plugin::{Method, PipelineContext, Plugin};
use crate::url_classifier::{self, RdsUrlType};

#[derive(Debug)]
pub struct InitialConnectionPlugin {
    host_list_provider: Arc<dyn HostListProvider>,
    driver: Arc<dyn Driver>,
    retry_timeout: Duration,
    retry_interval: Duration,
}

impl InitialConnectionPlugin {
    pub fn new(
        host_list_provider: Arc<dyn HostListProvider>,
        driver: Arc<dyn Driver>,
        retry_timeout: Duration,
        retry_interval: Duration,
    ) -> Self {
        Self {
            host_list_provider,
            driver,
            retry_timeout,
            retry_interval,
        }
    }

    /// Connects through `next`, then re-dials against the identified host
    /// while the connection keeps landing on the wrong role, up to
    /// `retry_timeout`. Login failures are never retried (spec.md §4.14).
    async fn connect_matching_role(
        &self,
        ctx: &PipelineContext,
        next: ConnectNext<'_>,
        want: HostRole,
    ) -> Result<Arc<dyn DbClient>> {
        let deadline = Instant::now() + self.retry_timeout;
        let mut client = next.call(ctx).await?;

        loop {
            let identified = self
                .host_list_provider
                .identify_connection(client.as_ref())
                .await
                .ok()
                .flatten();

            let identified_host = match identified {
                // Couldn't identify the connected host at all (unsupported
                // provider, or the query failed outright); use what we have.
                None => return Ok(client),
                Some(host) => host,
            };

            if identified_host.role() == want || identified_host.role() == HostRole::Unknown {
                return Ok(client);
            }

            // Stale DNS: we landed on the wrong member. Look at a freshly
            // forced topology before deciding whether to keep retrying.
            let topology = match self.host_list_provider.force_refresh(client.as_ref()).await {
                Ok(topology) => topology,
                Err(_) => return Ok(client),
            };

            let target = match want {
                HostRole::Writer => topology.writer().cloned(),
                _ => topology.readers().first().copied().cloned(),
            };

            let Some(target) = target else {
                // No host of the wanted role exists in the cluster at all
                // (e.g. a reader-cluster endpoint with zero readers); keep
                // the connection we already have as a last resort.
                return Ok(client);
            };

            if Instant::now() >= deadline {
                return Ok(client);
            }

            self.driver.close(client).await;
            tokio::time::sleep(self.retry_interval).await;
            client = self.driver.connect(&target).await?;
        }
    }
}

#[async_trait]
impl Plugin for InitialConnectionPlugin {
    fn name(&self) -> &'static str {
        "initial_connection"
    }

    fn subscribes_to(&self, method: Method) -> bool {
        matches!(method, Method::Connect | Method::ForceConnect)
    }

    async fn execute_connect(
        &self,
        ctx: &PipelineContext,
        next: ConnectNext<'_>,
    ) -> Result<Arc<dyn DbClient>> {
        match url_classifier::classify(ctx.host_info.host()) {
            RdsUrlType::RdsWriterCluster => {
                self.connect_matching_role(ctx, next, HostRole::Writer).await
            }
            RdsUrlType::RdsReaderCluster => {
                self.connect_matching_role(ctx, next, HostRole::Reader).await
            }
            _ => next.call(ctx).await,
        }
    }

    async fn execute_force_connect(
        &self,
        ctx: &PipelineContext,
        next: ConnectNext<'_>,
    ) -> Result<Arc<dyn DbClient>> {
        self.execute_connect(ctx, next).await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::driver::Row;
    use crate::host_info::{HostAvailability, HostInfo, HostInfoBuilder};
    use crate::topology::Topology;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

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

    /// A driver that always succeeds; used so the test can focus on the
    /// identify/retry loop rather than connection failures.
    struct AlwaysOkDriver {
        connect_calls: AtomicUsize,
    }
    #[async_trait]
    impl Driver for AlwaysOkDriver {
        async fn connect(&self, _host: &HostInfo) -> Result<Arc<dyn DbClient>> {
            self.connect_calls.fetch_add(1, Ordering::SeqCst);
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

    /// Reports the connection as landing on a reader the first time it's
    /// asked, then as the writer afterwards, simulating a stale-DNS
    /// resolution that has since corrected itself.
    struct FlakyIdentifyProvider {
        writer: Arc<HostInfo>,
        reader: Arc<HostInfo>,
        asked: AtomicUsize,
    }
    #[async_trait]
    impl HostListProvider for FlakyIdentifyProvider {
        fn initial_hosts(&self) -> Vec<Arc<HostInfo>> {
            vec![self.writer.clone()]
        }
        async fn refresh(&self, _client: &dyn DbClient) -> Result<Topology> {
            Ok(Topology::new("c", vec![self.writer.clone(), self.reader.clone()]))
        }
        async fn identify_connection(&self, _client: &dyn DbClient) -> Result<Option<Arc<HostInfo>>> {
            let n = self.asked.fetch_add(1, Ordering::SeqCst);
            Ok(Some(if n == 0 {
                self.reader.clone()
            } else {
                self.writer.clone()
            }))
        }
    }

    fn ctx_for(host: &Arc<HostInfo>) -> PipelineContext {
        PipelineContext::new(host.clone(), HashMap::new())
    }

    #[tokio::test]
    async fn retries_against_identified_writer_after_stale_dns() {
        let writer = Arc::new(
            HostInfoBuilder::new()
                .host("db-writer.cluster-abc.us-east-1.rds.amazonaws.com")
                .port(5432)
                .role(HostRole::Writer)
                .availability(HostAvailability::Available)
                .build()
                .unwrap(),
        );
        let reader = Arc::new(
            HostInfoBuilder::new()
                .host("db-1")
                .port(5432)
                .role(HostRole::Reader)
                .build()
                .unwrap(),
        );
        let driver = Arc::new(AlwaysOkDriver {
            connect_calls: AtomicUsize::new(0),
        });
        let provider = Arc::new(FlakyIdentifyProvider {
            writer: writer.clone(),
            reader,
            asked: AtomicUsize::new(0),
        });
        let plugin: Arc<dyn Plugin> = Arc::new(InitialConnectionPlugin::new(
            provider,
            driver.clone(),
            Duration::from_secs(5),
            Duration::from_millis(1),
        ));
        let pipeline_driver: Arc<dyn Driver> = driver.clone();
        let pipeline = crate::plugin::Pipeline::new(vec![plugin], pipeline_driver);
        let ctx = ctx_for(&writer);
        let result = pipeline.connect(&ctx).await;
        assert!(result.is_ok());
        assert_eq!(driver.connect_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_cluster_endpoint_passes_through() {
        let host = Arc::new(HostInfoBuilder::new().host("127.0.0.1").port(5432).build().unwrap());
        let driver = Arc::new(AlwaysOkDriver {
            connect_calls: AtomicUsize::new(0),
        });
        let provider = Arc::new(FlakyIdentifyProvider {
            writer: host.clone(),
            reader: host.clone(),
            asked: AtomicUsize::new(0),
        });
        let plugin: Arc<dyn Plugin> = Arc::new(InitialConnectionPlugin::new(
            provider,
            driver.clone(),
            Duration::from_secs(5),
            Duration::from_millis(1),
        ));
        let pipeline_driver: Arc<dyn Driver> = driver.clone();
        let pipeline = crate::plugin::Pipeline::new(vec![plugin], pipeline_driver);
        let ctx = ctx_for(&host);
        pipeline.connect(&ctx).await.unwrap();
        assert_eq!(driver.connect_calls.load(Ordering::SeqCst), 1);
    }
}
