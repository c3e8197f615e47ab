//! Writer failover: Task A races a reconnect to the original writer against
//! Task B, which waits for a new writer to be elected via a reader
//! connection (spec.md §4.10).

use std::sync::Arc;
use std::time::Duration;

use crate::dialect::FailoverFlags;
use crate::driver::{DbClient, Driver};
use crate::error::{Error, Result};
use crate::host_info::HostInfo;
use crate::host_list_provider::HostListProvider;
use crate::runtime::{self, CancellationToken};
use crate::topology::Topology;

use super::ReaderFailoverHandler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailoverTask {
    TaskA,
    TaskB,
}

pub struct WriterFailoverResult {
    pub is_connected: bool,
    pub is_new_host: bool,
    pub topology: Option<Topology>,
    pub task_name: Option<FailoverTask>,
    pub client: Option<Arc<dyn DbClient>>,
    pub error: Option<Error>,
}

impl WriterFailoverResult {
    fn failed() -> Self {
        Self {
            is_connected: false,
            is_new_host: false,
            topology: None,
            task_name: None,
            client: None,
            error: None,
        }
    }
}

pub struct WriterFailoverHandler {
    driver: Arc<dyn Driver>,
    reader_handler: Arc<ReaderFailoverHandler>,
    max_failover_timeout: Duration,
    reconnection_writer_interval: Duration,
    read_topology_interval: Duration,
}

impl WriterFailoverHandler {
    pub fn new(
        driver: Arc<dyn Driver>,
        reader_handler: Arc<ReaderFailoverHandler>,
        max_failover_timeout: Duration,
        reconnection_writer_interval: Duration,
        read_topology_interval: Duration,
    ) -> Self {
        Self {
            driver,
            reader_handler,
            max_failover_timeout,
            reconnection_writer_interval,
            read_topology_interval,
        }
    }

    pub async fn failover(
        &self,
        original_topology: &Topology,
        host_list_provider: Arc<dyn HostListProvider>,
        flags: FailoverFlags,
    ) -> WriterFailoverResult {
        let original_writer = original_topology.writer().cloned();
        let token_b = CancellationToken::new();

        let task_b = {
            let driver = self.driver.clone();
            let reader_handler = self.reader_handler.clone();
            let provider = host_list_provider.clone();
            let original_writer = original_writer.clone();
            let read_interval = self.read_topology_interval;
            let topology = original_topology.clone();
            let token = token_b.clone();
            let enable_writer_in_task_b = flags.enable_writer_in_task_b;
            runtime::spawn(async move {
                run_task_b(
                    driver,
                    reader_handler,
                    provider,
                    topology,
                    original_writer,
                    read_interval,
                    token,
                    enable_writer_in_task_b,
                )
                .await
            })
        };

        if flags.disable_task_a {
            let outcome = runtime::timeout(self.max_failover_timeout, task_b).await;
            return match outcome {
                Ok(Ok(result)) => result,
                _ => WriterFailoverResult::failed(),
            };
        }

        let token_a = CancellationToken::new();
        let task_a = {
            let driver = self.driver.clone();
            let provider = host_list_provider.clone();
            let original_writer = original_writer.clone();
            let reconnect_interval = self.reconnection_writer_interval;
            let token = token_a.clone();
            runtime::spawn(async move {
                run_task_a(driver, provider, original_writer, reconnect_interval, token).await
            })
        };

        let token_a_for_b_win = token_a.clone();
        let token_b_for_a_win = token_b.clone();

        let race_future = self.race_tasks(task_a, task_b, token_a_for_b_win, token_b_for_a_win);
        runtime::timeout(self.max_failover_timeout, race_future)
            .await
            .unwrap_or_else(|_| WriterFailoverResult::failed())
    }

    async fn race_tasks(
        &self,
        task_a: tokio::task::JoinHandle<WriterFailoverResult>,
        task_b: tokio::task::JoinHandle<WriterFailoverResult>,
        token_a: CancellationToken,
        token_b: CancellationToken,
    ) -> WriterFailoverResult {
        tokio::select! {
            a = task_a => {
                let a = a.unwrap_or_else(|_| WriterFailoverResult::failed());
                if a.is_connected || a.error.is_some() {
                    token_b.cancel();
                    a
                } else {
                    task_b.await.unwrap_or_else(|_| WriterFailoverResult::failed())
                }
            }
            b = task_b => {
                let b = b.unwrap_or_else(|_| WriterFailoverResult::failed());
                if b.is_connected || b.error.is_some() {
                    token_a.cancel();
                    b
                } else {
                    task_a.await.unwrap_or_else(|_| WriterFailoverResult::failed())
                }
            }
        }
    }
}

async fn run_task_a(
    driver: Arc<dyn Driver>,
    host_list_provider: Arc<dyn HostListProvider>,
    original_writer: Option<Arc<HostInfo>>,
    reconnection_interval: Duration,
    token: CancellationToken,
) -> WriterFailoverResult {
    let Some(original_writer) = original_writer else {
        return WriterFailoverResult::failed();
    };

    loop {
        if !token.sleep(reconnection_interval).await {
            return WriterFailoverResult::failed();
        }

        let client = match driver.connect(&original_writer).await {
            Ok(client) => client,
            Err(_) => continue,
        };

        let topology = match host_list_provider.force_refresh(client.as_ref()).await {
            Ok(topology) => topology,
            Err(_) => {
                driver.close(client).await;
                continue;
            }
        };

        let still_writer = topology
            .writer()
            .map(|w| w.same_endpoint(&original_writer))
            .unwrap_or(false);

        if still_writer {
            return WriterFailoverResult {
                is_connected: true,
                is_new_host: false,
                topology: Some(topology),
                task_name: Some(FailoverTask::TaskA),
                client: Some(client),
                error: None,
            };
        }

        driver.close(client).await;
    }
}

async fn run_task_b(
    driver: Arc<dyn Driver>,
    reader_handler: Arc<ReaderFailoverHandler>,
    host_list_provider: Arc<dyn HostListProvider>,
    original_topology: Topology,
    original_writer: Option<Arc<HostInfo>>,
    read_interval: Duration,
    token: CancellationToken,
    enable_writer_in_task_b: bool,
) -> WriterFailoverResult {
    let reader_result = reader_handler
        .failover(&original_topology, None, host_list_provider.as_ref())
        .await;
    let reader = match reader_result {
        Ok(r) => r,
        Err(e) => {
            return WriterFailoverResult {
                is_connected: false,
                is_new_host: false,
                topology: None,
                task_name: Some(FailoverTask::TaskB),
                client: None,
                error: Some(e),
            }
        }
    };

    loop {
        if !token.sleep(read_interval).await {
            driver.close(reader.client.clone()).await;
            return WriterFailoverResult::failed();
        }

        let topology = match host_list_provider.force_refresh(reader.client.as_ref()).await {
            Ok(topology) => topology,
            Err(_) => continue,
        };

        let Some(new_writer) = topology.writer() else {
            continue;
        };

        let is_same_as_original = original_writer
            .as_ref()
            .map(|w| w.same_endpoint(new_writer))
            .unwrap_or(false);

        if is_same_as_original && !enable_writer_in_task_b {
            continue;
        }

        match driver.connect(new_writer).await {
            Ok(writer_client) => {
                driver.close(reader.client.clone()).await;
                return WriterFailoverResult {
                    is_connected: true,
                    is_new_host: !is_same_as_original,
                    topology: Some(topology),
                    task_name: Some(FailoverTask::TaskB),
                    client: Some(writer_client),
                    error: None,
                };
            }
            Err(_) => continue,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::driver::Row;
    use crate::host_info::{HostInfoBuilder, HostRole};
    use async_trait::async_trait;

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

    struct StubDriver;
    #[async_trait]
    impl Driver for StubDriver {
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

    struct StubProvider;
    #[async_trait]
    impl HostListProvider for StubProvider {
        fn initial_hosts(&self) -> Vec<Arc<HostInfo>> {
            vec![]
        }
        async fn refresh(&self, _client: &dyn DbClient) -> Result<Topology> {
            let writer = Arc::new(
                HostInfoBuilder::new()
                    .host("w")
                    .port(1)
                    .role(HostRole::Writer)
                    .build()
                    .unwrap(),
            );
            Ok(Topology::new("c", vec![writer]))
        }
    }

    #[tokio::test]
    async fn task_a_succeeds_when_original_writer_still_writer() {
        let writer = Arc::new(
            HostInfoBuilder::new()
                .host("w")
                .port(1)
                .role(HostRole::Writer)
                .build()
                .unwrap(),
        );
        let topology = Topology::new("c", vec![writer]);
        let reader_handler = Arc::new(ReaderFailoverHandler::new(
            Arc::new(StubDriver),
            Duration::from_secs(5),
            Duration::from_secs(1),
            false,
        ));
        let handler = WriterFailoverHandler::new(
            Arc::new(StubDriver),
            reader_handler,
            Duration::from_secs(5),
            Duration::from_millis(10),
            Duration::from_millis(10),
        );
        let result = handler
            .failover(&topology, Arc::new(StubProvider), FailoverFlags::default())
            .await;
        assert!(result.is_connected);
    }
}
