//! The plugin that turns a broken connection into a typed failover outcome
//! (spec.md §4.13): it requires a dynamic host-list provider, opportunistically
//! refreshes topology ahead of a query, and on a failover-indicating error
//! runs reader or writer failover depending on [`FailoverMode`] and whether a
//! transaction was open.

use std::collections::HashSet;
use std::sync::{Arc, RwLock as StdRwLock, Weak};

use async_trait::async_trait;

use crate::dialect::Dialect;
use crate::driver::{DbClient, Row};
use crate::error::{Error, ErrorKind, Result};
use crate::failover::{FailoverMode, ReaderFailoverHandler, WriterFailoverHandler};
use crate::host_info::{HostAvailability, HostInfo};
use crate::host_list_provider::HostListProvider;
use crate::plugin::pipeline::ExecuteNext;
use crate::plugin::{HostChangeOption, Method, PipelineContext, Plugin, PluginService};
use crate::topology::Topology;

/// Methods that should see a freshly refreshed topology before running,
/// rather than one that may be stale by up to the provider's cache TTL
/// (spec.md §9 Open Question 3). This plugin only ever sees `execute_query`
/// calls, which is always a member.
pub const METHODS_REQUIRING_UPDATED_TOPOLOGY: &[&str] =
    &["execute_query", "execute_update", "begin_transaction"];

pub struct FailoverPlugin {
    host_list_provider: Arc<dyn HostListProvider>,
    reader_handler: Arc<ReaderFailoverHandler>,
    writer_handler: Arc<WriterFailoverHandler>,
    dialect: Arc<dyn Dialect>,
    mode: FailoverMode,
    enabled: bool,
    service: StdRwLock<Option<Weak<PluginService>>>,
}

impl std::fmt::Debug for FailoverPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailoverPlugin")
            .field("mode", &self.mode)
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl FailoverPlugin {
    pub fn new(
        host_list_provider: Arc<dyn HostListProvider>,
        reader_handler: Arc<ReaderFailoverHandler>,
        writer_handler: Arc<WriterFailoverHandler>,
        dialect: Arc<dyn Dialect>,
        mode: FailoverMode,
        enabled: bool,
    ) -> Self {
        Self {
            host_list_provider,
            reader_handler,
            writer_handler,
            dialect,
            mode,
            enabled,
            service: StdRwLock::new(None),
        }
    }

    /// Lets the client assembler hand this plugin a back-reference to the
    /// [`PluginService`] once it exists, so a successful failover can adopt
    /// the freshly connected client as the current one. Held weakly since
    /// the service owns the pipeline that owns this plugin.
    pub fn bind_service(&self, service: Weak<PluginService>) {
        *self.service.write().unwrap() = Some(service);
    }

    fn service(&self) -> Option<Arc<PluginService>> {
        self.service.read().unwrap().as_ref().and_then(Weak::upgrade)
    }

    fn is_failover_indicating(&self, error: &Error) -> bool {
        error.is_network_error() || matches!(error.kind(), ErrorKind::UnavailableHost { .. })
    }

    async fn current_topology(&self, client: &dyn DbClient) -> Topology {
        self.host_list_provider
            .refresh(client)
            .await
            .unwrap_or_else(|_| Topology::new("unknown", self.host_list_provider.initial_hosts()))
    }

    async fn run_failover(&self, ctx: &PipelineContext, client: &Arc<dyn DbClient>) -> Error {
        let in_transaction = client.is_in_transaction();
        ctx.host_info.set_availability(HostAvailability::NotAvailable);
        client.abort();

        if matches!(self.mode, FailoverMode::StrictWriter) && in_transaction {
            return Error::new(ErrorKind::TransactionResolutionUnknown {
                new_host: ctx.host_info.clone(),
            });
        }

        let topology = self.current_topology(client.as_ref()).await;

        let outcome = match self.mode {
            FailoverMode::StrictReader => {
                self.failover_reader(&topology, Some(&ctx.host_info)).await
            }
            FailoverMode::StrictWriter => self.failover_writer(&topology).await,
            FailoverMode::ReaderOrWriter => {
                match self
                    .failover_reader(&topology, Some(&ctx.host_info))
                    .await
                {
                    Ok(result) => Ok(result),
                    Err(_) => self.failover_writer(&topology).await,
                }
            }
        };

        match outcome {
            Ok((new_client, new_host)) => {
                if let Some(service) = self.service() {
                    let _ = service.fill_aliases(new_client.as_ref(), &new_host).await;
                    service.set_current_client(new_client, new_host.clone()).await;
                }
                if in_transaction {
                    Error::new(ErrorKind::TransactionResolutionUnknown { new_host })
                } else {
                    Error::new(ErrorKind::FailoverSuccess { new_host })
                }
            }
            Err(e) => e,
        }
    }

    async fn failover_reader(
        &self,
        topology: &Topology,
        current_host: Option<&Arc<HostInfo>>,
    ) -> Result<(Arc<dyn DbClient>, Arc<HostInfo>)> {
        let result = self
            .reader_handler
            .failover(topology, current_host, self.host_list_provider.as_ref())
            .await?;
        Ok((result.client, result.host))
    }

    async fn failover_writer(&self, topology: &Topology) -> Result<(Arc<dyn DbClient>, Arc<HostInfo>)> {
        let result = self
            .writer_handler
            .failover(
                topology,
                self.host_list_provider.clone(),
                self.dialect.failover_flags(),
            )
            .await;
        if result.is_connected {
            let client = result.client.expect("connected result always carries a client");
            let host = result
                .topology
                .as_ref()
                .and_then(|t| t.writer())
                .cloned()
                .or_else(|| topology.writer().cloned())
                .expect("a connected writer failover result implies a known writer host");
            return Ok((client, host));
        }
        Err(result.error.unwrap_or_else(|| {
            Error::new(ErrorKind::FailoverFailed {
                elapsed: std::time::Duration::from_secs(0),
            })
        }))
    }
}

#[async_trait]
impl Plugin for FailoverPlugin {
    fn name(&self) -> &'static str {
        "failover"
    }

    fn subscribes_to(&self, method: Method) -> bool {
        self.enabled
            && matches!(
                method,
                Method::InitHostProvider
                    | Method::Connect
                    | Method::ForceConnect
                    | Method::Execute
                    | Method::NotifyConnectionChanged
                    | Method::NotifyHostListChanged
            )
    }

    async fn init_host_provider(&self) -> Result<()> {
        if !self.host_list_provider.is_dynamic() {
            return Err(Error::new(ErrorKind::IllegalArgument {
                message: "cluster-aware failover requires a dynamic host-list provider"
                    .to_string(),
            }));
        }
        Ok(())
    }

    async fn execute_query(
        &self,
        ctx: &PipelineContext,
        client: &Arc<dyn DbClient>,
        sql: &str,
        next: ExecuteNext<'_>,
    ) -> Result<Vec<Row>> {
        if METHODS_REQUIRING_UPDATED_TOPOLOGY.contains(&"execute_query") {
            let _ = self.host_list_provider.refresh(client.as_ref()).await;
        }

        match next.call(ctx, client, sql).await {
            Ok(rows) => Ok(rows),
            Err(e) if self.is_failover_indicating(&e) => Err(self.run_failover(ctx, client).await),
            Err(e) => Err(e),
        }
    }

    async fn notify_connection_changed(&self, changes: &HashSet<HostChangeOption>) {
        if changes.contains(&HostChangeOption::WentDown) {
            // topology will be corrected on the next refresh; nothing to do here.
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dialect::FailoverFlags;
    use crate::driver::{Driver, Value};
    use crate::host_info::{HostInfoBuilder, HostRole};
    use std::collections::HashMap;
    use std::time::Duration;

    #[derive(Debug)]
    struct NullClient {
        in_transaction: bool,
    }
    impl DbClient for NullClient {
        fn is_valid(&self) -> bool {
            true
        }
        fn abort(&self) {}
        fn is_in_transaction(&self) -> bool {
            self.in_transaction
        }
    }

    struct FlakyThenOkDriver;
    #[async_trait]
    impl Driver for FlakyThenOkDriver {
        async fn connect(&self, _host: &HostInfo) -> Result<Arc<dyn DbClient>> {
            Ok(Arc::new(NullClient {
                in_transaction: false,
            }))
        }
        async fn close(&self, _client: Arc<dyn DbClient>) {}
        async fn execute_query(&self, _client: &dyn DbClient, _sql: &str) -> Result<Vec<Row>> {
            Ok(vec![])
        }
        async fn server_version(&self, _client: &dyn DbClient) -> Result<String> {
            Ok("x".to_string())
        }
    }

    struct StubProvider {
        dynamic: bool,
    }
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
        fn is_dynamic(&self) -> bool {
            self.dynamic
        }
    }

    fn plugin(mode: FailoverMode) -> FailoverPlugin {
        let driver: Arc<dyn Driver> = Arc::new(FlakyThenOkDriver);
        let provider: Arc<dyn HostListProvider> = Arc::new(StubProvider { dynamic: true });
        let reader_handler = Arc::new(ReaderFailoverHandler::new(
            driver.clone(),
            Duration::from_secs(5),
            Duration::from_secs(1),
            false,
        ));
        let writer_handler = Arc::new(WriterFailoverHandler::new(
            driver.clone(),
            reader_handler.clone(),
            Duration::from_secs(5),
            Duration::from_millis(10),
            Duration::from_millis(10),
        ));
        FailoverPlugin::new(
            provider,
            reader_handler,
            writer_handler,
            Arc::from(crate::dialect::dialect_for_code(crate::dialect::DialectCode::Postgres)),
            mode,
            true,
        )
    }

    #[tokio::test]
    async fn init_host_provider_rejects_static_provider() {
        let driver: Arc<dyn Driver> = Arc::new(FlakyThenOkDriver);
        let provider: Arc<dyn HostListProvider> = Arc::new(StubProvider { dynamic: false });
        let reader_handler = Arc::new(ReaderFailoverHandler::new(
            driver.clone(),
            Duration::from_secs(5),
            Duration::from_secs(1),
            false,
        ));
        let writer_handler = Arc::new(WriterFailoverHandler::new(
            driver.clone(),
            reader_handler.clone(),
            Duration::from_secs(5),
            Duration::from_millis(10),
            Duration::from_millis(10),
        ));
        let plugin = FailoverPlugin::new(
            provider,
            reader_handler,
            writer_handler,
            Arc::from(crate::dialect::dialect_for_code(crate::dialect::DialectCode::Postgres)),
            FailoverMode::ReaderOrWriter,
            true,
        );
        assert!(plugin.init_host_provider().await.is_err());
    }

    #[tokio::test]
    async fn strict_writer_mid_transaction_is_unknown_resolution_without_attempting_failover() {
        let plugin = plugin(FailoverMode::StrictWriter);
        let ctx = PipelineContext::new(
            Arc::new(HostInfoBuilder::new().host("h").port(1).build().unwrap()),
            HashMap::new(),
        );
        let client: Arc<dyn DbClient> = Arc::new(NullClient {
            in_transaction: true,
        });
        let err = plugin.run_failover(&ctx, &client).await;
        assert!(matches!(err.kind(), ErrorKind::TransactionResolutionUnknown { .. }));
    }

    #[allow(dead_code)]
    fn assert_value_type(_v: Value) {}
}
