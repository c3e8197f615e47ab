//! Builds and executes the per-method plugin chain (spec.md §4.7).
//!
//! For a given external method, the chain is: plugins subscribed to that
//! method, in configured order, each wrapping the next. The innermost `next`
//! is the raw driver call. The filtered-and-ordered plugin list for a
//! `(method, hostInfo)` pair is memoized so repeated calls against the same
//! host don't re-filter the plugin list every time.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::driver::{DbClient, Driver, Row};
use crate::error::Result;

use super::{Method, PipelineContext, Plugin};

type PluginList = Arc<Vec<Arc<dyn Plugin>>>;

pub struct Pipeline {
    plugins: Vec<Arc<dyn Plugin>>,
    driver: Arc<dyn Driver>,
    memo: RwLock<HashMap<(Method, String), PluginList>>,
}

impl Pipeline {
    pub fn new(plugins: Vec<Arc<dyn Plugin>>, driver: Arc<dyn Driver>) -> Self {
        Self {
            plugins,
            driver,
            memo: RwLock::new(HashMap::new()),
        }
    }

    fn chain_for(&self, method: Method, host_key: &str) -> PluginList {
        let cache_key = (method, host_key.to_string());
        if let Some(cached) = self.memo.read().unwrap().get(&cache_key) {
            return cached.clone();
        }
        let filtered: Vec<Arc<dyn Plugin>> = self
            .plugins
            .iter()
            .filter(|p| p.subscribes_to(method))
            .cloned()
            .collect();
        let filtered = Arc::new(filtered);
        self.memo
            .write()
            .unwrap()
            .insert(cache_key, filtered.clone());
        filtered
    }

    pub async fn connect(&self, ctx: &PipelineContext) -> Result<Arc<dyn DbClient>> {
        let chain = self.chain_for(Method::Connect, &ctx.host_info.canonical_alias());
        ConnectNext::new(&chain, 0, self.driver.as_ref()).call(ctx).await
    }

    /// Runs the connect chain, but only over plugins that do NOT themselves
    /// implement `connect` — spec.md §4.6: "`forceConnect` bypasses plugins
    /// that implement `connect`".
    pub async fn force_connect(&self, ctx: &PipelineContext) -> Result<Arc<dyn DbClient>> {
        let chain = self.chain_for(Method::ForceConnect, &ctx.host_info.canonical_alias());
        let bypassing: Vec<Arc<dyn Plugin>> = chain
            .iter()
            .filter(|p| !p.subscribes_to(Method::Connect))
            .cloned()
            .collect();
        ConnectNext::new(&bypassing, 0, self.driver.as_ref()).call(ctx).await
    }

    pub async fn execute_query(
        &self,
        ctx: &PipelineContext,
        client: &Arc<dyn DbClient>,
        sql: &str,
    ) -> Result<Vec<Row>> {
        let chain = self.chain_for(Method::Execute, &ctx.host_info.canonical_alias());
        ExecuteNext::new(&chain, 0, self.driver.as_ref())
            .call(ctx, client, sql)
            .await
    }

    pub fn plugins(&self) -> &[Arc<dyn Plugin>] {
        &self.plugins
    }

    /// Fans a connection-state change out to every subscribed plugin
    /// (spec.md §5: "delivered to every subscribed plugin").
    pub async fn notify_connection_changed(&self, changes: &std::collections::HashSet<super::HostChangeOption>) {
        for plugin in self.plugins.iter().filter(|p| p.subscribes_to(Method::NotifyConnectionChanged)) {
            plugin.notify_connection_changed(changes).await;
        }
    }

    /// Fans a host-list change out to every subscribed plugin.
    pub async fn notify_host_list_changed(
        &self,
        changes: &HashMap<String, std::collections::HashSet<super::HostChangeOption>>,
    ) {
        for plugin in self.plugins.iter().filter(|p| p.subscribes_to(Method::NotifyHostListChanged)) {
            plugin.notify_host_list_changed(changes).await;
        }
    }
}

/// The remaining tail of a `connect`/`forceConnect` chain, handed to each
/// plugin in turn. Calling [`Self::call`] advances to the next plugin (or,
/// at the end of the chain, the raw driver call).
pub struct ConnectNext<'a> {
    chain: &'a [Arc<dyn Plugin>],
    index: usize,
    driver: &'a dyn Driver,
    force: bool,
}

impl<'a> ConnectNext<'a> {
    fn new(chain: &'a [Arc<dyn Plugin>], index: usize, driver: &'a dyn Driver) -> Self {
        Self {
            chain,
            index,
            driver,
            force: false,
        }
    }

    pub async fn call(self, ctx: &PipelineContext) -> Result<Arc<dyn DbClient>> {
        match self.chain.get(self.index) {
            Some(plugin) => {
                let next = ConnectNext {
                    chain: self.chain,
                    index: self.index + 1,
                    driver: self.driver,
                    force: self.force,
                };
                if self.force {
                    plugin.execute_force_connect(ctx, next).await
                } else {
                    plugin.execute_connect(ctx, next).await
                }
            }
            None => self.driver.connect(&ctx.host_info).await,
        }
    }
}

/// The remaining tail of an `execute` (query) chain.
pub struct ExecuteNext<'a> {
    chain: &'a [Arc<dyn Plugin>],
    index: usize,
    driver: &'a dyn Driver,
}

impl<'a> ExecuteNext<'a> {
    fn new(chain: &'a [Arc<dyn Plugin>], index: usize, driver: &'a dyn Driver) -> Self {
        Self {
            chain,
            index,
            driver,
        }
    }

    pub async fn call(
        self,
        ctx: &PipelineContext,
        client: &Arc<dyn DbClient>,
        sql: &str,
    ) -> Result<Vec<Row>> {
        match self.chain.get(self.index) {
            Some(plugin) => {
                let next = ExecuteNext {
                    chain: self.chain,
                    index: self.index + 1,
                    driver: self.driver,
                };
                plugin.execute_query(ctx, client, sql, next).await
            }
            None => self.driver.execute_query(client.as_ref(), sql).await,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::driver::Value;
    use crate::host_info::HostInfoBuilder;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
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

    struct StubDriver {
        connect_calls: AtomicUsize,
    }

    #[async_trait]
    impl Driver for StubDriver {
        async fn connect(&self, _host: &crate::host_info::HostInfo) -> Result<Arc<dyn DbClient>> {
            self.connect_calls.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(NullClient))
        }
        async fn close(&self, _client: Arc<dyn DbClient>) {}
        async fn execute_query(&self, _client: &dyn DbClient, _sql: &str) -> Result<Vec<Row>> {
            Ok(vec![Row::new(HashMap::from([(
                "x".to_string(),
                Value::Int(1),
            )]))])
        }
        async fn server_version(&self, _client: &dyn DbClient) -> Result<String> {
            Ok("test".to_string())
        }
    }

    #[derive(Debug)]
    struct CountingPlugin {
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl Plugin for CountingPlugin {
        fn name(&self) -> &'static str {
            "counting"
        }
        fn subscribes_to(&self, method: Method) -> bool {
            matches!(method, Method::Connect | Method::Execute)
        }
        async fn execute_connect(
            &self,
            ctx: &PipelineContext,
            next: ConnectNext<'_>,
        ) -> Result<Arc<dyn DbClient>> {
            *self.calls.lock().unwrap() += 1;
            next.call(ctx).await
        }
    }

    fn ctx() -> PipelineContext {
        PipelineContext::new(
            Arc::new(HostInfoBuilder::new().host("h").port(1).build().unwrap()),
            HashMap::new(),
        )
    }

    #[tokio::test]
    async fn connect_chain_reaches_the_driver() {
        let driver = Arc::new(StubDriver {
            connect_calls: AtomicUsize::new(0),
        });
        let plugin: Arc<dyn Plugin> = Arc::new(CountingPlugin {
            calls: Mutex::new(0),
        });
        let pipeline = Pipeline::new(vec![plugin.clone()], driver.clone());

        pipeline.connect(&ctx()).await.unwrap();
        assert_eq!(driver.connect_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn force_connect_bypasses_connect_subscribed_plugins() {
        let driver = Arc::new(StubDriver {
            connect_calls: AtomicUsize::new(0),
        });
        let plugin: Arc<dyn Plugin> = Arc::new(CountingPlugin {
            calls: Mutex::new(0),
        });
        let pipeline = Pipeline::new(vec![plugin], driver.clone());

        pipeline.force_connect(&ctx()).await.unwrap();
        assert_eq!(driver.connect_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn execute_chain_reaches_the_driver() {
        let driver = Arc::new(StubDriver {
            connect_calls: AtomicUsize::new(0),
        });
        let pipeline = Pipeline::new(vec![], driver);
        let client: Arc<dyn DbClient> = Arc::new(NullClient);
        let rows = pipeline
            .execute_query(&ctx(), &client, "SELECT 1")
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }
}
