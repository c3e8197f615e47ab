//! The façade plugins use to reach the rest of the system (spec.md §4.6).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::driver::{DbClient, Driver, Row};
use crate::error::{Error, Result};
use crate::host_info::{HostInfo, HostRole};
use crate::host_list_provider::HostListProvider;
use crate::selector::HostSelector;
use crate::topology::Topology;

use super::{HostChangeOption, PipelineContext, Pipeline};

struct CurrentConnection {
    client: Option<Arc<dyn DbClient>>,
    host_info: Option<Arc<HostInfo>>,
}

/// The central façade a [`crate::plugin::Plugin`] is given to observe and
/// mutate the wrapper's current connection, topology, and selector state,
/// without reaching into the pipeline or provider directly.
pub struct PluginService {
    pipeline: Arc<Pipeline>,
    driver: Arc<dyn Driver>,
    host_list_provider: Arc<dyn HostListProvider>,
    selectors: Vec<Arc<dyn HostSelector>>,
    current: RwLock<CurrentConnection>,
}

impl PluginService {
    pub fn new(
        pipeline: Arc<Pipeline>,
        driver: Arc<dyn Driver>,
        host_list_provider: Arc<dyn HostListProvider>,
        selectors: Vec<Arc<dyn HostSelector>>,
    ) -> Self {
        Self {
            pipeline,
            driver,
            host_list_provider,
            selectors,
            current: RwLock::new(CurrentConnection {
                client: None,
                host_info: None,
            }),
        }
    }

    pub async fn current_client(&self) -> Option<Arc<dyn DbClient>> {
        self.current.read().await.client.clone()
    }

    pub async fn current_host_info(&self) -> Option<Arc<HostInfo>> {
        self.current.read().await.host_info.clone()
    }

    /// Atomically swaps in a new current client/host, aborting the previous
    /// client (spec.md §4.6).
    pub async fn set_current_client(&self, client: Arc<dyn DbClient>, host_info: Arc<HostInfo>) {
        let mut current = self.current.write().await;
        if let Some(previous) = current.client.take() {
            if !Arc::ptr_eq(&previous, &client) {
                previous.abort();
            }
        }
        current.client = Some(client);
        current.host_info = Some(host_info);
    }

    pub async fn connect(&self, host_info: Arc<HostInfo>, props: HashMap<String, String>) -> Result<Arc<dyn DbClient>> {
        let ctx = PipelineContext::new(host_info, props);
        self.pipeline.connect(&ctx).await
    }

    pub async fn force_connect(
        &self,
        host_info: Arc<HostInfo>,
        props: HashMap<String, String>,
    ) -> Result<Arc<dyn DbClient>> {
        let ctx = PipelineContext::new(host_info, props);
        self.pipeline.force_connect(&ctx).await
    }

    /// The hosts parsed from the initial connection string, never refreshed
    /// (spec.md §4.6). Compare [`Self::get_all_hosts`].
    pub async fn get_hosts(&self) -> Vec<Arc<HostInfo>> {
        self.host_list_provider.initial_hosts()
    }

    /// The latest known hosts, using the most recently refreshed topology
    /// where the provider is dynamic (spec.md §4.6).
    pub async fn get_all_hosts(&self) -> Vec<Arc<HostInfo>> {
        self.host_list_provider.all_known_hosts().await
    }

    pub async fn refresh_host_list(&self, client: &dyn DbClient) -> Result<Topology> {
        self.host_list_provider.refresh(client).await
    }

    pub async fn force_refresh_host_list(&self, client: &dyn DbClient) -> Result<Topology> {
        self.host_list_provider.force_refresh(client).await
    }

    pub async fn get_host_info_by_strategy(
        &self,
        hosts: &[Arc<HostInfo>],
        role: HostRole,
        strategy: &str,
        props: &HashMap<String, String>,
    ) -> Result<Arc<HostInfo>> {
        for selector in &self.selectors {
            if selector.strategy_name() == strategy {
                return selector.get_host(hosts, role, props).await;
            }
        }
        Err(Error::new(crate::error::ErrorKind::IllegalArgument {
            message: format!("no host selector registered for strategy '{}'", strategy),
        }))
    }

    pub fn accepts_strategy(&self, strategy: &str) -> bool {
        self.selectors.iter().any(|s| s.strategy_name() == strategy)
    }

    pub async fn is_in_transaction(&self) -> bool {
        self.current
            .read()
            .await
            .client
            .as_ref()
            .map(|c| c.is_in_transaction())
            .unwrap_or(false)
    }

    pub async fn identify_connection(&self, client: &dyn DbClient) -> Result<Option<Arc<HostInfo>>> {
        self.host_list_provider.identify_connection(client).await
    }

    /// Fills in any aliases `host_info` is missing by identifying which host
    /// `client` is actually connected to (spec.md §4.6). A no-op once
    /// `host_info` already carries a non-canonical alias, so repeated calls
    /// on an already-identified host don't re-probe the connection.
    pub async fn fill_aliases(&self, client: &dyn DbClient, host_info: &Arc<HostInfo>) -> Result<()> {
        if !host_info.aliases().is_empty() {
            return Ok(());
        }
        if let Some(identified) = self.host_list_provider.identify_connection(client).await? {
            for alias in identified.all_aliases() {
                host_info.add_alias(alias);
            }
        }
        Ok(())
    }

    pub async fn get_host_role(&self, client: &dyn DbClient) -> Result<HostRole> {
        self.host_list_provider.get_host_role(client).await
    }

    pub fn is_client_valid(&self, client: &dyn DbClient) -> bool {
        client.is_valid()
    }

    pub fn abort_target_client(&self, client: &dyn DbClient) {
        client.abort();
    }

    pub async fn try_closing_target_client(&self, client: Arc<dyn DbClient>) {
        self.driver.close(client).await;
    }

    pub fn is_network_error(&self, error: &Error) -> bool {
        error.is_network_error()
    }

    pub fn is_login_error(&self, error: &Error) -> bool {
        error.is_login_error()
    }

    /// Fan out an availability update to every [`HostInfo`] sharing any of
    /// `aliases` (spec.md §4.6).
    pub fn set_availability_by_aliases(
        &self,
        hosts: &[Arc<HostInfo>],
        aliases: &HashSet<String>,
        availability: crate::host_info::HostAvailability,
    ) {
        for host in hosts {
            if host.all_aliases().iter().any(|a| aliases.contains(a)) {
                host.set_availability(availability);
            }
        }
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub async fn notify_connection_changed(&self, changes: &HashSet<HostChangeOption>) {
        self.pipeline.notify_connection_changed(changes).await;
    }

    pub async fn notify_host_list_changed(
        &self,
        changes: &HashMap<String, HashSet<HostChangeOption>>,
    ) {
        self.pipeline.notify_host_list_changed(changes).await;
    }

    pub async fn execute_query(
        &self,
        host_info: Arc<HostInfo>,
        client: &Arc<dyn DbClient>,
        sql: &str,
        props: HashMap<String, String>,
    ) -> Result<Vec<Row>> {
        let ctx = PipelineContext::new(host_info, props);
        self.pipeline.execute_query(&ctx, client, sql).await
    }
}

/// A marker type plugins can use as the `changes` payload for
/// `notify_connection_changed`, kept here rather than in `plugin::mod` since
/// it's purely a [`PluginService`] consumer detail.
pub type ConnectionChanges = HashSet<HostChangeOption>;
