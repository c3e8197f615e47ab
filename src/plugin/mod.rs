//! The plugin pipeline: chained interceptors over connect/execute/notify
//! (spec.md §4.7), plus the [`service::PluginService`] façade plugins are
//! given to reach the rest of the system (spec.md §4.6).

pub mod pipeline;
pub mod service;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::driver::{DbClient, Row};
use crate::error::Result;
use crate::host_info::{HostInfo, HostRole};

pub use pipeline::Pipeline;
pub use service::PluginService;

/// The methods a plugin may subscribe to (spec.md §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Connect,
    ForceConnect,
    Execute,
    InitHostProvider,
    NotifyConnectionChanged,
    NotifyHostListChanged,
    AcceptsStrategy,
    GetHostInfoByStrategy,
}

/// A change observed on a connection or a host list, passed to
/// `notifyConnectionChanged`/`notifyHostListChanged` (spec.md §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostChangeOption {
    HostnameChanged,
    PromotedToWriter,
    DemotedToReader,
    Added,
    Removed,
    Up,
    Down,
    WentDown,
}

/// The pipeline's invocation context: what host is being targeted and under
/// what connection properties.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub host_info: Arc<HostInfo>,
    pub props: HashMap<String, String>,
}

impl PipelineContext {
    pub fn new(host_info: Arc<HostInfo>, props: HashMap<String, String>) -> Self {
        Self { host_info, props }
    }
}

/// A plugin intercepting one or more pipeline methods.
///
/// `connect`/`force_connect`/`execute` are true chain-of-responsibility
/// hooks: a plugin receives a [`pipeline::Next`] it can call zero or more
/// times (to retry), skip (to short-circuit), or call once and wrap (to
/// observe/translate errors). The remaining intercepted methods
/// (`init_host_provider`, the `notify_*` observers, and the strategy hooks)
/// are simple fan-out/first-match calls, since no plugin in this crate needs
/// to wrap or retry them.
#[async_trait]
pub trait Plugin: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Whether this plugin wants to see `method`. A plugin that wants every
    /// method returns `true` unconditionally.
    fn subscribes_to(&self, method: Method) -> bool;

    async fn execute_connect(
        &self,
        ctx: &PipelineContext,
        next: pipeline::ConnectNext<'_>,
    ) -> Result<Arc<dyn DbClient>> {
        next.call(ctx).await
    }

    async fn execute_force_connect(
        &self,
        ctx: &PipelineContext,
        next: pipeline::ConnectNext<'_>,
    ) -> Result<Arc<dyn DbClient>> {
        next.call(ctx).await
    }

    async fn execute_query(
        &self,
        ctx: &PipelineContext,
        client: &Arc<dyn DbClient>,
        sql: &str,
        next: pipeline::ExecuteNext<'_>,
    ) -> Result<Vec<Row>> {
        next.call(ctx, client, sql).await
    }

    async fn init_host_provider(&self) -> Result<()> {
        Ok(())
    }

    async fn notify_connection_changed(&self, _changes: &HashSet<HostChangeOption>) {}

    async fn notify_host_list_changed(&self, _changes: &HashMap<String, HashSet<HostChangeOption>>) {}

    /// Whether this plugin can satisfy `get_host_info_by_strategy` for
    /// `(role, strategy)`.
    fn accepts_strategy(&self, _role: HostRole, _strategy: &str) -> bool {
        false
    }

    async fn get_host_info_by_strategy(
        &self,
        _role: HostRole,
        _strategy: &str,
        _ctx: &PipelineContext,
    ) -> Result<Option<Arc<HostInfo>>> {
        Ok(None)
    }
}
