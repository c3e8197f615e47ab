//! The driver boundary: traits an embedding application implements once per
//! database family so this crate never depends on a concrete wire protocol
//! (spec.md §1 scopes "specific database wire protocols and driver
//! libraries" out as an external collaborator).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::host_info::HostInfo;

/// A single column value in a raw query row. Deliberately minimal: dialects
/// only ever read a handful of scalar columns out of topology/role queries.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }
}

/// A single row returned from a dialect query, addressed by column name.
#[derive(Debug, Clone, Default)]
pub struct Row(HashMap<String, Value>);

impl Row {
    pub fn new(columns: HashMap<String, Value>) -> Self {
        Self(columns)
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }
}

/// A live connection handle to one database server.
///
/// This crate never constructs a `DbClient` itself — it receives one from
/// [`Driver::connect`] and otherwise only asks it whether it is still
/// usable, or tells it to go away.
pub trait DbClient: Send + Sync + fmt::Debug {
    /// A best-effort, non-blocking liveness check (e.g. "is the socket still
    /// open"), used by [`crate::plugin::service::PluginService::is_client_valid`].
    fn is_valid(&self) -> bool;

    /// Forcibly aborts the underlying connection without a clean
    /// protocol-level shutdown. Used when a monitor has declared the host
    /// unhealthy and a graceful close can't be trusted to complete.
    fn abort(&self);

    /// True while a transaction opened on this client has not yet been
    /// committed or rolled back. Used by the failover plugin to decide
    /// between `FailoverSuccess` and `TransactionResolutionUnknown`
    /// (spec.md §4.13).
    fn is_in_transaction(&self) -> bool;
}

/// Per-database-family connection/query surface. One implementation per
/// supported family (MySQL-like, Postgres-like); this crate is parametric
/// over `Arc<dyn Driver>`.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Opens a new connection to `host`.
    async fn connect(&self, host: &HostInfo) -> Result<Arc<dyn DbClient>>;

    /// Gracefully closes `client`, as opposed to [`DbClient::abort`].
    async fn close(&self, client: Arc<dyn DbClient>);

    /// Executes a dialect-supplied SQL string against `client` and returns
    /// the raw result rows.
    async fn execute_query(&self, client: &dyn DbClient, sql: &str) -> Result<Vec<Row>>;

    /// The server version string or equivalent identification banner, used
    /// by dialect detection (spec.md §4.4 `isDialect`).
    async fn server_version(&self, client: &dyn DbClient) -> Result<String>;
}
