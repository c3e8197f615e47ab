//! Database dialect abstraction (spec.md §4.4): vendor-specific topology and
//! role queries, plus result parsing, behind one trait so the rest of the
//! system never branches on database family.

pub mod manager;

use std::time::{Duration, SystemTime};

use async_trait::async_trait;

use crate::driver::{DbClient, Driver, Row};
use crate::error::{Error, ErrorKind, Result};
use crate::host_info::HostRole;

pub use manager::DialectManager;

/// The two database families this crate's client factories target
/// (spec.md §6: "Two client factories, one per database family").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseType {
    Mysql,
    Postgres,
}

/// A stable identifier for a concrete dialect implementation, used to cache
/// the endpoint→dialect mapping and to express
/// [`Dialect::update_candidates`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DialectCode {
    Mysql,
    AuroraMysql,
    RdsMysql,
    Postgres,
    AuroraPostgres,
    RdsPostgres,
}

/// One row of a topology query result before it is reconciled into a
/// [`crate::host_info::HostInfo`].
#[derive(Debug, Clone)]
pub struct TopologyRow {
    pub server_id: String,
    pub is_writer: bool,
    pub cpu: f64,
    pub lag: f64,
    pub last_update_time: SystemTime,
}

/// Behavior flags a dialect declares about the writer-failover handler
/// (spec.md §4.10).
#[derive(Debug, Clone, Copy, Default)]
pub struct FailoverFlags {
    /// When set, only Task B (wait for a new writer via a reader) runs;
    /// Task A (reconnect to the old writer) is skipped entirely.
    pub disable_task_a: bool,
    /// When set, Task B is allowed to return the original writer's
    /// connection if it gets re-elected rather than treating that as a
    /// failure to find a *new* writer.
    pub enable_writer_in_task_b: bool,
}

/// Rows older than this are dropped from a topology refresh, except for
/// whichever row claims to be the writer (spec.md §4.4 item 2).
pub const STALE_ROW_THRESHOLD: Duration = Duration::from_secs(5 * 60);

/// Discards topology rows whose `last_update_time` is older than
/// [`STALE_ROW_THRESHOLD`], always keeping the writer row regardless of its
/// age.
pub fn filter_stale_rows(rows: Vec<TopologyRow>, now: SystemTime) -> Vec<TopologyRow> {
    rows.into_iter()
        .filter(|row| {
            row.is_writer
                || now
                    .duration_since(row.last_update_time)
                    .map(|age| age <= STALE_ROW_THRESHOLD)
                    .unwrap_or(true)
        })
        .collect()
}

/// A database dialect: the vendor-specific queries and parsing logic behind
/// a uniform interface (spec.md §4.4).
#[async_trait]
pub trait Dialect: Send + Sync + std::fmt::Debug {
    fn code(&self) -> DialectCode;

    fn default_port(&self) -> u16;

    /// The SQL text used to discover cluster topology.
    fn topology_query(&self) -> &'static str;

    /// Parses the raw rows returned by [`Self::topology_query`] into
    /// [`TopologyRow`]s.
    fn parse_topology_rows(&self, rows: &[Row]) -> Result<Vec<TopologyRow>>;

    /// The SQL text used to determine whether the connected server is the
    /// writer or a reader.
    fn host_role_query(&self) -> &'static str;

    /// Parses the result of [`Self::host_role_query`].
    fn parse_host_role(&self, rows: &[Row]) -> Result<HostRole>;

    /// Probes whether `client` is actually running this dialect (by server
    /// version banner or extension presence).
    async fn is_dialect(&self, driver: &dyn Driver, client: &dyn DbClient) -> Result<bool>;

    /// Convenience wrapper running [`Self::host_role_query`] against a live
    /// client and parsing the result.
    async fn get_host_role(&self, driver: &dyn Driver, client: &dyn DbClient) -> Result<HostRole> {
        let rows = driver.execute_query(client, self.host_role_query()).await?;
        self.parse_host_role(&rows)
    }

    /// The SQL text a connected client uses to ask the server "what is your
    /// instance id", used by [`crate::host_list_provider::rds::RdsHostListProvider::identify_connection`].
    fn self_identify_query(&self) -> &'static str {
        "SELECT @@aurora_server_id AS server_id"
    }

    /// Parses the result of [`Self::self_identify_query`].
    fn parse_self_id(&self, rows: &[Row]) -> Result<String> {
        rows.first()
            .and_then(|r| r.get("server_id"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| parse_error("missing server_id column in self-identify query result"))
    }

    /// Convenience wrapper running [`Self::self_identify_query`] and parsing
    /// the result.
    async fn identify_self(&self, driver: &dyn Driver, client: &dyn DbClient) -> Result<String> {
        let rows = driver
            .execute_query(client, self.self_identify_query())
            .await?;
        self.parse_self_id(&rows)
    }

    /// More-specific dialect codes to probe, in order, after the first
    /// connection succeeds with this dialect (spec.md §4.5).
    fn update_candidates(&self) -> Vec<DialectCode> {
        Vec::new()
    }

    fn failover_flags(&self) -> FailoverFlags {
        FailoverFlags::default()
    }
}

fn parse_error(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::Internal {
        message: message.into(),
    })
}

#[derive(Debug, Default)]
pub struct MysqlDialect;

#[async_trait]
impl Dialect for MysqlDialect {
    fn code(&self) -> DialectCode {
        DialectCode::Mysql
    }

    fn default_port(&self) -> u16 {
        3306
    }

    fn topology_query(&self) -> &'static str {
        "SELECT server_id, is_writer, cpu, lag, last_update_timestamp FROM information_schema.replica_host_status"
    }

    fn parse_topology_rows(&self, rows: &[Row]) -> Result<Vec<TopologyRow>> {
        parse_generic_topology_rows(rows)
    }

    fn host_role_query(&self) -> &'static str {
        "SHOW REPLICA STATUS"
    }

    fn parse_host_role(&self, rows: &[Row]) -> Result<HostRole> {
        Ok(if rows.is_empty() {
            HostRole::Writer
        } else {
            HostRole::Reader
        })
    }

    async fn is_dialect(&self, driver: &dyn Driver, client: &dyn DbClient) -> Result<bool> {
        let version = driver.server_version(client).await?;
        Ok(!version.to_lowercase().contains("aurora"))
    }

    fn update_candidates(&self) -> Vec<DialectCode> {
        vec![DialectCode::AuroraMysql, DialectCode::RdsMysql]
    }
}

#[derive(Debug, Default)]
pub struct AuroraMysqlDialect;

#[async_trait]
impl Dialect for AuroraMysqlDialect {
    fn code(&self) -> DialectCode {
        DialectCode::AuroraMysql
    }

    fn default_port(&self) -> u16 {
        3306
    }

    fn topology_query(&self) -> &'static str {
        "SELECT SERVER_ID, CASE WHEN SESSION_ID = 'MASTER_SESSION_ID' THEN 1 ELSE 0 END AS IS_WRITER, \
         CPU, REPLICA_LAG_IN_MILLISECONDS, LAST_UPDATE_TIMESTAMP FROM information_schema.replica_host_status"
    }

    fn parse_topology_rows(&self, rows: &[Row]) -> Result<Vec<TopologyRow>> {
        parse_generic_topology_rows(rows)
    }

    fn host_role_query(&self) -> &'static str {
        "SELECT SESSION_ID FROM information_schema.replica_host_status WHERE SERVER_ID = @@aurora_server_id"
    }

    fn parse_host_role(&self, rows: &[Row]) -> Result<HostRole> {
        let session_id = rows
            .first()
            .and_then(|r| r.get("SESSION_ID"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| parse_error("missing SESSION_ID column in host role query result"))?;
        Ok(if session_id == "MASTER_SESSION_ID" {
            HostRole::Writer
        } else {
            HostRole::Reader
        })
    }

    async fn is_dialect(&self, driver: &dyn Driver, client: &dyn DbClient) -> Result<bool> {
        let version = driver.server_version(client).await?;
        Ok(version.to_lowercase().contains("aurora"))
    }

    fn failover_flags(&self) -> FailoverFlags {
        FailoverFlags {
            disable_task_a: false,
            enable_writer_in_task_b: true,
        }
    }
}

#[derive(Debug, Default)]
pub struct RdsMysqlDialect;

#[async_trait]
impl Dialect for RdsMysqlDialect {
    fn code(&self) -> DialectCode {
        DialectCode::RdsMysql
    }

    fn default_port(&self) -> u16 {
        3306
    }

    fn topology_query(&self) -> &'static str {
        MysqlDialect.topology_query()
    }

    fn parse_topology_rows(&self, rows: &[Row]) -> Result<Vec<TopologyRow>> {
        parse_generic_topology_rows(rows)
    }

    fn host_role_query(&self) -> &'static str {
        MysqlDialect.host_role_query()
    }

    fn parse_host_role(&self, rows: &[Row]) -> Result<HostRole> {
        MysqlDialect.parse_host_role(rows)
    }

    async fn is_dialect(&self, driver: &dyn Driver, client: &dyn DbClient) -> Result<bool> {
        let version = driver.server_version(client).await?;
        Ok(version.to_lowercase().contains("rds"))
    }
}

#[derive(Debug, Default)]
pub struct PostgresDialect;

#[async_trait]
impl Dialect for PostgresDialect {
    fn code(&self) -> DialectCode {
        DialectCode::Postgres
    }

    fn default_port(&self) -> u16 {
        5432
    }

    fn topology_query(&self) -> &'static str {
        "SELECT server_id, is_writer, cpu, lag, last_update_timestamp FROM aurora_replica_status()"
    }

    fn parse_topology_rows(&self, rows: &[Row]) -> Result<Vec<TopologyRow>> {
        parse_generic_topology_rows(rows)
    }

    fn host_role_query(&self) -> &'static str {
        "SELECT pg_is_in_recovery() AS is_replica"
    }

    fn parse_host_role(&self, rows: &[Row]) -> Result<HostRole> {
        let is_replica = rows
            .first()
            .and_then(|r| r.get("is_replica"))
            .and_then(|v| v.as_bool())
            .ok_or_else(|| parse_error("missing is_replica column in host role query result"))?;
        Ok(if is_replica {
            HostRole::Reader
        } else {
            HostRole::Writer
        })
    }

    async fn is_dialect(&self, driver: &dyn Driver, client: &dyn DbClient) -> Result<bool> {
        let version = driver.server_version(client).await?;
        Ok(!version.to_lowercase().contains("aurora"))
    }

    fn update_candidates(&self) -> Vec<DialectCode> {
        vec![DialectCode::AuroraPostgres, DialectCode::RdsPostgres]
    }
}

#[derive(Debug, Default)]
pub struct AuroraPostgresDialect;

#[async_trait]
impl Dialect for AuroraPostgresDialect {
    fn code(&self) -> DialectCode {
        DialectCode::AuroraPostgres
    }

    fn default_port(&self) -> u16 {
        5432
    }

    fn topology_query(&self) -> &'static str {
        PostgresDialect.topology_query()
    }

    fn parse_topology_rows(&self, rows: &[Row]) -> Result<Vec<TopologyRow>> {
        parse_generic_topology_rows(rows)
    }

    fn host_role_query(&self) -> &'static str {
        PostgresDialect.host_role_query()
    }

    fn parse_host_role(&self, rows: &[Row]) -> Result<HostRole> {
        PostgresDialect.parse_host_role(rows)
    }

    async fn is_dialect(&self, driver: &dyn Driver, client: &dyn DbClient) -> Result<bool> {
        let version = driver.server_version(client).await?;
        Ok(version.to_lowercase().contains("aurora"))
    }

    fn failover_flags(&self) -> FailoverFlags {
        FailoverFlags {
            disable_task_a: false,
            enable_writer_in_task_b: true,
        }
    }
}

#[derive(Debug, Default)]
pub struct RdsPostgresDialect;

#[async_trait]
impl Dialect for RdsPostgresDialect {
    fn code(&self) -> DialectCode {
        DialectCode::RdsPostgres
    }

    fn default_port(&self) -> u16 {
        5432
    }

    fn topology_query(&self) -> &'static str {
        PostgresDialect.topology_query()
    }

    fn parse_topology_rows(&self, rows: &[Row]) -> Result<Vec<TopologyRow>> {
        parse_generic_topology_rows(rows)
    }

    fn host_role_query(&self) -> &'static str {
        PostgresDialect.host_role_query()
    }

    fn parse_host_role(&self, rows: &[Row]) -> Result<HostRole> {
        PostgresDialect.parse_host_role(rows)
    }

    async fn is_dialect(&self, driver: &dyn Driver, client: &dyn DbClient) -> Result<bool> {
        let version = driver.server_version(client).await?;
        Ok(version.to_lowercase().contains("rds"))
    }
}

fn parse_generic_topology_rows(rows: &[Row]) -> Result<Vec<TopologyRow>> {
    rows.iter()
        .map(|row| {
            let server_id = row
                .get("server_id")
                .or_else(|| row.get("SERVER_ID"))
                .and_then(|v| v.as_str())
                .ok_or_else(|| parse_error("missing server_id column in topology query result"))?
                .to_string();
            let is_writer = row
                .get("is_writer")
                .or_else(|| row.get("IS_WRITER"))
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            let cpu = row
                .get("cpu")
                .or_else(|| row.get("CPU"))
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0);
            let lag = row
                .get("lag")
                .or_else(|| row.get("REPLICA_LAG_IN_MILLISECONDS"))
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0);
            Ok(TopologyRow {
                server_id,
                is_writer,
                cpu,
                lag,
                last_update_time: SystemTime::now(),
            })
        })
        .collect()
}

/// Resolves a [`DialectCode`] to its concrete [`Dialect`] implementation.
pub fn dialect_for_code(code: DialectCode) -> Box<dyn Dialect> {
    match code {
        DialectCode::Mysql => Box::new(MysqlDialect),
        DialectCode::AuroraMysql => Box::new(AuroraMysqlDialect),
        DialectCode::RdsMysql => Box::new(RdsMysqlDialect),
        DialectCode::Postgres => Box::new(PostgresDialect),
        DialectCode::AuroraPostgres => Box::new(AuroraPostgresDialect),
        DialectCode::RdsPostgres => Box::new(RdsPostgresDialect),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    fn row_at_age(is_writer: bool, age: Duration) -> TopologyRow {
        TopologyRow {
            server_id: "x".into(),
            is_writer,
            cpu: 0.0,
            lag: 0.0,
            last_update_time: SystemTime::now() - age,
        }
    }

    #[test]
    fn stale_rows_are_filtered_except_writer() {
        let now = SystemTime::now();
        let rows = vec![
            row_at_age(false, Duration::from_secs(60)),
            row_at_age(false, Duration::from_secs(10 * 60)),
            row_at_age(true, Duration::from_secs(10 * 60)),
        ];
        let filtered = filter_stale_rows(rows, now);
        assert_eq!(filtered.len(), 2);
        assert!(filtered.iter().any(|r| r.is_writer));
    }

    #[test]
    fn mysql_parses_topology_row() {
        let mut cols = HashMap::new();
        cols.insert("server_id".to_string(), crate::driver::Value::Text("i-1".into()));
        cols.insert("is_writer".to_string(), crate::driver::Value::Bool(true));
        let row = Row::new(cols);
        let parsed = MysqlDialect.parse_topology_rows(&[row]).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].server_id, "i-1");
        assert!(parsed[0].is_writer);
    }

    #[test]
    fn postgres_role_query_parses_writer() {
        let mut cols = HashMap::new();
        cols.insert("is_replica".to_string(), crate::driver::Value::Bool(false));
        let row = Row::new(cols);
        let role = PostgresDialect.parse_host_role(&[row]).unwrap();
        assert_eq!(role, HostRole::Writer);
    }
}
