//! Host-list providers: the source of truth for what a cluster's topology
//! looks like (spec.md §4.3).
//!
//! Two implementations, polymorphic over a shared capability set: a static
//! [`connection_string::ConnectionStringHostListProvider`] for non-dynamic
//! deployments, and a live [`rds::RdsHostListProvider`] backed by the
//! dialect's topology query. Capabilities a provider does not implement
//! (e.g. `identify_connection` on the static provider) return
//! [`crate::error::ErrorKind::UnsupportedMethod`] rather than being absent
//! from the trait, so callers can treat every provider polymorphically
//! instead of downcasting.

pub mod connection_string;
pub mod rds;

use std::sync::Arc;

use async_trait::async_trait;

use crate::driver::DbClient;
use crate::error::{Error, ErrorKind, Result};
use crate::host_info::{HostInfo, HostRole};
use crate::topology::Topology;

pub use connection_string::ConnectionStringHostListProvider;
pub use rds::RdsHostListProvider;

#[async_trait]
pub trait HostListProvider: Send + Sync {
    /// The hosts parsed from the initial connection URL, before any refresh.
    fn initial_hosts(&self) -> Vec<Arc<HostInfo>>;

    /// The latest known hosts without requiring a live connection: the most
    /// recently cached topology if one has been fetched, or [`initial_hosts`]
    /// otherwise. Distinct from `initial_hosts` in that a dynamic provider
    /// returns the live, refreshed list once one exists (spec.md §4.6:
    /// `getHosts()` vs. `getAllHosts()`).
    ///
    /// [`initial_hosts`]: HostListProvider::initial_hosts
    async fn all_known_hosts(&self) -> Vec<Arc<HostInfo>> {
        self.initial_hosts()
    }

    /// Returns the current topology, using a cached value if still fresh.
    async fn refresh(&self, client: &dyn DbClient) -> Result<Topology>;

    /// Returns the current topology, always re-querying the server.
    async fn force_refresh(&self, client: &dyn DbClient) -> Result<Topology> {
        self.refresh(client).await
    }

    /// Identifies which [`HostInfo`] in the latest topology `client` is
    /// connected to.
    async fn identify_connection(&self, _client: &dyn DbClient) -> Result<Option<Arc<HostInfo>>> {
        Err(unsupported("identify_connection"))
    }

    /// Queries `client` directly for its current role.
    async fn get_host_role(&self, _client: &dyn DbClient) -> Result<HostRole> {
        Err(unsupported("get_host_role"))
    }

    /// Whether this provider refreshes topology from a live server rather
    /// than serving the hosts parsed out of the initial connection string.
    /// The failover plugin requires a dynamic provider (spec.md §4.13).
    fn is_dynamic(&self) -> bool {
        false
    }
}

fn unsupported(method: &str) -> Error {
    Error::new(ErrorKind::UnsupportedMethod {
        method: method.to_string(),
    })
}

/// A cluster-instance-host-pattern override (spec.md §4.3): a `?`-templated
/// string the instance id is substituted into. Must contain `?` and must not
/// point at an RDS proxy or custom-cluster endpoint, since those endpoints
/// don't address individual instances.
pub fn validate_instance_host_pattern(pattern: &str) -> Result<()> {
    use crate::url_classifier::{self, RdsUrlType};

    if !url_classifier::is_dns_pattern_valid(pattern) {
        return Err(Error::new(ErrorKind::IllegalArgument {
            message: format!("cluster instance host pattern '{}' must contain '?'", pattern),
        }));
    }
    let substituted = pattern.replacen('?', "probe-instance", 1);
    let url_type = url_classifier::classify(&substituted);
    if matches!(url_type, RdsUrlType::RdsProxy | RdsUrlType::RdsCustomCluster) {
        return Err(Error::new(ErrorKind::IllegalArgument {
            message: format!(
                "cluster instance host pattern '{}' resolves to a proxy or custom-cluster endpoint",
                pattern
            ),
        }));
    }
    Ok(())
}
