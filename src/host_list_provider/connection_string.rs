//! The static host-list provider: parses the initial URL once and never
//! queries the server again (spec.md §4.3).

use std::sync::Arc;

use async_trait::async_trait;

use super::HostListProvider;
use crate::driver::DbClient;
use crate::error::{Error, ErrorKind, Result};
use crate::host_info::HostInfo;
use crate::topology::Topology;

/// A provider over a fixed host list, for deployments that aren't a managed
/// cluster (e.g. a single standalone instance, or a self-managed replica
/// set the caller lists explicitly).
pub struct ConnectionStringHostListProvider {
    cluster_id: String,
    hosts: Vec<Arc<HostInfo>>,
}

impl ConnectionStringHostListProvider {
    /// Builds a provider over `hosts`. An empty list is a fatal
    /// misconfiguration (spec.md §4.3: "empty parsed host list → fatal
    /// error").
    pub fn new(cluster_id: impl Into<String>, hosts: Vec<Arc<HostInfo>>) -> Result<Self> {
        if hosts.is_empty() {
            return Err(Error::new(ErrorKind::IllegalArgument {
                message: "connection string yielded an empty host list".to_string(),
            }));
        }
        Ok(Self {
            cluster_id: cluster_id.into(),
            hosts,
        })
    }
}

#[async_trait]
impl HostListProvider for ConnectionStringHostListProvider {
    fn initial_hosts(&self) -> Vec<Arc<HostInfo>> {
        self.hosts.clone()
    }

    async fn refresh(&self, _client: &dyn DbClient) -> Result<Topology> {
        Ok(Topology::new(self.cluster_id.clone(), self.hosts.clone()))
    }
}
