//! Cluster topology: an ordered list of [`HostInfo`] keyed by cluster id.

use std::sync::Arc;

use crate::host_info::{HostInfo, HostRole};

/// An ordered, shared snapshot of a cluster's members.
///
/// Topology updates publish the whole list at once (spec.md §5): readers
/// never observe a partially built topology, because a `Topology` is
/// immutable once constructed and the provider swaps an `Arc<Topology>`
/// rather than mutating one in place.
#[derive(Debug, Clone)]
pub struct Topology {
    cluster_id: String,
    hosts: Arc<Vec<Arc<HostInfo>>>,
}

impl Topology {
    pub fn new(cluster_id: impl Into<String>, hosts: Vec<Arc<HostInfo>>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            hosts: Arc::new(hosts),
        }
    }

    pub fn empty(cluster_id: impl Into<String>) -> Self {
        Self::new(cluster_id, Vec::new())
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    pub fn hosts(&self) -> &[Arc<HostInfo>] {
        &self.hosts
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// The current writer, if any. At most one writer is expected under
    /// normal operation (spec.md §3, §8 invariant 1); a momentarily empty or
    /// standalone topology is tolerated and simply yields `None` or a
    /// single host with an unknown role.
    pub fn writer(&self) -> Option<&Arc<HostInfo>> {
        self.hosts.iter().find(|h| h.role() == HostRole::Writer)
    }

    pub fn readers(&self) -> Vec<&Arc<HostInfo>> {
        self.hosts
            .iter()
            .filter(|h| h.role() == HostRole::Reader)
            .collect()
    }

    pub fn find_by_alias(&self, alias: &str) -> Option<&Arc<HostInfo>> {
        self.hosts
            .iter()
            .find(|h| h.all_aliases().contains(alias))
    }

    /// The number of hosts currently carrying [`HostRole::Writer`]. Used by
    /// tests asserting spec.md §8 invariant 1 (at most one writer).
    pub fn writer_count(&self) -> usize {
        self.hosts
            .iter()
            .filter(|h| h.role() == HostRole::Writer)
            .count()
    }
}
