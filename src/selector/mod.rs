//! Host selectors: pick one [`HostInfo`] from a topology slice for a given
//! role (spec.md §4.8).

pub mod fastest_response;
pub mod random;
pub mod round_robin;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::host_info::{HostAvailability, HostInfo, HostRole};

pub use fastest_response::FastestResponseSelector;
pub use random::RandomSelector;
pub use round_robin::RoundRobinSelector;

/// A selector's acceptance/selection surface. Shared across strategies so
/// the plugin pipeline's `acceptsStrategy`/`getHostInfoByStrategy` can stay
/// strategy-agnostic (spec.md §4.6).
#[async_trait]
pub trait HostSelector: Send + Sync {
    fn strategy_name(&self) -> &'static str;

    async fn get_host(
        &self,
        hosts: &[Arc<HostInfo>],
        role: HostRole,
        props: &HashMap<String, String>,
    ) -> Result<Arc<HostInfo>>;
}

/// Shared first step for every selector: hosts with the requested role that
/// are currently available, stably sorted by lowercased host name (spec.md
/// §4.8).
pub fn eligible_hosts(hosts: &[Arc<HostInfo>], role: HostRole) -> Vec<Arc<HostInfo>> {
    let mut eligible: Vec<Arc<HostInfo>> = hosts
        .iter()
        .filter(|h| h.role() == role && h.raw_availability() == HostAvailability::Available)
        .cloned()
        .collect();
    eligible.sort_by_key(|h| h.host().to_lowercase());
    eligible
}

pub fn no_eligible_host_error(role: HostRole) -> crate::error::Error {
    crate::error::Error::new(crate::error::ErrorKind::UnavailableHost {
        host: format!("<none matching role {:?}>", role),
        message: "no available host matches the requested role".to_string(),
    })
}
