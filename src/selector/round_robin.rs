//! Weighted round-robin host selection (spec.md §4.8).
//!
//! Per-cluster state is cached for 10 minutes per host, keyed by cluster id;
//! a `"h1:w1,h2:w2"` weight-pair property resets the state when it changes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{eligible_hosts, no_eligible_host_error, HostSelector};
use crate::cache::SlidingExpirationCache;
use crate::error::{Error, ErrorKind, Result};
use crate::host_info::{HostInfo, HostRole};

pub const ROUND_ROBIN_STATE_TTL: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_WEIGHT: u32 = 1;

#[derive(Debug, Clone)]
struct ClusterState {
    last_host: Option<String>,
    weight_counter: u32,
    cluster_weights: HashMap<String, u32>,
    default_weight: u32,
    last_property_value: Option<String>,
}

impl Default for ClusterState {
    fn default() -> Self {
        Self {
            last_host: None,
            weight_counter: 0,
            cluster_weights: HashMap::new(),
            default_weight: DEFAULT_WEIGHT,
            last_property_value: None,
        }
    }
}

/// Parses a `"h1:w1,h2:w2"` property string. Weights must be integers >= 1.
pub(crate) fn parse_weight_pairs(value: &str) -> Result<HashMap<String, u32>> {
    let mut map = HashMap::new();
    for pair in value.split(',').filter(|p| !p.is_empty()) {
        let (host, weight) = pair.split_once(':').ok_or_else(|| {
            Error::new(ErrorKind::IllegalArgument {
                message: format!("malformed round-robin weight pair '{}'", pair),
            })
        })?;
        let weight: u32 = weight.parse().map_err(|_| {
            Error::new(ErrorKind::IllegalArgument {
                message: format!("round-robin weight for '{}' must be an integer", host),
            })
        })?;
        if weight < 1 {
            return Err(Error::new(ErrorKind::IllegalArgument {
                message: format!("round-robin weight for '{}' must be >= 1", host),
            }));
        }
        map.insert(host.to_string(), weight);
    }
    Ok(map)
}

pub struct RoundRobinSelector {
    cluster_id: String,
    state_cache: SlidingExpirationCache<String, Arc<Mutex<ClusterState>>>,
}

impl RoundRobinSelector {
    pub fn new(cluster_id: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            state_cache: SlidingExpirationCache::new(ROUND_ROBIN_STATE_TTL),
        }
    }

    async fn state_for(&self) -> Arc<Mutex<ClusterState>> {
        self.state_cache
            .compute_if_absent(
                self.cluster_id.clone(),
                |_| async { Arc::new(Mutex::new(ClusterState::default())) },
                ROUND_ROBIN_STATE_TTL,
            )
            .await
    }
}

#[async_trait]
impl HostSelector for RoundRobinSelector {
    fn strategy_name(&self) -> &'static str {
        "round_robin"
    }

    async fn get_host(
        &self,
        hosts: &[Arc<HostInfo>],
        role: HostRole,
        props: &HashMap<String, String>,
    ) -> Result<Arc<HostInfo>> {
        let eligible = eligible_hosts(hosts, role);
        if eligible.is_empty() {
            return Err(no_eligible_host_error(role));
        }

        let state_lock = self.state_for().await;
        let mut state = state_lock.lock().await;

        if let Some(weight_property) = props.get("round_robin_host_weight_pairs") {
            if state.last_property_value.as_deref() != Some(weight_property.as_str()) {
                state.cluster_weights = parse_weight_pairs(weight_property)?;
                state.last_property_value = Some(weight_property.clone());
                state.last_host = None;
                state.weight_counter = 0;
            }
        }
        if let Some(default_weight) = props.get("round_robin_default_weight") {
            state.default_weight = default_weight.parse().unwrap_or(DEFAULT_WEIGHT).max(1);
        }

        if state.weight_counter > 0 {
            if let Some(last) = state.last_host.clone() {
                if let Some(host) = eligible.iter().find(|h| h.host() == last) {
                    state.weight_counter -= 1;
                    return Ok(host.clone());
                }
            }
        }

        let last_index = state
            .last_host
            .as_ref()
            .and_then(|last| eligible.iter().position(|h| h.host() == last));
        let next_index = match last_index {
            Some(i) => (i + 1) % eligible.len(),
            None => 0,
        };
        let chosen = eligible[next_index].clone();
        let weight = state
            .cluster_weights
            .get(chosen.host())
            .copied()
            .unwrap_or(state.default_weight)
            .max(1);
        state.last_host = Some(chosen.host().to_string());
        state.weight_counter = weight.saturating_sub(1);
        Ok(chosen)
    }
}
