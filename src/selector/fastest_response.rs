//! Fastest-observed-response host selection (spec.md §4.8).
//!
//! Delegates the actual latency measurements to per-host
//! [`HostResponseTimeMonitor`]s, cached per role for the measurement
//! interval so repeated selections don't thrash.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::seq::SliceRandom;

use super::{eligible_hosts, no_eligible_host_error, HostSelector};
use crate::cache::SlidingExpirationCache;
use crate::error::Result;
use crate::host_info::{HostInfo, HostRole};

/// A monitor tracking one host's latest measured response time. Real
/// implementations periodically probe the host and call
/// [`Self::record_latency_ms`]; this type only holds the latest reading.
#[derive(Debug, Default)]
pub struct HostResponseTimeMonitor {
    latest_latency_ms: AtomicU64,
}

impl HostResponseTimeMonitor {
    const UNKNOWN: u64 = u64::MAX;

    pub fn new() -> Self {
        Self {
            latest_latency_ms: AtomicU64::new(Self::UNKNOWN),
        }
    }

    pub fn record_latency_ms(&self, latency_ms: u64) {
        self.latest_latency_ms.store(latency_ms, Ordering::Relaxed);
    }

    pub fn latest_latency_ms(&self) -> Option<u64> {
        match self.latest_latency_ms.load(Ordering::Relaxed) {
            Self::UNKNOWN => None,
            ms => Some(ms),
        }
    }
}

pub struct FastestResponseSelector {
    measurement_interval: Duration,
    monitors: SlidingExpirationCache<String, Arc<HostResponseTimeMonitor>>,
    fastest_by_role: SlidingExpirationCache<String, Arc<HostInfo>>,
}

impl FastestResponseSelector {
    pub fn new(measurement_interval: Duration) -> Self {
        Self {
            measurement_interval,
            monitors: SlidingExpirationCache::new(measurement_interval),
            fastest_by_role: SlidingExpirationCache::new(measurement_interval),
        }
    }

    pub async fn monitor_for(&self, host: &HostInfo) -> Arc<HostResponseTimeMonitor> {
        self.monitors
            .compute_if_absent(
                host.canonical_alias(),
                |_| async { Arc::new(HostResponseTimeMonitor::new()) },
                self.measurement_interval,
            )
            .await
    }

    fn role_key(role: HostRole) -> String {
        format!("{:?}", role)
    }

    async fn recompute(&self, eligible: &[Arc<HostInfo>]) -> Result<Arc<HostInfo>> {
        let mut with_latency = Vec::with_capacity(eligible.len());
        for host in eligible {
            let monitor = self.monitor_for(host).await;
            with_latency.push((host.clone(), monitor.latest_latency_ms()));
        }

        if with_latency.iter().all(|(_, latency)| latency.is_none()) {
            return with_latency
                .choose(&mut rand::thread_rng())
                .map(|(host, _)| host.clone())
                .ok_or_else(|| no_eligible_host_error(HostRole::Unknown));
        }

        with_latency.sort_by_key(|(_, latency)| latency.unwrap_or(u64::MAX));
        Ok(with_latency[0].0.clone())
    }
}

#[async_trait]
impl HostSelector for FastestResponseSelector {
    fn strategy_name(&self) -> &'static str {
        "fastest_response"
    }

    async fn get_host(
        &self,
        hosts: &[Arc<HostInfo>],
        role: HostRole,
        _props: &HashMap<String, String>,
    ) -> Result<Arc<HostInfo>> {
        let eligible = eligible_hosts(hosts, role);
        if eligible.is_empty() {
            return Err(no_eligible_host_error(role));
        }

        let key = Self::role_key(role);
        if let Some(cached) = self.fastest_by_role.get(&key).await {
            if eligible.iter().any(|h| h.same_endpoint(&cached)) {
                return Ok(cached);
            }
        }

        let fastest = self.recompute(&eligible).await?;
        self.fastest_by_role
            .put(key, fastest.clone(), self.measurement_interval)
            .await;
        Ok(fastest)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::host_info::{HostAvailability, HostInfoBuilder};

    fn host(name: &str) -> Arc<HostInfo> {
        Arc::new(
            HostInfoBuilder::new()
                .host(name)
                .port(1)
                .role(HostRole::Reader)
                .availability(HostAvailability::Available)
                .build()
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn picks_lowest_latency_host() {
        let a = host("a");
        let b = host("b");
        let selector = FastestResponseSelector::new(Duration::from_secs(60));
        selector.monitor_for(&a).await.record_latency_ms(50);
        selector.monitor_for(&b).await.record_latency_ms(5);

        let picked = selector
            .get_host(&[a, b], HostRole::Reader, &HashMap::new())
            .await
            .unwrap();
        assert_eq!(picked.host(), "b");
    }

    #[tokio::test]
    async fn falls_back_to_random_when_all_unknown() {
        let a = host("a");
        let selector = FastestResponseSelector::new(Duration::from_secs(60));
        let picked = selector
            .get_host(&[a.clone()], HostRole::Reader, &HashMap::new())
            .await
            .unwrap();
        assert_eq!(picked.host(), "a");
    }
}
