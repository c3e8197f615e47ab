//! Uniform-random host selection (spec.md §4.8).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rand::seq::SliceRandom;

use super::{eligible_hosts, no_eligible_host_error, HostSelector};
use crate::error::Result;
use crate::host_info::{HostInfo, HostRole};

#[derive(Debug, Default)]
pub struct RandomSelector;

#[async_trait]
impl HostSelector for RandomSelector {
    fn strategy_name(&self) -> &'static str {
        "random"
    }

    async fn get_host(
        &self,
        hosts: &[Arc<HostInfo>],
        role: HostRole,
        _props: &HashMap<String, String>,
    ) -> Result<Arc<HostInfo>> {
        let eligible = eligible_hosts(hosts, role);
        eligible
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or_else(|| no_eligible_host_error(role))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::host_info::{HostAvailability, HostInfoBuilder};

    #[tokio::test]
    async fn picks_among_eligible_readers() {
        let a = Arc::new(
            HostInfoBuilder::new()
                .host("a")
                .port(1)
                .role(HostRole::Reader)
                .availability(HostAvailability::Available)
                .build()
                .unwrap(),
        );
        let hosts = vec![a.clone()];
        let selector = RandomSelector;
        let picked = selector
            .get_host(&hosts, HostRole::Reader, &HashMap::new())
            .await
            .unwrap();
        assert_eq!(picked.host(), "a");
    }

    #[tokio::test]
    async fn errors_when_nothing_eligible() {
        let selector = RandomSelector;
        let result = selector.get_host(&[], HostRole::Reader, &HashMap::new()).await;
        assert!(result.is_err());
    }
}
