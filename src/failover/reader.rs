//! Reader failover: shuffled priority list, two-at-a-time racing probes,
//! strict-reader re-validation (spec.md §4.9).

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;

use crate::driver::{DbClient, Driver};
use crate::error::{Error, ErrorKind, Result};
use crate::host_info::{HostAvailability, HostInfo, HostRole};
use crate::host_list_provider::HostListProvider;
use crate::topology::Topology;

pub struct ReaderFailoverResult {
    pub client: Arc<dyn DbClient>,
    pub host: Arc<HostInfo>,
    pub is_connected: bool,
}

pub struct ReaderFailoverHandler {
    driver: Arc<dyn Driver>,
    max_failover_timeout: Duration,
    per_attempt_timeout: Duration,
    strict_reader: bool,
}

impl ReaderFailoverHandler {
    pub fn new(
        driver: Arc<dyn Driver>,
        max_failover_timeout: Duration,
        per_attempt_timeout: Duration,
        strict_reader: bool,
    ) -> Self {
        Self {
            driver,
            max_failover_timeout,
            per_attempt_timeout,
            strict_reader,
        }
    }

    pub async fn failover(
        &self,
        topology: &Topology,
        current_host: Option<&Arc<HostInfo>>,
        host_list_provider: &dyn HostListProvider,
    ) -> Result<ReaderFailoverResult> {
        if let Some(host) = current_host {
            host.set_availability(HostAvailability::NotAvailable);
        }

        let deadline = Instant::now() + self.max_failover_timeout;

        loop {
            let priority = build_priority_list(topology, self.strict_reader);
            for batch in priority.chunks(2) {
                if Instant::now() >= deadline {
                    return Err(Error::new(ErrorKind::Timeout {
                        host: None,
                        elapsed: self.max_failover_timeout,
                    }));
                }

                if let Some(result) = self.race_batch(batch).await {
                    if !self.strict_reader {
                        return Ok(result);
                    }
                    let fresh = host_list_provider.force_refresh(result.client.as_ref()).await?;
                    let still_reader = fresh
                        .find_by_alias(&result.host.canonical_alias())
                        .map(|h| h.role() == HostRole::Reader)
                        .unwrap_or(false);
                    if still_reader {
                        return Ok(result);
                    }
                    self.driver.close(result.client).await;
                    continue;
                }

                tokio::time::sleep(Duration::from_secs(1)).await;
            }

            if Instant::now() >= deadline {
                return Err(Error::new(ErrorKind::Timeout {
                    host: None,
                    elapsed: self.max_failover_timeout,
                }));
            }
        }
    }

    async fn race_batch(&self, batch: &[Arc<HostInfo>]) -> Option<ReaderFailoverResult> {
        match batch {
            [] => None,
            [only] => probe(self.driver.as_ref(), only.clone(), self.per_attempt_timeout)
                .await
                .ok(),
            [a, b] => {
                let fa = probe(self.driver.as_ref(), a.clone(), self.per_attempt_timeout);
                let fb = probe(self.driver.as_ref(), b.clone(), self.per_attempt_timeout);
                tokio::pin!(fa);
                tokio::pin!(fb);
                tokio::select! {
                    res = &mut fa => match res {
                        Ok(r) => Some(r),
                        Err(_) => (&mut fb).await.ok(),
                    },
                    res = &mut fb => match res {
                        Ok(r) => Some(r),
                        Err(_) => (&mut fa).await.ok(),
                    },
                }
            }
            _ => None,
        }
    }
}

async fn probe(
    driver: &dyn Driver,
    host: Arc<HostInfo>,
    timeout: Duration,
) -> std::result::Result<ReaderFailoverResult, Arc<HostInfo>> {
    match crate::runtime::timeout(timeout, driver.connect(&host)).await {
        Ok(Ok(client)) => {
            host.set_availability(HostAvailability::Available);
            Ok(ReaderFailoverResult {
                client,
                host,
                is_connected: true,
            })
        }
        _ => Err(host),
    }
}

/// Shuffles available readers first, then shuffled down (unavailable)
/// readers, optionally appending the writer when `strict_reader` is false or
/// there are no readers at all (spec.md §4.9 step 2).
fn build_priority_list(topology: &Topology, strict_reader: bool) -> Vec<Arc<HostInfo>> {
    let mut available: Vec<Arc<HostInfo>> = topology
        .readers()
        .into_iter()
        .filter(|h| h.raw_availability() == HostAvailability::Available)
        .cloned()
        .collect();
    let mut down: Vec<Arc<HostInfo>> = topology
        .readers()
        .into_iter()
        .filter(|h| h.raw_availability() == HostAvailability::NotAvailable)
        .cloned()
        .collect();

    let mut rng = rand::thread_rng();
    available.shuffle(&mut rng);
    down.shuffle(&mut rng);

    let mut priority = available;
    priority.extend(down);

    let no_readers = topology.readers().is_empty();
    if !strict_reader || no_readers {
        if let Some(writer) = topology.writer() {
            priority.push(writer.clone());
        }
    }
    priority
}
