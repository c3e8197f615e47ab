//! Parses the caller-supplied property map into a strongly typed
//! configuration (spec.md §6), mirroring the "parse into a typed options
//! struct, then validate" shape used elsewhere in this crate's lineage for
//! connection-string parsing.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, ErrorKind, Result};
use crate::failover::FailoverMode;
use crate::host_list_provider::validate_instance_host_pattern;

/// A recognized plugin selection code (spec.md §6). Codes outside this
/// crate's component design (`iam`, `federatedAuth`, `okta`,
/// `secretsManager`, `auroraConnectionTracker`, `dev`) parse successfully,
/// for compatibility with configuration shared across a wider plugin
/// ecosystem, but this crate's client factories do not instantiate a plugin
/// for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginCode {
    Failover,
    Failover2,
    Efm,
    Efm2,
    Iam,
    FederatedAuth,
    Okta,
    SecretsManager,
    ReadWriteSplitting,
    AuroraConnectionTracker,
    InitialConnection,
    StaleDns,
    FastestResponseStrategy,
    Dev,
}

impl FromStr for PluginCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "failover" => Self::Failover,
            "failover2" => Self::Failover2,
            "efm" => Self::Efm,
            "efm2" => Self::Efm2,
            "iam" => Self::Iam,
            "federatedAuth" => Self::FederatedAuth,
            "okta" => Self::Okta,
            "secretsManager" => Self::SecretsManager,
            "readWriteSplitting" => Self::ReadWriteSplitting,
            "auroraConnectionTracker" => Self::AuroraConnectionTracker,
            "initialConnection" => Self::InitialConnection,
            "staleDns" => Self::StaleDns,
            "fastestResponseStrategy" => Self::FastestResponseStrategy,
            "dev" => Self::Dev,
            other => {
                return Err(Error::new(ErrorKind::IllegalArgument {
                    message: format!("unrecognized plugin code '{}'", other),
                }))
            }
        })
    }
}

/// The reader-host selection strategy named in `readerHostSelectorStrategy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SelectorStrategy {
    RoundRobin,
    Random,
    FastestResponse,
}

impl FromStr for SelectorStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "roundRobin" => Self::RoundRobin,
            "random" => Self::Random,
            "fastestResponse" => Self::FastestResponse,
            other => {
                return Err(Error::new(ErrorKind::IllegalArgument {
                    message: format!("unrecognized reader host selector strategy '{}'", other),
                }))
            }
        })
    }
}

/// The fully parsed and validated configuration for a wrapped connection
/// (spec.md §6). Connection parameters themselves (host, port, user,
/// password, database) are left in the property map and forwarded to the
/// driver unchanged; only wrapper-specific keys are consumed here.
#[derive(Debug, Clone)]
pub struct WrapperConfig {
    pub plugins: Vec<PluginCode>,
    pub reader_host_selector_strategy: SelectorStrategy,
    pub round_robin_host_weight_pairs: Option<String>,
    pub round_robin_default_weight: u32,
    pub enable_cluster_aware_failover: bool,
    pub failover_mode: FailoverMode,
    pub failover_timeout: Duration,
    pub open_connection_retry_timeout: Duration,
    pub open_connection_retry_interval: Duration,
    pub cluster_topology_refresh_rate: Duration,
    pub failure_detection_enabled: bool,
    pub failure_detection_time: Duration,
    pub failure_detection_interval: Duration,
    pub failure_detection_count: u32,
    pub monitor_disposal_time: Duration,
    pub cluster_instance_host_pattern: Option<String>,
    pub cluster_id: Option<String>,
}

impl Default for WrapperConfig {
    fn default() -> Self {
        Self {
            plugins: Vec::new(),
            reader_host_selector_strategy: SelectorStrategy::RoundRobin,
            round_robin_host_weight_pairs: None,
            round_robin_default_weight: 1,
            enable_cluster_aware_failover: true,
            failover_mode: FailoverMode::ReaderOrWriter,
            failover_timeout: Duration::from_secs(60),
            open_connection_retry_timeout: Duration::from_secs(30),
            open_connection_retry_interval: Duration::from_secs(1),
            cluster_topology_refresh_rate: Duration::from_secs(30),
            failure_detection_enabled: true,
            failure_detection_time: Duration::from_millis(30_000),
            failure_detection_interval: Duration::from_millis(5_000),
            failure_detection_count: 3,
            monitor_disposal_time: Duration::from_millis(60_000),
            cluster_instance_host_pattern: None,
            cluster_id: None,
        }
    }
}

impl WrapperConfig {
    /// Parses a property map into a [`WrapperConfig`], applying defaults for
    /// any key that's absent. Parsing itself cannot observe cross-field
    /// constraints (e.g. a host pattern pointing at a proxy endpoint); those
    /// are checked by [`Self::validate`].
    pub fn parse(props: &HashMap<String, String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(raw) = props.get("plugins") {
            config.plugins = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(PluginCode::from_str)
                .collect::<Result<Vec<_>>>()?;
        }

        if let Some(raw) = props.get("readerHostSelectorStrategy") {
            config.reader_host_selector_strategy = SelectorStrategy::from_str(raw)?;
        }

        config.round_robin_host_weight_pairs = props.get("roundRobinHostWeightPairs").cloned();

        if let Some(raw) = props.get("roundRobinDefaultWeight") {
            config.round_robin_default_weight = parse_positive_int(raw, "roundRobinDefaultWeight")?;
        }

        if let Some(raw) = props.get("enableClusterAwareFailover") {
            config.enable_cluster_aware_failover = parse_bool(raw, "enableClusterAwareFailover")?;
        }

        if let Some(raw) = props.get("failoverMode") {
            config.failover_mode = FailoverMode::from_str(raw)?;
        }

        if let Some(raw) = props.get("failoverTimeoutMs") {
            config.failover_timeout = parse_millis(raw, "failoverTimeoutMs")?;
        }

        if let Some(raw) = props.get("openConnectionRetryTimeoutMs") {
            config.open_connection_retry_timeout = parse_millis(raw, "openConnectionRetryTimeoutMs")?;
        }

        if let Some(raw) = props.get("openConnectionRetryIntervalMs") {
            config.open_connection_retry_interval =
                parse_millis(raw, "openConnectionRetryIntervalMs")?;
        }

        if let Some(raw) = props.get("clusterTopologyRefreshRateMs") {
            config.cluster_topology_refresh_rate = parse_millis(raw, "clusterTopologyRefreshRateMs")?;
        }

        if let Some(raw) = props.get("failureDetectionEnabled") {
            config.failure_detection_enabled = parse_bool(raw, "failureDetectionEnabled")?;
        }

        if let Some(raw) = props.get("failureDetectionTimeMs") {
            config.failure_detection_time = parse_millis(raw, "failureDetectionTimeMs")?;
        }

        if let Some(raw) = props.get("failureDetectionIntervalMs") {
            config.failure_detection_interval = parse_millis(raw, "failureDetectionIntervalMs")?;
        }

        if let Some(raw) = props.get("failureDetectionCount") {
            config.failure_detection_count = parse_positive_int(raw, "failureDetectionCount")?;
        }

        if let Some(raw) = props.get("monitorDisposalTimeMs") {
            config.monitor_disposal_time = parse_millis(raw, "monitorDisposalTimeMs")?;
        }

        config.cluster_instance_host_pattern = props.get("clusterInstanceHostPattern").cloned();
        config.cluster_id = props.get("clusterId").cloned();

        config.validate()?;
        Ok(config)
    }

    /// Cross-field checks that can't be expressed while parsing a single key
    /// (spec.md §7: "misconfiguration ... thrown eagerly").
    pub fn validate(&self) -> Result<()> {
        if let Some(pattern) = &self.cluster_instance_host_pattern {
            validate_instance_host_pattern(pattern)?;
        }
        if let Some(pairs) = &self.round_robin_host_weight_pairs {
            crate::selector::round_robin::parse_weight_pairs(pairs)?;
        }
        Ok(())
    }
}

fn parse_bool(raw: &str, key: &str) -> Result<bool> {
    raw.parse::<bool>().map_err(|_| {
        Error::new(ErrorKind::IllegalArgument {
            message: format!("'{}' must be a boolean, got '{}'", key, raw),
        })
    })
}

fn parse_positive_int(raw: &str, key: &str) -> Result<u32> {
    let value: u32 = raw.parse().map_err(|_| {
        Error::new(ErrorKind::IllegalArgument {
            message: format!("'{}' must be a positive integer, got '{}'", key, raw),
        })
    })?;
    if value == 0 {
        return Err(Error::new(ErrorKind::IllegalArgument {
            message: format!("'{}' must be >= 1", key),
        }));
    }
    Ok(value)
}

fn parse_millis(raw: &str, key: &str) -> Result<Duration> {
    let value: u64 = raw.parse().map_err(|_| {
        Error::new(ErrorKind::IllegalArgument {
            message: format!("'{}' must be an integer number of milliseconds, got '{}'", key, raw),
        })
    })?;
    Ok(Duration::from_millis(value))
}
