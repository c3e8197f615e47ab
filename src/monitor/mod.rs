//! Host and cluster monitoring: EFM per-host liveness probes (spec.md
//! §4.12) and the high-frequency cluster topology monitor (spec.md §4.11).

pub mod cluster_topology;
pub mod context;
pub mod efm;

pub use cluster_topology::ClusterTopologyMonitor;
pub use context::MonitorConnectionContext;
pub use efm::{shared_efm_monitors, EfmMonitors, EfmPlugin, Monitor, MonitorSettings};
