//! A cluster-aware connection wrapper for Aurora/RDS-backed MySQL and
//! PostgreSQL deployments.
//!
//! Sits between an application and a driver's raw connection: it tracks
//! cluster topology, picks reader hosts by a configurable strategy, detects
//! failed nodes through both passive errors and an active enhanced failure
//! monitor, and reconnects across a failover event rather than surfacing a
//! bare connection error. See [`client::ClientFactory`] for the entry
//! point; everything else here is a subsystem it assembles.

pub mod cache;
pub mod client;
pub mod config;
pub mod dialect;
pub mod driver;
pub mod error;
pub mod failover;
pub mod host_info;
pub mod host_list_provider;
pub mod monitor;
pub mod plugin;
pub mod plugins;
pub mod runtime;
pub mod selector;
pub mod topology;
pub mod url_classifier;

mod trace;

pub use client::{Client, ClientFactory};
pub use config::WrapperConfig;
pub use error::{Error, ErrorKind, Result};
