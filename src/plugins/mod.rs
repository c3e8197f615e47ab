//! Concrete plugins built on top of [`crate::plugin`] (spec.md §4.13, §4.14).

pub mod failover_plugin;
pub mod initial_connection;

pub use failover_plugin::FailoverPlugin;
pub use initial_connection::InitialConnectionPlugin;
