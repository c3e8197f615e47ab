//! Structured tracing events for topology changes, failover outcomes, and
//! host monitor transitions, dual-emitted through `tracing`/`log` and gated
//! behind the `tracing-unstable` feature rather than always-on, so this
//! crate doesn't force a `tracing` subscriber on every embedder.

pub(crate) const FAILOVER_TRACING_EVENT_TARGET: &str = "cluster_wrapper::failover";
pub(crate) const TOPOLOGY_TRACING_EVENT_TARGET: &str = "cluster_wrapper::topology";
pub(crate) const CONNECTION_TRACING_EVENT_TARGET: &str = "cluster_wrapper::connection";

pub(crate) trait TracingRepresentation {
    fn tracing_representation(&self) -> String;
}

impl TracingRepresentation for crate::host_info::HostInfo {
    fn tracing_representation(&self) -> String {
        format!(
            "{} (role={:?}, availability={:?}, weight={})",
            self,
            self.role(),
            self.raw_availability(),
            self.weight()
        )
    }
}

impl TracingRepresentation for crate::topology::Topology {
    fn tracing_representation(&self) -> String {
        let members: Vec<String> = self
            .hosts()
            .iter()
            .map(|h| h.tracing_representation())
            .collect();
        format!("{} [{}]", self.cluster_id(), members.join(", "))
    }
}

impl TracingRepresentation for crate::url_classifier::RdsUrlType {
    fn tracing_representation(&self) -> String {
        format!("{:?}", self)
    }
}

impl TracingRepresentation for crate::error::Error {
    fn tracing_representation(&self) -> String {
        self.to_string()
    }
}

/// Emits a tracing event at debug level when the `tracing-unstable` feature
/// is enabled; a silent no-op otherwise.
macro_rules! tracing_debug {
    (target: $target:expr, $($field:tt)*) => {
        #[cfg(feature = "tracing-unstable")]
        {
            tracing::event!(target: $target, tracing::Level::DEBUG, $($field)*);
        }
        #[cfg(not(feature = "tracing-unstable"))]
        {
            let _ = $target;
        }
    };
}
pub(crate) use tracing_debug;

#[cfg(test)]
mod test {
    use super::*;
    use crate::host_info::HostInfoBuilder;

    #[test]
    fn host_info_tracing_representation_includes_role_and_endpoint() {
        let host = HostInfoBuilder::new().host("db-1").port(5432).build().unwrap();
        let repr = host.tracing_representation();
        assert!(repr.contains("db-1:5432"));
        assert!(repr.contains("role="));
    }
}
