//! The per-call health-tracking context EFM races alongside a user query
//! (spec.md §4.12).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::driver::DbClient;

/// Holds a weak reference to the user's driver client so the monitor never
/// keeps a connection alive past its natural lifetime, plus the detection
/// parameters the monitor uses to decide when to declare the host unhealthy.
pub struct MonitorConnectionContext {
    client: Weak<dyn DbClient>,
    host_alias: String,
    unhealthy: AtomicBool,
    active: AtomicBool,
}

impl MonitorConnectionContext {
    pub fn new(client: &Arc<dyn DbClient>, host_alias: impl Into<String>) -> Self {
        Self {
            client: Arc::downgrade(client),
            host_alias: host_alias.into(),
            unhealthy: AtomicBool::new(false),
            active: AtomicBool::new(true),
        }
    }

    pub fn host_alias(&self) -> &str {
        &self.host_alias
    }

    pub fn client(&self) -> Option<Arc<dyn DbClient>> {
        self.client.upgrade()
    }

    pub fn is_host_unhealthy(&self) -> bool {
        self.unhealthy.load(Ordering::SeqCst)
    }

    pub fn set_host_unhealthy(&self) {
        self.unhealthy.store(true, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Called when the user's call has finished (success, error, or timeout)
    /// so the monitor stops counting this context toward its active set.
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Debug)]
    struct NullClient;
    impl DbClient for NullClient {
        fn is_valid(&self) -> bool {
            true
        }
        fn abort(&self) {}
        fn is_in_transaction(&self) -> bool {
            false
        }
    }

    #[test]
    fn client_reference_is_weak() {
        let client: Arc<dyn DbClient> = Arc::new(NullClient);
        let ctx = MonitorConnectionContext::new(&client, "h:1");
        assert!(ctx.client().is_some());
        drop(client);
        assert!(ctx.client().is_none());
    }

    #[test]
    fn starts_active_and_healthy() {
        let client: Arc<dyn DbClient> = Arc::new(NullClient);
        let ctx = MonitorConnectionContext::new(&client, "h:1");
        assert!(ctx.is_active());
        assert!(!ctx.is_host_unhealthy());
        ctx.set_host_unhealthy();
        ctx.deactivate();
        assert!(ctx.is_host_unhealthy());
        assert!(!ctx.is_active());
    }
}
