//! The `HostInfo` value type and its builder.
//!
//! `HostInfo` instances are shared: the same `Arc<HostInfo>` is referenced by
//! the topology list, selector caches, and monitors at once (spec.md §3).
//! The two mutable fields (`role`, `availability`) are therefore behind
//! interior mutability rather than requiring callers to reconstruct and
//! redistribute a new `HostInfo` on every update.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, ErrorKind};

/// The role a host plays in the cluster topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostRole {
    Writer,
    Reader,
    Unknown,
}

/// Whether a host is currently considered reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostAvailability {
    Available,
    NotAvailable,
}

/// A strategy used to determine whether a host should be considered
/// available for selection, beyond the last-observed `HostAvailability`.
/// Kept as a trait object so embedders can plug custom rules (e.g. "never
/// select a host flagged for maintenance") without this crate knowing about
/// them.
pub trait AvailabilityStrategy: fmt::Debug + Send + Sync {
    fn is_available(&self, base: HostAvailability) -> bool;
}

#[derive(Debug, Default)]
struct DefaultAvailabilityStrategy;

impl AvailabilityStrategy for DefaultAvailabilityStrategy {
    fn is_available(&self, base: HostAvailability) -> bool {
        base == HostAvailability::Available
    }
}

/// A single member of a cluster topology: a host/port pair plus the
/// currently-known role, availability, weight, and aliases.
///
/// Equality (per spec.md §3) is defined over `(port, availability, role,
/// weight)`, not identity or host name, matching how the originating system
/// treats two observations of the "same slot" as equal regardless of which
/// DNS name produced them.
#[derive(Debug)]
pub struct HostInfo {
    host: String,
    port: u16,
    host_id: Option<String>,
    aliases: RwLock<HashSet<String>>,
    all_aliases: RwLock<HashSet<String>>,
    role: RwLock<HostRole>,
    availability: RwLock<HostAvailability>,
    weight: AtomicU32,
    last_update_time_ms: AtomicU64Wrapper,
    availability_strategy: Box<dyn AvailabilityStrategy>,
}

/// `AtomicU64` isn't `Clone`/`PartialEq`-friendly for Debug derives the way
/// we want, so this tiny wrapper keeps `HostInfo`'s `Debug` impl readable.
struct AtomicU64Wrapper(std::sync::atomic::AtomicU64);

impl fmt::Debug for AtomicU64Wrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.load(Ordering::Relaxed))
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl HostInfo {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn host_id(&self) -> Option<&str> {
        self.host_id.as_deref()
    }

    /// The canonical `host:port` alias, always a member of `all_aliases`.
    pub fn canonical_alias(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn aliases(&self) -> HashSet<String> {
        self.aliases.read().unwrap().clone()
    }

    pub fn all_aliases(&self) -> HashSet<String> {
        self.all_aliases.read().unwrap().clone()
    }

    pub fn add_alias(&self, alias: impl Into<String>) {
        let alias = alias.into();
        self.aliases.write().unwrap().insert(alias.clone());
        self.all_aliases.write().unwrap().insert(alias);
    }

    pub fn role(&self) -> HostRole {
        *self.role.read().unwrap()
    }

    pub fn set_role(&self, role: HostRole) {
        *self.role.write().unwrap() = role;
        self.touch();
    }

    pub fn raw_availability(&self) -> HostAvailability {
        *self.availability.read().unwrap()
    }

    /// Whether this host should currently be considered for selection,
    /// taking the configured [`AvailabilityStrategy`] into account.
    pub fn is_available(&self) -> bool {
        self.availability_strategy
            .is_available(self.raw_availability())
    }

    pub fn set_availability(&self, availability: HostAvailability) {
        *self.availability.write().unwrap() = availability;
        self.touch();
    }

    pub fn weight(&self) -> u32 {
        self.weight.load(Ordering::Relaxed)
    }

    pub fn set_weight(&self, weight: u32) {
        self.weight.store(weight, Ordering::Relaxed);
    }

    pub fn last_update_time_ms(&self) -> u64 {
        self.last_update_time_ms.0.load(Ordering::Relaxed)
    }

    fn touch(&self) {
        self.last_update_time_ms.0.store(now_ms(), Ordering::Relaxed);
    }

    /// Whether `self` and `other` refer to the same network endpoint,
    /// independent of role/availability/weight.
    pub fn same_endpoint(&self, other: &HostInfo) -> bool {
        self.host.eq_ignore_ascii_case(&other.host) && self.port == other.port
    }
}

impl PartialEq for HostInfo {
    fn eq(&self, other: &Self) -> bool {
        self.port == other.port
            && self.raw_availability() == other.raw_availability()
            && self.role() == other.role()
            && self.weight() == other.weight()
    }
}

impl Eq for HostInfo {}

impl fmt::Display for HostInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Builds a [`HostInfo`], rejecting an empty host per spec.md §3.
#[derive(Debug, Default)]
pub struct HostInfoBuilder {
    host: Option<String>,
    port: Option<u16>,
    host_id: Option<String>,
    role: HostRole,
    availability: HostAvailability,
    weight: u32,
    aliases: HashSet<String>,
}

impl Default for HostRole {
    fn default() -> Self {
        HostRole::Unknown
    }
}

impl Default for HostAvailability {
    fn default() -> Self {
        HostAvailability::Available
    }
}

impl HostInfoBuilder {
    pub fn new() -> Self {
        Self {
            weight: 0,
            ..Default::default()
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn host_id(mut self, host_id: impl Into<String>) -> Self {
        self.host_id = Some(host_id.into());
        self
    }

    pub fn role(mut self, role: HostRole) -> Self {
        self.role = role;
        self
    }

    pub fn availability(mut self, availability: HostAvailability) -> Self {
        self.availability = availability;
        self
    }

    pub fn weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.insert(alias.into());
        self
    }

    pub fn build(self) -> Result<HostInfo, Error> {
        let host = self.host.filter(|h| !h.is_empty()).ok_or_else(|| {
            Error::new(ErrorKind::IllegalArgument {
                message: "HostInfo requires a non-empty host".to_string(),
            })
        })?;
        let port = self.port.unwrap_or(0);

        let canonical = format!("{}:{}", host, port);
        let mut all_aliases = self.aliases.clone();
        all_aliases.insert(canonical);

        Ok(HostInfo {
            host,
            port,
            host_id: self.host_id,
            aliases: RwLock::new(self.aliases),
            all_aliases: RwLock::new(all_aliases),
            role: RwLock::new(self.role),
            availability: RwLock::new(self.availability),
            weight: AtomicU32::new(self.weight),
            last_update_time_ms: AtomicU64Wrapper(std::sync::atomic::AtomicU64::new(now_ms())),
            availability_strategy: Box::new(DefaultAvailabilityStrategy),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rejects_empty_host() {
        let result = HostInfoBuilder::new().port(5432).build();
        assert!(result.is_err());
    }

    #[test]
    fn all_aliases_always_contains_canonical() {
        let host = HostInfoBuilder::new()
            .host("db-1")
            .port(5432)
            .alias("db-1.internal")
            .build()
            .unwrap();
        let all = host.all_aliases();
        assert!(all.contains("db-1:5432"));
        assert!(all.contains("db-1.internal"));
        assert!(host.aliases().contains("db-1.internal"));
        assert!(!host.aliases().contains("db-1:5432"));
    }

    #[test]
    fn equality_is_by_port_availability_role_weight() {
        let a = HostInfoBuilder::new()
            .host("a")
            .port(5432)
            .role(HostRole::Writer)
            .build()
            .unwrap();
        let b = HostInfoBuilder::new()
            .host("b")
            .port(5432)
            .role(HostRole::Writer)
            .build()
            .unwrap();
        assert_eq!(a, b);

        b.set_role(HostRole::Reader);
        assert_ne!(a, b);
    }

    #[test]
    fn default_availability_strategy_matches_raw_state() {
        let host = HostInfoBuilder::new().host("a").port(1).build().unwrap();
        assert!(host.is_available());
        host.set_availability(HostAvailability::NotAvailable);
        assert!(!host.is_available());
    }
}
