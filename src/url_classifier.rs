//! Pure classification of a host string into an [`RdsUrlType`] (spec.md
//! §4.1). No I/O.

use std::net::IpAddr;
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;

/// The classification of a host string, with the derived boolean facets the
/// rest of the system queries (`is_rds`, `is_rds_cluster`, `has_region`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RdsUrlType {
    IpAddress,
    RdsWriterCluster,
    RdsReaderCluster,
    RdsCustomCluster,
    RdsProxy,
    RdsInstance,
    RdsAuroraLimitlessDbShardGroup,
    RdsGlobalWriterCluster,
    Other,
}

impl RdsUrlType {
    pub fn is_rds(self) -> bool {
        !matches!(self, RdsUrlType::IpAddress | RdsUrlType::Other)
    }

    pub fn is_rds_cluster(self) -> bool {
        matches!(
            self,
            RdsUrlType::RdsWriterCluster
                | RdsUrlType::RdsReaderCluster
                | RdsUrlType::RdsCustomCluster
                | RdsUrlType::RdsGlobalWriterCluster
        )
    }

    pub fn has_region(self) -> bool {
        matches!(
            self,
            RdsUrlType::RdsWriterCluster
                | RdsUrlType::RdsReaderCluster
                | RdsUrlType::RdsCustomCluster
                | RdsUrlType::RdsProxy
                | RdsUrlType::RdsInstance
                | RdsUrlType::RdsAuroraLimitlessDbShardGroup
        )
    }
}

// Ordering matters: more specific patterns (reader/custom/proxy) are tested
// before the generic writer-cluster pattern, which would otherwise also
// match a reader endpoint's suffix.
lazy_static! {
    static ref GLOBAL_CLUSTER_PATTERN: Regex = Regex::new(
        r"(?i)^(.+)\.global-[a-zA-Z0-9]+\.[a-zA-Z0-9-]+$"
    ).unwrap();
    static ref LIMITLESS_SHARD_GROUP_PATTERN: Regex = Regex::new(
        r"(?i)^(.+)\.shardgrp-[a-zA-Z0-9]+\.([a-zA-Z0-9-]+)\.rds\.amazonaws\.com$"
    ).unwrap();
    static ref READER_CLUSTER_PATTERN: Regex = Regex::new(
        r"(?i)^(.+)\.cluster-ro-[a-zA-Z0-9]+\.([a-zA-Z0-9-]+)\.rds\.amazonaws\.com$"
    ).unwrap();
    static ref WRITER_CLUSTER_PATTERN: Regex = Regex::new(
        r"(?i)^(.+)\.cluster-[a-zA-Z0-9]+\.([a-zA-Z0-9-]+)\.rds\.amazonaws\.com$"
    ).unwrap();
    static ref CUSTOM_CLUSTER_PATTERN: Regex = Regex::new(
        r"(?i)^(.+)\.cluster-custom-[a-zA-Z0-9]+\.([a-zA-Z0-9-]+)\.rds\.amazonaws\.com$"
    ).unwrap();
    static ref PROXY_PATTERN: Regex = Regex::new(
        r"(?i)^(.+)\.proxy-[a-zA-Z0-9]+\.([a-zA-Z0-9-]+)\.rds\.amazonaws\.com$"
    ).unwrap();
    static ref INSTANCE_PATTERN: Regex = Regex::new(
        r"(?i)^(.+)\.[a-zA-Z0-9]+\.([a-zA-Z0-9-]+)\.rds\.amazonaws\.com$"
    ).unwrap();
    static ref ELB_PATTERN: Regex = Regex::new(
        r"(?i)^(.+)\.elb\.([a-zA-Z0-9-]+)\.amazonaws\.com$"
    ).unwrap();
    static ref REGION_PATTERN: Regex = Regex::new(r"(?i)\.([a-zA-Z0-9-]+)\.rds\.amazonaws\.com$").unwrap();
    static ref GREEN_INSTANCE_PATTERN: Regex = Regex::new(r"(?i)-green-[a-zA-Z0-9]+(?=[.\-])").unwrap();
}

/// Classifies `host` by ordered pattern test, most specific first. A literal
/// IPv4 or IPv6 address is classified as [`RdsUrlType::IpAddress`] before any
/// RDS pattern is attempted, since an address is never also an RDS DNS name.
pub fn classify(host: &str) -> RdsUrlType {
    if IpAddr::from_str(host).is_ok() {
        return RdsUrlType::IpAddress;
    }

    if LIMITLESS_SHARD_GROUP_PATTERN.is_match(host) {
        return RdsUrlType::RdsAuroraLimitlessDbShardGroup;
    }
    if GLOBAL_CLUSTER_PATTERN.is_match(host) && WRITER_CLUSTER_PATTERN.is_match(host) {
        return RdsUrlType::RdsGlobalWriterCluster;
    }
    if CUSTOM_CLUSTER_PATTERN.is_match(host) {
        return RdsUrlType::RdsCustomCluster;
    }
    if PROXY_PATTERN.is_match(host) {
        return RdsUrlType::RdsProxy;
    }
    if READER_CLUSTER_PATTERN.is_match(host) {
        return RdsUrlType::RdsReaderCluster;
    }
    if WRITER_CLUSTER_PATTERN.is_match(host) {
        return RdsUrlType::RdsWriterCluster;
    }
    if INSTANCE_PATTERN.is_match(host) || ELB_PATTERN.is_match(host) {
        return RdsUrlType::RdsInstance;
    }

    RdsUrlType::Other
}

pub fn is_writer_cluster_dns(host: &str) -> bool {
    classify(host) == RdsUrlType::RdsWriterCluster
}

pub fn is_reader_cluster_dns(host: &str) -> bool {
    classify(host) == RdsUrlType::RdsReaderCluster
}

/// Extracts the region component (e.g. `us-east-2`) from an RDS host name
/// that carries one, per [`RdsUrlType::has_region`].
pub fn get_region(host: &str) -> Option<String> {
    REGION_PATTERN
        .captures(host)
        .map(|c| c[1].to_string())
}

/// Extracts the instance identifier (the label before the first `.`) from an
/// RDS instance endpoint.
pub fn get_instance_id(host: &str) -> Option<String> {
    if classify(host) != RdsUrlType::RdsInstance {
        return None;
    }
    host.split('.').next().map(|s| s.to_string())
}

/// Returns a `?`-templated pattern that would match the same domain suffix
/// as `host`, e.g. `instance-1.abc123.us-east-2.rds.amazonaws.com` becomes
/// `?.abc123.us-east-2.rds.amazonaws.com`.
pub fn get_instance_host_pattern(host: &str) -> Option<String> {
    let mut parts = host.splitn(2, '.');
    let _first = parts.next()?;
    let rest = parts.next()?;
    Some(format!("?.{}", rest))
}

/// A blue/green deployment substitutes `-green-<token>` into an instance
/// name while the swap is in progress.
pub fn is_green_instance(host: &str) -> bool {
    GREEN_INSTANCE_PATTERN.is_match(host)
}

pub fn remove_green_instance_prefix(host: &str) -> String {
    GREEN_INSTANCE_PATTERN.replace(host, "").to_string()
}

/// A host pattern is only usable as a `clusterInstanceHostPattern` override
/// if it contains the `?` placeholder the driver substitutes the instance id
/// into (spec.md §4.3, §6).
pub fn is_dns_pattern_valid(pattern: &str) -> bool {
    pattern.contains('?')
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn s1_endpoint_classification() {
        assert_eq!(
            classify("mycluster.cluster-abc123.us-east-2.rds.amazonaws.com"),
            RdsUrlType::RdsWriterCluster
        );
        assert_eq!(
            classify("mycluster.cluster-ro-abc.us-east-2.rds.amazonaws.com"),
            RdsUrlType::RdsReaderCluster
        );
        assert_eq!(classify("10.0.0.1"), RdsUrlType::IpAddress);
        assert_eq!(classify("127.0.0.1"), RdsUrlType::IpAddress);
        assert_eq!(classify("example.com"), RdsUrlType::Other);
    }

    #[test]
    fn ipv6_literal_is_ip_address() {
        assert_eq!(classify("::1"), RdsUrlType::IpAddress);
    }

    #[test]
    fn custom_cluster_takes_priority_over_writer_pattern() {
        assert_eq!(
            classify("mycluster.cluster-custom-abc123.us-east-2.rds.amazonaws.com"),
            RdsUrlType::RdsCustomCluster
        );
    }

    #[test]
    fn proxy_endpoint_classified_separately() {
        assert_eq!(
            classify("myproxy.proxy-abc123.us-east-2.rds.amazonaws.com"),
            RdsUrlType::RdsProxy
        );
    }

    #[test]
    fn instance_endpoint_and_id_extraction() {
        let host = "instance-1.abc123.us-east-2.rds.amazonaws.com";
        assert_eq!(classify(host), RdsUrlType::RdsInstance);
        assert_eq!(get_instance_id(host).as_deref(), Some("instance-1"));
        assert_eq!(
            get_instance_host_pattern(host).as_deref(),
            Some("?.abc123.us-east-2.rds.amazonaws.com")
        );
        assert_eq!(get_region(host).as_deref(), Some("us-east-2"));
    }

    #[test]
    fn green_instance_detection_and_prefix_removal() {
        let host = "instance-1-green-xyz9.abc123.us-east-2.rds.amazonaws.com";
        assert!(is_green_instance(host));
        assert_eq!(
            remove_green_instance_prefix(host),
            "instance-1.abc123.us-east-2.rds.amazonaws.com"
        );
    }

    #[test]
    fn dns_pattern_validity() {
        assert!(is_dns_pattern_valid("?.abc123.us-east-2.rds.amazonaws.com"));
        assert!(!is_dns_pattern_valid("abc123.us-east-2.rds.amazonaws.com"));
    }
}
