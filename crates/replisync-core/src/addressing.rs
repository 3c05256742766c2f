//! Stable network identity of orchestrated replicas.
//!
//! Members are addressed as `{workload}-{ordinal}.{dns_suffix}:{port}`,
//! matching the orchestrator's per-replica ordinal numbering.

use serde::{Deserialize, Serialize};

/// Deterministic host naming for a workload's replicas.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostScheme {
    pub workload: String,
    pub dns_suffix: String,
    pub port: u16,
}

impl HostScheme {
    pub fn new(workload: &str, dns_suffix: &str, port: u16) -> Self {
        Self {
            workload: workload.to_string(),
            dns_suffix: dns_suffix.trim_start_matches('.').to_string(),
            port,
        }
    }

    /// DNS name of the replica with the given ordinal, without port.
    pub fn hostname_for(&self, ordinal: u64) -> String {
        format!("{}-{}.{}", self.workload, ordinal, self.dns_suffix)
    }

    /// `host:port` of the replica with the given ordinal.
    pub fn host_for(&self, ordinal: u64) -> String {
        format!("{}:{}", self.hostname_for(ordinal), self.port)
    }

    /// Parse the ordinal back out of a host produced by this scheme.
    ///
    /// Returns `None` for hosts that belong to another workload or suffix.
    pub fn ordinal_of(&self, host: &str) -> Option<u64> {
        let (name, port) = host.rsplit_once(':')?;
        if port.parse::<u16>().ok()? != self.port {
            return None;
        }
        let rest = name.strip_prefix(&self.workload)?.strip_prefix('-')?;
        let (ordinal, suffix) = rest.split_once('.')?;
        if suffix != self.dns_suffix {
            return None;
        }
        ordinal.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheme() -> HostScheme {
        HostScheme::new("mongo", "mongo.default.svc.cluster.local", 27017)
    }

    #[test]
    fn host_for_ordinal() {
        assert_eq!(
            scheme().host_for(3),
            "mongo-3.mongo.default.svc.cluster.local:27017"
        );
    }

    #[test]
    fn leading_dot_in_suffix_is_ignored() {
        let s = HostScheme::new("mongo", ".mongo.default.svc.cluster.local", 27017);
        assert_eq!(s, scheme());
    }

    #[test]
    fn ordinal_round_trip() {
        let s = scheme();
        assert_eq!(s.ordinal_of(&s.host_for(12)), Some(12));
    }

    #[test]
    fn ordinal_of_foreign_hosts() {
        let s = scheme();
        assert_eq!(s.ordinal_of("redis-1.mongo.default.svc.cluster.local:27017"), None);
        assert_eq!(s.ordinal_of("mongo-1.other.svc:27017"), None);
        assert_eq!(s.ordinal_of("mongo-1.mongo.default.svc.cluster.local:27018"), None);
        assert_eq!(s.ordinal_of("mongo-x.mongo.default.svc.cluster.local:27017"), None);
        assert_eq!(s.ordinal_of("localhost"), None);
    }
}
