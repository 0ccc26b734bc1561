//! Static per-backend facts: ports, tunable defaults and validation ceilings.

use crate::database::DatabaseId;

/// Port every agent listens on unless configured otherwise.
pub const DEFAULT_AGENT_PORT: u16 = 3500;

pub const DEFAULT_ETCD_CLIENT_PORT: u16 = 2379;
pub const DEFAULT_ZOOKEEPER_CLIENT_PORT: u16 = 2181;
pub const DEFAULT_CONSUL_CLIENT_PORT: u16 = 8500;

pub const DEFAULT_ETCD_SNAPSHOT_COUNT: i64 = 100_000;
pub const DEFAULT_ETCD_QUOTA_SIZE_BYTES: i64 = 8_000_000_000;

/// Hard ceiling on the etcd storage quota (8 GB).
pub const MAX_ETCD_QUOTA_SIZE_BYTES: i64 = 8_000_000_000;

pub const DEFAULT_ZOOKEEPER_SNAP_COUNT: i64 = 100_000;
pub const DEFAULT_ZOOKEEPER_TICK_TIME_MS: i64 = 2000;
pub const DEFAULT_ZOOKEEPER_INIT_LIMIT: i64 = 5;
pub const DEFAULT_ZOOKEEPER_SYNC_LIMIT: i64 = 5;
pub const DEFAULT_ZOOKEEPER_MAX_CLIENT_CONNECTIONS: i64 = 5000;

/// Requests per batch while elastically growing the client count.
pub const DEFAULT_SCALING_BATCH_SIZE: u64 = 100_000;

/// Attempts made for the seed write before a read phase.
pub const DEFAULT_SETUP_WRITE_ATTEMPTS: u32 = 7;

/// Static facts about one database identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseProfile {
    pub id: DatabaseId,
    pub agent_port: u16,
    pub client_port: u16,
    /// etcd `--snapshot-count` default, when the identity takes etcd flags.
    pub etcd_snapshot_count: Option<i64>,
    /// etcd `--quota-backend-bytes` default, when the identity takes etcd flags.
    pub etcd_quota_size_bytes: Option<i64>,
    /// Whether the identity takes ZooKeeper server flags.
    pub zookeeper_flags: bool,
}

impl DatabaseProfile {
    /// Look up the profile for an identity.
    pub fn of(id: DatabaseId) -> Self {
        let client_port = match id {
            DatabaseId::EtcdOther
            | DatabaseId::EtcdTip
            | DatabaseId::EtcdV3_2
            | DatabaseId::EtcdV3_3 => DEFAULT_ETCD_CLIENT_PORT,
            DatabaseId::ZookeeperR3_5_3Beta | DatabaseId::ZetcdBeta => DEFAULT_ZOOKEEPER_CLIENT_PORT,
            DatabaseId::ConsulV1_0_2 | DatabaseId::CetcdBeta => DEFAULT_CONSUL_CLIENT_PORT,
        };
        let (etcd_snapshot_count, etcd_quota_size_bytes) = if id.is_etcd_family() {
            (
                Some(DEFAULT_ETCD_SNAPSHOT_COUNT),
                Some(DEFAULT_ETCD_QUOTA_SIZE_BYTES),
            )
        } else {
            (None, None)
        };

        Self {
            id,
            agent_port: DEFAULT_AGENT_PORT,
            client_port,
            etcd_snapshot_count,
            etcd_quota_size_bytes,
            zookeeper_flags: id == DatabaseId::ZookeeperR3_5_3Beta,
        }
    }

    /// Maximum accepted storage quota, if the identity has one.
    pub fn max_quota_size_bytes(&self) -> Option<i64> {
        self.etcd_quota_size_bytes.map(|_| MAX_ETCD_QUOTA_SIZE_BYTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ports_per_family() {
        assert_eq!(DatabaseProfile::of(DatabaseId::EtcdV3_3).client_port, 2379);
        assert_eq!(DatabaseProfile::of(DatabaseId::ZetcdBeta).client_port, 2181);
        assert_eq!(DatabaseProfile::of(DatabaseId::CetcdBeta).client_port, 8500);
        assert_eq!(DatabaseProfile::of(DatabaseId::ConsulV1_0_2).agent_port, 3500);
    }

    #[test]
    fn test_only_etcd_has_quota_ceiling() {
        assert_eq!(
            DatabaseProfile::of(DatabaseId::EtcdTip).max_quota_size_bytes(),
            Some(8_000_000_000)
        );
        assert_eq!(
            DatabaseProfile::of(DatabaseId::ZookeeperR3_5_3Beta).max_quota_size_bytes(),
            None
        );
        assert!(DatabaseProfile::of(DatabaseId::ZookeeperR3_5_3Beta).zookeeper_flags);
        assert!(!DatabaseProfile::of(DatabaseId::ZetcdBeta).zookeeper_flags);
    }
}
