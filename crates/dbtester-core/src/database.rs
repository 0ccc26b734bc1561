//! Database identities and the client protocols used to reach them.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while interpreting identity strings.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// The string does not name a known database identity.
    #[error("databaseID {0:?} is unknown")]
    UnknownDatabaseId(String),

    /// The string does not name a known client protocol.
    #[error("backend kind {0:?} is unknown")]
    UnknownBackendKind(String),
}

/// Every database the harness can benchmark.
///
/// The set is closed: configuration naming anything else is rejected before
/// any load is generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DatabaseId {
    #[serde(rename = "etcd-other", alias = "etcd__other")]
    EtcdOther,
    #[serde(rename = "etcd-tip", alias = "etcd__tip")]
    EtcdTip,
    #[serde(rename = "etcd-v3-2", alias = "etcd__v3_2")]
    EtcdV3_2,
    #[serde(rename = "etcd-v3-3", alias = "etcd__v3_3")]
    EtcdV3_3,
    #[serde(rename = "zookeeper-r3-5-3-beta", alias = "zookeeper__r3_5_3_beta")]
    ZookeeperR3_5_3Beta,
    #[serde(rename = "consul-v1-0-2", alias = "consul__v1_0_2")]
    ConsulV1_0_2,
    /// ZooKeeper protocol proxy in front of etcd.
    #[serde(rename = "zetcd-beta", alias = "zetcd__beta")]
    ZetcdBeta,
    /// Consul protocol proxy in front of etcd.
    #[serde(rename = "cetcd-beta", alias = "cetcd__beta")]
    CetcdBeta,
}

impl DatabaseId {
    /// All known identities, in declaration order.
    pub const ALL: [DatabaseId; 8] = [
        DatabaseId::EtcdOther,
        DatabaseId::EtcdTip,
        DatabaseId::EtcdV3_2,
        DatabaseId::EtcdV3_3,
        DatabaseId::ZookeeperR3_5_3Beta,
        DatabaseId::ConsulV1_0_2,
        DatabaseId::ZetcdBeta,
        DatabaseId::CetcdBeta,
    ];

    /// Canonical string form used in YAML and on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseId::EtcdOther => "etcd-other",
            DatabaseId::EtcdTip => "etcd-tip",
            DatabaseId::EtcdV3_2 => "etcd-v3-2",
            DatabaseId::EtcdV3_3 => "etcd-v3-3",
            DatabaseId::ZookeeperR3_5_3Beta => "zookeeper-r3-5-3-beta",
            DatabaseId::ConsulV1_0_2 => "consul-v1-0-2",
            DatabaseId::ZetcdBeta => "zetcd-beta",
            DatabaseId::CetcdBeta => "cetcd-beta",
        }
    }

    /// Whether this identity is an etcd server (not a proxy in front of one).
    pub fn is_etcd_family(&self) -> bool {
        matches!(
            self,
            DatabaseId::EtcdOther | DatabaseId::EtcdTip | DatabaseId::EtcdV3_2 | DatabaseId::EtcdV3_3
        )
    }

    /// Whether this identity is a protocol-translation proxy that needs an
    /// etcd-family backend configured alongside it.
    pub fn requires_etcd_backend(&self) -> bool {
        matches!(self, DatabaseId::ZetcdBeta | DatabaseId::CetcdBeta)
    }

    /// The client protocol used to stress this database by default.
    pub fn backend_kind(&self) -> BackendKind {
        match self {
            DatabaseId::EtcdOther | DatabaseId::EtcdTip | DatabaseId::EtcdV3_2 | DatabaseId::EtcdV3_3 => {
                BackendKind::EtcdV3
            }
            DatabaseId::ZookeeperR3_5_3Beta | DatabaseId::ZetcdBeta => BackendKind::Zookeeper,
            DatabaseId::ConsulV1_0_2 | DatabaseId::CetcdBeta => BackendKind::Consul,
        }
    }
}

impl std::fmt::Display for DatabaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DatabaseId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace("__", "-").replace('_', "-");
        DatabaseId::ALL
            .into_iter()
            .find(|id| id.as_str() == normalized)
            .ok_or_else(|| CoreError::UnknownDatabaseId(s.to_string()))
    }
}

/// Client protocol spoken by a stress session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    EtcdV2,
    EtcdV3,
    #[serde(rename = "zk")]
    Zookeeper,
    Consul,
}

impl BackendKind {
    /// Whether reads can be relaxed to stale/serializable reads.
    ///
    /// etcd v2 reads are already served locally, so the flag has no effect there.
    pub fn supports_stale_read(&self) -> bool {
        !matches!(self, BackendKind::EtcdV2)
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::EtcdV2 => write!(f, "etcdv2"),
            BackendKind::EtcdV3 => write!(f, "etcdv3"),
            BackendKind::Zookeeper => write!(f, "zk"),
            BackendKind::Consul => write!(f, "consul"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "etcdv2" => Ok(BackendKind::EtcdV2),
            "etcdv3" | "etcd" => Ok(BackendKind::EtcdV3),
            "zk" | "zookeeper" => Ok(BackendKind::Zookeeper),
            "consul" => Ok(BackendKind::Consul),
            _ => Err(CoreError::UnknownBackendKind(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_canonical_and_alias_forms() {
        assert_eq!("etcd-v3-3".parse::<DatabaseId>(), Ok(DatabaseId::EtcdV3_3));
        assert_eq!("etcd__v3_3".parse::<DatabaseId>(), Ok(DatabaseId::EtcdV3_3));
        assert_eq!("zetcd-beta".parse::<DatabaseId>(), Ok(DatabaseId::ZetcdBeta));
        assert_eq!(
            "zookeeper__r3_5_3_beta".parse::<DatabaseId>(),
            Ok(DatabaseId::ZookeeperR3_5_3Beta)
        );
    }

    #[test]
    fn test_unknown_identity_rejected() {
        let err = "redis-7".parse::<DatabaseId>().unwrap_err();
        assert_eq!(err, CoreError::UnknownDatabaseId("redis-7".to_string()));
        assert_eq!(err.to_string(), "databaseID \"redis-7\" is unknown");
    }

    #[test]
    fn test_display_round_trips_through_from_str() {
        for id in DatabaseId::ALL {
            assert_eq!(id.to_string().parse::<DatabaseId>(), Ok(id));
        }
    }

    #[test]
    fn test_families() {
        assert!(DatabaseId::EtcdTip.is_etcd_family());
        assert!(!DatabaseId::ZetcdBeta.is_etcd_family());
        assert!(DatabaseId::CetcdBeta.requires_etcd_backend());
        assert_eq!(DatabaseId::ZetcdBeta.backend_kind(), BackendKind::Zookeeper);
        assert_eq!(DatabaseId::CetcdBeta.backend_kind(), BackendKind::Consul);
        assert_eq!(DatabaseId::EtcdV3_2.backend_kind(), BackendKind::EtcdV3);
    }

    #[test]
    fn test_serde_uses_canonical_names() {
        let yaml = serde_yaml::to_string(&DatabaseId::ConsulV1_0_2).unwrap();
        assert_eq!(yaml.trim(), "consul-v1-0-2");
        let parsed: DatabaseId = serde_yaml::from_str("etcd__tip").unwrap();
        assert_eq!(parsed, DatabaseId::EtcdTip);
    }
}
