//! Controller to agent instruction payload.
//!
//! Only the message content lives here; how a request reaches an agent is up
//! to the broadcaster that carries it.

use crate::database::DatabaseId;
use serde::{Deserialize, Serialize};

/// What the agent should do with its database process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentOperation {
    Start,
    Stop,
    /// Liveness signal that also carries the current client count.
    Heartbeat,
}

impl std::fmt::Display for AgentOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentOperation::Start => write!(f, "start"),
            AgentOperation::Stop => write!(f, "stop"),
            AgentOperation::Heartbeat => write!(f, "heartbeat"),
        }
    }
}

/// etcd server tunables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EtcdFlags {
    pub snapshot_count: i64,
    pub quota_size_bytes: i64,
}

/// ZooKeeper server tunables. Heap and buffer sizes are JVM-style strings
/// such as `"50G"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZookeeperFlags {
    #[serde(alias = "java_xms")]
    pub heap_min_size: String,
    #[serde(alias = "java_xmx")]
    pub heap_max_size: String,
    #[serde(alias = "java_d_jute_max_buffer")]
    pub max_buffer_size: String,
    /// 1-based member id; always derived from the host index.
    #[serde(alias = "my_id")]
    pub replica_id: u32,
    pub client_port: i64,
    #[serde(alias = "tick_time")]
    pub tick_time_ms: i64,
    pub init_limit: i64,
    pub sync_limit: i64,
    pub snap_count: i64,
    pub max_client_connections: i64,
}

/// Backend-specific tunables. Identities without server flags carry none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Tunables {
    Etcd(EtcdFlags),
    Zookeeper(ZookeeperFlags),
}

/// Where agents upload their logs and metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudStorage {
    pub project_name: String,
    /// Service account key contents, not a path.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub key: String,
    pub bucket_name: String,
    pub sub_directory: String,
}

/// One instruction for the agent on one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributedRequest {
    pub operation: AgentOperation,
    pub database_id: DatabaseId,
    pub database_tag: String,
    /// Index of the receiving host in `peer_ips`.
    pub ip_index: u32,
    pub peer_ips: Vec<String>,
    pub current_client_number: i64,
    pub trigger_log_upload: bool,
    pub cloud_storage: CloudStorage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tunables: Option<Tunables>,
}

impl DistributedRequest {
    /// Same instruction carrying a different client count.
    pub fn with_client_number(self, current_client_number: i64) -> Self {
        Self {
            current_client_number,
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DistributedRequest {
        DistributedRequest {
            operation: AgentOperation::Start,
            database_id: DatabaseId::EtcdV3_3,
            database_tag: "etcd-v3.3-go1.9.2".to_string(),
            ip_index: 1,
            peer_ips: vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()],
            current_client_number: 100,
            trigger_log_upload: true,
            cloud_storage: CloudStorage::default(),
            tunables: Some(Tunables::Etcd(EtcdFlags {
                snapshot_count: 100_000,
                quota_size_bytes: 8_000_000_000,
            })),
        }
    }

    #[test]
    fn test_absent_tunables_are_not_serialized() {
        let mut req = sample();
        req.database_id = DatabaseId::ConsulV1_0_2;
        req.tunables = None;
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("tunables").is_none());
    }

    #[test]
    fn test_tunables_are_tagged() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["tunables"]["kind"], "etcd");
        assert_eq!(json["tunables"]["quota_size_bytes"], 8_000_000_000i64);
        assert_eq!(json["database_id"], "etcd-v3-3");
        assert_eq!(json["operation"], "start");
    }

    #[test]
    fn test_client_number_override_keeps_identity() {
        let req = sample();
        let resized = req.clone().with_client_number(150);
        assert_eq!(resized.operation, req.operation);
        assert_eq!(resized.current_client_number, 150);
        assert_eq!(resized.database_id, req.database_id);
        assert_eq!(resized.tunables, req.tunables);
    }
}
