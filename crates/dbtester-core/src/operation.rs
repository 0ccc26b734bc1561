//! Key-value operations, one variant per client protocol.
//!
//! A stress session speaks exactly one protocol, so every [`Operation`] it
//! produces carries the same variant. Handlers reject variants for other
//! protocols instead of guessing at field meanings.

use crate::database::BackendKind;

/// etcd v2 request. Reads leave `value` empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtcdV2Op {
    pub key: String,
    pub value: String,
}

/// etcd v3 request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EtcdV3Op {
    Put { key: String, value: String },
    Range { key: String, serializable: bool },
}

/// ZooKeeper request. Keys are absolute znode paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZkOp {
    pub key: String,
    pub value: Vec<u8>,
    pub stale_read: bool,
}

/// Consul KV request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsulOp {
    pub key: String,
    pub value: Vec<u8>,
    pub stale_read: bool,
}

/// One request handed from the generator to exactly one handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    EtcdV2(EtcdV2Op),
    EtcdV3(EtcdV3Op),
    Zookeeper(ZkOp),
    Consul(ConsulOp),
}

impl Operation {
    /// Build a write for the given protocol.
    ///
    /// ZooKeeper keys are turned into znode paths by prefixing `/`.
    pub fn put(backend: BackendKind, key: &str, value: &[u8]) -> Self {
        match backend {
            BackendKind::EtcdV2 => Operation::EtcdV2(EtcdV2Op {
                key: key.to_string(),
                value: String::from_utf8_lossy(value).into_owned(),
            }),
            BackendKind::EtcdV3 => Operation::EtcdV3(EtcdV3Op::Put {
                key: key.to_string(),
                value: String::from_utf8_lossy(value).into_owned(),
            }),
            BackendKind::Zookeeper => Operation::Zookeeper(ZkOp {
                key: znode_path(key),
                value: value.to_vec(),
                stale_read: false,
            }),
            BackendKind::Consul => Operation::Consul(ConsulOp {
                key: key.to_string(),
                value: value.to_vec(),
                stale_read: false,
            }),
        }
    }

    /// Build a read for the given protocol.
    ///
    /// `stale_read` asks for a serializable (etcd v3) or stale (zk, consul)
    /// read; etcd v2 ignores it.
    pub fn get(backend: BackendKind, key: &str, stale_read: bool) -> Self {
        match backend {
            BackendKind::EtcdV2 => Operation::EtcdV2(EtcdV2Op {
                key: key.to_string(),
                value: String::new(),
            }),
            BackendKind::EtcdV3 => Operation::EtcdV3(EtcdV3Op::Range {
                key: key.to_string(),
                serializable: stale_read,
            }),
            BackendKind::Zookeeper => Operation::Zookeeper(ZkOp {
                key: znode_path(key),
                value: Vec::new(),
                stale_read,
            }),
            BackendKind::Consul => Operation::Consul(ConsulOp {
                key: key.to_string(),
                value: Vec::new(),
                stale_read,
            }),
        }
    }

    /// The protocol this operation belongs to.
    pub fn backend(&self) -> BackendKind {
        match self {
            Operation::EtcdV2(_) => BackendKind::EtcdV2,
            Operation::EtcdV3(_) => BackendKind::EtcdV3,
            Operation::Zookeeper(_) => BackendKind::Zookeeper,
            Operation::Consul(_) => BackendKind::Consul,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Operation::EtcdV2(op) => &op.key,
            Operation::EtcdV3(EtcdV3Op::Put { key, .. } | EtcdV3Op::Range { key, .. }) => key,
            Operation::Zookeeper(op) => &op.key,
            Operation::Consul(op) => &op.key,
        }
    }

    /// Payload bytes for writes; empty for reads.
    pub fn value(&self) -> &[u8] {
        match self {
            Operation::EtcdV2(op) => op.value.as_bytes(),
            Operation::EtcdV3(EtcdV3Op::Put { value, .. }) => value.as_bytes(),
            Operation::EtcdV3(EtcdV3Op::Range { .. }) => &[],
            Operation::Zookeeper(op) => &op.value,
            Operation::Consul(op) => &op.value,
        }
    }

    pub fn stale_read(&self) -> bool {
        match self {
            Operation::EtcdV2(_) | Operation::EtcdV3(EtcdV3Op::Put { .. }) => false,
            Operation::EtcdV3(EtcdV3Op::Range { serializable, .. }) => *serializable,
            Operation::Zookeeper(op) => op.stale_read,
            Operation::Consul(op) => op.stale_read,
        }
    }
}

fn znode_path(key: &str) -> String {
    if key.starts_with('/') {
        key.to_string()
    } else {
        format!("/{key}")
    }
}
