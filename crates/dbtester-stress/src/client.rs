//! Opaque connection contract every backend client library is wrapped in.

use crate::error::{ClientError, StressError};
use async_trait::async_trait;
use dbtester_core::BackendKind;
use std::collections::BTreeMap;
use std::sync::Arc;

/// How a write treats an existing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutMode {
    /// Create or replace.
    Upsert,
    /// Fail if the key exists (ZooKeeper `create`).
    Create,
    /// Fail if the key is missing (ZooKeeper `set`).
    Overwrite,
}

/// One client connection to one backend.
///
/// Implementations must tolerate calls from several tasks, but the engine
/// never issues concurrent calls through the same handler.
#[async_trait]
pub trait KvConnection: Send + Sync {
    async fn put(&self, key: &str, value: &[u8], mode: PutMode) -> Result<(), ClientError>;

    /// Read `key`. `stale_read` relaxes linearizability where the backend supports it.
    async fn get(&self, key: &str, stale_read: bool) -> Result<(), ClientError>;

    /// Number of keys visible through this connection.
    async fn key_count(&self) -> Result<u64, ClientError>;

    async fn close(&self);
}

/// Factory for backend connections.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// Open `count` connections spread round-robin across `endpoints`.
    async fn connect(
        &self,
        backend: BackendKind,
        endpoints: &[String],
        count: usize,
    ) -> Result<Vec<Arc<dyn KvConnection>>, ClientError>;
}

/// Ask every endpoint how many keys it holds.
pub async fn count_keys(
    provider: &dyn ConnectionProvider,
    backend: BackendKind,
    endpoints: &[String],
) -> Result<BTreeMap<String, u64>, StressError> {
    let mut counts = BTreeMap::new();
    for endpoint in endpoints {
        let targets = [endpoint.clone()];
        let conns = provider
            .connect(backend, &targets, 1)
            .await
            .map_err(|source| StressError::Connect {
                endpoints: targets.to_vec(),
                source,
            })?;
        for conn in &conns {
            let n = conn.key_count().await;
            conn.close().await;
            match n {
                Ok(n) => {
                    counts.insert(endpoint.clone(), n);
                }
                Err(e) => tracing::warn!("failed to count keys on {}: {}", endpoint, e),
            }
        }
    }
    Ok(counts)
}
