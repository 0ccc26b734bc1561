//! Seed write performed before read phases.

use crate::client::{ConnectionProvider, PutMode};
use crate::error::{ClientError, StressError};
use dbtester_core::{BackendKind, Operation};
use tracing::{info, warn};

/// Write `key` once, retrying up to `attempts` times without backoff.
///
/// ZooKeeper nodes are created; other backends upsert. A zk node that already
/// exists counts as success, since a previous attempt may have landed.
pub async fn seed_write(
    provider: &dyn ConnectionProvider,
    backend: BackendKind,
    endpoints: &[String],
    key: &str,
    value: &[u8],
    attempts: u32,
) -> Result<(), StressError> {
    let op = Operation::put(backend, key, value);
    let mode = match backend {
        BackendKind::Zookeeper => PutMode::Create,
        _ => PutMode::Upsert,
    };

    let mut last_error = String::from("no attempt made");
    for attempt in 1..=attempts {
        let result = match provider.connect(backend, endpoints, 1).await {
            Ok(conns) => match conns.first() {
                Some(conn) => {
                    let r = conn.put(op.key(), op.value(), mode).await;
                    conn.close().await;
                    r
                }
                None => Err(ClientError::Request("provider returned no connection".to_string())),
            },
            Err(e) => Err(e),
        };

        match result {
            Ok(()) | Err(ClientError::NodeExists(_)) => {
                info!(key = op.key(), attempt, "seed write done");
                return Ok(());
            }
            Err(e) => {
                warn!("seed write attempt {}/{} failed: {}", attempt, attempts, e);
                last_error = e.to_string();
            }
        }
    }

    Err(StressError::SetupWriteFailed {
        attempts,
        last_error,
    })
}
