//! In-process backend used for dry runs and tests.
//!
//! All connections share one key space regardless of endpoint, the way a
//! replicated cluster looks to its clients.

use crate::client::{ConnectionProvider, KvConnection, PutMode};
use crate::error::ClientError;
use async_trait::async_trait;
use dbtester_core::BackendKind;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Default)]
struct Counters {
    opened: AtomicU64,
    closed: AtomicU64,
    requests: AtomicU64,
}

/// Connection provider backed by a shared in-memory map.
#[derive(Clone, Default)]
pub struct MemoryProvider {
    store: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    counters: Arc<Counters>,
    latency: Option<Duration>,
    fail_every: Option<u64>,
    fail_connect: bool,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every request.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Fail every `n`-th request (counted across all connections).
    pub fn with_failure_every(mut self, n: u64) -> Self {
        self.fail_every = (n > 0).then_some(n);
        self
    }

    /// Refuse every connection attempt.
    pub fn refusing_connections(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    /// Connections opened so far.
    pub fn opened_connections(&self) -> u64 {
        self.counters.opened.load(Ordering::SeqCst)
    }

    /// Connections closed so far.
    pub fn closed_connections(&self) -> u64 {
        self.counters.closed.load(Ordering::SeqCst)
    }

    /// Requests served so far, failed ones included.
    pub fn requests(&self) -> u64 {
        self.counters.requests.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.store.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.store.lock().await.is_empty()
    }

    pub async fn value(&self, key: &str) -> Option<Vec<u8>> {
        self.store.lock().await.get(key).cloned()
    }
}

#[async_trait]
impl ConnectionProvider for MemoryProvider {
    async fn connect(
        &self,
        backend: BackendKind,
        endpoints: &[String],
        count: usize,
    ) -> Result<Vec<Arc<dyn KvConnection>>, ClientError> {
        if self.fail_connect {
            return Err(ClientError::Request(format!(
                "connection refused by {}",
                endpoints.join(",")
            )));
        }
        if endpoints.is_empty() {
            return Err(ClientError::Request("no endpoints given".to_string()));
        }

        let conns = (0..count)
            .map(|i| {
                self.counters.opened.fetch_add(1, Ordering::SeqCst);
                Arc::new(MemoryConnection {
                    backend,
                    endpoint: endpoints[i % endpoints.len()].clone(),
                    provider: self.clone(),
                    closed: AtomicBool::new(false),
                }) as Arc<dyn KvConnection>
            })
            .collect();
        Ok(conns)
    }
}

struct MemoryConnection {
    backend: BackendKind,
    endpoint: String,
    provider: MemoryProvider,
    closed: AtomicBool,
}

impl MemoryConnection {
    /// Shared per-request bookkeeping: closed check, latency, injected failures.
    async fn begin(&self) -> Result<(), ClientError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }
        let n = self.provider.counters.requests.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(latency) = self.provider.latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(every) = self.provider.fail_every {
            if n % every == 0 {
                return Err(ClientError::Request(format!(
                    "injected failure from {}",
                    self.endpoint
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl KvConnection for MemoryConnection {
    async fn put(&self, key: &str, value: &[u8], mode: PutMode) -> Result<(), ClientError> {
        self.begin().await?;
        let mut store = self.provider.store.lock().await;
        match mode {
            PutMode::Create if store.contains_key(key) => {
                return Err(ClientError::NodeExists(key.to_string()))
            }
            PutMode::Overwrite if !store.contains_key(key) => {
                return Err(ClientError::NotFound(key.to_string()))
            }
            _ => {}
        }
        store.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str, _stale_read: bool) -> Result<(), ClientError> {
        self.begin().await?;
        let store = self.provider.store.lock().await;
        // etcd and consul answer a missing key with an empty result
        if self.backend == BackendKind::Zookeeper && !store.contains_key(key) {
            return Err(ClientError::NotFound(key.to_string()));
        }
        Ok(())
    }

    async fn key_count(&self) -> Result<u64, ClientError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }
        Ok(self.provider.store.lock().await.len() as u64)
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.provider.counters.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}
