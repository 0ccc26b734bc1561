//! Operation dispatch: one handler per connection, bound when the session is built.

use crate::client::{ConnectionProvider, KvConnection, PutMode};
use crate::error::{ClientError, StressError};
use async_trait::async_trait;
use dbtester_core::{BackendKind, EtcdV3Op, Operation};
use futures::future::BoxFuture;
use std::sync::Arc;

/// Executes one operation against one backend.
///
/// Errors are returned, never retried here; the worker records them.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, op: &Operation) -> Result<(), ClientError>;
}

/// Closes the connections a handler set was built with. Runs at most once.
pub type Teardown = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Handlers for one session plus the callback that releases their connections.
pub struct HandlerSet {
    pub handlers: Vec<Arc<dyn RequestHandler>>,
    pub teardown: Option<Teardown>,
}

impl HandlerSet {
    pub fn new(handlers: Vec<Arc<dyn RequestHandler>>, teardown: Option<Teardown>) -> Self {
        Self { handlers, teardown }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerSet")
            .field("handlers", &self.handlers.len())
            .field("teardown", &self.teardown.is_some())
            .finish()
    }
}

/// Where and how many clients to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSpec {
    pub backend: BackendKind,
    pub endpoints: Vec<String>,
    /// Physical connections; handlers share them round-robin.
    pub connections: usize,
    /// Handlers (and therefore workers).
    pub clients: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Read,
    Write(PutMode),
}

/// Handler bound to one long-lived connection.
pub struct ConnectionHandler {
    backend: BackendKind,
    action: Action,
    conn: Arc<dyn KvConnection>,
}

impl ConnectionHandler {
    pub fn writer(backend: BackendKind, conn: Arc<dyn KvConnection>, mode: PutMode) -> Self {
        Self {
            backend,
            action: Action::Write(mode),
            conn,
        }
    }

    pub fn reader(backend: BackendKind, conn: Arc<dyn KvConnection>) -> Self {
        Self {
            backend,
            action: Action::Read,
            conn,
        }
    }
}

#[async_trait]
impl RequestHandler for ConnectionHandler {
    async fn handle(&self, op: &Operation) -> Result<(), ClientError> {
        if op.backend() != self.backend {
            return Err(ClientError::BackendMismatch {
                expected: self.backend,
                got: op.backend(),
            });
        }
        match (op, self.action) {
            // etcd v3 operations name their own verb
            (Operation::EtcdV3(EtcdV3Op::Put { key, value }), Action::Write(mode)) => {
                self.conn.put(key, value.as_bytes(), mode).await
            }
            (Operation::EtcdV3(EtcdV3Op::Put { key, .. }), Action::Read) => {
                Err(ClientError::WriteOnReader(key.clone()))
            }
            (Operation::EtcdV3(EtcdV3Op::Range { key, serializable }), _) => {
                self.conn.get(key, *serializable).await
            }
            (op, Action::Write(mode)) => self.conn.put(op.key(), op.value(), mode).await,
            (op, Action::Read) => self.conn.get(op.key(), op.stale_read()).await,
        }
    }
}

/// Read handler that dials a fresh connection for every request.
pub struct OneshotReadHandler {
    provider: Arc<dyn ConnectionProvider>,
    backend: BackendKind,
    endpoints: Vec<String>,
}

impl OneshotReadHandler {
    pub fn new(
        provider: Arc<dyn ConnectionProvider>,
        backend: BackendKind,
        endpoints: Vec<String>,
    ) -> Self {
        Self {
            provider,
            backend,
            endpoints,
        }
    }
}

#[async_trait]
impl RequestHandler for OneshotReadHandler {
    async fn handle(&self, op: &Operation) -> Result<(), ClientError> {
        if op.backend() != self.backend {
            return Err(ClientError::BackendMismatch {
                expected: self.backend,
                got: op.backend(),
            });
        }
        let conns = self.provider.connect(self.backend, &self.endpoints, 1).await?;
        let conn = conns
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::Request("provider returned no connection".to_string()))?;
        let result = conn.get(op.key(), op.stale_read()).await;
        conn.close().await;
        result
    }
}

async fn open(
    provider: &dyn ConnectionProvider,
    spec: &ClientSpec,
) -> Result<Vec<Arc<dyn KvConnection>>, StressError> {
    let conns = provider
        .connect(spec.backend, &spec.endpoints, spec.connections.max(1))
        .await
        .map_err(|source| StressError::Connect {
            endpoints: spec.endpoints.clone(),
            source,
        })?;
    if conns.is_empty() {
        return Err(StressError::Connect {
            endpoints: spec.endpoints.clone(),
            source: ClientError::Request("provider returned no connection".to_string()),
        });
    }
    Ok(conns)
}

fn close_all(conns: Vec<Arc<dyn KvConnection>>) -> Teardown {
    Box::new(move || {
        Box::pin(async move {
            for conn in &conns {
                conn.close().await;
            }
            tracing::debug!("closed {} connections", conns.len());
        })
    })
}

fn build(
    conns: Vec<Arc<dyn KvConnection>>,
    clients: usize,
    make: impl Fn(Arc<dyn KvConnection>) -> ConnectionHandler,
) -> HandlerSet {
    let handlers = (0..clients)
        .map(|i| Arc::new(make(conns[i % conns.len()].clone())) as Arc<dyn RequestHandler>)
        .collect();
    HandlerSet::new(handlers, Some(close_all(conns)))
}

/// Open connections and build `spec.clients` write handlers over them.
pub async fn write_handlers(
    provider: &dyn ConnectionProvider,
    spec: &ClientSpec,
    mode: PutMode,
) -> Result<HandlerSet, StressError> {
    let conns = open(provider, spec).await?;
    let backend = spec.backend;
    Ok(build(conns, spec.clients, |conn| {
        ConnectionHandler::writer(backend, conn, mode)
    }))
}

/// Open connections and build `spec.clients` read handlers over them.
pub async fn read_handlers(
    provider: &dyn ConnectionProvider,
    spec: &ClientSpec,
) -> Result<HandlerSet, StressError> {
    let conns = open(provider, spec).await?;
    let backend = spec.backend;
    Ok(build(conns, spec.clients, |conn| {
        ConnectionHandler::reader(backend, conn)
    }))
}

/// Build `spec.clients` handlers that connect per request. No teardown.
pub fn read_oneshot_handlers(provider: Arc<dyn ConnectionProvider>, spec: &ClientSpec) -> HandlerSet {
    let handlers = (0..spec.clients)
        .map(|_| {
            Arc::new(OneshotReadHandler::new(
                provider.clone(),
                spec.backend,
                spec.endpoints.clone(),
            )) as Arc<dyn RequestHandler>
        })
        .collect();
    HandlerSet::new(handlers, None)
}
