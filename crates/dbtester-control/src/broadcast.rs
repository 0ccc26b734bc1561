//! Delivery of [`DistributedRequest`]s to the agents of one database.

use crate::config::Config;
use anyhow::{Context, Result};
use async_trait::async_trait;
use dbtester_core::{AgentOperation, DatabaseId, DistributedRequest};
use dbtester_stress::{AgentBroadcaster, StressError};
use futures::future::join_all;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// POSTs each request as JSON to `http://<agent>/request`.
pub struct HttpAgentBroadcaster {
    config: Arc<Config>,
    database_id: DatabaseId,
}

impl HttpAgentBroadcaster {
    pub fn new(config: Arc<Config>, database_id: DatabaseId) -> Self {
        Self {
            config,
            database_id,
        }
    }

    fn requests(
        &self,
        operation: AgentOperation,
        current_client_number: i64,
    ) -> Result<Vec<(String, DistributedRequest)>> {
        let group = self.config.database(self.database_id)?;
        group
            .agent_endpoints
            .iter()
            .enumerate()
            .map(|(idx, endpoint)| {
                let req = self
                    .config
                    .to_request(self.database_id, operation, idx)?
                    .with_client_number(current_client_number);
                Ok::<_, anyhow::Error>((endpoint.clone(), req))
            })
            .collect()
    }
}

#[async_trait]
impl AgentBroadcaster for HttpAgentBroadcaster {
    async fn broadcast(
        &self,
        operation: AgentOperation,
        current_client_number: i64,
    ) -> Result<(), StressError> {
        let requests = self
            .requests(operation, current_client_number)
            .map_err(|e| StressError::Broadcast(format!("{e:#}")))?;
        info!(
            "sending {} to {} agents of {} (clients {})",
            operation,
            requests.len(),
            self.database_id,
            current_client_number
        );

        let results = join_all(
            requests
                .iter()
                .map(|(endpoint, req)| send_request(endpoint, req)),
        )
        .await;

        let failures: Vec<String> = results
            .into_iter()
            .zip(&requests)
            .filter_map(|(result, (endpoint, _))| {
                result.err().map(|e| format!("{endpoint}: {e:#}"))
            })
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(StressError::Broadcast(failures.join("; ")))
        }
    }
}

/// Single HTTP/1.1 exchange with one agent. Anything but 200 is a failure.
pub async fn send_request(endpoint: &str, req: &DistributedRequest) -> Result<()> {
    let host = endpoint.strip_prefix("http://").unwrap_or(endpoint);
    let mut stream = TcpStream::connect(host)
        .await
        .with_context(|| format!("Failed to connect to agent at {host}"))?;

    let json = serde_json::to_string(req).context("Failed to serialize request to JSON")?;
    let request = format!(
        "POST /request HTTP/1.1\r\n\
         Host: {}\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        host,
        json.len(),
        json
    );

    stream
        .write_all(request.as_bytes())
        .await
        .context("Failed to write HTTP request")?;
    stream.flush().await.context("Failed to flush HTTP request")?;

    let mut response = String::new();
    stream
        .read_to_string(&mut response)
        .await
        .context("Failed to read HTTP response")?;

    let status_line = response.lines().next().unwrap_or("(no status line)");
    if !status_line.starts_with("HTTP/1.1 200") && !status_line.starts_with("HTTP/1.0 200") {
        anyhow::bail!("Agent returned non-200 response: {status_line}");
    }
    debug!("agent {} accepted {}", host, req.operation);
    Ok(())
}

/// Broadcaster for runs without agents: logs and succeeds.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOnlyBroadcaster;

#[async_trait]
impl AgentBroadcaster for LogOnlyBroadcaster {
    async fn broadcast(
        &self,
        operation: AgentOperation,
        current_client_number: i64,
    ) -> Result<(), StressError> {
        info!(
            "no agents configured; skipping {} (clients {})",
            operation, current_client_number
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Accept one connection, capture the request, reply with `status`.
    async fn one_shot_agent(status: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 64 * 1024];
            let mut received = Vec::new();
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                received.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&received).to_string();
                if let Some(pos) = text.find("\r\n\r\n") {
                    let len: usize = text
                        .lines()
                        .find_map(|l| l.strip_prefix("Content-Length: "))
                        .and_then(|v| v.trim().parse().ok())
                        .unwrap_or(0);
                    if received.len() >= pos + 4 + len {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let reply = format!("HTTP/1.1 {status}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
            socket.write_all(reply.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&received).to_string()
        });
        (addr, handle)
    }

    fn yaml(agent_addr: &str) -> String {
        let (ip, port) = agent_addr.rsplit_once(':').unwrap();
        format!(
            r#"
database_id_to_config_client_machine_agent_control:
  etcd__v3_3:
    database_description: etcd v3.3 (Go 1.9.2)
    peer_ips: ["{ip}"]
    agent_port_to_connect: {port}
    config_client_machine_benchmark_options:
      connection_number: 10
      client_number: 20
"#
        )
    }

    #[tokio::test]
    async fn test_heartbeat_posts_json() {
        let (addr, agent) = one_shot_agent("200 OK").await;
        let config = Arc::new(Config::from_yaml(&yaml(&addr)).unwrap());
        let bcast = HttpAgentBroadcaster::new(config, DatabaseId::EtcdV3_3);

        bcast
            .broadcast(AgentOperation::Heartbeat, 150)
            .await
            .unwrap();

        let received = agent.await.unwrap();
        assert!(received.starts_with("POST /request HTTP/1.1"));
        let body = &received[received.find("\r\n\r\n").unwrap() + 4..];
        let req: DistributedRequest = serde_json::from_str(body).unwrap();
        assert_eq!(req.operation, AgentOperation::Heartbeat);
        assert_eq!(req.current_client_number, 150);
        assert_eq!(req.database_tag, "etcd-v3.3-go1.9.2");
    }

    #[tokio::test]
    async fn test_non_200_is_a_broadcast_error() {
        let (addr, agent) = one_shot_agent("500 Internal Server Error").await;
        let config = Arc::new(Config::from_yaml(&yaml(&addr)).unwrap());
        let bcast = HttpAgentBroadcaster::new(config, DatabaseId::EtcdV3_3);

        let err = bcast
            .broadcast(AgentOperation::Start, 20)
            .await
            .unwrap_err();
        assert!(matches!(err, StressError::Broadcast(ref msg) if msg.contains("500")));
        agent.await.unwrap();
    }

    #[tokio::test]
    async fn test_undefined_database_fails() {
        let config = Arc::new(Config::from_yaml("test_title: empty\n").unwrap());
        let bcast = HttpAgentBroadcaster::new(config, DatabaseId::ConsulV1_0_2);
        assert!(bcast.broadcast(AgentOperation::Stop, 1).await.is_err());
    }
}
