//! Stress phases against the in-memory backend, through to the CSV reports.

use dbtester_control::{
    run_phase, run_steps, save_reports, Config, LogOnlyBroadcaster, PhaseTarget,
};
use dbtester_core::{AgentOperation, BackendKind, DatabaseId};
use dbtester_stress::{
    AgentBroadcaster, ClientError, ConnectionProvider, KvConnection, MemoryProvider, StressError,
};
use indicatif::ProgressBar;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn config(id: &str, options: &str) -> Config {
    let yaml = format!(
        r#"
database_id_to_config_client_machine_agent_control:
  {id}:
    database_description: test
    peer_ips: [10.0.0.1, 10.0.0.2, 10.0.0.3]
    config_client_machine_benchmark_options:
{options}"#
    );
    Config::from_yaml(&yaml).unwrap()
}

fn provider(memory: &MemoryProvider) -> Arc<dyn ConnectionProvider> {
    Arc::new(memory.clone())
}

#[tokio::test]
async fn test_fixed_write_phase() {
    let cfg = config(
        "etcd__v3_3",
        "      type: write\n      request_number: 200\n      connection_number: 2\n      client_number: 4\n      key_size_bytes: 8\n      value_size_bytes: 16\n",
    );
    let target = PhaseTarget::new(&cfg, DatabaseId::EtcdV3_3, None).unwrap();
    assert_eq!(target.backend, BackendKind::EtcdV3);

    let memory = MemoryProvider::new();
    let progress = ProgressBar::hidden();
    let stats = run_phase(&target, provider(&memory), &LogOnlyBroadcaster, progress.clone())
        .await
        .unwrap();

    assert_eq!(stats.observation_count(), 200);
    assert_eq!(stats.success_count, 200);
    assert_eq!(progress.position(), 200);
    assert_eq!(memory.len().await, 200);
    assert_eq!(memory.value("00000199").await.map(|v| v.len()), Some(16));
}

#[tokio::test]
async fn test_elastic_write_phase() {
    let cfg = config(
        "etcd__tip",
        "      request_number: 300\n      client_number: 2\n      connection_client_number_delta: 2\n      connection_client_number_max: 10\n      batch_size: 100\n      key_size_bytes: 8\n",
    );
    let target = PhaseTarget::new(&cfg, DatabaseId::EtcdTip, None).unwrap();

    let memory = MemoryProvider::new();
    let stats = run_phase(&target, provider(&memory), &LogOnlyBroadcaster, ProgressBar::hidden())
        .await
        .unwrap();

    assert_eq!(stats.observation_count(), 300);
    assert_eq!(memory.len().await, 300);
    assert_eq!(memory.opened_connections(), memory.closed_connections());
}

#[tokio::test]
async fn test_zookeeper_same_key_write_overwrites_seed() {
    let cfg = config(
        "zookeeper__r3_5_3_beta",
        "      request_number: 50\n      connection_number: 5\n      client_number: 5\n      key_size_bytes: 4\n      same_key: true\n",
    );
    let target = PhaseTarget::new(&cfg, DatabaseId::ZookeeperR3_5_3Beta, None).unwrap();

    let memory = MemoryProvider::new();
    let stats = run_phase(&target, provider(&memory), &LogOnlyBroadcaster, ProgressBar::hidden())
        .await
        .unwrap();

    assert_eq!(stats.success_count, 50);
    assert_eq!(memory.len().await, 1);
    assert!(memory.value("/aaaa").await.is_some());
}

#[tokio::test]
async fn test_read_phase_seeds_then_reads() {
    let cfg = config(
        "zookeeper__r3_5_3_beta",
        "      type: read\n      request_number: 50\n      connection_number: 5\n      client_number: 5\n      key_size_bytes: 4\n      stale_read: true\n",
    );
    let target = PhaseTarget::new(&cfg, DatabaseId::ZookeeperR3_5_3Beta, None).unwrap();

    let memory = MemoryProvider::new();
    let stats = run_phase(&target, provider(&memory), &LogOnlyBroadcaster, ProgressBar::hidden())
        .await
        .unwrap();

    assert_eq!(stats.observation_count(), 50);
    assert_eq!(stats.error_count(), 0);
    assert_eq!(memory.len().await, 1);
    assert_eq!(memory.requests(), 51);
}

#[tokio::test]
async fn test_read_oneshot_phase_reconnects_per_request() {
    let cfg = config(
        "consul__v1_0_2",
        "      type: read-oneshot\n      request_number: 10\n      connection_number: 4\n      client_number: 4\n      key_size_bytes: 8\n",
    );
    let target = PhaseTarget::new(&cfg, DatabaseId::ConsulV1_0_2, None).unwrap();

    let memory = MemoryProvider::new();
    let stats = run_phase(&target, provider(&memory), &LogOnlyBroadcaster, ProgressBar::hidden())
        .await
        .unwrap();

    assert_eq!(stats.success_count, 10);
    // one connection for the seed write, one per read
    assert_eq!(memory.opened_connections(), 11);
    assert_eq!(memory.closed_connections(), 11);
}

/// Refuses the first connect, then behaves like the wrapped store.
struct FlakyOnce {
    inner: MemoryProvider,
    refused: AtomicBool,
}

#[async_trait::async_trait]
impl ConnectionProvider for FlakyOnce {
    async fn connect(
        &self,
        backend: BackendKind,
        endpoints: &[String],
        count: usize,
    ) -> Result<Vec<Arc<dyn KvConnection>>, ClientError> {
        if !self.refused.swap(true, Ordering::SeqCst) {
            return Err(ClientError::Request("transient".to_string()));
        }
        self.inner.connect(backend, endpoints, count).await
    }
}

#[tokio::test]
async fn test_seed_retries_transient_connect_failure() {
    for bench_type in ["read", "read-oneshot"] {
        let cfg = config(
            "consul__v1_0_2",
            &format!(
                "      type: {bench_type}\n      request_number: 5\n      connection_number: 2\n      client_number: 2\n      key_size_bytes: 8\n"
            ),
        );
        let target = PhaseTarget::new(&cfg, DatabaseId::ConsulV1_0_2, None).unwrap();
        assert_eq!(target.options.setup_write_attempts, 7);

        let memory = MemoryProvider::new();
        let flaky: Arc<dyn ConnectionProvider> = Arc::new(FlakyOnce {
            inner: memory.clone(),
            refused: AtomicBool::new(false),
        });
        let stats = run_phase(&target, flaky, &LogOnlyBroadcaster, ProgressBar::hidden())
            .await
            .unwrap();

        assert_eq!(stats.success_count, 5, "{bench_type}");
        assert_eq!(memory.len().await, 1, "{bench_type}");
    }
}

#[tokio::test]
async fn test_seed_failure_aborts_read_phase() {
    let cfg = config(
        "consul__v1_0_2",
        "      type: read\n      request_number: 10\n      connection_number: 1\n      client_number: 1\n      setup_write_attempts: 2\n",
    );
    let target = PhaseTarget::new(&cfg, DatabaseId::ConsulV1_0_2, None).unwrap();

    let memory = MemoryProvider::new().refusing_connections();
    let err = run_phase(&target, provider(&memory), &LogOnlyBroadcaster, ProgressBar::hidden())
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("after 2 attempts"));
    assert_eq!(memory.requests(), 0);
}

#[tokio::test]
async fn test_protocol_override() {
    let cfg = config("etcd__v3_2", "      client_number: 1\n");
    let target = PhaseTarget::new(&cfg, DatabaseId::EtcdV3_2, Some(BackendKind::EtcdV2)).unwrap();
    assert_eq!(target.backend, BackendKind::EtcdV2);
    assert_eq!(target.endpoints[1], "10.0.0.2:2379");
}

#[tokio::test]
async fn test_reports_written_under_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let yaml = format!(
        r#"
config_client_machine_initial:
  path_prefix: {}
  client_latency_throughput_timeseries_path: timeseries.csv
  client_latency_distribution_all_path: all.csv
  client_latency_distribution_percentile_path: percentile.csv
  client_latency_distribution_summary_path: summary.csv
database_id_to_config_client_machine_agent_control:
  etcd__v3_3:
    database_description: etcd v3.3 (Go 1.9.2)
    peer_ips: [10.0.0.1]
    config_client_machine_benchmark_options:
      request_number: 100
      client_number: 4
      key_size_bytes: 8
"#,
        dir.path().join("out").display()
    );
    let cfg = Config::from_yaml(&yaml).unwrap();
    let target = PhaseTarget::new(&cfg, DatabaseId::EtcdV3_3, None).unwrap();
    let memory = MemoryProvider::new();
    let stats = run_phase(&target, provider(&memory), &LogOnlyBroadcaster, ProgressBar::hidden())
        .await
        .unwrap();

    save_reports(&cfg.client, &stats).unwrap();

    let summary = std::fs::read_to_string(dir.path().join("out/summary.csv")).unwrap();
    assert!(summary.starts_with("TOTAL-SECONDS,SLOWEST-LATENCY-MS"));
    let percentile = std::fs::read_to_string(dir.path().join("out/percentile.csv")).unwrap();
    assert_eq!(percentile.lines().count(), 9);
    assert!(dir.path().join("out/all.csv").exists());
    let series = std::fs::read_to_string(dir.path().join("out/timeseries.csv")).unwrap();
    assert!(series.starts_with("UNIX-TS,AVG-LATENCY-MS,AVG-THROUGHPUT"));
}

#[derive(Default)]
struct RecordingBroadcaster {
    sent: std::sync::Mutex<Vec<(AgentOperation, i64)>>,
}

#[async_trait::async_trait]
impl AgentBroadcaster for RecordingBroadcaster {
    async fn broadcast(&self, op: AgentOperation, clients: i64) -> Result<(), StressError> {
        self.sent.lock().unwrap().push((op, clients));
        Ok(())
    }
}

#[tokio::test]
async fn test_steps_start_stress_stop() {
    let dir = tempfile::tempdir().unwrap();
    let yaml = format!(
        r#"
config_client_machine_initial:
  path_prefix: {}
  client_latency_distribution_summary_path: summary.csv
database_id_to_config_client_machine_agent_control:
  consul__v1_0_2:
    database_description: Consul v1.0.2 (Go 1.9.2)
    peer_ips: [10.0.0.1, 10.0.0.2, 10.0.0.3]
    config_client_machine_benchmark_steps:
      step1_start_database: true
      step2_stress_client: true
      step3_stop_database: true
    config_client_machine_benchmark_options:
      request_number: 20
      connection_number: 3
      client_number: 3
      key_size_bytes: 8
"#,
        dir.path().display()
    );
    let cfg = Config::from_yaml(&yaml).unwrap();
    let target = PhaseTarget::new(&cfg, DatabaseId::ConsulV1_0_2, None).unwrap();
    let broadcaster = RecordingBroadcaster::default();
    let memory = MemoryProvider::new();

    let stats = run_steps(
        &target,
        &cfg.client,
        provider(&memory),
        &broadcaster,
        ProgressBar::hidden(),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(stats.success_count, 20);
    assert_eq!(
        *broadcaster.sent.lock().unwrap(),
        vec![(AgentOperation::Start, 3), (AgentOperation::Stop, 3)]
    );
    assert!(dir.path().join("summary.csv").exists());
}

#[tokio::test]
async fn test_steps_skip_disabled_stress() {
    let cfg = config("etcd__v3_3", "      client_number: 1\n");
    let target = PhaseTarget::new(&cfg, DatabaseId::EtcdV3_3, None).unwrap();
    let memory = MemoryProvider::new();

    let stats = run_steps(
        &target,
        &cfg.client,
        provider(&memory),
        &LogOnlyBroadcaster,
        ProgressBar::hidden(),
    )
    .await
    .unwrap();
    assert!(stats.is_none());
    assert_eq!(memory.opened_connections(), 0);
}
