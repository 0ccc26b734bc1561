//! Controller configuration: YAML model, validation and defaulting.
//!
//! [`Config::from_yaml`] is the only way to obtain a [`Config`], so every value
//! handed to the stress phases and the agents has already been checked.

use dbtester_core::profile::{
    DEFAULT_SCALING_BATCH_SIZE, DEFAULT_SETUP_WRITE_ATTEMPTS, DEFAULT_ZOOKEEPER_INIT_LIMIT,
    DEFAULT_ZOOKEEPER_MAX_CLIENT_CONNECTIONS, DEFAULT_ZOOKEEPER_SNAP_COUNT,
    DEFAULT_ZOOKEEPER_SYNC_LIMIT, DEFAULT_ZOOKEEPER_TICK_TIME_MS, MAX_ETCD_QUOTA_SIZE_BYTES,
};
use dbtester_core::{
    AgentOperation, CloudStorage, CoreError, DatabaseId, DatabaseProfile, DistributedRequest,
    EtcdFlags, Tunables, ZookeeperFlags,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors. All of them are raised before any load is generated.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("databaseID {0:?} is unknown")]
    UnknownDatabaseId(String),

    #[error("\"{id}\" got connected {connections} != clients {clients}")]
    ConnectionClientMismatch {
        id: DatabaseId,
        connections: usize,
        clients: usize,
    },

    #[error("\"{id}\": maximum etcd quota is 8 GB ({max}), got {got}")]
    QuotaTooLarge { id: DatabaseId, max: i64, got: i64 },

    #[error("got \"{0}\" config, but no etcd config is given")]
    MissingEtcdBackend(DatabaseId),

    #[error("database ID \"{0}\" is not defined")]
    UndefinedDatabase(DatabaseId),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl From<CoreError> for ConfigError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::UnknownDatabaseId(s) | CoreError::UnknownBackendKind(s) => {
                ConfigError::UnknownDatabaseId(s)
            }
        }
    }
}

/// Turn a human description into a tag usable in file names.
///
/// `"etcd v3.3 (Go 1.9.2)"` becomes `"etcd-v3.3-go1.9.2"`.
pub fn make_tag(description: &str) -> String {
    description
        .to_lowercase()
        .replace("go ", "go")
        .replace("java ", "java")
        .replace(['(', ')'], "")
        .replace(' ', "-")
}

/// Stress phase to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BenchType {
    #[default]
    Write,
    Read,
    ReadOneshot,
}

impl std::fmt::Display for BenchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BenchType::Write => write!(f, "write"),
            BenchType::Read => write!(f, "read"),
            BenchType::ReadOneshot => write!(f, "read-oneshot"),
        }
    }
}

/// Controller-wide settings: output paths and log upload destination.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientMachineInitial {
    pub path_prefix: PathBuf,
    pub log_path: PathBuf,
    pub client_system_metrics_path: PathBuf,
    pub client_system_metrics_interpolated_path: PathBuf,
    pub client_latency_throughput_timeseries_path: PathBuf,
    pub client_latency_distribution_all_path: PathBuf,
    pub client_latency_distribution_percentile_path: PathBuf,
    pub client_latency_distribution_summary_path: PathBuf,
    pub client_latency_by_key_number_path: PathBuf,
    pub server_disk_space_usage_summary_path: PathBuf,

    pub google_cloud_project_name: String,
    pub google_cloud_storage_key_path: PathBuf,
    /// Contents of `google_cloud_storage_key_path`, filled by [`Config::read`].
    #[serde(skip)]
    pub google_cloud_storage_key: String,
    pub google_cloud_storage_bucket_name: String,
    pub google_cloud_storage_sub_directory: String,
}

impl ClientMachineInitial {
    fn prefix_paths(&mut self) {
        if self.path_prefix.as_os_str().is_empty() {
            return;
        }
        let prefix = self.path_prefix.clone();
        for path in [
            &mut self.log_path,
            &mut self.client_system_metrics_path,
            &mut self.client_system_metrics_interpolated_path,
            &mut self.client_latency_throughput_timeseries_path,
            &mut self.client_latency_distribution_all_path,
            &mut self.client_latency_distribution_percentile_path,
            &mut self.client_latency_distribution_summary_path,
            &mut self.client_latency_by_key_number_path,
            &mut self.server_disk_space_usage_summary_path,
        ] {
            if !path.as_os_str().is_empty() {
                *path = prefix.join(&*path);
            }
        }
    }

    fn cloud_storage(&self) -> CloudStorage {
        CloudStorage {
            project_name: self.google_cloud_project_name.clone(),
            key: self.google_cloud_storage_key.clone(),
            bucket_name: self.google_cloud_storage_bucket_name.clone(),
            sub_directory: self.google_cloud_storage_sub_directory.clone(),
        }
    }
}

/// Which agent steps run for a database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkSteps {
    pub step1_start_database: bool,
    pub step2_stress_client: bool,
    pub step3_stop_database: bool,
    pub step4_upload_logs: bool,
}

/// Workload shape for one database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkOptions {
    #[serde(rename = "type")]
    pub bench_type: BenchType,
    pub request_number: u64,
    pub connection_number: usize,
    pub client_number: usize,
    /// Clients added per batch when scaling elastically.
    pub connection_client_number_delta: usize,
    /// Enables elastic scaling when non-zero.
    pub connection_client_number_max: usize,
    /// Requests per second; zero means unlimited.
    #[serde(alias = "requests_per_second")]
    pub rate_limit_requests_per_second: u64,
    pub key_size_bytes: usize,
    pub value_size_bytes: usize,
    pub same_key: bool,
    pub stale_read: bool,
    pub batch_size: u64,
    pub setup_write_attempts: u32,
}

/// Per-database agent and client settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentControl {
    pub database_description: String,
    pub peer_ips: Vec<String>,
    pub agent_port_to_connect: u16,
    pub database_port_to_connect: u16,

    #[serde(rename = "config_client_machine_benchmark_steps")]
    pub steps: BenchmarkSteps,
    #[serde(rename = "config_client_machine_benchmark_options")]
    pub options: BenchmarkOptions,

    #[serde(
        alias = "flag__etcd__other",
        alias = "flag__etcd__tip",
        alias = "flag__etcd__v3_2",
        alias = "flag__etcd__v3_3"
    )]
    pub flag_etcd: EtcdFlags,
    #[serde(alias = "flag__zookeeper__r3_5_3_beta")]
    pub flag_zookeeper: ZookeeperFlags,

    #[serde(skip)]
    pub database_tag: String,
    /// `ip:port` per peer for the database clients.
    #[serde(skip)]
    pub database_endpoints: Vec<String>,
    /// `ip:port` per peer for the agents.
    #[serde(skip)]
    pub agent_endpoints: Vec<String>,
}

/// One plot the analysis step renders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotSpec {
    pub column: String,
    pub x_axis: String,
    pub y_axis: String,
    #[serde(skip)]
    pub output_path_csv: PathBuf,
    /// `.svg` then `.png`.
    #[serde(skip)]
    pub output_path_list: Vec<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    test_title: String,
    test_description: String,
    config_client_machine_initial: ClientMachineInitial,
    all_database_id_list: Vec<String>,
    #[serde(alias = "datatbase_id_to_config_client_machine_agent_control")]
    database_id_to_config_client_machine_agent_control: BTreeMap<String, AgentControl>,
    analyze_plot_path_prefix: PathBuf,
    analyze_plot_list: Vec<PlotSpec>,
}

/// Validated controller configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub test_title: String,
    pub test_description: String,
    pub client: ClientMachineInitial,
    pub all_database_ids: Vec<DatabaseId>,
    pub databases: BTreeMap<DatabaseId, AgentControl>,
    pub analyze_plot_path_prefix: PathBuf,
    pub plots: Vec<PlotSpec>,
}

impl Config {
    /// Load from a file and read the cloud storage key it points at.
    pub fn read(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut cfg = Self::from_yaml(&text)?;

        let key_path = cfg.client.google_cloud_storage_key_path.clone();
        if !key_path.as_os_str().is_empty() {
            cfg.client.google_cloud_storage_key =
                std::fs::read_to_string(&key_path).map_err(|source| ConfigError::Io {
                    path: key_path,
                    source,
                })?;
        }
        Ok(cfg)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_yaml::from_str(text)?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let all_database_ids = raw
            .all_database_id_list
            .iter()
            .map(|s| s.parse::<DatabaseId>())
            .collect::<Result<Vec<_>, _>>()?;

        let mut databases = BTreeMap::new();
        for (name, group) in raw.database_id_to_config_client_machine_agent_control {
            let id: DatabaseId = name.parse()?;
            databases.insert(id, group);
        }

        let mut client = raw.config_client_machine_initial;
        client.prefix_paths();

        for (id, group) in databases.iter_mut() {
            group.database_tag = make_tag(&group.database_description);

            let options = &group.options;
            if !id.is_etcd_family() && options.connection_number != options.client_number {
                return Err(ConfigError::ConnectionClientMismatch {
                    id: *id,
                    connections: options.connection_number,
                    clients: options.client_number,
                });
            }

            apply_defaults(*id, group);

            if let Some(max) = DatabaseProfile::of(*id).max_quota_size_bytes() {
                if group.flag_etcd.quota_size_bytes > max {
                    return Err(ConfigError::QuotaTooLarge {
                        id: *id,
                        max,
                        got: group.flag_etcd.quota_size_bytes,
                    });
                }
            }

            group.database_endpoints = endpoints(&group.peer_ips, group.database_port_to_connect);
            group.agent_endpoints = endpoints(&group.peer_ips, group.agent_port_to_connect);
        }

        let has_etcd = databases.keys().any(DatabaseId::is_etcd_family);
        if let Some(proxy) = databases.keys().find(|id| id.requires_etcd_backend()) {
            if !has_etcd {
                return Err(ConfigError::MissingEtcdBackend(*proxy));
            }
        }

        let prefix = raw.analyze_plot_path_prefix;
        let plots = raw
            .analyze_plot_list
            .into_iter()
            .map(|mut plot| {
                plot.output_path_csv = prefix.join(format!("{}.csv", plot.column));
                plot.output_path_list = vec![
                    prefix.join(format!("{}.svg", plot.column)),
                    prefix.join(format!("{}.png", plot.column)),
                ];
                plot
            })
            .collect();

        Ok(Self {
            test_title: raw.test_title,
            test_description: raw.test_description,
            client,
            all_database_ids,
            databases,
            analyze_plot_path_prefix: prefix,
            plots,
        })
    }

    pub fn database(&self, id: DatabaseId) -> Result<&AgentControl, ConfigError> {
        self.databases
            .get(&id)
            .ok_or(ConfigError::UndefinedDatabase(id))
    }

    /// Instruction for the agent on host `idx` of `id`.
    ///
    /// Only the tunable block matching `id` is present; ZooKeeper members get
    /// the 1-based replica id `idx + 1`.
    pub fn to_request(
        &self,
        id: DatabaseId,
        operation: AgentOperation,
        idx: usize,
    ) -> Result<DistributedRequest, ConfigError> {
        let group = self.database(id)?;
        let profile = DatabaseProfile::of(id);

        let tunables = if let Some(max) = profile.max_quota_size_bytes() {
            if group.flag_etcd.quota_size_bytes > max {
                return Err(ConfigError::QuotaTooLarge {
                    id,
                    max,
                    got: group.flag_etcd.quota_size_bytes,
                });
            }
            Some(Tunables::Etcd(group.flag_etcd.clone()))
        } else if profile.zookeeper_flags {
            let mut flags = group.flag_zookeeper.clone();
            flags.replica_id = idx as u32 + 1;
            Some(Tunables::Zookeeper(flags))
        } else {
            None
        };

        Ok(DistributedRequest {
            operation,
            database_id: id,
            database_tag: group.database_tag.clone(),
            ip_index: idx as u32,
            peer_ips: group.peer_ips.clone(),
            current_client_number: group.options.client_number as i64,
            trigger_log_upload: group.steps.step4_upload_logs,
            cloud_storage: self.client.cloud_storage(),
            tunables,
        })
    }

    /// One request per configured database and host, in identity order.
    pub fn requests_for(
        &self,
        operation: AgentOperation,
    ) -> Result<Vec<DistributedRequest>, ConfigError> {
        let mut requests = Vec::new();
        for (id, group) in &self.databases {
            for idx in 0..group.peer_ips.len() {
                requests.push(self.to_request(*id, operation, idx)?);
            }
        }
        Ok(requests)
    }
}

/// `ip:port` for every peer.
pub fn endpoints(peer_ips: &[String], port: u16) -> Vec<String> {
    peer_ips.iter().map(|ip| format!("{ip}:{port}")).collect()
}

/// Fill every zero field from the identity's profile. Explicit values stay.
fn apply_defaults(id: DatabaseId, group: &mut AgentControl) {
    let profile = DatabaseProfile::of(id);

    if group.agent_port_to_connect == 0 {
        group.agent_port_to_connect = profile.agent_port;
    }
    if group.database_port_to_connect == 0 {
        group.database_port_to_connect = profile.client_port;
    }

    if let Some(snapshot_count) = profile.etcd_snapshot_count {
        if group.flag_etcd.snapshot_count == 0 {
            group.flag_etcd.snapshot_count = snapshot_count;
        }
    }
    if let Some(quota) = profile.etcd_quota_size_bytes {
        if group.flag_etcd.quota_size_bytes == 0 {
            group.flag_etcd.quota_size_bytes = quota;
        }
    }

    if profile.zookeeper_flags {
        let zk = &mut group.flag_zookeeper;
        // the server always listens where clients are told to connect
        zk.client_port = i64::from(group.database_port_to_connect);
        if zk.tick_time_ms == 0 {
            zk.tick_time_ms = DEFAULT_ZOOKEEPER_TICK_TIME_MS;
        }
        if zk.init_limit == 0 {
            zk.init_limit = DEFAULT_ZOOKEEPER_INIT_LIMIT;
        }
        if zk.sync_limit == 0 {
            zk.sync_limit = DEFAULT_ZOOKEEPER_SYNC_LIMIT;
        }
        if zk.snap_count == 0 {
            zk.snap_count = DEFAULT_ZOOKEEPER_SNAP_COUNT;
        }
        if zk.max_client_connections == 0 {
            zk.max_client_connections = DEFAULT_ZOOKEEPER_MAX_CLIENT_CONNECTIONS;
        }
    }

    if group.options.batch_size == 0 {
        group.options.batch_size = DEFAULT_SCALING_BATCH_SIZE;
    }
    if group.options.setup_write_attempts == 0 {
        group.options.setup_write_attempts = DEFAULT_SETUP_WRITE_ATTEMPTS;
    }
}
