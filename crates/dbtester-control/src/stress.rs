//! Stress phases (write, read, read-oneshot) driven from the controller.

use crate::config::{
    BenchType, BenchmarkOptions, BenchmarkSteps, ClientMachineInitial, Config, ConfigError,
};
use crate::report::{format_summary, save_reports};
use anyhow::{Context, Result};
use async_trait::async_trait;
use dbtester_core::{AgentOperation, BackendKind, DatabaseId};
use dbtester_stress::{
    count_keys, random_value, read_handlers, read_oneshot_handlers, run_elastic, run_fixed,
    same_key, seed_write, write_handlers, AgentBroadcaster, Batch, ClientSpec, ConnectionProvider,
    HandlerFactory, HandlerSet, PutMode, RequestGenerator, ScalingPlan, Stats, StressError,
};
use indicatif::ProgressBar;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Seed for the write payload, so repeated runs send identical bytes.
const VALUE_SEED: u64 = 0x6462_7465_7374;

/// Everything a phase needs to know about its target.
#[derive(Debug, Clone)]
pub struct PhaseTarget {
    pub database_id: DatabaseId,
    pub backend: BackendKind,
    pub endpoints: Vec<String>,
    pub steps: BenchmarkSteps,
    pub options: BenchmarkOptions,
}

impl PhaseTarget {
    /// Resolve `database_id` in `config`. `backend` overrides the identity's
    /// default protocol, e.g. to stress etcd through its v2 API.
    pub fn new(
        config: &Config,
        database_id: DatabaseId,
        backend: Option<BackendKind>,
    ) -> Result<Self, ConfigError> {
        let group = config.database(database_id)?;
        Ok(Self {
            database_id,
            backend: backend.unwrap_or_else(|| database_id.backend_kind()),
            endpoints: group.database_endpoints.clone(),
            steps: group.steps.clone(),
            options: group.options.clone(),
        })
    }

    fn client_spec(&self, clients: usize) -> ClientSpec {
        ClientSpec {
            backend: self.backend,
            endpoints: self.endpoints.clone(),
            connections: self.options.connection_number.max(1),
            clients: clients.max(1),
        }
    }

    /// ZooKeeper creates fresh nodes, or overwrites the seeded node in
    /// same-key mode. Other backends upsert.
    fn write_mode(&self) -> PutMode {
        match (self.backend, self.options.same_key) {
            (BackendKind::Zookeeper, true) => PutMode::Overwrite,
            (BackendKind::Zookeeper, false) => PutMode::Create,
            _ => PutMode::Upsert,
        }
    }

    fn value(&self) -> Vec<u8> {
        random_value(self.options.value_size_bytes, VALUE_SEED)
    }

    fn write_generator(&self, total: u64, value: Vec<u8>) -> RequestGenerator {
        RequestGenerator::writes(
            self.backend,
            total,
            self.options.key_size_bytes,
            value,
            self.options.same_key,
        )
        .with_rate_limit(self.options.rate_limit_requests_per_second)
    }

    async fn seed(
        &self,
        provider: &dyn ConnectionProvider,
        value: &[u8],
        attempts: u32,
    ) -> Result<(), StressError> {
        let key = same_key(self.options.key_size_bytes);
        info!(
            key = %key,
            database = %self.database_id,
            "write started [request: PUT]"
        );
        seed_write(provider, self.backend, &self.endpoints, &key, value, attempts).await
    }
}

struct WriteBatches {
    target: PhaseTarget,
    provider: Arc<dyn ConnectionProvider>,
    value: Vec<u8>,
}

#[async_trait]
impl HandlerFactory for WriteBatches {
    async fn handlers(&self, clients: usize) -> Result<HandlerSet, StressError> {
        write_handlers(
            self.provider.as_ref(),
            &self.target.client_spec(clients),
            self.target.write_mode(),
        )
        .await
    }

    fn generator(&self, batch: &Batch) -> RequestGenerator {
        self.target
            .write_generator(batch.requests, self.value.clone())
            .with_start_index(batch.start_index)
    }
}

/// Run the phase configured for `target` and return its report.
pub async fn run_phase(
    target: &PhaseTarget,
    provider: Arc<dyn ConnectionProvider>,
    broadcaster: &dyn AgentBroadcaster,
    progress: ProgressBar,
) -> Result<Stats> {
    let opts = &target.options;
    info!(
        "{} phase for {} over {} ({} requests, {} clients)",
        opts.bench_type, target.database_id, target.backend, opts.request_number, opts.client_number
    );

    let stats = match opts.bench_type {
        BenchType::Write => run_write(target, provider, broadcaster, progress).await?,
        BenchType::Read => {
            let value = target.value();
            target
                .seed(provider.as_ref(), &value, opts.setup_write_attempts)
                .await?;
            let set = read_handlers(provider.as_ref(), &target.client_spec(opts.client_number))
                .await?;
            let generator = read_generator(target);
            run_fixed(set, generator, progress).await?
        }
        BenchType::ReadOneshot => {
            let value = target.value();
            target
                .seed(provider.as_ref(), &value, opts.setup_write_attempts)
                .await?;
            let set = read_oneshot_handlers(provider, &target.client_spec(opts.client_number));
            run_fixed(set, read_generator(target), progress).await?
        }
    };
    info!("{} phase for {} is finished", opts.bench_type, target.database_id);
    Ok(stats)
}

/// Run the enabled steps for one database: start it on every agent, stress
/// it and save the reports, then stop it.
///
/// Returns the stress report when the stress step ran.
pub async fn run_steps(
    target: &PhaseTarget,
    paths: &ClientMachineInitial,
    provider: Arc<dyn ConnectionProvider>,
    broadcaster: &dyn AgentBroadcaster,
    progress: ProgressBar,
) -> Result<Option<Stats>> {
    let clients = target.options.client_number as i64;
    if target.steps.step1_start_database {
        broadcaster
            .broadcast(AgentOperation::Start, clients)
            .await
            .with_context(|| format!("failed to start {}", target.database_id))?;
    }

    let mut stats = None;
    if target.steps.step2_stress_client {
        let report = run_phase(target, provider, broadcaster, progress).await?;
        info!("{}\n{}", target.database_id, format_summary(&report));
        save_reports(paths, &report)?;
        stats = Some(report);
    }

    if target.steps.step3_stop_database {
        broadcaster
            .broadcast(AgentOperation::Stop, clients)
            .await
            .with_context(|| format!("failed to stop {}", target.database_id))?;
    }
    Ok(stats)
}

fn read_generator(target: &PhaseTarget) -> RequestGenerator {
    let opts = &target.options;
    RequestGenerator::reads(
        target.backend,
        opts.request_number,
        same_key(opts.key_size_bytes),
        opts.stale_read,
    )
    .with_rate_limit(opts.rate_limit_requests_per_second)
}

async fn run_write(
    target: &PhaseTarget,
    provider: Arc<dyn ConnectionProvider>,
    broadcaster: &dyn AgentBroadcaster,
    progress: ProgressBar,
) -> Result<Stats> {
    let opts = &target.options;
    let value = target.value();

    if target.backend == BackendKind::Zookeeper && opts.same_key {
        target
            .seed(provider.as_ref(), &value, opts.setup_write_attempts)
            .await?;
    }

    let stats = if opts.connection_client_number_max == 0 {
        let set = write_handlers(
            provider.as_ref(),
            &target.client_spec(opts.client_number),
            target.write_mode(),
        )
        .await?;
        run_fixed(set, target.write_generator(opts.request_number, value), progress).await?
    } else {
        let plan = ScalingPlan {
            total_requests: opts.request_number,
            batch_size: opts.batch_size,
            start_clients: opts.client_number,
            delta: opts.connection_client_number_delta,
            max_clients: opts.connection_client_number_max,
        };
        let factory = WriteBatches {
            target: target.clone(),
            provider: provider.clone(),
            value,
        };
        run_elastic(&plan, &factory, broadcaster, progress)
            .await
            .context("elastic write phase failed")?
    };

    check_key_count(provider.as_ref(), target).await?;
    Ok(stats)
}

/// Log how many keys each endpoint reports against the number requested.
pub async fn check_key_count(
    provider: &dyn ConnectionProvider,
    target: &PhaseTarget,
) -> Result<BTreeMap<String, u64>, StressError> {
    info!("checking total keys on {:?}", target.endpoints);
    let counts = count_keys(provider, target.backend, &target.endpoints).await?;
    for (endpoint, keys) in &counts {
        info!(
            expected_total = target.options.request_number,
            database = %target.database_id,
            endpoint = %endpoint,
            number_of_keys = keys,
            "expected write total results"
        );
    }
    Ok(counts)
}
