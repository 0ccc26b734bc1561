//! One stress session: generator, worker pool and the shared aggregator.

use crate::error::StressError;
use crate::generator::RequestGenerator;
use crate::handler::{HandlerSet, RequestHandler, Teardown};
use crate::stats::{Aggregator, Recorder, ResultObservation, Stats};
use chrono::Utc;
use dbtester_core::Operation;
use indicatif::ProgressBar;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// The channel currently feeding workers.
struct Inflight {
    /// Held until `start` hands it to the generator.
    tx: Option<mpsc::Sender<Operation>>,
    rx: Arc<Mutex<mpsc::Receiver<Operation>>>,
    /// Set when a reset abandons this channel; workers then discard what is queued.
    discard: Arc<AtomicBool>,
}

impl Inflight {
    fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx: Some(tx),
            rx: Arc::new(Mutex::new(rx)),
            discard: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Stress session with a start / wait / reset lifecycle.
///
/// The aggregator outlives resets, so observations recorded by earlier
/// handler sets end up in the same final [`Stats`].
pub struct Benchmark {
    aggregator: Aggregator,
    inflight: Arc<RwLock<Inflight>>,
    handlers: Vec<Arc<dyn RequestHandler>>,
    teardown: Option<Teardown>,
    generator: Option<RequestGenerator>,
    generator_task: Option<JoinHandle<u64>>,
    workers: Vec<JoinHandle<()>>,
    dropped: Arc<AtomicU64>,
    progress: ProgressBar,
}

impl Benchmark {
    pub fn new(
        set: HandlerSet,
        generator: RequestGenerator,
        progress: ProgressBar,
    ) -> Result<Self, StressError> {
        if set.is_empty() {
            return Err(StressError::EmptyHandlerSet);
        }
        Ok(Self {
            aggregator: Aggregator::spawn(),
            inflight: Arc::new(RwLock::new(Inflight::new(set.len()))),
            handlers: set.handlers,
            teardown: set.teardown,
            generator: Some(generator),
            generator_task: None,
            workers: Vec::new(),
            dropped: Arc::new(AtomicU64::new(0)),
            progress,
        })
    }

    /// Number of handlers, and so workers, in the current handler set.
    pub fn concurrency(&self) -> usize {
        self.handlers.len()
    }

    /// Requests completed so far, across resets.
    pub fn progress(&self) -> u64 {
        self.progress.position()
    }

    /// Queued operations thrown away by resets.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst)
    }

    /// Spawn one worker per handler and the generator.
    pub async fn start(&mut self) -> Result<(), StressError> {
        let Some(generator) = self.generator.take() else {
            warn!("session already started; ignoring start");
            return Ok(());
        };
        let recorder = self.aggregator.recorder()?;
        let tx = self.inflight.write().await.tx.take();

        debug!(
            "starting {} workers for {} {} requests",
            self.handlers.len(),
            generator.total(),
            generator.backend()
        );
        for handler in &self.handlers {
            self.workers.push(tokio::spawn(worker(
                handler.clone(),
                self.inflight.clone(),
                recorder.clone(),
                self.progress.clone(),
                self.dropped.clone(),
            )));
        }
        if let Some(tx) = tx {
            self.generator_task = Some(tokio::spawn(generator.run(tx)));
        }
        Ok(())
    }

    /// Wait for the generator and every worker, then run the teardown.
    pub async fn wait_requests_end(&mut self) -> Result<(), StressError> {
        let mut first_error = None;
        if let Some(task) = self.generator_task.take() {
            match task.await {
                Ok(sent) => debug!("generator finished after {} operations", sent),
                Err(e) => first_error = Some(StressError::from(e)),
            }
        }
        for worker in self.workers.drain(..) {
            if let Err(e) = worker.await {
                first_error.get_or_insert(StressError::from(e));
            }
        }
        self.run_teardown().await;

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Close the aggregator input and return the report. Call once.
    pub async fn finish_reports(&mut self) -> Result<Stats, StressError> {
        let stats = self.aggregator.finish().await?;
        self.progress.finish();
        Ok(stats)
    }

    pub async fn wait_all(&mut self) -> Result<Stats, StressError> {
        self.wait_requests_end().await?;
        self.finish_reports().await
    }

    /// Swap in a new handler set and generator.
    ///
    /// Operations still queued on the old channel are discarded, not replayed.
    /// Operations a worker already took are finished and recorded. The
    /// aggregator is untouched. Call [`Benchmark::start`] afterwards.
    pub async fn reset(
        &mut self,
        set: HandlerSet,
        generator: RequestGenerator,
    ) -> Result<(), StressError> {
        if set.is_empty() {
            return Err(StressError::EmptyHandlerSet);
        }

        if let Some(task) = self.generator_task.take() {
            task.abort();
            // cancelled is the expected outcome
            let _ = task.await;
        }

        {
            let mut inflight = self.inflight.write().await;
            inflight.tx.take();
            inflight.discard.store(true, Ordering::SeqCst);
        }
        let before = self.dropped();
        for worker in self.workers.drain(..) {
            if let Err(e) = worker.await {
                warn!("worker failed before reset: {}", e);
            }
        }
        let discarded = self.dropped() - before;
        if discarded > 0 {
            warn!("reset discarded {} queued operations", discarded);
        }
        self.run_teardown().await;

        *self.inflight.write().await = Inflight::new(set.len());
        info!(
            "session reset from {} to {} clients",
            self.handlers.len(),
            set.len()
        );
        self.handlers = set.handlers;
        self.teardown = set.teardown;
        self.generator = Some(generator);
        Ok(())
    }

    async fn run_teardown(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown().await;
        }
    }
}

async fn worker(
    handler: Arc<dyn RequestHandler>,
    inflight: Arc<RwLock<Inflight>>,
    recorder: Recorder,
    progress: ProgressBar,
    dropped: Arc<AtomicU64>,
) {
    let (rx, discard) = {
        let current = inflight.read().await;
        (current.rx.clone(), current.discard.clone())
    };

    loop {
        let next = rx.lock().await.recv().await;
        let Some(op) = next else { break };
        if discard.load(Ordering::SeqCst) {
            dropped.fetch_add(1, Ordering::SeqCst);
            continue;
        }

        let start = Utc::now();
        let result = handler.handle(&op).await;
        let end = Utc::now();

        let observation = ResultObservation::new(result.err().map(|e| e.to_string()), start, end);
        if !recorder.record(observation).await {
            warn!("aggregator closed; worker exiting");
            break;
        }
        progress.inc(1);
    }
}

/// Run one session at fixed concurrency to completion.
pub async fn run_fixed(
    set: HandlerSet,
    generator: RequestGenerator,
    progress: ProgressBar,
) -> Result<Stats, StressError> {
    let mut bench = Benchmark::new(set, generator, progress)?;
    bench.start().await?;
    bench.wait_all().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::PutMode;
    use crate::handler::{write_handlers, ClientSpec};
    use crate::memory::MemoryProvider;
    use dbtester_core::BackendKind;

    fn spec(clients: usize) -> ClientSpec {
        ClientSpec {
            backend: BackendKind::EtcdV3,
            endpoints: vec!["127.0.0.1:2379".to_string()],
            connections: clients,
            clients,
        }
    }

    fn writes(total: u64) -> RequestGenerator {
        RequestGenerator::writes(BackendKind::EtcdV3, total, 8, b"value".to_vec(), false)
    }

    #[tokio::test]
    async fn test_empty_handler_set_rejected() {
        let set = HandlerSet::new(Vec::new(), None);
        assert!(matches!(
            Benchmark::new(set, writes(1), ProgressBar::hidden()),
            Err(StressError::EmptyHandlerSet)
        ));
    }

    #[tokio::test]
    async fn test_fixed_run_records_every_request() {
        let provider = MemoryProvider::new();
        let set = write_handlers(&provider, &spec(4), PutMode::Upsert)
            .await
            .unwrap();
        let stats = run_fixed(set, writes(500), ProgressBar::hidden())
            .await
            .unwrap();
        assert_eq!(stats.observation_count(), 500);
        assert_eq!(stats.success_count, 500);
        assert_eq!(provider.len().await, 500);
        assert_eq!(provider.closed_connections(), 4);
    }

    #[tokio::test]
    async fn test_zero_requests() {
        let provider = MemoryProvider::new();
        let set = write_handlers(&provider, &spec(2), PutMode::Upsert)
            .await
            .unwrap();
        let stats = run_fixed(set, writes(0), ProgressBar::hidden())
            .await
            .unwrap();
        assert_eq!(stats.observation_count(), 0);
    }

    #[tokio::test]
    async fn test_teardown_runs_once_across_reset() {
        let provider = MemoryProvider::new();
        let set = write_handlers(&provider, &spec(2), PutMode::Upsert)
            .await
            .unwrap();
        let mut bench = Benchmark::new(set, writes(100), ProgressBar::hidden()).unwrap();
        bench.start().await.unwrap();
        bench.wait_requests_end().await.unwrap();
        assert_eq!(provider.closed_connections(), 2);

        let set = write_handlers(&provider, &spec(3), PutMode::Upsert)
            .await
            .unwrap();
        bench
            .reset(set, writes(50).with_start_index(100))
            .await
            .unwrap();
        assert_eq!(bench.concurrency(), 3);
        assert_eq!(provider.closed_connections(), 2);

        bench.start().await.unwrap();
        let stats = bench.wait_all().await.unwrap();
        assert_eq!(stats.observation_count(), 150);
        assert_eq!(bench.progress(), 150);
        assert_eq!(provider.closed_connections(), 5);
        assert_eq!(provider.len().await, 150);
    }
}
