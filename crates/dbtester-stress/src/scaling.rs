//! Elastic client scaling: fixed-size batches at growing concurrency.

use crate::error::StressError;
use crate::generator::RequestGenerator;
use crate::handler::HandlerSet;
use crate::session::Benchmark;
use crate::stats::Stats;
use async_trait::async_trait;
use dbtester_core::AgentOperation;
use indicatif::ProgressBar;
use tracing::info;

/// Delivers an instruction to every agent.
#[async_trait]
pub trait AgentBroadcaster: Send + Sync {
    async fn broadcast(
        &self,
        operation: AgentOperation,
        current_client_number: i64,
    ) -> Result<(), StressError>;
}

/// Builds the per-batch handler sets and generators.
#[async_trait]
pub trait HandlerFactory: Send + Sync {
    async fn handlers(&self, clients: usize) -> Result<HandlerSet, StressError>;

    fn generator(&self, batch: &Batch) -> RequestGenerator;
}

/// One chunk of requests at one concurrency level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batch {
    /// Index of the batch's first request within the whole phase.
    pub start_index: u64,
    pub requests: u64,
    pub clients: usize,
}

/// Parameters of an elastic run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalingPlan {
    pub total_requests: u64,
    pub batch_size: u64,
    pub start_clients: usize,
    pub delta: usize,
    pub max_clients: usize,
}

impl ScalingPlan {
    /// Split the run into batches. The last batch carries the remainder and
    /// the client count never exceeds `max_clients`.
    pub fn batches(&self) -> Result<Vec<Batch>, StressError> {
        if self.batch_size == 0 {
            return Err(StressError::InvalidPlan("batch size must be positive".to_string()));
        }
        if self.start_clients == 0 || self.max_clients == 0 {
            return Err(StressError::InvalidPlan(
                "client counts must be positive".to_string(),
            ));
        }

        if self.total_requests == 0 {
            return Ok(vec![Batch {
                start_index: 0,
                requests: 0,
                clients: self.start_clients.min(self.max_clients),
            }]);
        }

        let mut batches = Vec::new();
        let mut start_index = 0;
        let mut clients = self.start_clients;
        while start_index < self.total_requests {
            let requests = self.batch_size.min(self.total_requests - start_index);
            batches.push(Batch {
                start_index,
                requests,
                clients: clients.min(self.max_clients),
            });
            start_index += requests;
            clients = clients.saturating_add(self.delta);
        }
        Ok(batches)
    }
}

async fn run_batch(bench: &mut Benchmark) -> Result<(), StressError> {
    bench.start().await?;
    bench.wait_requests_end().await
}

/// Run every batch of `plan` through one session and report once at the end.
///
/// A heartbeat carrying the batch's client count goes to the agents before
/// each batch. A failed broadcast aborts the phase.
pub async fn run_elastic(
    plan: &ScalingPlan,
    factory: &dyn HandlerFactory,
    broadcaster: &dyn AgentBroadcaster,
    progress: ProgressBar,
) -> Result<Stats, StressError> {
    let batches = plan.batches()?;
    let Some((first, rest)) = batches.split_first() else {
        return Err(StressError::InvalidPlan("no batches".to_string()));
    };

    info!(
        "elastic run: {} requests in {} batches, {} to {} clients",
        plan.total_requests,
        batches.len(),
        first.clients,
        batches.last().map_or(first.clients, |b| b.clients)
    );

    broadcaster
        .broadcast(AgentOperation::Heartbeat, first.clients as i64)
        .await?;
    let set = factory.handlers(first.clients).await?;
    let mut bench = Benchmark::new(set, factory.generator(first), progress)?;
    run_batch(&mut bench).await?;

    for batch in rest {
        info!(
            clients = batch.clients,
            "batch at request {} ({} requests)", batch.start_index, batch.requests
        );
        broadcaster
            .broadcast(AgentOperation::Heartbeat, batch.clients as i64)
            .await?;
        let set = factory.handlers(batch.clients).await?;
        bench.reset(set, factory.generator(batch)).await?;
        run_batch(&mut bench).await?;
    }

    bench.finish_reports().await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(total: u64, batch: u64, start: usize, delta: usize, max: usize) -> ScalingPlan {
        ScalingPlan {
            total_requests: total,
            batch_size: batch,
            start_clients: start,
            delta,
            max_clients: max,
        }
    }

    #[test]
    fn test_three_batches_growing_clients() {
        let batches = plan(300_000, 100_000, 50, 50, 200).batches().unwrap();
        let clients: Vec<usize> = batches.iter().map(|b| b.clients).collect();
        assert_eq!(clients, vec![50, 100, 150]);
        assert!(batches.iter().all(|b| b.requests == 100_000));
        assert_eq!(batches[2].start_index, 200_000);
    }

    #[test]
    fn test_clients_capped_and_remainder_batch() {
        let batches = plan(250, 100, 50, 100, 120).batches().unwrap();
        let clients: Vec<usize> = batches.iter().map(|b| b.clients).collect();
        assert_eq!(clients, vec![50, 120, 120]);
        let requests: Vec<u64> = batches.iter().map(|b| b.requests).collect();
        assert_eq!(requests, vec![100, 100, 50]);
    }

    #[test]
    fn test_zero_requests_single_empty_batch() {
        let batches = plan(0, 100, 10, 10, 20).batches().unwrap();
        assert_eq!(
            batches,
            vec![Batch {
                start_index: 0,
                requests: 0,
                clients: 10
            }]
        );
    }

    #[test]
    fn test_invalid_plans() {
        assert!(plan(10, 0, 1, 1, 1).batches().is_err());
        assert!(plan(10, 5, 0, 1, 1).batches().is_err());
        assert!(plan(10, 5, 1, 1, 0).batches().is_err());
    }
}
