//! Result collection and the report math run over it.

use crate::error::StressError;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Percentile ranks reported for every run.
pub const PERCENTILES: [f64; 8] = [10.0, 25.0, 50.0, 75.0, 90.0, 95.0, 99.0, 99.9];

/// Histogram resolution in milliseconds.
const HISTOGRAM_STEP_MS: u64 = 10;

const RECORD_BUFFER: usize = 4096;

/// Outcome of one dispatched operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultObservation {
    /// Error message text, if the call failed.
    pub error: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ResultObservation {
    pub fn new(error: Option<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { error, start, end }
    }

    /// Latency in seconds. Clock steps backwards clamp to zero.
    pub fn latency_secs(&self) -> f64 {
        (self.end - self.start)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

/// Requests started in one unix second.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeriesPoint {
    pub timestamp: i64,
    /// Mean latency of the second's requests, in seconds.
    pub avg_latency: f64,
    pub throughput: u64,
}

/// Requests whose latency truncates to `latency_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistogramBucket {
    pub latency_ms: u64,
    pub count: u64,
}

/// Final report of one stress session. Latencies are in seconds.
#[derive(Debug, Clone, Default)]
pub struct Stats {
    /// Wall time from the earliest start to the latest end.
    pub total: Duration,
    pub slowest: f64,
    pub fastest: f64,
    pub average: f64,
    pub stddev: f64,
    pub rps: f64,
    pub success_count: u64,
    /// Error message text to occurrence count.
    pub error_dist: BTreeMap<String, u64>,
    /// Every latency, sorted ascending.
    pub latencies: Vec<f64>,
    pub time_series: Vec<TimeSeriesPoint>,
}

impl Stats {
    pub fn from_observations(observations: &[ResultObservation]) -> Self {
        if observations.is_empty() {
            return Stats::default();
        }

        let mut error_dist = BTreeMap::new();
        let mut success_count = 0;
        let mut latencies = Vec::with_capacity(observations.len());
        let mut per_second: BTreeMap<i64, (u64, f64)> = BTreeMap::new();
        let mut first_start = observations[0].start;
        let mut last_end = observations[0].end;

        for obs in observations {
            match &obs.error {
                Some(msg) => *error_dist.entry(msg.clone()).or_insert(0) += 1,
                None => success_count += 1,
            }
            let latency = obs.latency_secs();
            latencies.push(latency);

            let slot = per_second.entry(obs.start.timestamp()).or_insert((0, 0.0));
            slot.0 += 1;
            slot.1 += latency;

            first_start = first_start.min(obs.start);
            last_end = last_end.max(obs.end);
        }

        latencies.sort_by(f64::total_cmp);

        let n = latencies.len() as f64;
        let total = (last_end - first_start).to_std().unwrap_or(Duration::ZERO);
        let sum: f64 = latencies.iter().sum();
        let average = sum / n;
        let variance = latencies.iter().map(|l| (l - average).powi(2)).sum::<f64>() / n;
        let rps = if total.as_secs_f64() > 0.0 {
            n / total.as_secs_f64()
        } else {
            0.0
        };

        Stats {
            total,
            slowest: latencies[latencies.len() - 1],
            fastest: latencies[0],
            average,
            stddev: variance.sqrt(),
            rps,
            success_count,
            error_dist,
            latencies,
            time_series: dense_series(&per_second),
        }
    }

    pub fn observation_count(&self) -> u64 {
        self.latencies.len() as u64
    }

    pub fn error_count(&self) -> u64 {
        self.error_dist.values().sum()
    }

    /// `(percentile, latency seconds)` for each entry of [`PERCENTILES`],
    /// nearest-rank over the sorted latencies.
    pub fn percentiles(&self) -> Vec<(f64, f64)> {
        let n = self.latencies.len();
        PERCENTILES
            .iter()
            .map(|&p| {
                if n == 0 {
                    return (p, 0.0);
                }
                let rank = ((p / 100.0) * n as f64).ceil() as usize;
                let idx = rank.clamp(1, n) - 1;
                (p, self.latencies[idx])
            })
            .collect()
    }

    /// Dense 10ms histogram from the fastest to the slowest bucket.
    pub fn histogram(&self) -> Vec<HistogramBucket> {
        let buckets: Vec<u64> = self
            .latencies
            .iter()
            .map(|l| {
                // observations carry nanosecond timestamps; truncate from there
                let ms = (l * 1e9).round() as u64 / 1_000_000;
                ms / HISTOGRAM_STEP_MS * HISTOGRAM_STEP_MS
            })
            .collect();
        let (Some(&min), Some(&max)) = (buckets.first(), buckets.last()) else {
            return Vec::new();
        };

        let mut counts: BTreeMap<u64, u64> = BTreeMap::new();
        for b in &buckets {
            *counts.entry(*b).or_insert(0) += 1;
        }
        (min..=max)
            .step_by(HISTOGRAM_STEP_MS as usize)
            .map(|latency_ms| HistogramBucket {
                latency_ms,
                count: counts.get(&latency_ms).copied().unwrap_or(0),
            })
            .collect()
    }
}

fn dense_series(per_second: &BTreeMap<i64, (u64, f64)>) -> Vec<TimeSeriesPoint> {
    let (Some((&first, _)), Some((&last, _))) =
        (per_second.first_key_value(), per_second.last_key_value())
    else {
        return Vec::new();
    };
    (first..=last)
        .map(|timestamp| match per_second.get(&timestamp) {
            Some(&(count, sum)) => TimeSeriesPoint {
                timestamp,
                avg_latency: sum / count as f64,
                throughput: count,
            },
            None => TimeSeriesPoint {
                timestamp,
                avg_latency: 0.0,
                throughput: 0,
            },
        })
        .collect()
}

/// Handle workers use to submit observations.
#[derive(Clone, Debug)]
pub struct Recorder {
    tx: mpsc::Sender<ResultObservation>,
}

impl Recorder {
    /// Returns false once the aggregator is gone.
    pub async fn record(&self, obs: ResultObservation) -> bool {
        self.tx.send(obs).await.is_ok()
    }
}

/// Single consumer task accumulating observations across session resets.
#[derive(Debug)]
pub struct Aggregator {
    tx: Option<mpsc::Sender<ResultObservation>>,
    handle: Option<JoinHandle<Stats>>,
}

impl Aggregator {
    /// Spawn the collecting task. Must be called inside a tokio runtime.
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::channel::<ResultObservation>(RECORD_BUFFER);
        let handle = tokio::spawn(async move {
            let mut observations = Vec::new();
            while let Some(obs) = rx.recv().await {
                observations.push(obs);
            }
            tracing::debug!("aggregating {} observations", observations.len());
            Stats::from_observations(&observations)
        });
        Self {
            tx: Some(tx),
            handle: Some(handle),
        }
    }

    pub fn recorder(&self) -> Result<Recorder, StressError> {
        self.tx
            .as_ref()
            .map(|tx| Recorder { tx: tx.clone() })
            .ok_or(StressError::AggregatorClosed)
    }

    /// Close the input and wait for the report.
    ///
    /// Every [`Recorder`] must be dropped first or this waits forever.
    pub async fn finish(&mut self) -> Result<Stats, StressError> {
        self.tx.take();
        let handle = self.handle.take().ok_or(StressError::AggregatorClosed)?;
        Ok(handle.await?)
    }
}
