//! Finite, optionally rate-limited stream of operations.

use crate::ratelimit::RateLimiter;
use dbtester_core::{BackendKind, Operation};
use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;

/// Fixed key used by same-key writes and by reads: `size` copies of `a`.
pub fn same_key(size: usize) -> String {
    "a".repeat(size.max(1))
}

/// `n` zero-padded to `size` digits. Wider numbers are not truncated.
pub fn sequential_key(size: usize, n: u64) -> String {
    format!("{n:0>size$}")
}

/// Alphanumeric payload of `size` bytes, reproducible for a given seed.
pub fn random_value(size: usize, seed: u64) -> Vec<u8> {
    StdRng::seed_from_u64(seed)
        .sample_iter(&Alphanumeric)
        .take(size)
        .collect()
}

/// What each generated operation looks like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestPattern {
    /// Writes of `value`; sequential keys unless `same_key`.
    Write { same_key: bool, value: Vec<u8> },
    /// Reads of one fixed key.
    Read { key: String, stale_read: bool },
}

/// Produces exactly `total` operations onto a bounded channel.
///
/// The channel is closed by dropping the sender once the last operation is
/// sent, which is the only completion signal workers see.
#[derive(Debug)]
pub struct RequestGenerator {
    backend: BackendKind,
    pattern: RequestPattern,
    total: u64,
    key_size: usize,
    start_index: u64,
    limiter: Option<RateLimiter>,
}

impl RequestGenerator {
    pub fn writes(
        backend: BackendKind,
        total: u64,
        key_size: usize,
        value: Vec<u8>,
        same_key: bool,
    ) -> Self {
        Self {
            backend,
            pattern: RequestPattern::Write { same_key, value },
            total,
            key_size,
            start_index: 0,
            limiter: None,
        }
    }

    pub fn reads(backend: BackendKind, total: u64, key: String, stale_read: bool) -> Self {
        let key_size = key.len();
        Self {
            backend,
            pattern: RequestPattern::Read { key, stale_read },
            total,
            key_size,
            start_index: 0,
            limiter: None,
        }
    }

    /// Cap emissions at `rps` per second; zero leaves the stream unlimited.
    pub fn with_rate_limit(mut self, rps: u64) -> Self {
        self.limiter = RateLimiter::new(rps);
        self
    }

    /// Offset sequential keys, so consecutive batches write distinct keys.
    pub fn with_start_index(mut self, start_index: u64) -> Self {
        self.start_index = start_index;
        self
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    /// The `i`-th operation of this stream.
    pub fn operation(&self, i: u64) -> Operation {
        match &self.pattern {
            RequestPattern::Write { same_key: true, value } => {
                Operation::put(self.backend, &same_key(self.key_size), value)
            }
            RequestPattern::Write {
                same_key: false,
                value,
            } => Operation::put(
                self.backend,
                &sequential_key(self.key_size, self.start_index + i),
                value,
            ),
            RequestPattern::Read { key, stale_read } => {
                let stale = *stale_read && self.backend.supports_stale_read();
                Operation::get(self.backend, key, stale)
            }
        }
    }

    /// Send every operation, then close the channel. Returns how many were
    /// delivered, which is less than `total` only if all receivers went away.
    pub async fn run(mut self, tx: mpsc::Sender<Operation>) -> u64 {
        if let Some(limiter) = &self.limiter {
            tracing::debug!("{} stream limited to {} requests/sec", self.backend, limiter.rate());
        }
        let mut sent = 0;
        while sent < self.total {
            if let Some(limiter) = self.limiter.as_mut() {
                limiter.acquire().await;
            }
            let op = self.operation(sent);
            if tx.send(op).await.is_err() {
                tracing::debug!("request channel closed after {} of {} operations", sent, self.total);
                break;
            }
            sent += 1;
        }
        sent
    }
}
