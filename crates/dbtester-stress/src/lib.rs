//! Stress engine for the dbtester benchmarking harness.
//!
//! The engine pushes an exact number of [`Operation`]s through an elastic
//! pool of workers and folds every outcome into one [`Stats`] report:
//!
//! ```text
//!  RequestGenerator ──(bounded channel, rate limited)──┐
//!                                                      ▼
//!                               ┌──────────┬──────────┬──────────┐
//!                               │ worker 1 │ worker 2 │ worker N │  one handler
//!                               └──────────┴──────────┴──────────┘  per connection
//!                                                      │
//!                                       ResultObservation stream
//!                                                      ▼
//!                                                 Aggregator ──► Stats
//! ```
//!
//! [`Benchmark`] owns one session and can be reset with a new handler set and
//! generator while the aggregator keeps accumulating; [`run_elastic`] uses
//! that to grow the client count batch by batch.
//!
//! [`Operation`]: dbtester_core::Operation

pub mod client;
pub mod error;
pub mod generator;
pub mod handler;
pub mod memory;
pub mod ratelimit;
pub mod scaling;
pub mod session;
pub mod setup;
pub mod stats;

pub use client::{count_keys, ConnectionProvider, KvConnection, PutMode};
pub use error::{ClientError, StressError};
pub use generator::{random_value, same_key, sequential_key, RequestGenerator, RequestPattern};
pub use handler::{
    read_handlers, read_oneshot_handlers, write_handlers, ClientSpec, ConnectionHandler,
    HandlerSet, OneshotReadHandler, RequestHandler, Teardown,
};
pub use memory::MemoryProvider;
pub use ratelimit::RateLimiter;
pub use scaling::{run_elastic, AgentBroadcaster, Batch, HandlerFactory, ScalingPlan};
pub use session::{run_fixed, Benchmark};
pub use setup::seed_write;
pub use stats::{
    Aggregator, HistogramBucket, Recorder, ResultObservation, Stats, TimeSeriesPoint, PERCENTILES,
};
