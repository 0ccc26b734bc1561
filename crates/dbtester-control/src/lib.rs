//! Controller side of dbtester.
//!
//! Loads the test configuration, derives the requests sent to each agent,
//! runs the configured stress phase against a database group and writes
//! the latency/throughput reports.
//!
//! ```text
//! Config::read ──► PhaseTarget ──► run_phase ──► save_reports
//!       │                              │
//!       └── to_request ──► HttpAgentBroadcaster (heartbeats between batches)
//! ```

pub mod broadcast;
pub mod config;
pub mod report;
pub mod stress;

pub use broadcast::{send_request, HttpAgentBroadcaster, LogOnlyBroadcaster};
pub use config::{
    endpoints, make_tag, AgentControl, BenchType, BenchmarkOptions, BenchmarkSteps,
    ClientMachineInitial, Config, ConfigError, PlotSpec,
};
pub use report::{
    format_summary, histogram_table, percentile_table, save_reports, summary_table,
    timeseries_table, ReportTable,
};
pub use stress::{check_key_count, run_phase, run_steps, PhaseTarget};
