//! Core types for the dbtester benchmarking harness.
//!
//! This crate provides the leaf types shared by the stress engine and the
//! controller:
//!
//! - [`DatabaseId`] - Every database identity the harness knows how to test
//! - [`BackendKind`] - The client protocol a stress session speaks
//! - [`DatabaseProfile`] - Static per-backend facts (ports, tunable defaults, ceilings)
//! - [`Operation`] - One key-value request, tagged by backend
//! - [`DistributedRequest`] - Controller to agent instruction payload
//!
//! # Architecture
//!
//! ```text
//! dbtester-core (this crate)
//!    │
//!    ├─── dbtester-stress   (generates and dispatches Operations)
//!    │
//!    └─── dbtester-control  (builds DistributedRequests from YAML config)
//! ```

pub mod database;
pub mod operation;
pub mod profile;
pub mod request;

pub use database::{BackendKind, CoreError, DatabaseId};
pub use operation::{ConsulOp, EtcdV2Op, EtcdV3Op, Operation, ZkOp};
pub use profile::DatabaseProfile;
pub use request::{AgentOperation, CloudStorage, DistributedRequest, EtcdFlags, Tunables, ZookeeperFlags};
