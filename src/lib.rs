// Copyright 2026 QuTraj Contributors
// SPDX-License-Identifier: Apache-2.0

//! Monte Carlo quantum-trajectory orchestration.
//!
//! This crate runs many independent quantum trajectories through a native
//! integration kernel, spread across concurrent workers, and combines their
//! results into one averaged or per-trajectory answer.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              McSolver                   │
//! │   (lifecycle, cancellation, timeouts)   │
//! ├──────────────┬──────────────────────────┤
//! │ JobDescriptor│      Partition           │
//! ├──────────────┴──────────────────────────┤
//! │     WorkerUnit × P (tokio tasks)        │
//! ├────────────────┬────────────────────────┤
//! │  Sparse codec  │  TrajectoryKernel      │
//! │  (1-based CSR) │  (child process, PyO3) │
//! ├────────────────┴────────────────────────┤
//! │              Reducer                    │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration management
//! - [`codec`]: Operators and the kernel's compressed-row encoding
//! - [`job`]: Validated run description
//! - [`partition`]: Trajectory partitioning
//! - [`kernel`]: Kernel trait and implementations
//! - [`worker`]: Per-partition kernel calls
//! - [`reduce`]: Combining partial results
//! - [`orchestrator`]: The run lifecycle
//! - [`validation`]: Input validation utilities
//! - [`error`]: Error types

pub mod codec;
pub mod config;
pub mod error;
pub mod job;
pub mod kernel;
pub mod logging;
pub mod orchestrator;
pub mod partition;
pub mod reduce;
pub mod validation;
pub mod worker;

pub use codec::Operator;
pub use config::{Config, SolverOptions};
pub use error::{Error, Result};
pub use job::McProblem;
pub use kernel::TrajectoryKernel;
pub use orchestrator::{cancellation, CancelHandle, CancelSignal, McSolver, RunOutcome};
pub use reduce::{AggregatedResult, Payload, QuantumState};

#[cfg(test)]
pub mod test_utils;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
