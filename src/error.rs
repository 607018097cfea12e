// Copyright 2026 QuTraj Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error types for the trajectory engine.

use std::fmt;
use std::time::Duration;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Engine error types.
///
/// Cancellation is deliberately absent: an interrupted run is reported as
/// [`RunOutcome::Cancelled`](crate::orchestrator::RunOutcome::Cancelled).
#[derive(Debug)]
pub enum Error {
    /// Configuration error
    Config(String),
    /// Invalid job input
    Validation(ValidationError),
    /// Sparse codec error
    Codec(CodecError),
    /// A worker unit failed to deliver its partial result
    Worker(WorkerError),
    /// Partial results could not be combined
    Reduce(String),
    /// IO error
    Io(std::io::Error),
    /// Serialization error
    Serialization(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Validation(e) => write!(f, "Validation error: {}", e),
            Error::Codec(e) => write!(f, "Codec error: {}", e),
            Error::Worker(e) => write!(f, "Worker error: {}", e),
            Error::Reduce(msg) => write!(f, "Reduction error: {}", msg),
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::Serialization(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Validation(e) => Some(e),
            Error::Codec(e) => Some(e),
            Error::Worker(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<ValidationError> for Error {
    fn from(e: ValidationError) -> Self {
        Error::Validation(e)
    }
}

impl From<CodecError> for Error {
    fn from(e: CodecError) -> Self {
        Error::Codec(e)
    }
}

impl From<WorkerError> for Error {
    fn from(e: WorkerError) -> Self {
        Error::Worker(e)
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Validation errors raised while building a job.
#[derive(Debug)]
pub enum ValidationError {
    /// Field validation failed
    Field { field: String, message: String },
    /// Initial state is not a column vector
    NotAKet { rows: usize, cols: usize },
    /// Operator dimension does not match the state dimension
    DimensionMismatch {
        operator: String,
        expected: usize,
        actual: (usize, usize),
    },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::Field { field, message } => {
                write!(f, "Field '{}': {}", field, message)
            }
            ValidationError::NotAKet { rows, cols } => {
                write!(
                    f,
                    "Initial state must be a state vector, got a {} × {} operator",
                    rows, cols
                )
            }
            ValidationError::DimensionMismatch {
                operator,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "Operator '{}' must be {} × {}, got {} × {}",
                    operator, expected, expected, actual.0, actual.1
                )
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Sparse codec errors.
#[derive(Debug)]
pub enum CodecError {
    /// Matrix storage is dense; convert to compressed rows first
    NotCompressed,
    /// Compressed-row arrays are inconsistent
    Malformed(String),
    /// Operand shapes do not agree
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::NotCompressed => {
                write!(f, "Matrix is not stored in compressed-row form")
            }
            CodecError::Malformed(msg) => write!(f, "Malformed compressed-row data: {}", msg),
            CodecError::ShapeMismatch { expected, actual } => write!(
                f,
                "Shape mismatch: expected {} × {}, got {} × {}",
                expected.0, expected.1, actual.0, actual.1
            ),
        }
    }
}

impl std::error::Error for CodecError {}

/// Errors reported by a trajectory kernel invocation.
#[derive(Debug)]
pub enum KernelError {
    /// The integration itself failed
    Failed(String),
    /// The kernel observed the abort flag and stopped early
    Aborted,
    /// Python error (for the qutraj_run kernel)
    Python(String),
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::Failed(msg) => write!(f, "Integration failed: {}", msg),
            KernelError::Aborted => write!(f, "Kernel aborted"),
            KernelError::Python(msg) => write!(f, "Python error: {}", msg),
        }
    }
}

impl std::error::Error for KernelError {}

/// Failures of individual worker units.
#[derive(Debug)]
pub enum WorkerError {
    /// The kernel returned an error
    Kernel { worker: usize, source: KernelError },
    /// The kernel call panicked
    Panicked { worker: usize, message: String },
    /// The kernel output could not be decoded
    Decode { worker: usize, message: String },
    /// No result arrived before the collection deadline
    Timeout {
        waited: Duration,
        pending: Vec<usize>,
    },
    /// The worker vanished without reporting
    Lost { worker: usize },
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerError::Kernel { worker, source } => {
                write!(f, "worker {} kernel error: {}", worker, source)
            }
            WorkerError::Panicked { worker, message } => {
                write!(f, "worker {} panicked: {}", worker, message)
            }
            WorkerError::Decode { worker, message } => {
                write!(f, "worker {} produced undecodable output: {}", worker, message)
            }
            WorkerError::Timeout { waited, pending } => write!(
                f,
                "timed out after {:.1}s waiting for workers {:?}",
                waited.as_secs_f64(),
                pending
            ),
            WorkerError::Lost { worker } => {
                write!(f, "worker {} exited without reporting a result", worker)
            }
        }
    }
}

impl std::error::Error for WorkerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WorkerError::Kernel { source, .. } => Some(source),
            _ => None,
        }
    }
}
