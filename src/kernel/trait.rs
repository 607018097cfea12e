// Copyright 2026 QuTraj Contributors
// SPDX-License-Identifier: Apache-2.0

//! Trajectory kernel trait definition.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use ndarray::Array4;
use num_complex::Complex32;
use serde::{Deserialize, Serialize};

use crate::codec::SparseEncoding;
use crate::error::KernelError;
use crate::job::{OdeSettings, StateStorage};

/// Shared flag raised when a run is cancelled or has already failed.
///
/// In-process kernels check it before committing to a call; the engine
/// also drops the kernel future, which is what stops process-backed kernels.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-call kernel settings.
///
/// Everything the kernel needs besides the encoded operators travels in this
/// value; there is no kernel-global configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Trajectories to run in this call.
    pub ntraj: usize,
    /// Average over trajectories inside the kernel.
    pub mc_avg: bool,
    /// Return states (true) or expectation values (false).
    pub want_states: bool,
    /// Storage of averaged states.
    pub storage: StateStorage,
    /// Instance id, unique per worker within a run.
    pub instance: usize,
    /// Tolerances, step limits and method.
    pub ode: OdeSettings,
}

/// Everything one kernel invocation consumes.
///
/// Serializes without the abort flag; a deserialized input gets a fresh one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelInput {
    pub times: Vec<f64>,
    pub psi0: Vec<Complex32>,
    /// Effective (non-Hermitian) Hamiltonian.
    pub hamiltonian: SparseEncoding,
    pub c_ops: Vec<SparseEncoding>,
    pub e_ops: Vec<SparseEncoding>,
    pub config: KernelConfig,
    #[serde(skip)]
    pub abort: AbortFlag,
}

impl KernelInput {
    /// Hilbert-space dimension.
    pub fn dim(&self) -> usize {
        self.psi0.len()
    }

    pub fn num_steps(&self) -> usize {
        self.times.len()
    }
}

/// Raw kernel output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum KernelOutput {
    /// Solution buffer indexed `[observable|0, trajectory|0, time, component]`.
    ///
    /// Averaged dense density matrices use `[0, time, row, col]`.
    Dense(Array4<Complex32>),
    /// Averaged density matrices as one 1-based CSR block per time step.
    SparseDensity(Vec<SparseEncoding>),
}

/// The trait every trajectory integrator implements.
///
/// The engine calls `evolve` once per worker and drops the future when the
/// run is cancelled, times out or fails elsewhere. Implementations that
/// block must move the work off the async executor themselves.
#[async_trait]
pub trait TrajectoryKernel: Send + Sync + 'static {
    /// Get the kernel name.
    fn name(&self) -> &str;

    /// Run `input.config.ntraj` trajectories and return the raw buffer.
    async fn evolve(&self, input: &KernelInput) -> Result<KernelOutput, KernelError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::IntegrationMethod;

    #[test]
    fn test_abort_flag_shared_between_clones() {
        let flag = AbortFlag::new();
        let other = flag.clone();
        assert!(!other.is_raised());
        flag.raise();
        assert!(other.is_raised());
    }

    #[test]
    fn test_input_json_drops_abort_flag() {
        let input = KernelInput {
            times: vec![0.0, 1.0],
            psi0: vec![Complex32::new(1.0, 0.0), Complex32::new(0.0, 0.0)],
            hamiltonian: SparseEncoding {
                values: vec![Complex32::new(0.5, -0.5)],
                col_idx: vec![2],
                row_ptr: vec![1, 2, 2],
                rows: 2,
                cols: 2,
            },
            c_ops: vec![],
            e_ops: vec![],
            config: KernelConfig {
                ntraj: 3,
                mc_avg: true,
                want_states: false,
                storage: StateStorage::Ket,
                instance: 1,
                ode: OdeSettings::from_options(&crate::config::SolverOptions::default()),
            },
            abort: AbortFlag::new(),
        };
        input.abort.raise();

        let json = serde_json::to_string(&input).unwrap();
        assert!(!json.contains("abort"));
        let back: KernelInput = serde_json::from_str(&json).unwrap();
        assert_eq!(back.hamiltonian, input.hamiltonian);
        assert_eq!(back.config, input.config);
        assert_eq!(back.config.ode.method, IntegrationMethod::Adams);
        assert!(!back.abort.is_raised());
    }
}
