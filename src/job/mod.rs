// Copyright 2026 QuTraj Contributors
// SPDX-License-Identifier: Apache-2.0

//! Job descriptor: the immutable bundle one simulation run is built from.

pub mod types;

pub use types::{IntegrationMethod, OdeSettings, ResultMode, StateStorage};

use ndarray::Array1;
use num_complex::Complex64;
use tracing::debug;

use crate::codec::{Dims, Operator};
use crate::config::SolverOptions;
use crate::error::Result;
use crate::validation;

/// A simulation request as supplied by the caller.
#[derive(Debug, Clone)]
pub struct McProblem {
    /// System Hamiltonian.
    pub hamiltonian: Operator,
    /// Initial state; must be a ket.
    pub psi0: Operator,
    /// Times at which results are recorded.
    pub times: Vec<f64>,
    /// Collapse operators, in the order the kernel indexes them.
    pub c_ops: Vec<Operator>,
    /// Observables; empty means states are returned instead.
    pub e_ops: Vec<Operator>,
    /// Requested number of trajectories.
    pub ntraj: usize,
}

/// Validated, read-only description of one run.
///
/// Built once per run and shared with worker units behind an `Arc`.
#[derive(Debug, Clone)]
pub struct JobDescriptor {
    hamiltonian: Operator,
    c_ops: Vec<Operator>,
    e_ops: Vec<Operator>,
    psi0: Array1<Complex64>,
    dims: Dims,
    times: Vec<f64>,
    requested_ntraj: usize,
    ntraj: usize,
    num_workers: usize,
    mode: ResultMode,
    storage: StateStorage,
    ode: OdeSettings,
}

impl JobDescriptor {
    /// Validate a problem and freeze it into a descriptor.
    ///
    /// `available_cpus` is used when `options.num_cpus` is 0.
    pub fn build(
        problem: McProblem,
        options: &SolverOptions,
        available_cpus: usize,
    ) -> Result<Self> {
        let psi0 = validation::validate_initial_state(&problem.psi0)?;
        validation::validate_time_grid(&problem.times)?;
        validation::validate_trajectory_count(problem.ntraj)?;

        let dim = psi0.len();
        validation::validate_operator_shape("H", &problem.hamiltonian, dim)?;
        for (i, op) in problem.c_ops.iter().enumerate() {
            validation::validate_operator_shape(&format!("c_ops[{}]", i), op, dim)?;
        }
        for (i, op) in problem.e_ops.iter().enumerate() {
            validation::validate_operator_shape(&format!("e_ops[{}]", i), op, dim)?;
        }

        let psi0 = if options.tidy {
            tidyup(psi0, options.atol)
        } else {
            psi0
        };

        let ntraj = if problem.c_ops.is_empty() {
            if problem.ntraj != 1 {
                debug!(
                    requested = problem.ntraj,
                    "No collapse operators, running a single trajectory"
                );
            }
            1
        } else {
            problem.ntraj
        };

        let num_workers = if options.num_cpus == 0 {
            available_cpus.max(1)
        } else {
            options.num_cpus
        };

        Ok(Self {
            hamiltonian: problem.hamiltonian.to_compressed(),
            c_ops: problem.c_ops.iter().map(Operator::to_compressed).collect(),
            e_ops: problem.e_ops.iter().map(Operator::to_compressed).collect(),
            psi0,
            dims: problem.psi0.dims().clone(),
            times: problem.times,
            requested_ntraj: problem.ntraj,
            ntraj,
            num_workers,
            mode: ResultMode::new(options.mc_avg, problem.e_ops.is_empty()),
            storage: StateStorage::from_flags(options.states_as_kets, options.sparse_dms),
            ode: OdeSettings::from_options(options),
        })
    }

    pub fn hamiltonian(&self) -> &Operator {
        &self.hamiltonian
    }

    pub fn c_ops(&self) -> &[Operator] {
        &self.c_ops
    }

    pub fn e_ops(&self) -> &[Operator] {
        &self.e_ops
    }

    pub fn psi0(&self) -> &Array1<Complex64> {
        &self.psi0
    }

    /// Shape tag of the initial state.
    pub fn dims(&self) -> &Dims {
        &self.dims
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// Hilbert-space dimension.
    pub fn dim(&self) -> usize {
        self.psi0.len()
    }

    pub fn requested_ntraj(&self) -> usize {
        self.requested_ntraj
    }

    /// Trajectory count used for dispatch (1 without collapse operators).
    pub fn ntraj(&self) -> usize {
        self.ntraj
    }

    /// Requested worker count, before zero shares are dropped.
    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    pub fn mode(&self) -> ResultMode {
        self.mode
    }

    pub fn storage(&self) -> StateStorage {
        self.storage
    }

    pub fn ode(&self) -> &OdeSettings {
        &self.ode
    }
}

/// Zero every real or imaginary part smaller in magnitude than `atol`.
pub fn tidyup(psi: Array1<Complex64>, atol: f64) -> Array1<Complex64> {
    psi.mapv(|z| {
        let re = if z.re.abs() < atol { 0.0 } else { z.re };
        let im = if z.im.abs() < atol { 0.0 } else { z.im };
        Complex64::new(re, im)
    })
}

/// Parallelism reported by the OS, at least 1.
pub fn available_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
