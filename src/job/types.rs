// Copyright 2026 QuTraj Contributors
// SPDX-License-Identifier: Apache-2.0

//! Job-level enums and numerical settings.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::SolverOptions;

/// ODE integration method understood by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrationMethod {
    /// Adams–Moulton (non-stiff)
    Adams,
    /// Backward differentiation formulas (stiff)
    Bdf,
}

impl IntegrationMethod {
    /// Method flag passed to the kernel.
    pub fn code(self) -> i32 {
        match self {
            IntegrationMethod::Adams => 10,
            IntegrationMethod::Bdf => 22,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "adams" => Some(IntegrationMethod::Adams),
            "bdf" => Some(IntegrationMethod::Bdf),
            _ => None,
        }
    }

    /// Like [`from_name`](Self::from_name), but unknown names fall back to Adams.
    pub fn resolve(name: &str) -> Self {
        Self::from_name(name).unwrap_or_else(|| {
            warn!(method = %name, "Unrecognized ODE method, using \"adams\"");
            IntegrationMethod::Adams
        })
    }
}

impl fmt::Display for IntegrationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrationMethod::Adams => write!(f, "adams"),
            IntegrationMethod::Bdf => write!(f, "bdf"),
        }
    }
}

/// Numerical tolerances and step limits for one kernel call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OdeSettings {
    pub atol: f64,
    pub rtol: f64,
    pub method: IntegrationMethod,
    pub order: u32,
    pub nsteps: u32,
    pub first_step: f64,
    pub min_step: f64,
    pub max_step: f64,
    /// Newton iterations allowed when locating a jump time.
    pub norm_steps: u32,
    /// Tolerance on the norm when locating a jump time.
    pub norm_tol: f64,
}

impl OdeSettings {
    pub fn from_options(options: &SolverOptions) -> Self {
        Self {
            atol: options.atol,
            rtol: options.rtol,
            method: IntegrationMethod::resolve(&options.method),
            order: options.order,
            nsteps: options.nsteps,
            first_step: options.first_step,
            min_step: options.min_step,
            max_step: options.max_step,
            norm_steps: options.norm_steps,
            norm_tol: options.norm_tol,
        }
    }

    pub fn method_code(&self) -> i32 {
        self.method.code()
    }
}

/// What a run produces and how trajectories are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultMode {
    /// One state sequence averaged over all trajectories
    AveragedStates,
    /// One ket sequence per trajectory
    TrajectoryStates,
    /// One expectation sequence per observable, averaged
    AveragedExpectations,
    /// Expectation sequences per trajectory and observable
    TrajectoryExpectations,
}

impl ResultMode {
    pub fn new(averaged: bool, want_states: bool) -> Self {
        match (averaged, want_states) {
            (true, true) => ResultMode::AveragedStates,
            (false, true) => ResultMode::TrajectoryStates,
            (true, false) => ResultMode::AveragedExpectations,
            (false, false) => ResultMode::TrajectoryExpectations,
        }
    }

    pub fn is_averaged(self) -> bool {
        matches!(
            self,
            ResultMode::AveragedStates | ResultMode::AveragedExpectations
        )
    }

    pub fn wants_states(self) -> bool {
        matches!(
            self,
            ResultMode::AveragedStates | ResultMode::TrajectoryStates
        )
    }
}

/// How averaged states are returned by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateStorage {
    /// Averaged kets
    Ket,
    /// Averaged density matrices, one CSR block per time step
    SparseDensity,
    /// Averaged density matrices in the dense buffer
    DenseDensity,
}

impl StateStorage {
    pub fn from_flags(states_as_kets: bool, sparse_dms: bool) -> Self {
        match (states_as_kets, sparse_dms) {
            (true, _) => StateStorage::Ket,
            (false, true) => StateStorage::SparseDensity,
            (false, false) => StateStorage::DenseDensity,
        }
    }

    pub fn returns_kets(self) -> bool {
        self == StateStorage::Ket
    }

    pub fn is_sparse(self) -> bool {
        self == StateStorage::SparseDensity
    }
}
