// Copyright 2026 QuTraj Contributors
// SPDX-License-Identifier: Apache-2.0

//! Combining per-worker partial results.
//!
//! Each worker returns a [`PartialResult`] whose [`Payload`] variant matches
//! the job's [`ResultMode`]. [`reduce`] folds them in partition order:
//!
//! | mode                     | reduction                                    |
//! |--------------------------|----------------------------------------------|
//! | `AveragedStates`         | elementwise sum, divided by worker count     |
//! | `TrajectoryStates`       | concatenation, one entry per trajectory      |
//! | `AveragedExpectations`   | per observable sum, divided by worker count  |
//! | `TrajectoryExpectations` | concatenation along the trajectory axis      |
//!
//! Averages divide by the number of workers, not trajectories: every worker
//! has already averaged over its own share inside the kernel.

use ndarray::{concatenate, Array1, Array2, Array3, Axis};
use num_complex::Complex64;

use crate::codec::Dims;
use crate::error::{Error, Result};
use crate::job::{JobDescriptor, ResultMode};
use crate::partition::Partition;

/// Label reported in every aggregated result.
pub const SOLVER_LABEL: &str = "Fortran 90 Monte Carlo Solver";

/// Matrix data of a decoded state.
#[derive(Debug, Clone, PartialEq)]
pub enum StateData {
    Ket(Array1<Complex64>),
    DensityMatrix(Array2<Complex64>),
}

/// A state at one time step, tagged with the initial state's dims.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantumState {
    pub data: StateData,
    pub dims: Dims,
}

impl QuantumState {
    pub fn ket(amplitudes: Array1<Complex64>, dims: Dims) -> Self {
        Self {
            data: StateData::Ket(amplitudes),
            dims,
        }
    }

    pub fn density_matrix(rho: Array2<Complex64>, dims: Dims) -> Self {
        Self {
            data: StateData::DensityMatrix(rho),
            dims,
        }
    }

    fn add_assign(&mut self, other: &QuantumState) -> Result<()> {
        match (&mut self.data, &other.data) {
            (StateData::Ket(a), StateData::Ket(b)) if a.dim() == b.dim() => {
                *a += b;
                Ok(())
            }
            (StateData::DensityMatrix(a), StateData::DensityMatrix(b)) if a.dim() == b.dim() => {
                *a += b;
                Ok(())
            }
            _ => Err(Error::Reduce(
                "cannot average states of different kind or shape".into(),
            )),
        }
    }

    fn scale(&mut self, factor: f64) {
        let factor = Complex64::new(factor, 0.0);
        match &mut self.data {
            StateData::Ket(a) => a.mapv_inplace(|z| z * factor),
            StateData::DensityMatrix(a) => a.mapv_inplace(|z| z * factor),
        }
    }
}

/// Result payload, one variant per [`ResultMode`].
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// `[time]`
    AveragedStates(Vec<QuantumState>),
    /// `[trajectory][time]`
    TrajectoryStates(Vec<Vec<QuantumState>>),
    /// `[observable, time]`
    AveragedExpectations(Array2<Complex64>),
    /// `[trajectory, observable, time]`
    TrajectoryExpectations(Array3<Complex64>),
}

impl Payload {
    pub fn mode(&self) -> ResultMode {
        match self {
            Payload::AveragedStates(_) => ResultMode::AveragedStates,
            Payload::TrajectoryStates(_) => ResultMode::TrajectoryStates,
            Payload::AveragedExpectations(_) => ResultMode::AveragedExpectations,
            Payload::TrajectoryExpectations(_) => ResultMode::TrajectoryExpectations,
        }
    }

    /// Number of trajectories represented, for per-trajectory payloads.
    pub fn trajectory_count(&self) -> Option<usize> {
        match self {
            Payload::TrajectoryStates(s) => Some(s.len()),
            Payload::TrajectoryExpectations(e) => Some(e.len_of(Axis(0))),
            _ => None,
        }
    }
}

/// Output of one worker unit.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialResult {
    /// Worker index from the partition.
    pub worker: usize,
    /// Trajectories this worker ran.
    pub ntraj: usize,
    pub payload: Payload,
}

/// Final result of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedResult {
    pub solver: String,
    /// Trajectory count used for dispatch.
    pub ntraj: usize,
    pub num_collapse: usize,
    pub num_expect: usize,
    pub times: Vec<f64>,
    pub payload: Payload,
}

impl AggregatedResult {
    /// Attach a reduced payload to the job's metadata.
    pub fn new(job: &JobDescriptor, payload: Payload) -> Self {
        Self {
            solver: SOLVER_LABEL.to_string(),
            ntraj: job.ntraj(),
            num_collapse: job.c_ops().len(),
            num_expect: job.e_ops().len(),
            times: job.times().to_vec(),
            payload,
        }
    }

    pub fn averaged_states(&self) -> Option<&[QuantumState]> {
        match &self.payload {
            Payload::AveragedStates(s) => Some(s),
            _ => None,
        }
    }

    pub fn trajectory_states(&self) -> Option<&[Vec<QuantumState>]> {
        match &self.payload {
            Payload::TrajectoryStates(s) => Some(s),
            _ => None,
        }
    }

    pub fn averaged_expect(&self) -> Option<&Array2<Complex64>> {
        match &self.payload {
            Payload::AveragedExpectations(e) => Some(e),
            _ => None,
        }
    }

    pub fn trajectory_expect(&self) -> Option<&Array3<Complex64>> {
        match &self.payload {
            Payload::TrajectoryExpectations(e) => Some(e),
            _ => None,
        }
    }
}

/// Combine partial results, given in partition order, into one payload.
pub fn reduce(
    mode: ResultMode,
    partition: &Partition,
    partials: Vec<PartialResult>,
) -> Result<Payload> {
    if partials.is_empty() {
        return Err(Error::Reduce("no partial results to reduce".into()));
    }
    if partials.len() != partition.len() {
        return Err(Error::Reduce(format!(
            "expected {} partial results, got {}",
            partition.len(),
            partials.len()
        )));
    }

    for (share, partial) in partition.shares().iter().zip(&partials) {
        if partial.worker != share.worker {
            return Err(Error::Reduce(format!(
                "partial result from worker {} found in slot of worker {}",
                partial.worker, share.worker
            )));
        }
        if partial.payload.mode() != mode {
            return Err(Error::Reduce(format!(
                "worker {} returned {:?}, expected {:?}",
                partial.worker,
                partial.payload.mode(),
                mode
            )));
        }
        if let Some(count) = partial.payload.trajectory_count() {
            if count != share.ntraj {
                return Err(Error::Reduce(format!(
                    "worker {} returned {} trajectories, its share is {}",
                    partial.worker, count, share.ntraj
                )));
            }
        }
    }

    let workers = partials.len();
    let payloads = partials.into_iter().map(|p| p.payload);

    match mode {
        ResultMode::AveragedStates => {
            let mut sequences = payloads.filter_map(|p| match p {
                Payload::AveragedStates(s) => Some(s),
                _ => None,
            });
            let mut total = sequences.next().unwrap_or_default();
            for sequence in sequences {
                if sequence.len() != total.len() {
                    return Err(Error::Reduce(format!(
                        "state sequences of length {} and {}",
                        total.len(),
                        sequence.len()
                    )));
                }
                for (acc, state) in total.iter_mut().zip(&sequence) {
                    acc.add_assign(state)?;
                }
            }
            let inv = 1.0 / workers as f64;
            for state in &mut total {
                state.scale(inv);
            }
            Ok(Payload::AveragedStates(total))
        }

        ResultMode::TrajectoryStates => {
            let all: Vec<Vec<QuantumState>> = payloads
                .filter_map(|p| match p {
                    Payload::TrajectoryStates(s) => Some(s),
                    _ => None,
                })
                .flatten()
                .collect();
            Ok(Payload::TrajectoryStates(all))
        }

        ResultMode::AveragedExpectations => {
            let mut blocks = payloads.filter_map(|p| match p {
                Payload::AveragedExpectations(e) => Some(e),
                _ => None,
            });
            let mut total = blocks
                .next()
                .ok_or_else(|| Error::Reduce("no expectation values".into()))?;
            for block in blocks {
                if block.dim() != total.dim() {
                    return Err(Error::Reduce(format!(
                        "expectation blocks of shape {:?} and {:?}",
                        total.dim(),
                        block.dim()
                    )));
                }
                total += &block;
            }
            let divisor = Complex64::new(workers as f64, 0.0);
            total.mapv_inplace(|z| z / divisor);
            Ok(Payload::AveragedExpectations(total))
        }

        ResultMode::TrajectoryExpectations => {
            let blocks: Vec<Array3<Complex64>> = payloads
                .filter_map(|p| match p {
                    Payload::TrajectoryExpectations(e) => Some(e),
                    _ => None,
                })
                .collect();
            let views: Vec<_> = blocks.iter().map(|b| b.view()).collect();
            let joined = concatenate(Axis(0), &views)
                .map_err(|e| Error::Reduce(format!("cannot concatenate expectations: {}", e)))?;
            Ok(Payload::TrajectoryExpectations(joined))
        }
    }
}
