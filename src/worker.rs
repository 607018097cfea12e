// Copyright 2026 QuTraj Contributors
// SPDX-License-Identifier: Apache-2.0

//! Worker units: one kernel call per partition share.
//!
//! A worker clones the job's kernel encodings into a [`KernelInput`], calls
//! the kernel exactly once for its share, and decodes the raw buffer into a
//! [`PartialResult`] according to the job's [`ResultMode`] and
//! [`StateStorage`].

use ndarray::{s, Array2, Array3, Array4};
use num_complex::{Complex32, Complex64};
use tracing::debug;

use crate::codec::{self, encode::upcast, Dims, SparseEncoding};
use crate::error::{CodecError, WorkerError};
use crate::job::{JobDescriptor, ResultMode, StateStorage};
use crate::kernel::{AbortFlag, KernelConfig, KernelInput, KernelOutput, TrajectoryKernel};
use crate::partition::Share;
use crate::reduce::{PartialResult, Payload, QuantumState};

/// Kernel encodings of a job, computed once and shared by every worker.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedJob {
    pub times: Vec<f64>,
    pub psi0: Vec<Complex32>,
    /// Effective Hamiltonian.
    pub hamiltonian: SparseEncoding,
    pub c_ops: Vec<SparseEncoding>,
    pub e_ops: Vec<SparseEncoding>,
}

impl EncodedJob {
    pub fn new(job: &JobDescriptor) -> Result<Self, CodecError> {
        Ok(Self {
            times: codec::encode_times(job.times()),
            psi0: codec::encode_state(job.psi0()),
            hamiltonian: codec::encode_effective_hamiltonian(job.hamiltonian(), job.c_ops())?,
            c_ops: job
                .c_ops()
                .iter()
                .map(codec::encode)
                .collect::<Result<_, _>>()?,
            e_ops: job
                .e_ops()
                .iter()
                .map(codec::encode)
                .collect::<Result<_, _>>()?,
        })
    }
}

/// One partition entry, ready to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerUnit {
    share: Share,
}

impl WorkerUnit {
    pub fn new(share: Share) -> Self {
        Self { share }
    }

    /// Worker index; doubles as the kernel instance id.
    pub fn index(&self) -> usize {
        self.share.worker
    }

    pub fn ntraj(&self) -> usize {
        self.share.ntraj
    }

    /// Assemble the kernel call for this share.
    pub fn input(&self, job: &JobDescriptor, encoded: &EncodedJob, abort: AbortFlag) -> KernelInput {
        let mode = job.mode();
        KernelInput {
            times: encoded.times.clone(),
            psi0: encoded.psi0.clone(),
            hamiltonian: encoded.hamiltonian.clone(),
            c_ops: encoded.c_ops.clone(),
            e_ops: encoded.e_ops.clone(),
            config: KernelConfig {
                ntraj: self.share.ntraj,
                mc_avg: mode.is_averaged(),
                want_states: mode.wants_states(),
                storage: job.storage(),
                instance: self.share.worker,
                ode: job.ode().clone(),
            },
            abort,
        }
    }

    /// Run the kernel once and decode its output.
    pub async fn run<K>(
        &self,
        job: &JobDescriptor,
        encoded: &EncodedJob,
        kernel: &K,
        abort: AbortFlag,
    ) -> Result<PartialResult, WorkerError>
    where
        K: TrajectoryKernel + ?Sized,
    {
        let worker = self.share.worker;
        let input = self.input(job, encoded, abort);

        debug!(worker, ntraj = self.share.ntraj, kernel = kernel.name(), "Worker started");
        let output = kernel
            .evolve(&input)
            .await
            .map_err(|source| WorkerError::Kernel { worker, source })?;

        let payload = self
            .decode(job, output)
            .map_err(|message| WorkerError::Decode { worker, message })?;
        debug!(worker, "Worker finished");

        Ok(PartialResult {
            worker,
            ntraj: self.share.ntraj,
            payload,
        })
    }

    fn decode(&self, job: &JobDescriptor, output: KernelOutput) -> Result<Payload, String> {
        let nstep = job.times().len();
        let n = job.dim();
        let ntraj = self.share.ntraj;
        let n_e = job.e_ops().len();
        let ket_dims = job.dims().clone();
        let dm_dims = density_dims(job.dims());

        match (job.mode(), output) {
            (ResultMode::AveragedStates, KernelOutput::SparseDensity(blocks)) => {
                if job.storage() != StateStorage::SparseDensity {
                    return Err("kernel returned compressed density matrices unasked".into());
                }
                if blocks.len() != nstep {
                    return Err(format!(
                        "expected {} density matrices, got {}",
                        nstep,
                        blocks.len()
                    ));
                }
                blocks
                    .iter()
                    .map(|b| {
                        if (b.rows, b.cols) != (n, n) {
                            return Err(format!(
                                "density matrix is {} × {}, expected {} × {}",
                                b.rows, b.cols, n, n
                            ));
                        }
                        codec::decode_sparse(&b.values, &b.col_idx, &b.row_ptr, b.rows, b.cols)
                            .map(|rho| QuantumState::density_matrix(rho, dm_dims.clone()))
                            .map_err(|e| e.to_string())
                    })
                    .collect::<Result<_, _>>()
                    .map(Payload::AveragedStates)
            }

            (ResultMode::AveragedStates, KernelOutput::Dense(buf)) => match job.storage() {
                StateStorage::Ket => {
                    check_shape(&buf, (1, 1, nstep, n))?;
                    Ok(Payload::AveragedStates(
                        (0..nstep)
                            .map(|t| {
                                let psi = buf.slice(s![0, 0, t, ..]).mapv(upcast);
                                QuantumState::ket(psi, ket_dims.clone())
                            })
                            .collect(),
                    ))
                }
                StateStorage::DenseDensity => {
                    check_shape(&buf, (1, nstep, n, n))?;
                    Ok(Payload::AveragedStates(
                        (0..nstep)
                            .map(|t| {
                                let rho: Array2<Complex64> =
                                    buf.slice(s![0, t, .., ..]).mapv(upcast);
                                QuantumState::density_matrix(rho, dm_dims.clone())
                            })
                            .collect(),
                    ))
                }
                StateStorage::SparseDensity => {
                    Err("expected compressed density matrices, got a dense buffer".into())
                }
            },

            (ResultMode::TrajectoryStates, KernelOutput::Dense(buf)) => {
                check_shape(&buf, (1, ntraj, nstep, n))?;
                Ok(Payload::TrajectoryStates(
                    (0..ntraj)
                        .map(|k| {
                            (0..nstep)
                                .map(|t| {
                                    let psi = buf.slice(s![0, k, t, ..]).mapv(upcast);
                                    QuantumState::ket(psi, ket_dims.clone())
                                })
                                .collect()
                        })
                        .collect(),
                ))
            }

            (ResultMode::AveragedExpectations, KernelOutput::Dense(buf)) => {
                check_shape(&buf, (n_e, 1, nstep, 1))?;
                Ok(Payload::AveragedExpectations(
                    buf.slice(s![.., 0, .., 0]).mapv(upcast),
                ))
            }

            (ResultMode::TrajectoryExpectations, KernelOutput::Dense(buf)) => {
                check_shape(&buf, (n_e, ntraj, nstep, 1))?;
                // [observable, trajectory, time] -> [trajectory, observable, time]
                let by_obs: Array3<Complex64> = buf.slice(s![.., .., .., 0]).mapv(upcast);
                Ok(Payload::TrajectoryExpectations(
                    by_obs.permuted_axes([1, 0, 2]).as_standard_layout().into_owned(),
                ))
            }

            (mode, KernelOutput::SparseDensity(_)) => Err(format!(
                "compressed density matrices are only valid for averaged states, not {:?}",
                mode
            )),
        }
    }
}

fn check_shape(buf: &Array4<Complex32>, expected: (usize, usize, usize, usize)) -> Result<(), String> {
    if buf.dim() != expected {
        return Err(format!(
            "raw buffer has shape {:?}, expected {:?}",
            buf.dim(),
            expected
        ));
    }
    Ok(())
}

/// Dims of a density matrix built from a ket with dims `[d, _]`.
fn density_dims(ket_dims: &Dims) -> Dims {
    match ket_dims.first() {
        Some(d) => vec![d.clone(), d.clone()],
        None => ket_dims.clone(),
    }
}
