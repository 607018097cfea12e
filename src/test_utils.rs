// Copyright 2026 QuTraj Contributors
// SPDX-License-Identifier: Apache-2.0

//! Shared test utilities: small problems and mock kernels.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ndarray::{array, Array2, Array4};
use num_complex::{Complex32, Complex64};

use crate::codec::{encode_csr, CsrMatrix, Operator};
use crate::error::KernelError;
use crate::job::McProblem;
use crate::kernel::{KernelConfig, KernelInput, KernelOutput, TrajectoryKernel};

fn c(re: f64) -> Complex64 {
    Complex64::new(re, 0.0)
}

pub fn sigma_z() -> Operator {
    Operator::from_dense(array![[c(1.0), c(0.0)], [c(0.0), c(-1.0)]])
}

/// |0><1|, decay from the excited state.
pub fn sigma_minus() -> Operator {
    Operator::from_dense(array![[c(0.0), c(1.0)], [c(0.0), c(0.0)]])
}

/// Decaying qubit starting in |1> with `n_c_ops` collapse operators and
/// `n_e_ops` observables on a 5-point time grid.
pub fn qubit_problem(ntraj: usize, n_c_ops: usize, n_e_ops: usize) -> McProblem {
    let hamiltonian = Operator::from_dense(array![[c(0.5), c(0.0)], [c(0.0), c(-0.5)]]);
    let c_ops = (0..n_c_ops)
        .map(|i| {
            if i == 0 {
                sigma_minus()
            } else {
                Operator::from_dense(sigma_z().to_dense().mapv(|z| z * 0.1))
            }
        })
        .collect();
    let e_ops = (0..n_e_ops)
        .map(|i| {
            if i % 2 == 0 {
                sigma_z()
            } else {
                Operator::from_dense(Array2::eye(2))
            }
        })
        .collect();

    McProblem {
        hamiltonian,
        psi0: Operator::ket(array![c(0.0), c(1.0)]),
        times: vec![0.0, 0.25, 0.5, 0.75, 1.0],
        c_ops,
        e_ops,
        ntraj,
    }
}

/// Build the output a real kernel would return for `input`, filling each
/// buffer cell from its `[observable|0, trajectory|0, time, component]`
/// index.
///
/// Averaged compressed density matrices are diagonal, with entry `i` taken
/// from `f(0, 0, t, i)`.
pub fn fill_output<F>(input: &KernelInput, f: F) -> KernelOutput
where
    F: Fn(usize, usize, usize, usize) -> Complex32,
{
    let cfg = &input.config;
    let n = input.dim();
    let nstep = input.num_steps();
    let n_e = input.e_ops.len();

    if cfg.want_states && cfg.mc_avg && cfg.storage.is_sparse() {
        let blocks = (0..nstep)
            .map(|t| {
                let diag = Array2::from_shape_fn((n, n), |(i, j)| {
                    if i == j {
                        let z = f(0, 0, t, i);
                        Complex64::new(z.re as f64, z.im as f64)
                    } else {
                        Complex64::new(0.0, 0.0)
                    }
                });
                encode_csr(&CsrMatrix::from_dense(&diag)).unwrap()
            })
            .collect();
        return KernelOutput::SparseDensity(blocks);
    }

    let shape = match (cfg.want_states, cfg.mc_avg) {
        (true, true) if cfg.storage.returns_kets() => (1, 1, nstep, n),
        (true, true) => (1, nstep, n, n),
        (true, false) => (1, cfg.ntraj, nstep, n),
        (false, true) => (n_e, 1, nstep, 1),
        (false, false) => (n_e, cfg.ntraj, nstep, 1),
    };
    KernelOutput::Dense(Array4::from_shape_fn(shape, |(a, b, t, d)| f(a, b, t, d)))
}

/// Fills every cell with one value.
pub struct ConstantKernel {
    value: Complex32,
}

impl ConstantKernel {
    pub fn new(value: Complex32) -> Self {
        Self { value }
    }
}

#[async_trait]
impl TrajectoryKernel for ConstantKernel {
    fn name(&self) -> &str {
        "constant"
    }

    async fn evolve(&self, input: &KernelInput) -> Result<KernelOutput, KernelError> {
        Ok(fill_output(input, |_, _, _, _| self.value))
    }
}

/// Encodes instance, trajectory and observable into every value.
pub struct IndexedKernel;

impl IndexedKernel {
    /// Value written for `(instance, trajectory, observable)`.
    pub fn value(instance: usize, trajectory: usize, observable: usize) -> Complex64 {
        Complex64::new(instance as f64, (trajectory * 10 + observable) as f64)
    }
}

#[async_trait]
impl TrajectoryKernel for IndexedKernel {
    fn name(&self) -> &str {
        "indexed"
    }

    async fn evolve(&self, input: &KernelInput) -> Result<KernelOutput, KernelError> {
        let instance = input.config.instance;
        Ok(fill_output(input, |obs, traj, _, _| {
            let v = IndexedKernel::value(instance, traj, obs);
            Complex32::new(v.re as f32, v.im as f32)
        }))
    }
}

/// Always returns a kernel error.
pub struct FailingKernel;

#[async_trait]
impl TrajectoryKernel for FailingKernel {
    fn name(&self) -> &str {
        "failing"
    }

    async fn evolve(&self, _input: &KernelInput) -> Result<KernelOutput, KernelError> {
        Err(KernelError::Failed("mock integration failure".to_string()))
    }
}

/// Panics inside the kernel call.
pub struct PanickingKernel;

#[async_trait]
impl TrajectoryKernel for PanickingKernel {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn evolve(&self, _input: &KernelInput) -> Result<KernelOutput, KernelError> {
        panic!("mock kernel panic");
    }
}

/// Records every configuration it is called with.
#[derive(Default)]
pub struct RecordingKernel {
    configs: Mutex<Vec<KernelConfig>>,
}

impl RecordingKernel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded configurations, sorted by instance id.
    pub fn configs(&self) -> Vec<KernelConfig> {
        let mut configs = self.configs.lock().unwrap().clone();
        configs.sort_by_key(|c| c.instance);
        configs
    }
}

#[async_trait]
impl TrajectoryKernel for RecordingKernel {
    fn name(&self) -> &str {
        "recording"
    }

    async fn evolve(&self, input: &KernelInput) -> Result<KernelOutput, KernelError> {
        self.configs.lock().unwrap().push(input.config.clone());
        Ok(fill_output(input, |_, _, _, _| Complex32::new(1.0, 0.0)))
    }
}

/// Blocks the listed instances until the call is dropped; the rest return
/// immediately.
pub struct GatedKernel {
    blocked: HashSet<usize>,
    started: AtomicUsize,
    finished: AtomicUsize,
    terminated: AtomicUsize,
}

impl GatedKernel {
    /// Upper bound on how long a blocked call waits, so a broken test fails
    /// instead of hanging.
    const MAX_BLOCK: Duration = Duration::from_secs(10);

    pub fn new(blocked: impl IntoIterator<Item = usize>) -> Self {
        Self {
            blocked: blocked.into_iter().collect(),
            started: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
            terminated: AtomicUsize::new(0),
        }
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }

    /// Blocked calls dropped before they returned.
    pub fn terminated(&self) -> usize {
        self.terminated.load(Ordering::SeqCst)
    }
}

/// Counts a drop unless forgotten.
struct DropCounter<'a>(&'a AtomicUsize);

impl Drop for DropCounter<'_> {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl TrajectoryKernel for GatedKernel {
    fn name(&self) -> &str {
        "gated"
    }

    async fn evolve(&self, input: &KernelInput) -> Result<KernelOutput, KernelError> {
        self.started.fetch_add(1, Ordering::SeqCst);

        if self.blocked.contains(&input.config.instance) {
            let guard = DropCounter(&self.terminated);
            tokio::time::sleep(Self::MAX_BLOCK).await;
            std::mem::forget(guard);
            return Err(KernelError::Failed("gate never released".to_string()));
        }

        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(fill_output(input, |_, _, _, _| Complex32::new(1.0, 0.0)))
    }
}

/// Poll `condition` until it holds or `timeout` passes.
pub async fn wait_for(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let start = Instant::now();
    while !condition() {
        if start.elapsed() > timeout {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    true
}
