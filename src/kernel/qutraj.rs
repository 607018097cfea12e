// Copyright 2026 QuTraj Contributors
// SPDX-License-Identifier: Apache-2.0

//! `qutraj_run` kernel using PyO3.
//!
//! Drives the f2py-wrapped Fortran 90 trajectory module `qutraj_run` from an
//! embedded Python interpreter.
//!
//! # Requirements
//!
//! - Python 3.9+ with the compiled `qutraj_run` extension importable
//! - NumPy
//!
//! # Module state
//!
//! The Fortran module keeps its problem data and options in module globals.
//! Every call to [`QutrajKernel::evolve`] writes all of them from its
//! [`KernelInput`], runs, and reads the solution back inside a single GIL
//! hold, so concurrent workers sharing one interpreter never observe each
//! other's settings. Calls through one interpreter are therefore serialised
//! and cannot be interrupted; for parallel, killable workers host this kernel
//! in the `qutraj-worker` binary and drive it through
//! [`ProcessKernel`](super::process::ProcessKernel).

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use ndarray::Array4;
use num_complex::Complex32;
use pyo3::prelude::*;
use pyo3::types::PyDict;
use tracing::{debug, info, warn};

use super::r#trait::{KernelInput, KernelOutput, TrajectoryKernel};
use crate::codec::SparseEncoding;
use crate::error::KernelError;

/// Python package exposing the Fortran module.
const QUTRAJ_PACKAGE: &str = "qutraj_run";

/// Static flag to track if qutraj_run is importable
static QUTRAJ_AVAILABLE: AtomicBool = AtomicBool::new(false);
static QUTRAJ_CHECKED: AtomicBool = AtomicBool::new(false);

/// Fortran 90 Monte Carlo kernel.
pub struct QutrajKernel {
    name: String,
}

impl QutrajKernel {
    /// Create a new kernel, failing if the extension cannot be imported.
    pub fn new() -> Result<Self, KernelError> {
        if !Self::check_available() {
            return Err(KernelError::Python(format!(
                "{} is not importable. Build the Fortran extension with f2py first.",
                QUTRAJ_PACKAGE
            )));
        }

        info!("Initializing qutraj_run kernel");
        Ok(Self {
            name: "qutraj_f90".to_string(),
        })
    }

    /// Check if the extension module and NumPy are available.
    pub fn check_available() -> bool {
        // Only check once
        if QUTRAJ_CHECKED.load(Ordering::Relaxed) {
            return QUTRAJ_AVAILABLE.load(Ordering::Relaxed);
        }

        let available = Python::with_gil(|py| match py.import("numpy") {
            Ok(_) => match py.import(QUTRAJ_PACKAGE) {
                Ok(_) => true,
                Err(e) => {
                    warn!("qutraj_run not available: {}", e);
                    false
                }
            },
            Err(e) => {
                warn!("NumPy not available: {}", e);
                false
            }
        });

        QUTRAJ_CHECKED.store(true, Ordering::Relaxed);
        QUTRAJ_AVAILABLE.store(available, Ordering::Relaxed);
        available
    }

    fn evolve_inner(
        py: Python<'_>,
        input: &KernelInput,
    ) -> Result<KernelOutput, KernelError> {
        let package = py
            .import(QUTRAJ_PACKAGE)
            .map_err(py_err("Failed to import qutraj_run"))?;
        let run = package
            .getattr("qutraj_run")
            .map_err(py_err("Failed to get Fortran module"))?;

        let n = input.dim();
        let nstep = input.num_steps();
        let cfg = &input.config;

        // Problem data
        run.call_method1("init_tlist", (input.times.clone(), nstep))
            .map_err(py_err("init_tlist failed"))?;
        run.call_method1("init_psi0", (input.psi0.clone(), n))
            .map_err(py_err("init_psi0 failed"))?;

        let h = &input.hamiltonian;
        run.call_method1(
            "init_hamiltonian",
            (
                h.values.clone(),
                h.col_idx.clone(),
                h.row_ptr.clone(),
                h.rows,
                h.cols,
            ),
        )
        .map_err(py_err("init_hamiltonian failed"))?;

        let n_c_ops = input.c_ops.len();
        for (i, op) in input.c_ops.iter().enumerate() {
            run.call_method1(
                "init_c_ops",
                (
                    i + 1,
                    n_c_ops,
                    op.values.clone(),
                    op.col_idx.clone(),
                    op.row_ptr.clone(),
                    op.rows,
                    op.cols,
                    i == 0,
                ),
            )
            .map_err(py_err("init_c_ops failed"))?;
        }

        let n_e_ops = input.e_ops.len();
        for (i, op) in input.e_ops.iter().enumerate() {
            run.call_method1(
                "init_e_ops",
                (
                    i + 1,
                    n_e_ops,
                    op.values.clone(),
                    op.col_idx.clone(),
                    op.row_ptr.clone(),
                    op.rows,
                    op.cols,
                    i == 0,
                ),
            )
            .map_err(py_err("init_e_ops failed"))?;
        }

        // Options
        run.setattr("ntraj", cfg.ntraj)
            .map_err(py_err("Failed to set ntraj"))?;
        run.setattr("mc_avg", cfg.mc_avg)
            .map_err(py_err("Failed to set mc_avg"))?;

        let kwargs = PyDict::new(py);
        kwargs
            .set_item("mf", cfg.ode.method_code())
            .map_err(py_err("Failed to set mf"))?;
        run.call_method("init_odedata", (n, cfg.ode.atol, cfg.ode.rtol), Some(&kwargs))
            .map_err(py_err("init_odedata failed"))?;

        let ode = &cfg.ode;
        run.setattr("order", ode.order)
            .map_err(py_err("Failed to set order"))?;
        run.setattr("nsteps", ode.nsteps)
            .map_err(py_err("Failed to set nsteps"))?;
        run.setattr("first_step", ode.first_step)
            .map_err(py_err("Failed to set first_step"))?;
        run.setattr("min_step", ode.min_step)
            .map_err(py_err("Failed to set min_step"))?;
        run.setattr("max_step", ode.max_step)
            .map_err(py_err("Failed to set max_step"))?;
        run.setattr("norm_steps", ode.norm_steps)
            .map_err(py_err("Failed to set norm_steps"))?;
        run.setattr("norm_tol", ode.norm_tol)
            .map_err(py_err("Failed to set norm_tol"))?;
        run.setattr("return_kets", cfg.storage.returns_kets())
            .map_err(py_err("Failed to set return_kets"))?;
        run.setattr("rho_return_sparse", cfg.storage.is_sparse())
            .map_err(py_err("Failed to set rho_return_sparse"))?;

        debug!(
            instance = cfg.instance,
            ntraj = cfg.ntraj,
            method = %ode.method,
            "Calling qutraj_run.evolve"
        );
        run.call_method1("evolve", (cfg.want_states, cfg.instance))
            .map_err(py_err("evolve failed"))?;

        if input.abort.is_raised() {
            return Err(KernelError::Aborted);
        }

        if cfg.want_states && cfg.mc_avg && cfg.storage.is_sparse() {
            let mut blocks = Vec::with_capacity(nstep);
            for step in 0..nstep {
                run.call_method1("get_rho_sparse", (step + 1,))
                    .map_err(py_err("get_rho_sparse failed"))?;
                blocks.push(SparseEncoding {
                    values: extract_array(&run, "csr_val")?,
                    col_idx: extract_array(&run, "csr_col")?,
                    row_ptr: extract_array(&run, "csr_ptr")?,
                    rows: run
                        .getattr("csr_nrows")
                        .and_then(|v| v.extract())
                        .map_err(py_err("Failed to read csr_nrows"))?,
                    cols: run
                        .getattr("csr_ncols")
                        .and_then(|v| v.extract())
                        .map_err(py_err("Failed to read csr_ncols"))?,
                });
            }
            return Ok(KernelOutput::SparseDensity(blocks));
        }

        let sol = run.getattr("sol").map_err(py_err("Failed to get sol"))?;
        let shape: Vec<usize> = sol
            .getattr("shape")
            .and_then(|s| s.extract())
            .map_err(py_err("Failed to read sol.shape"))?;
        if shape.len() != 4 {
            return Err(KernelError::Failed(format!(
                "expected a 4-dimensional solution buffer, got shape {:?}",
                shape
            )));
        }

        // ravel("C") yields logical row-major order whatever the Fortran layout.
        let flat: Vec<Complex32> = sol
            .call_method1("ravel", ("C",))
            .and_then(|a| a.call_method0("tolist"))
            .and_then(|l| l.extract())
            .map_err(py_err("Failed to extract sol"))?;

        Array4::from_shape_vec((shape[0], shape[1], shape[2], shape[3]), flat)
            .map(KernelOutput::Dense)
            .map_err(|e| KernelError::Failed(format!("Solution buffer has wrong size: {}", e)))
    }
}

#[async_trait]
impl TrajectoryKernel for QutrajKernel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn evolve(&self, input: &KernelInput) -> Result<KernelOutput, KernelError> {
        if input.abort.is_raised() {
            return Err(KernelError::Aborted);
        }

        let input = input.clone();
        tokio::task::spawn_blocking(move || {
            Python::with_gil(|py| QutrajKernel::evolve_inner(py, &input))
        })
        .await
        .map_err(|e| KernelError::Failed(format!("kernel task failed: {}", e)))?
    }
}

fn extract_array<'py, T>(run: &Bound<'py, PyAny>, attr: &str) -> Result<Vec<T>, KernelError>
where
    T: for<'a> FromPyObject<'a>,
{
    run.getattr(attr)
        .and_then(|a| a.call_method0("tolist"))
        .and_then(|l| l.extract())
        .map_err(|e| KernelError::Python(format!("Failed to read {}: {}", attr, e)))
}

fn py_err(context: &'static str) -> impl Fn(PyErr) -> KernelError {
    move |e| KernelError::Python(format!("{}: {}", context, e))
}
