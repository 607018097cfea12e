// Copyright 2026 QuTraj Contributors
// SPDX-License-Identifier: Apache-2.0

//! Kernel host for process-backed workers.
//!
//! Reads one JSON kernel input from stdin, runs it through the Fortran 90
//! `qutraj_run` kernel and writes the JSON output to stdout. Logs go to
//! stderr; a failed call exits non-zero.
//!
//! # Usage
//!
//! ```rust,ignore
//! let kernel = ProcessKernel::new("qutraj-worker");
//! let solver = McSolver::new(Arc::new(kernel), &config)?;
//! ```

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{error, info};

use qutraj_mc::error::{KernelError, WorkerError};
use qutraj_mc::kernel::qutraj::QutrajKernel;
use qutraj_mc::kernel::{KernelInput, TrajectoryKernel};
use qutraj_mc::{logging, Config, Error, Result};

#[tokio::main]
async fn main() {
    let config = match Config::load(None) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = logging::init_stderr_logging(&config.logging) {
        eprintln!("{}", e);
        std::process::exit(1);
    }

    if let Err(e) = run().await {
        error!(error = %e, "Kernel call failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let mut request = Vec::new();
    tokio::io::stdin().read_to_end(&mut request).await?;
    let input: KernelInput = serde_json::from_slice(&request)?;

    let worker = input.config.instance;
    let kernel_error = |source: KernelError| Error::Worker(WorkerError::Kernel { worker, source });

    let kernel = QutrajKernel::new().map_err(kernel_error)?;
    info!(
        instance = worker,
        ntraj = input.config.ntraj,
        kernel = kernel.name(),
        "Running kernel call"
    );
    let output = kernel.evolve(&input).await.map_err(kernel_error)?;

    let reply = serde_json::to_vec(&output)?;
    let mut stdout = tokio::io::stdout();
    stdout.write_all(&reply).await?;
    stdout.flush().await?;
    Ok(())
}
