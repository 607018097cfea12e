// Copyright 2026 QuTraj Contributors
// SPDX-License-Identifier: Apache-2.0

//! Kernel calls in child processes.
//!
//! [`ProcessKernel`] runs every [`evolve`](TrajectoryKernel::evolve) call in
//! a fresh child process: the [`KernelInput`] goes to the child's stdin as
//! JSON, the [`KernelOutput`] comes back on its stdout as JSON. Workers
//! therefore run in parallel even when the kernel itself is single-threaded,
//! and dropping a call kills its child.
//!
//! The `qutraj-worker` binary (feature `python`) speaks this protocol for
//! the Fortran 90 kernel.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::r#trait::{KernelInput, KernelOutput, TrajectoryKernel};
use crate::error::KernelError;

/// Kernel that delegates each call to an external program.
#[derive(Debug)]
pub struct ProcessKernel {
    name: String,
    program: PathBuf,
    args: Vec<String>,
    spawned: AtomicUsize,
}

impl ProcessKernel {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        let program = program.into();
        Self {
            name: format!("process:{}", program.display()),
            program,
            args: Vec::new(),
            spawned: AtomicUsize::new(0),
        }
    }

    /// Arguments passed to every child.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Children started so far.
    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TrajectoryKernel for ProcessKernel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn evolve(&self, input: &KernelInput) -> Result<KernelOutput, KernelError> {
        if input.abort.is_raised() {
            return Err(KernelError::Aborted);
        }

        let request = serde_json::to_vec(input)
            .map_err(|e| KernelError::Failed(format!("Failed to encode kernel input: {}", e)))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                KernelError::Failed(format!(
                    "Failed to start {}: {}",
                    self.program.display(),
                    e
                ))
            })?;
        self.spawned.fetch_add(1, Ordering::SeqCst);

        let instance = input.config.instance;
        debug!(instance, pid = child.id(), "Kernel process started");

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| KernelError::Failed("kernel process has no stdin".into()))?;
        let write = async move {
            let written = stdin.write_all(&request).await;
            // Dropping stdin sends EOF.
            drop(stdin);
            written
        };

        // The child owns the pipes from here on; dropping this future
        // drops the child, which kills it.
        let (written, output) = tokio::join!(write, child.wait_with_output());
        let output = output
            .map_err(|e| KernelError::Failed(format!("Failed to wait for kernel process: {}", e)))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(KernelError::Failed(format!(
                "kernel process exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        if let Err(e) = written {
            return Err(KernelError::Failed(format!(
                "Failed to send kernel input: {}",
                e
            )));
        }
        if !stderr.trim().is_empty() {
            warn!(instance, stderr = %stderr.trim(), "Kernel process wrote to stderr");
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| KernelError::Failed(format!("Unreadable kernel output: {}", e)))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use ndarray::Array4;
    use num_complex::{Complex32, Complex64};

    use crate::config::Config;
    use crate::error::{Error, WorkerError};
    use crate::orchestrator::{cancellation, CancelSignal, McSolver, RunOutcome};
    use crate::test_utils::{qubit_problem, wait_for};

    fn config(num_cpus: usize) -> Config {
        let mut config = Config::default();
        config.solver.num_cpus = num_cpus;
        config
    }

    /// `sh -c <script>` with `$1` bound to `arg`.
    fn shell(script: &str, arg: &str) -> ProcessKernel {
        ProcessKernel::new("sh").with_args(["-c", script, "qutraj", arg])
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_output_read_from_child_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let reply = dir.path().join("reply.json");
        // Averaged expectations for one observable on five time points.
        let output = KernelOutput::Dense(Array4::from_elem((1, 1, 5, 1), Complex32::new(0.5, 0.0)));
        std::fs::write(&reply, serde_json::to_vec(&output).unwrap()).unwrap();

        let kernel = Arc::new(shell(r#"cat >/dev/null; cat "$1""#, reply.to_str().unwrap()));
        let solver = McSolver::new(Arc::clone(&kernel), &config(2)).unwrap();
        let outcome = solver
            .run(qubit_problem(4, 1, 1), CancelSignal::none())
            .await
            .unwrap();

        let result = outcome.into_result().unwrap();
        let expect = result.averaged_expect().unwrap();
        assert_eq!(expect.dim(), (1, 5));
        assert!(expect.iter().all(|&z| z == Complex64::new(0.5, 0.0)));
        assert_eq!(kernel.spawned(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_child_receives_json_input() {
        let dir = tempfile::tempdir().unwrap();
        let seen = dir.path().join("input.json");

        let kernel = Arc::new(shell(r#"cat > "$1"; exit 1"#, seen.to_str().unwrap()));
        let solver = McSolver::new(kernel, &config(1)).unwrap();
        let _ = solver.run(qubit_problem(3, 1, 1), CancelSignal::none()).await;

        let sent: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&seen).unwrap()).unwrap();
        assert_eq!(sent["config"]["ntraj"], 3);
        assert_eq!(sent["config"]["instance"], 0);
        assert_eq!(sent["times"].as_array().unwrap().len(), 5);
        assert!(sent.get("abort").is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_nonzero_exit_is_kernel_error() {
        let kernel = Arc::new(shell("echo step size underflow >&2; exit 3", ""));
        let solver = McSolver::new(kernel, &config(2)).unwrap();
        let err = solver
            .run(qubit_problem(4, 1, 1), CancelSignal::none())
            .await
            .unwrap_err();
        match err {
            Error::Worker(WorkerError::Kernel { source, .. }) => {
                let message = source.to_string();
                assert!(message.contains("step size underflow"), "{}", message);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_garbage_output_is_kernel_error() {
        let kernel = Arc::new(shell("cat >/dev/null; echo not-json", ""));
        let solver = McSolver::new(kernel, &config(1)).unwrap();
        let err = solver
            .run(qubit_problem(1, 1, 1), CancelSignal::none())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Unreadable kernel output"), "{}", err);
    }

    #[tokio::test]
    async fn test_missing_program_is_kernel_error() {
        let kernel = Arc::new(ProcessKernel::new("/nonexistent/qutraj-worker"));
        let solver = McSolver::new(Arc::clone(&kernel), &config(1)).unwrap();
        let err = solver
            .run(qubit_problem(1, 1, 1), CancelSignal::none())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to start"), "{}", err);
        assert_eq!(kernel.spawned(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_kills_blocked_children() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("finished");

        // Each child would block for a second, then leave a marker behind.
        let kernel = Arc::new(shell(r#"sleep 1; touch "$1""#, marker.to_str().unwrap()));
        let solver = Arc::new(McSolver::new(Arc::clone(&kernel), &config(2)).unwrap());
        let (handle, signal) = cancellation();

        let run = {
            let solver = Arc::clone(&solver);
            tokio::spawn(async move { solver.run(qubit_problem(4, 1, 1), signal).await })
        };

        assert!(wait_for(Duration::from_secs(5), || kernel.spawned() == 2).await);
        handle.cancel();

        let outcome = run.await.unwrap().unwrap();
        assert!(
            matches!(
                outcome,
                RunOutcome::Cancelled { collected: 0, terminated: 2, .. }
            ),
            "{:?}",
            outcome
        );

        // A surviving child would have touched the marker by now.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }
}
