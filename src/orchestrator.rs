// Copyright 2026 QuTraj Contributors
// SPDX-License-Identifier: Apache-2.0

//! End-to-end run lifecycle.
//!
//! [`McSolver::run`] walks a run through
//! `Building → Partitioned → Dispatched → Collecting → Reducing → Done`.
//! A cancellation signal observed while dispatching or collecting moves it
//! to `Cancelled` instead: outstanding workers are terminated, the result
//! channel is closed and [`RunOutcome::Cancelled`] is returned.
//!
//! Each worker drives its kernel call in a task of its own and reports
//! exactly one tagged message, success or failure, so collection never waits
//! on a worker that has already died. Terminating a worker drops its kernel
//! future; for [`ProcessKernel`](crate::kernel::ProcessKernel) that kills the
//! child process. An optional deadline bounds the wait for workers that
//! never report.

use std::fmt;
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::{AbortHandle, JoinError, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{Config, SolverOptions};
use crate::error::{Error, Result, WorkerError};
use crate::job::{self, JobDescriptor, McProblem};
use crate::kernel::{AbortFlag, TrajectoryKernel};
use crate::partition::Partition;
use crate::reduce::{reduce, AggregatedResult, PartialResult};
use crate::worker::{EncodedJob, WorkerUnit};

/// Lifecycle stage of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Building,
    Partitioned,
    Dispatched,
    Collecting,
    Reducing,
    Done,
    Cancelled,
}

impl Stage {
    /// Whether `next` is a legal successor of this stage.
    pub fn can_advance_to(self, next: Stage) -> bool {
        use Stage::*;
        matches!(
            (self, next),
            (Building, Partitioned)
                | (Partitioned, Dispatched)
                | (Dispatched, Collecting)
                | (Dispatched, Cancelled)
                | (Collecting, Reducing)
                | (Collecting, Cancelled)
                | (Reducing, Done)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Cancelled)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Building => "building",
            Stage::Partitioned => "partitioned",
            Stage::Dispatched => "dispatched",
            Stage::Collecting => "collecting",
            Stage::Reducing => "reducing",
            Stage::Done => "done",
            Stage::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

fn advance(stage: &mut Stage, next: Stage) {
    debug_assert!(stage.can_advance_to(next), "{} -> {}", stage, next);
    debug!(from = %stage, to = %next, "Run stage transition");
    *stage = next;
}

/// How a run ended, when it did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(AggregatedResult),
    /// Interrupted; partial data was discarded.
    Cancelled {
        /// Workers whose results had arrived.
        collected: usize,
        /// Workers terminated before reporting.
        terminated: usize,
        /// Stage in which the cancellation was observed.
        stage: Stage,
    },
}

impl RunOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RunOutcome::Cancelled { .. })
    }

    pub fn into_result(self) -> Option<AggregatedResult> {
        match self {
            RunOutcome::Completed(result) => Some(result),
            RunOutcome::Cancelled { .. } => None,
        }
    }
}

/// Create a linked cancellation handle and signal.
pub fn cancellation() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle(Arc::new(tx)), CancelSignal(Some(rx)))
}

/// Requests cancellation of a run. Cloneable.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<watch::Sender<bool>>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }
}

/// Receiving side of [`cancellation`].
#[derive(Debug)]
pub struct CancelSignal(Option<watch::Receiver<bool>>);

impl CancelSignal {
    /// A signal that never fires.
    pub fn none() -> Self {
        Self(None)
    }

    /// Whether cancellation has already been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once cancellation is requested. Never resolves if every
    /// handle is dropped without cancelling.
    pub async fn cancelled(&mut self) {
        let Some(rx) = self.0.as_mut() else {
            return pending().await;
        };
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return pending().await;
            }
        }
    }
}

type WorkerMessage = (usize, std::result::Result<PartialResult, WorkerError>);

/// Why collection stopped before every worker reported.
enum Interrupt {
    Cancelled,
    Failed(Error),
}

/// Aborts the wrapped task when dropped, so terminating a worker task also
/// drops the kernel call it drives.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Monte Carlo solver driving a trajectory kernel.
pub struct McSolver<K: TrajectoryKernel + ?Sized> {
    kernel: Arc<K>,
    options: SolverOptions,
    worker_timeout: Option<Duration>,
    available_cpus: usize,
}

impl<K: TrajectoryKernel + ?Sized> McSolver<K> {
    /// Create a solver; fails if `config` does not validate.
    pub fn new(kernel: Arc<K>, config: &Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            kernel,
            options: config.solver.clone(),
            worker_timeout: config.runtime.worker_timeout(),
            available_cpus: job::available_cpus(),
        })
    }

    /// Override the collection deadline from the configuration.
    pub fn with_worker_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.worker_timeout = timeout;
        self
    }

    pub fn options(&self) -> &SolverOptions {
        &self.options
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    /// Run a simulation, cancelling when Ctrl+C is received.
    pub async fn run_until_ctrl_c(&self, problem: McProblem) -> Result<RunOutcome> {
        let (handle, signal) = cancellation();
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Received Ctrl+C, cancelling run");
                handle.cancel();
            }
        });
        let outcome = self.run(problem, signal).await;
        watcher.abort();
        outcome
    }

    /// Run a simulation to completion, failure or cancellation.
    pub async fn run(&self, problem: McProblem, mut cancel: CancelSignal) -> Result<RunOutcome> {
        let mut stage = Stage::Building;
        debug!(stage = %stage, kernel = self.kernel.name(), "Starting run");

        let job = Arc::new(JobDescriptor::build(problem, &self.options, self.available_cpus)?);
        let encoded = Arc::new(EncodedJob::new(&job)?);

        let partition = Partition::new(job.ntraj(), job.num_workers())?;
        advance(&mut stage, Stage::Partitioned);
        info!(
            num_cpus = job.num_workers(),
            workers = partition.len(),
            ntraj = job.ntraj(),
            shares = ?partition.counts(),
            mode = ?job.mode(),
            method = %job.ode().method,
            "Partitioned trajectories"
        );

        let abort = AbortFlag::new();
        let (tx, mut rx) = mpsc::channel::<WorkerMessage>(partition.len());
        let mut tasks = JoinSet::new();

        for share in partition.shares() {
            let unit = WorkerUnit::new(*share);
            let job = Arc::clone(&job);
            let encoded = Arc::clone(&encoded);
            let kernel = Arc::clone(&self.kernel);
            let abort = abort.clone();
            let tx = tx.clone();

            tasks.spawn(async move {
                let worker = unit.index();
                let call = tokio::spawn(async move {
                    unit.run(&job, &encoded, kernel.as_ref(), abort).await
                });
                let _call_guard = AbortOnDrop(call.abort_handle());
                let result = match call.await {
                    Ok(result) => result,
                    Err(e) => Err(WorkerError::Panicked {
                        worker,
                        message: join_error_message(e),
                    }),
                };
                // The receiver is gone once the run stopped collecting.
                let _ = tx.send((worker, result)).await;
            });
        }
        drop(tx);
        advance(&mut stage, Stage::Dispatched);

        let mut slots: Vec<Option<PartialResult>> = (0..partition.len()).map(|_| None).collect();
        let mut received = 0;
        let started = Instant::now();
        let deadline = self.worker_timeout.map(|timeout| started + timeout);

        let interrupt = if cancel.is_cancelled() {
            Some(Interrupt::Cancelled)
        } else {
            advance(&mut stage, Stage::Collecting);
            loop {
                if received == partition.len() {
                    break None;
                }

                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => break Some(Interrupt::Cancelled),

                    message = rx.recv() => match message {
                        Some((worker, Ok(partial))) => {
                            let Some(pos) = partition.position(worker) else {
                                break Some(Interrupt::Failed(Error::Reduce(format!(
                                    "result from unknown worker {}",
                                    worker
                                ))));
                            };
                            if slots[pos].replace(partial).is_some() {
                                break Some(Interrupt::Failed(Error::Reduce(format!(
                                    "worker {} reported twice",
                                    worker
                                ))));
                            }
                            received += 1;
                            debug!(worker, received, total = partition.len(), "Collected partial result");
                        }
                        Some((_, Err(e))) => break Some(Interrupt::Failed(Error::Worker(e))),
                        None => {
                            let worker = first_pending(&partition, &slots).unwrap_or(0);
                            break Some(Interrupt::Failed(Error::Worker(WorkerError::Lost { worker })));
                        }
                    },

                    _ = sleep_until(deadline) => {
                        break Some(Interrupt::Failed(Error::Worker(WorkerError::Timeout {
                            waited: started.elapsed(),
                            pending: pending_workers(&partition, &slots),
                        })));
                    }
                }
            }
        };

        if let Some(interrupt) = interrupt {
            terminate(&abort, &mut tasks, rx).await;
            match interrupt {
                Interrupt::Cancelled => {
                    let observed = stage;
                    advance(&mut stage, Stage::Cancelled);
                    let terminated = partition.len() - received;
                    warn!(collected = received, terminated, stage = %observed, "Run cancelled");
                    return Ok(RunOutcome::Cancelled {
                        collected: received,
                        terminated,
                        stage: observed,
                    });
                }
                Interrupt::Failed(e) => {
                    error!(error = %e, stage = %stage, "Run failed");
                    return Err(e);
                }
            }
        }

        advance(&mut stage, Stage::Reducing);
        let partials = slots
            .into_iter()
            .map(|slot| slot.ok_or_else(|| Error::Reduce("missing partial result".into())))
            .collect::<Result<Vec<_>>>()?;
        let payload = reduce(job.mode(), &partition, partials)?;
        let result = AggregatedResult::new(&job, payload);

        advance(&mut stage, Stage::Done);
        info!(
            ntraj = result.ntraj,
            workers = partition.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Run completed"
        );
        Ok(RunOutcome::Completed(result))
    }
}

/// Stop every outstanding worker and wait for their tasks to unwind.
async fn terminate(abort: &AbortFlag, tasks: &mut JoinSet<()>, mut rx: mpsc::Receiver<WorkerMessage>) {
    abort.raise();
    tasks.abort_all();
    rx.close();
    drop(rx);
    while tasks.join_next().await.is_some() {}
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => pending().await,
    }
}

fn pending_workers(partition: &Partition, slots: &[Option<PartialResult>]) -> Vec<usize> {
    partition
        .shares()
        .iter()
        .zip(slots)
        .filter(|(_, slot)| slot.is_none())
        .map(|(share, _)| share.worker)
        .collect()
}

fn first_pending(partition: &Partition, slots: &[Option<PartialResult>]) -> Option<usize> {
    pending_workers(partition, slots).first().copied()
}

fn join_error_message(e: JoinError) -> String {
    if !e.is_panic() {
        return e.to_string();
    }
    let payload = e.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
