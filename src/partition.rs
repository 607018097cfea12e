// Copyright 2026 QuTraj Contributors
// SPDX-License-Identifier: Apache-2.0

//! Splitting a trajectory count across workers.

use crate::error::{Result, ValidationError};

/// One worker's assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Share {
    /// Worker index, also used as the kernel instance id.
    pub worker: usize,
    /// Trajectories this worker runs.
    pub ntraj: usize,
}

/// Ordered assignment of trajectories to workers.
///
/// Shares sum to the requested total and none is zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    shares: Vec<Share>,
    total: usize,
    requested_workers: usize,
}

impl Partition {
    /// Split `ntraj` trajectories over at most `workers` workers.
    ///
    /// Every worker gets `ntraj / workers`; the remainder is handed out one
    /// at a time starting from worker 0. Workers left with nothing are
    /// dropped, so `workers > ntraj` yields `ntraj` shares of 1.
    pub fn new(ntraj: usize, workers: usize) -> Result<Self> {
        if ntraj == 0 {
            return Err(ValidationError::Field {
                field: "ntraj".into(),
                message: "must be greater than 0".into(),
            }
            .into());
        }
        if workers == 0 {
            return Err(ValidationError::Field {
                field: "num_cpus".into(),
                message: "worker count must be greater than 0".into(),
            }
            .into());
        }

        let base = ntraj / workers;
        let mut counts = vec![base; workers];
        let mut assigned = base * workers;
        let mut i = 0;
        while assigned < ntraj {
            counts[i] += 1;
            assigned += 1;
            i += 1;
        }

        let shares = counts
            .into_iter()
            .enumerate()
            .filter(|&(_, n)| n > 0)
            .map(|(worker, ntraj)| Share { worker, ntraj })
            .collect();

        Ok(Self {
            shares,
            total: ntraj,
            requested_workers: workers,
        })
    }

    pub fn shares(&self) -> &[Share] {
        &self.shares
    }

    /// Number of workers actually dispatched.
    pub fn len(&self) -> usize {
        self.shares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shares.is_empty()
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn requested_workers(&self) -> usize {
        self.requested_workers
    }

    /// Position of a worker in partition order.
    pub fn position(&self, worker: usize) -> Option<usize> {
        self.shares.iter().position(|s| s.worker == worker)
    }

    /// Share counts in partition order.
    pub fn counts(&self) -> Vec<usize> {
        self.shares.iter().map(|s| s.ntraj).collect()
    }
}
