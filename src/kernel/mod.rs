// Copyright 2026 QuTraj Contributors
// SPDX-License-Identifier: Apache-2.0

//! Trajectory kernels.
//!
//! This module provides the [`TrajectoryKernel`] trait, the boundary between
//! the engine and the numerical integrator, and its implementations:
//!
//! - [`ProcessKernel`]: runs each call in a child process speaking JSON over
//!   stdin/stdout, killed when the call is dropped
//! - `qutraj::QutrajKernel`: the f2py `qutraj_run` module driven through an
//!   embedded Python interpreter (requires `python` feature)

pub mod process;
#[cfg(feature = "python")]
pub mod qutraj;
pub mod r#trait;

pub use process::ProcessKernel;
pub use r#trait::{AbortFlag, KernelConfig, KernelInput, KernelOutput, TrajectoryKernel};
