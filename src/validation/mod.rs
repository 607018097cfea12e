// Copyright 2026 QuTraj Contributors
// SPDX-License-Identifier: Apache-2.0

//! Input validation for simulation requests.

use ndarray::Array1;
use num_complex::Complex64;

use crate::codec::Operator;
use crate::error::{Result, ValidationError};

/// Check that the initial state is a ket and return its amplitudes.
pub fn validate_initial_state(psi0: &Operator) -> Result<Array1<Complex64>> {
    let (rows, cols) = psi0.shape();
    if !psi0.is_ket() {
        return Err(ValidationError::NotAKet { rows, cols }.into());
    }
    if rows == 0 {
        return Err(ValidationError::Field {
            field: "psi0".into(),
            message: "state vector is empty".into(),
        }
        .into());
    }

    let dense = psi0.to_dense();
    Ok(dense.column(0).to_owned())
}

/// Validate the time grid: non-empty, finite, strictly increasing.
pub fn validate_time_grid(times: &[f64]) -> Result<()> {
    if times.is_empty() {
        return Err(ValidationError::Field {
            field: "times".into(),
            message: "must contain at least one time".into(),
        }
        .into());
    }

    for (i, t) in times.iter().enumerate() {
        if !t.is_finite() {
            return Err(ValidationError::Field {
                field: "times".into(),
                message: format!("non-finite value {} at index {}", t, i),
            }
            .into());
        }
    }

    if let Some(i) = times.windows(2).position(|w| w[1] <= w[0]) {
        return Err(ValidationError::Field {
            field: "times".into(),
            message: format!(
                "must be strictly increasing, but times[{}] = {} follows {}",
                i + 1,
                times[i + 1],
                times[i]
            ),
        }
        .into());
    }

    Ok(())
}

/// Validate the requested trajectory count.
pub fn validate_trajectory_count(ntraj: usize) -> Result<()> {
    if ntraj == 0 {
        return Err(ValidationError::Field {
            field: "ntraj".into(),
            message: "must be greater than 0".into(),
        }
        .into());
    }
    Ok(())
}

/// Check that an operator acts on a space of dimension `dim`.
pub fn validate_operator_shape(name: &str, op: &Operator, dim: usize) -> Result<()> {
    let shape = op.shape();
    if shape != (dim, dim) {
        return Err(ValidationError::DimensionMismatch {
            operator: name.to_string(),
            expected: dim,
            actual: shape,
        }
        .into());
    }
    Ok(())
}
