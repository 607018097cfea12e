// Copyright 2026 QuTraj Contributors
// SPDX-License-Identifier: Apache-2.0

//! Conversion to and from the kernel's wire representation.

use ndarray::{Array1, Array2};
use num_complex::{Complex32, Complex64};
use serde::{Deserialize, Serialize};

use super::csr::CsrMatrix;
use super::operator::Operator;
use crate::error::CodecError;

/// Compressed-row encoding in the kernel's convention.
///
/// Invariant: `values.len() == col_idx.len() == row_ptr[rows] - 1` and
/// `row_ptr` is non-decreasing, starting at 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseEncoding {
    pub values: Vec<Complex32>,
    pub col_idx: Vec<i32>,
    pub row_ptr: Vec<i32>,
    pub rows: usize,
    pub cols: usize,
}

impl SparseEncoding {
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Undo the index shift, returning a 0-based matrix.
    pub fn decode_csr(&self) -> Result<CsrMatrix, CodecError> {
        let indices = shift_down(&self.col_idx, "column index")?;
        let indptr = shift_down(&self.row_ptr, "row pointer")?;
        let data = self.values.iter().map(|&z| upcast(z)).collect();
        CsrMatrix::new(self.rows, self.cols, data, indices, indptr)
    }
}

/// Encode a compressed operator.
///
/// Dense storage is rejected: callers convert with
/// [`Operator::to_compressed`] first.
pub fn encode(op: &Operator) -> Result<SparseEncoding, CodecError> {
    op.as_csr().ok_or(CodecError::NotCompressed).and_then(encode_csr)
}

/// Encode a 0-based matrix, shifting indices to 1-based and narrowing values.
///
/// Fails if a shifted index does not fit the kernel's 32-bit integers.
pub fn encode_csr(m: &CsrMatrix) -> Result<SparseEncoding, CodecError> {
    let (rows, cols) = m.shape();
    Ok(SparseEncoding {
        values: m.data().iter().map(|&z| downcast(z)).collect(),
        col_idx: shift_up(m.indices(), "column index")?,
        row_ptr: shift_up(m.indptr(), "row pointer")?,
        rows,
        cols,
    })
}

/// Build and encode `H_eff = H − (i/2) Σ_k c_k† c_k`.
pub fn encode_effective_hamiltonian(
    hamiltonian: &Operator,
    collapse_ops: &[Operator],
) -> Result<SparseEncoding, CodecError> {
    let h = hamiltonian.as_csr().ok_or(CodecError::NotCompressed)?;
    let damping = Complex64::new(0.0, -0.5);

    let mut h_eff = h.clone();
    for c_op in collapse_ops {
        let c = c_op.as_csr().ok_or(CodecError::NotCompressed)?;
        let c_dag_c = c.adjoint().matmul(c)?;
        h_eff = h_eff.add_scaled(&c_dag_c, damping)?;
    }

    encode_csr(&h_eff)
}

/// Time grid in the kernel's real precision.
pub fn encode_times(times: &[f64]) -> Vec<f64> {
    times.to_vec()
}

/// Dense state vector in the kernel's complex precision.
pub fn encode_state(psi: &Array1<Complex64>) -> Vec<Complex32> {
    psi.iter().map(|&z| downcast(z)).collect()
}

/// Materialise kernel CSR output (1-based) as a dense matrix.
pub fn decode_sparse(
    values: &[Complex32],
    col_idx: &[i32],
    row_ptr: &[i32],
    rows: usize,
    cols: usize,
) -> Result<Array2<Complex64>, CodecError> {
    let encoding = SparseEncoding {
        values: values.to_vec(),
        col_idx: col_idx.to_vec(),
        row_ptr: row_ptr.to_vec(),
        rows,
        cols,
    };
    Ok(encoding.decode_csr()?.to_dense())
}

pub(crate) fn downcast(z: Complex64) -> Complex32 {
    Complex32::new(z.re as f32, z.im as f32)
}

pub(crate) fn upcast(z: Complex32) -> Complex64 {
    Complex64::new(z.re as f64, z.im as f64)
}

fn shift_up(zero_based: &[usize], what: &str) -> Result<Vec<i32>, CodecError> {
    zero_based
        .iter()
        .map(|&v| {
            v.checked_add(1)
                .and_then(|v| i32::try_from(v).ok())
                .ok_or_else(|| {
                    CodecError::Malformed(format!("{} {} overflows a 32-bit index", what, v))
                })
        })
        .collect()
}

fn shift_down(one_based: &[i32], what: &str) -> Result<Vec<usize>, CodecError> {
    one_based
        .iter()
        .map(|&v| {
            if v < 1 {
                Err(CodecError::Malformed(format!(
                    "{} {} is not 1-based",
                    what, v
                )))
            } else {
                Ok((v - 1) as usize)
            }
        })
        .collect()
}
