// Copyright 2026 QuTraj Contributors
// SPDX-License-Identifier: Apache-2.0

//! Opaque operator values handed to the engine.

use ndarray::{Array1, Array2};
use num_complex::Complex64;

use super::csr::CsrMatrix;

/// Tensor-structure tag, e.g. `[[2, 2], [1, 1]]` for a two-qubit ket.
///
/// The engine never interprets it; it is copied onto every decoded state.
pub type Dims = Vec<Vec<usize>>;

/// Storage of an operator's matrix.
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorData {
    /// Compressed-row storage
    Compressed(CsrMatrix),
    /// Dense storage
    Dense(Array2<Complex64>),
}

/// A matrix plus its shape tag.
#[derive(Debug, Clone, PartialEq)]
pub struct Operator {
    data: OperatorData,
    dims: Dims,
}

impl Operator {
    pub fn new(data: OperatorData, dims: Dims) -> Self {
        Self { data, dims }
    }

    /// Compressed operator with flat dims `[[rows], [cols]]`.
    pub fn from_csr(m: CsrMatrix) -> Self {
        let (rows, cols) = m.shape();
        Self::new(OperatorData::Compressed(m), vec![vec![rows], vec![cols]])
    }

    /// Dense operator with flat dims `[[rows], [cols]]`.
    pub fn from_dense(m: Array2<Complex64>) -> Self {
        let (rows, cols) = m.dim();
        Self::new(OperatorData::Dense(m), vec![vec![rows], vec![cols]])
    }

    /// Column vector from amplitudes.
    pub fn ket(amplitudes: Array1<Complex64>) -> Self {
        let n = amplitudes.len();
        let column = Array2::from_shape_fn((n, 1), |(i, _)| amplitudes[i]);
        Self::new(OperatorData::Dense(column), vec![vec![n], vec![1]])
    }

    pub fn with_dims(mut self, dims: Dims) -> Self {
        self.dims = dims;
        self
    }

    pub fn data(&self) -> &OperatorData {
        &self.data
    }

    pub fn dims(&self) -> &Dims {
        &self.dims
    }

    pub fn shape(&self) -> (usize, usize) {
        match &self.data {
            OperatorData::Compressed(m) => m.shape(),
            OperatorData::Dense(m) => m.dim(),
        }
    }

    /// True for a single-column operator.
    pub fn is_ket(&self) -> bool {
        self.shape().1 == 1
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self.data, OperatorData::Compressed(_))
    }

    /// Borrow the compressed matrix, if that is how the operator is stored.
    pub fn as_csr(&self) -> Option<&CsrMatrix> {
        match &self.data {
            OperatorData::Compressed(m) => Some(m),
            OperatorData::Dense(_) => None,
        }
    }

    /// Copy converted to compressed-row storage.
    pub fn to_compressed(&self) -> Self {
        match &self.data {
            OperatorData::Compressed(_) => self.clone(),
            OperatorData::Dense(m) => Self::new(
                OperatorData::Compressed(CsrMatrix::from_dense(m)),
                self.dims.clone(),
            ),
        }
    }

    pub fn to_dense(&self) -> Array2<Complex64> {
        match &self.data {
            OperatorData::Compressed(m) => m.to_dense(),
            OperatorData::Dense(m) => m.clone(),
        }
    }
}
