// Copyright 2026 QuTraj Contributors
// SPDX-License-Identifier: Apache-2.0

//! Compressed sparse row matrices (0-based).

use ndarray::Array2;
use num_complex::Complex64;

use crate::error::CodecError;

/// A complex matrix in compressed-row storage.
///
/// Column indices inside each row are kept sorted; [`CsrMatrix::new`]
/// canonicalises unsorted input.
#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix {
    rows: usize,
    cols: usize,
    data: Vec<Complex64>,
    indices: Vec<usize>,
    indptr: Vec<usize>,
}

impl CsrMatrix {
    /// Build a matrix from raw compressed-row arrays.
    pub fn new(
        rows: usize,
        cols: usize,
        data: Vec<Complex64>,
        indices: Vec<usize>,
        indptr: Vec<usize>,
    ) -> Result<Self, CodecError> {
        if indptr.len() != rows + 1 {
            return Err(CodecError::Malformed(format!(
                "row pointer length {} does not match {} rows",
                indptr.len(),
                rows
            )));
        }
        if indptr[0] != 0 {
            return Err(CodecError::Malformed(format!(
                "first row pointer must be 0, got {}",
                indptr[0]
            )));
        }
        if indptr.windows(2).any(|w| w[0] > w[1]) {
            return Err(CodecError::Malformed(
                "row pointers must be non-decreasing".into(),
            ));
        }
        if data.len() != indices.len() || indptr[rows] != data.len() {
            return Err(CodecError::Malformed(format!(
                "{} values and {} column indices for {} stored entries",
                data.len(),
                indices.len(),
                indptr[rows]
            )));
        }
        if let Some(&j) = indices.iter().find(|&&j| j >= cols) {
            return Err(CodecError::Malformed(format!(
                "column index {} out of range for {} columns",
                j, cols
            )));
        }

        let mut m = Self {
            rows,
            cols,
            data,
            indices,
            indptr,
        };
        m.sort_rows();
        Ok(m)
    }

    /// All-zero matrix.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: Vec::new(),
            indices: Vec::new(),
            indptr: vec![0; rows + 1],
        }
    }

    /// Compress a dense matrix, dropping exact zeros.
    pub fn from_dense(dense: &Array2<Complex64>) -> Self {
        let (rows, cols) = dense.dim();
        let mut data = Vec::new();
        let mut indices = Vec::new();
        let mut indptr = Vec::with_capacity(rows + 1);
        indptr.push(0);

        for row in dense.rows() {
            for (j, &z) in row.iter().enumerate() {
                if z != Complex64::new(0.0, 0.0) {
                    data.push(z);
                    indices.push(j);
                }
            }
            indptr.push(data.len());
        }

        Self {
            rows,
            cols,
            data,
            indices,
            indptr,
        }
    }

    /// Materialise as a dense matrix.
    pub fn to_dense(&self) -> Array2<Complex64> {
        let mut dense = Array2::zeros((self.rows, self.cols));
        for i in 0..self.rows {
            for p in self.indptr[i]..self.indptr[i + 1] {
                dense[[i, self.indices[p]]] += self.data[p];
            }
        }
        dense
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[Complex64] {
        &self.data
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn indptr(&self) -> &[usize] {
        &self.indptr
    }

    /// Conjugate transpose.
    pub fn adjoint(&self) -> Self {
        let nnz = self.nnz();
        let mut indptr = vec![0usize; self.cols + 1];
        for &j in &self.indices {
            indptr[j + 1] += 1;
        }
        for j in 0..self.cols {
            indptr[j + 1] += indptr[j];
        }

        let mut next = indptr.clone();
        let mut data = vec![Complex64::new(0.0, 0.0); nnz];
        let mut indices = vec![0usize; nnz];
        for i in 0..self.rows {
            for p in self.indptr[i]..self.indptr[i + 1] {
                let j = self.indices[p];
                let dest = next[j];
                data[dest] = self.data[p].conj();
                indices[dest] = i;
                next[j] += 1;
            }
        }

        Self {
            rows: self.cols,
            cols: self.rows,
            data,
            indices,
            indptr,
        }
    }

    /// Sparse product `self · rhs` (row-by-row accumulation).
    pub fn matmul(&self, rhs: &CsrMatrix) -> Result<Self, CodecError> {
        if self.cols != rhs.rows {
            return Err(CodecError::ShapeMismatch {
                expected: (self.cols, rhs.cols),
                actual: rhs.shape(),
            });
        }

        let zero = Complex64::new(0.0, 0.0);
        let mut acc = vec![zero; rhs.cols];
        let mut touched = vec![false; rhs.cols];
        let mut row_cols: Vec<usize> = Vec::new();

        let mut data = Vec::new();
        let mut indices = Vec::new();
        let mut indptr = Vec::with_capacity(self.rows + 1);
        indptr.push(0);

        for i in 0..self.rows {
            for p in self.indptr[i]..self.indptr[i + 1] {
                let k = self.indices[p];
                let a = self.data[p];
                for q in rhs.indptr[k]..rhs.indptr[k + 1] {
                    let j = rhs.indices[q];
                    if !touched[j] {
                        touched[j] = true;
                        row_cols.push(j);
                    }
                    acc[j] += a * rhs.data[q];
                }
            }

            row_cols.sort_unstable();
            for &j in &row_cols {
                data.push(acc[j]);
                indices.push(j);
                acc[j] = zero;
                touched[j] = false;
            }
            row_cols.clear();
            indptr.push(data.len());
        }

        Ok(Self {
            rows: self.rows,
            cols: rhs.cols,
            data,
            indices,
            indptr,
        })
    }

    /// `self + alpha · rhs`, merging the sorted rows of both operands.
    pub fn add_scaled(&self, rhs: &CsrMatrix, alpha: Complex64) -> Result<Self, CodecError> {
        if self.shape() != rhs.shape() {
            return Err(CodecError::ShapeMismatch {
                expected: self.shape(),
                actual: rhs.shape(),
            });
        }

        let mut data = Vec::with_capacity(self.nnz() + rhs.nnz());
        let mut indices = Vec::with_capacity(self.nnz() + rhs.nnz());
        let mut indptr = Vec::with_capacity(self.rows + 1);
        indptr.push(0);

        for i in 0..self.rows {
            let (mut p, p_end) = (self.indptr[i], self.indptr[i + 1]);
            let (mut q, q_end) = (rhs.indptr[i], rhs.indptr[i + 1]);
            while p < p_end || q < q_end {
                let jp = if p < p_end { self.indices[p] } else { usize::MAX };
                let jq = if q < q_end { rhs.indices[q] } else { usize::MAX };
                if jp < jq {
                    data.push(self.data[p]);
                    indices.push(jp);
                    p += 1;
                } else if jq < jp {
                    data.push(alpha * rhs.data[q]);
                    indices.push(jq);
                    q += 1;
                } else {
                    data.push(self.data[p] + alpha * rhs.data[q]);
                    indices.push(jp);
                    p += 1;
                    q += 1;
                }
            }
            indptr.push(data.len());
        }

        Ok(Self {
            rows: self.rows,
            cols: self.cols,
            data,
            indices,
            indptr,
        })
    }

    fn sort_rows(&mut self) {
        for i in 0..self.rows {
            let (start, end) = (self.indptr[i], self.indptr[i + 1]);
            if self.indices[start..end].windows(2).all(|w| w[0] <= w[1]) {
                continue;
            }
            let mut row: Vec<(usize, Complex64)> = self.indices[start..end]
                .iter()
                .copied()
                .zip(self.data[start..end].iter().copied())
                .collect();
            row.sort_by_key(|&(j, _)| j);
            for (offset, (j, z)) in row.into_iter().enumerate() {
                self.indices[start + offset] = j;
                self.data[start + offset] = z;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    fn sigma_minus() -> CsrMatrix {
        CsrMatrix::new(2, 2, vec![c(1.0, 0.0)], vec![1], vec![0, 1, 1]).unwrap()
    }

    #[test]
    fn test_from_dense_drops_zeros() {
        let dense = array![[c(0.0, 0.0), c(2.0, 1.0)], [c(3.0, 0.0), c(0.0, 0.0)]];
        let m = CsrMatrix::from_dense(&dense);
        assert_eq!(m.nnz(), 2);
        assert_eq!(m.indices(), &[1, 0]);
        assert_eq!(m.indptr(), &[0, 1, 2]);
        assert_eq!(m.to_dense(), dense);
    }

    #[test]
    fn test_new_sorts_rows() {
        let m = CsrMatrix::new(
            1,
            3,
            vec![c(3.0, 0.0), c(1.0, 0.0)],
            vec![2, 0],
            vec![0, 2],
        )
        .unwrap();
        assert_eq!(m.indices(), &[0, 2]);
        assert_eq!(m.data(), &[c(1.0, 0.0), c(3.0, 0.0)]);
    }

    #[test]
    fn test_new_rejects_malformed() {
        assert!(CsrMatrix::new(2, 2, vec![], vec![], vec![0]).is_err());
        assert!(CsrMatrix::new(1, 2, vec![c(1.0, 0.0)], vec![5], vec![0, 1]).is_err());
        assert!(CsrMatrix::new(2, 2, vec![c(1.0, 0.0)], vec![0], vec![0, 1, 0]).is_err());
        assert!(CsrMatrix::new(1, 2, vec![c(1.0, 0.0)], vec![0], vec![0, 2]).is_err());
    }

    #[test]
    fn test_adjoint() {
        let m = CsrMatrix::new(
            2,
            3,
            vec![c(1.0, 2.0), c(0.0, -1.0)],
            vec![2, 0],
            vec![0, 1, 2],
        )
        .unwrap();
        let dag = m.adjoint();
        assert_eq!(dag.shape(), (3, 2));
        let expected = m.to_dense().t().mapv(|z| z.conj());
        assert_eq!(dag.to_dense(), expected);
    }

    #[test]
    fn test_matmul_number_operator() {
        // σ⁺σ⁻ = |1⟩⟨1|
        let sm = sigma_minus();
        let n = sm.adjoint().matmul(&sm).unwrap();
        let dense = n.to_dense();
        assert_eq!(dense[[1, 1]], c(1.0, 0.0));
        assert_eq!(dense[[0, 0]], c(0.0, 0.0));
        assert_eq!(n.nnz(), 1);
    }

    #[test]
    fn test_matmul_matches_dense() {
        let a = array![[c(1.0, 1.0), c(0.0, 0.0)], [c(2.0, 0.0), c(0.0, 3.0)]];
        let b = array![[c(0.0, 0.0), c(1.0, 0.0)], [c(4.0, -1.0), c(0.0, 0.0)]];
        let product = CsrMatrix::from_dense(&a)
            .matmul(&CsrMatrix::from_dense(&b))
            .unwrap();
        assert_eq!(product.to_dense(), a.dot(&b));
    }

    #[test]
    fn test_matmul_shape_mismatch() {
        let a = CsrMatrix::zeros(2, 3);
        let b = CsrMatrix::zeros(2, 2);
        assert!(a.matmul(&b).is_err());
    }

    #[test]
    fn test_add_scaled() {
        let a = array![[c(1.0, 0.0), c(0.0, 0.0)], [c(0.0, 0.0), c(2.0, 0.0)]];
        let b = array![[c(0.0, 0.0), c(1.0, 0.0)], [c(0.0, 0.0), c(1.0, 0.0)]];
        let alpha = c(0.0, -0.5);
        let sum = CsrMatrix::from_dense(&a)
            .add_scaled(&CsrMatrix::from_dense(&b), alpha)
            .unwrap();
        assert_eq!(sum.to_dense(), &a + &b.mapv(|z| z * alpha));
        assert_eq!(sum.indices(), &[0, 1, 1]);
    }
}
