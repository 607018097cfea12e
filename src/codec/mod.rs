// Copyright 2026 QuTraj Contributors
// SPDX-License-Identifier: Apache-2.0

//! Sparse codec between engine operators and the trajectory kernel.
//!
//! Operators live in the engine as [`Operator`] values: a matrix in either
//! compressed-row or dense storage plus the `dims` shape tag that is carried
//! through unchanged. The kernel consumes [`SparseEncoding`] values, which
//! differ from the engine's [`CsrMatrix`] in two ways:
//!
//! - column indices and row pointers are 1-based,
//! - values are single-precision complex (the kernel's working precision).
//!
//! Both quirks are confined to [`encode`]; everything outside this module
//! works with 0-based indices and `Complex64`.

pub mod csr;
pub mod encode;
pub mod operator;

pub use csr::CsrMatrix;
pub use encode::{
    decode_sparse, encode, encode_csr, encode_effective_hamiltonian, encode_state,
    encode_times, SparseEncoding,
};
pub use operator::{Dims, Operator, OperatorData};
