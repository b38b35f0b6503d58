//! Glue between the ndarray matrices used at the API and faer's dense solvers.
//!
//! Diagnostic matrices are parameter-by-parameter, so inputs are copied into
//! owned faer matrices instead of borrowed through raw strides.

use faer::linalg::solvers::{self, Ldlt, Llt, Solve};
use faer::{Mat, MatRef, Side};
use ndarray::{Array1, Array2};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FaerLinalgError {
    #[error("Self-adjoint eigendecomposition failed: {0:?}")]
    SelfAdjointEigen(solvers::EvdError),
    #[error("LDLT factorization failed: {0:?}")]
    Ldlt(solvers::LdltError),
}

pub(crate) fn to_faer(matrix: &Array2<f64>) -> Mat<f64> {
    Mat::from_fn(matrix.nrows(), matrix.ncols(), |i, j| matrix[[i, j]])
}

pub(crate) fn from_faer(matrix: MatRef<'_, f64>) -> Array2<f64> {
    Array2::from_shape_fn((matrix.nrows(), matrix.ncols()), |(i, j)| matrix[(i, j)])
}

/// Factor of a symmetric matrix read from its lower triangle.
pub(crate) enum SymmetricFactor {
    Cholesky(Llt<f64>),
    Pivoted(Ldlt<f64>),
}

impl SymmetricFactor {
    /// Cholesky when positive definite, otherwise LDLT.
    pub(crate) fn new(matrix: MatRef<'_, f64>) -> Result<Self, FaerLinalgError> {
        match Llt::new(matrix, Side::Lower) {
            Ok(llt) => Ok(Self::Cholesky(llt)),
            Err(_) => Ldlt::new(matrix, Side::Lower)
                .map(Self::Pivoted)
                .map_err(FaerLinalgError::Ldlt),
        }
    }

    pub(crate) fn is_positive_definite(&self) -> bool {
        matches!(self, Self::Cholesky(_))
    }

    /// Solves against the identity; entries may be non-finite for singular input.
    pub(crate) fn inverse(&self, dim: usize) -> Array2<f64> {
        let mut inv = Mat::<f64>::identity(dim, dim);
        match self {
            Self::Cholesky(f) => f.solve_in_place(inv.as_mut()),
            Self::Pivoted(f) => f.solve_in_place(inv.as_mut()),
        }
        from_faer(inv.as_ref())
    }
}

/// Eigenpairs of a symmetric matrix from its lower triangle, in faer's
/// ascending order; eigenvectors are columns.
pub fn symmetric_eigen(
    matrix: &Array2<f64>,
) -> Result<(Array1<f64>, Array2<f64>), FaerLinalgError> {
    let evd = to_faer(matrix)
        .as_ref()
        .self_adjoint_eigen(Side::Lower)
        .map_err(FaerLinalgError::SelfAdjointEigen)?;
    let values = evd.S().column_vector().as_mat();
    Ok((
        Array1::from_shape_fn(values.nrows(), |i| values[(i, 0)]),
        from_faer(evd.U()),
    ))
}
