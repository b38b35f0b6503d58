use crate::linalg::faer_ndarray::{SymmetricFactor, to_faer};
use ndarray::Array2;

const ASYMMETRY_WARN_TOL: f64 = 1e-8;

/// Largest |a_ij - a_ji| relative to the largest entry magnitude (at least 1).
pub(crate) fn relative_asymmetry(matrix: &Array2<f64>) -> f64 {
    let n = matrix.nrows();
    let scale = matrix
        .iter()
        .fold(0.0f64, |acc, &x| acc.max(x.abs()))
        .max(1.0);
    let mut worst = 0.0f64;
    for i in 0..n {
        for j in i + 1..n {
            worst = worst.max((matrix[[i, j]] - matrix[[j, i]]).abs());
        }
    }
    worst / scale
}

fn average_with_transpose(matrix: &mut Array2<f64>) {
    let n = matrix.nrows();
    for i in 0..n {
        for j in (i + 1)..n {
            let avg = 0.5 * (matrix[[i, j]] + matrix[[j, i]]);
            matrix[[i, j]] = avg;
            matrix[[j, i]] = avg;
        }
    }
}

/// Average a square matrix with its transpose.
///
/// Numerical Jacobians and externally estimated covariances are rarely exactly
/// symmetric; the eigensolver only reads one triangle, so both triangles are
/// folded together first.
pub(crate) fn symmetrize(matrix: &Array2<f64>, label: &str) -> Array2<f64> {
    let asymmetry = relative_asymmetry(matrix);
    if asymmetry > ASYMMETRY_WARN_TOL {
        log::warn!(
            "{} is not symmetric (relative asymmetry {:.3e}); using (A + A^T) / 2",
            label,
            asymmetry
        );
    }
    let mut out = matrix.clone();
    average_with_transpose(&mut out);
    out
}

/// Inverse of a symmetric matrix via LLT, falling back to LDLT.
///
/// Returns `None` when neither factorization succeeds or the solve produces
/// non-finite entries; callers treat that as a singular matrix.
pub(crate) fn symmetric_inverse(matrix: &Array2<f64>, label: &str) -> Option<Array2<f64>> {
    let p = matrix.nrows();
    if p == 0 || matrix.ncols() != p {
        return None;
    }

    let factor = match SymmetricFactor::new(to_faer(matrix).as_ref()) {
        Ok(factor) => factor,
        Err(err) => {
            log::debug!("Failed to factorize {} for inversion: {}", label, err);
            return None;
        }
    };
    if !factor.is_positive_definite() {
        log::debug!("{} is not positive definite; inverted through LDLT", label);
    }

    let mut inv = factor.inverse(p);

    if !inv.iter().all(|v| v.is_finite()) {
        log::debug!("Inverse of {} has non-finite entries", label);
        return None;
    }

    // Solves leave tiny asymmetry.
    average_with_transpose(&mut inv);
    Some(inv)
}
