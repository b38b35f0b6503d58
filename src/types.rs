use crate::error::DiagnosticsError;
use crate::linalg::faer_ndarray::symmetric_eigen;
use crate::linalg::utils::symmetrize;
use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which kind of matrix a diagnostic report was computed from.
///
/// Small eigenvalues mean different things for the two: a near-singular
/// covariance has to be inverted to say anything about curvature, while a
/// Hessian shows flat or wrong-signed curvature directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatrixSource {
    Covariance,
    Hessian,
}

impl fmt::Display for MatrixSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatrixSource::Covariance => write!(f, "covariance matrix"),
            MatrixSource::Hessian => write!(f, "Hessian"),
        }
    }
}

/// Square matrix with one parameter label per row/column.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledMatrix {
    matrix: Array2<f64>,
    labels: Vec<String>,
}

impl LabeledMatrix {
    pub fn new<I, S>(matrix: Array2<f64>, labels: I) -> Result<Self, DiagnosticsError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let labels: Vec<String> = labels.into_iter().map(Into::into).collect();
        let (rows, cols) = matrix.dim();
        if rows != cols {
            return Err(DiagnosticsError::InvalidInput(format!(
                "matrix must be square, got {rows}x{cols}"
            )));
        }
        if rows == 0 {
            return Err(DiagnosticsError::InvalidInput(
                "matrix must have at least one parameter".to_string(),
            ));
        }
        if labels.len() != rows {
            return Err(DiagnosticsError::InvalidInput(format!(
                "expected {rows} parameter labels, got {}",
                labels.len()
            )));
        }
        Ok(Self { matrix, labels })
    }

    /// Same labels, different matrix (e.g. a Hessian standing in for a covariance).
    pub fn with_matrix(&self, matrix: Array2<f64>) -> Result<Self, DiagnosticsError> {
        Self::new(matrix, self.labels.iter().cloned())
    }

    pub fn matrix(&self) -> &Array2<f64> {
        &self.matrix
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn dim(&self) -> usize {
        self.labels.len()
    }

    pub fn is_finite(&self) -> bool {
        self.matrix.iter().all(|v| v.is_finite())
    }

    pub fn eigen(&self, label: &str) -> Result<EigenDecomposition, DiagnosticsError> {
        EigenDecomposition::of_symmetric(&self.matrix, label)
    }
}

/// Eigenpairs sorted by descending eigenvalue; `vectors` holds one eigenvector per column.
///
/// Each eigenvector is oriented so that its largest-magnitude component is
/// positive, which keeps reported loadings stable across solver versions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EigenDecomposition {
    pub values: Array1<f64>,
    pub vectors: Array2<f64>,
}

impl EigenDecomposition {
    pub fn of_symmetric(matrix: &Array2<f64>, label: &str) -> Result<Self, DiagnosticsError> {
        if !matrix.iter().all(|v| v.is_finite()) {
            return Err(DiagnosticsError::Numerical(format!(
                "{label} contains non-finite entries"
            )));
        }
        let sym = symmetrize(matrix, label);
        let (values, vectors) = symmetric_eigen(&sym)?;

        let n = values.len();
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| values[b].total_cmp(&values[a]));

        let mut sorted_values = Array1::<f64>::zeros(n);
        let mut sorted_vectors = Array2::<f64>::zeros((n, n));
        for (dst, &src) in order.iter().enumerate() {
            sorted_values[dst] = values[src];
            let column = vectors.column(src);
            let pivot = column
                .iter()
                .copied()
                .fold(0.0f64, |best, v| if v.abs() > best.abs() { v } else { best });
            let sign = if pivot < 0.0 { -1.0 } else { 1.0 };
            sorted_vectors
                .column_mut(dst)
                .assign(&column.mapv(|v| sign * v));
        }
        Ok(Self {
            values: sorted_values,
            vectors: sorted_vectors,
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn vector(&self, index: usize) -> ArrayView1<'_, f64> {
        self.vectors.column(index)
    }

    pub fn max_eigenvalue(&self) -> f64 {
        self.values.iter().next().copied().unwrap_or(f64::NAN)
    }

    pub fn min_eigenvalue(&self) -> f64 {
        self.values.iter().next_back().copied().unwrap_or(f64::NAN)
    }

    /// Spectral condition number max|λ| / min|λ|; infinite for a singular matrix.
    pub fn condition_number(&self) -> f64 {
        let (min_abs, max_abs) = self
            .values
            .iter()
            .fold((f64::INFINITY, 0.0f64), |(lo, hi), &v| {
                (lo.min(v.abs()), hi.max(v.abs()))
            });
        if min_abs == 0.0 {
            f64::INFINITY
        } else {
            max_abs / min_abs
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn label_count_must_match_dimension() {
        let err = LabeledMatrix::new(Array2::<f64>::eye(3), ["a", "b"]).unwrap_err();
        assert!(matches!(err, DiagnosticsError::InvalidInput(_)));
    }

    #[test]
    fn non_square_matrix_is_rejected() {
        let err = LabeledMatrix::new(Array2::<f64>::zeros((2, 3)), ["a", "b"]).unwrap_err();
        assert!(matches!(err, DiagnosticsError::InvalidInput(_)));
    }

    #[test]
    fn empty_matrix_is_rejected() {
        let labels: Vec<String> = Vec::new();
        assert!(LabeledMatrix::new(Array2::<f64>::zeros((0, 0)), labels).is_err());
    }

    #[test]
    fn eigenvalues_are_sorted_descending() {
        let m = array![[1.0, 0.0, 0.0], [0.0, 5.0, 0.0], [0.0, 0.0, 3.0]];
        let eig = EigenDecomposition::of_symmetric(&m, "test").expect("eigen");
        assert_abs_diff_eq!(eig.values[0], 5.0, epsilon = 1e-12);
        assert_abs_diff_eq!(eig.values[1], 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(eig.values[2], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(eig.vector(0)[1], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(eig.vector(2)[0], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn dominant_component_is_oriented_positive() {
        let m = array![[2.0, -1.0], [-1.0, 2.0]];
        let eig = EigenDecomposition::of_symmetric(&m, "test").expect("eigen");
        for k in 0..eig.len() {
            let v = eig.vector(k);
            let dominant = v
                .iter()
                .copied()
                .fold(0.0f64, |best, x| if x.abs() > best.abs() { x } else { best });
            assert!(dominant > 0.0);
        }
    }

    #[test]
    fn condition_number_is_infinite_for_singular_matrix() {
        let m = array![[1.0, 0.0], [0.0, 0.0]];
        let eig = EigenDecomposition::of_symmetric(&m, "test").expect("eigen");
        assert!(eig.condition_number().is_infinite());

        let m = array![[4.0, 0.0], [0.0, -2.0]];
        let eig = EigenDecomposition::of_symmetric(&m, "test").expect("eigen");
        assert_abs_diff_eq!(eig.condition_number(), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn non_finite_matrix_cannot_be_decomposed() {
        let m = array![[1.0, f64::NAN], [f64::NAN, 1.0]];
        assert!(matches!(
            EigenDecomposition::of_symmetric(&m, "test"),
            Err(DiagnosticsError::Numerical(_))
        ));
    }
}
