//! Eigen-analysis of a fitted model's covariance matrix.
//!
//! A covariance matrix with (near-)zero or negative eigenvalues means some
//! linear combination of parameters is not identified. Each such direction is
//! reported together with the parameters that load onto it, most problematic
//! direction first. When the covariance itself could not be estimated (it
//! contains non-finite entries) the same analysis runs on a Hessian obtained
//! from a caller-supplied fallback.

use crate::config::VcovOptions;
use crate::error::DiagnosticsError;
use crate::types::{EigenDecomposition, LabeledMatrix, MatrixSource};
use ndarray::Array2;
use serde::Serialize;
use std::fmt;

/// Lazily computes a Hessian when the covariance matrix is unusable.
pub type HessianFallback<'a> = dyn FnMut() -> Result<Array2<f64>, DiagnosticsError> + 'a;

/// One parameter's component in an eigenvector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Loading {
    pub label: String,
    pub value: f64,
}

/// An eigen-direction at or below tolerance and the parameters loading onto it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BadDirection {
    pub eigenvalue: f64,
    /// Ordered by descending |value| of the unrounded loading.
    pub loadings: Vec<Loading>,
}

impl BadDirection {
    pub fn dominant_label(&self) -> Option<&str> {
        self.loadings.first().map(|l| l.label.as_str())
    }

    pub fn loading(&self, label: &str) -> Option<f64> {
        self.loadings
            .iter()
            .find(|l| l.label == label)
            .map(|l| l.value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticReport {
    pub source: MatrixSource,
    pub tolerance: f64,
    /// Worst (smallest / most negative eigenvalue) first.
    pub directions: Vec<BadDirection>,
}

impl DiagnosticReport {
    pub fn is_empty(&self) -> bool {
        self.directions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.directions.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "report", rename_all = "snake_case")]
pub enum VcovDiagnosis {
    /// Every covariance eigenvalue is above tolerance.
    Ok,
    Problems(DiagnosticReport),
}

impl VcovDiagnosis {
    pub fn is_ok(&self) -> bool {
        matches!(self, VcovDiagnosis::Ok)
    }

    pub fn report(&self) -> Option<&DiagnosticReport> {
        match self {
            VcovDiagnosis::Ok => None,
            VcovDiagnosis::Problems(report) => Some(report),
        }
    }
}

pub(crate) fn round_to_digits(value: f64, digits: u32) -> f64 {
    let scale = 10f64.powi(digits as i32);
    let rounded = (value * scale).round() / scale;
    // Drop the sign of negative zero.
    if rounded == 0.0 { 0.0 } else { rounded }
}

fn sorted_loadings(
    labels: &[String],
    vector: ndarray::ArrayView1<'_, f64>,
    digits: u32,
) -> Vec<Loading> {
    let mut pairs: Vec<(usize, f64)> = vector.iter().copied().enumerate().collect();
    // Sort on the true magnitude; rounding afterwards can create ties.
    pairs.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()));
    pairs
        .into_iter()
        .map(|(idx, value)| Loading {
            label: labels[idx].clone(),
            value: round_to_digits(value, digits),
        })
        .collect()
}

fn bad_directions(
    labels: &[String],
    eigen: &EigenDecomposition,
    options: &VcovOptions,
    source: MatrixSource,
) -> DiagnosticReport {
    // Eigenvalues are descending, so walking backwards yields worst-first order.
    let directions = (0..eigen.len())
        .rev()
        .filter(|&k| eigen.values[k] <= options.tolerance)
        .map(|k| BadDirection {
            eigenvalue: eigen.values[k],
            loadings: sorted_loadings(labels, eigen.vector(k), options.digits),
        })
        .collect();
    DiagnosticReport {
        source,
        tolerance: options.tolerance,
        directions,
    }
}

/// Find covariance eigen-directions at or below `options.tolerance`.
///
/// A finite covariance with every eigenvalue above tolerance yields
/// [`VcovDiagnosis::Ok`]. A covariance with non-finite entries is analyzed
/// through `fallback` instead; the resulting report is tagged
/// [`MatrixSource::Hessian`] and returned even when it has no entries.
pub fn diagnose_vcov(
    vcov: &LabeledMatrix,
    options: &VcovOptions,
    fallback: Option<&mut HessianFallback<'_>>,
) -> Result<VcovDiagnosis, DiagnosticsError> {
    options.validate()?;

    if vcov.is_finite() {
        let eigen = vcov.eigen("covariance matrix")?;
        let report = bad_directions(vcov.labels(), &eigen, options, MatrixSource::Covariance);
        if report.is_empty() {
            log::debug!(
                "Covariance OK: smallest eigenvalue {:.3e} above tolerance {:.1e}",
                eigen.min_eigenvalue(),
                options.tolerance
            );
            return Ok(VcovDiagnosis::Ok);
        }
        log::warn!(
            "Covariance matrix has {} eigenvalue(s) at or below {:.1e}; worst is {:.3e}",
            report.len(),
            options.tolerance,
            report.directions[0].eigenvalue
        );
        return Ok(VcovDiagnosis::Problems(report));
    }

    let Some(fallback) = fallback else {
        return Err(DiagnosticsError::Configuration(
            "cannot analyze; no fallback supplied for a covariance matrix with non-finite entries"
                .to_string(),
        ));
    };
    log::warn!("Covariance matrix has non-finite entries; analyzing the fallback Hessian instead");

    let hessian = vcov.with_matrix(fallback()?).map_err(|err| match err {
        DiagnosticsError::InvalidInput(msg) => {
            DiagnosticsError::InvalidInput(format!("fallback Hessian: {msg}"))
        }
        other => other,
    })?;
    if !hessian.is_finite() {
        return Err(DiagnosticsError::Numerical(
            "fallback Hessian contains non-finite entries".to_string(),
        ));
    }
    let eigen = hessian.eigen("fallback Hessian")?;
    let report = bad_directions(hessian.labels(), &eigen, options, MatrixSource::Hessian);
    if !report.is_empty() {
        log::warn!(
            "Hessian has {} eigenvalue(s) at or below {:.1e}",
            report.len(),
            options.tolerance
        );
    }
    Ok(VcovDiagnosis::Problems(report))
}

impl fmt::Display for DiagnosticReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.directions.is_empty() {
            return write!(
                f,
                "{}: no eigenvalues at or below {:.1e}",
                self.source, self.tolerance
            );
        }
        writeln!(
            f,
            "{}: {} eigenvalue(s) at or below {:.1e}",
            self.source,
            self.directions.len(),
            self.tolerance
        )?;
        for (i, dir) in self.directions.iter().enumerate() {
            write!(f, "  [{}] eigenvalue {:.4e}:", i + 1, dir.eigenvalue)?;
            for loading in &dir.loadings {
                write!(f, " {}={}", loading.label, loading.value)?;
            }
            if i + 1 < self.directions.len() {
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for VcovDiagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VcovDiagnosis::Ok => write!(f, "covariance matrix OK"),
            VcovDiagnosis::Problems(report) => write!(f, "{report}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn labeled(matrix: Array2<f64>, labels: &[&str]) -> LabeledMatrix {
        LabeledMatrix::new(matrix, labels.iter().copied()).expect("valid labeled matrix")
    }

    #[test]
    fn rounding_keeps_requested_digits_and_drops_negative_zero() {
        assert_eq!(round_to_digits(0.123_456, 2), 0.12);
        assert_eq!(round_to_digits(-0.004, 2), 0.0);
        assert!(round_to_digits(-0.004, 2).is_sign_positive());
        assert_eq!(round_to_digits(0.707_106_78, 3), 0.707);
    }

    #[test]
    fn loadings_sort_on_unrounded_magnitude() {
        let labels: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        // b and c both round to 0.50 at two digits, but c is truly larger.
        let v = array![0.1, 0.501, -0.504];
        let loadings = sorted_loadings(&labels, v.view(), 2);
        let order: Vec<&str> = loadings.iter().map(|l| l.label.as_str()).collect();
        assert_eq!(order, vec!["c", "b", "a"]);
        assert_eq!(loadings[0].value, -0.5);
        assert_eq!(loadings[1].value, 0.5);
    }

    #[test]
    fn positive_definite_covariance_is_ok() {
        let m = labeled(array![[2.0, 0.3], [0.3, 1.0]], &["x", "y"]);
        let diagnosis = diagnose_vcov(&m, &VcovOptions::default(), None).expect("diagnosis");
        assert!(diagnosis.is_ok());
        assert!(diagnosis.report().is_none());
    }

    #[test]
    fn single_small_diagonal_entry_is_reported() {
        let m = labeled(
            array![[1.0, 0.0, 0.0], [0.0, 1e-8, 0.0], [0.0, 0.0, 2.0]],
            &["a", "b", "c"],
        );
        let diagnosis = diagnose_vcov(&m, &VcovOptions::default(), None).expect("diagnosis");
        let report = diagnosis.report().expect("problems expected");
        assert_eq!(report.source, MatrixSource::Covariance);
        assert_eq!(report.len(), 1);
        let dir = &report.directions[0];
        assert_abs_diff_eq!(dir.eigenvalue, 1e-8, epsilon = 1e-12);
        assert_eq!(dir.dominant_label(), Some("b"));
        assert_abs_diff_eq!(dir.loading("b").unwrap(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(dir.loading("a").unwrap(), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(dir.loading("c").unwrap(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn bad_directions_are_ordered_worst_first() {
        let m = labeled(
            array![
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1e-7, 0.0, 0.0],
                [0.0, 0.0, -0.5, 0.0],
                [0.0, 0.0, 0.0, 0.0]
            ],
            &["a", "b", "c", "d"],
        );
        let diagnosis = diagnose_vcov(&m, &VcovOptions::default(), None).expect("diagnosis");
        let report = diagnosis.report().expect("problems expected");
        let dominant: Vec<&str> = report
            .directions
            .iter()
            .map(|d| d.dominant_label().unwrap())
            .collect();
        assert_eq!(dominant, vec!["c", "d", "b"]);
        assert!(
            report
                .directions
                .windows(2)
                .all(|w| w[0].eigenvalue <= w[1].eigenvalue)
        );
    }

    #[test]
    fn non_finite_covariance_without_fallback_is_a_configuration_error() {
        let m = labeled(array![[1.0, f64::NAN], [f64::NAN, 1.0]], &["a", "b"]);
        let err = diagnose_vcov(&m, &VcovOptions::default(), None).unwrap_err();
        assert!(matches!(err, DiagnosticsError::Configuration(_)));
    }

    #[test]
    fn non_finite_covariance_uses_fallback_hessian() {
        let m = labeled(array![[f64::INFINITY, 0.0], [0.0, 1.0]], &["a", "b"]);
        let mut calls = 0usize;
        let mut fallback = || -> Result<Array2<f64>, DiagnosticsError> {
            calls += 1;
            Ok(array![[4.0, 0.0], [0.0, -1e-3]])
        };
        let diagnosis =
            diagnose_vcov(&m, &VcovOptions::default(), Some(&mut fallback)).expect("diagnosis");
        assert_eq!(calls, 1);
        let report = diagnosis.report().expect("fallback always yields a report");
        assert_eq!(report.source, MatrixSource::Hessian);
        assert_eq!(report.len(), 1);
        assert_eq!(report.directions[0].dominant_label(), Some("b"));
    }

    #[test]
    fn well_conditioned_fallback_hessian_yields_empty_report() {
        let m = labeled(array![[f64::NAN, 0.0], [0.0, 1.0]], &["a", "b"]);
        let mut fallback =
            || -> Result<Array2<f64>, DiagnosticsError> { Ok(array![[3.0, 0.0], [0.0, 2.0]]) };
        let diagnosis =
            diagnose_vcov(&m, &VcovOptions::default(), Some(&mut fallback)).expect("diagnosis");
        assert!(!diagnosis.is_ok());
        let report = diagnosis.report().expect("report");
        assert!(report.is_empty());
        assert_eq!(report.source, MatrixSource::Hessian);
    }

    #[test]
    fn mis_sized_fallback_hessian_is_invalid_input() {
        let m = labeled(array![[f64::NAN, 0.0], [0.0, 1.0]], &["a", "b"]);
        let mut fallback =
            || -> Result<Array2<f64>, DiagnosticsError> { Ok(Array2::<f64>::eye(3)) };
        let err = diagnose_vcov(&m, &VcovOptions::default(), Some(&mut fallback)).unwrap_err();
        assert!(matches!(err, DiagnosticsError::InvalidInput(_)));
    }

    #[test]
    fn display_lists_labels_and_eigenvalues() {
        let m = labeled(array![[1.0, 0.0], [0.0, 1e-9]], &["a", "b"]);
        let diagnosis = diagnose_vcov(&m, &VcovOptions::default(), None).expect("diagnosis");
        let text = diagnosis.to_string();
        assert!(text.contains("covariance matrix: 1 eigenvalue(s)"));
        assert!(text.contains("b=1"));
    }
}
