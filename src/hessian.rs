//! Eigen-analysis of the objective's Hessian at a candidate optimum.
//!
//! The Hessian is either supplied or computed as the central-difference
//! Jacobian of the model's gradient. Eigenvalues are compared against the
//! largest one; relatively tiny or negative curvature marks a flat or
//! saddle direction, and the parameters with non-negligible components in
//! that direction are reported. Standard errors from the inverse Hessian are
//! attached for inspection and degrade to NaN instead of failing.

use crate::config::HessianOptions;
use crate::error::DiagnosticsError;
use crate::linalg::utils::{symmetric_inverse, symmetrize};
use crate::types::{EigenDecomposition, LabeledMatrix};
use ndarray::{Array1, Array2};
use serde::Serialize;
use std::fmt;

/// Eigenvalues with |λ| at or below this fraction of max|λ| are treated as exact zeros
/// when inverting.
const NULL_DIRECTION_REL_TOL: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpectrumEntry {
    pub index: usize,
    pub eigenvalue: f64,
    /// eigenvalue / largest eigenvalue; NaN when the largest is not positive.
    pub relative_value: f64,
}

/// A relatively flat (or negative-curvature) Hessian direction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlatDirection {
    /// Position in the descending eigenvalue order.
    pub index: usize,
    pub eigenvalue: f64,
    pub relative_value: f64,
    /// Parameters whose |component| exceeds the vector tolerance, in label order.
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HessianReport {
    pub labels: Vec<String>,
    pub hessian: Array2<f64>,
    pub eigen: EigenDecomposition,
    pub spectrum: Vec<SpectrumEntry>,
    pub flat_directions: Vec<FlatDirection>,
    /// sqrt(diag(H^-1)); NaN where the variance is negative or undefined.
    pub standard_errors: Array1<f64>,
    /// Parameters flagged non-finite by an earlier report, kept for cross-reference.
    pub flagged_non_finite: Vec<String>,
    pub condition_number: f64,
}

impl HessianReport {
    pub fn is_ok(&self) -> bool {
        self.flat_directions.is_empty()
    }

    pub fn standard_error(&self, label: &str) -> Option<f64> {
        self.labels
            .iter()
            .position(|l| l == label)
            .map(|idx| self.standard_errors[idx])
    }

    pub fn non_finite_standard_errors(&self) -> Vec<&str> {
        self.labels
            .iter()
            .zip(self.standard_errors.iter())
            .filter(|(_, se)| !se.is_finite())
            .map(|(label, _)| label.as_str())
            .collect()
    }

    /// Externally flagged parameters that no flat direction involves.
    ///
    /// Informational only: the two sources can legitimately disagree.
    pub fn flags_outside_flat_directions(&self) -> Vec<&str> {
        self.flagged_non_finite
            .iter()
            .filter(|flag| {
                !self
                    .flat_directions
                    .iter()
                    .any(|dir| dir.labels.iter().any(|l| l == *flag))
            })
            .map(String::as_str)
            .collect()
    }
}

fn evaluate_gradient<G>(
    gradient_fn: &mut G,
    at: &Array1<f64>,
    expected_len: usize,
) -> Result<Array1<f64>, DiagnosticsError>
where
    G: FnMut(&Array1<f64>) -> Result<Array1<f64>, DiagnosticsError>,
{
    let grad = gradient_fn(at).map_err(|err| {
        DiagnosticsError::Numerical(format!("gradient evaluation failed: {err}"))
    })?;
    if grad.len() != expected_len {
        return Err(DiagnosticsError::Numerical(format!(
            "gradient has length {}, expected {expected_len}",
            grad.len()
        )));
    }
    if !grad.iter().all(|v| v.is_finite()) {
        return Err(DiagnosticsError::Numerical(
            "gradient contains non-finite entries".to_string(),
        ));
    }
    Ok(grad)
}

/// Hessian as the symmetrized central-difference Jacobian of `gradient_fn`.
///
/// Column j is [g(θ + h_j e_j) - g(θ - h_j e_j)] / (2 h_j) with
/// h_j = step * max(1, |θ_j|).
pub fn numerical_hessian<G>(
    mut gradient_fn: G,
    parameters: &Array1<f64>,
    step: f64,
) -> Result<Array2<f64>, DiagnosticsError>
where
    G: FnMut(&Array1<f64>) -> Result<Array1<f64>, DiagnosticsError>,
{
    if !(step.is_finite() && step > 0.0) {
        return Err(DiagnosticsError::InvalidInput(format!(
            "finite-difference step must be finite and > 0, got {step}"
        )));
    }
    if !parameters.iter().all(|v| v.is_finite()) {
        return Err(DiagnosticsError::Numerical(
            "cannot differentiate at non-finite parameters".to_string(),
        ));
    }
    let p = parameters.len();
    let mut jacobian = Array2::<f64>::zeros((p, p));
    let mut plus = parameters.clone();
    let mut minus = parameters.clone();
    for j in 0..p {
        let h = step * parameters[j].abs().max(1.0);
        plus[j] += h;
        minus[j] -= h;
        let g_plus = evaluate_gradient(&mut gradient_fn, &plus, p)?;
        let g_minus = evaluate_gradient(&mut gradient_fn, &minus, p)?;
        for i in 0..p {
            jacobian[[i, j]] = (g_plus[i] - g_minus[i]) / (2.0 * h);
        }
        plus[j] = parameters[j];
        minus[j] = parameters[j];
    }
    log::debug!("Computed {p}x{p} numerical Hessian with relative step {step:.1e}");
    Ok(symmetrize(&jacobian, "numerical Hessian"))
}

/// Standard errors from the inverse Hessian.
///
/// Tries LLT then LDLT; if the Hessian has numerically null directions or
/// neither factorization yields a finite inverse, falls back to the spectral
/// pseudo-inverse and marks every parameter loading on a null direction as NaN.
pub(crate) fn standard_errors_from_hessian(
    hessian: &Array2<f64>,
    eigen: &EigenDecomposition,
    vector_tol: f64,
) -> Array1<f64> {
    let scale = eigen.values.iter().fold(0.0f64, |m, v| m.max(v.abs()));
    let cutoff = scale * NULL_DIRECTION_REL_TOL;
    let has_null_direction = eigen.values.iter().any(|v| v.abs() <= cutoff);

    if !has_null_direction && let Some(inv) = symmetric_inverse(hessian, "Hessian") {
        // Negative variances (indefinite Hessian) come out as NaN here.
        return inv.diag().mapv(f64::sqrt);
    }

    log::warn!("Hessian is singular; standard errors on its null directions are reported as NaN");
    let p = eigen.len();
    let mut variance = Array1::<f64>::zeros(p);
    let mut affected = vec![false; p];
    for (k, &lambda) in eigen.values.iter().enumerate() {
        let v = eigen.vector(k);
        if lambda.abs() <= cutoff {
            for i in 0..p {
                if v[i].abs() > vector_tol {
                    affected[i] = true;
                }
            }
            continue;
        }
        for i in 0..p {
            variance[i] += v[i] * v[i] / lambda;
        }
    }
    variance
        .iter()
        .zip(affected)
        .map(|(&var, hit)| if hit { f64::NAN } else { var.sqrt() })
        .collect()
}

/// Analyze an already available Hessian.
pub fn analyze_hessian(
    hessian: &LabeledMatrix,
    options: &HessianOptions,
    flagged_non_finite: &[String],
) -> Result<HessianReport, DiagnosticsError> {
    options.validate()?;
    // Spectrum, inverse and the stored matrix all describe (H + H^T) / 2.
    let hessian = hessian.with_matrix(symmetrize(hessian.matrix(), "Hessian"))?;
    let eigen = hessian.eigen("Hessian")?;
    let max_eigenvalue = eigen.max_eigenvalue();
    if !(max_eigenvalue > 0.0) {
        log::warn!(
            "Largest Hessian eigenvalue {:.3e} is not positive; every direction is flagged",
            max_eigenvalue
        );
    }

    let spectrum: Vec<SpectrumEntry> = eigen
        .values
        .iter()
        .enumerate()
        .map(|(index, &eigenvalue)| SpectrumEntry {
            index,
            eigenvalue,
            relative_value: if max_eigenvalue > 0.0 {
                eigenvalue / max_eigenvalue
            } else {
                f64::NAN
            },
        })
        .collect();

    let flat_directions: Vec<FlatDirection> = spectrum
        .iter()
        // NaN relative values count as flat.
        .filter(|entry| !(entry.relative_value > options.eigen_tol))
        .map(|entry| {
            let vector = eigen.vector(entry.index);
            FlatDirection {
                index: entry.index,
                eigenvalue: entry.eigenvalue,
                relative_value: entry.relative_value,
                labels: hessian
                    .labels()
                    .iter()
                    .zip(vector.iter())
                    .filter(|(_, c)| c.abs() > options.vector_tol)
                    .map(|(label, _)| label.clone())
                    .collect(),
            }
        })
        .collect();

    if flat_directions.is_empty() {
        log::debug!("Hessian OK");
    } else {
        log::warn!(
            "Hessian has {} relatively flat direction(s) (eigen_tol {:.1e})",
            flat_directions.len(),
            options.eigen_tol
        );
    }

    let standard_errors =
        standard_errors_from_hessian(hessian.matrix(), &eigen, options.vector_tol);
    let condition_number = eigen.condition_number();

    Ok(HessianReport {
        labels: hessian.labels().to_vec(),
        hessian: hessian.matrix().clone(),
        spectrum,
        flat_directions,
        standard_errors,
        flagged_non_finite: flagged_non_finite.to_vec(),
        condition_number,
        eigen,
    })
}

/// Diagnose the Hessian at `parameters`, differentiating `gradient_fn` when
/// no Hessian is supplied.
pub fn diagnose_hessian<G>(
    gradient_fn: G,
    parameters: &Array1<f64>,
    labels: &[String],
    hessian: Option<&Array2<f64>>,
    options: &HessianOptions,
    flagged_non_finite: &[String],
) -> Result<HessianReport, DiagnosticsError>
where
    G: FnMut(&Array1<f64>) -> Result<Array1<f64>, DiagnosticsError>,
{
    options.validate()?;
    if labels.len() != parameters.len() {
        return Err(DiagnosticsError::InvalidInput(format!(
            "expected {} parameter labels, got {}",
            parameters.len(),
            labels.len()
        )));
    }
    let matrix = match hessian {
        Some(h) => h.clone(),
        None => numerical_hessian(gradient_fn, parameters, options.step)?,
    };
    let labeled = LabeledMatrix::new(matrix, labels.iter().cloned())?;
    analyze_hessian(&labeled, options, flagged_non_finite)
}

impl fmt::Display for HessianReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ok() {
            write!(
                f,
                "Hessian OK (condition number {:.3e})",
                self.condition_number
            )?;
        } else {
            write!(
                f,
                "Hessian has {} flat direction(s) (condition number {:.3e})",
                self.flat_directions.len(),
                self.condition_number
            )?;
            for dir in &self.flat_directions {
                write!(
                    f,
                    "\n  [{}] eigenvalue {:.4e} (relative {:.3e}): {}",
                    dir.index,
                    dir.eigenvalue,
                    dir.relative_value,
                    dir.labels.join(", ")
                )?;
            }
        }
        let missing = self.non_finite_standard_errors();
        if !missing.is_empty() {
            write!(f, "\n  non-finite standard errors: {}", missing.join(", "))?;
        }
        if !self.flagged_non_finite.is_empty() {
            write!(
                f,
                "\n  previously flagged: {}",
                self.flagged_non_finite.join(", ")
            )?;
        }
        Ok(())
    }
}
