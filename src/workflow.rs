use crate::config::DiagnosticsConfig;
use crate::error::DiagnosticsError;
use crate::hessian::{HessianReport, diagnose_hessian, numerical_hessian};
use crate::screening::{OptimizerEstimates, ScreeningReport, screen_estimates};
use crate::types::LabeledMatrix;
use crate::vcov::{VcovDiagnosis, diagnose_vcov};
use ndarray::{Array1, Array2};
use serde::Serialize;
use std::fmt;

/// What the diagnostics need from an externally fitted model.
pub trait FittedModel {
    /// Point estimates at the reported optimum, with standard errors and
    /// gradient when the fitting library provides them.
    fn estimates(&self) -> OptimizerEstimates;

    /// Covariance of the estimates; `None` when it could not be computed.
    fn covariance(&self) -> Option<Array2<f64>>;

    /// Gradient of the objective at `parameters`.
    fn gradient(&self, parameters: &Array1<f64>) -> Result<Array1<f64>, DiagnosticsError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelDiagnosis {
    pub screening: ScreeningReport,
    /// `None` when the estimates are non-finite; there is no point to examine.
    pub vcov: Option<VcovDiagnosis>,
    /// Present only when the covariance check did not come back OK.
    pub hessian: Option<HessianReport>,
}

impl ModelDiagnosis {
    /// Gate before trusting p-values and confidence intervals of the fit.
    pub fn is_trustworthy(&self) -> bool {
        self.screening.is_clean()
            && self.vcov.as_ref().is_some_and(VcovDiagnosis::is_ok)
            && self.hessian.as_ref().is_none_or(HessianReport::is_ok)
    }
}

/// Screen the estimates, check the covariance and, if that is not OK,
/// analyze the Hessian of the model's objective.
pub fn diagnose_model<M>(
    model: &M,
    config: &DiagnosticsConfig,
) -> Result<ModelDiagnosis, DiagnosticsError>
where
    M: FittedModel + ?Sized,
{
    config.validate()?;
    let estimates = model.estimates();
    let screening = screen_estimates(&estimates, &config.screening)?;

    if !estimates.estimates.iter().all(|v| v.is_finite()) {
        log::warn!("Estimates are non-finite; skipping covariance and Hessian diagnostics");
        return Ok(ModelDiagnosis {
            screening,
            vcov: None,
            hessian: None,
        });
    }

    let p = estimates.len();
    let covariance = model.covariance().unwrap_or_else(|| {
        log::debug!("Model reported no covariance matrix");
        Array2::from_elem((p, p), f64::NAN)
    });
    let vcov = LabeledMatrix::new(covariance, estimates.labels.iter().cloned())?;

    let mut computed_hessian: Option<Array2<f64>> = None;
    let mut fallback = || -> Result<Array2<f64>, DiagnosticsError> {
        let h = numerical_hessian(
            |theta: &Array1<f64>| model.gradient(theta),
            &estimates.estimates,
            config.hessian.step,
        )?;
        computed_hessian = Some(h.clone());
        Ok(h)
    };
    let vcov_diagnosis = diagnose_vcov(&vcov, &config.vcov, Some(&mut fallback))?;

    let hessian = if vcov_diagnosis.is_ok() {
        None
    } else {
        Some(diagnose_hessian(
            |theta: &Array1<f64>| model.gradient(theta),
            &estimates.estimates,
            &estimates.labels,
            computed_hessian.as_ref(),
            &config.hessian,
            &screening.non_finite_labels(),
        )?)
    };

    Ok(ModelDiagnosis {
        screening,
        vcov: Some(vcov_diagnosis),
        hessian,
    })
}

impl fmt::Display for ModelDiagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.screening)?;
        match &self.vcov {
            Some(vcov) => write!(f, "{vcov}")?,
            None => write!(f, "covariance and Hessian not examined: non-finite estimates")?,
        }
        if let Some(hessian) = &self.hessian {
            write!(f, "\n{hessian}")?;
        }
        let verdict = if self.is_trustworthy() {
            "OK"
        } else {
            "NOT OK: inferential output (p-values, confidence intervals) should not be trusted"
        };
        write!(f, "\nverdict: {verdict}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    /// Quadratic objective 0.5 (θ - μ)' A (θ - μ) at θ = μ.
    struct QuadraticModel {
        precision: Array2<f64>,
        mean: Array1<f64>,
        covariance: Option<Array2<f64>>,
    }

    impl FittedModel for QuadraticModel {
        fn estimates(&self) -> OptimizerEstimates {
            OptimizerEstimates::new(["a", "b"], self.mean.clone()).expect("estimates")
        }

        fn covariance(&self) -> Option<Array2<f64>> {
            self.covariance.clone()
        }

        fn gradient(&self, parameters: &Array1<f64>) -> Result<Array1<f64>, DiagnosticsError> {
            Ok(self.precision.dot(&(parameters - &self.mean)))
        }
    }

    #[test]
    fn healthy_model_is_trustworthy() {
        let model = QuadraticModel {
            precision: array![[2.0, 0.0], [0.0, 4.0]],
            mean: array![0.5, 1.0],
            covariance: Some(array![[0.5, 0.0], [0.0, 0.25]]),
        };
        let diagnosis = diagnose_model(&model, &DiagnosticsConfig::default()).expect("diagnosis");
        assert!(diagnosis.vcov.as_ref().is_some_and(VcovDiagnosis::is_ok));
        assert!(diagnosis.hessian.is_none());
        assert!(diagnosis.is_trustworthy());
        assert!(diagnosis.to_string().ends_with("verdict: OK"));
    }

    #[test]
    fn non_finite_estimates_are_reported_not_differentiated() {
        let model = QuadraticModel {
            precision: array![[1.0, 0.0], [0.0, 1.0]],
            mean: array![f64::NAN, 1.0],
            covariance: None,
        };
        let diagnosis = diagnose_model(&model, &DiagnosticsConfig::default()).expect("diagnosis");
        assert_eq!(diagnosis.screening.large_coefficients[0].label, "a");
        assert!(diagnosis.vcov.is_none());
        assert!(diagnosis.hessian.is_none());
        assert!(!diagnosis.is_trustworthy());
        assert!(diagnosis.to_string().contains("verdict: NOT OK"));
    }

    #[test]
    fn missing_covariance_falls_back_to_numerical_hessian() {
        let model = QuadraticModel {
            precision: array![[1.0, 1.0], [1.0, 1.0]],
            mean: array![0.0, 0.0],
            covariance: None,
        };
        let diagnosis = diagnose_model(&model, &DiagnosticsConfig::default()).expect("diagnosis");
        let report = diagnosis
            .vcov
            .as_ref()
            .and_then(VcovDiagnosis::report)
            .expect("Hessian-derived report");
        assert_eq!(report.source, crate::types::MatrixSource::Hessian);
        assert_eq!(report.len(), 1);
        let hessian = diagnosis.hessian.as_ref().expect("Hessian diagnostics");
        assert!(!hessian.is_ok());
        assert!(!diagnosis.is_trustworthy());
    }
}
