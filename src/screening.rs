//! Quick checks on the raw optimizer output.
//!
//! These run before any eigen-analysis and catch the usual suspects behind
//! convergence warnings in mixed models: coefficients on the edge of the
//! parameter space (e.g. log-variances heading to -inf), extreme Wald
//! statistics, standard errors that could not be computed and gradients that
//! are not small at the reported optimum.

use crate::config::ScreeningOptions;
use crate::error::DiagnosticsError;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Point estimates and optional standard errors / gradient from an optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerEstimates {
    pub labels: Vec<String>,
    pub estimates: Array1<f64>,
    #[serde(default)]
    pub standard_errors: Option<Array1<f64>>,
    #[serde(default)]
    pub gradient: Option<Array1<f64>>,
}

impl OptimizerEstimates {
    pub fn new<I, S>(labels: I, estimates: Array1<f64>) -> Result<Self, DiagnosticsError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let labels: Vec<String> = labels.into_iter().map(Into::into).collect();
        if labels.len() != estimates.len() {
            return Err(DiagnosticsError::InvalidInput(format!(
                "expected {} parameter labels, got {}",
                estimates.len(),
                labels.len()
            )));
        }
        Ok(Self {
            labels,
            estimates,
            standard_errors: None,
            gradient: None,
        })
    }

    pub fn with_standard_errors(mut self, se: Array1<f64>) -> Result<Self, DiagnosticsError> {
        self.check_len("standard errors", se.len())?;
        self.standard_errors = Some(se);
        Ok(self)
    }

    pub fn with_gradient(mut self, gradient: Array1<f64>) -> Result<Self, DiagnosticsError> {
        self.check_len("gradient", gradient.len())?;
        self.gradient = Some(gradient);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.estimates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.estimates.is_empty()
    }

    fn check_len(&self, what: &str, len: usize) -> Result<(), DiagnosticsError> {
        if len != self.estimates.len() {
            return Err(DiagnosticsError::InvalidInput(format!(
                "{what} has length {len}, expected {}",
                self.estimates.len()
            )));
        }
        Ok(())
    }

    /// Re-check all invariants; needed after deserialization.
    pub fn validate(&self) -> Result<(), DiagnosticsError> {
        self.check_len("labels", self.labels.len())?;
        if let Some(se) = &self.standard_errors {
            self.check_len("standard errors", se.len())?;
        }
        if let Some(grad) = &self.gradient {
            self.check_len("gradient", grad.len())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    pub label: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ScreeningReport {
    /// Non-finite or |estimate| > big_coef, largest first.
    pub large_coefficients: Vec<Finding>,
    /// |estimate / se| > big_zstat, largest first.
    pub large_zstats: Vec<Finding>,
    /// Standard errors that are NaN or infinite, in label order.
    pub non_finite_standard_errors: Vec<Finding>,
    /// |gradient| > gradient_tol, largest first.
    pub large_gradients: Vec<Finding>,
}

impl ScreeningReport {
    pub fn is_clean(&self) -> bool {
        self.large_coefficients.is_empty()
            && self.large_zstats.is_empty()
            && self.non_finite_standard_errors.is_empty()
            && self.large_gradients.is_empty()
    }

    pub fn non_finite_labels(&self) -> Vec<String> {
        self.non_finite_standard_errors
            .iter()
            .map(|f| f.label.clone())
            .collect()
    }
}

fn largest_first(mut findings: Vec<Finding>) -> Vec<Finding> {
    findings.sort_by(|a, b| b.value.abs().total_cmp(&a.value.abs()));
    findings
}

pub fn screen_estimates(
    estimates: &OptimizerEstimates,
    options: &ScreeningOptions,
) -> Result<ScreeningReport, DiagnosticsError> {
    options.validate()?;
    estimates.validate()?;

    let finding = |idx: usize, value: f64| Finding {
        label: estimates.labels[idx].clone(),
        value,
    };

    let large_coefficients = largest_first(
        estimates
            .estimates
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_finite() || v.abs() > options.big_coef)
            .map(|(i, &v)| finding(i, v))
            .collect(),
    );

    let (large_zstats, non_finite_standard_errors) = match &estimates.standard_errors {
        Some(se) => {
            let zstats = estimates
                .estimates
                .iter()
                .zip(se.iter())
                .enumerate()
                .filter(|(_, (_, s))| s.is_finite() && **s > 0.0)
                .map(|(i, (e, s))| (i, e / s))
                .filter(|(_, z)| z.abs() > options.big_zstat)
                .map(|(i, z)| finding(i, z))
                .collect();
            let non_finite = se
                .iter()
                .enumerate()
                .filter(|(_, s)| !s.is_finite())
                .map(|(i, &s)| finding(i, s))
                .collect();
            (largest_first(zstats), non_finite)
        }
        None => (Vec::new(), Vec::new()),
    };

    let large_gradients = match &estimates.gradient {
        Some(grad) => largest_first(
            grad.iter()
                .enumerate()
                .filter(|(_, g)| !g.is_finite() || g.abs() > options.gradient_tol)
                .map(|(i, &g)| finding(i, g))
                .collect(),
        ),
        None => Vec::new(),
    };

    let report = ScreeningReport {
        large_coefficients,
        large_zstats,
        non_finite_standard_errors,
        large_gradients,
    };
    if !report.is_clean() {
        log::warn!(
            "Screening found {} large coefficient(s), {} large Z statistic(s), {} non-finite SE(s), {} large gradient(s)",
            report.large_coefficients.len(),
            report.large_zstats.len(),
            report.non_finite_standard_errors.len(),
            report.large_gradients.len()
        );
    }
    Ok(report)
}

fn write_findings(f: &mut fmt::Formatter<'_>, title: &str, findings: &[Finding]) -> fmt::Result {
    if findings.is_empty() {
        return Ok(());
    }
    write!(f, "\n  {title}:")?;
    for finding in findings {
        write!(f, " {}={:.4e}", finding.label, finding.value)?;
    }
    Ok(())
}

impl fmt::Display for ScreeningReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_clean() {
            return write!(f, "estimates OK");
        }
        write!(f, "estimate screening found problems")?;
        write_findings(f, "large coefficients", &self.large_coefficients)?;
        write_findings(f, "large Z statistics", &self.large_zstats)?;
        write_findings(f, "non-finite standard errors", &self.non_finite_standard_errors)?;
        write_findings(f, "large gradients", &self.large_gradients)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn estimates() -> OptimizerEstimates {
        OptimizerEstimates::new(
            ["(Intercept)", "x", "log_sd_group", "theta"],
            array![1.5, -0.2, -14.0, 30.0],
        )
        .expect("estimates")
    }

    #[test]
    fn clean_estimates_produce_clean_report() {
        let est = OptimizerEstimates::new(["a", "b"], array![0.5, -1.0])
            .unwrap()
            .with_standard_errors(array![0.3, 0.4])
            .unwrap()
            .with_gradient(array![1e-6, -2e-5])
            .unwrap();
        let report = screen_estimates(&est, &ScreeningOptions::default()).expect("report");
        assert!(report.is_clean());
        assert_eq!(report.to_string(), "estimates OK");
    }

    #[test]
    fn large_coefficients_are_sorted_by_magnitude() {
        let report = screen_estimates(&estimates(), &ScreeningOptions::default()).expect("report");
        let names: Vec<&str> = report
            .large_coefficients
            .iter()
            .map(|f| f.label.as_str())
            .collect();
        assert_eq!(names, vec!["theta", "log_sd_group"]);
    }

    #[test]
    fn non_finite_estimates_count_as_large_coefficients() {
        let est = OptimizerEstimates::new(["a", "b"], array![f64::NAN, 1.0])
            .unwrap()
            .with_standard_errors(array![0.5, 0.5])
            .unwrap();
        let report = screen_estimates(&est, &ScreeningOptions::default()).expect("report");
        assert!(!report.is_clean());
        assert_eq!(report.large_coefficients.len(), 1);
        assert_eq!(report.large_coefficients[0].label, "a");
        assert!(report.large_coefficients[0].value.is_nan());
        assert!(report.large_zstats.is_empty());
    }

    #[test]
    fn non_finite_standard_errors_and_zstats_are_flagged() {
        let est = estimates()
            .with_standard_errors(array![0.1, f64::NAN, f64::INFINITY, 100.0])
            .unwrap();
        let report = screen_estimates(&est, &ScreeningOptions::default()).expect("report");
        assert_eq!(report.non_finite_labels(), vec!["x", "log_sd_group"]);
        assert_eq!(report.large_zstats.len(), 1);
        assert_eq!(report.large_zstats[0].label, "(Intercept)");
        assert!((report.large_zstats[0].value - 15.0).abs() < 1e-12);
    }

    #[test]
    fn gradient_components_above_tolerance_are_flagged() {
        let est = estimates()
            .with_gradient(array![1e-6, 0.02, -0.5, 1e-4])
            .unwrap();
        let report = screen_estimates(&est, &ScreeningOptions::default()).expect("report");
        let names: Vec<&str> = report
            .large_gradients
            .iter()
            .map(|f| f.label.as_str())
            .collect();
        assert_eq!(names, vec!["log_sd_group", "x"]);
    }

    #[test]
    fn length_mismatch_is_rejected() {
        assert!(OptimizerEstimates::new(["a"], array![1.0, 2.0]).is_err());
        assert!(estimates().with_standard_errors(array![1.0]).is_err());

        let mut est = estimates();
        est.gradient = Some(array![0.0]);
        assert!(matches!(
            screen_estimates(&est, &ScreeningOptions::default()),
            Err(DiagnosticsError::InvalidInput(_))
        ));
    }
}
