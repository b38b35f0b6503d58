use crate::error::DiagnosticsError;
use serde::{Deserialize, Serialize};

pub fn default_vcov_tolerance() -> f64 {
    1e-5
}

pub fn default_digits() -> u32 {
    2
}

pub fn default_eigen_tol() -> f64 {
    1e-5
}

pub fn default_vector_tol() -> f64 {
    1e-2
}

pub fn default_fd_step() -> f64 {
    1e-4
}

pub fn default_big_coef() -> f64 {
    10.0
}

pub fn default_big_zstat() -> f64 {
    5.0
}

pub fn default_gradient_tol() -> f64 {
    1e-3
}

/// Covariance-matrix eigen-analysis settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VcovOptions {
    /// Eigenvalues at or below this absolute value are reported.
    #[serde(default = "default_vcov_tolerance")]
    pub tolerance: f64,
    /// Decimal places kept in reported loadings.
    #[serde(default = "default_digits")]
    pub digits: u32,
}

impl Default for VcovOptions {
    fn default() -> Self {
        Self {
            tolerance: default_vcov_tolerance(),
            digits: default_digits(),
        }
    }
}

/// Hessian eigen-analysis settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HessianOptions {
    /// Eigenvalues whose ratio to the largest eigenvalue is at or below this are flagged.
    #[serde(default = "default_eigen_tol")]
    pub eigen_tol: f64,
    /// Eigenvector components above this magnitude name a parameter as involved.
    #[serde(default = "default_vector_tol")]
    pub vector_tol: f64,
    /// Relative central-difference step for the numerical Jacobian of the gradient.
    #[serde(default = "default_fd_step")]
    pub step: f64,
}

impl Default for HessianOptions {
    fn default() -> Self {
        Self {
            eigen_tol: default_eigen_tol(),
            vector_tol: default_vector_tol(),
            step: default_fd_step(),
        }
    }
}

/// Thresholds for screening raw optimizer estimates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreeningOptions {
    #[serde(default = "default_big_coef")]
    pub big_coef: f64,
    #[serde(default = "default_big_zstat")]
    pub big_zstat: f64,
    #[serde(default = "default_gradient_tol")]
    pub gradient_tol: f64,
}

impl Default for ScreeningOptions {
    fn default() -> Self {
        Self {
            big_coef: default_big_coef(),
            big_zstat: default_big_zstat(),
            gradient_tol: default_gradient_tol(),
        }
    }
}

/// Combined configuration, loadable from JSON with any section omitted.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    #[serde(default)]
    pub vcov: VcovOptions,
    #[serde(default)]
    pub hessian: HessianOptions,
    #[serde(default)]
    pub screening: ScreeningOptions,
}

fn require(condition: bool, message: impl FnOnce() -> String) -> Result<(), DiagnosticsError> {
    if condition {
        Ok(())
    } else {
        Err(DiagnosticsError::InvalidInput(message()))
    }
}

impl VcovOptions {
    pub fn validate(&self) -> Result<(), DiagnosticsError> {
        require(self.tolerance.is_finite(), || {
            format!("vcov tolerance must be finite, got {}", self.tolerance)
        })?;
        require(self.digits <= 15, || {
            format!("digits must be at most 15, got {}", self.digits)
        })
    }
}

impl HessianOptions {
    pub fn validate(&self) -> Result<(), DiagnosticsError> {
        require(self.eigen_tol.is_finite(), || {
            format!("eigen_tol must be finite, got {}", self.eigen_tol)
        })?;
        require(self.vector_tol.is_finite() && self.vector_tol >= 0.0, || {
            format!("vector_tol must be finite and >= 0, got {}", self.vector_tol)
        })?;
        require(self.step.is_finite() && self.step > 0.0, || {
            format!("finite-difference step must be finite and > 0, got {}", self.step)
        })
    }
}

impl ScreeningOptions {
    pub fn validate(&self) -> Result<(), DiagnosticsError> {
        for (name, value) in [
            ("big_coef", self.big_coef),
            ("big_zstat", self.big_zstat),
            ("gradient_tol", self.gradient_tol),
        ] {
            require(value.is_finite() && value >= 0.0, || {
                format!("{name} must be finite and >= 0, got {value}")
            })?;
        }
        Ok(())
    }
}

impl DiagnosticsConfig {
    pub fn validate(&self) -> Result<(), DiagnosticsError> {
        self.vcov.validate()?;
        self.hessian.validate()?;
        self.screening.validate()
    }
}
