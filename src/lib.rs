#![deny(dead_code)]
#![deny(unused_imports)]

pub mod config;
pub mod error;
pub mod hessian;
pub mod linalg;
pub mod screening;
pub mod types;
pub mod vcov;
pub mod workflow;

pub use config::{DiagnosticsConfig, HessianOptions, ScreeningOptions, VcovOptions};
pub use error::DiagnosticsError;
pub use hessian::{
    FlatDirection, HessianReport, SpectrumEntry, analyze_hessian, diagnose_hessian,
    numerical_hessian,
};
pub use screening::{Finding, OptimizerEstimates, ScreeningReport, screen_estimates};
pub use types::{EigenDecomposition, LabeledMatrix, MatrixSource};
pub use vcov::{
    BadDirection, DiagnosticReport, HessianFallback, Loading, VcovDiagnosis, diagnose_vcov,
};
pub use workflow::{FittedModel, ModelDiagnosis, diagnose_model};
