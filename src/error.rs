use crate::linalg::faer_ndarray::FaerLinalgError;
use thiserror::Error;

/// Hard failures of the diagnostic routines.
///
/// Numerically degenerate inputs are not errors: singular inverses, negative
/// variances and empty findings are reported as data (NaN entries, empty
/// lists). Only missing inputs or capabilities end up here.
#[derive(Error)]
pub enum DiagnosticsError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Numerical failure: {0}")]
    Numerical(String),

    #[error("Eigendecomposition failed: {0}")]
    EigendecompositionFailed(#[from] FaerLinalgError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

// Debug delegates to Display so `expect` messages stay readable.
impl core::fmt::Debug for DiagnosticsError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self)
    }
}
