use thiserror::Error;

/// Failures raised by the numerical core.
///
/// Hitting an inner iteration cap is not an error; it shows up in
/// [`SolveDiagnostics`](crate::types::SolveDiagnostics).
#[derive(Debug, Error)]
pub enum MmaError {
    #[error("{what} dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("invalid bounds at local index {index}: xmin = {xmin}, xmax = {xmax}")]
    InvalidBounds { index: usize, xmin: f64, xmax: f64 },

    #[error("design value {value} at local index {index} lies outside [{xmin}, {xmax}]")]
    DesignOutOfBounds {
        index: usize,
        value: f64,
        xmin: f64,
        xmax: f64,
    },

    #[error("invalid setting: {0}")]
    InvalidSetting(String),

    #[error("no constraints configured; call set_m before update")]
    NoConstraints,

    #[error("{0} linear system is singular")]
    SingularSystem(&'static str),

    #[error(
        "OC multiplier is not bracketed: linearized constraint {violation:e} > 0 at lambda = {upper:e}"
    )]
    UnbracketedMultiplier { upper: f64, violation: f64 },

    #[error("collective operation failed: {0}")]
    Collective(String),
}

pub type Result<T> = std::result::Result<T, MmaError>;

pub(crate) fn check_len(what: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(MmaError::DimensionMismatch {
            what,
            expected,
            actual,
        });
    }
    Ok(())
}
