use crate::faer_ndarray::FaerLinalgError;
use thiserror::Error;

/// Errors raised by every stage of the field pipeline.
///
/// Each variant is returned at the boundary of the component that detected it
/// and carries the offending values so that ill-conditioned configurations can
/// be diagnosed from the message alone. Nothing in the crate retries.
#[derive(Error, Debug)]
pub enum FieldError {
    #[error(
        "Invalid {axis} grid axis (start={start}, stop={stop}, step={step}): require finite values with stop > start and step > 0."
    )]
    InvalidGrid {
        axis: &'static str,
        start: f64,
        stop: f64,
        step: f64,
    },

    #[error(
        "Unknown correlation kernel '{name}'; supported kernels are gaussian, exponential, matern32, matern52."
    )]
    UnknownKernel { name: String },

    #[error(
        "Matrix '{label}' ({dim}x{dim}) is not symmetric: max |A - A^T| = {max_asymmetry:.3e} exceeds tolerance {tolerance:.3e}."
    )]
    AsymmetricMatrix {
        label: String,
        dim: usize,
        max_asymmetry: f64,
        tolerance: f64,
    },

    #[error(
        "Matrix '{label}' ({dim}x{dim}) is singular or not positive definite: detected nullspace dimension {nullspace_dim}, smallest eigenvalue {min_eigenvalue:.3e}."
    )]
    SingularPrecision {
        label: String,
        dim: usize,
        nullspace_dim: usize,
        min_eigenvalue: f64,
    },

    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error(
        "Unsupported decomposition '{name}'; expected one of eigen, cholesky, conditional."
    )]
    UnsupportedDecomposition { name: String },

    #[error(
        "Coefficient vector of length {len} is not a perfect square and cannot be reshaped into a square coefficient grid."
    )]
    NonSquareCoefficientCount { len: usize },

    #[error("Invalid parameter '{name}' = {value}: {reason}")]
    InvalidParameter {
        name: &'static str,
        value: f64,
        reason: &'static str,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Linear algebra backend failed: {0}")]
    Linalg(#[from] FaerLinalgError),
}

impl FieldError {
    pub(crate) fn invalid_parameter(name: &'static str, value: f64, reason: &'static str) -> Self {
        FieldError::InvalidParameter {
            name,
            value,
            reason,
        }
    }
}

/// Validates a strictly positive, finite scalar parameter.
pub(crate) fn ensure_positive(name: &'static str, value: f64) -> Result<(), FieldError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(FieldError::invalid_parameter(
            name,
            value,
            "must be finite and > 0",
        ))
    }
}

/// Validates a non-negative parameter; `+inf` is accepted.
pub(crate) fn ensure_non_negative(name: &'static str, value: f64) -> Result<(), FieldError> {
    if !value.is_nan() && value >= 0.0 {
        Ok(())
    } else {
        Err(FieldError::invalid_parameter(name, value, "must be >= 0"))
    }
}
