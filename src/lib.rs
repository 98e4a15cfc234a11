//! Gaussian Markov random fields on rectangular grids.
//!
//! Pipeline: [`grid::Grid`] → [`precision::build_precision`] →
//! optional [`nullspace::penalize_nullspace`] → a sampler in [`sampler`] →
//! [`surface::Surface`]. [`config::generate_field`] runs all of it from a
//! serde configuration.

pub mod config;
pub mod error;
pub mod grid;
pub mod kernel;
pub mod linalg;
pub mod nullspace;
pub mod precision;
pub mod sampler;
pub mod surface;
pub mod types;

pub use linalg::faer_ndarray;

pub use config::{FieldConfig, FieldRealization, generate_field, generate_replicates};
pub use error::FieldError;
pub use grid::{AxisSpec, Grid};
pub use kernel::{
    Anisotropy, CorrelationKernel, apply_kernel, cross_distance, pairwise_distance,
    truncate_to_neighbors,
};
pub use nullspace::{NullspacePenalty, PenalizedPrecision, penalize_nullspace};
pub use precision::{
    Precision, PrecisionModel, autoregressive_covariance, build_precision, difference_matrix,
    difference_penalty,
};
pub use sampler::{
    BoundaryLayout, ConditionalDraw, ConditionalSpec, Decomposition, DecompositionFactor,
    GridPartition, SamplingTarget, backsolve, sample_cholesky, sample_conditional, sample_eigen,
    sample_replicates,
};
pub use surface::{Curve, Surface};
pub use types::Coefficients;
