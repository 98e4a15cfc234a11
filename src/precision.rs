//! Precision-matrix construction over a [`Grid`].
//!
//! Three strategies are provided as variants of [`PrecisionModel`]:
//! a neighbor-truncated kernel similarity, a Kronecker sum of one-dimensional
//! difference penalties, and a conditional-autoregressive form. Every builder
//! returns an exactly symmetric matrix; none of them guarantees full rank.

use crate::error::{FieldError, ensure_non_negative, ensure_positive};
use crate::faer_ndarray::{FaerEigh, fast_atb};
use crate::grid::Grid;
use crate::kernel::{
    Anisotropy, CorrelationKernel, apply_kernel, pairwise_distance, truncate_to_neighbors,
};
use crate::linalg::utils::{
    default_rank_tolerance, ensure_positive_definite, invert_spd, kronecker_product,
    numerical_rank, symmetrize,
};
use faer::Side;
use ndarray::{Array1, Array2, Axis, s};
use serde::{Deserialize, Serialize};

/// Strategy used to build a precision matrix.
///
/// `radius: None` keeps every pair as neighbors (a dense field); JSON has no
/// representation for an infinite radius.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PrecisionModel {
    KernelTruncated {
        kernel: CorrelationKernel,
        bandwidth: f64,
        #[serde(default)]
        radius: Option<f64>,
        tau: f64,
        #[serde(default)]
        anisotropy: Option<Anisotropy>,
    },
    DifferencePenalty {
        order: usize,
        tau: f64,
    },
    Autoregressive {
        kernel: CorrelationKernel,
        bandwidth: f64,
        #[serde(default)]
        radius: Option<f64>,
        rho: f64,
        tau: f64,
        #[serde(default)]
        anisotropy: Option<Anisotropy>,
    },
}

impl PrecisionModel {
    pub fn name(&self) -> &'static str {
        match self {
            PrecisionModel::KernelTruncated { .. } => "kernel_truncated",
            PrecisionModel::DifferencePenalty { .. } => "difference_penalty",
            PrecisionModel::Autoregressive { .. } => "autoregressive",
        }
    }

    pub fn tau(&self) -> f64 {
        match self {
            PrecisionModel::KernelTruncated { tau, .. }
            | PrecisionModel::DifferencePenalty { tau, .. }
            | PrecisionModel::Autoregressive { tau, .. } => *tau,
        }
    }
}

/// A symmetric precision matrix together with the model that produced it.
#[derive(Debug, Clone)]
pub struct Precision {
    matrix: Array2<f64>,
    model: PrecisionModel,
}

impl Precision {
    pub fn matrix(&self) -> &Array2<f64> {
        &self.matrix
    }

    pub fn into_matrix(self) -> Array2<f64> {
        self.matrix
    }

    pub fn model(&self) -> &PrecisionModel {
        &self.model
    }

    pub fn dim(&self) -> usize {
        self.matrix.nrows()
    }

    /// Ascending eigenvalues of Q.
    pub fn eigenvalues(&self) -> Result<Array1<f64>, FieldError> {
        let (values, _) = self.matrix.eigh(Side::Lower)?;
        Ok(values)
    }

    /// Count of eigenvalues strictly above `tol`.
    pub fn numerical_rank(&self, tol: f64) -> Result<usize, FieldError> {
        Ok(numerical_rank(&self.eigenvalues()?, tol))
    }
}

fn effective_radius(radius: Option<f64>) -> Result<f64, FieldError> {
    match radius {
        Some(r) => {
            ensure_non_negative("radius", r)?;
            Ok(r)
        }
        None => Ok(f64::INFINITY),
    }
}

fn ensure_unit_interval(name: &'static str, value: f64) -> Result<(), FieldError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(FieldError::invalid_parameter(name, value, "must lie in [0, 1]"))
    }
}

/// Builds Q for `grid` according to `model`.
pub fn build_precision(grid: &Grid, model: &PrecisionModel) -> Result<Precision, FieldError> {
    let matrix = match model {
        PrecisionModel::KernelTruncated {
            kernel,
            bandwidth,
            radius,
            tau,
            anisotropy,
        } => {
            ensure_positive("tau", *tau)?;
            let radius = effective_radius(*radius)?;
            kernel_truncated_precision(grid, *kernel, *bandwidth, radius, *tau, anisotropy.as_ref())?
        }
        PrecisionModel::DifferencePenalty { order, tau } => {
            ensure_positive("tau", *tau)?;
            kronecker_difference_precision(grid, *order, *tau)?
        }
        PrecisionModel::Autoregressive {
            kernel,
            bandwidth,
            radius,
            rho,
            tau,
            anisotropy,
        } => {
            ensure_positive("tau", *tau)?;
            ensure_unit_interval("rho", *rho)?;
            let radius = effective_radius(*radius)?;
            let weights = neighbor_weights(grid, *kernel, *bandwidth, radius, anisotropy.as_ref())?;
            autoregressive_precision(&weights, *rho, *tau)?
        }
    };

    let precision = Precision {
        matrix,
        model: model.clone(),
    };

    let values = precision.eigenvalues()?;
    let rank = numerical_rank(&values, default_rank_tolerance(&values));
    log::info!(
        "built {} precision: {}x{} (numerical rank {rank})",
        model.name(),
        precision.dim(),
        precision.dim()
    );
    Ok(precision)
}

fn kernel_truncated_precision(
    grid: &Grid,
    kernel: CorrelationKernel,
    bandwidth: f64,
    radius: f64,
    tau: f64,
    anisotropy: Option<&Anisotropy>,
) -> Result<Array2<f64>, FieldError> {
    let distances = pairwise_distance(grid.points().view(), anisotropy)?;
    let similarity = apply_kernel(distances.view(), kernel, bandwidth)?;
    let truncated = truncate_to_neighbors(similarity, distances.view(), radius, true)?;
    Ok(symmetrize(truncated * tau))
}

/// Neighbor-truncated similarity `w_sr`, diagonal as produced by the kernel.
fn neighbor_weights(
    grid: &Grid,
    kernel: CorrelationKernel,
    bandwidth: f64,
    radius: f64,
    anisotropy: Option<&Anisotropy>,
) -> Result<Array2<f64>, FieldError> {
    let distances = pairwise_distance(grid.points().view(), anisotropy)?;
    let similarity = apply_kernel(distances.view(), kernel, bandwidth)?;
    truncate_to_neighbors(similarity, distances.view(), radius, false)
}

fn row_sums(weights: &Array2<f64>) -> Result<Array1<f64>, FieldError> {
    let sums = weights.sum_axis(Axis(1));
    if let Some(bad) = sums.iter().copied().find(|v| !(v.is_finite() && *v > 0.0)) {
        return Err(FieldError::invalid_parameter(
            "neighbor_weight_sum",
            bad,
            "every site needs a positive total neighbor weight",
        ));
    }
    Ok(sums)
}

/// `Q = (I - B) diag(w_s+ / tau)` with `B[s, r] = rho * w_sr / w_s+`, symmetrized.
fn autoregressive_precision(
    weights: &Array2<f64>,
    rho: f64,
    tau: f64,
) -> Result<Array2<f64>, FieldError> {
    let sums = row_sums(weights)?;
    let n = weights.nrows();
    let q = Array2::from_shape_fn((n, n), |(s, r)| {
        let identity = if s == r { 1.0 } else { 0.0 };
        let b = rho * weights[[s, r]] / sums[s];
        (identity - b) * sums[r] / tau
    });
    Ok(symmetrize(q))
}

/// Process covariance of the autoregressive model, `diag(tau / w_s+) (I - B)^{-1}`.
///
/// `I - B = diag(1 / w_s+) (D - rho W)` with `D = diag(w_s+)`, so the inverse
/// goes through the symmetric `D - rho W`. Fails with `SingularPrecision` when
/// that matrix is singular (for example `rho = 1`).
pub fn autoregressive_covariance(
    grid: &Grid,
    kernel: CorrelationKernel,
    bandwidth: f64,
    radius: Option<f64>,
    rho: f64,
    tau: f64,
    anisotropy: Option<&Anisotropy>,
) -> Result<Array2<f64>, FieldError> {
    ensure_positive("tau", tau)?;
    ensure_unit_interval("rho", rho)?;
    let radius = effective_radius(radius)?;
    let weights = neighbor_weights(grid, kernel, bandwidth, radius, anisotropy)?;
    let sums = row_sums(&weights)?;

    let mut system = weights.mapv(|w| -rho * w);
    for (i, &w) in sums.iter().enumerate() {
        system[[i, i]] += w;
    }
    let system = symmetrize(system);
    ensure_positive_definite(&system, "D - rho W")?;
    let inverse = invert_spd(&system, "D - rho W", 0.0)?;

    let n = inverse.nrows();
    Ok(Array2::from_shape_fn((n, n), |(i, j)| {
        tau / sums[i] * inverse[[i, j]] * sums[j]
    }))
}

/// Order-`order` forward difference operator of shape `(dim - order, dim)`.
///
/// Order 1 has rows `[-1, 1]` on adjacent columns; higher orders difference
/// the rows of the previous operator.
pub fn difference_matrix(dim: usize, order: usize) -> Result<Array2<f64>, FieldError> {
    if order == 0 || order >= dim {
        return Err(FieldError::invalid_parameter(
            "order",
            order as f64,
            "difference order must satisfy 1 <= order < dimension",
        ));
    }
    let mut d = Array2::<f64>::eye(dim);
    for _ in 0..order {
        d = &d.slice(s![1.., ..]) - &d.slice(s![..-1, ..]);
    }
    Ok(d)
}

/// One-dimensional penalty `K = D^T D` for [`difference_matrix`].
pub fn difference_penalty(dim: usize, order: usize) -> Result<Array2<f64>, FieldError> {
    let d = difference_matrix(dim, order)?;
    Ok(fast_atb(&d, &d))
}

/// `tau * (K_x ⊗ I_ny + I_nx ⊗ K_y)`, matching x-outer / y-inner ordering.
fn kronecker_difference_precision(
    grid: &Grid,
    order: usize,
    tau: f64,
) -> Result<Array2<f64>, FieldError> {
    let (nx, ny) = grid.shape();
    if order == 0 || order >= nx.min(ny) {
        return Err(FieldError::invalid_parameter(
            "order",
            order as f64,
            "difference order must satisfy 1 <= order < min(nx, ny)",
        ));
    }
    let kx = difference_penalty(nx, order)?;
    let ky = difference_penalty(ny, order)?;
    let q = kronecker_product(&kx, &Array2::eye(ny)) + kronecker_product(&Array2::eye(nx), &ky);
    Ok(symmetrize(q * tau))
}
