//! Gaussian draws from precision or covariance matrices.
//!
//! Every entry point takes an explicit random source `&mut R` with
//! `R: rand::Rng + ?Sized`; seeding is the caller's responsibility. Draws are
//! single-threaded. [`sample_replicates`] parallelizes across independent
//! replicates with a per-replicate seed so results do not depend on thread
//! scheduling.

use crate::error::{FieldError, ensure_non_negative, ensure_positive};
use crate::faer_ndarray::{FaerCholesky, FaerEigh};
use crate::grid::Grid;
use crate::kernel::{
    Anisotropy, CorrelationKernel, apply_kernel, cross_distance, pairwise_distance,
    truncate_to_neighbors,
};
use crate::linalg::utils::{ensure_symmetric, singular_error};
use faer::Side;
use ndarray::{Array1, Array2, Axis};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, StandardNormal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Relative size below which a negative eigenvalue is treated as roundoff.
const NEGATIVE_EIGENVALUE_REL_TOL: f64 = 1e-8;

/// How the field coefficients are drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Decomposition {
    Eigen,
    Cholesky,
    Conditional,
}

impl FromStr for Decomposition {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "eigen" | "eigenB" => Ok(Decomposition::Eigen),
            "cholesky" | "choleskyB" => Ok(Decomposition::Cholesky),
            "conditional" => Ok(Decomposition::Conditional),
            other => Err(FieldError::UnsupportedDecomposition {
                name: other.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for Decomposition {
    type Error = FieldError;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        name.parse()
    }
}

impl fmt::Display for Decomposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Decomposition::Eigen => "eigen",
            Decomposition::Cholesky => "cholesky",
            Decomposition::Conditional => "conditional",
        })
    }
}

/// What the matrix handed to [`sample_eigen`] represents.
#[derive(Debug, Clone, Copy)]
pub enum SamplingTarget<'a> {
    Covariance(&'a Array2<f64>),
    Precision(&'a Array2<f64>),
}

/// Square-root factor used to turn standard-normal draws into correlated ones.
#[derive(Debug, Clone)]
pub enum DecompositionFactor {
    /// `B = V diag(sqrt(max(λ, 0)))`; `B θ` has covariance `B B^T`.
    EigenRoot(Array2<f64>),
    /// Lower `L` with `Q = L L^T`; `L^{-T} θ` has covariance `Q^{-1}`.
    CholeskyLower(Array2<f64>),
}

impl DecompositionFactor {
    pub fn eigen_root(matrix: &Array2<f64>, label: &str) -> Result<Self, FieldError> {
        ensure_symmetric(label, matrix.view())?;
        let (values, vectors) = matrix.eigh(Side::Lower)?;

        let scale = values.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
        let most_negative = values.iter().copied().fold(0.0_f64, f64::min);
        if most_negative < -NEGATIVE_EIGENVALUE_REL_TOL * scale {
            log::warn!(
                "{label} has eigenvalue {most_negative:.3e} (spectrum scale {scale:.3e}); clipping negatives to zero"
            );
        }

        let roots = values.mapv(|v| v.max(0.0).sqrt());
        Ok(DecompositionFactor::EigenRoot(
            &vectors * &roots.view().insert_axis(Axis(0)),
        ))
    }

    pub fn cholesky(matrix: &Array2<f64>, label: &str) -> Result<Self, FieldError> {
        ensure_symmetric(label, matrix.view())?;
        let factor = match matrix.cholesky(Side::Lower) {
            Ok(factor) => factor,
            Err(err) => {
                log::debug!("Cholesky of {label} failed: {err}");
                return Err(singular_error(matrix, label, 0.0));
            }
        };
        // A PSD matrix with an exact zero eigenvalue can still factor with a
        // roundoff-sized pivot.
        let pivots_sq = factor.diag().mapv(|d| d * d);
        let scale = pivots_sq.iter().fold(0.0_f64, |acc, v| acc.max(*v));
        let tol = 1e2 * pivots_sq.len() as f64 * f64::EPSILON * scale;
        if pivots_sq.iter().any(|v| !v.is_finite() || *v <= tol) {
            return Err(singular_error(matrix, label, tol));
        }
        Ok(DecompositionFactor::CholeskyLower(factor.lower_triangular()))
    }

    pub fn matrix(&self) -> &Array2<f64> {
        match self {
            DecompositionFactor::EigenRoot(m) | DecompositionFactor::CholeskyLower(m) => m,
        }
    }

    pub fn dim(&self) -> usize {
        self.matrix().nrows()
    }

    /// Maps a draw `θ` to `B θ` or `L^{-T} θ + mu`.
    pub fn transform(
        &self,
        theta: &Array1<f64>,
        mu: Option<&Array1<f64>>,
    ) -> Result<Array1<f64>, FieldError> {
        match self {
            DecompositionFactor::EigenRoot(root) => {
                if root.ncols() != theta.len() {
                    return Err(FieldError::DimensionMismatch(format!(
                        "eigen root has {} columns but draw has length {}",
                        root.ncols(),
                        theta.len()
                    )));
                }
                let mut z = root.dot(theta);
                if let Some(mu) = mu {
                    check_mean(mu, z.len())?;
                    z += mu;
                }
                Ok(z)
            }
            DecompositionFactor::CholeskyLower(lower) => {
                backsolve(&lower.t().to_owned(), theta, mu)
            }
        }
    }
}

fn check_mean(mu: &Array1<f64>, len: usize) -> Result<(), FieldError> {
    if mu.len() != len {
        return Err(FieldError::DimensionMismatch(format!(
            "mean has length {} but the field has {len} coordinates",
            mu.len()
        )));
    }
    Ok(())
}

pub(crate) fn standard_normal_vector<R: rand::Rng + ?Sized>(n: usize, rng: &mut R) -> Array1<f64> {
    Array1::from_shape_fn(n, |_| StandardNormal.sample(rng))
}

/// Solves `upper · x = rhs` by back substitution and adds `mu`.
///
/// The last coordinate is solved first. Fails with `DimensionMismatch` when
/// the factor is not square or its width differs from `rhs`.
pub fn backsolve(
    upper: &Array2<f64>,
    rhs: &Array1<f64>,
    mu: Option<&Array1<f64>>,
) -> Result<Array1<f64>, FieldError> {
    let n = rhs.len();
    if upper.ncols() != n || upper.nrows() != n {
        return Err(FieldError::DimensionMismatch(format!(
            "upper-triangular factor is {}x{} but right-hand side has length {n}",
            upper.nrows(),
            upper.ncols()
        )));
    }
    if let Some(mu) = mu {
        check_mean(mu, n)?;
    }

    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let pivot = upper[[i, i]];
        if pivot == 0.0 || !pivot.is_finite() {
            return Err(FieldError::SingularPrecision {
                label: "upper factor".to_string(),
                dim: n,
                nullspace_dim: upper.diag().iter().filter(|d| **d == 0.0).count(),
                min_eigenvalue: upper.diag().iter().copied().fold(f64::INFINITY, f64::min),
            });
        }
        let mut v = rhs[i];
        for j in (i + 1)..n {
            v -= upper[[i, j]] * x[j];
        }
        x[i] = v / pivot;
    }
    if let Some(mu) = mu {
        x += mu;
    }
    Ok(x)
}

/// Eigen square-root sampling.
///
/// A covariance target yields `N(0, Σ)`. A precision target yields `B θ` with
/// `B = V diag(sqrt(λ₊))` and `θ ~ N(0, tau I)`, so the draw has covariance
/// `tau · Q`.
pub fn sample_eigen<R: rand::Rng + ?Sized>(
    target: SamplingTarget<'_>,
    tau: f64,
    rng: &mut R,
) -> Result<Array1<f64>, FieldError> {
    let (factor, theta_scale) = match target {
        SamplingTarget::Covariance(sigma) => {
            (DecompositionFactor::eigen_root(sigma, "covariance")?, 1.0)
        }
        SamplingTarget::Precision(q) => {
            ensure_positive("tau", tau)?;
            (DecompositionFactor::eigen_root(q, "precision")?, tau.sqrt())
        }
    };
    let theta = standard_normal_vector(factor.dim(), rng) * theta_scale;
    factor.transform(&theta, None)
}

/// Draws `x ~ N(mu, Q^{-1})` via `Q = L L^T` and `x = L^{-T} θ + mu`.
pub fn sample_cholesky<R: rand::Rng + ?Sized>(
    q: &Array2<f64>,
    mu: Option<&Array1<f64>>,
    rng: &mut R,
) -> Result<Array1<f64>, FieldError> {
    let factor = DecompositionFactor::cholesky(q, "precision")?;
    let theta = standard_normal_vector(factor.dim(), rng);
    factor.transform(&theta, mu)
}

/// Which grid points are drawn first and conditioned on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "layout", rename_all = "snake_case")]
pub enum BoundaryLayout {
    /// A `width × width` block at each of the four grid corners.
    Corners { width: usize },
    /// Every point within `width` rows or columns of a grid edge.
    Frame { width: usize },
}

impl Default for BoundaryLayout {
    fn default() -> Self {
        BoundaryLayout::Corners { width: 4 }
    }
}

/// Split of the grid into a boundary set B and an interior set A.
///
/// Index lists are ascending grid positions; every point is in exactly one set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridPartition {
    boundary_mask: Vec<bool>,
    boundary: Vec<usize>,
    interior: Vec<usize>,
}

impl GridPartition {
    /// Widths larger than an axis are clamped to the axis length.
    pub fn new(grid: &Grid, layout: BoundaryLayout) -> Self {
        let (nx, ny) = grid.shape();
        let mut mask = vec![false; grid.len()];
        match layout {
            BoundaryLayout::Corners { width } => {
                let wx = width.min(nx);
                let wy = width.min(ny);
                let x_blocks = [0..wx, (nx - wx)..nx];
                let y_blocks = [0..wy, (ny - wy)..ny];
                for xs in &x_blocks {
                    for ys in &y_blocks {
                        for i in xs.clone() {
                            for j in ys.clone() {
                                mask[grid.index(i, j)] = true;
                            }
                        }
                    }
                }
            }
            BoundaryLayout::Frame { width } => {
                for i in 0..nx {
                    for j in 0..ny {
                        let edge_distance = i.min(nx - 1 - i).min(j).min(ny - 1 - j);
                        if edge_distance < width {
                            mask[grid.index(i, j)] = true;
                        }
                    }
                }
            }
        }

        let (boundary, interior): (Vec<usize>, Vec<usize>) =
            (0..mask.len()).partition(|&k| mask[k]);
        Self {
            boundary_mask: mask,
            boundary,
            interior,
        }
    }

    pub fn boundary(&self) -> &[usize] {
        &self.boundary
    }

    pub fn interior(&self) -> &[usize] {
        &self.interior
    }

    pub fn is_boundary(&self, k: usize) -> bool {
        self.boundary_mask.get(k).copied().unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.boundary_mask.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boundary_mask.is_empty()
    }
}

/// How each conditional block is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionalDraw {
    /// `tau · Q` used as a covariance through its eigen square root.
    #[default]
    Direct,
    /// Cholesky of `tau · Q` as a precision, then back substitution.
    Backsolve,
}

/// Parameters of the boundary-conditioned sampler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditionalSpec {
    pub kernel: CorrelationKernel,
    pub bandwidth: f64,
    pub radius: Option<f64>,
    pub tau: f64,
    pub layout: BoundaryLayout,
    pub draw: ConditionalDraw,
    pub anisotropy: Option<Anisotropy>,
}

impl Default for ConditionalSpec {
    fn default() -> Self {
        Self {
            kernel: CorrelationKernel::Gaussian,
            bandwidth: 1.0,
            radius: Some(20.0),
            tau: 0.1,
            layout: BoundaryLayout::default(),
            draw: ConditionalDraw::Direct,
            anisotropy: None,
        }
    }
}

/// Truncated kernel blocks `Q_AA`, `Q_BB` (unit diagonal) and `Q_AB`.
struct ConditionalBlocks {
    q_aa: Array2<f64>,
    q_ab: Array2<f64>,
    q_bb: Array2<f64>,
}

fn conditional_blocks(
    grid: &Grid,
    partition: &GridPartition,
    spec: &ConditionalSpec,
) -> Result<ConditionalBlocks, FieldError> {
    let radius = match spec.radius {
        Some(r) => {
            ensure_non_negative("radius", r)?;
            r
        }
        None => f64::INFINITY,
    };
    let aniso = spec.anisotropy.as_ref();
    let pts_a = grid.points().select(Axis(0), partition.interior());
    let pts_b = grid.points().select(Axis(0), partition.boundary());

    let square_block = |pts: &Array2<f64>| -> Result<Array2<f64>, FieldError> {
        let d = pairwise_distance(pts.view(), aniso)?;
        let k = apply_kernel(d.view(), spec.kernel, spec.bandwidth)?;
        truncate_to_neighbors(k, d.view(), radius, true)
    };
    let q_aa = square_block(&pts_a)?;
    let q_bb = square_block(&pts_b)?;

    let d_ab = cross_distance(pts_a.view(), pts_b.view(), aniso)?;
    let k_ab = apply_kernel(d_ab.view(), spec.kernel, spec.bandwidth)?;
    let q_ab = truncate_to_neighbors(k_ab, d_ab.view(), radius, false)?;

    Ok(ConditionalBlocks { q_aa, q_ab, q_bb })
}

fn draw_block<R: rand::Rng + ?Sized>(
    scaled: &Array2<f64>,
    mean: &Array1<f64>,
    draw: ConditionalDraw,
    label: &str,
    rng: &mut R,
) -> Result<Array1<f64>, FieldError> {
    if scaled.nrows() == 0 {
        return Ok(Array1::zeros(0));
    }
    let factor = match draw {
        ConditionalDraw::Direct => DecompositionFactor::eigen_root(scaled, label)?,
        ConditionalDraw::Backsolve => DecompositionFactor::cholesky(scaled, label)?,
    };
    let theta = standard_normal_vector(factor.dim(), rng);
    factor.transform(&theta, Some(mean))
}

/// Mean of the interior block given the boundary draw, `-tau Q_AB x_B`.
fn interior_mean(q_ab: &Array2<f64>, x_b: &Array1<f64>, tau: f64) -> Array1<f64> {
    q_ab.dot(x_b) * -tau
}

/// Draws the boundary block first, then the interior conditioned on it.
///
/// `x_B ~ N(0, tau Q_BB)` and `x_A ~ N(-tau Q_AB x_B, tau Q_AA)`; the two
/// blocks are written back at their grid positions. Empty blocks are allowed.
pub fn sample_conditional<R: rand::Rng + ?Sized>(
    grid: &Grid,
    spec: &ConditionalSpec,
    rng: &mut R,
) -> Result<Array1<f64>, FieldError> {
    ensure_positive("tau", spec.tau)?;
    let partition = GridPartition::new(grid, spec.layout);
    let blocks = conditional_blocks(grid, &partition, spec)?;
    log::debug!(
        "conditional sampling: {} boundary points, {} interior points",
        partition.boundary().len(),
        partition.interior().len()
    );

    let tau = spec.tau;
    let x_b = draw_block(
        &(&blocks.q_bb * tau),
        &Array1::zeros(partition.boundary().len()),
        spec.draw,
        "tau * Q_BB",
        rng,
    )?;
    let mean_a = interior_mean(&blocks.q_ab, &x_b, tau);
    let x_a = draw_block(&(&blocks.q_aa * tau), &mean_a, spec.draw, "tau * Q_AA", rng)?;

    let mut z = Array1::<f64>::zeros(grid.len());
    for (&k, &v) in partition.interior().iter().zip(x_a.iter()) {
        z[k] = v;
    }
    for (&k, &v) in partition.boundary().iter().zip(x_b.iter()) {
        z[k] = v;
    }
    Ok(z)
}

/// Seed for replicate `index` of a batch started from `seed`.
pub fn replicate_seed(seed: u64, index: usize) -> u64 {
    // splitmix64 finalizer over the pair.
    let mut z = seed.wrapping_add((index as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Draws `count` independent fields in parallel.
///
/// Replicate `r` receives its own `StdRng` seeded from `replicate_seed(seed, r)`.
pub fn sample_replicates<F>(
    count: usize,
    seed: u64,
    draw: F,
) -> Result<Vec<Array1<f64>>, FieldError>
where
    F: Fn(&mut StdRng) -> Result<Array1<f64>, FieldError> + Sync,
{
    (0..count)
        .into_par_iter()
        .map(|r| {
            let mut rng = StdRng::seed_from_u64(replicate_seed(seed, r));
            draw(&mut rng)
        })
        .collect()
}
