//! Tensor-product B-spline surfaces and 1-D curves over field coefficients.
//!
//! Knot vectors are uniform and unclamped: `v + degree + 1` equally spaced
//! knots spanning the axis domain for `v` coefficients. Points outside the
//! base interval `[t_degree, t_v]` are evaluated on the nearest boundary
//! polynomial piece, so the surface extrapolates instead of dropping to zero.

use crate::error::{FieldError, ensure_positive};
use crate::grid::Grid;
use crate::types::Coefficients;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

/// Degree used when none is requested.
pub const DEFAULT_DEGREE: usize = 2;

fn validate_domain(name: &'static str, domain: (f64, f64)) -> Result<(), FieldError> {
    let (start, stop) = domain;
    if !(start.is_finite() && stop.is_finite()) || stop <= start {
        return Err(FieldError::invalid_parameter(
            name,
            stop - start,
            "domain must be finite with stop > start",
        ));
    }
    Ok(())
}

fn validate_degree(degree: usize, num_basis: usize) -> Result<(), FieldError> {
    if degree == 0 {
        return Err(FieldError::invalid_parameter(
            "degree",
            0.0,
            "spline degree must be at least 1",
        ));
    }
    if num_basis < degree + 1 {
        return Err(FieldError::invalid_parameter(
            "degree",
            degree as f64,
            "each axis needs at least degree + 1 coefficients",
        ));
    }
    Ok(())
}

/// Bivariate tensor-product spline `f(x, y) = Σ_ij c_ij B_i(x) B_j(y)`.
#[derive(Debug, Clone)]
pub struct Surface {
    knots_x: Array1<f64>,
    knots_y: Array1<f64>,
    degree: usize,
    coefficients: Array2<f64>,
}

impl Surface {
    /// Builds a surface from an `(nx, ny)` coefficient array over the given domains.
    pub fn new(
        coefficients: Array2<f64>,
        domain_x: (f64, f64),
        domain_y: (f64, f64),
        degree: usize,
    ) -> Result<Self, FieldError> {
        validate_domain("domain_x", domain_x)?;
        validate_domain("domain_y", domain_y)?;
        let (nx, ny) = coefficients.dim();
        validate_degree(degree, nx.min(ny))?;
        if coefficients.iter().any(|c| !c.is_finite()) {
            return Err(FieldError::invalid_parameter(
                "coefficients",
                f64::NAN,
                "coefficients must be finite",
            ));
        }
        Ok(Self {
            knots_x: bspline::uniform_knot_vector(domain_x, nx, degree),
            knots_y: bspline::uniform_knot_vector(domain_y, ny, degree),
            degree,
            coefficients,
        })
    }

    /// Reshapes `v²` coefficients to `v × v` with `c[[i, j]] = z[i * v + j]`.
    pub fn from_coefficients(
        z: &Coefficients,
        domain_x: (f64, f64),
        domain_y: (f64, f64),
        degree: usize,
    ) -> Result<Self, FieldError> {
        let side = z.square_side()?;
        Self::new(z.to_mesh(side, side)?, domain_x, domain_y, degree)
    }

    /// Uses the grid's shape and axis domains; `z` must hold `nx * ny` values.
    pub fn from_grid(z: &Coefficients, grid: &Grid, degree: usize) -> Result<Self, FieldError> {
        let (nx, ny) = grid.shape();
        let (domain_x, domain_y) = grid.domain();
        Self::new(z.to_mesh(nx, ny)?, domain_x, domain_y, degree)
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    pub fn knots(&self) -> (&Array1<f64>, &Array1<f64>) {
        (&self.knots_x, &self.knots_y)
    }

    pub fn coefficients(&self) -> &Array2<f64> {
        &self.coefficients
    }

    /// Per-axis Greville abscissae, the natural location of each coefficient.
    pub fn greville_abscissae(&self) -> (Array1<f64>, Array1<f64>) {
        let (nx, ny) = self.coefficients.dim();
        (
            bspline::greville_abscissae(self.knots_x.view(), self.degree, nx),
            bspline::greville_abscissae(self.knots_y.view(), self.degree, ny),
        )
    }

    pub fn evaluate_point(&self, x: f64, y: f64) -> f64 {
        let mut scratch = SurfaceScratch::new(self.degree);
        self.evaluate_with(x, y, &mut scratch)
    }

    /// Evaluates at each row of an `(n, 2)` point array.
    pub fn evaluate(&self, points: ArrayView2<'_, f64>) -> Result<Array1<f64>, FieldError> {
        if points.ncols() != 2 {
            return Err(FieldError::DimensionMismatch(format!(
                "surface evaluation needs (n, 2) points, got {} columns",
                points.ncols()
            )));
        }
        let mut scratch = SurfaceScratch::new(self.degree);
        Ok(Array1::from_shape_fn(points.nrows(), |k| {
            self.evaluate_with(points[[k, 0]], points[[k, 1]], &mut scratch)
        }))
    }

    /// Values on the lattice `xs × ys`, shaped `(xs.len(), ys.len())`.
    pub fn evaluate_lattice(&self, xs: ArrayView1<'_, f64>, ys: ArrayView1<'_, f64>) -> Array2<f64> {
        let mut scratch = SurfaceScratch::new(self.degree);
        Array2::from_shape_fn((xs.len(), ys.len()), |(i, j)| {
            self.evaluate_with(xs[i], ys[j], &mut scratch)
        })
    }

    fn evaluate_with(&self, x: f64, y: f64, scratch: &mut SurfaceScratch) -> f64 {
        let (nx, ny) = self.coefficients.dim();
        let sx = bspline::evaluate_splines_sparse_into(
            x,
            self.degree,
            self.knots_x.view(),
            nx,
            &mut scratch.bx,
            &mut scratch.inner,
        );
        let sy = bspline::evaluate_splines_sparse_into(
            y,
            self.degree,
            self.knots_y.view(),
            ny,
            &mut scratch.by,
            &mut scratch.inner,
        );
        let mut acc = 0.0;
        for (a, &bx) in scratch.bx.iter().enumerate() {
            if bx == 0.0 {
                continue;
            }
            let row = self.coefficients.row(sx + a);
            let mut inner = 0.0;
            for (b, &by) in scratch.by.iter().enumerate() {
                inner += by * row[sy + b];
            }
            acc += bx * inner;
        }
        acc
    }
}

struct SurfaceScratch {
    bx: Vec<f64>,
    by: Vec<f64>,
    inner: bspline::BsplineScratch,
}

impl SurfaceScratch {
    fn new(degree: usize) -> Self {
        Self {
            bx: vec![0.0; degree + 1],
            by: vec![0.0; degree + 1],
            inner: bspline::BsplineScratch::new(degree),
        }
    }
}

/// Univariate spline `f(x) = Σ_j γ_j B_j(x)` on a uniform knot vector.
#[derive(Debug, Clone)]
pub struct Curve {
    knots: Array1<f64>,
    degree: usize,
    coefficients: Array1<f64>,
}

impl Curve {
    pub fn new(
        coefficients: Array1<f64>,
        domain: (f64, f64),
        degree: usize,
    ) -> Result<Self, FieldError> {
        validate_domain("domain", domain)?;
        validate_degree(degree, coefficients.len())?;
        Ok(Self {
            knots: bspline::uniform_knot_vector(domain, coefficients.len(), degree),
            degree,
            coefficients,
        })
    }

    /// Curve whose coefficients follow a Gaussian random walk,
    /// `γ_j = γ_{j-1} + N(0, coef_scale)` with `γ_{-1} = 0`.
    ///
    /// `coef_scale` is the step variance.
    pub fn random_walk<R: rand::Rng + ?Sized>(
        domain: (f64, f64),
        n_basis: usize,
        coef_scale: f64,
        degree: usize,
        rng: &mut R,
    ) -> Result<Self, FieldError> {
        ensure_positive("coef_scale", coef_scale)?;
        let step = rand_distr::Normal::new(0.0, coef_scale.sqrt()).map_err(|_| {
            FieldError::invalid_parameter(
                "coef_scale",
                coef_scale,
                "random-walk step variance must be finite and > 0",
            )
        })?;
        let mut gamma = Array1::<f64>::zeros(n_basis);
        let mut level = 0.0;
        for g in gamma.iter_mut() {
            level += rand_distr::Distribution::sample(&step, rng);
            *g = level;
        }
        Self::new(gamma, domain, degree)
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    pub fn knots(&self) -> &Array1<f64> {
        &self.knots
    }

    pub fn coefficients(&self) -> &Array1<f64> {
        &self.coefficients
    }

    pub fn greville_abscissae(&self) -> Array1<f64> {
        bspline::greville_abscissae(self.knots.view(), self.degree, self.coefficients.len())
    }

    pub fn evaluate_point(&self, x: f64) -> f64 {
        let mut values = vec![0.0; self.degree + 1];
        let mut scratch = bspline::BsplineScratch::new(self.degree);
        self.evaluate_with(x, &mut values, &mut scratch)
    }

    pub fn evaluate(&self, xs: ArrayView1<'_, f64>) -> Array1<f64> {
        let mut values = vec![0.0; self.degree + 1];
        let mut scratch = bspline::BsplineScratch::new(self.degree);
        xs.mapv(|x| self.evaluate_with(x, &mut values, &mut scratch))
    }

    fn evaluate_with(
        &self,
        x: f64,
        values: &mut [f64],
        scratch: &mut bspline::BsplineScratch,
    ) -> f64 {
        let start = bspline::evaluate_splines_sparse_into(
            x,
            self.degree,
            self.knots.view(),
            self.coefficients.len(),
            values,
            scratch,
        );
        values
            .iter()
            .enumerate()
            .map(|(i, b)| b * self.coefficients[start + i])
            .sum()
    }
}

pub(crate) mod bspline {
    use ndarray::{Array1, ArrayView1};

    /// Reused buffers for the Cox-de Boor recurrence.
    #[derive(Clone, Debug)]
    pub struct BsplineScratch {
        left: Vec<f64>,
        right: Vec<f64>,
    }

    impl BsplineScratch {
        pub fn new(degree: usize) -> Self {
            Self {
                left: vec![0.0; degree + 1],
                right: vec![0.0; degree + 1],
            }
        }
    }

    /// `num_basis + degree + 1` equally spaced knots from `start` to `stop`.
    pub fn uniform_knot_vector(domain: (f64, f64), num_basis: usize, degree: usize) -> Array1<f64> {
        let (start, stop) = domain;
        let m = num_basis + degree + 1;
        let h = (stop - start) / (m - 1) as f64;
        Array1::from_shape_fn(m, |k| if k == m - 1 { stop } else { start + k as f64 * h })
    }

    /// `G_j = (t_{j+1} + ... + t_{j+degree}) / degree`.
    pub fn greville_abscissae(
        knots: ArrayView1<'_, f64>,
        degree: usize,
        num_basis: usize,
    ) -> Array1<f64> {
        let d_inv = 1.0 / degree as f64;
        Array1::from_shape_fn(num_basis, |j| {
            (1..=degree).map(|k| knots[j + k]).sum::<f64>() * d_inv
        })
    }

    /// Evaluates the `degree + 1` basis functions that can be non-zero at `x`
    /// into `values` and returns the index of the first one.
    ///
    /// Outside the base interval the boundary span is used, which extends the
    /// boundary polynomial piece.
    #[inline]
    pub fn evaluate_splines_sparse_into(
        x: f64,
        degree: usize,
        knots: ArrayView1<'_, f64>,
        num_basis: usize,
        values: &mut [f64],
        scratch: &mut BsplineScratch,
    ) -> usize {
        debug_assert_eq!(values.len(), degree + 1);
        debug_assert_eq!(knots.len(), num_basis + degree + 1);

        let mu = if x >= knots[num_basis] {
            num_basis - 1
        } else if x < knots[degree] {
            degree
        } else {
            let mut span = degree;
            while span < num_basis - 1 && x >= knots[span + 1] {
                span += 1;
            }
            span
        };

        let left = &mut scratch.left;
        let right = &mut scratch.right;
        values.fill(0.0);
        values[0] = 1.0;

        for d in 1..=degree {
            left[d] = x - knots[mu + 1 - d];
            right[d] = knots[mu + d] - x;

            let mut saved = 0.0;
            for r in 0..d {
                let den = right[r + 1] + left[d - r];
                let temp = if den.abs() > 1e-12 { values[r] / den } else { 0.0 };
                values[r] = saved + right[r + 1] * temp;
                saved = left[d - r] * temp;
            }
            values[d] = saved;
        }

        mu - degree
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::AxisSpec;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn knots_span_the_domain() {
        let z = Coefficients::zeros(16);
        let s = Surface::from_coefficients(&z, (0.0, 10.0), (-1.0, 1.0), 2).unwrap();
        let (kx, ky) = s.knots();
        assert_eq!(kx.len(), 4 + 2 + 1);
        assert_eq!(kx[0], 0.0);
        assert_eq!(kx[6], 10.0);
        assert_eq!(ky[0], -1.0);
        assert_eq!(ky[6], 1.0);
        assert_abs_diff_eq!(kx[1] - kx[0], 10.0 / 6.0, epsilon = 1e-12);
    }

    #[test]
    fn non_square_coefficient_count_is_rejected() {
        let z = Coefficients::zeros(10);
        assert!(matches!(
            Surface::from_coefficients(&z, (0.0, 1.0), (0.0, 1.0), 2),
            Err(FieldError::NonSquareCoefficientCount { len: 10 })
        ));
    }

    #[test]
    fn degree_is_validated() {
        let z = Coefficients::zeros(9);
        assert!(Surface::from_coefficients(&z, (0.0, 1.0), (0.0, 1.0), 0).is_err());
        assert!(Surface::from_coefficients(&z, (0.0, 1.0), (0.0, 1.0), 3).is_err());
        assert!(Surface::from_coefficients(&z, (0.0, 1.0), (0.0, 1.0), 2).is_ok());
        assert!(Surface::from_coefficients(&z, (1.0, 1.0), (0.0, 1.0), 2).is_err());
    }

    #[test]
    fn constant_coefficients_give_constant_surface_everywhere() {
        let z = Coefficients::new(Array1::from_elem(25, 3.5));
        for degree in 1..=3 {
            let s = Surface::from_coefficients(&z, (0.0, 10.0), (0.0, 10.0), degree).unwrap();
            for &(x, y) in &[
                (0.0, 0.0),
                (5.0, 5.0),
                (9.99, 0.01),
                (10.0, 10.0),
                (-3.0, 4.0),
                (14.0, -2.0),
            ] {
                assert_abs_diff_eq!(s.evaluate_point(x, y), 3.5, epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn degree_one_interpolates_at_greville_abscissae() {
        for v in 2..=5 {
            let z = Coefficients::new(Array1::from_shape_fn(v * v, |k| (k as f64).sin() + 0.1 * k as f64));
            let s = Surface::from_coefficients(&z, (0.0, 10.0), (0.0, 10.0), 1).unwrap();
            let (gx, gy) = s.greville_abscissae();
            assert_eq!(gx.len(), v);
            for i in 0..v {
                for j in 0..v {
                    assert_abs_diff_eq!(
                        s.evaluate_point(gx[i], gy[j]),
                        z[i * v + j],
                        epsilon = 1e-10
                    );
                }
            }
        }
    }

    #[test]
    fn linear_coefficients_reproduce_linear_function() {
        // Coefficients sampled at the Greville abscissae reproduce linear functions.
        let reference = Surface::from_coefficients(&Coefficients::zeros(36), (0.0, 5.0), (0.0, 5.0), 2)
            .unwrap();
        let (gx, gy) = reference.greville_abscissae();
        let f = |x: f64, y: f64| 1.0 + 2.0 * x - 0.5 * y;
        let z = Coefficients::new(Array1::from_shape_fn(36, |k| f(gx[k / 6], gy[k % 6])));
        let s = Surface::from_coefficients(&z, (0.0, 5.0), (0.0, 5.0), 2).unwrap();
        for &(x, y) in &[(1.0, 1.0), (2.3, 3.7), (4.9, 0.2), (6.0, -1.0)] {
            assert_abs_diff_eq!(s.evaluate_point(x, y), f(x, y), epsilon = 1e-9);
        }
    }

    #[test]
    fn batch_and_lattice_evaluation_agree_with_pointwise() {
        let z = Coefficients::new(Array1::from_shape_fn(16, |k| k as f64 * 0.3 - 1.0));
        let s = Surface::from_coefficients(&z, (0.0, 3.0), (0.0, 3.0), 2).unwrap();
        let pts = array![[0.5, 0.5], [1.25, 2.0], [2.9, 0.1]];
        let batch = s.evaluate(pts.view()).unwrap();
        for k in 0..3 {
            assert_eq!(batch[k], s.evaluate_point(pts[[k, 0]], pts[[k, 1]]));
        }
        let xs = array![0.5, 1.5];
        let ys = array![0.25, 1.0, 2.75];
        let lattice = s.evaluate_lattice(xs.view(), ys.view());
        assert_eq!(lattice.dim(), (2, 3));
        assert_eq!(lattice[[1, 2]], s.evaluate_point(1.5, 2.75));
        assert!(s.evaluate(array![[1.0, 2.0, 3.0]].view()).is_err());
    }

    #[test]
    fn from_grid_accepts_rectangular_coefficients() {
        let grid = Grid::new(AxisSpec::new(0.0, 4.0, 1.0), AxisSpec::new(0.0, 3.0, 1.0)).unwrap();
        let z = Coefficients::new(Array1::from_elem(12, -2.0));
        let s = Surface::from_grid(&z, &grid, 2).unwrap();
        assert_eq!(s.coefficients().dim(), (4, 3));
        assert_abs_diff_eq!(s.evaluate_point(1.7, 0.4), -2.0, epsilon = 1e-12);
        assert!(matches!(
            Surface::from_grid(&Coefficients::zeros(11), &grid, 2),
            Err(FieldError::DimensionMismatch(_))
        ));
    }

    #[test]
    fn random_walk_curve_is_reproducible_and_partitions_unity() {
        let a = Curve::random_walk((0.0, 10.0), 8, 0.5, 2, &mut StdRng::seed_from_u64(4)).unwrap();
        let b = Curve::random_walk((0.0, 10.0), 8, 0.5, 2, &mut StdRng::seed_from_u64(4)).unwrap();
        assert_eq!(a.coefficients(), b.coefficients());
        assert_eq!(a.knots().len(), 8 + 2 + 1);

        let flat = Curve::new(Array1::from_elem(8, 1.25), (0.0, 10.0), 2).unwrap();
        let xs = array![-1.0, 0.0, 3.3, 10.0, 12.0];
        for v in flat.evaluate(xs.view()).iter() {
            assert_abs_diff_eq!(*v, 1.25, epsilon = 1e-12);
        }
        assert!(Curve::random_walk((0.0, 1.0), 4, 0.0, 2, &mut StdRng::seed_from_u64(0)).is_err());
    }
}
