//! Rectangular coordinate grids.
//!
//! Ordering convention used by every downstream component: the x-axis is the
//! outer index and the y-axis the inner index, so flattened point
//! `k = i * ny + j` sits at `(x[i], y[j])`. Mesh arrays are shaped `(nx, ny)`
//! and a row-major flatten of either mesh matches the point list.

use crate::error::FieldError;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// Relative slack used when deciding whether the last `arange` point
/// coincides with `stop` after floating-point accumulation.
const ARANGE_REL_TOL: f64 = 1e-9;

/// Half-open axis `start, start + step, ...` strictly below `stop`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisSpec {
    pub start: f64,
    pub stop: f64,
    pub step: f64,
}

impl AxisSpec {
    pub fn new(start: f64, stop: f64, step: f64) -> Self {
        Self { start, stop, step }
    }

    fn validate(&self, axis: &'static str) -> Result<(), FieldError> {
        let finite = self.start.is_finite() && self.stop.is_finite() && self.step.is_finite();
        if !finite || self.stop <= self.start || self.step <= 0.0 {
            return Err(FieldError::InvalidGrid {
                axis,
                start: self.start,
                stop: self.stop,
                step: self.step,
            });
        }
        Ok(())
    }

    /// Number of points produced by the axis (always at least one).
    pub fn num_points(&self) -> usize {
        let raw = (self.stop - self.start) / self.step;
        let mut n = raw.ceil();
        if n > 1.0 && n - 1.0 >= raw - ARANGE_REL_TOL * raw.max(1.0) {
            n -= 1.0;
        }
        n.max(1.0) as usize
    }

    /// Axis coordinates, computed as `start + k * step` without accumulation.
    pub fn values(&self) -> Array1<f64> {
        Array1::from_shape_fn(self.num_points(), |k| self.start + k as f64 * self.step)
    }
}

impl From<(f64, f64, f64)> for AxisSpec {
    fn from((start, stop, step): (f64, f64, f64)) -> Self {
        Self::new(start, stop, step)
    }
}

/// Immutable rectangular grid with its mesh and flattened point list.
#[derive(Debug, Clone)]
pub struct Grid {
    x_spec: AxisSpec,
    y_spec: AxisSpec,
    x: Array1<f64>,
    y: Array1<f64>,
    mesh_x: Array2<f64>,
    mesh_y: Array2<f64>,
    points: Array2<f64>,
}

impl Grid {
    pub fn new(x_spec: AxisSpec, y_spec: AxisSpec) -> Result<Self, FieldError> {
        x_spec.validate("x")?;
        y_spec.validate("y")?;

        let x = x_spec.values();
        let y = y_spec.values();
        let (nx, ny) = (x.len(), y.len());

        let mesh_x = Array2::from_shape_fn((nx, ny), |(i, _)| x[i]);
        let mesh_y = Array2::from_shape_fn((nx, ny), |(_, j)| y[j]);

        let mut points = Array2::<f64>::zeros((nx * ny, 2));
        for i in 0..nx {
            for j in 0..ny {
                let k = i * ny + j;
                points[[k, 0]] = x[i];
                points[[k, 1]] = y[j];
            }
        }

        log::debug!("built {nx}x{ny} grid ({} points)", nx * ny);

        Ok(Self {
            x_spec,
            y_spec,
            x,
            y,
            mesh_x,
            mesh_y,
            points,
        })
    }

    pub fn x_axis(&self) -> &Array1<f64> {
        &self.x
    }

    pub fn y_axis(&self) -> &Array1<f64> {
        &self.y
    }

    pub fn x_spec(&self) -> AxisSpec {
        self.x_spec
    }

    pub fn y_spec(&self) -> AxisSpec {
        self.y_spec
    }

    /// `(mesh_x, mesh_y)`, both shaped `(nx, ny)`.
    pub fn mesh(&self) -> (&Array2<f64>, &Array2<f64>) {
        (&self.mesh_x, &self.mesh_y)
    }

    /// Flattened `(n, 2)` point list in x-outer / y-inner order.
    pub fn points(&self) -> &Array2<f64> {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.points.nrows() == 0
    }

    /// `(nx, ny)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.x.len(), self.y.len())
    }

    #[inline]
    pub fn index(&self, i: usize, j: usize) -> usize {
        i * self.y.len() + j
    }

    #[inline]
    pub fn position(&self, k: usize) -> (usize, usize) {
        let ny = self.y.len();
        (k / ny, k % ny)
    }

    /// `(start, stop)` of each axis specification.
    pub fn domain(&self) -> ((f64, f64), (f64, f64)) {
        (
            (self.x_spec.start, self.x_spec.stop),
            (self.y_spec.start, self.y_spec.stop),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_count_is_product_of_axis_lengths() {
        for (xs, ys) in [
            ((0.0, 10.0, 0.5), (0.0, 10.0, 0.5)),
            ((0.0, 3.0, 1.0), (-1.0, 1.0, 0.25)),
            ((2.0, 2.5, 1.0), (0.0, 0.3, 0.1)),
        ] {
            let grid = Grid::new(xs.into(), ys.into()).unwrap();
            let (nx, ny) = grid.shape();
            assert_eq!(grid.len(), nx * ny);
            assert_eq!(grid.points().nrows(), nx * ny);
            assert_eq!(grid.mesh().0.dim(), (nx, ny));
        }
    }

    #[test]
    fn arange_semantics_exclude_stop() {
        let axis = AxisSpec::new(0.0, 10.0, 0.5);
        assert_eq!(axis.num_points(), 20);
        assert_eq!(axis.values()[19], 9.5);

        // 0.3 / 0.1 = 2.9999999999999996 in floating point.
        assert_eq!(AxisSpec::new(0.0, 0.3, 0.1).num_points(), 3);
        assert_eq!(AxisSpec::new(0.0, 1.0, 0.1).num_points(), 10);
        assert_eq!(AxisSpec::new(0.0, 1.0, 3.0).num_points(), 1);
    }

    #[test]
    fn ordering_is_x_outer_y_inner_and_stable() {
        let grid = Grid::new((0.0, 3.0, 1.0).into(), (10.0, 12.0, 1.0).into()).unwrap();
        let pts = grid.points();
        let expected = [
            [0.0, 10.0],
            [0.0, 11.0],
            [1.0, 10.0],
            [1.0, 11.0],
            [2.0, 10.0],
            [2.0, 11.0],
        ];
        for (k, row) in expected.iter().enumerate() {
            assert_eq!(pts[[k, 0]], row[0]);
            assert_eq!(pts[[k, 1]], row[1]);
            let (i, j) = grid.position(k);
            assert_eq!(grid.index(i, j), k);
        }

        let (mx, my) = grid.mesh();
        let flat_x: Vec<f64> = mx.iter().copied().collect();
        let flat_y: Vec<f64> = my.iter().copied().collect();
        assert_eq!(flat_x, pts.column(0).to_vec());
        assert_eq!(flat_y, pts.column(1).to_vec());

        let again = Grid::new((0.0, 3.0, 1.0).into(), (10.0, 12.0, 1.0).into()).unwrap();
        assert_eq!(again.points(), grid.points());
    }

    #[test]
    fn invalid_axes_are_rejected_with_values() {
        let cases = [
            (AxisSpec::new(1.0, 1.0, 0.5), "x"),
            (AxisSpec::new(2.0, 1.0, 0.5), "x"),
            (AxisSpec::new(0.0, 1.0, 0.0), "x"),
            (AxisSpec::new(0.0, 1.0, -0.5), "x"),
            (AxisSpec::new(0.0, f64::NAN, 0.5), "x"),
        ];
        for (spec, axis_name) in cases {
            match Grid::new(spec, AxisSpec::new(0.0, 1.0, 0.5)) {
                Err(FieldError::InvalidGrid { axis, step, .. }) => {
                    assert_eq!(axis, axis_name);
                    assert!(step == spec.step || step.is_nan());
                }
                other => panic!("expected InvalidGrid, got {other:?}"),
            }
        }
        assert!(matches!(
            Grid::new(AxisSpec::new(0.0, 1.0, 0.5), AxisSpec::new(0.0, -1.0, 0.5)),
            Err(FieldError::InvalidGrid { axis: "y", .. })
        ));
    }
}
