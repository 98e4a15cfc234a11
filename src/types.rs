use crate::error::FieldError;
use ndarray::{Array1, Array2};
use std::ops::{Deref, DerefMut};

/// One field value per grid point, in x-outer / y-inner order.
#[repr(transparent)]
#[derive(Clone, Debug, PartialEq)]
pub struct Coefficients(pub Array1<f64>);

impl Coefficients {
    pub fn new(values: Array1<f64>) -> Self {
        Self(values)
    }

    pub fn zeros(len: usize) -> Self {
        Self(Array1::zeros(len))
    }

    /// Side length `v` when the vector holds `v²` values.
    pub fn square_side(&self) -> Result<usize, FieldError> {
        let len = self.0.len();
        let mut side = (len as f64).sqrt().round() as usize;
        // Guard the float estimate against off-by-one for large lengths.
        while side * side > len {
            side -= 1;
        }
        while (side + 1) * (side + 1) <= len {
            side += 1;
        }
        if side == 0 || side * side != len {
            return Err(FieldError::NonSquareCoefficientCount { len });
        }
        Ok(side)
    }

    /// Row-major reshape to `(nx, ny)`: `c[[i, j]] = z[i * ny + j]`.
    pub fn to_mesh(&self, nx: usize, ny: usize) -> Result<Array2<f64>, FieldError> {
        if nx * ny != self.0.len() {
            return Err(FieldError::DimensionMismatch(format!(
                "{} coefficients cannot fill a {nx}x{ny} grid",
                self.0.len()
            )));
        }
        Ok(Array2::from_shape_fn((nx, ny), |(i, j)| self.0[i * ny + j]))
    }
}

impl Deref for Coefficients {
    type Target = Array1<f64>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Coefficients {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl AsRef<Array1<f64>> for Coefficients {
    fn as_ref(&self) -> &Array1<f64> {
        &self.0
    }
}

impl From<Array1<f64>> for Coefficients {
    fn from(values: Array1<f64>) -> Self {
        Self(values)
    }
}

impl From<Coefficients> for Array1<f64> {
    fn from(values: Coefficients) -> Self {
        values.0
    }
}
