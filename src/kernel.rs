use crate::error::{FieldError, ensure_non_negative, ensure_positive};
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Geometric anisotropy: rotate by `angle` (radians), then stretch the first
/// rotated axis by `scale`.
///
/// The induced quadratic form is `A = R^T diag(1/scale, 1) R` with
/// `R = [[cos φ, sin φ], [-sin φ, cos φ]]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Anisotropy {
    pub angle: f64,
    pub scale: f64,
}

impl Default for Anisotropy {
    fn default() -> Self {
        Self {
            angle: 0.0,
            scale: 1.0,
        }
    }
}

impl Anisotropy {
    pub fn new(angle: f64, scale: f64) -> Self {
        Self { angle, scale }
    }

    /// True when the quadratic form reduces to the identity.
    pub fn is_isotropic(&self) -> bool {
        self.angle == 0.0 && self.scale == 1.0
    }

    fn validate(&self) -> Result<(), FieldError> {
        ensure_positive("anisotropy.scale", self.scale)?;
        if !self.angle.is_finite() {
            return Err(FieldError::invalid_parameter(
                "anisotropy.angle",
                self.angle,
                "must be finite",
            ));
        }
        Ok(())
    }

    pub fn quadratic_form(&self) -> [[f64; 2]; 2] {
        let (s, c) = self.angle.sin_cos();
        let inv = 1.0 / self.scale;
        // R^T diag(inv, 1) R, expanded.
        [
            [c * c * inv + s * s, c * s * inv - s * c],
            [s * c * inv - c * s, s * s * inv + c * c],
        ]
    }
}

#[inline]
fn quadratic_distance(form: &[[f64; 2]; 2], dx: f64, dy: f64) -> f64 {
    let q = form[0][0] * dx * dx + (form[0][1] + form[1][0]) * dx * dy + form[1][1] * dy * dy;
    q.max(0.0).sqrt()
}

fn check_point_columns(label: &str, points: ArrayView2<'_, f64>) -> Result<(), FieldError> {
    if points.ncols() != 2 {
        return Err(FieldError::DimensionMismatch(format!(
            "{label} must have 2 columns (x, y), got {}",
            points.ncols()
        )));
    }
    Ok(())
}

fn effective_form(anisotropy: Option<&Anisotropy>) -> Result<Option<[[f64; 2]; 2]>, FieldError> {
    match anisotropy {
        Some(a) => {
            a.validate()?;
            Ok((!a.is_isotropic()).then(|| a.quadratic_form()))
        }
        None => Ok(None),
    }
}

/// Pairwise distances between all rows of an `(n, 2)` point array.
///
/// Plain Euclidean unless a non-identity [`Anisotropy`] is given, in which
/// case `sqrt((u - v)^T A (u - v))` is used. Result is symmetric with an
/// exactly zero diagonal.
pub fn pairwise_distance(
    points: ArrayView2<'_, f64>,
    anisotropy: Option<&Anisotropy>,
) -> Result<Array2<f64>, FieldError> {
    check_point_columns("points", points)?;
    let form = effective_form(anisotropy)?;
    let n = points.nrows();
    let mut dist = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in (i + 1)..n {
            let dx = points[[i, 0]] - points[[j, 0]];
            let dy = points[[i, 1]] - points[[j, 1]];
            let d = match &form {
                Some(f) => quadratic_distance(f, dx, dy),
                None => dx.hypot(dy),
            };
            dist[[i, j]] = d;
            dist[[j, i]] = d;
        }
    }
    Ok(dist)
}

/// Rectangular `(a.nrows(), b.nrows())` distances between two point sets.
pub fn cross_distance(
    a: ArrayView2<'_, f64>,
    b: ArrayView2<'_, f64>,
    anisotropy: Option<&Anisotropy>,
) -> Result<Array2<f64>, FieldError> {
    check_point_columns("a", a)?;
    check_point_columns("b", b)?;
    let form = effective_form(anisotropy)?;
    Ok(Array2::from_shape_fn((a.nrows(), b.nrows()), |(i, j)| {
        let dx = a[[i, 0]] - b[[j, 0]];
        let dy = a[[i, 1]] - b[[j, 1]];
        match &form {
            Some(f) => quadratic_distance(f, dx, dy),
            None => dx.hypot(dy),
        }
    }))
}

/// Stationary correlation functions of distance. All equal 1 at `h = 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum CorrelationKernel {
    /// `exp(-(h/λ)^2)`
    Gaussian,
    /// `exp(-h/λ)`
    Exponential,
    /// Matérn ν = 3/2.
    Matern32,
    /// Matérn ν = 5/2.
    Matern52,
}

impl CorrelationKernel {
    #[inline]
    pub fn evaluate(self, h: f64, bandwidth: f64) -> f64 {
        let x = h / bandwidth;
        match self {
            CorrelationKernel::Gaussian => (-(x * x)).exp(),
            CorrelationKernel::Exponential => (-x).exp(),
            CorrelationKernel::Matern32 => {
                let a = 3.0_f64.sqrt() * x;
                (1.0 + a) * (-a).exp()
            }
            CorrelationKernel::Matern52 => {
                let a = 5.0_f64.sqrt() * x;
                (1.0 + a + (a * a) / 3.0) * (-a).exp()
            }
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CorrelationKernel::Gaussian => "gaussian",
            CorrelationKernel::Exponential => "exponential",
            CorrelationKernel::Matern32 => "matern32",
            CorrelationKernel::Matern52 => "matern52",
        }
    }
}

impl FromStr for CorrelationKernel {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gaussian" => Ok(CorrelationKernel::Gaussian),
            "exponential" => Ok(CorrelationKernel::Exponential),
            "matern32" => Ok(CorrelationKernel::Matern32),
            "matern52" => Ok(CorrelationKernel::Matern52),
            _ => Err(FieldError::UnknownKernel {
                name: s.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for CorrelationKernel {
    type Error = FieldError;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        name.parse()
    }
}

impl fmt::Display for CorrelationKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Applies `kernel` elementwise to a distance matrix.
pub fn apply_kernel(
    distances: ArrayView2<'_, f64>,
    kernel: CorrelationKernel,
    bandwidth: f64,
) -> Result<Array2<f64>, FieldError> {
    ensure_positive("bandwidth", bandwidth)?;
    Ok(distances.mapv(|h| kernel.evaluate(h, bandwidth)))
}

/// Zeroes every entry whose distance exceeds `radius`; pairs with
/// `distance <= radius` are neighbors. Optionally forces the diagonal to 1.
///
/// `radius = f64::INFINITY` keeps the dense similarity.
pub fn truncate_to_neighbors(
    mut similarity: Array2<f64>,
    distances: ArrayView2<'_, f64>,
    radius: f64,
    fill_diagonal: bool,
) -> Result<Array2<f64>, FieldError> {
    ensure_non_negative("radius", radius)?;
    if similarity.dim() != distances.dim() {
        return Err(FieldError::DimensionMismatch(format!(
            "similarity {:?} and distances {:?} must share a shape",
            similarity.dim(),
            distances.dim()
        )));
    }
    ndarray::Zip::from(&mut similarity)
        .and(&distances)
        .for_each(|s, &d| {
            if d > radius {
                *s = 0.0;
            }
        });
    if fill_diagonal {
        similarity.diag_mut().fill(1.0);
    }
    Ok(similarity)
}
