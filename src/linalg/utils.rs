use crate::error::FieldError;
use crate::faer_ndarray::{FaerCholesky, FaerEigh};
use faer::Side;
use ndarray::parallel::prelude::*;
use ndarray::{Array1, Array2, ArrayView2, Axis};

const SYMMETRY_REL_TOL: f64 = 1e-10;
const SYMMETRY_ABS_TOL: f64 = 1e-12;

/// Largest absolute entry, ignoring non-finite values.
pub(crate) fn max_abs_element(matrix: ArrayView2<'_, f64>) -> f64 {
    matrix
        .iter()
        .filter(|v| v.is_finite())
        .fold(0.0_f64, |acc, &val| acc.max(val.abs()))
}

/// Largest `|A[i,j] - A[j,i]|` over the matrix.
pub fn max_asymmetry(matrix: ArrayView2<'_, f64>) -> f64 {
    let n = matrix.nrows().min(matrix.ncols());
    let mut worst = 0.0_f64;
    for i in 0..n {
        for j in (i + 1)..n {
            worst = worst.max((matrix[[i, j]] - matrix[[j, i]]).abs());
        }
    }
    worst
}

/// Checks that `matrix` is square, finite and symmetric up to a tolerance
/// scaled by its largest entry.
pub fn ensure_symmetric(label: &str, matrix: ArrayView2<'_, f64>) -> Result<(), FieldError> {
    let (rows, cols) = matrix.dim();
    if rows != cols {
        return Err(FieldError::DimensionMismatch(format!(
            "matrix '{label}' must be square, got {rows}x{cols}"
        )));
    }
    if matrix.iter().any(|v| !v.is_finite()) {
        return Err(FieldError::AsymmetricMatrix {
            label: label.to_string(),
            dim: rows,
            max_asymmetry: f64::NAN,
            tolerance: 0.0,
        });
    }
    let tolerance = SYMMETRY_ABS_TOL + SYMMETRY_REL_TOL * max_abs_element(matrix).max(1.0);
    let asym = max_asymmetry(matrix);
    if asym > tolerance {
        return Err(FieldError::AsymmetricMatrix {
            label: label.to_string(),
            dim: rows,
            max_asymmetry: asym,
            tolerance,
        });
    }
    Ok(())
}

/// Replaces `A` with `(A + A^T) / 2`, making it exactly symmetric.
pub fn symmetrize(mut matrix: Array2<f64>) -> Array2<f64> {
    let n = matrix.nrows();
    debug_assert_eq!(n, matrix.ncols(), "Matrix must be square for symmetrization");
    for i in 0..n {
        for j in (i + 1)..n {
            let avg = 0.5 * (matrix[[i, j]] + matrix[[j, i]]);
            matrix[[i, j]] = avg;
            matrix[[j, i]] = avg;
        }
    }
    matrix
}

/// Number of eigenvalues strictly above `tol`.
pub fn numerical_rank(eigenvalues: &Array1<f64>, tol: f64) -> usize {
    eigenvalues.iter().filter(|&&v| v > tol).count()
}

/// Default rank tolerance, `n * eps * max|λ|` as in LAPACK-style rank estimates.
pub fn default_rank_tolerance(eigenvalues: &Array1<f64>) -> f64 {
    let scale = eigenvalues.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    eigenvalues.len() as f64 * f64::EPSILON * scale.max(1.0)
}

/// Eigenvalue cutoff below which a symmetric matrix is treated as singular.
///
/// Looser than [`default_rank_tolerance`]: Cholesky happily factors matrices
/// whose zero eigenvalues were perturbed to `+1e-16` by roundoff.
pub fn definiteness_tolerance(eigenvalues: &Array1<f64>) -> f64 {
    1e2 * default_rank_tolerance(eigenvalues)
}

/// Eigen-decomposes `matrix` and fails with `SingularPrecision` unless every
/// eigenvalue clears [`definiteness_tolerance`]. Returns the spectrum.
pub fn ensure_positive_definite(
    matrix: &Array2<f64>,
    label: &str,
) -> Result<Array1<f64>, FieldError> {
    ensure_symmetric(label, matrix.view())?;
    let (values, _) = matrix.eigh(Side::Lower)?;
    let tol = definiteness_tolerance(&values);
    let min_eigenvalue = values.iter().copied().fold(f64::INFINITY, f64::min);
    if values.is_empty() || min_eigenvalue > tol {
        return Ok(values);
    }
    Err(FieldError::SingularPrecision {
        label: label.to_string(),
        dim: matrix.nrows(),
        nullspace_dim: values.iter().filter(|&&v| v <= tol).count(),
        min_eigenvalue,
    })
}

/// Inverts a symmetric positive-definite matrix through its Cholesky factor.
///
/// On failure the spectrum is inspected so the error reports how many
/// eigenvalues sit at or below `zero_tol` and the smallest one.
pub fn invert_spd(
    matrix: &Array2<f64>,
    label: &str,
    zero_tol: f64,
) -> Result<Array2<f64>, FieldError> {
    let p = matrix.nrows();
    ensure_symmetric(label, matrix.view())?;
    if p == 0 {
        return Ok(Array2::zeros((0, 0)));
    }

    let chol = match matrix.cholesky(Side::Lower) {
        Ok(chol) => chol,
        Err(err) => {
            log::debug!("Cholesky of {label} failed: {err}");
            return Err(singular_error(matrix, label, zero_tol));
        }
    };
    let diag = chol.diag();
    if diag.iter().any(|d| !d.is_finite() || *d <= 0.0) {
        return Err(singular_error(matrix, label, zero_tol));
    }

    let inv = chol.solve_mat(&Array2::<f64>::eye(p));
    if inv.iter().any(|v| !v.is_finite()) {
        return Err(singular_error(matrix, label, zero_tol));
    }

    // Numerical solves can leave tiny asymmetry; enforce symmetry explicitly.
    Ok(symmetrize(inv))
}

pub(crate) fn singular_error(matrix: &Array2<f64>, label: &str, zero_tol: f64) -> FieldError {
    let (nullspace_dim, min_eigenvalue) = match matrix.eigh(Side::Lower) {
        Ok((values, _)) => (
            values.iter().filter(|&&v| v <= zero_tol).count(),
            values.iter().copied().fold(f64::INFINITY, f64::min),
        ),
        Err(_) => (matrix.nrows(), f64::NAN),
    };
    FieldError::SingularPrecision {
        label: label.to_string(),
        dim: matrix.nrows(),
        nullspace_dim,
        min_eigenvalue,
    }
}

/// Computes the Kronecker product A ⊗ B.
/// Used to lift one-dimensional difference penalties onto the flattened grid.
pub fn kronecker_product(a: &Array2<f64>, b: &Array2<f64>) -> Array2<f64> {
    let (a_rows, a_cols) = a.dim();
    let (b_rows, b_cols) = b.dim();
    let mut result = Array2::zeros((a_rows * b_rows, a_cols * b_cols));
    if a_rows == 0 || a_cols == 0 || b_rows == 0 || b_cols == 0 {
        return result;
    }

    result
        .axis_chunks_iter_mut(Axis(0), b_rows)
        .into_par_iter()
        .enumerate()
        .for_each(|(i, mut row_block)| {
            let a_row = a.row(i);
            let col_chunks = row_block.axis_chunks_iter_mut(Axis(1), b_cols);
            for (j, mut block) in col_chunks.into_iter().enumerate() {
                let a_val = a_row[j];
                if a_val == 0.0 {
                    continue;
                }
                for (dest, &src) in block.iter_mut().zip(b.iter()) {
                    *dest = a_val * src;
                }
            }
        });

    result
}
