use crate::error::{FieldError, ensure_non_negative, ensure_positive};
use crate::faer_ndarray::{FaerEigh, fast_ab};
use crate::linalg::utils::{ensure_positive_definite, ensure_symmetric, invert_spd, symmetrize};
use faer::Side;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// Weights for regularizing a rank-deficient precision matrix.
///
/// `threshold` is a numerical-zero cutoff on the eigenvalues of Q, not a
/// structural parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NullspacePenalty {
    pub sig_q: f64,
    pub sig_q0: f64,
    pub threshold: f64,
}

impl Default for NullspacePenalty {
    fn default() -> Self {
        Self {
            sig_q: 0.01,
            sig_q0: 0.01,
            threshold: 1e-3,
        }
    }
}

/// `pen_q = sig_q * Q + sig_q0 * S0` and its inverse.
#[derive(Debug, Clone)]
pub struct PenalizedPrecision {
    pub pen_q: Array2<f64>,
    pub sigma: Array2<f64>,
    /// Ascending eigenvalues of the unpenalized Q.
    pub eigenvalues: Array1<f64>,
    pub nullspace_dim: usize,
}

/// Adds a penalty along the near-zero eigendirections of `q` and inverts.
///
/// Eigenvectors whose eigenvalue is strictly below `threshold` span the
/// nullspace `U0`; `S0 = U0 U0^T`. The result is positive definite or an error.
pub fn penalize_nullspace(
    q: &Array2<f64>,
    penalty: &NullspacePenalty,
) -> Result<PenalizedPrecision, FieldError> {
    ensure_non_negative("sig_q", penalty.sig_q)?;
    ensure_non_negative("sig_q0", penalty.sig_q0)?;
    ensure_positive("threshold", penalty.threshold)?;
    ensure_symmetric("Q", q.view())?;

    let n = q.nrows();
    let (eigenvalues, eigenvectors) = q.eigh(Side::Lower)?;
    log::debug!("eigenvalues of Q: {eigenvalues}");

    let null_cols: Vec<usize> = eigenvalues
        .iter()
        .enumerate()
        .filter(|(_, v)| **v < penalty.threshold)
        .map(|(i, _)| i)
        .collect();
    let nullspace_dim = null_cols.len();

    let mut u0 = Array2::<f64>::zeros((n, nullspace_dim));
    for (dst, &src) in null_cols.iter().enumerate() {
        u0.column_mut(dst).assign(&eigenvectors.column(src));
    }
    let s0 = fast_ab(&u0, &u0.t());

    let pen_q = symmetrize(q * penalty.sig_q + s0 * penalty.sig_q0);
    ensure_positive_definite(&pen_q, "penalized Q")?;
    let sigma = invert_spd(&pen_q, "penalized Q", 0.0)?;

    log::info!(
        "penalized {nullspace_dim}-dimensional nullspace of {n}x{n} Q (threshold {:e})",
        penalty.threshold
    );

    Ok(PenalizedPrecision {
        pen_q,
        sigma,
        eigenvalues,
        nullspace_dim,
    })
}
