//! Cholesky factorization and solve for the bandit's ridge matrices
//!
//! The per-arm matrices are symmetric positive definite by construction
//! (λI plus rank-one updates), so a Cholesky solve is both the cheapest and
//! the numerically safest way to apply their inverse. Factorization failure
//! signals ill-conditioning and is surfaced as `None` for the caller to
//! degrade gracefully.

use ndarray::{Array1, Array2};

/// Lower-triangular Cholesky factor L with A = L·Lᵀ
///
/// Returns `None` when the matrix is not positive definite (or contains
/// non-finite values), which callers treat as a failed solve.
pub fn cholesky(a: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    if a.ncols() != n {
        return None;
    }

    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }

            if i == j {
                if !(sum.is_finite() && sum > 0.0) {
                    return None;
                }
                l[[i, j]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }

    Some(l)
}

/// Solve A·x = rhs given the Cholesky factor L of A
///
/// Forward substitution for L·y = rhs, then back substitution for Lᵀ·x = y.
pub fn solve_with_factor(l: &Array2<f64>, rhs: &Array1<f64>) -> Array1<f64> {
    let n = l.nrows();

    let mut y = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = rhs[i];
        for k in 0..i {
            sum -= l[[i, k]] * y[k];
        }
        y[i] = sum / l[[i, i]];
    }

    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = y[i];
        for k in (i + 1)..n {
            sum -= l[[k, i]] * x[k];
        }
        x[i] = sum / l[[i, i]];
    }

    x
}

/// Factor and solve in one step
pub fn solve_spd(a: &Array2<f64>, rhs: &Array1<f64>) -> Option<Array1<f64>> {
    cholesky(a).map(|l| solve_with_factor(&l, rhs))
}
