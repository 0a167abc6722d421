use nalgebra::{DMatrix, DVector};
use thiserror::Error;

use crate::limits::Row;

#[derive(Debug, Error)]
pub enum QpError {
    #[error("objective is not positive definite")]
    NotPositiveDefinite,
    #[error("dual iteration did not converge")]
    MaxIter,
}

/// Solve `min 0.5 v'Hv - g'v  s.t.  a_i . v <= b_i` for positive definite
/// `H`.
///
/// Unconstrained solve through a Cholesky factor, then Hildreth dual
/// coordinate ascent on the inequality multipliers. Infeasibility is
/// reported explicitly; the caller decides on a fallback.
pub fn solve(
    h: &DMatrix<f64>,
    g: &DVector<f64>,
    rows: &[Row],
    max_iter: usize,
    tol: f64,
) -> Result<DVector<f64>, QpError> {
    let cholesky = h.clone().cholesky().ok_or(QpError::NotPositiveDefinite)?;
    let unconstrained = cholesky.solve(g);

    if rows
        .iter()
        .all(|row| row.a.dot(&unconstrained) <= row.b + tol)
    {
        return Ok(unconstrained);
    }

    let m = rows.len();
    let n = g.len();
    let mut a = DMatrix::zeros(m, n);
    let mut b = DVector::zeros(m);
    for (i, row) in rows.iter().enumerate() {
        a.set_row(i, &row.a.transpose());
        b[i] = row.b;
    }

    // P = A H^-1 A',  d = A v0 - b
    let hinv_at = cholesky.solve(&a.transpose());
    let p = &a * &hinv_at;
    let d = &a * &unconstrained - b;

    let mut lambda = DVector::zeros(m);
    let mut converged = false;
    for _ in 0..max_iter {
        let mut largest_change = 0.0_f64;
        for i in 0..m {
            let pii = p[(i, i)];
            if pii <= f64::EPSILON {
                continue;
            }
            let w = d[i] - (p.row(i).dot(&lambda.transpose()) - pii * lambda[i]);
            let next = (w / pii).max(0.0);
            largest_change = largest_change.max((next - lambda[i]).abs());
            lambda[i] = next;
        }
        if largest_change < tol {
            converged = true;
            break;
        }
    }
    if !converged {
        return Err(QpError::MaxIter);
    }
    Ok(unconstrained - hinv_at * lambda)
}
