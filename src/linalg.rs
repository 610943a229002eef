// src/linalg.rs
//
// Small dense solvers shared by baseline fitting, Savitzky-Golay weight
// computation and mixing-matrix inversion. The problems here are tiny
// (4x4 inverses, degree <= 6 polynomial fits) so everything is plain
// Gaussian elimination over ndarray storage.

use ndarray::{Array1, Array2, ArrayView2};
use rayon::prelude::*;

use crate::error::{CrosstalkError, Result};

/// Solve `a @ x = b` by Gaussian elimination with partial pivoting.
///
/// `a` is consumed as scratch space. Fails with `SingularMatrix` when a
/// pivot falls below a scale-relative tolerance.
pub fn solve(mut a: Array2<f64>, mut b: Array1<f64>) -> Result<Array1<f64>> {
    let n = a.nrows();
    if a.ncols() != n || b.len() != n {
        return Err(CrosstalkError::InvalidInput(format!(
            "solve expects a square system, got {}x{} with rhs of length {}",
            a.nrows(),
            a.ncols(),
            b.len()
        )));
    }

    let scale = a.iter().fold(0.0f64, |m, v| m.max(v.abs())).max(1.0);
    let tol = scale * 1e-13;

    for col in 0..n {
        // Pivot on the largest remaining entry in this column.
        let mut pivot_row = col;
        for row in (col + 1)..n {
            if a[[row, col]].abs() > a[[pivot_row, col]].abs() {
                pivot_row = row;
            }
        }
        if a[[pivot_row, col]].abs() < tol {
            return Err(CrosstalkError::SingularMatrix);
        }
        if pivot_row != col {
            for k in 0..n {
                a.swap([col, k], [pivot_row, k]);
            }
            b.swap(col, pivot_row);
        }

        let pivot = a[[col, col]];
        for row in (col + 1)..n {
            let factor = a[[row, col]] / pivot;
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[[row, k]] -= factor * a[[col, k]];
            }
            b[row] -= factor * b[col];
        }
    }

    // Back substitution.
    let mut x = Array1::<f64>::zeros(n);
    for row in (0..n).rev() {
        let mut sum = b[row];
        for k in (row + 1)..n {
            sum -= a[[row, k]] * x[k];
        }
        x[row] = sum / a[[row, row]];
    }
    Ok(x)
}

/// Invert a square matrix by Gauss-Jordan elimination with partial pivoting.
pub fn invert(m: &ArrayView2<f64>) -> Result<Array2<f64>> {
    let n = m.nrows();
    if m.ncols() != n {
        return Err(CrosstalkError::InvalidInput(format!(
            "cannot invert a {}x{} matrix",
            m.nrows(),
            m.ncols()
        )));
    }

    let mut a = m.to_owned();
    let mut inv = Array2::<f64>::eye(n);
    let scale = a.iter().fold(0.0f64, |acc, v| acc.max(v.abs())).max(1.0);
    let tol = scale * 1e-13;

    for col in 0..n {
        let mut pivot_row = col;
        for row in (col + 1)..n {
            if a[[row, col]].abs() > a[[pivot_row, col]].abs() {
                pivot_row = row;
            }
        }
        if a[[pivot_row, col]].abs() < tol {
            return Err(CrosstalkError::SingularMatrix);
        }
        if pivot_row != col {
            for k in 0..n {
                a.swap([col, k], [pivot_row, k]);
                inv.swap([col, k], [pivot_row, k]);
            }
        }

        let pivot = a[[col, col]];
        for k in 0..n {
            a[[col, k]] /= pivot;
            inv[[col, k]] /= pivot;
        }
        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = a[[row, col]];
            if factor == 0.0 {
                continue;
            }
            for k in 0..n {
                a[[row, k]] -= factor * a[[col, k]];
                inv[[row, k]] -= factor * inv[[col, k]];
            }
        }
    }
    Ok(inv)
}

/// Apply a channel-mixing operator to every sample row in parallel:
/// `out[r] = m @ data[r]`.
pub fn transform_rows(data: &ArrayView2<f64>, m: &ArrayView2<f64>) -> Array2<f64> {
    let (n_samples, n_channels) = data.dim();

    let row_results: Vec<(usize, Vec<f64>)> = (0..n_samples)
        .into_par_iter()
        .map(|r| {
            let mut row_output = vec![0.0; n_channels];
            for c in 0..n_channels {
                let mut sum = 0.0;
                for k in 0..n_channels {
                    sum += m[[c, k]] * data[[r, k]];
                }
                row_output[c] = sum;
            }
            (r, row_output)
        })
        .collect();

    let mut result = Array2::<f64>::zeros((n_samples, n_channels));
    for (r, row_data) in row_results {
        for c in 0..n_channels {
            result[[r, c]] = row_data[c];
        }
    }
    result
}

/// Least-squares polynomial fit of `y` on `x`, returning coefficients in
/// ascending order (`c[0] + c[1]*x + ...`). Solved through the normal
/// equations, which is plenty for the degree <= 6 fits used here.
pub fn polyfit(x: &[f64], y: &[f64], degree: usize) -> Result<Array1<f64>> {
    let n = x.len();
    let order = degree + 1;
    if y.len() != n {
        return Err(CrosstalkError::InvalidInput(format!(
            "polyfit expects equal-length inputs, got {} and {}",
            n,
            y.len()
        )));
    }
    if n < order {
        return Err(CrosstalkError::InsufficientData {
            needed: order,
            got: n,
        });
    }

    // Normal equations: A[k][l] = sum x^(k+l), b[k] = sum y * x^k.
    let mut powers = vec![0.0; 2 * degree + 1];
    let mut rhs = Array1::<f64>::zeros(order);
    for (&xi, &yi) in x.iter().zip(y) {
        let mut p = 1.0;
        for k in 0..=(2 * degree) {
            powers[k] += p;
            if k < order {
                rhs[k] += yi * p;
            }
            p *= xi;
        }
    }
    let mut a = Array2::<f64>::zeros((order, order));
    for k in 0..order {
        for l in 0..order {
            a[[k, l]] = powers[k + l];
        }
    }

    solve(a, rhs)
}

/// Evaluate a polynomial with ascending coefficients at `x` (Horner).
pub fn polyval(coeffs: &[f64], x: f64) -> f64 {
    coeffs.iter().rev().fold(0.0, |acc, &c| acc * x + c)
}
