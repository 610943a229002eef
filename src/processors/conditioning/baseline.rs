// src/processors/conditioning/baseline.rs
//
// Asymmetric iterative polynomial baseline estimation. Each round fits a
// polynomial to the working trace and clips the trace to the fit from
// above, so peaks stop influencing the next fit while the slowly-varying
// background survives; iteration ends when the coefficients settle.

use ndarray::Array2;
use rayon::prelude::*;

use crate::error::{CrosstalkError, Result};
use crate::linalg;
use crate::signal::{SignalMatrix, NUM_CHANNELS};

/// Default polynomial degree for baseline estimation.
pub const DEFAULT_BASELINE_DEGREE: usize = 6;

const MAX_BASELINE_ITERATIONS: usize = 100;
const COEFF_TOLERANCE: f64 = 1e-3;

/// Estimate the slowly-varying baseline of a single trace.
pub fn compute_baseline(trace: &[f64], degree: usize) -> Result<Vec<f64>> {
    let n = trace.len();
    let order = degree + 1;
    if n < order {
        return Err(CrosstalkError::InsufficientData {
            needed: order,
            got: n,
        });
    }

    // Compress the x axis to [0, max|y|^(1/order)] so the normal equations
    // of the high-degree fit stay well conditioned.
    let max_abs = trace.iter().fold(0.0f64, |m, v| m.max(v.abs()));
    let cond = if max_abs > 0.0 {
        max_abs.powf(1.0 / order as f64)
    } else {
        1.0
    };
    let step = if n > 1 { cond / (n - 1) as f64 } else { 0.0 };
    let x: Vec<f64> = (0..n).map(|i| i as f64 * step).collect();

    let mut working: Vec<f64> = trace.to_vec();
    let mut coeffs = vec![1.0; order];

    for _ in 0..MAX_BASELINE_ITERATIONS {
        let new_coeffs = linalg::polyfit(&x, &working, degree)?;

        let mut diff_sq = 0.0;
        let mut norm_sq = 0.0;
        for (new, old) in new_coeffs.iter().zip(&coeffs) {
            diff_sq += (new - old) * (new - old);
            norm_sq += old * old;
        }
        let converged = norm_sq > 0.0 && (diff_sq / norm_sq).sqrt() < COEFF_TOLERANCE;

        coeffs.clear();
        coeffs.extend(new_coeffs.iter());
        if converged {
            break;
        }

        // Clip the working trace to the fit from above: points sitting on
        // peaks are pulled down, points at or below the background stay.
        for (w, &xi) in working.iter_mut().zip(&x) {
            let fit = linalg::polyval(&coeffs, xi);
            if *w > fit {
                *w = fit;
            }
        }
    }

    Ok(x.iter().map(|&xi| linalg::polyval(&coeffs, xi)).collect())
}

/// Subtract the estimated baseline from every channel, returning a new
/// signal matrix. The input is never mutated.
pub fn remove_baseline(signal: &SignalMatrix, degree: usize) -> Result<SignalMatrix> {
    let n_samples = signal.len();
    let data = signal.data();

    let channel_results: Vec<Result<(usize, Vec<f64>)>> = (0..NUM_CHANNELS)
        .into_par_iter()
        .map(|c| {
            let trace: Vec<f64> = data.column(c).iter().copied().collect();
            let baseline = compute_baseline(&trace, degree)?;
            let corrected: Vec<f64> = trace
                .iter()
                .zip(&baseline)
                .map(|(&v, &b)| v - b)
                .collect();
            Ok((c, corrected))
        })
        .collect();

    let mut output = Array2::<f64>::zeros((n_samples, NUM_CHANNELS));
    for result in channel_results {
        let (c, channel_data) = result?;
        for i in 0..n_samples {
            output[[i, c]] = channel_data[i];
        }
    }

    Ok(signal.with_data(output))
}
