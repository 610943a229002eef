// src/processors/conditioning/savgol.rs

use ndarray::{Array1, Array2};
use rayon::prelude::*;

use crate::error::{CrosstalkError, Result};
use crate::linalg;
use crate::signal::{SignalMatrix, NUM_CHANNELS};

/// Apply Savitzky-Golay smoothing (local polynomial least squares)
/// independently to each channel column, returning a new signal matrix.
///
/// `window_size` must be odd, strictly greater than `poly_order` and no
/// larger than the trace length. Interior samples are smoothed with the
/// precomputed convolution weights; the first and last half-windows are
/// filled by evaluating a polynomial fitted to the boundary window, matching
/// the edge behavior the rest of the pipeline was tuned against.
pub fn apply_savgol_filter(
    signal: &SignalMatrix,
    window_size: usize,
    poly_order: usize,
) -> Result<SignalMatrix> {
    let n_samples = signal.len();

    if window_size % 2 == 0 {
        return Err(CrosstalkError::InvalidInput(format!(
            "smoothing window size must be odd, got {window_size}"
        )));
    }
    if window_size <= poly_order {
        return Err(CrosstalkError::InvalidInput(format!(
            "smoothing window size ({window_size}) must be greater than polynomial order ({poly_order})"
        )));
    }
    if window_size > n_samples {
        return Err(CrosstalkError::InvalidInput(format!(
            "smoothing window size ({window_size}) cannot exceed trace length ({n_samples})"
        )));
    }

    let weights = savgol_weights(window_size, poly_order)?;
    let half_window = window_size / 2;
    let data = signal.data();

    // Process each channel in parallel, then copy back into the output.
    let channel_results: Vec<Result<(usize, Vec<f64>)>> = (0..NUM_CHANNELS)
        .into_par_iter()
        .map(|c| {
            let trace: Vec<f64> = data.column(c).iter().copied().collect();
            let mut smoothed = vec![0.0; n_samples];

            for i in half_window..(n_samples - half_window) {
                let mut sum = 0.0;
                for (k, w) in weights.iter().enumerate() {
                    sum += w * trace[i - half_window + k];
                }
                smoothed[i] = sum;
            }

            // Leading edge: fit the first window and evaluate in place.
            let xs: Vec<f64> = (0..window_size).map(|k| k as f64).collect();
            let head = linalg::polyfit(&xs, &trace[..window_size], poly_order)?.to_vec();
            for i in 0..half_window {
                smoothed[i] = linalg::polyval(&head, i as f64);
            }

            // Trailing edge: fit the last window.
            let tail_start = n_samples - window_size;
            let tail = linalg::polyfit(&xs, &trace[tail_start..], poly_order)?.to_vec();
            for i in (n_samples - half_window)..n_samples {
                smoothed[i] = linalg::polyval(&tail, (i - tail_start) as f64);
            }

            Ok((c, smoothed))
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

/// Convolution weights that evaluate the window's least-squares polynomial
/// at its center: w_t = p_z(t) where (T^T T) z = e0 over positions
/// t = -h..=h.
fn savgol_weights(window_size: usize, poly_order: usize) -> Result<Vec<f64>> {
    let half = (window_size / 2) as isize;
    let order = poly_order + 1;

    let mut normal = Array2::<f64>::zeros((order, order));
    for t in -half..=half {
        let t = t as f64;
        let mut p_row = vec![1.0; 2 * poly_order + 1];
        for k in 1..p_row.len() {
            p_row[k] = p_row[k - 1] * t;
        }
        for k in 0..order {
            for l in 0..order {
                normal[[k, l]] += p_row[k + l];
            }
        }
    }

    let mut e0 = Array1::<f64>::zeros(order);
    e0[0] = 1.0;
    let z = linalg::solve(normal, e0)?.to_vec();

    let weights = (-half..=half)
        .map(|t| linalg::polyval(&z, t as f64))
        .collect();
    Ok(weights)
}
