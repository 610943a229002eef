// src/processors/regression/quantile.rs
//
// Quantile (pinball-loss) line fitting. Every slope estimate in the
// crosstalk estimator goes through this at q = 0.5: median regression is
// what keeps the dense low-intensity noise cloud in each channel-pair
// scatter from dragging the fit the way ordinary least squares would.

use crate::error::{CrosstalkError, Result};

/// Result of a quantile line fit: `y ~ intercept + slope * x`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuantileFit {
    pub intercept: f64,
    pub slope: f64,
}

const MAX_IRLS_ITERATIONS: usize = 100;
const PARAM_TOLERANCE: f64 = 1e-10;

/// Fit `y ~ intercept + slope * x` minimizing the pinball loss at level `q`.
///
/// Uses iteratively reweighted least squares seeded from the ordinary
/// least-squares solution, so the result is deterministic for identical
/// input. Near-constant `x` degrades gracefully to a flat line at the
/// weighted signal level instead of blowing up.
pub fn fit_quantile_line(x: &[f64], y: &[f64], q: f64) -> Result<QuantileFit> {
    if x.len() != y.len() {
        return Err(CrosstalkError::InvalidInput(format!(
            "x and y must have equal length, got {} and {}",
            x.len(),
            y.len()
        )));
    }
    if x.len() < 2 {
        return Err(CrosstalkError::InsufficientData {
            needed: 2,
            got: x.len(),
        });
    }
    if !(q > 0.0 && q < 1.0) {
        return Err(CrosstalkError::InvalidInput(format!(
            "quantile must lie in (0, 1), got {q}"
        )));
    }

    let n = x.len() as f64;

    // Ordinary least-squares seed.
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for (&xi, &yi) in x.iter().zip(y) {
        sxx += (xi - mean_x) * (xi - mean_x);
        sxy += (xi - mean_x) * (yi - mean_y);
    }

    let x_scale = x.iter().fold(0.0f64, |m, v| m.max(v.abs())).max(1.0);
    let degenerate_x = sxx < n * x_scale * x_scale * 1e-24;

    let mut slope = if degenerate_x { 0.0 } else { sxy / sxx };
    let mut intercept = mean_y - slope * mean_x;

    // Residuals of zero would give unbounded weights; floor them at a tiny
    // fraction of the response scale instead.
    let y_scale = y.iter().fold(0.0f64, |m, v| m.max(v.abs()));
    let delta = (y_scale * 1e-8).max(1e-12);

    for _ in 0..MAX_IRLS_ITERATIONS {
        let mut sw = 0.0;
        let mut swx = 0.0;
        let mut swy = 0.0;
        let mut swxx = 0.0;
        let mut swxy = 0.0;
        for (&xi, &yi) in x.iter().zip(y) {
            let r = yi - intercept - slope * xi;
            let asym = if r > 0.0 { q } else { 1.0 - q };
            let w = asym / r.abs().max(delta);
            sw += w;
            swx += w * xi;
            swy += w * yi;
            swxx += w * xi * xi;
            swxy += w * xi * yi;
        }

        let denom = sw * swxx - swx * swx;
        let (new_slope, new_intercept) = if degenerate_x || denom.abs() < sw * 1e-24 {
            (0.0, swy / sw)
        } else {
            let s = (sw * swxy - swx * swy) / denom;
            (s, (swy - s * swx) / sw)
        };

        let moved = (new_slope - slope).abs().max((new_intercept - intercept).abs());
        slope = new_slope;
        intercept = new_intercept;
        if moved < PARAM_TOLERANCE * (1.0 + slope.abs().max(intercept.abs())) {
            break;
        }
    }

    Ok(QuantileFit { intercept, slope })
}
