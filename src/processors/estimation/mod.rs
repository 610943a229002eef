// src/processors/estimation/mod.rs
//
// Iterative crosstalk-matrix estimation. One generic refinement loop is
// shared by both selection variants: fit the bleed slope for every ordered
// channel pair, fold the per-iteration estimate into the cumulative mixing
// matrix, unmix the working signal and go again until the largest remaining
// slope is negligible.

pub mod selection;

use log::debug;
use ndarray::Array2;

use crate::error::{CrosstalkError, Result};
use crate::linalg;
use crate::processors::regression::fit_quantile_line;
use crate::report::{
    check_cancelled, report_progress, CancelToken, DiagnosticSink, IterationDiagnostic,
    ProgressSink,
};
use crate::signal::{SignalMatrix, NUM_CHANNELS};

pub use selection::EstimationVariant;

/// All slope fits run at the median: L1 regression throughout.
const MEDIAN_QUANTILE: f64 = 0.5;

/// Number of ordered channel pairs fitted per iteration.
const PAIRS_PER_ITERATION: usize = NUM_CHANNELS * (NUM_CHANNELS - 1);

/// Tuning knobs for the iterative estimator.
#[derive(Debug, Clone)]
pub struct EstimatorConfig {
    pub variant: EstimationVariant,
    /// Convergence threshold on `max |slope|` per iteration.
    pub epsilon: f64,
    /// Iteration counter cap; the counter starts at 1, so this allows at
    /// most `max_iterations - 1` refinement rounds. Values below 2 run no
    /// refinement at all and the estimate comes back as the identity.
    pub max_iterations: usize,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        let variant = EstimationVariant::default();
        EstimatorConfig {
            variant,
            epsilon: variant.default_epsilon(),
            max_iterations: 11,
        }
    }
}

impl EstimatorConfig {
    /// Config for a specific variant with that variant's default epsilon.
    pub fn for_variant(variant: EstimationVariant) -> Self {
        EstimatorConfig {
            variant,
            epsilon: variant.default_epsilon(),
            max_iterations: 11,
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if !(self.epsilon > 0.0) {
            return Err(CrosstalkError::InvalidInput(format!(
                "convergence epsilon must be positive, got {}",
                self.epsilon
            )));
        }
        Ok(())
    }
}

/// Estimate the 4x4 mixing matrix of `signal`.
///
/// Returns the column-normalized cumulative estimate: each column sums to
/// 1 so the matrix reads as the fractional contribution of every true
/// channel into each observed channel.
pub fn estimate_crosstalk(
    signal: &SignalMatrix,
    config: &EstimatorConfig,
    mut progress: Option<&mut dyn ProgressSink>,
    mut diagnostics: Option<&mut dyn DiagnosticSink>,
    cancel: Option<&CancelToken>,
) -> Result<Array2<f64>> {
    config.validate()?;

    let labels = *signal.labels();
    let mut working = signal.data().to_owned();
    let mut w = Array2::<f64>::eye(NUM_CHANNELS);
    let max_rounds = config.max_iterations.saturating_sub(1).max(1);

    report_progress(&mut progress, 0.0, "Starting crosstalk estimation");

    let mut iteration = 1;
    while iteration < config.max_iterations {
        check_cancelled(cancel)?;

        let mut w_estim = Array2::<f64>::eye(NUM_CHANNELS);
        let mut slopes: Vec<f64> = Vec::with_capacity(PAIRS_PER_ITERATION);
        let mut batch: Vec<IterationDiagnostic> = Vec::new();
        let mut pair_index = 0usize;

        for i in 0..NUM_CHANNELS {
            for j in 0..NUM_CHANNELS {
                if i == j {
                    continue;
                }
                check_cancelled(cancel)?;

                if progress.is_some() {
                    let fraction = (iteration - 1) as f64
                        + pair_index as f64 / PAIRS_PER_ITERATION as f64;
                    let percent = (fraction / max_rounds as f64 * 100.0).min(95.0);
                    report_progress(
                        &mut progress,
                        percent,
                        &format!(
                            "Iteration {iteration}/{max_rounds} | analyzing {} vs {}",
                            labels[i], labels[j]
                        ),
                    );
                }
                pair_index += 1;

                let (xs, ys) = config
                    .variant
                    .select_pair_samples(&working.view(), i, j);
                if xs.len() < 2 {
                    debug!(
                        "iteration {iteration}: skipping {} -> {} ({} usable points)",
                        labels[i],
                        labels[j],
                        xs.len()
                    );
                    continue;
                }

                let fit = match fit_quantile_line(&xs, &ys, MEDIAN_QUANTILE) {
                    Ok(fit) => fit,
                    Err(CrosstalkError::InsufficientData { .. }) => {
                        debug!(
                            "iteration {iteration}: regression skipped {} -> {}",
                            labels[i], labels[j]
                        );
                        continue;
                    }
                    Err(e) => return Err(e),
                };

                w_estim[[j, i]] = fit.slope;
                slopes.push(fit.slope);

                if diagnostics.is_some() {
                    batch.push(IterationDiagnostic {
                        pair: (i, j),
                        full_x: working.column(i).to_vec(),
                        full_y: working.column(j).to_vec(),
                        fit_x: xs,
                        fit_y: ys,
                        slope: fit.slope,
                        intercept: fit.intercept,
                    });
                }
            }
        }

        if let Some(sink) = diagnostics.as_deref_mut() {
            if !batch.is_empty() {
                sink.record(iteration, &batch);
            }
        }

        // Every pair skipped: the convergence criterion has nothing to look
        // at and there is no sane way to guess, so fail loudly.
        if slopes.is_empty() {
            return Err(CrosstalkError::NoConvergenceData { iteration });
        }

        let max_slope = slopes.iter().fold(0.0f64, |m, s| m.max(s.abs()));
        debug!("iteration {iteration}: max |slope| = {max_slope:.6}");

        if max_slope < config.epsilon {
            report_progress(
                &mut progress,
                95.0,
                &format!("Convergence reached at iteration {iteration}"),
            );
            break;
        }

        let inverse = linalg::invert(&w_estim.view())?;
        working = linalg::transform_rows(&working.view(), &inverse.view());
        w = w.dot(&w_estim);
        iteration += 1;

        report_progress(
            &mut progress,
            ((iteration - 1) as f64 / max_rounds as f64 * 100.0).min(95.0),
            &format!("Completed iteration {}/{max_rounds}", iteration - 1),
        );
    }

    // Normalize each column to sum 1 so the estimate is a column-stochastic
    // mixing operator.
    for k in 0..NUM_CHANNELS {
        let sum: f64 = (0..NUM_CHANNELS).map(|i| w[[i, k]]).sum();
        if !sum.is_finite() || sum.abs() < 1e-12 {
            return Err(CrosstalkError::SingularMatrix);
        }
        for i in 0..NUM_CHANNELS {
            w[[i, k]] /= sum;
        }
    }

    report_progress(&mut progress, 100.0, "Crosstalk estimation finished");
    Ok(w)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    /// Block signal: channel c carries a ramp of pure signal in its own
    /// quarter of the trace and nothing elsewhere.
    fn block_clean(rows_per_block: usize) -> Array2<f64> {
        let n = rows_per_block * NUM_CHANNELS;
        let mut clean = Array2::<f64>::zeros((n, NUM_CHANNELS));
        for c in 0..NUM_CHANNELS {
            for r in 0..rows_per_block {
                clean[[c * rows_per_block + r, c]] =
                    100.0 + 900.0 * r as f64 / rows_per_block as f64;
            }
        }
        clean
    }

    fn column_normalized(m: &Array2<f64>) -> Array2<f64> {
        let mut out = m.clone();
        for k in 0..NUM_CHANNELS {
            let sum: f64 = (0..NUM_CHANNELS).map(|i| out[[i, k]]).sum();
            for i in 0..NUM_CHANNELS {
                out[[i, k]] /= sum;
            }
        }
        out
    }

    fn test_mixing() -> Array2<f64> {
        arr2(&[
            [0.90, 0.06, 0.00, 0.00],
            [0.08, 0.86, 0.07, 0.01],
            [0.02, 0.06, 0.85, 0.09],
            [0.00, 0.02, 0.08, 0.90],
        ])
    }

    #[test]
    fn recovers_known_mixing_on_block_signal() {
        let mixing = test_mixing();
        let clean = block_clean(200);
        let observed = linalg::transform_rows(&clean.view(), &mixing.view());
        let signal = SignalMatrix::from_array(observed).unwrap();

        let config = EstimatorConfig::for_variant(EstimationVariant::DirectFilter);
        let w = estimate_crosstalk(&signal, &config, None, None, None).unwrap();

        let expected = column_normalized(&mixing);
        for i in 0..NUM_CHANNELS {
            for j in 0..NUM_CHANNELS {
                let diff = (w[[i, j]] - expected[[i, j]]).abs();
                assert!(diff < 0.02, "W[{i},{j}] = {}, want {}", w[[i, j]], expected[[i, j]]);
            }
        }
    }

    #[test]
    fn output_columns_are_stochastic() {
        let mixing = test_mixing();
        let clean = block_clean(150);
        let observed = linalg::transform_rows(&clean.view(), &mixing.view());
        let signal = SignalMatrix::from_array(observed).unwrap();

        for variant in [EstimationVariant::DirectFilter, EstimationVariant::IntervalExtremum] {
            let config = EstimatorConfig::for_variant(variant);
            let w = estimate_crosstalk(&signal, &config, None, None, None).unwrap();
            for k in 0..NUM_CHANNELS {
                let sum: f64 = (0..NUM_CHANNELS).map(|i| w[[i, k]]).sum();
                assert!((sum - 1.0).abs() < 1e-9, "{variant:?} column {k} sums to {sum}");
            }
        }
    }

    #[test]
    fn degenerate_input_fails_with_no_convergence_data() {
        // A single sample cannot feed any pair fit; every pair is skipped.
        let signal = SignalMatrix::from_array(arr2(&[[1.0, 2.0, 3.0, 4.0]])).unwrap();
        let config = EstimatorConfig::default();
        assert!(matches!(
            estimate_crosstalk(&signal, &config, None, None, None),
            Err(CrosstalkError::NoConvergenceData { iteration: 1 })
        ));
    }

    #[test]
    fn cancellation_is_observed_before_first_fit() {
        let clean = block_clean(50);
        let signal = SignalMatrix::from_array(clean).unwrap();
        let token = CancelToken::new();
        token.cancel();
        let result = estimate_crosstalk(
            &signal,
            &EstimatorConfig::default(),
            None,
            None,
            Some(&token),
        );
        assert!(matches!(result, Err(CrosstalkError::Cancelled)));
    }

    #[test]
    fn diagnostics_capture_every_fitted_pair() {
        let mixing = test_mixing();
        let clean = block_clean(120);
        let observed = linalg::transform_rows(&clean.view(), &mixing.view());
        let signal = SignalMatrix::from_array(observed).unwrap();

        let mut iterations_seen: Vec<(usize, usize)> = Vec::new();
        {
            let mut sink = |iteration: usize, pairs: &[IterationDiagnostic]| {
                for d in pairs {
                    assert_eq!(d.full_x.len(), signal.len());
                    assert_eq!(d.fit_x.len(), d.fit_y.len());
                    assert!(d.fit_x.len() >= 2);
                    assert_ne!(d.pair.0, d.pair.1);
                }
                iterations_seen.push((iteration, pairs.len()));
            };
            let config = EstimatorConfig::for_variant(EstimationVariant::DirectFilter);
            estimate_crosstalk(&signal, &config, None, Some(&mut sink), None).unwrap();
        }
        assert!(!iterations_seen.is_empty());
        // Iteration numbers start at 1 and increase.
        assert_eq!(iterations_seen[0].0, 1);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let signal = SignalMatrix::from_array(block_clean(10)).unwrap();
        let mut config = EstimatorConfig::default();
        config.epsilon = 0.0;
        assert!(estimate_crosstalk(&signal, &config, None, None, None).is_err());
    }

    #[test]
    fn iteration_cap_below_two_runs_no_refinement() {
        let mixing = test_mixing();
        let clean = block_clean(50);
        let observed = linalg::transform_rows(&clean.view(), &mixing.view());
        let signal = SignalMatrix::from_array(observed).unwrap();

        let mut config = EstimatorConfig::default();
        config.max_iterations = 1;
        let w = estimate_crosstalk(&signal, &config, None, None, None).unwrap();
        assert_eq!(w, Array2::eye(NUM_CHANNELS));
    }

    #[test]
    fn progress_percentages_stay_in_range() {
        let mixing = test_mixing();
        let clean = block_clean(80);
        let observed = linalg::transform_rows(&clean.view(), &mixing.view());
        let signal = SignalMatrix::from_array(observed).unwrap();

        let mut percents: Vec<f64> = Vec::new();
        {
            let mut sink = |p: f64, _m: &str| percents.push(p);
            let config = EstimatorConfig::default();
            estimate_crosstalk(&signal, &config, Some(&mut sink), None, None).unwrap();
        }
        assert!(!percents.is_empty());
        assert!(percents.iter().all(|p| (0.0..=100.0).contains(p)));
        assert_eq!(*percents.last().unwrap(), 100.0);
    }
}
