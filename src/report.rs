// src/report.rs

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{CrosstalkError, Result};

/// Receives coarse progress checkpoints (percentage in 0..=100 plus a
/// human-readable stage message). Invoked synchronously on the calling
/// thread; implementations must be cheap or hand off to a channel.
pub trait ProgressSink {
    fn report(&mut self, percent: f64, message: &str);
}

impl<F> ProgressSink for F
where
    F: FnMut(f64, &str),
{
    fn report(&mut self, percent: f64, message: &str) {
        self(percent, message)
    }
}

/// Per-iteration, per-channel-pair record of what the estimator fitted.
///
/// `pair` is `(i, j)`: source channel `i` bleeding into observed channel `j`,
/// both as column positions. `full_x`/`full_y` are the complete working
/// traces of the two channels at this iteration; `fit_x`/`fit_y` are the
/// subset of points the regression actually ran on.
#[derive(Debug, Clone)]
pub struct IterationDiagnostic {
    pub pair: (usize, usize),
    pub full_x: Vec<f64>,
    pub full_y: Vec<f64>,
    pub fit_x: Vec<f64>,
    pub fit_y: Vec<f64>,
    pub slope: f64,
    pub intercept: f64,
}

/// Receives the full batch of pair diagnostics once per estimator iteration.
/// Purely observational: attaching a sink never changes the computation.
pub trait DiagnosticSink {
    fn record(&mut self, iteration: usize, pairs: &[IterationDiagnostic]);
}

impl<F> DiagnosticSink for F
where
    F: FnMut(usize, &[IterationDiagnostic]),
{
    fn record(&mut self, iteration: usize, pairs: &[IterationDiagnostic]) {
        self(iteration, pairs)
    }
}

/// Cloneable cooperative-cancellation flag.
///
/// The caller keeps one clone and calls [`CancelToken::cancel`]; the core
/// polls its clone before each iteration and each pair fit, returning
/// [`CrosstalkError::Cancelled`] once the flag is set.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Bail out with `Cancelled` if the (optional) token has been triggered.
pub(crate) fn check_cancelled(token: Option<&CancelToken>) -> Result<()> {
    match token {
        Some(t) if t.is_cancelled() => Err(CrosstalkError::Cancelled),
        _ => Ok(()),
    }
}

/// Forward a progress checkpoint to the sink, if one is attached.
pub(crate) fn report_progress(
    sink: &mut Option<&mut dyn ProgressSink>,
    percent: f64,
    message: &str,
) {
    if let Some(s) = sink.as_deref_mut() {
        s.report(percent, message);
    }
}
