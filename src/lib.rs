// src/lib.rs
//
// Crosstalk removal core for four-channel DNA sequencing fluorescence
// traces. The pipeline smooths the raw signal, strips the per-channel
// baseline, estimates the 4x4 dye crosstalk (mixing) matrix from the data
// itself and applies the inverse to recover per-dye intensities.

pub mod error;
pub mod linalg;
pub mod processors;
pub mod report;
pub mod signal;
pub mod synthetic;

pub use error::{CrosstalkError, Result};
pub use processors::conditioning::{
    apply_savgol_filter, compute_baseline, remove_baseline, DEFAULT_BASELINE_DEGREE,
};
pub use processors::correction::{
    apply_mixing_inverse, matrix_difference, remove_crosstalk, CorrectionConfig,
};
pub use processors::estimation::{estimate_crosstalk, EstimationVariant, EstimatorConfig};
pub use processors::regression::{fit_quantile_line, QuantileFit};
pub use report::{CancelToken, DiagnosticSink, IterationDiagnostic, ProgressSink};
pub use signal::{Channel, SignalMatrix, NUM_CHANNELS};
pub use synthetic::{generate_trace, random_mixing_matrix, SyntheticTrace, TraceSpec};
