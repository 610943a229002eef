// src/processors/conditioning/mod.rs

pub mod baseline;
pub mod savgol;

pub use baseline::{compute_baseline, remove_baseline, DEFAULT_BASELINE_DEGREE};
pub use savgol::apply_savgol_filter;
