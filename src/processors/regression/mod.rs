// src/processors/regression/mod.rs

pub mod quantile;

pub use quantile::{fit_quantile_line, QuantileFit};
