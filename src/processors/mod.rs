// src/processors/mod.rs

pub mod conditioning;
pub mod correction;
pub mod estimation;
pub mod regression;
