// src/signal.rs

use ndarray::{Array2, ArrayView1, ArrayView2};
use std::fmt;

use crate::error::{CrosstalkError, Result};

/// Number of fluorescence detection channels (one per DNA base).
pub const NUM_CHANNELS: usize = 4;

/// One of the four fluorescence detection bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    A,
    C,
    G,
    T,
}

impl Channel {
    /// Canonical channel order used when no explicit labels are supplied.
    pub const CANONICAL: [Channel; NUM_CHANNELS] = [Channel::A, Channel::C, Channel::G, Channel::T];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::A => "A",
            Channel::C => "C",
            Channel::G => "G",
            Channel::T => "T",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A labeled N x 4 matrix of fluorescence intensities.
///
/// Column order is positional and preserved end-to-end: consumers index by
/// position, the labels only say which dye each position carries. Values are
/// guaranteed finite; non-finite input is coerced to 0.0 on construction.
#[derive(Debug, Clone)]
pub struct SignalMatrix {
    data: Array2<f64>,
    labels: [Channel; NUM_CHANNELS],
}

impl SignalMatrix {
    /// Build a signal matrix with the canonical [A, C, G, T] column labels.
    pub fn from_array(data: Array2<f64>) -> Result<Self> {
        Self::with_labels(data, Channel::CANONICAL)
    }

    /// Build a signal matrix with an explicit column labeling.
    ///
    /// The labels must be a permutation of the four channels.
    pub fn with_labels(mut data: Array2<f64>, labels: [Channel; NUM_CHANNELS]) -> Result<Self> {
        if data.ncols() != NUM_CHANNELS {
            return Err(CrosstalkError::InvalidInput(format!(
                "signal must have exactly {} columns, got {}",
                NUM_CHANNELS,
                data.ncols()
            )));
        }
        if data.nrows() == 0 {
            return Err(CrosstalkError::InvalidInput(
                "signal must contain at least one sample".into(),
            ));
        }
        for c in Channel::CANONICAL {
            if !labels.contains(&c) {
                return Err(CrosstalkError::InvalidInput(format!(
                    "column labels must be a permutation of A, C, G, T (missing {c})"
                )));
            }
        }

        // Missing / non-numeric upstream values arrive as NaN; the core
        // contract is that they become 0.0 before any arithmetic.
        data.mapv_inplace(|v| if v.is_finite() { v } else { 0.0 });

        Ok(SignalMatrix { data, labels })
    }

    /// Replace the sample data, keeping this matrix's labels.
    ///
    /// Used by conditioning stages that compute a transformed copy.
    pub(crate) fn with_data(&self, data: Array2<f64>) -> SignalMatrix {
        debug_assert_eq!(data.ncols(), NUM_CHANNELS);
        SignalMatrix {
            data,
            labels: self.labels,
        }
    }

    pub fn data(&self) -> ArrayView2<'_, f64> {
        self.data.view()
    }

    pub fn labels(&self) -> &[Channel; NUM_CHANNELS] {
        &self.labels
    }

    /// Number of samples (rows).
    pub fn len(&self) -> usize {
        self.data.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.data.nrows() == 0
    }

    /// Trace of a single channel, by column position.
    pub fn channel(&self, index: usize) -> ArrayView1<'_, f64> {
        self.data.column(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn rejects_wrong_column_count() {
        let data = Array2::<f64>::zeros((10, 3));
        assert!(matches!(
            SignalMatrix::from_array(data),
            Err(CrosstalkError::InvalidInput(_))
        ));
    }

    #[test]
    fn rejects_empty_signal() {
        let data = Array2::<f64>::zeros((0, 4));
        assert!(SignalMatrix::from_array(data).is_err());
    }

    #[test]
    fn rejects_duplicate_labels() {
        let data = Array2::<f64>::zeros((4, 4));
        let labels = [Channel::A, Channel::A, Channel::G, Channel::T];
        assert!(SignalMatrix::with_labels(data, labels).is_err());
    }

    #[test]
    fn coerces_non_finite_values_to_zero() {
        let data = arr2(&[[1.0, f64::NAN, 3.0, f64::INFINITY]]);
        let signal = SignalMatrix::from_array(data).unwrap();
        assert_eq!(signal.data()[[0, 1]], 0.0);
        assert_eq!(signal.data()[[0, 3]], 0.0);
        assert_eq!(signal.data()[[0, 0]], 1.0);
    }

    #[test]
    fn preserves_custom_label_order() {
        let data = Array2::<f64>::zeros((2, 4));
        let labels = [Channel::T, Channel::G, Channel::C, Channel::A];
        let signal = SignalMatrix::with_labels(data, labels).unwrap();
        assert_eq!(signal.labels(), &labels);
    }
}
