use std::fmt;
use std::str::FromStr;

use log::warn;
use nalgebra::DMatrix;
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::{CompensationError, CompensationResult};

// ---------------------------------------------------------------------------
// Method – how the mixing relation is inverted
// ---------------------------------------------------------------------------

/// Solve strategy for recovering true signal from observed signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    /// Ordinary least squares. Exact for square, full-rank matrices; may
    /// produce negative values.
    LeastSquares,
    /// Least squares constrained to non-negative outputs, solved row by row.
    NonNegativeLeastSquares,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::LeastSquares => "LeastSquares",
            Method::NonNegativeLeastSquares => "NonNegativeLeastSquares",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = CompensationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "leastsquares" | "least_squares" | "ls" => Ok(Method::LeastSquares),
            "nonnegativeleastsquares" | "non_negative_least_squares" | "nnls" => {
                Ok(Method::NonNegativeLeastSquares)
            }
            _ => Err(CompensationError::UnknownMethod(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// SpilloverMatrix
// ---------------------------------------------------------------------------

/// Linear mixing model between true channel signal and detected signal.
///
/// Shape is `(output_channels, input_channels)`. Entry `(i, j)` is the
/// fraction of true signal of channel `i` that is detected in channel `j`,
/// so that `observed = true @ S`. The diagonal is usually 1.
#[derive(Debug, Clone, PartialEq)]
pub struct SpilloverMatrix {
    coefficients: Array2<f64>,
}

impl SpilloverMatrix {
    /// Validate and wrap a coefficient array.
    pub fn new(coefficients: Array2<f64>) -> CompensationResult<Self> {
        let (rows, cols) = coefficients.dim();
        if rows == 0 || cols == 0 {
            return Err(CompensationError::EmptyMatrix { rows, cols });
        }
        if let Some(((row, col), _)) = coefficients.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(CompensationError::NonFiniteCoefficient { row, col });
        }
        if coefficients.iter().any(|&v| v < 0.0) {
            warn!("spillover matrix ({rows}x{cols}) contains negative coefficients");
        }
        Ok(Self { coefficients })
    }

    /// Build from row vectors, e.g. parsed from a text file.
    pub fn from_rows(rows: &[Vec<f64>]) -> CompensationResult<Self> {
        let n_rows = rows.len();
        let n_cols = rows.first().map_or(0, Vec::len);
        for (row, values) in rows.iter().enumerate() {
            if values.len() != n_cols {
                return Err(CompensationError::RaggedMatrix {
                    row,
                    found: values.len(),
                    expected: n_cols,
                });
            }
        }
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        Self::new(Array2::from_shape_vec((n_rows, n_cols), flat)?)
    }

    /// No spillover at all.
    pub fn identity(channels: usize) -> CompensationResult<Self> {
        Self::new(Array2::eye(channels))
    }

    /// Number of true (compensated) channels.
    pub fn output_channels(&self) -> usize {
        self.coefficients.nrows()
    }

    /// Number of detector (observed) channels.
    pub fn input_channels(&self) -> usize {
        self.coefficients.ncols()
    }

    pub fn is_square(&self) -> bool {
        self.output_channels() == self.input_channels()
    }

    pub fn ensure_square(&self) -> CompensationResult<()> {
        if self.is_square() {
            Ok(())
        } else {
            Err(CompensationError::AsymmetricMatrix {
                rows: self.output_channels(),
                cols: self.input_channels(),
            })
        }
    }

    pub fn coefficients(&self) -> ArrayView2<'_, f64> {
        self.coefficients.view()
    }

    /// Forward model: mix true signal rows into observed rows.
    pub fn apply(&self, true_signal: ArrayView2<'_, f64>) -> CompensationResult<Array2<f64>> {
        if true_signal.ncols() != self.output_channels() {
            return Err(CompensationError::ShapeMismatch {
                expected: self.output_channels(),
                actual: true_signal.ncols(),
            });
        }
        Ok(true_signal.dot(&self.coefficients))
    }

    /// `S^T` as a dense nalgebra matrix (`input_channels x output_channels`),
    /// the system matrix of `S^T x = observed`.
    pub(crate) fn system_matrix(&self) -> DMatrix<f64> {
        DMatrix::from_fn(self.input_channels(), self.output_channels(), |i, j| {
            self.coefficients[(j, i)]
        })
    }
}
