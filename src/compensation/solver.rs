use log::debug;
use nalgebra::{DMatrix, DVector};
use ndarray::{Array2, ArrayView2, Axis, Zip};

use super::matrix::{Method, SpilloverMatrix};
use super::nnls::NnlsSolver;
use crate::error::{CompensationError, CompensationResult};

/// Compensate a batch of observations (`N x input_channels`) for spillover.
///
/// Rows holding any non-finite value are not solved; their output row is all
/// NaN. When no row is valid the batch is returned unchanged. Output rows
/// keep the input order and have `spillover.output_channels()` columns.
pub fn compensate(
    observations: ArrayView2<'_, f64>,
    spillover: &SpilloverMatrix,
    method: Method,
) -> CompensationResult<Array2<f64>> {
    let expected = spillover.input_channels();
    if observations.ncols() != expected {
        return Err(CompensationError::ShapeMismatch {
            expected,
            actual: observations.ncols(),
        });
    }

    let valid = valid_rows(observations);
    if valid.is_empty() {
        debug!(
            "no finite rows among {} observations, leaving batch uncompensated",
            observations.nrows()
        );
        return Ok(observations.to_owned());
    }

    let observed = observations.select(Axis(0), &valid);
    let solved = match method {
        Method::LeastSquares => solve_least_squares(observed.view(), spillover)?,
        Method::NonNegativeLeastSquares => solve_non_negative(observed.view(), spillover),
    };

    let mut compensated = Array2::from_elem(
        (observations.nrows(), spillover.output_channels()),
        f64::NAN,
    );
    for (k, &row) in valid.iter().enumerate() {
        compensated.row_mut(row).assign(&solved.row(k));
    }
    debug!(
        "{method}: compensated {} of {} rows ({} -> {} channels)",
        valid.len(),
        observations.nrows(),
        spillover.input_channels(),
        spillover.output_channels()
    );
    Ok(compensated)
}

/// Indices of rows whose entries are all finite.
pub fn valid_rows(observations: ArrayView2<'_, f64>) -> Vec<usize> {
    observations
        .outer_iter()
        .enumerate()
        .filter(|(_, row)| row.iter().all(|v| v.is_finite()))
        .map(|(i, _)| i)
        .collect()
}

// -- Least squares: one factorisation for the whole batch --

fn solve_least_squares(
    observed: ArrayView2<'_, f64>,
    spillover: &SpilloverMatrix,
) -> CompensationResult<Array2<f64>> {
    let system = spillover.system_matrix();
    let (m, n) = system.shape();
    let rows = observed.nrows();

    // Right-hand sides as columns: S^T X^T = observed^T
    let rhs = DMatrix::from_fn(m, rows, |i, j| observed[(j, i)]);
    let svd = system.svd(true, true);
    let cutoff = m.max(n) as f64 * f64::EPSILON * svd.singular_values.max();
    let solution = svd
        .solve(&rhs, cutoff)
        .map_err(CompensationError::Solver)?;

    Ok(Array2::from_shape_fn((rows, n), |(r, c)| solution[(c, r)]))
}

// -- Non-negative least squares: independent solve per row --

fn solve_non_negative(observed: ArrayView2<'_, f64>, spillover: &SpilloverMatrix) -> Array2<f64> {
    let solver = NnlsSolver::new(spillover.system_matrix());
    let mut solved = Array2::zeros((observed.nrows(), spillover.output_channels()));
    Zip::from(solved.rows_mut())
        .and(observed.rows())
        .for_each(|mut out, row| {
            let b = DVector::from_iterator(row.len(), row.iter().copied());
            let x = solver.solve(&b);
            out.iter_mut().zip(x.iter()).for_each(|(o, &v)| *o = v);
        });
    solved
}
