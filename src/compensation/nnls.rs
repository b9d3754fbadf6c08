//! Non-negative least squares (Lawson-Hanson active set).
//!
//! Solves `min ||A x - b||_2` subject to `x >= 0` for one right-hand side at
//! a time. The constrained problem has no batched closed form, so the solver
//! keeps `A` and its tolerance and is called once per observation row.

use log::debug;
use nalgebra::{DMatrix, DVector};

/// Reusable NNLS solver for a fixed system matrix `A` (`m x n`).
pub struct NnlsSolver {
    a: DMatrix<f64>,
    a_t: DMatrix<f64>,
    tolerance: f64,
    max_iterations: usize,
}

impl NnlsSolver {
    pub fn new(a: DMatrix<f64>) -> Self {
        let (m, n) = a.shape();
        let tolerance = 10.0 * f64::EPSILON * a.norm() * m.max(n) as f64;
        let a_t = a.transpose();
        Self {
            a,
            a_t,
            tolerance,
            max_iterations: 3 * n.max(1),
        }
    }

    /// Number of unknowns.
    pub fn unknowns(&self) -> usize {
        self.a.ncols()
    }

    /// Solve for one right-hand side `b` of length `m`.
    pub fn solve(&self, b: &DVector<f64>) -> DVector<f64> {
        let n = self.unknowns();
        let mut x = DVector::<f64>::zeros(n);
        let mut passive = vec![false; n];

        let mut w = self.gradient(b, &x);
        let mut iterations = 0;

        loop {
            // Most promising variable still held at zero
            let candidate = (0..n)
                .filter(|&j| !passive[j])
                .max_by(|&i, &j| w[i].total_cmp(&w[j]))
                .filter(|&j| w[j] > self.tolerance);
            let Some(t) = candidate else {
                break;
            };
            if iterations >= self.max_iterations {
                debug!("nnls: iteration limit ({}) reached", self.max_iterations);
                break;
            }
            iterations += 1;
            passive[t] = true;

            let mut z = self.solve_passive(b, &passive);
            loop {
                let infeasible: Vec<usize> = (0..n).filter(|&j| passive[j] && z[j] <= 0.0).collect();
                if infeasible.is_empty() {
                    break;
                }
                // Step from x towards z until the first passive variable hits zero
                let alpha = infeasible
                    .iter()
                    .map(|&j| {
                        let denom = x[j] - z[j];
                        if denom > 0.0 {
                            x[j] / denom
                        } else {
                            0.0
                        }
                    })
                    .fold(f64::INFINITY, f64::min);
                let step = (&z - &x) * alpha;
                x += step;

                for j in 0..n {
                    if passive[j] && x[j] <= self.tolerance {
                        passive[j] = false;
                        x[j] = 0.0;
                    }
                }
                if !passive.iter().any(|&p| p) {
                    break;
                }
                z = self.solve_passive(b, &passive);
            }
            x = z;
            for j in 0..n {
                if !passive[j] || x[j] < 0.0 {
                    x[j] = 0.0;
                }
            }
            w = self.gradient(b, &x);
        }
        x
    }

    /// `A^T (b - A x)`
    fn gradient(&self, b: &DVector<f64>, x: &DVector<f64>) -> DVector<f64> {
        &self.a_t * (b - &self.a * x)
    }

    /// Unconstrained least squares restricted to the passive columns; all
    /// other entries are zero.
    fn solve_passive(&self, b: &DVector<f64>, passive: &[bool]) -> DVector<f64> {
        let n = self.unknowns();
        let columns: Vec<usize> = (0..n).filter(|&j| passive[j]).collect();
        let mut z = DVector::<f64>::zeros(n);
        if columns.is_empty() {
            return z;
        }
        let sub = self.a.select_columns(columns.iter());
        if let Some(sub_z) = least_squares(sub, b) {
            for (k, &j) in columns.iter().enumerate() {
                z[j] = sub_z[k];
            }
        }
        z
    }
}

/// Minimum-norm least squares solution of `a x = b` via SVD. Singular values
/// below `max(m, n) * eps * sigma_max` count as zero.
pub(crate) fn least_squares(a: DMatrix<f64>, b: &DVector<f64>) -> Option<DVector<f64>> {
    let (m, n) = a.shape();
    let svd = a.svd(true, true);
    let cutoff = m.max(n) as f64 * f64::EPSILON * svd.singular_values.max();
    svd.solve(b, cutoff).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: &DVector<f64>, b: &[f64]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-6)
    }

    #[test]
    fn unconstrained_solution_when_feasible() {
        // A = S^T for S = [[1, 0.1], [0, 1]]
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.1, 1.0]);
        let solver = NnlsSolver::new(a);
        let x = solver.solve(&DVector::from_vec(vec![1.0, 0.1]));
        assert!(close(&x, &[1.0, 0.0]), "{x}");
        let x = solver.solve(&DVector::from_vec(vec![0.0, 1.0]));
        assert!(close(&x, &[0.0, 1.0]), "{x}");
    }

    #[test]
    fn clamps_negative_component() {
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.1, 1.0]);
        let x = NnlsSolver::new(a).solve(&DVector::from_vec(vec![1.0, 0.0]));
        assert!(close(&x, &[1.0 / 1.01, 0.0]), "{x}");
    }

    #[test]
    fn zero_rhs_gives_zero() {
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 0.3, 0.2, 1.0]);
        let x = NnlsSolver::new(a).solve(&DVector::zeros(2));
        assert!(close(&x, &[0.0, 0.0]));
    }

    #[test]
    fn all_negative_target_gives_zero() {
        let a = DMatrix::identity(3, 3);
        let x = NnlsSolver::new(a).solve(&DVector::from_vec(vec![-1.0, -2.0, -0.5]));
        assert!(close(&x, &[0.0, 0.0, 0.0]));
    }

    #[test]
    fn overdetermined_system() {
        // Three observations of two unknowns, consistent for x = [2, 3]
        let a = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
        let x = NnlsSolver::new(a).solve(&DVector::from_vec(vec![2.0, 3.0, 5.0]));
        assert!(close(&x, &[2.0, 3.0]), "{x}");
    }

    #[test]
    fn least_squares_rank_deficient_is_min_norm() {
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        let x = least_squares(a, &DVector::from_vec(vec![2.0, 2.0])).unwrap();
        assert!(close(&x, &[1.0, 1.0]), "{x}");
    }
}
