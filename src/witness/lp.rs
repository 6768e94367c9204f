//! Exact witness search by linear programming.
//!
//! With candidate `c` and references `o_1..o_k` over `n` states, solve
//!
//! ```text
//! maximise    d
//! subject to  d - sum_s b_s (c_s - o_i,s) <= 0     for every i
//!             sum_s b_s <= 1
//!             b >= 0, d >= 0
//! ```
//!
//! The origin is feasible, so a single-phase tableau simplex starting from
//! the slack basis suffices. Bland's rule keeps the degenerate zero-rhs rows
//! from cycling. A witness exists iff the optimum exceeds the tolerance.

use std::sync::Arc;

use tracing::debug;

use crate::belief::BeliefState;
use crate::error::{AlphaError, AlphaResult};
use crate::vector::AlphaVector;

use super::{check_call, margin, WitnessOracle};

const PIVOT_EPS: f64 = 1e-11;

/// Exact oracle backed by a dense simplex solver.
#[derive(Debug, Clone, Copy, Default)]
pub struct LpWitnessOracle;

struct Tableau {
    rows: Vec<Vec<f64>>,
    objective: Vec<f64>,
    basis: Vec<usize>,
    columns: usize,
}

impl Tableau {
    fn rhs(&self, row: usize) -> f64 {
        self.rows[row][self.columns]
    }

    fn entering(&self) -> Option<usize> {
        (0..self.columns).find(|&j| self.objective[j] < -PIVOT_EPS)
    }

    fn leaving(&self, col: usize) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (i, row) in self.rows.iter().enumerate() {
            let a = row[col];
            if a <= PIVOT_EPS {
                continue;
            }
            let ratio = self.rhs(i) / a;
            best = match best {
                None => Some((i, ratio)),
                Some((_, r)) if ratio < r - PIVOT_EPS => Some((i, ratio)),
                Some((b, r)) if (ratio - r).abs() <= PIVOT_EPS && self.basis[i] < self.basis[b] => {
                    Some((i, ratio))
                }
                keep => keep,
            };
        }
        best.map(|(i, _)| i)
    }

    fn pivot(&mut self, row: usize, col: usize) {
        let p = self.rows[row][col];
        for v in &mut self.rows[row] {
            *v /= p;
        }
        let pivot_row = self.rows[row].clone();
        for (i, r) in self.rows.iter_mut().enumerate() {
            if i == row {
                continue;
            }
            let factor = r[col];
            if factor != 0.0 {
                for (v, pv) in r.iter_mut().zip(&pivot_row) {
                    *v -= factor * pv;
                }
            }
        }
        let factor = self.objective[col];
        if factor != 0.0 {
            for (v, pv) in self.objective.iter_mut().zip(&pivot_row) {
                *v -= factor * pv;
            }
        }
        self.basis[row] = col;
    }
}

impl LpWitnessOracle {
    /// Solves the separation LP and returns `(belief weights, d)`.
    fn solve(candidate: &AlphaVector, others: &[Arc<AlphaVector>]) -> AlphaResult<(Vec<f64>, f64)> {
        let n = candidate.len();
        let k = others.len();
        let vars = n + 1;
        let m = k + 1;
        let columns = vars + m;

        let mut rows = Vec::with_capacity(m);
        for (i, other) in others.iter().enumerate() {
            let mut row = vec![0.0; columns + 1];
            for s in 0..n {
                row[s] = -(candidate.coefficients()[s] - other.coefficients()[s]);
            }
            row[n] = 1.0;
            row[vars + i] = 1.0;
            rows.push(row);
        }
        let mut simplex_row = vec![0.0; columns + 1];
        for v in simplex_row.iter_mut().take(n) {
            *v = 1.0;
        }
        simplex_row[vars + k] = 1.0;
        simplex_row[columns] = 1.0;
        rows.push(simplex_row);

        let mut objective = vec![0.0; columns + 1];
        objective[n] = -1.0;

        let mut tableau = Tableau {
            rows,
            objective,
            basis: (vars..vars + m).collect(),
            columns,
        };

        let max_pivots = 64 * (columns + m);
        let mut pivots = 0usize;
        while let Some(col) = tableau.entering() {
            let Some(row) = tableau.leaving(col) else {
                return Err(AlphaError::internal("witness LP reported unbounded"));
            };
            tableau.pivot(row, col);
            pivots += 1;
            if pivots > max_pivots {
                return Err(AlphaError::internal(format!(
                    "witness LP did not converge after {max_pivots} pivots"
                )));
            }
        }

        let mut weights = vec![0.0; n];
        let mut d = 0.0;
        for (row, &var) in tableau.basis.iter().enumerate() {
            if var < n {
                weights[var] = tableau.rhs(row).max(0.0);
            } else if var == n {
                d = tableau.rhs(row);
            }
        }
        debug!(states = n, references = k, pivots, objective = d, "witness LP solved");
        Ok((weights, d))
    }
}

impl WitnessOracle for LpWitnessOracle {
    fn name(&self) -> &'static str {
        "lp"
    }

    fn find_witness(
        &self,
        candidate: &AlphaVector,
        others: &[Arc<AlphaVector>],
        tolerance: f64,
    ) -> AlphaResult<Option<BeliefState>> {
        check_call(candidate, others)?;
        let (weights, d) = Self::solve(candidate, others)?;
        if d <= tolerance || weights.iter().all(|&w| w <= 0.0) {
            return Ok(None);
        }
        let belief = BeliefState::from_dense(&weights)?;
        // Guard against round-off in the tableau.
        if margin(candidate, others, &belief) > tolerance {
            Ok(Some(belief))
        } else {
            Ok(None)
        }
    }
}
