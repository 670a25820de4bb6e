//! Randomised LP search for a feasible starting point.
//!
//! The cross-entropy is only defined inside the feasible region, so every
//! local optimisation needs a start vector that already satisfies
//! `A·x + b = 0` and `l ≤ x ≤ u`.  Each attempt solves
//!
//!   min  c·x   s.t.  A·x = −b,   l' ≤ x ≤ u'
//!
//! with a random cost `c` and a randomly shrunken box `[l', u']`.  The
//! shrinking pushes the returned vertex off the true bounds; the random cost
//! spreads successive starts over different vertices.

use crate::constraints::EqualitySystem;
use crate::types::{Bounds, StartPointOptions};
use microlp::{ComparisonOp, OptimizationDirection, Problem};
use ndarray::ArrayView1;
use rand::Rng;

/// Coefficients with smaller magnitude are treated as structural zeros.
const COEFF_EPS: f64 = 1e-14;

/// Why a single LP attempt did not produce a start point.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptFailure {
    /// The perturbed box is empty for some flux.
    EmptyBox { flux: usize },
    /// A constraint row without coefficients but with non-zero rhs.
    InconsistentRow { row: usize },
    /// The LP solver rejected the problem.
    Lp(microlp::Error),
    /// The vertex violates the true constraints beyond tolerance.
    Verification { violation: f64 },
}

/// Try up to `options.max_failed_attempts` perturbed LPs.
///
/// Returns `None` when every attempt failed.
pub fn feasible_start_point<R: Rng + ?Sized>(
    equality: &EqualitySystem,
    bounds: &Bounds,
    options: &StartPointOptions,
    rng: &mut R,
) -> Option<Vec<f64>> {
    let mut failed = 0;
    while failed < options.max_failed_attempts {
        match lp_attempt(equality, bounds, options, rng) {
            Ok(x) => return Some(x),
            Err(reason) => {
                failed += 1;
                tracing::trace!(attempt = failed, ?reason, "feasible start attempt failed");
            }
        }
    }
    tracing::debug!(attempts = failed, "no feasible start point found");
    None
}

/// One perturbed LP solve.
pub fn lp_attempt<R: Rng + ?Sized>(
    equality: &EqualitySystem,
    bounds: &Bounds,
    options: &StartPointOptions,
    rng: &mut R,
) -> Result<Vec<f64>, AttemptFailure> {
    let n = equality.num_fluxes();
    let mut problem = Problem::new(OptimizationDirection::Minimize);

    let mut vars = Vec::with_capacity(n);
    for i in 0..n {
        let cost = rng.gen::<f64>() - options.objective_offset;
        let lo = bounds.lower[i] + rng.gen::<f64>() * options.lower_shift_span + options.lower_shift_min;
        let hi = bounds.upper[i] * (rng.gen::<f64>() * options.upper_scale_span + options.upper_scale_min);
        if lo.is_nan() || hi.is_nan() || lo > hi {
            return Err(AttemptFailure::EmptyBox { flux: i });
        }
        vars.push(problem.add_var(cost, (lo, hi)));
    }

    let rhs = equality.rhs();
    for (row, coeffs) in equality.matrix.rows().into_iter().enumerate() {
        let terms: Vec<_> = coeffs
            .iter()
            .enumerate()
            .filter(|(_, c)| c.abs() > COEFF_EPS)
            .map(|(j, &c)| (vars[j], c))
            .collect();
        if terms.is_empty() {
            if rhs[row].abs() > options.feasibility_tol {
                return Err(AttemptFailure::InconsistentRow { row });
            }
            continue;
        }
        problem.add_constraint(terms.as_slice(), ComparisonOp::Eq, rhs[row]);
    }

    let solution = problem.solve().map_err(AttemptFailure::Lp)?;
    let x: Vec<f64> = vars.iter().map(|&v| solution[v]).collect();

    // Tolerance scales with the magnitude of the vertex.
    let scale = 1.0 + x.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    let tol = options.feasibility_tol * scale;
    let violation = equality.max_violation(ArrayView1::from(x.as_slice()));
    if violation > tol || !bounds.contains(&x, tol) {
        return Err(AttemptFailure::Verification { violation });
    }
    Ok(x)
}
