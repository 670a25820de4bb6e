//! Single-case solver: multi-start augmented Lagrangian over L-BFGS.
//!
//! Wraps the hand-coded `penalized_value_and_gradient` into argmin's
//! `CostFunction` + `Gradient` traits and runs L-BFGS in the unconstrained
//! coordinates of a [`BoundTransform`], so every trial point stays inside the
//! flux box.  The equality rows `A·x + b = 0` are enforced by the outer AL
//! loop.
//!
//! Uses `Vec<f64>` as the argmin parameter type to avoid ndarray version
//! conflicts between our ndarray 0.16 and argmin-math's bundled ndarray.

use crate::constraints::{EqualitySystem, ModelSystem};
use crate::feasible::feasible_start_point;
use crate::gradients::{lagrangian_value_and_gradient, penalized_value_and_gradient};
use crate::objectives::CrossEntropy;
use crate::transforms::BoundTransform;
use crate::types::{
    ALState, CaseSpec, FluxError, FluxResult, SolveResult, SolverOptions, FAILED_OBJ_VALUE,
};
use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use ndarray::ArrayView1;
use rand::Rng;
use std::cell::RefCell;

// ─────────────────────────────────────────────────────────────
//  argmin problem wrapper
// ─────────────────────────────────────────────────────────────

type Evaluation = (Vec<f64>, f64, Vec<f64>);

/// One inner subproblem: objective + AL penalty in transformed coordinates.
///
/// argmin calls `cost(y)` and `gradient(y)` separately at the same `y`; the
/// last `(y, value, grad)` is cached so each point is evaluated once.
struct CaseProblem<'a> {
    objective: CrossEntropy<'a>,
    equality: &'a EqualitySystem,
    transform: &'a BoundTransform,
    al: Option<ALState>,
    last_eval: RefCell<Option<Evaluation>>,
}

impl<'a> CaseProblem<'a> {
    fn new(
        objective: CrossEntropy<'a>,
        equality: &'a EqualitySystem,
        transform: &'a BoundTransform,
        al: Option<ALState>,
    ) -> Self {
        Self { objective, equality, transform, al, last_eval: RefCell::new(None) }
    }

    fn ensure_evaluated(&self, y: &[f64]) -> Result<(), argmin::core::Error> {
        {
            let cached = self.last_eval.borrow();
            if let Some((ref t, _, _)) = *cached {
                if t == y {
                    return Ok(());
                }
            }
        }
        let (value, grad) = penalized_value_and_gradient(
            &self.objective,
            self.equality,
            self.transform,
            self.al.as_ref(),
            y,
        );
        // Non-finite points abort this inner solve; the caller treats that
        // as a non-converged restart.
        if !value.is_finite() || grad.iter().any(|g| !g.is_finite()) {
            return Err(argmin::core::Error::msg(format!(
                "non-finite objective {value} at trial point"
            )));
        }
        *self.last_eval.borrow_mut() = Some((y.to_vec(), value, grad));
        Ok(())
    }

    fn cached<T>(&self, pick: impl FnOnce(&Evaluation) -> T) -> Result<T, argmin::core::Error> {
        self.last_eval
            .borrow()
            .as_ref()
            .map(pick)
            .ok_or_else(|| argmin::core::Error::msg("evaluation cache is empty"))
    }
}

impl CostFunction for CaseProblem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, y: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        self.ensure_evaluated(y)?;
        self.cached(|e| e.1)
    }
}

impl Gradient for CaseProblem<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, y: &Self::Param) -> Result<Self::Gradient, argmin::core::Error> {
        self.ensure_evaluated(y)?;
        self.cached(|e| e.2.clone())
    }
}

// ─────────────────────────────────────────────────────────────
//  Inner L-BFGS solve
// ─────────────────────────────────────────────────────────────

struct InnerOutcome {
    y: Vec<f64>,
    converged: bool,
    iterations: u64,
}

fn inner_lbfgs(
    problem: CaseProblem<'_>,
    init_param: Vec<f64>,
    options: &SolverOptions,
) -> FluxResult<InnerOutcome> {
    let linesearch = MoreThuenteLineSearch::new();
    let solver = LBFGS::new(linesearch, options.lbfgs_memory)
        .with_tolerance_grad(options.tolerance_grad)?
        .with_tolerance_cost(options.tolerance_cost)?;

    let executor = Executor::new(problem, solver).configure(|config| {
        config
            .param(init_param)
            .max_iters(options.max_iterations as u64)
            .target_cost(f64::NEG_INFINITY)
    });

    let result = executor.run()?;

    let converged = matches!(
        result.state().get_termination_reason(),
        Some(TerminationReason::SolverConverged)
    );
    let y = result
        .state()
        .get_best_param()
        .cloned()
        .ok_or_else(|| FluxError::Solver("L-BFGS returned no best parameters".into()))?;

    Ok(InnerOutcome { y, converged, iterations: result.state().get_iter() })
}

// ─────────────────────────────────────────────────────────────
//  Local constrained optimisation via Augmented Lagrangian
// ─────────────────────────────────────────────────────────────

/// Result of one local optimisation from one start point.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalOptimum {
    /// Flux vector in flux index order.
    pub x: Vec<f64>,
    /// Bare cross-entropy at `x` (no penalty terms).
    pub obj_value: f64,
    pub converged: bool,
    /// `max|A·x + b|` at `x`.
    pub max_violation: f64,
    /// [`BoundTransform::stationarity`] of the Lagrangian gradient at `x`.
    pub stationarity: f64,
    /// Total inner L-BFGS iterations.
    pub iterations: u64,
}

/// Minimise the cross-entropy subject to `A·x + b = 0` and the box encoded
/// in `transform`, starting from `start`.
///
/// Solves a sequence of inner problems
///
///   min_y  J(T(y)) + λ·h(T(y)) + (μ/2)‖h(T(y))‖²
///
/// and after each one updates
///
///   λ ← λ + μ·h
///   μ ← min(μ_max, α·μ)      (only while max|h| ≥ constraint_tol)
///
/// Converged means first-order KKT: `max|h| < constraint_tol` and the
/// box-projected Lagrangian gradient `∇J + Aᵀ(λ + μh)` below
/// `stationarity_tol`.  An inner solve that stops early (cost stagnation,
/// iteration cap) is simply followed by another one from the same point.
/// Inner solver errors are returned as `Err`.
pub fn optimize_local(
    objective: CrossEntropy<'_>,
    equality: &EqualitySystem,
    transform: &BoundTransform,
    start: &[f64],
    options: &SolverOptions,
) -> FluxResult<LocalOptimum> {
    let settings = &options.al;
    let mut al = ALState::new(equality.num_rows(), settings);
    let mut y = transform.to_unbounded(start);
    let mut converged = false;
    let mut stationarity = f64::INFINITY;
    let mut total_iters = 0u64;

    for outer in 0..settings.max_outer_iters {
        let problem = CaseProblem::new(objective, equality, transform, Some(al.clone()));
        let inner = inner_lbfgs(problem, y, options)?;
        y = inner.y;
        total_iters += inner.iterations;

        let x = transform.to_bounded(&y);
        let view = ArrayView1::from(x.as_slice());
        let h = equality.residual(view);
        let viol = h.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
        let (_, grad_x) = lagrangian_value_and_gradient(&objective, equality, Some(&al), view);
        stationarity = transform.stationarity(&x, &grad_x.to_vec());

        tracing::debug!(
            outer = outer + 1,
            mu = al.mu,
            max_violation = viol,
            stationarity,
            inner_converged = inner.converged,
            "AL outer iteration"
        );

        let feasible = viol < settings.constraint_tol;
        if feasible && stationarity < settings.stationarity_tol {
            converged = true;
            break;
        }

        for (lambda, &hk) in al.lambdas.iter_mut().zip(h.iter()) {
            *lambda += al.mu * hk;
        }
        if !feasible {
            al.mu = (al.mu * settings.mu_factor).min(settings.mu_max);
        }
    }

    let x = transform.to_bounded(&y);
    let view = ArrayView1::from(x.as_slice());
    let obj_value = objective.value(view);
    let max_violation = equality.max_violation(view);

    Ok(LocalOptimum {
        converged: converged && obj_value.is_finite(),
        obj_value,
        max_violation,
        stationarity,
        iterations: total_iters,
        x,
    })
}

// ─────────────────────────────────────────────────────────────
//  Single-case entry point
// ─────────────────────────────────────────────────────────────

/// Solve one sweep case.
///
/// Unfitted mode reports the first feasible point.  Fitted mode runs
/// `options.repeat` restarts from fresh feasible points and keeps the
/// converged result with the lowest objective.  Cases without any usable
/// point come back as [`SolveResult::failed`]; only configuration mistakes
/// are returned as `Err`.
pub fn solve_case<R: Rng + ?Sized>(
    system: &ModelSystem,
    case: &CaseSpec,
    options: &SolverOptions,
    rng: &mut R,
) -> FluxResult<SolveResult> {
    case.bounds.check_len(system.num_fluxes())?;
    let equality = system.equality_system(&case.constant_fluxes)?;
    let objective = CrossEntropy::new(&system.mid);
    let minimal_obj_value = system.mid.optimal_obj_value;
    let label = case.label.clone();

    let Some(probe) = feasible_start_point(&equality, &case.bounds, &options.start, rng) else {
        tracing::debug!(?label, "no feasible point for case");
        return Ok(SolveResult::failed(minimal_obj_value, label));
    };

    if !options.fitted {
        let obj_value = objective.value(ArrayView1::from(probe.as_slice()));
        return Ok(SolveResult {
            flux_values: system.flux_index.to_flux_values(&probe),
            obj_value,
            success: true,
            minimal_obj_value,
            label,
        });
    }

    let transform = BoundTransform::new(&case.bounds)?;
    let mut best: Option<LocalOptimum> = None;
    let mut best_value = FAILED_OBJ_VALUE;

    for restart in 0..options.repeat {
        let Some(start) = feasible_start_point(&equality, &case.bounds, &options.start, rng) else {
            tracing::trace!(restart, "restart skipped: no feasible start");
            continue;
        };
        match optimize_local(objective, &equality, &transform, &start, options) {
            Ok(local) if local.converged => {
                if local.obj_value < best_value {
                    best_value = local.obj_value;
                    best = Some(local);
                }
            }
            Ok(local) => {
                tracing::trace!(
                    restart,
                    max_violation = local.max_violation,
                    stationarity = local.stationarity,
                    "restart did not converge"
                );
            }
            Err(e) => {
                tracing::trace!(restart, error = %e, "restart aborted");
            }
        }
    }

    Ok(match best {
        Some(local) => SolveResult {
            flux_values: system.flux_index.to_flux_values(&local.x),
            obj_value: local.obj_value,
            success: true,
            minimal_obj_value,
            label,
        },
        None => SolveResult::failed(minimal_obj_value, label),
    })
}
