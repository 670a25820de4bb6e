use indexmap::IndexMap;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

// ─────────────────────────────────────────────────────────────
//  Error type
// ─────────────────────────────────────────────────────────────

/// Unified error type for all fallible operations in the crate.
///
/// Only configuration mistakes and infrastructure failures surface here.
/// Numerical trouble inside a single case (infeasible LP, non-converged
/// restart) is retried locally and, if it persists, recorded in the case's
/// [`SolveResult`] instead.
#[derive(Debug, Error)]
pub enum FluxError {
    /// A constraint references a flux that is not in the [`FluxIndex`].
    #[error("flux `{0}` is not in the flux index")]
    UnknownFlux(String),
    /// The same flux name was inserted twice into a [`FluxIndex`].
    #[error("flux `{0}` appears more than once in the flux index")]
    DuplicateFlux(String),
    /// A MID vector does not have the same length as its target.
    #[error("MID vector of `{flux}` has length {found}, expected {expected}")]
    MidLength { flux: String, expected: usize, found: usize },
    /// A MID constraint without contributing fluxes.
    #[error("MID constraint {index} has no contributing flux")]
    EmptyMidConstraint { index: usize },
    /// A flux contributes twice to the same MID constraint.
    #[error("flux `{flux}` contributes twice to MID constraint {index}")]
    DuplicateMidFlux { index: usize, flux: String },
    /// Shape mismatch in input data.
    #[error("shape error: {0}")]
    Shape(String),
    /// A sweep axis with an unusable range or tick interval.
    #[error("free variable `{name}`: {reason}")]
    InvalidFreeVariable { name: String, reason: &'static str },
    /// No scenario strategy is registered under this name.
    #[error("no scenario registered under `{0}`")]
    UnknownScenario(String),
    /// Argmin solver plumbing failed.
    #[error("solver error: {0}")]
    Solver(String),
    /// The worker pool could not be set up.
    #[error("worker pool error: {0}")]
    Pool(String),
    /// A per-case or global hook reported a failure.
    #[error("hook error: {0}")]
    Hook(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<argmin::core::Error> for FluxError {
    fn from(e: argmin::core::Error) -> Self {
        Self::Solver(e.to_string())
    }
}

pub type FluxResult<T> = Result<T, FluxError>;

// ─────────────────────────────────────────────────────────────
//  Constants
// ─────────────────────────────────────────────────────────────

/// Floor added to MID entries before taking logarithms.
pub const EPS_FOR_LOG: f64 = 1e-10;

/// Objective value reported by a case that never produced a converged fit.
pub const FAILED_OBJ_VALUE: f64 = 999_999.0;

/// Name-ordered flux assignment (flux index order).
pub type FluxValues = IndexMap<String, f64>;

/// Fixed flux values of one case, in declaration order.
pub type ConstantFluxes = IndexMap<String, f64>;

/// Sweep coordinates identifying one case.
pub type ScenarioLabel = BTreeMap<String, f64>;

// ─────────────────────────────────────────────────────────────
//  Flux index
// ─────────────────────────────────────────────────────────────

/// Shared flux name → dense position mapping.
///
/// Insertion order is the column order of every matrix the crate builds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FluxIndex {
    positions: IndexMap<String, usize>,
}

impl FluxIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from names in order.  Duplicates are rejected.
    pub fn from_names<I, S>(names: I) -> FluxResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut index = Self::new();
        for name in names {
            index.insert(name)?;
        }
        Ok(index)
    }

    /// Append a flux, returning its position.
    pub fn insert(&mut self, name: impl Into<String>) -> FluxResult<usize> {
        let name = name.into();
        if self.positions.contains_key(&name) {
            return Err(FluxError::DuplicateFlux(name));
        }
        let position = self.positions.len();
        self.positions.insert(name, position);
        Ok(position)
    }

    pub fn position(&self, name: &str) -> FluxResult<usize> {
        self.positions
            .get(name)
            .copied()
            .ok_or_else(|| FluxError::UnknownFlux(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.positions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.positions.keys().map(String::as_str)
    }

    /// Pair a dense flux vector with the flux names.
    pub fn to_flux_values(&self, x: &[f64]) -> FluxValues {
        self.names()
            .zip(x.iter())
            .map(|(name, &value)| (name.to_string(), value))
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────
//  Sweep axis
// ─────────────────────────────────────────────────────────────

/// One axis of a parameter sweep.
///
/// Samples are `steps + 1` evenly spaced values over the closed range, so
/// both endpoints are always part of the sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreeVariable {
    name: String,
    range: (f64, f64),
    total_num: usize,
    display_interval: usize,
    values: Vec<f64>,
}

impl FreeVariable {
    pub fn new(
        name: impl Into<String>,
        steps: usize,
        range: (f64, f64),
        display_interval: usize,
    ) -> FluxResult<Self> {
        let name = name.into();
        if !range.0.is_finite() || !range.1.is_finite() {
            return Err(FluxError::InvalidFreeVariable { name, reason: "range must be finite" });
        }
        if display_interval == 0 {
            return Err(FluxError::InvalidFreeVariable {
                name,
                reason: "display interval must be positive",
            });
        }
        let total_num = steps + 1;
        let values = Array1::linspace(range.0, range.1, total_num).to_vec();
        Ok(Self { name, range, total_num, display_interval, values })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn range(&self) -> (f64, f64) {
        self.range
    }

    /// Number of samples (`steps + 1`).
    pub fn len(&self) -> usize {
        self.total_num
    }

    pub fn is_empty(&self) -> bool {
        self.total_num == 0
    }

    pub fn value(&self, i: usize) -> Option<f64> {
        self.values.get(i).copied()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().copied()
    }

    /// Sample positions that carry a display tick.
    pub fn tick_positions(&self) -> Vec<usize> {
        (0..self.total_num).step_by(self.display_interval).collect()
    }

    /// Tick labels: sampled values at the tick positions, rounded.
    pub fn tick_labels(&self) -> Vec<f64> {
        self.tick_positions()
            .into_iter()
            .map(|i| self.values[i].round_ties_even())
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────
//  Symbolic constraint specifications
// ─────────────────────────────────────────────────────────────

/// `Σ inputs = Σ outputs` at one network node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceConstraint {
    pub name: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

impl BalanceConstraint {
    pub fn new<S: Into<String>>(
        name: impl Into<String>,
        inputs: impl IntoIterator<Item = S>,
        outputs: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            name: name.into(),
            inputs: inputs.into_iter().map(Into::into).collect(),
            outputs: outputs.into_iter().map(Into::into).collect(),
        }
    }
}

/// Observed MID explained as a flux-weighted mixture of substrate MIDs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MidConstraint {
    /// Contributing flux → MID carried by that flux.
    pub contributions: Vec<(String, Vec<f64>)>,
    /// Observed MID to be matched.
    pub target: Vec<f64>,
}

impl MidConstraint {
    pub fn new<S: Into<String>>(
        contributions: impl IntoIterator<Item = (S, Vec<f64>)>,
        target: Vec<f64>,
    ) -> Self {
        Self {
            contributions: contributions.into_iter().map(|(n, v)| (n.into(), v)).collect(),
            target,
        }
    }

    /// Contributing flux names joined with `_`.
    pub fn name(&self) -> String {
        self.contributions
            .iter()
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>()
            .join("_")
    }

    /// Isotopomer count (length of the target).
    pub fn dim(&self) -> usize {
        self.target.len()
    }

    /// Dimensional consistency: non-empty, no repeated flux, equal lengths,
    /// non-negative target.  `index` is only used for error messages.
    pub fn validate(&self, index: usize) -> FluxResult<()> {
        if self.contributions.is_empty() {
            return Err(FluxError::EmptyMidConstraint { index });
        }
        if let Some(bad) = self.target.iter().find(|v| !(v.is_finite() && **v >= 0.0)) {
            return Err(FluxError::Shape(format!(
                "target of MID constraint {index} has invalid entry {bad}"
            )));
        }
        let expected = self.dim();
        for (i, (flux, mid)) in self.contributions.iter().enumerate() {
            if mid.len() != expected {
                return Err(FluxError::MidLength {
                    flux: flux.clone(),
                    expected,
                    found: mid.len(),
                });
            }
            if self.contributions[..i].iter().any(|(other, _)| other == flux) {
                return Err(FluxError::DuplicateMidFlux { index, flux: flux.clone() });
            }
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────
//  Bounds
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl Bounds {
    /// Same `(min, max)` for every flux.
    pub fn uniform(num_fluxes: usize, min: f64, max: f64) -> Self {
        Self {
            lower: vec![min; num_fluxes],
            upper: vec![max; num_fluxes],
        }
    }

    /// Default pair for every flux, overridden per flux by `exceptions`.
    pub fn from_defaults(
        index: &FluxIndex,
        min: f64,
        max: f64,
        exceptions: &HashMap<String, (f64, f64)>,
    ) -> FluxResult<Self> {
        let mut bounds = Self::uniform(index.len(), min, max);
        for (name, &(lo, hi)) in exceptions {
            let i = index.position(name)?;
            bounds.lower[i] = lo;
            bounds.upper[i] = hi;
        }
        Ok(bounds)
    }

    pub fn len(&self) -> usize {
        self.lower.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    pub fn check_len(&self, num_fluxes: usize) -> FluxResult<()> {
        if self.lower.len() != num_fluxes || self.upper.len() != num_fluxes {
            return Err(FluxError::Shape(format!(
                "bounds have {}/{} entries, flux index has {num_fluxes}",
                self.lower.len(),
                self.upper.len(),
            )));
        }
        Ok(())
    }

    /// Whether `x` lies in the box up to `tol`.
    pub fn contains(&self, x: &[f64], tol: f64) -> bool {
        x.iter()
            .zip(self.lower.iter().zip(&self.upper))
            .all(|(&v, (&lo, &hi))| v >= lo - tol && v <= hi + tol)
    }
}

// ─────────────────────────────────────────────────────────────
//  Solver options
// ─────────────────────────────────────────────────────────────

/// Randomised LP search for a feasible start.  The perturbation constants
/// are empirical tuning knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartPointOptions {
    /// LP attempts before giving up.
    pub max_failed_attempts: usize,
    /// Lower bounds are raised by `lower_shift_min + U(0,1)·lower_shift_span`.
    pub lower_shift_min: f64,
    pub lower_shift_span: f64,
    /// Upper bounds are scaled by `upper_scale_min + U(0,1)·upper_scale_span`.
    pub upper_scale_min: f64,
    pub upper_scale_span: f64,
    /// Random LP cost coefficients are `U(0,1) − objective_offset`.
    pub objective_offset: f64,
    /// Tolerance when checking the LP vertex against the true constraints.
    pub feasibility_tol: f64,
}

impl Default for StartPointOptions {
    fn default() -> Self {
        Self {
            max_failed_attempts: 10,
            lower_shift_min: 1.0,
            lower_shift_span: 4.0,
            upper_scale_min: 0.8,
            upper_scale_span: 0.2,
            objective_offset: 0.4,
            feasibility_tol: 1e-6,
        }
    }
}

/// Settings for the augmented Lagrangian outer loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ALSettings {
    /// Initial penalty parameter μ.
    pub mu_init: f64,
    /// Multiplicative growth factor for μ each outer iteration.
    pub mu_factor: f64,
    /// Maximum value of μ (prevents ill-conditioning).
    pub mu_max: f64,
    /// Maximum number of outer AL iterations.
    pub max_outer_iters: usize,
    /// Equality feasibility tolerance: stop when max|A·x + b| < tol.
    pub constraint_tol: f64,
    /// Stationarity tolerance on the box-projected Lagrangian gradient in
    /// flux coordinates.
    pub stationarity_tol: f64,
}

impl Default for ALSettings {
    fn default() -> Self {
        Self {
            mu_init: 10.0,
            mu_factor: 5.0,
            mu_max: 1e8,
            max_outer_iters: 50,
            constraint_tol: 1e-6,
            stationarity_tol: 1e-7,
        }
    }
}

/// Configuration of the single-case solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    /// Number of random restarts in fitted mode.
    pub repeat: usize,
    /// `false` reports the first feasible point without optimising.
    pub fitted: bool,
    /// Inner L-BFGS iteration cap.
    pub max_iterations: usize,
    /// Number of L-BFGS correction pairs.
    pub lbfgs_memory: usize,
    pub tolerance_grad: f64,
    pub tolerance_cost: f64,
    pub al: ALSettings,
    pub start: StartPointOptions,
    /// Base seed; case `i` uses `seed + i`.  `None` draws from entropy.
    pub seed: Option<u64>,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            repeat: 10,
            fitted: true,
            max_iterations: 500,
            lbfgs_memory: 10,
            tolerance_grad: 1e-8,
            tolerance_cost: 1e-12,
            al: ALSettings::default(),
            start: StartPointOptions::default(),
            seed: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────
//  Augmented Lagrangian state
// ─────────────────────────────────────────────────────────────

/// Multiplier estimates and penalty for the equality rows.
#[derive(Debug, Clone)]
pub struct ALState {
    /// One multiplier per equality row.
    pub lambdas: Vec<f64>,
    /// Current penalty parameter μ.
    pub mu: f64,
}

impl ALState {
    pub fn new(num_rows: usize, settings: &ALSettings) -> Self {
        Self {
            lambdas: vec![0.0; num_rows],
            mu: settings.mu_init,
        }
    }
}

// ─────────────────────────────────────────────────────────────
//  Solve result
// ─────────────────────────────────────────────────────────────

/// Outcome of one sweep case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolveResult {
    /// Solved flux values; empty when the case failed.
    pub flux_values: FluxValues,
    /// Achieved cross-entropy, [`FAILED_OBJ_VALUE`] on failure.
    pub obj_value: f64,
    pub success: bool,
    /// Entropy of the target, the lowest reachable objective.
    pub minimal_obj_value: f64,
    pub label: Option<ScenarioLabel>,
}

impl SolveResult {
    /// Sentinel for a case without any usable solution.
    pub fn failed(minimal_obj_value: f64, label: Option<ScenarioLabel>) -> Self {
        Self {
            flux_values: FluxValues::new(),
            obj_value: FAILED_OBJ_VALUE,
            success: false,
            minimal_obj_value,
            label,
        }
    }

    /// Distance from the theoretical optimum; `NaN` for failed cases.
    pub fn obj_diff(&self) -> f64 {
        if self.success {
            self.obj_value - self.minimal_obj_value
        } else {
            f64::NAN
        }
    }
}

// ─────────────────────────────────────────────────────────────
//  Case specification  (input of the single-case solver)
// ─────────────────────────────────────────────────────────────

/// Everything that varies between the cases of one sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseSpec {
    pub constant_fluxes: ConstantFluxes,
    pub bounds: Bounds,
    pub label: Option<ScenarioLabel>,
}
