//! Scenario layer: the contracts between the sweep and its host.
//!
//! A host supplies
//!   1. a [`DataLoader`] that reads the experimental data,
//!   2. a [`ModelConstructor`] that turns the data into balance and MID
//!      constraints,
//!   3. a [`ScenarioStrategy`] that fixes everything shared by all cases
//!      ([`ConstantParameters`]) and enumerates the per-case parameters
//!      ([`ParameterSequence`]).
//!
//! Strategies are looked up by name in a [`ScenarioRegistry`].

use crate::constraints::ModelSystem;
use crate::types::{
    BalanceConstraint, Bounds, CaseSpec, ConstantFluxes, FluxError, FluxIndex, FluxResult,
    FreeVariable, MidConstraint, ScenarioLabel, SolverOptions,
};
use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Keyword bag forwarded verbatim from the host to loaders and strategies.
pub type ScenarioOptions = BTreeMap<String, String>;

/// What a strategy knows about the sweep it is preparing.
#[derive(Debug, Clone, Default)]
pub struct ScenarioContext {
    pub model_name: String,
    pub worker_count: usize,
    /// Strategies may shrink their grids when set.
    pub test_mode: bool,
    pub options: ScenarioOptions,
}

// ─────────────────────────────────────────────────────────────
//  Parameters
// ─────────────────────────────────────────────────────────────

/// Parameters of one case, layered over [`ConstantParameters`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaseParameters {
    /// Fixed fluxes of this case; they override the shared ones.
    pub constant_fluxes: ConstantFluxes,
    /// Replaces the shared bounds when present.
    pub bounds: Option<Bounds>,
    pub label: Option<ScenarioLabel>,
}

/// Everything shared by the cases of one sweep.
#[derive(Debug, Clone)]
pub struct ConstantParameters {
    pub system: ModelSystem,
    pub bounds: Bounds,
    /// Fixed fluxes applied to every case.
    pub constant_fluxes: ConstantFluxes,
    pub solver: SolverOptions,
    pub model_name: String,
    /// Created before the global hook runs.
    pub output_dir: PathBuf,
}

impl ConstantParameters {
    /// Merge one case's parameters over the shared ones.
    ///
    /// A case flux that is already fixed keeps its row position and takes
    /// the case value.
    pub fn case_spec(&self, case: &CaseParameters) -> CaseSpec {
        let mut constant_fluxes = self.constant_fluxes.clone();
        for (name, &value) in &case.constant_fluxes {
            constant_fluxes.insert(name.clone(), value);
        }
        CaseSpec {
            constant_fluxes,
            bounds: case.bounds.clone().unwrap_or_else(|| self.bounds.clone()),
            label: case.label.clone(),
        }
    }
}

// ─────────────────────────────────────────────────────────────
//  Parameter sequences
// ─────────────────────────────────────────────────────────────

/// Finite, random-access sequence of case parameters.
///
/// `get(i)` must be a pure function of `i` so the sequence can be walked in
/// any order and any number of times.
pub trait ParameterSequence: Send + Sync {
    fn len(&self) -> usize;

    fn get(&self, index: usize) -> Option<CaseParameters>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ParameterSequence for Vec<CaseParameters> {
    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn get(&self, index: usize) -> Option<CaseParameters> {
        self.as_slice().get(index).cloned()
    }
}

/// Cartesian product of sweep axes, mapped to fixed fluxes.
///
/// Case order is row-major: the last axis varies fastest.  Every case is
/// labelled with its axis values.
pub struct ParameterGrid<F> {
    axes: Vec<FreeVariable>,
    to_fluxes: F,
}

impl<F> ParameterGrid<F>
where
    F: Fn(&ScenarioLabel) -> ConstantFluxes + Send + Sync,
{
    pub fn new(axes: Vec<FreeVariable>, to_fluxes: F) -> Self {
        Self { axes, to_fluxes }
    }

    pub fn axes(&self) -> &[FreeVariable] {
        &self.axes
    }

    /// Axis values of case `index`.
    pub fn label(&self, index: usize) -> Option<ScenarioLabel> {
        if index >= ParameterSequence::len(self) {
            return None;
        }
        let mut rest = index;
        let mut label = ScenarioLabel::new();
        for axis in self.axes.iter().rev() {
            let value = axis.value(rest % axis.len())?;
            label.insert(axis.name().to_string(), value);
            rest /= axis.len();
        }
        Some(label)
    }
}

impl<F> ParameterSequence for ParameterGrid<F>
where
    F: Fn(&ScenarioLabel) -> ConstantFluxes + Send + Sync,
{
    fn len(&self) -> usize {
        self.axes.iter().map(FreeVariable::len).product()
    }

    fn get(&self, index: usize) -> Option<CaseParameters> {
        let label = self.label(index)?;
        Some(CaseParameters {
            constant_fluxes: (self.to_fluxes)(&label),
            bounds: None,
            label: Some(label),
        })
    }
}

// ─────────────────────────────────────────────────────────────
//  Host contracts
// ─────────────────────────────────────────────────────────────

/// Reads the experimental data a model is built from.
pub trait DataLoader<D> {
    fn load(&self, options: &ScenarioOptions) -> FluxResult<D>;
}

impl<D, F> DataLoader<D> for F
where
    F: Fn(&ScenarioOptions) -> FluxResult<D>,
{
    fn load(&self, options: &ScenarioOptions) -> FluxResult<D> {
        self(options)
    }
}

/// Symbolic constraints of one model topology.
pub trait ModelConstructor<D> {
    fn construct(&self, data: &D) -> FluxResult<(Vec<BalanceConstraint>, Vec<MidConstraint>)>;
}

impl<D, F> ModelConstructor<D> for F
where
    F: Fn(&D) -> FluxResult<(Vec<BalanceConstraint>, Vec<MidConstraint>)>,
{
    fn construct(&self, data: &D) -> FluxResult<(Vec<BalanceConstraint>, Vec<MidConstraint>)> {
        self(data)
    }
}

/// Run a constructor and assemble the matrices over `flux_index`.
pub fn assemble_model<D, M>(constructor: &M, data: &D, flux_index: FluxIndex) -> FluxResult<ModelSystem>
where
    M: ModelConstructor<D> + ?Sized,
{
    let (balances, mids) = constructor.construct(data)?;
    tracing::debug!(
        fluxes = flux_index.len(),
        balances = balances.len(),
        mid_constraints = mids.len(),
        "assembling model"
    );
    ModelSystem::build(flux_index, &balances, &mids)
}

/// Output of a strategy: shared parameters plus the per-case sequence.
pub type PreparedScenario = (ConstantParameters, Box<dyn ParameterSequence>);

/// Builds the parameters of one sweep from loaded data.
pub trait ScenarioStrategy<D> {
    fn prepare(&self, data: &D, context: &ScenarioContext) -> FluxResult<PreparedScenario>;
}

impl<D, F> ScenarioStrategy<D> for F
where
    F: Fn(&D, &ScenarioContext) -> FluxResult<PreparedScenario>,
{
    fn prepare(&self, data: &D, context: &ScenarioContext) -> FluxResult<PreparedScenario> {
        self(data, context)
    }
}

// ─────────────────────────────────────────────────────────────
//  Registry
// ─────────────────────────────────────────────────────────────

/// Named scenario strategies, in registration order.
pub struct ScenarioRegistry<D> {
    strategies: IndexMap<String, Box<dyn ScenarioStrategy<D>>>,
}

impl<D> Default for ScenarioRegistry<D> {
    fn default() -> Self {
        Self { strategies: IndexMap::new() }
    }
}

impl<D> ScenarioRegistry<D> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `strategy` under `name`, replacing any earlier entry.
    pub fn register<S>(&mut self, name: impl Into<String>, strategy: S) -> &mut Self
    where
        S: ScenarioStrategy<D> + 'static,
    {
        self.strategies.insert(name.into(), Box::new(strategy));
        self
    }

    pub fn resolve(&self, name: &str) -> FluxResult<&dyn ScenarioStrategy<D>> {
        self.strategies
            .get(name)
            .map(|s| &**s)
            .ok_or_else(|| FluxError::UnknownScenario(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.strategies.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}
