//! Hooks called by the sweep: one per case, one after all cases.

use crate::scenario::{ConstantParameters, ParameterSequence};
use crate::types::{FluxResult, FluxValues, SolveResult};
use serde::{Deserialize, Serialize};

/// Per-case breakdown computed from the solved fluxes.
///
/// Called with `empty = true` and an empty flux map for failed cases, so
/// every case yields a record of the same shape.
pub trait ContributionHook<B>: Sync {
    fn contribution(&self, flux_values: &FluxValues, empty: bool) -> (bool, B);
}

impl<B, F> ContributionHook<B> for F
where
    F: Fn(&FluxValues, bool) -> (bool, B) + Sync,
{
    fn contribution(&self, flux_values: &FluxValues, empty: bool) -> (bool, B) {
        self(flux_values, empty)
    }
}

/// Uniform per-case summary handed to the global hook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookRecord<B> {
    /// `obj_value − minimal_obj_value`; `NaN` for failed cases.
    pub obj_diff: f64,
    pub valid: bool,
    pub contribution: B,
}

/// Adapt one case result to a [`HookRecord`].
pub fn process_case_result<B, H>(result: &SolveResult, hook: &H) -> HookRecord<B>
where
    H: ContributionHook<B> + ?Sized,
{
    let (valid, contribution) = hook.contribution(&result.flux_values, !result.success);
    HookRecord { obj_diff: result.obj_diff(), valid, contribution }
}

/// Runs once after every case finished and the output directory exists.
pub trait GlobalHook<B> {
    fn finish(
        &mut self,
        results: &[SolveResult],
        records: &[HookRecord<B>],
        constants: &ConstantParameters,
        sequence: &dyn ParameterSequence,
    ) -> FluxResult<()>;
}

impl<B, F> GlobalHook<B> for F
where
    F: FnMut(&[SolveResult], &[HookRecord<B>], &ConstantParameters, &dyn ParameterSequence) -> FluxResult<()>,
{
    fn finish(
        &mut self,
        results: &[SolveResult],
        records: &[HookRecord<B>],
        constants: &ConstantParameters,
        sequence: &dyn ParameterSequence,
    ) -> FluxResult<()> {
        self(results, records, constants, sequence)
    }
}

/// Real contribution of each tissue from its net flux.
///
/// Positive net fluxes are reduced by their proportional share of the total
/// outgoing (negative) flux; non-positive entries contribute nothing.
pub fn net_flux_contribution(net_fluxes: &[f64]) -> Vec<f64> {
    let total_input: f64 = net_fluxes.iter().filter(|&&f| f > 0.0).sum();
    let total_output: f64 = -net_fluxes.iter().filter(|&&f| f <= 0.0).sum::<f64>();
    net_fluxes
        .iter()
        .map(|&f| if f > 0.0 { f - f / total_input * total_output } else { 0.0 })
        .collect()
}
