//! Parallel sweep over a parameter sequence.
//!
//! Load data, let the strategy prepare the shared parameters and the case
//! sequence, solve every case on a dedicated rayon pool, then call the
//! global hook once with the results in sequence order.

use crate::hooks::{process_case_result, ContributionHook, GlobalHook, HookRecord};
use crate::optimizer::solve_case;
use crate::scenario::{
    ConstantParameters, DataLoader, ParameterSequence, ScenarioContext, ScenarioOptions,
    ScenarioRegistry, ScenarioStrategy,
};
use crate::types::{FluxError, FluxResult, SolveResult};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Roughly this many progress lines per sweep.
const PROGRESS_STEPS: usize = 20;

/// `cores − 1` on small machines (at least one), capped at 16 on big ones.
pub fn default_worker_count(cores: usize) -> usize {
    if cores < 10 {
        cores.saturating_sub(1).max(1)
    } else {
        cores.min(16)
    }
}

/// Minimum number of consecutive cases handed to one worker.
pub fn batch_size(workers: usize) -> usize {
    if workers < 8 {
        40
    } else {
        80
    }
}

fn available_cores() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

/// Host-side settings of one sweep.
#[derive(Debug, Clone, Default)]
pub struct SweepSettings {
    pub model_name: String,
    /// `None` picks [`default_worker_count`] for this machine.
    pub workers: Option<usize>,
    pub test_mode: bool,
    pub options: ScenarioOptions,
}

/// Everything a sweep produced, in sequence order.
#[derive(Debug)]
pub struct SweepOutput<B> {
    pub results: Vec<SolveResult>,
    pub hook_records: Vec<HookRecord<B>>,
    pub constants: ConstantParameters,
}

/// Per-case RNG: `seed + index` when seeded, fresh entropy otherwise.
fn case_rng(seed: Option<u64>, index: usize) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(index as u64)),
        None => StdRng::from_entropy(),
    }
}

/// Solve every case of `sequence` on `workers` threads.
///
/// Result `i` belongs to parameter set `i`.  The first configuration error
/// aborts the whole sweep; case failures come back as
/// `success = false`.
pub fn solve_sequence<B, H>(
    constants: &ConstantParameters,
    sequence: &dyn ParameterSequence,
    hook: &H,
    workers: usize,
) -> FluxResult<Vec<(SolveResult, HookRecord<B>)>>
where
    B: Send,
    H: ContributionHook<B> + ?Sized,
{
    let workers = workers.max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| FluxError::Pool(e.to_string()))?;

    let total = sequence.len();
    let batch = batch_size(workers);
    let report_every = (total / PROGRESS_STEPS).max(1);
    let finished = AtomicUsize::new(0);

    tracing::info!(
        model = %constants.model_name,
        cases = total,
        workers,
        batch,
        "starting sweep"
    );

    pool.install(|| {
        (0..total)
            .into_par_iter()
            .with_min_len(batch)
            .map(|i| {
                let params = sequence.get(i).ok_or_else(|| {
                    FluxError::Shape(format!("parameter sequence has no case {i} of {total}"))
                })?;
                let case = constants.case_spec(&params);
                let mut rng = case_rng(constants.solver.seed, i);
                let result = solve_case(&constants.system, &case, &constants.solver, &mut rng)?;
                let record = process_case_result(&result, hook);

                let done = finished.fetch_add(1, Ordering::Relaxed) + 1;
                if done % report_every == 0 || done == total {
                    tracing::info!(done, total, "sweep progress");
                }
                Ok((result, record))
            })
            .collect::<FluxResult<Vec<_>>>()
    })
}

/// Run a whole sweep and call `global` exactly once.
pub fn run_sweep<D, B, L, S, H, G>(
    loader: &L,
    strategy: &S,
    hook: &H,
    global: &mut G,
    settings: &SweepSettings,
) -> FluxResult<SweepOutput<B>>
where
    B: Send,
    L: DataLoader<D> + ?Sized,
    S: ScenarioStrategy<D> + ?Sized,
    H: ContributionHook<B> + ?Sized,
    G: GlobalHook<B> + ?Sized,
{
    let workers = settings
        .workers
        .unwrap_or_else(|| default_worker_count(available_cores()))
        .max(1);
    let data = loader.load(&settings.options)?;
    let context = ScenarioContext {
        model_name: settings.model_name.clone(),
        worker_count: workers,
        test_mode: settings.test_mode,
        options: settings.options.clone(),
    };
    let (constants, sequence) = strategy.prepare(&data, &context)?;

    let outcomes = solve_sequence(&constants, sequence.as_ref(), hook, workers)?;
    let (results, hook_records): (Vec<_>, Vec<_>) = outcomes.into_iter().unzip();

    let succeeded = results.iter().filter(|r| r.success).count();
    tracing::info!(succeeded, total = results.len(), "sweep finished");

    fs::create_dir_all(&constants.output_dir)?;
    global.finish(&results, &hook_records, &constants, sequence.as_ref())?;

    Ok(SweepOutput { results, hook_records, constants })
}

/// [`run_sweep`] with the strategy looked up by name.
pub fn run_registered_sweep<D, B, L, H, G>(
    loader: &L,
    registry: &ScenarioRegistry<D>,
    scenario: &str,
    hook: &H,
    global: &mut G,
    settings: &SweepSettings,
) -> FluxResult<SweepOutput<B>>
where
    B: Send,
    L: DataLoader<D> + ?Sized,
    H: ContributionHook<B> + ?Sized,
    G: GlobalHook<B> + ?Sized,
{
    let strategy = registry.resolve(scenario)?;
    run_sweep(loader, strategy, hook, global, settings)
}
