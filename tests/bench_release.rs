//! Release-mode benchmarks for the flux fitting pipeline.
//!
//! Run with:   cargo test --release --test bench_release -- --nocapture
//!
//! These are not criterion benchmarks (to avoid an extra dependency);
//! instead they time key operations using `std::time::Instant` and print
//! the results.

use fluxfit::constraints::ModelSystem;
use fluxfit::objectives::CrossEntropy;
use fluxfit::optimizer::solve_case;
use fluxfit::scenario::*;
use fluxfit::sweep::{run_sweep, SweepSettings};
use fluxfit::hooks::HookRecord;
use fluxfit::types::*;
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::Instant;

// ─────────────────────────────────────────────────────────────
//  Helpers
// ─────────────────────────────────────────────────────────────

/// `n` sources `s0..s{n−1}` feeding one product `p`, observed through a
/// single MID of `dim` bins.  Source `i` carries a bump centred on bin
/// `i mod dim`; the target is the even mixture.
fn make_star_model(n: usize, dim: usize) -> ModelSystem {
    let mut names: Vec<String> = (0..n).map(|i| format!("s{i}")).collect();
    names.push("p".into());
    let index = FluxIndex::from_names(names.iter().cloned()).unwrap();

    let balances = vec![BalanceConstraint::new("p_node", names[..n].to_vec(), vec!["p".to_string()])];

    let mids: Vec<(String, Vec<f64>)> = (0..n)
        .map(|i| {
            let centre = i % dim;
            let mut mid = vec![0.05 / dim as f64; dim];
            mid[centre] += 0.95;
            let total: f64 = mid.iter().sum();
            (names[i].clone(), mid.into_iter().map(|v| v / total).collect())
        })
        .collect();
    let mut target = vec![0.0; dim];
    for (_, mid) in &mids {
        for (t, m) in target.iter_mut().zip(mid) {
            *t += m / n as f64;
        }
    }

    ModelSystem::build(index, &balances, &[MidConstraint::new(mids, target)]).unwrap()
}

fn star_case(n: usize) -> CaseSpec {
    let mut constant_fluxes = ConstantFluxes::new();
    constant_fluxes.insert("p".into(), 100.0);
    CaseSpec { constant_fluxes, bounds: Bounds::uniform(n + 1, 0.0, 1000.0), label: None }
}

const SIZES: &[(usize, usize)] = &[(4, 3), (16, 5), (64, 7), (256, 9)];

fn fmt_time(us: f64) -> String {
    if us >= 1_000_000.0 { format!("{:.2} s",  us / 1e6) }
    else if us >= 1_000.0 { format!("{:.2} ms", us / 1e3) }
    else { format!("{:.1} μs", us) }
}

// ─────────────────────────────────────────────────────────────
//  Benchmarks
// ─────────────────────────────────────────────────────────────

#[test]
fn bench_model_assembly_scaling() {
    eprintln!("\n┌───────────────────────────────────────────────┐");
    eprintln!("│           MODEL ASSEMBLY  (balance + MID)     │");
    eprintln!("├──────────┬──────────┬───────────┬────────────┤");
    eprintln!("│  fluxes  │  bins    │  per-build│  iters     │");
    eprintln!("├──────────┼──────────┼───────────┼────────────┤");

    for &(n, dim) in SIZES {
        let iters = if n < 64 { 2000 } else { 200 };
        let start = Instant::now();
        for _ in 0..iters {
            let model = make_star_model(n, dim);
            let _ = std::hint::black_box(model);
        }
        let per_us = start.elapsed().as_micros() as f64 / iters as f64;
        eprintln!("│ {:>8} │ {:>8} │ {:>9} │ {:>10} │", n + 1, dim, fmt_time(per_us), iters);
    }
    eprintln!("└──────────┴──────────┴───────────┴────────────┘\n");
}

#[test]
fn bench_value_and_gradient_scaling() {
    eprintln!("\n┌───────────────────────────────────────────────┐");
    eprintln!("│           VALUE + GRADIENT  (cross-entropy)   │");
    eprintln!("├──────────┬──────────┬───────────┬────────────┤");
    eprintln!("│  fluxes  │  bins    │  per-eval │  iters     │");
    eprintln!("├──────────┼──────────┼───────────┼────────────┤");

    for &(n, dim) in SIZES {
        let model = make_star_model(n, dim);
        let objective = CrossEntropy::new(&model.mid);
        let x = Array1::from_elem(n + 1, 100.0 / n as f64);

        let iters = 20_000;
        let start = Instant::now();
        for _ in 0..iters {
            let _ = std::hint::black_box(objective.value_and_gradient(x.view()));
        }
        let per_us = start.elapsed().as_micros() as f64 / iters as f64;
        eprintln!("│ {:>8} │ {:>8} │ {:>9} │ {:>10} │", n + 1, dim, fmt_time(per_us), iters);
    }
    eprintln!("└──────────┴──────────┴───────────┴────────────┘\n");
}

#[test]
fn bench_single_case_solve() {
    eprintln!("\n┌───────────────────────────────────────────────┐");
    eprintln!("│        SINGLE CASE  (5 restarts, AL+L-BFGS)   │");
    eprintln!("├──────────┬──────────┬───────────┬────────────┤");
    eprintln!("│  fluxes  │  obj_diff│  per-solve│  runs      │");
    eprintln!("├──────────┼──────────┼───────────┼────────────┤");

    let options = SolverOptions { repeat: 5, ..SolverOptions::default() };
    for &(n, dim) in &SIZES[..3] {
        let model = make_star_model(n, dim);
        let case = star_case(n);
        let runs = if n < 64 { 5 } else { 1 };

        let mut diff = f64::NAN;
        let start = Instant::now();
        for run in 0..runs {
            let mut rng = StdRng::seed_from_u64(run as u64);
            let result = solve_case(&model, &case, &options, &mut rng).unwrap();
            diff = result.obj_diff();
        }
        let per_us = start.elapsed().as_micros() as f64 / runs as f64;
        eprintln!("│ {:>8} │ {:>8.1e} │ {:>9} │ {:>10} │", n + 1, diff, fmt_time(per_us), runs);
    }
    eprintln!("└──────────┴──────────┴───────────┴────────────┘\n");
}

#[test]
fn bench_parallel_sweep() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().to_path_buf();
    let n = 16;
    let strategy = move |_: &(), _: &ScenarioContext| -> FluxResult<PreparedScenario> {
        let axis = FreeVariable::new("p", 39, (50.0, 250.0), 10)?;
        let grid = ParameterGrid::new(vec![axis], |label: &ScenarioLabel| {
            let mut fluxes = ConstantFluxes::new();
            fluxes.insert("p".into(), label["p"]);
            fluxes
        });
        let constants = ConstantParameters {
            system: make_star_model(n, 5),
            bounds: Bounds::uniform(n + 1, 0.0, 1000.0),
            constant_fluxes: ConstantFluxes::new(),
            solver: SolverOptions { repeat: 3, seed: Some(1), ..SolverOptions::default() },
            model_name: "star".into(),
            output_dir: out.clone(),
        };
        let sequence: Box<dyn ParameterSequence> = Box::new(grid);
        Ok((constants, sequence))
    };
    let loader = |_: &ScenarioOptions| -> FluxResult<()> { Ok(()) };
    let hook = |_: &FluxValues, empty: bool| -> (bool, ()) { (!empty, ()) };
    let mut global = |_: &[SolveResult], _: &[HookRecord<()>], _: &ConstantParameters, _: &dyn ParameterSequence| -> FluxResult<()> { Ok(()) };

    for workers in [1, 2, 4] {
        let settings = SweepSettings { model_name: "star".into(), workers: Some(workers), ..SweepSettings::default() };
        let start = Instant::now();
        let output = run_sweep(&loader, &strategy, &hook, &mut global, &settings).unwrap();
        let succeeded = output.results.iter().filter(|r| r.success).count();
        eprintln!(
            "sweep  workers={workers}  cases={}  succeeded={succeeded}  time={}",
            output.results.len(),
            fmt_time(start.elapsed().as_micros() as f64),
        );
    }
}
