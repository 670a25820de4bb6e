//! Feasible start point tests: randomised LP vertices must satisfy every
//! equality and bound of the true (unperturbed) problem.

use fluxfit::constraints::*;
use fluxfit::feasible::{feasible_start_point, lp_attempt, AttemptFailure};
use fluxfit::types::*;
use ndarray::ArrayView1;
use rand::rngs::StdRng;
use rand::SeedableRng;

// ─────────────────────────────────────────────────────────────
//  Helpers
// ─────────────────────────────────────────────────────────────

/// Chain network:  f1 + f2 → f3 → f4,  f5 leaves node A separately.
fn make_model() -> ModelSystem {
    let index = FluxIndex::from_names(["f1", "f2", "f3", "f4", "f5"]).unwrap();
    let balances = vec![
        BalanceConstraint::new("A", ["f1", "f2"], ["f3", "f5"]),
        BalanceConstraint::new("B", ["f3"], ["f4"]),
    ];
    let mids = vec![MidConstraint::new(
        vec![("f1", vec![1.0, 0.0]), ("f2", vec![0.0, 1.0])],
        vec![0.9, 0.1],
    )];
    ModelSystem::build(index, &balances, &mids).unwrap()
}

fn assert_feasible(eq: &EqualitySystem, bounds: &Bounds, x: &[f64]) {
    let violation = eq.max_violation(ArrayView1::from(x));
    assert!(violation < 1e-6, "equality violation {violation:e} at {x:?}");
    assert!(bounds.contains(x, 1e-6), "{x:?} outside bounds");
}

// ─────────────────────────────────────────────────────────────
//  Tests
// ─────────────────────────────────────────────────────────────

#[test]
fn start_points_are_feasible_over_many_trials() {
    let model = make_model();
    let mut constants = ConstantFluxes::new();
    constants.insert("f4".into(), 50.0);
    let eq = model.equality_system(&constants).unwrap();
    let bounds = Bounds::uniform(5, 0.0, 100.0);
    let options = StartPointOptions::default();
    let mut rng = StdRng::seed_from_u64(7);

    let mut found = 0;
    let mut distinct = Vec::<Vec<f64>>::new();
    for _ in 0..100 {
        if let Some(x) = feasible_start_point(&eq, &bounds, &options, &mut rng) {
            assert_feasible(&eq, &bounds, &x);
            // Perturbed lower bounds keep every flux ≥ 1.
            assert!(x.iter().all(|&v| v >= 1.0 - 1e-9), "{x:?}");
            if !distinct.iter().any(|d| d.iter().zip(&x).all(|(a, b)| (a - b).abs() < 1e-9)) {
                distinct.push(x);
            }
            found += 1;
        }
    }
    eprintln!("feasible trials: {found}/100 succeeded, {} distinct vertices", distinct.len());
    assert!(found >= 95, "only {found} of 100 trials found a start point");
    assert!(distinct.len() > 1, "random costs should reach different vertices");
}

#[test]
fn start_point_without_equalities_respects_box() {
    let eq = EqualitySystem::empty(3);
    let bounds = Bounds { lower: vec![0.0, 10.0, -5.0], upper: vec![20.0, 30.0, 50.0] };
    let mut rng = StdRng::seed_from_u64(1);
    let x = feasible_start_point(&eq, &bounds, &StartPointOptions::default(), &mut rng)
        .expect("box alone is always feasible");
    assert_feasible(&eq, &bounds, &x);
}

#[test]
fn empty_box_gives_none() {
    let model = make_model();
    let eq = model.equality_system(&ConstantFluxes::new()).unwrap();
    let mut bounds = Bounds::uniform(5, 0.0, 100.0);
    bounds.lower[2] = 80.0;
    bounds.upper[2] = 10.0;
    let mut rng = StdRng::seed_from_u64(3);
    assert!(feasible_start_point(&eq, &bounds, &StartPointOptions::default(), &mut rng).is_none());
    assert!(matches!(
        lp_attempt(&eq, &bounds, &StartPointOptions::default(), &mut rng),
        Err(AttemptFailure::EmptyBox { flux: 2 })
    ));
}

/// f4 fixed above what its upper bound allows: the LP is infeasible on
/// every attempt.
#[test]
fn infeasible_fixed_flux_gives_none() {
    let model = make_model();
    let mut constants = ConstantFluxes::new();
    constants.insert("f4".into(), 500.0);
    let eq = model.equality_system(&constants).unwrap();
    let bounds = Bounds::uniform(5, 0.0, 100.0);
    let mut rng = StdRng::seed_from_u64(11);
    assert!(feasible_start_point(&eq, &bounds, &StartPointOptions::default(), &mut rng).is_none());
}

#[test]
fn zero_attempts_gives_none() {
    let eq = EqualitySystem::empty(2);
    let bounds = Bounds::uniform(2, 0.0, 100.0);
    let options = StartPointOptions { max_failed_attempts: 0, ..StartPointOptions::default() };
    let mut rng = StdRng::seed_from_u64(0);
    assert!(feasible_start_point(&eq, &bounds, &options, &mut rng).is_none());
}

#[test]
fn seeded_search_is_reproducible() {
    let model = make_model();
    let eq = model.equality_system(&ConstantFluxes::new()).unwrap();
    let bounds = Bounds::uniform(5, 0.0, 100.0);
    let options = StartPointOptions::default();
    let a = feasible_start_point(&eq, &bounds, &options, &mut StdRng::seed_from_u64(42));
    let b = feasible_start_point(&eq, &bounds, &options, &mut StdRng::seed_from_u64(42));
    assert_eq!(a, b);
    let x = a.expect("unconstrained flux levels are always feasible");
    assert_feasible(&eq, &bounds, &x);
}

/// No fixed fluxes, box `[0, U]`: every seed yields a point with `A·x = 0`
/// inside the box.
#[test]
fn balance_only_start_points_are_feasible_for_every_seed() {
    let model = make_model();
    let eq = model.equality_system(&ConstantFluxes::new()).unwrap();
    assert!(eq.offset.iter().all(|&b| b == 0.0));
    let bounds = Bounds::uniform(5, 0.0, 500.0);
    let options = StartPointOptions::default();

    for seed in 0..50 {
        let mut rng = StdRng::seed_from_u64(seed);
        let x = feasible_start_point(&eq, &bounds, &options, &mut rng)
            .unwrap_or_else(|| panic!("seed {seed}: no start point"));
        assert_feasible(&eq, &bounds, &x);
    }
}
