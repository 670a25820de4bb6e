//! Mass isotopomer distribution helpers: natural abundance, MID reshaping,
//! and evaluation of solved fluxes against the observed MIDs.

use crate::types::{ConstantFluxes, FluxError, FluxResult, FluxValues, MidConstraint, SolveResult};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Natural abundance of ¹³C.
pub const C13_RATIO: f64 = 0.01109;

/// Binomial MID of a molecule with `carbon_num` carbons at natural
/// abundance: `C(n,k)·r^k·(1−r)^(n−k)` for `k = 0..=n`.
pub fn natural_distribution(c13_ratio: f64, carbon_num: usize) -> Vec<f64> {
    let c12_ratio = 1.0 - c13_ratio;
    let mut binom = 1.0;
    (0..=carbon_num)
        .map(|k| {
            if k > 0 {
                binom = binom * (carbon_num + 1 - k) as f64 / k as f64;
            }
            binom * c13_ratio.powi(k as i32) * c12_ratio.powi((carbon_num - k) as i32)
        })
        .collect()
}

/// Reshape a MID onto `target_carbon_num` carbons.
///
/// M+0 and the fully labelled bin are kept; the remaining mass is spread
/// evenly over the inner bins.  The source must describe an even number of
/// carbons and the target needs at least one inner bin.
pub fn split_equal_distribution(source_mid: &[f64], target_carbon_num: usize) -> FluxResult<Vec<f64>> {
    let (Some(&first), Some(&last)) = (source_mid.first(), source_mid.last()) else {
        return Err(FluxError::Shape("cannot split an empty MID".into()));
    };
    let carbon_num = source_mid.len() - 1;
    if carbon_num % 2 != 0 {
        return Err(FluxError::Shape(format!(
            "MID of {carbon_num} carbons cannot be split, carbon number must be even"
        )));
    }
    if target_carbon_num < 2 {
        return Err(FluxError::Shape(format!(
            "split target of {target_carbon_num} carbons has no inner bins"
        )));
    }
    let average = (1.0 - first - last) / (target_carbon_num - 1) as f64;
    let mut output = vec![average; target_carbon_num + 1];
    output[0] = first;
    output[target_carbon_num] = last;
    Ok(output)
}

/// Full discrete convolution, length `a.len() + b.len() − 1`.
pub fn convolve(a: &[f64], b: &[f64]) -> Vec<f64> {
    if a.is_empty() || b.is_empty() {
        return Vec::new();
    }
    let mut out = vec![0.0; a.len() + b.len() - 1];
    for (i, &x) in a.iter().enumerate() {
        for (j, &y) in b.iter().enumerate() {
            out[i + j] += x * y;
        }
    }
    out
}

/// How raw MID measurements are reshaped before they enter a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MidReshape {
    #[default]
    None,
    /// Self-convolution (dimer of the measured fragment).
    Convolve,
    /// [`split_equal_distribution`] onto this many carbons.
    Split(usize),
}

/// Reshape every measurement and either average them bin-wise or
/// concatenate them.
pub fn collect_mids(vectors: &[Vec<f64>], reshape: MidReshape, mean: bool) -> FluxResult<Vec<f64>> {
    let reshaped = vectors
        .iter()
        .map(|v| match reshape {
            MidReshape::None => Ok(v.clone()),
            MidReshape::Convolve => Ok(convolve(v, v)),
            MidReshape::Split(n) => split_equal_distribution(v, n),
        })
        .collect::<FluxResult<Vec<_>>>()?;

    if !mean {
        return Ok(reshaped.concat());
    }
    let Some(dim) = reshaped.first().map(Vec::len) else {
        return Ok(Vec::new());
    };
    if let Some(bad) = reshaped.iter().find(|v| v.len() != dim) {
        return Err(FluxError::Shape(format!(
            "cannot average MIDs of length {dim} and {}",
            bad.len()
        )));
    }
    let count = reshaped.len() as f64;
    Ok((0..dim)
        .map(|k| reshaped.iter().map(|v| v[k]).sum::<f64>() / count)
        .collect())
}

// ─────────────────────────────────────────────────────────────
//  Prediction from solved fluxes
// ─────────────────────────────────────────────────────────────

/// Flux-weighted mixture of one constraint's substrate MIDs.
pub fn predict_mid(constraint: &MidConstraint, flux_values: &FluxValues) -> FluxResult<Vec<f64>> {
    let mut predicted = vec![0.0; constraint.dim()];
    let mut total = 0.0;
    for (flux, mid) in &constraint.contributions {
        let value = *flux_values
            .get(flux)
            .ok_or_else(|| FluxError::UnknownFlux(flux.clone()))?;
        total += value;
        for (p, &m) in predicted.iter_mut().zip(mid) {
            *p += value * m;
        }
    }
    for p in &mut predicted {
        *p /= total;
    }
    Ok(predicted)
}

/// Predicted MID of every constraint, keyed by constraint name.
///
/// `constant_fluxes` override entries of `flux_values`.
pub fn predict_mids(
    flux_values: &FluxValues,
    constant_fluxes: &ConstantFluxes,
    constraints: &[MidConstraint],
) -> FluxResult<IndexMap<String, Vec<f64>>> {
    let mut merged = flux_values.clone();
    for (name, &value) in constant_fluxes {
        merged.insert(name.clone(), value);
    }
    let mut predicted = IndexMap::with_capacity(constraints.len());
    for constraint in constraints {
        predicted.insert(constraint.name(), predict_mid(constraint, &merged)?);
    }
    Ok(predicted)
}

/// Spread of the predicted MIDs of one constraint across good fits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionSummary {
    pub target: Vec<f64>,
    pub mean: Vec<f64>,
    /// Population standard deviation.
    pub std: Vec<f64>,
    pub samples: usize,
}

/// Summarise predictions of all successful results whose `obj_diff` is
/// below `obj_tolerance`.  Constraints without any such result are absent.
pub fn prediction_summary(
    results: &[SolveResult],
    constraints: &[MidConstraint],
    obj_tolerance: f64,
) -> FluxResult<IndexMap<String, PredictionSummary>> {
    let mut collected: IndexMap<String, Vec<Vec<f64>>> = IndexMap::new();
    for result in results.iter().filter(|r| r.success && r.obj_diff() < obj_tolerance) {
        for (name, predicted) in predict_mids(&result.flux_values, &ConstantFluxes::new(), constraints)? {
            collected.entry(name).or_default().push(predicted);
        }
    }

    let mut summary = IndexMap::new();
    for constraint in constraints {
        let name = constraint.name();
        let Some(samples) = collected.get(&name) else {
            continue;
        };
        let n = samples.len() as f64;
        let dim = constraint.dim();
        let mean: Vec<f64> = (0..dim)
            .map(|k| samples.iter().map(|s| s[k]).sum::<f64>() / n)
            .collect();
        let std: Vec<f64> = (0..dim)
            .map(|k| (samples.iter().map(|s| (s[k] - mean[k]).powi(2)).sum::<f64>() / n).sqrt())
            .collect();
        summary.insert(
            name,
            PredictionSummary { target: constraint.target.clone(), mean, std, samples: samples.len() },
        );
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn natural_distribution_sums_to_one() {
        let mid = natural_distribution(C13_RATIO, 6);
        assert_eq!(mid.len(), 7);
        assert!((mid.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!((mid[0] - (1.0 - C13_RATIO).powi(6)).abs() < 1e-15);
    }

    #[test]
    fn split_keeps_outer_bins() {
        let out = split_equal_distribution(&[0.5, 0.1, 0.1, 0.1, 0.2], 3).unwrap();
        assert_eq!(out.len(), 4);
        assert_eq!(out[0], 0.5);
        assert_eq!(out[3], 0.2);
        assert!((out[1] - 0.15).abs() < 1e-12);
        assert!((out[2] - 0.15).abs() < 1e-12);
    }

    #[test]
    fn split_rejects_odd_carbon_number() {
        assert!(split_equal_distribution(&[0.5, 0.3, 0.2, 0.0], 4).is_err());
    }

    #[test]
    fn convolve_matches_polynomial_product() {
        assert_eq!(convolve(&[0.5, 0.5], &[0.5, 0.5]), vec![0.25, 0.5, 0.25]);
    }

    #[test]
    fn collect_averages_bins() {
        let out = collect_mids(&[vec![1.0, 0.0], vec![0.5, 0.5]], MidReshape::None, true).unwrap();
        assert_eq!(out, vec![0.75, 0.25]);
        let flat = collect_mids(&[vec![1.0, 0.0], vec![0.5, 0.5]], MidReshape::None, false).unwrap();
        assert_eq!(flat.len(), 4);
    }

    fn solved(f1: f64, f2: f64, obj_value: f64, success: bool) -> SolveResult {
        SolveResult {
            flux_values: [("f1".to_string(), f1), ("f2".to_string(), f2)].into_iter().collect(),
            obj_value,
            success,
            minimal_obj_value: 0.3,
            label: None,
        }
    }

    #[test]
    fn summary_keeps_good_fits_only() {
        let mixing = MidConstraint::new(
            vec![("f1", vec![1.0, 0.0]), ("f2", vec![0.0, 1.0])],
            vec![0.9, 0.1],
        );
        let results = vec![
            solved(90.0, 10.0, 0.305, true),
            solved(70.0, 30.0, 0.305, true),
            // Too far from the optimum.
            solved(10.0, 90.0, 0.8, true),
            // Failed cases carry no usable fluxes.
            SolveResult::failed(0.3, None),
        ];

        let summary = prediction_summary(&results, &[mixing.clone()], 0.01).unwrap();
        let entry = &summary["f1_f2"];
        assert_eq!(entry.samples, 2);
        assert_eq!(entry.target, vec![0.9, 0.1]);
        assert!((entry.mean[0] - 0.8).abs() < 1e-12 && (entry.mean[1] - 0.2).abs() < 1e-12);
        // Population standard deviation of {0.9, 0.7} and {0.1, 0.3}.
        assert!((entry.std[0] - 0.1).abs() < 1e-12 && (entry.std[1] - 0.1).abs() < 1e-12);

        // No result passes: the constraint is absent rather than NaN.
        let strict = prediction_summary(&results, &[mixing], 1e-6).unwrap();
        assert!(strict.is_empty());
    }

    #[test]
    fn predict_mids_applies_constant_override() {
        let mixing = MidConstraint::new(
            vec![("f1", vec![1.0, 0.0]), ("f2", vec![0.0, 1.0])],
            vec![0.9, 0.1],
        );
        let fluxes: FluxValues = [("f1".to_string(), 30.0), ("f2".to_string(), 10.0)].into_iter().collect();
        let mut constants = ConstantFluxes::new();
        constants.insert("f2".into(), 30.0);
        let predicted = predict_mids(&fluxes, &constants, &[mixing]).unwrap();
        assert_eq!(predicted["f1_f2"], vec![0.5, 0.5]);
    }
}
