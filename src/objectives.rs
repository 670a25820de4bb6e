//! Cross-entropy objective between observed and predicted MIDs.
//!
//! The predicted MID of each constraint is the flux-weighted mixture of the
//! substrate MIDs:
//!
//!   p = S·x / (F·x) + ε
//!
//! and the loss is the cross-entropy `−t · ln p`.  Its minimum over all
//! mixtures is the target's own entropy (`MidSystem::optimal_obj_value`).
//! The analytic gradient lives in `gradients.rs`.

use crate::constraints::MidSystem;
use crate::types::EPS_FOR_LOG;
use ndarray::{Array1, Array2, ArrayView1};

/// Pure function object over the MID matrices of one model.
#[derive(Debug, Clone, Copy)]
pub struct CrossEntropy<'a> {
    pub(crate) substrate_mid_matrix: &'a Array2<f64>,
    pub(crate) flux_sum_matrix: &'a Array2<f64>,
    pub(crate) target_mid_vector: &'a Array1<f64>,
}

impl<'a> CrossEntropy<'a> {
    pub fn new(mid: &'a MidSystem) -> Self {
        Self {
            substrate_mid_matrix: &mid.substrate_mid_matrix,
            flux_sum_matrix: &mid.flux_sum_matrix,
            target_mid_vector: &mid.target_mid_vector,
        }
    }

    pub fn num_fluxes(&self) -> usize {
        self.substrate_mid_matrix.ncols()
    }

    /// `S·x / (F·x) + ε`, one entry per isotopomer row.
    pub fn predicted_mid(&self, x: ArrayView1<f64>) -> Array1<f64> {
        let mixed = self.substrate_mid_matrix.dot(&x);
        let total = self.flux_sum_matrix.dot(&x);
        mixed / total + EPS_FOR_LOG
    }

    /// `−t · ln p`.  Points where the mixture is undefined (zero total flux,
    /// negative prediction) evaluate to `+∞`.
    pub fn value(&self, x: ArrayView1<f64>) -> f64 {
        let predicted = self.predicted_mid(x);
        let loss = -self
            .target_mid_vector
            .iter()
            .zip(predicted.iter())
            .map(|(&t, &p)| t * p.ln())
            .sum::<f64>();
        if loss.is_finite() {
            loss
        } else {
            f64::INFINITY
        }
    }
}
