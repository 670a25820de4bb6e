//! Hand-coded gradients of the cross-entropy and of the augmented
//! Lagrangian used by the optimiser.
//!
//! With  sᵢ = Sᵢ·x,  fᵢ = Fᵢ·x,  pᵢ = sᵢ/fᵢ + ε  the loss is  J = −Σ tᵢ ln pᵢ
//! and
//!
//!   ∂J/∂x = −Σᵢ (tᵢ / pᵢ) · (Sᵢ fᵢ − sᵢ Fᵢ) / fᵢ²
//!
//! For ε → 0 this is the familiar  t · (F/(F·x) − S/(S·x)),  but the form
//! above stays finite when a bin has sᵢ = 0.

use crate::constraints::EqualitySystem;
use crate::objectives::CrossEntropy;
use crate::transforms::BoundTransform;
use crate::types::{ALState, EPS_FOR_LOG};
use ndarray::{Array1, ArrayView1};

impl CrossEntropy<'_> {
    /// Analytic gradient of [`CrossEntropy::value`].
    pub fn gradient(&self, x: ArrayView1<f64>) -> Array1<f64> {
        self.value_and_gradient(x).1
    }

    /// Loss and gradient sharing the two matrix–vector products.
    pub fn value_and_gradient(&self, x: ArrayView1<f64>) -> (f64, Array1<f64>) {
        let mixed = self.substrate_mid_matrix.dot(&x);
        let total = self.flux_sum_matrix.dot(&x);

        let mut loss = 0.0;
        // w_i = −(t_i / p_i) / f_i²
        let mut w = Array1::zeros(mixed.len());
        for i in 0..mixed.len() {
            let p = mixed[i] / total[i] + EPS_FOR_LOG;
            let t = self.target_mid_vector[i];
            loss -= t * p.ln();
            w[i] = -(t / p) / (total[i] * total[i]);
        }

        // Σ w_i (S_i f_i − s_i F_i)  =  Sᵀ(w∘f) − Fᵀ(w∘s)
        let grad = self.substrate_mid_matrix.t().dot(&(&w * &total))
            - self.flux_sum_matrix.t().dot(&(&w * &mixed));

        let loss = if loss.is_finite() { loss } else { f64::INFINITY };
        (loss, grad)
    }
}

// ─────────────────────────────────────────────────────────────
//  Augmented Lagrangian in transformed coordinates
// ─────────────────────────────────────────────────────────────

/// L(x) = J(x) + λ·h(x) + (μ/2)‖h(x)‖²,  h(x) = A·x + b.
///
/// Value and dL/dx in flux coordinates.  `al = None` evaluates the bare
/// objective.
pub fn lagrangian_value_and_gradient(
    objective: &CrossEntropy<'_>,
    equality: &EqualitySystem,
    al: Option<&ALState>,
    x: ArrayView1<f64>,
) -> (f64, Array1<f64>) {
    let (mut value, mut grad_x) = objective.value_and_gradient(x);

    if let Some(al) = al {
        if equality.num_rows() > 0 {
            let h = equality.residual(x);
            let lambdas = ArrayView1::from(al.lambdas.as_slice());
            value += lambdas.dot(&h) + 0.5 * al.mu * h.dot(&h);
            // ∂/∂x = Aᵀ(λ + μh)
            let weights = &lambdas + &(&h * al.mu);
            grad_x = grad_x + equality.matrix.t().dot(&weights);
        }
    }
    (value, grad_x)
}

/// The same Lagrangian in optimiser coordinates, x = T(y).
///
/// Returns the value and dL/dy.
pub fn penalized_value_and_gradient(
    objective: &CrossEntropy<'_>,
    equality: &EqualitySystem,
    transform: &BoundTransform,
    al: Option<&ALState>,
    y: &[f64],
) -> (f64, Vec<f64>) {
    let x = Array1::from(transform.to_bounded(y));
    let (value, grad_x) = lagrangian_value_and_gradient(objective, equality, al, x.view());
    let grad_x = grad_x.to_vec();
    (value, transform.chain_gradient(y, &grad_x))
}
