//! Constraint assembly: symbolic balance / MID / fixed-flux specifications →
//! dense matrices over the shared flux index.
//!
//! Every equality row follows the convention `A·x + b = 0`:
//!   * balance rows carry −1 per input flux, +1 per output flux, `b = 0`;
//!   * fixed-flux rows carry +1 at the flux, `b = −value`.
//!
//! Coefficients are accumulated, so a flux that is both input and output of
//! the same balance nets to zero.

use crate::types::{
    BalanceConstraint, ConstantFluxes, FluxError, FluxIndex, FluxResult, MidConstraint,
    EPS_FOR_LOG,
};
use ndarray::{concatenate, Array1, Array2, ArrayView1, Axis};

// ─────────────────────────────────────────────────────────────
//  Linear equality system
// ─────────────────────────────────────────────────────────────

/// Rows of `A·x + b = 0`.
#[derive(Debug, Clone, PartialEq)]
pub struct EqualitySystem {
    pub matrix: Array2<f64>,
    pub offset: Array1<f64>,
}

impl EqualitySystem {
    pub fn empty(num_fluxes: usize) -> Self {
        Self {
            matrix: Array2::zeros((0, num_fluxes)),
            offset: Array1::zeros(0),
        }
    }

    pub fn num_rows(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn num_fluxes(&self) -> usize {
        self.matrix.ncols()
    }

    /// Right-hand side in `A·x = rhs` form (`−b`).
    pub fn rhs(&self) -> Array1<f64> {
        -&self.offset
    }

    /// `A·x + b`.
    pub fn residual(&self, x: ArrayView1<f64>) -> Array1<f64> {
        self.matrix.dot(&x) + &self.offset
    }

    /// `max_i |A_i·x + b_i|`, zero when there are no rows.
    pub fn max_violation(&self, x: ArrayView1<f64>) -> f64 {
        self.residual(x).iter().fold(0.0_f64, |m, v| m.max(v.abs()))
    }

    /// Rows of `self` followed by rows of `other`.
    pub fn stack(&self, other: &EqualitySystem) -> FluxResult<EqualitySystem> {
        if self.num_fluxes() != other.num_fluxes() {
            return Err(FluxError::Shape(format!(
                "cannot stack equality systems over {} and {} fluxes",
                self.num_fluxes(),
                other.num_fluxes(),
            )));
        }
        let matrix = concatenate(Axis(0), &[self.matrix.view(), other.matrix.view()])
            .map_err(|e| FluxError::Shape(e.to_string()))?;
        let offset = concatenate(Axis(0), &[self.offset.view(), other.offset.view()])
            .map_err(|e| FluxError::Shape(e.to_string()))?;
        Ok(EqualitySystem { matrix, offset })
    }
}

// ─────────────────────────────────────────────────────────────
//  Balance rows
// ─────────────────────────────────────────────────────────────

/// One row per balance:  −1 per input, +1 per output, zero rhs.
pub fn flux_balance_constraints(
    balances: &[BalanceConstraint],
    index: &FluxIndex,
) -> FluxResult<EqualitySystem> {
    let n = index.len();
    let mut matrix = Array2::zeros((balances.len(), n));
    for (row, balance) in balances.iter().enumerate() {
        for name in &balance.inputs {
            matrix[[row, index.position(name)?]] -= 1.0;
        }
        for name in &balance.outputs {
            matrix[[row, index.position(name)?]] += 1.0;
        }
    }
    Ok(EqualitySystem {
        matrix,
        offset: Array1::zeros(balances.len()),
    })
}

// ─────────────────────────────────────────────────────────────
//  Fixed-flux rows
// ─────────────────────────────────────────────────────────────

/// One row per fixed flux:  +1 at the flux, offset −value.
pub fn constant_flux_constraints(
    constants: &ConstantFluxes,
    index: &FluxIndex,
) -> FluxResult<EqualitySystem> {
    let mut matrix = Array2::zeros((constants.len(), index.len()));
    let mut offset = Array1::zeros(constants.len());
    for (row, (name, &value)) in constants.iter().enumerate() {
        matrix[[row, index.position(name)?]] = 1.0;
        offset[row] = -value;
    }
    Ok(EqualitySystem { matrix, offset })
}

// ─────────────────────────────────────────────────────────────
//  MID rows
// ─────────────────────────────────────────────────────────────

/// Dense MID-matching system shared by the objective and its gradient.
#[derive(Debug, Clone, PartialEq)]
pub struct MidSystem {
    /// Row per isotopomer bin: MID value of each contributing flux.
    pub substrate_mid_matrix: Array2<f64>,
    /// Row per isotopomer bin: 1 at each contributing flux.
    pub flux_sum_matrix: Array2<f64>,
    /// Concatenated targets plus [`EPS_FOR_LOG`].
    pub target_mid_vector: Array1<f64>,
    /// `−Σ t·ln t` of the floored target.
    pub optimal_obj_value: f64,
}

/// Build the MID system; each constraint contributes `dim` consecutive rows.
pub fn mid_constraints(mids: &[MidConstraint], index: &FluxIndex) -> FluxResult<MidSystem> {
    for (i, mid) in mids.iter().enumerate() {
        mid.validate(i)?;
    }
    let n = index.len();
    let total_rows: usize = mids.iter().map(MidConstraint::dim).sum();
    let mut substrate_mid_matrix = Array2::zeros((total_rows, n));
    let mut flux_sum_matrix = Array2::zeros((total_rows, n));
    let mut target_mid_vector = Array1::zeros(total_rows);

    let mut row0 = 0;
    for mid in mids {
        for (flux, vector) in &mid.contributions {
            let col = index.position(flux)?;
            for (bin, &value) in vector.iter().enumerate() {
                substrate_mid_matrix[[row0 + bin, col]] = value;
                flux_sum_matrix[[row0 + bin, col]] = 1.0;
            }
        }
        for (bin, &t) in mid.target.iter().enumerate() {
            target_mid_vector[row0 + bin] = t + EPS_FOR_LOG;
        }
        row0 += mid.dim();
    }

    let optimal_obj_value = -target_mid_vector.iter().map(|&t| t * t.ln()).sum::<f64>();

    Ok(MidSystem {
        substrate_mid_matrix,
        flux_sum_matrix,
        target_mid_vector,
        optimal_obj_value,
    })
}

// ─────────────────────────────────────────────────────────────
//  Model system  (immutable, shared across all cases of a sweep)
// ─────────────────────────────────────────────────────────────

/// Everything about a model that does not change between sweep cases.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSystem {
    pub flux_index: FluxIndex,
    pub balance: EqualitySystem,
    pub mid: MidSystem,
    /// Kept for prediction / reporting.
    pub mid_constraints: Vec<MidConstraint>,
}

impl ModelSystem {
    pub fn build(
        flux_index: FluxIndex,
        balances: &[BalanceConstraint],
        mids: &[MidConstraint],
    ) -> FluxResult<Self> {
        let balance = flux_balance_constraints(balances, &flux_index)?;
        let mid = mid_constraints(mids, &flux_index)?;
        Ok(Self {
            flux_index,
            balance,
            mid,
            mid_constraints: mids.to_vec(),
        })
    }

    pub fn num_fluxes(&self) -> usize {
        self.flux_index.len()
    }

    /// Balance rows stacked on top of this case's fixed-flux rows.
    pub fn equality_system(&self, constants: &ConstantFluxes) -> FluxResult<EqualitySystem> {
        let fixed = constant_flux_constraints(constants, &self.flux_index)?;
        self.balance.stack(&fixed)
    }
}
