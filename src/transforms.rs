//! Smooth maps between unconstrained optimiser coordinates `y` and the flux
//! box `l ≤ x ≤ u`.
//!
//! Per coordinate:
//!   * `l < u`, both finite:  x = l + (u − l)·σ(y)
//!   * only `l` finite:       x = l + softplus(y)
//!   * only `u` finite:       x = u − softplus(y)
//!   * both infinite:         x = y
//!   * `l == u`:              x = l  (coordinate is inert)
//!
//! Fluxes therefore never leave the box during a line search.  Images are
//! kept a small margin away from finite bounds so that saturated
//! coordinates cannot drive a whole mixture to zero.

use crate::types::{Bounds, FluxError, FluxResult};

/// Fraction of an interval (or absolute gap for one-sided bounds) kept
/// between images and finite bounds.
const INTERVAL_MARGIN: f64 = 1e-9;

/// Stable logistic function.
#[inline]
pub fn logistic(y: f64) -> f64 {
    if y >= 0.0 {
        1.0 / (1.0 + (-y).exp())
    } else {
        let e = y.exp();
        e / (1.0 + e)
    }
}

/// Stable `ln(1 + eʸ)`.
#[inline]
pub fn softplus(y: f64) -> f64 {
    if y > 20.0 {
        y
    } else {
        y.exp().ln_1p()
    }
}

/// Inverse of [`softplus`] on `(0, ∞)`.
#[inline]
pub fn softplus_inv(x: f64) -> f64 {
    if x > 20.0 {
        x
    } else {
        x.exp_m1().ln()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Coordinate {
    Interval { lower: f64, width: f64 },
    Lower(f64),
    Upper(f64),
    Free,
    Fixed(f64),
}

/// Coordinate-wise bijection between ℝⁿ and a box.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundTransform {
    coords: Vec<Coordinate>,
}

impl BoundTransform {
    /// Fails if any lower bound exceeds its upper bound or is NaN.
    pub fn new(bounds: &Bounds) -> FluxResult<Self> {
        let coords = bounds
            .lower
            .iter()
            .zip(&bounds.upper)
            .enumerate()
            .map(|(i, (&lo, &hi))| {
                if lo.is_nan() || hi.is_nan() || lo > hi {
                    return Err(FluxError::Shape(format!("empty bound interval [{lo}, {hi}] at flux {i}")));
                }
                Ok(match (lo.is_finite(), hi.is_finite()) {
                    _ if lo == hi => Coordinate::Fixed(lo),
                    (true, true) => Coordinate::Interval { lower: lo, width: hi - lo },
                    (true, false) => Coordinate::Lower(lo),
                    (false, true) => Coordinate::Upper(hi),
                    (false, false) => Coordinate::Free,
                })
            })
            .collect::<FluxResult<Vec<_>>>()?;
        Ok(Self { coords })
    }

    pub fn len(&self) -> usize {
        self.coords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    /// y → x.
    pub fn to_bounded(&self, y: &[f64]) -> Vec<f64> {
        self.coords
            .iter()
            .zip(y)
            .map(|(c, &yi)| match *c {
                Coordinate::Interval { lower, width } => {
                    lower + width * logistic(yi).clamp(INTERVAL_MARGIN, 1.0 - INTERVAL_MARGIN)
                }
                Coordinate::Lower(lo) => lo + softplus(yi).max(INTERVAL_MARGIN),
                Coordinate::Upper(hi) => hi - softplus(yi).max(INTERVAL_MARGIN),
                Coordinate::Free => yi,
                Coordinate::Fixed(v) => v,
            })
            .collect()
    }

    /// x → y.  Points on (or beyond) the boundary are pulled just inside.
    pub fn to_unbounded(&self, x: &[f64]) -> Vec<f64> {
        self.coords
            .iter()
            .zip(x)
            .map(|(c, &xi)| match *c {
                Coordinate::Interval { lower, width } => {
                    let s = ((xi - lower) / width).clamp(INTERVAL_MARGIN, 1.0 - INTERVAL_MARGIN);
                    (s / (1.0 - s)).ln()
                }
                Coordinate::Lower(lo) => softplus_inv((xi - lo).max(INTERVAL_MARGIN)),
                Coordinate::Upper(hi) => softplus_inv((hi - xi).max(INTERVAL_MARGIN)),
                Coordinate::Free => xi,
                Coordinate::Fixed(_) => 0.0,
            })
            .collect()
    }

    /// Reachable image of each coordinate: the box shrunk by the margin.
    fn image_bounds(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.coords.iter().map(|c| match *c {
            Coordinate::Interval { lower, width } => (
                lower + width * INTERVAL_MARGIN,
                lower + width * (1.0 - INTERVAL_MARGIN),
            ),
            Coordinate::Lower(lo) => (lo + INTERVAL_MARGIN, f64::INFINITY),
            Coordinate::Upper(hi) => (f64::NEG_INFINITY, hi - INTERVAL_MARGIN),
            Coordinate::Free => (f64::NEG_INFINITY, f64::INFINITY),
            Coordinate::Fixed(v) => (v, v),
        })
    }

    /// First-order stationarity of a flux-space gradient over the box:
    ///
    ///   max_i |g_i| · min(1, v_i)
    ///
    /// with `v_i` the distance from `x_i` to the reachable bound that `-g_i`
    /// points at.  Components pushing against an active bound vanish;
    /// components well inside the box count in full.  Fixed coordinates
    /// are ignored.
    pub fn stationarity(&self, x: &[f64], grad_x: &[f64]) -> f64 {
        self.image_bounds()
            .zip(x.iter().zip(grad_x))
            .map(|((lo, hi), (&xi, &gi))| {
                let room = if gi > 0.0 {
                    xi - lo
                } else if gi < 0.0 {
                    hi - xi
                } else {
                    0.0
                };
                gi.abs() * room.clamp(0.0, 1.0)
            })
            .fold(0.0_f64, f64::max)
    }

    /// Chain rule: dJ/dy = dJ/dx · dx/dy (the Jacobian is diagonal).
    pub fn chain_gradient(&self, y: &[f64], grad_x: &[f64]) -> Vec<f64> {
        self.coords
            .iter()
            .zip(y.iter().zip(grad_x))
            .map(|(c, (&yi, &gi))| match *c {
                Coordinate::Interval { width, .. } => {
                    let s = logistic(yi);
                    gi * width * s * (1.0 - s)
                }
                Coordinate::Lower(_) => gi * logistic(yi),
                Coordinate::Upper(_) => -gi * logistic(yi),
                Coordinate::Free => gi,
                Coordinate::Fixed(_) => 0.0,
            })
            .collect()
    }
}
