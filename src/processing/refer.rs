//! ReF-ER penalty coefficient controller.
//!
//! Remember-and-Forget Experience Replay penalizes the KL divergence
//! between current and behavior policies with weight `beta`, adapted so the
//! global fraction of far-policy samples stays near the tolerance `D`. The
//! update is a pair of fixed-point iterations: both maps are contractions
//! on [0, 1], one with fixed point 0 and one with fixed point 1, and the
//! observed fraction selects which map each coefficient follows.
//!
//! `beta` should not track the network learning rate: its accuracy depends
//! on the batch size B (weights are refreshed on sampling) and the data-set
//! size N (more samples go stale). The caller derives the controller rate
//! as `0.1 * B / max(N_max, N)`, which reproduces the reference
//! configuration (B = 256, N = 2^18 gives ~1e-4).

use serde::{Deserialize, Serialize};

/// Tolerance band around `D` inside which `alpha` decays toward zero.
const ALPHA_BAND: f64 = 1e-3;

/// Fixed-point iteration converging to 0.
#[inline]
fn fp_to_zero(x: f64, rate: f64) -> f64 {
    (1.0 - rate.min(x)) * x
}

/// Fixed-point iteration converging to 1.
#[inline]
fn fp_to_one(x: f64, rate: f64) -> f64 {
    fp_to_zero(x, rate) + rate.min(1.0 - x)
}

/// Adaptive penalty coefficients `beta` (KL penalty weight) and `alpha`
/// (policy/critic cost weight).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReFerController {
    beta: f64,
    alpha: f64,
}

impl ReFerController {
    /// Default starting point: full KL penalty, zero alpha.
    pub fn new() -> Self {
        Self { beta: 1.0, alpha: 0.0 }
    }

    /// Start from explicit coefficients, clamped into [0, 1].
    pub fn with_state(beta: f64, alpha: f64) -> Self {
        Self {
            beta: beta.clamp(0.0, 1.0),
            alpha: alpha.clamp(0.0, 1.0),
        }
    }

    /// Current KL penalty weight.
    #[inline]
    pub fn beta(&self) -> f64 {
        self.beta
    }

    /// Current policy-cost weight.
    #[inline]
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// One controller step.
    ///
    /// Too much far-policy data pushes `beta` toward 1 (stronger penalty);
    /// a satisfied constraint lets it decay toward 0. `alpha` decays only
    /// while the fraction sits inside the narrow band around the
    /// tolerance. Both coefficients stay in [0, 1].
    pub fn update(&mut self, frac_off_pol: f64, learn_rate: f64, penal_tol: f64) {
        debug_assert!(learn_rate >= 0.0 && learn_rate <= 1.0);
        self.beta = if frac_off_pol > penal_tol {
            fp_to_one(self.beta, learn_rate)
        } else {
            fp_to_zero(self.beta, learn_rate)
        };
        self.alpha = if (penal_tol - frac_off_pol).abs() < ALPHA_BAND {
            fp_to_zero(self.alpha, learn_rate)
        } else {
            fp_to_one(self.alpha, learn_rate)
        };
        debug_assert!((0.0..=1.0).contains(&self.beta));
        debug_assert!((0.0..=1.0).contains(&self.alpha));
    }
}

impl Default for ReFerController {
    fn default() -> Self {
        Self::new()
    }
}
