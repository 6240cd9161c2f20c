//! Learning-rate-weighted moment estimators.
//!
//! Unlike a plain Welford accumulator, these estimators consume *centered*
//! population sums produced by a fold over the whole buffer (and summed
//! across processes by the reducer): `e1 = E[X - mean_old]` and
//! `e2 = E[(X - mean_old)^2]`. With learning rate 1 the update is the exact
//! single-batch estimate; with a smaller rate it becomes an exponential
//! moving estimate centered on the current sample mean, which is where the
//! `(2*eta - eta^2)` correction comes from.
//!
//! Storage is `f32` (the precision the learner consumes); all arithmetic is
//! `f64`.

use log::debug;
use serde::{Deserialize, Serialize};

/// Variance floor: machine epsilon of the storage float.
const VAR_EPS: f64 = f32::EPSILON as f64;

/// Mean / standard deviation / inverse standard deviation for one scalar
/// stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MomentStats {
    mean: f32,
    std: f32,
    inv_std: f32,
}

impl MomentStats {
    /// Neutral prior: mean 0, std 1.
    pub fn neutral() -> Self {
        Self {
            mean: 0.0,
            std: 1.0,
            inv_std: 1.0,
        }
    }

    /// Current mean.
    #[inline]
    pub fn mean(&self) -> f32 {
        self.mean
    }

    /// Current standard deviation.
    #[inline]
    pub fn std(&self) -> f32 {
        self.std
    }

    /// Current inverse standard deviation.
    #[inline]
    pub fn inv_std(&self) -> f32 {
        self.inv_std
    }

    /// Apply one learning-rate-weighted update from centered moments.
    ///
    /// `e1 = E[X - mean_old]`, `e2 = E[(X - mean_old)^2]`. A negative
    /// variance (catastrophic cancellation on large sums) clamps to the
    /// storage epsilon.
    pub fn apply_update(&mut self, learn_rate: f64, e1: f64, e2: f64) {
        debug_assert!(learn_rate > 0.0 && learn_rate <= 1.0);
        let mean = self.mean as f64 + learn_rate * e1;
        let mut variance = e2 - e1 * e1 * (2.0 * learn_rate - learn_rate * learn_rate);
        if variance < VAR_EPS {
            debug!("variance clamped to epsilon (raw {:e})", variance);
            variance = VAR_EPS;
        }
        let std = self.std as f64 + learn_rate * (variance.sqrt() - self.std as f64);
        self.mean = mean as f32;
        self.std = std as f32;
        self.inv_std = (1.0 / std) as f32;
    }
}

impl Default for MomentStats {
    fn default() -> Self {
        Self::neutral()
    }
}

/// Reward moments plus per-coordinate state moments, with the flat payload
/// layout shared with the reducer.
///
/// Payload layout, length `2 * dim_state + 3`:
/// `[sum_s[0..dim], sumsq_s[0..dim], count, sum_r, sumsq_r]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateRewardStats {
    reward: MomentStats,
    state: Vec<MomentStats>,
}

impl StateRewardStats {
    /// Neutral prior for the given state dimensionality.
    pub fn new(dim_state: usize) -> Self {
        Self {
            reward: MomentStats::neutral(),
            state: vec![MomentStats::neutral(); dim_state],
        }
    }

    /// State dimensionality.
    pub fn dim_state(&self) -> usize {
        self.state.len()
    }

    /// Length of the flat reducer payload.
    pub fn payload_len(&self) -> usize {
        2 * self.state.len() + 3
    }

    /// Initial reducer guess: empty sums with a count of one and unit
    /// second reward moment, so a read before any data lands on the
    /// neutral prior instead of dividing by zero.
    pub fn initial_payload(&self) -> Vec<f64> {
        let dim = self.state.len();
        let mut guess = vec![0.0; self.payload_len()];
        guess[2 * dim] = 1.0;
        guess[2 * dim + 2] = 1.0;
        guess
    }

    /// Reward moments.
    pub fn reward(&self) -> &MomentStats {
        &self.reward
    }

    /// Moments for one state coordinate.
    pub fn state(&self, k: usize) -> &MomentStats {
        &self.state[k]
    }

    /// Current state means, one per coordinate.
    pub fn state_means(&self) -> Vec<f32> {
        self.state.iter().map(|m| m.mean()).collect()
    }

    /// Apply a globally reduced payload with the given weights.
    ///
    /// `w_r = 0` leaves reward moments untouched; `w_s = 0` leaves state
    /// moments untouched. A non-positive global count means no process
    /// contributed data yet and the payload is ignored.
    pub fn apply_payload(&mut self, payload: &[f64], w_r: f64, w_s: f64) {
        let dim = self.state.len();
        assert_eq!(payload.len(), self.payload_len(), "payload length mismatch");

        let count = payload[2 * dim];
        if count <= 0.0 {
            debug!("moment payload skipped: global count {}", count);
            return;
        }
        if w_r > 0.0 {
            self.reward
                .apply_update(w_r, payload[2 * dim + 1] / count, payload[2 * dim + 2] / count);
        }
        if w_s > 0.0 {
            for k in 0..dim {
                self.state[k].apply_update(w_s, payload[k] / count, payload[dim + k] / count);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neutral_prior() {
        let m = MomentStats::neutral();
        assert_eq!(m.mean(), 0.0);
        assert_eq!(m.std(), 1.0);
        assert_eq!(m.inv_std(), 1.0);
    }

    #[test]
    fn test_exact_at_unit_rate() {
        // Data with mean 5 and variance 4, centered on old mean 0:
        // e1 = 5, e2 = E[X^2] = var + mean^2 = 29.
        let mut m = MomentStats::neutral();
        m.apply_update(1.0, 5.0, 29.0);
        assert!((m.mean() - 5.0).abs() < 1e-6);
        assert!((m.std() - 2.0).abs() < 1e-6);
        assert!((m.inv_std() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_idempotent_at_unit_rate() {
        // Re-centering on the converged mean: e1 = 0, e2 = var.
        let mut m = MomentStats::neutral();
        m.apply_update(1.0, 5.0, 29.0);
        m.apply_update(1.0, 0.0, 4.0);
        assert!((m.mean() - 5.0).abs() < 1e-6);
        assert!((m.std() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_negative_variance_clamps() {
        let mut m = MomentStats::neutral();
        m.apply_update(1.0, 1.0, 0.999_999_9);
        assert!(m.std() > 0.0);
        assert!(m.inv_std().is_finite());
    }

    #[test]
    fn test_partial_rate_moves_toward_sample() {
        let mut m = MomentStats::neutral();
        m.apply_update(0.5, 10.0, 100.0);
        assert!((m.mean() - 5.0).abs() < 1e-6);
        assert!(m.std() > 1.0);
    }

    #[test]
    fn test_payload_weights_gate_updates() {
        let mut s = StateRewardStats::new(2);
        // count 10, reward sums (e1 = 2, e2 = 8), state sums zero
        let mut payload = vec![0.0; s.payload_len()];
        payload[4] = 10.0;
        payload[5] = 20.0;
        payload[6] = 80.0;
        s.apply_payload(&payload, 1.0, 0.0);
        assert!((s.reward().mean() - 2.0).abs() < 1e-6);
        assert_eq!(s.state(0).mean(), 0.0);
        assert_eq!(s.state(1).std(), 1.0);
    }

    #[test]
    fn test_zero_count_payload_ignored() {
        let mut s = StateRewardStats::new(1);
        let payload = vec![0.0; s.payload_len()];
        s.apply_payload(&payload, 1.0, 1.0);
        assert_eq!(s.reward().mean(), 0.0);
        assert_eq!(s.reward().std(), 1.0);
    }

    #[test]
    fn test_initial_payload_yields_neutral_update() {
        let mut s = StateRewardStats::new(3);
        let guess = s.initial_payload();
        s.apply_payload(&guess.clone(), 1.0, 0.0);
        assert!((s.reward().mean()).abs() < 1e-6);
        assert!((s.reward().std() - 1.0).abs() < 1e-6);
        assert_eq!(guess.len(), 9);
    }
}
