//! Parallel reductions over the episode array.
//!
//! Both folds follow the same shape: a per-thread accumulator with an
//! identity, an `observe` step per episode, and a commutative `merge`, run
//! through rayon's `fold`/`reduce`. Iteration order is unspecified; sums
//! are accumulated in `f64` so reordering stays within accumulator
//! precision, and extremum ties break on the lower index.

use crate::core::Episode;
use crate::processing::selectors::{Direction, ExtremumSelector};
use rayon::prelude::*;

/// Centered moment sums for one pass over the buffer.
///
/// Sums are centered on the means current at fold time; the estimator
/// turns the globally reduced sums into mean/std updates.
#[derive(Debug, Clone)]
pub struct MomentAccum {
    count: f64,
    sum_r: f64,
    sumsq_r: f64,
    sum_s: Vec<f64>,
    sumsq_s: Vec<f64>,
}

impl MomentAccum {
    fn identity(dim_state: usize) -> Self {
        Self {
            count: 0.0,
            sum_r: 0.0,
            sumsq_r: 0.0,
            sum_s: vec![0.0; dim_state],
            sumsq_s: vec![0.0; dim_state],
        }
    }

    fn observe(&mut self, ep: &Episode, mean_r: f64, mean_s: &[f64], with_states: bool) {
        self.count += ep.ndata() as f64;
        for j in 0..ep.ndata() {
            let dr = ep.rewards[j] as f64 - mean_r;
            self.sum_r += dr;
            self.sumsq_r += dr * dr;
            if with_states {
                for (k, &mu) in mean_s.iter().enumerate() {
                    let ds = ep.states[j][k] as f64 - mu;
                    self.sum_s[k] += ds;
                    self.sumsq_s[k] += ds * ds;
                }
            }
        }
    }

    fn merge(mut self, other: Self) -> Self {
        self.count += other.count;
        self.sum_r += other.sum_r;
        self.sumsq_r += other.sumsq_r;
        for k in 0..self.sum_s.len() {
            self.sum_s[k] += other.sum_s[k];
            self.sumsq_s[k] += other.sumsq_s[k];
        }
        self
    }

    /// Flatten into the reducer payload:
    /// `[sum_s.., sumsq_s.., count, sum_r, sumsq_r]`.
    pub fn into_payload(self) -> Vec<f64> {
        let mut payload = self.sum_s;
        payload.extend_from_slice(&self.sumsq_s);
        payload.push(self.count);
        payload.push(self.sum_r);
        payload.push(self.sumsq_r);
        payload
    }
}

/// Fold centered moment sums over all episodes.
///
/// `with_states` skips the per-coordinate loops when only reward moments
/// are being updated.
pub fn moment_payload(
    episodes: &[Episode],
    mean_r: f32,
    mean_s: &[f32],
    with_states: bool,
) -> Vec<f64> {
    let dim = mean_s.len();
    let mean_r = mean_r as f64;
    let mean_s: Vec<f64> = mean_s.iter().map(|&m| m as f64).collect();
    episodes
        .par_iter()
        .fold(
            || MomentAccum::identity(dim),
            |mut acc, ep| {
                acc.observe(ep, mean_r, &mean_s, with_states);
                acc
            },
        )
        .reduce(|| MomentAccum::identity(dim), MomentAccum::merge)
        .into_payload()
}

/// Combined scalar sums and extremum selections from one eviction pass.
#[derive(Debug, Clone)]
pub struct EvictionScan {
    /// Total far-policy steps across the buffer.
    pub n_far: usize,
    /// Total KL divergence across the buffer.
    pub total_kl: f64,
    /// Total cumulative reward across the buffer.
    pub total_r: f64,
    /// Smallest insertion id.
    pub oldest: ExtremumSelector,
    /// Largest far-policy fraction.
    pub most_far: ExtremumSelector,
    /// Largest mean KL per step.
    pub high_kl: ExtremumSelector,
    most_off_eligible: ExtremumSelector,
    most_off_any: ExtremumSelector,
    penal_tol: f64,
}

impl EvictionScan {
    fn identity(penal_tol: f64) -> Self {
        Self {
            n_far: 0,
            total_kl: 0.0,
            total_r: 0.0,
            oldest: ExtremumSelector::new(Direction::Min),
            most_far: ExtremumSelector::new(Direction::Max),
            high_kl: ExtremumSelector::new(Direction::Max),
            most_off_eligible: ExtremumSelector::new(Direction::Min),
            most_off_any: ExtremumSelector::new(Direction::Min),
            penal_tol,
        }
    }

    fn observe(&mut self, index: usize, ep: &Episode) {
        self.n_far += ep.n_far_policy_steps;
        self.total_kl += ep.sum_kl_divergence;
        self.total_r += ep.total_reward;
        self.oldest.observe(index, ep.id as f64);
        if ep.ndata() == 0 {
            return;
        }
        self.most_far.observe(index, ep.far_policy_fraction());
        self.high_kl.observe(index, ep.avg_kl_divergence());
        let clipped = ep.avg_clip_imp_w();
        self.most_off_any.observe(index, clipped);
        if ep.n_far_policy_steps as f64 > self.penal_tol * ep.ndata() as f64 {
            self.most_off_eligible.observe(index, clipped);
        }
    }

    fn merge(mut self, other: Self) -> Self {
        self.n_far += other.n_far;
        self.total_kl += other.total_kl;
        self.total_r += other.total_r;
        self.oldest.merge(&other.oldest);
        self.most_far.merge(&other.most_far);
        self.high_kl.merge(&other.high_kl);
        self.most_off_eligible.merge(&other.most_off_eligible);
        self.most_off_any.merge(&other.most_off_any);
        self
    }

    /// Most-off-policy winner: episodes whose far-policy count exceeds the
    /// tolerated fraction take priority; otherwise the overall minimum
    /// average clipped weight. Zero-transition episodes never qualify.
    pub fn most_off_index(&self) -> Option<usize> {
        self.most_off_eligible.index().or_else(|| self.most_off_any.index())
    }
}

/// One parallel pass over the buffer: optional cumulative refresh, scalar
/// sums, and all four selectors.
pub fn eviction_scan(
    episodes: &mut [Episode],
    c_max: f64,
    c_inv: f64,
    recompute: bool,
    penal_tol: f64,
) -> EvictionScan {
    episodes
        .par_iter_mut()
        .enumerate()
        .fold(
            || EvictionScan::identity(penal_tol),
            |mut acc, (index, ep)| {
                if recompute {
                    ep.update_cumulative(c_max, c_inv);
                }
                acc.observe(index, ep);
                acc
            },
        )
        .reduce(|| EvictionScan::identity(penal_tol), EvictionScan::merge)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn episode(rewards: &[f32], weights: &[f32], kls: &[f32], id: i64) -> Episode {
        let n = rewards.len();
        let mut ep = Episode::new(
            vec![vec![0.5, -0.5]; n],
            rewards.to_vec(),
            weights.to_vec(),
            kls.to_vec(),
        );
        ep.id = id;
        ep
    }

    #[test]
    fn test_moment_payload_layout_and_sums() {
        let eps = vec![
            episode(&[1.0, 2.0], &[1.0, 1.0], &[0.0, 0.0], 0),
            episode(&[3.0], &[1.0], &[0.0], 1),
        ];
        let payload = moment_payload(&eps, 0.0, &[0.0, 0.0], true);
        assert_eq!(payload.len(), 7);
        // states are all (0.5, -0.5): sums 1.5 and -1.5, squares 0.75 each
        assert!((payload[0] - 1.5).abs() < 1e-12);
        assert!((payload[1] + 1.5).abs() < 1e-12);
        assert!((payload[2] - 0.75).abs() < 1e-12);
        assert!((payload[3] - 0.75).abs() < 1e-12);
        assert!((payload[4] - 3.0).abs() < 1e-12);
        assert!((payload[5] - 6.0).abs() < 1e-12);
        assert!((payload[6] - 14.0).abs() < 1e-12);
    }

    #[test]
    fn test_moment_payload_centering() {
        let eps = vec![episode(&[5.0, 5.0], &[1.0, 1.0], &[0.0, 0.0], 0)];
        let payload = moment_payload(&eps, 5.0, &[0.0, 0.0], false);
        assert!((payload[4] - 2.0).abs() < 1e-12);
        assert!(payload[5].abs() < 1e-12);
        assert!(payload[6].abs() < 1e-12);
        // states skipped
        assert!(payload[0].abs() < 1e-12 && payload[2].abs() < 1e-12);
    }

    #[test]
    fn test_scan_totals_and_selectors() {
        let mut eps = vec![
            episode(&[1.0; 4], &[1.0; 4], &[0.1; 4], 10),
            episode(&[2.0; 2], &[9.0, 9.0], &[0.5, 0.5], 11),
            episode(&[3.0; 2], &[1.0, 1.0], &[2.0, 2.0], 12),
        ];
        let scan = eviction_scan(&mut eps, 2.0, 0.5, true, 0.1);

        assert_eq!(scan.n_far, 2);
        assert!((scan.total_kl - (0.4 + 1.0 + 4.0)).abs() < 1e-9);
        assert!((scan.total_r - (4.0 + 4.0 + 6.0)).abs() < 1e-9);
        assert_eq!(scan.oldest.index(), Some(0));
        assert_eq!(scan.most_far.index(), Some(1));
        assert_eq!(scan.high_kl.index(), Some(2));
        // episode 1 is the only eligible one (2/2 far > 0.1) and also has
        // the largest clipped weight; eligibility still routes to it
        assert_eq!(scan.most_off_index(), Some(1));
    }

    #[test]
    fn test_scan_fallback_when_none_eligible() {
        let mut eps = vec![
            episode(&[1.0; 3], &[1.0, 1.0, 1.0], &[0.0; 3], 0),
            episode(&[1.0; 3], &[0.6, 0.6, 0.6], &[0.0; 3], 1),
        ];
        let scan = eviction_scan(&mut eps, 2.0, 0.5, true, 0.5);
        // no far-policy steps anywhere: fall back to minimum clipped weight
        assert_eq!(scan.n_far, 0);
        assert_eq!(scan.most_off_index(), Some(1));
    }

    #[test]
    fn test_scan_invariant_under_permutation() {
        let build = |order: &[usize]| {
            let pool = [
                episode(&[1.0, -2.0, 0.5], &[0.2, 1.0, 3.0], &[0.3, 0.1, 0.2], 5),
                episode(&[4.0], &[1.0], &[0.9], 6),
                episode(&[0.0, 0.0], &[5.0, 0.1], &[0.0, 0.4], 7),
            ];
            let mut eps: Vec<Episode> = order.iter().map(|&i| pool[i].clone()).collect();
            let scan = eviction_scan(&mut eps, 2.0, 0.5, true, 0.1);
            let ids = |sel: &ExtremumSelector| sel.index().map(|i| eps[i].id);
            (
                scan.n_far,
                scan.total_kl,
                scan.total_r,
                ids(&scan.oldest),
                ids(&scan.most_far),
                ids(&scan.high_kl),
            )
        };
        let a = build(&[0, 1, 2]);
        let b = build(&[2, 0, 1]);
        assert_eq!(a.0, b.0);
        assert!((a.1 - b.1).abs() < 1e-12);
        assert!((a.2 - b.2).abs() < 1e-12);
        assert_eq!(a.3, b.3);
        assert_eq!(a.4, b.4);
        assert_eq!(a.5, b.5);
    }

    #[test]
    fn test_recompute_refreshes_cached_scores() {
        let mut eps = vec![episode(&[1.0; 3], &[0.9, 1.0, 1.1], &[0.0; 3], 0)];
        // construction window [1, 1] marked two steps far-policy
        assert_eq!(eps[0].n_far_policy_steps, 2);
        let scan = eviction_scan(&mut eps, 2.0, 0.5, true, 0.1);
        assert_eq!(scan.n_far, 0);
        assert_eq!(eps[0].n_far_policy_steps, 0);

        // without recompute the cached value is trusted as-is
        eps[0].n_far_policy_steps = 99;
        let scan = eviction_scan(&mut eps, 2.0, 0.5, false, 0.1);
        assert_eq!(scan.n_far, 99);
    }
}
