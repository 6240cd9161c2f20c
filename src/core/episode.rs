//! Episode storage type.
//!
//! An [`Episode`] is one actor rollout: per-step observed states, rewards,
//! importance weights and KL divergences, plus cached cumulative scores the
//! eviction planner reads. The cached scores depend on the current clip
//! window and are refreshed by [`Episode::update_cumulative`] when the
//! window moves.

/// One stored trajectory.
///
/// The per-step vectors all have length `ndata()`. Cached cumulatives are
/// consistent with the clip window passed to the last `update_cumulative`
/// call (or the raw construction pass for `total_reward` and
/// `sum_kl_divergence`).
#[derive(Debug, Clone)]
pub struct Episode {
    /// Insertion index, assigned by the replay memory. Strictly increasing
    /// in arrival order; the oldest resident episode has the smallest id.
    pub id: i64,
    /// Observed state per step, `dim_state` coordinates each.
    pub states: Vec<Vec<f32>>,
    /// Scalar reward per step.
    pub rewards: Vec<f32>,
    /// Importance weight rho = pi(a|s) / mu(a|s) per step, as last computed
    /// when the step was sampled.
    pub off_pol_imp_w: Vec<f32>,
    /// KL divergence between current and behavior policy per step.
    pub kl_divergences: Vec<f32>,
    /// Cached sum of `kl_divergences`.
    pub sum_kl_divergence: f64,
    /// Cached sum of `rewards`.
    pub total_reward: f64,
    /// Cached count of steps whose rho lies outside the clip window.
    pub n_far_policy_steps: usize,
    /// Cached sum of rho clamped into the clip window.
    pub sum_clip_imp_w: f64,
    /// Step index last drawn by the sampler, cleared by the processor
    /// before the next draw.
    pub just_sampled: Option<usize>,
}

impl Episode {
    /// Build an episode from per-step data.
    ///
    /// The id is a placeholder until the replay memory consolidates the
    /// episode. Cumulative scores start from a fully on-policy window
    /// (`c_max = c_inv = 1`), so every stored weight different from 1
    /// counts as far-policy until the first planner refresh.
    ///
    /// # Panics
    /// Panics if the per-step vectors disagree on length.
    pub fn new(
        states: Vec<Vec<f32>>,
        rewards: Vec<f32>,
        off_pol_imp_w: Vec<f32>,
        kl_divergences: Vec<f32>,
    ) -> Self {
        assert_eq!(states.len(), rewards.len(), "state/reward length mismatch");
        assert_eq!(rewards.len(), off_pol_imp_w.len(), "reward/weight length mismatch");
        assert_eq!(rewards.len(), kl_divergences.len(), "reward/kl length mismatch");

        let mut ep = Self {
            id: -1,
            states,
            rewards,
            off_pol_imp_w,
            kl_divergences,
            sum_kl_divergence: 0.0,
            total_reward: 0.0,
            n_far_policy_steps: 0,
            sum_clip_imp_w: 0.0,
            just_sampled: None,
        };
        ep.update_cumulative(1.0, 1.0);
        ep
    }

    /// Number of stored transitions.
    #[inline]
    pub fn ndata(&self) -> usize {
        self.rewards.len()
    }

    /// Whether a weight falls outside the clip window.
    #[inline]
    pub fn is_far_policy(rho: f64, c_max: f64, c_inv: f64) -> bool {
        rho > c_max || rho < c_inv
    }

    /// Recompute the cached cumulative scores against a clip window.
    ///
    /// Called on the planner's amortized refresh cadence so the eviction
    /// keys stay approximately consistent as the window anneals.
    pub fn update_cumulative(&mut self, c_max: f64, c_inv: f64) {
        debug_assert!(c_max >= c_inv);
        let mut n_far = 0usize;
        let mut sum_clip = 0.0f64;
        for &w in &self.off_pol_imp_w {
            let rho = w as f64;
            if Self::is_far_policy(rho, c_max, c_inv) {
                n_far += 1;
            }
            sum_clip += rho.clamp(c_inv, c_max);
        }
        self.n_far_policy_steps = n_far;
        self.sum_clip_imp_w = sum_clip;
        self.sum_kl_divergence = self.kl_divergences.iter().map(|&d| d as f64).sum();
        self.total_reward = self.rewards.iter().map(|&r| r as f64).sum();
    }

    /// Fraction of steps currently counted as far-policy.
    pub fn far_policy_fraction(&self) -> f64 {
        if self.rewards.is_empty() {
            0.0
        } else {
            self.n_far_policy_steps as f64 / self.ndata() as f64
        }
    }

    /// Average clipped importance weight over the episode.
    pub fn avg_clip_imp_w(&self) -> f64 {
        if self.rewards.is_empty() {
            0.0
        } else {
            self.sum_clip_imp_w / self.ndata() as f64
        }
    }

    /// Mean KL divergence per step.
    pub fn avg_kl_divergence(&self) -> f64 {
        if self.rewards.is_empty() {
            0.0
        } else {
            self.sum_kl_divergence / self.ndata() as f64
        }
    }
}
