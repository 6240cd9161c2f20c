//! Replay processor configuration.
//!
//! All tuning knobs are collected into an immutable [`ReplayConfig`] passed
//! to the processor at construction. Builder-style `with_*` setters follow
//! the usual config pattern; [`ReplayConfig::validate`] checks the documented
//! ranges before a processor accepts the config.

use crate::error::ProcessorError;
use serde::{Deserialize, Serialize};

/// Strategy used to pick the episode to evict when the buffer is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvictionAlgorithm {
    /// Evict the episode with the smallest insertion id.
    Oldest,
    /// Evict the episode with the largest fraction of far-policy steps.
    FarPolicyFraction,
    /// Evict the episode with the largest mean KL divergence per step.
    MaxKlDivergence,
    /// Batch-RL mode: annealed clip ceiling, evict the most off-policy
    /// episode by average clipped importance weight.
    BatchRl,
}

impl Default for EvictionAlgorithm {
    fn default() -> Self {
        Self::Oldest
    }
}

/// Immutable configuration for the replay processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Observed-state dimensionality.
    pub dim_state: usize,
    /// ReF-ER clip bound C >= 0. Zero disables far-policy bookkeeping.
    pub clip_imp_weight: f64,
    /// Tolerated far-policy fraction D in (0, 1).
    pub penal_tol: f64,
    /// Anneal schedule knob E >= 0.
    pub eps_anneal: f64,
    /// Minibatch size B > 0.
    pub batch_size: usize,
    /// Global target observation count across all processes.
    pub max_tot_obs: usize,
    /// Per-process replay buffer cap in transitions.
    pub max_tot_obs_local: usize,
    /// Training vs evaluation flag. When false, moment updates are skipped
    /// and only the global seen-counters are pulled.
    pub train: bool,
    /// Episode eviction strategy.
    pub algorithm: EvictionAlgorithm,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            dim_state: 1,
            clip_imp_weight: 4.0,
            penal_tol: 0.1,
            eps_anneal: 5e-7,
            batch_size: 256,
            max_tot_obs: 1 << 18,
            max_tot_obs_local: 1 << 18,
            train: true,
            algorithm: EvictionAlgorithm::Oldest,
        }
    }
}

impl ReplayConfig {
    /// Create a config for the given observation dimensionality.
    pub fn new(dim_state: usize) -> Self {
        Self {
            dim_state,
            ..Default::default()
        }
    }

    /// Set the ReF-ER clip bound.
    pub fn with_clip_imp_weight(mut self, c: f64) -> Self {
        self.clip_imp_weight = c;
        self
    }

    /// Set the tolerated far-policy fraction.
    pub fn with_penal_tol(mut self, d: f64) -> Self {
        self.penal_tol = d;
        self
    }

    /// Set the anneal schedule knob.
    pub fn with_eps_anneal(mut self, e: f64) -> Self {
        self.eps_anneal = e;
        self
    }

    /// Set the minibatch size.
    pub fn with_batch_size(mut self, b: usize) -> Self {
        self.batch_size = b;
        self
    }

    /// Set both observation caps to the same value.
    pub fn with_max_tot_obs(mut self, n: usize) -> Self {
        self.max_tot_obs = n;
        self.max_tot_obs_local = n;
        self
    }

    /// Set the per-process observation cap.
    pub fn with_max_tot_obs_local(mut self, n: usize) -> Self {
        self.max_tot_obs_local = n;
        self
    }

    /// Set the training flag.
    pub fn with_train(mut self, train: bool) -> Self {
        self.train = train;
        self
    }

    /// Set the eviction strategy.
    pub fn with_algorithm(mut self, algorithm: EvictionAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Check all fields against their documented ranges.
    pub fn validate(&self) -> Result<(), ProcessorError> {
        if self.clip_imp_weight < 0.0 || !self.clip_imp_weight.is_finite() {
            return Err(ProcessorError::InvalidConfig(format!(
                "clip_imp_weight must be finite and >= 0, got {}",
                self.clip_imp_weight
            )));
        }
        if !(self.penal_tol > 0.0 && self.penal_tol < 1.0) {
            return Err(ProcessorError::InvalidConfig(format!(
                "penal_tol must lie in (0, 1), got {}",
                self.penal_tol
            )));
        }
        if self.eps_anneal < 0.0 || !self.eps_anneal.is_finite() {
            return Err(ProcessorError::InvalidConfig(format!(
                "eps_anneal must be finite and >= 0, got {}",
                self.eps_anneal
            )));
        }
        if self.batch_size == 0 {
            return Err(ProcessorError::InvalidConfig(
                "batch_size must be positive".to_string(),
            ));
        }
        if self.max_tot_obs == 0 || self.max_tot_obs_local == 0 {
            return Err(ProcessorError::InvalidConfig(
                "observation caps must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(ReplayConfig::default().validate().is_ok());
    }

    #[test]
    fn test_builder_chain() {
        let cfg = ReplayConfig::new(8)
            .with_clip_imp_weight(2.0)
            .with_penal_tol(0.05)
            .with_batch_size(128)
            .with_max_tot_obs(10_000)
            .with_algorithm(EvictionAlgorithm::BatchRl);
        assert_eq!(cfg.dim_state, 8);
        assert_eq!(cfg.batch_size, 128);
        assert_eq!(cfg.max_tot_obs_local, 10_000);
        assert_eq!(cfg.algorithm, EvictionAlgorithm::BatchRl);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_penal_tol() {
        let cfg = ReplayConfig::default().with_penal_tol(1.0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_batch() {
        let cfg = ReplayConfig::default().with_batch_size(0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_negative_clip() {
        let cfg = ReplayConfig::default().with_clip_imp_weight(-1.0);
        assert!(cfg.validate().is_err());
    }
}
