//! Replay processor facade.
//!
//! Owns the aggregates (moment estimators, controller state, clip window,
//! global counters) and drives one training step in the externally
//! observable order: moment update, far-policy estimate, ReF-ER update,
//! eviction selection, removal, sampler re-prepare. Global quantities flow
//! through the async reducers with a one-step lag.

use crate::config::ReplayConfig;
use crate::core::StateRewardStats;
use crate::error::ProcessorError;
use crate::memory::ReplayMemory;
use crate::processing::fold;
use crate::processing::histogram;
use crate::processing::planner::{ClipRange, EvictionPlanner};
use crate::processing::refer::ReFerController;
use crate::reducer::{AsyncReducer, LocalAllReduce, ReduceTransport};
use std::fmt::Write;
use std::sync::Arc;

/// Scale factor tying the controller rate to batch size over data size.
const REFER_RATE_COEF: f64 = 0.1;

fn fmt_real(out: &mut String, v: f64, width: usize, sci: bool) {
    if sci {
        let _ = write!(out, " {:>w$.1e}", v, w = width);
    } else {
        let _ = write!(out, " {:>w$.2}", v, w = width);
    }
}

/// Hot-path processor over a shared [`ReplayMemory`].
pub struct ReplayProcessor {
    cfg: ReplayConfig,
    rm: Arc<ReplayMemory>,
    stats: StateRewardStats,
    refer: ReFerController,
    planner: EvictionPlanner,
    clip: ClipRange,
    /// Global (episodes, transitions) seen-counters.
    step_reducer: AsyncReducer<i64>,
    /// Global centered moment sums.
    moment_reducer: AsyncReducer<f64>,
    /// Global (far-policy steps, stored transitions).
    refer_reducer: AsyncReducer<f64>,
    n_seen_episodes: i64,
    n_seen_transitions: i64,
    n_far_policy_steps: usize,
    avg_kl_divergence: f64,
    oldest_episode_id: i64,
    n_pruned: u64,
    n_pruned_since_report: u64,
}

impl ReplayProcessor {
    /// Single-process processor (in-process reduction transport).
    pub fn new(rm: Arc<ReplayMemory>, cfg: ReplayConfig) -> Result<Self, ProcessorError> {
        Self::with_transport(rm, cfg, LocalAllReduce::new())
    }

    /// Processor over an explicit reduction transport.
    pub fn with_transport<Tr>(
        rm: Arc<ReplayMemory>,
        cfg: ReplayConfig,
        transport: Tr,
    ) -> Result<Self, ProcessorError>
    where
        Tr: ReduceTransport<i64> + ReduceTransport<f64> + Clone,
    {
        cfg.validate()?;
        let stats = StateRewardStats::new(cfg.dim_state);
        let step_reducer = AsyncReducer::new(
            transport.clone(),
            vec![rm.n_seen_episodes_local(), rm.n_seen_transitions_local()],
        );
        let moment_reducer = AsyncReducer::new(transport.clone(), stats.initial_payload());
        let refer_reducer = AsyncReducer::new(transport, vec![0.0, cfg.max_tot_obs as f64]);

        Ok(Self {
            cfg,
            rm,
            stats,
            refer: ReFerController::new(),
            planner: EvictionPlanner::new(),
            clip: ClipRange::unit(),
            step_reducer,
            moment_reducer,
            refer_reducer,
            n_seen_episodes: 0,
            n_seen_transitions: 0,
            n_far_policy_steps: 0,
            avg_kl_divergence: 0.0,
            oldest_episode_id: 0,
            n_pruned: 0,
            n_pruned_since_report: 0,
        })
    }

    /// Update reward and state moment estimators over the whole buffer.
    ///
    /// Always pulls the global seen-counters (they stay monotone in
    /// evaluation mode too). In training mode, folds centered sums over
    /// the buffer, submits them, and applies the previous global payload
    /// with weights `w_r` / `w_s`; a zero weight leaves that family of
    /// moments untouched, and with both zero the submission is skipped
    /// entirely. `b_init` forces the blocking read used at startup.
    pub fn update_rewards_stats(
        &mut self,
        w_r: f64,
        w_s: f64,
        b_init: bool,
    ) -> Result<(), ProcessorError> {
        self.step_reducer.submit(vec![
            self.rm.n_seen_episodes_local(),
            self.rm.n_seen_transitions_local(),
        ]);
        let seen = self.step_reducer.get(b_init)?;
        self.n_seen_episodes = seen[0];
        self.n_seen_transitions = seen[1];

        if !self.cfg.train {
            return Ok(());
        }

        if w_r > 0.0 || w_s > 0.0 {
            let payload = {
                let episodes = self.rm.episodes();
                fold::moment_payload(
                    &episodes,
                    self.stats.reward().mean(),
                    &self.stats.state_means(),
                    w_s > 0.0,
                )
            };
            self.moment_reducer.submit(payload);
        }

        let payload = self.moment_reducer.get(b_init)?;
        self.stats.apply_payload(&payload, w_r, w_s);
        Ok(())
    }

    /// One ReF-ER controller step from the previous global far-policy
    /// estimate.
    ///
    /// The far-policy count submitted here is the one produced by the most
    /// recent planning pass; at most a minibatch worth of weights has
    /// changed since, so the fraction is off by ~B/N.
    pub fn update_refer_penalization(&mut self) -> Result<(), ProcessorError> {
        let n_data_local = self.rm.read_n_data();
        self.refer_reducer
            .submit(vec![self.n_far_policy_steps as f64, n_data_local as f64]);
        let global = self.refer_reducer.get(false)?;
        let frac_off_pol = if global[1] > 0.0 { global[0] / global[1] } else { 0.0 };
        let n_eff = (self.cfg.max_tot_obs as f64).max(global[1]);
        let learn_rate = REFER_RATE_COEF * self.cfg.batch_size as f64 / n_eff;
        self.refer.update(frac_off_pol, learn_rate, self.cfg.penal_tol);
        Ok(())
    }

    /// Recompute the clip window and pick the episode to delete under the
    /// configured strategy.
    pub fn select_episode_to_delete(&mut self, grad_step: u64) -> Result<(), ProcessorError> {
        let (clip, summary) = self.planner.plan(&self.rm, &self.cfg, grad_step)?;
        self.clip = clip;
        self.n_far_policy_steps = summary.n_far_policy_steps;
        self.avg_kl_divergence = summary.avg_kl_divergence;
        self.oldest_episode_id = summary.oldest_episode_id;
        Ok(())
    }

    /// Clear sampling flags, apply the guarded removal, and rebuild the
    /// sampling distribution.
    pub fn prepare_next_batch(&mut self) {
        let removed = self.planner.finalize(&self.rm, self.cfg.max_tot_obs_local);
        self.n_pruned += removed as u64;
        self.n_pruned_since_report += removed as u64;
    }

    /// Run one full training step in the observable order: consolidate
    /// intake, moment update, ReF-ER update, eviction selection, removal
    /// and sampler re-prepare.
    pub fn process_step(
        &mut self,
        w_r: f64,
        w_s: f64,
        grad_step: u64,
        b_init: bool,
    ) -> Result<(), ProcessorError> {
        self.rm.consolidate();
        self.update_rewards_stats(w_r, w_s, b_init)?;
        self.update_refer_penalization()?;
        self.select_episode_to_delete(grad_step)?;
        self.prepare_next_batch();
        Ok(())
    }

    /// Header row matching [`ReplayProcessor::report_metrics`].
    pub fn report_headers(&self) -> String {
        let mut out = String::from(
            "|  avgR  | avgr | stdr | DKL | nEp |  nObs | totEp | totObs | oldEp |nDel|nFarP ",
        );
        if self.clip.is_active() {
            out.push_str("| beta ");
        }
        out
    }

    /// One whitespace-separated metrics line. Resets the pruned-episode
    /// counter afterwards.
    pub fn report_metrics(&mut self) -> String {
        let mut out = String::new();
        fmt_real(&mut out, self.rm.avg_cumulative_reward(), 9, false);
        fmt_real(&mut out, self.stats.reward().mean() as f64, 6, false);
        fmt_real(&mut out, 1.0 / self.stats.reward().inv_std() as f64, 6, true);
        fmt_real(&mut out, self.avg_kl_divergence, 5, true);
        let _ = write!(out, " {:>5}", self.rm.read_n_seq());
        let _ = write!(out, " {:>7}", self.rm.read_n_data());
        let _ = write!(out, " {:>7}", self.n_seen_episodes);
        let _ = write!(out, " {:>8}", self.n_seen_transitions);
        let _ = write!(out, " {:>7}", self.oldest_episode_id);
        let _ = write!(out, " {:>4}", self.n_pruned_since_report);
        let _ = write!(out, " {:>6}", self.n_far_policy_steps);
        if self.clip.is_active() {
            fmt_real(&mut out, self.refer.beta(), 6, true);
        }
        self.n_pruned_since_report = 0;
        out
    }

    /// Render the importance-weight histogram over the current buffer.
    pub fn histogram_imp_weights(&self) -> String {
        let episodes = self.rm.episodes();
        histogram::histogram_report(&episodes, self.rm.read_n_data())
    }

    /// Moment estimators.
    pub fn stats(&self) -> &StateRewardStats {
        &self.stats
    }

    /// Current KL penalty weight.
    pub fn beta(&self) -> f64 {
        self.refer.beta()
    }

    /// Current policy-cost weight.
    pub fn alpha(&self) -> f64 {
        self.refer.alpha()
    }

    /// Current clip window.
    pub fn clip(&self) -> ClipRange {
        self.clip
    }

    /// Far-policy steps from the most recent planning pass.
    pub fn n_far_policy_steps(&self) -> usize {
        self.n_far_policy_steps
    }

    /// Mean KL divergence per stored transition.
    pub fn avg_kl_divergence(&self) -> f64 {
        self.avg_kl_divergence
    }

    /// Global episode count seen across all processes.
    pub fn n_seen_episodes(&self) -> i64 {
        self.n_seen_episodes
    }

    /// Global transition count seen across all processes.
    pub fn n_seen_transitions(&self) -> i64 {
        self.n_seen_transitions
    }

    /// Insertion id of the oldest resident episode.
    pub fn oldest_episode_id(&self) -> i64 {
        self.oldest_episode_id
    }

    /// Episodes pruned since construction.
    pub fn n_pruned(&self) -> u64 {
        self.n_pruned
    }

    /// Shared replay memory handle.
    pub fn memory(&self) -> &Arc<ReplayMemory> {
        &self.rm
    }

    /// Processor configuration.
    pub fn config(&self) -> &ReplayConfig {
        &self.cfg
    }
}
