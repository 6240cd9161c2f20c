//! Uniform minibatch sampler over stored transitions.
//!
//! The sampler keeps a prefix-sum distribution over episode lengths so a
//! draw is uniform over *transitions*, not episodes. After the processor
//! removes or consolidates episodes the distribution is stale;
//! [`MinibatchSampler::prepare`] rebuilds it.

use crate::core::Episode;
use parking_lot::Mutex;
use rand::Rng;

#[derive(Debug, Default)]
struct Distribution {
    /// `cumulative[i]` = total transitions in episodes `0..=i`.
    cumulative: Vec<usize>,
}

impl Distribution {
    fn rebuild(&mut self, episodes: &[Episode]) {
        self.cumulative.clear();
        self.cumulative.reserve(episodes.len());
        let mut total = 0usize;
        for ep in episodes {
            total += ep.ndata();
            self.cumulative.push(total);
        }
    }

    fn total(&self) -> usize {
        self.cumulative.last().copied().unwrap_or(0)
    }

    /// Map a flat transition index to `(episode, step)`.
    fn locate(&self, t: usize) -> (usize, usize) {
        let i = self.cumulative.partition_point(|&c| c <= t);
        let base = if i == 0 { 0 } else { self.cumulative[i - 1] };
        (i, t - base)
    }
}

/// Uniform-over-transitions minibatch sampler.
#[derive(Debug, Default)]
pub struct MinibatchSampler {
    dist: Mutex<Distribution>,
    last_sampled: Mutex<Vec<usize>>,
}

impl MinibatchSampler {
    /// Create an empty sampler; `prepare` must run before the first draw.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the sampling distribution.
    ///
    /// `needs_pass` is set when the episode array changed shape since the
    /// last prepare (removal or intake); without it the existing
    /// distribution is kept.
    pub fn prepare(&self, episodes: &[Episode], needs_pass: bool) {
        let mut dist = self.dist.lock();
        if needs_pass || dist.cumulative.len() != episodes.len() {
            dist.rebuild(episodes);
        }
    }

    /// Draw `batch` transitions, marking each chosen episode's
    /// `just_sampled` with the drawn step index.
    ///
    /// Returns `(episode_index, step_index)` pairs. The drawn episode
    /// indices are recorded for the processor's clearing pass.
    pub fn draw<R: Rng>(
        &self,
        episodes: &mut [Episode],
        batch: usize,
        rng: &mut R,
    ) -> Vec<(usize, usize)> {
        let dist = self.dist.lock();
        let total = dist.total();
        let mut sampled = self.last_sampled.lock();
        sampled.clear();

        if total == 0 {
            return Vec::new();
        }

        let mut drawn = Vec::with_capacity(batch);
        for _ in 0..batch {
            let (i, j) = dist.locate(rng.gen_range(0..total));
            debug_assert!(i < episodes.len() && j < episodes[i].ndata());
            if episodes[i].just_sampled.is_none() {
                sampled.push(i);
            }
            episodes[i].just_sampled = Some(j);
            drawn.push((i, j));
        }
        drawn
    }

    /// Episode indices flagged by the most recent draw.
    pub fn last_sampled_episodes(&self) -> Vec<usize> {
        self.last_sampled.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;
    use rand::SeedableRng;

    fn episodes_of_lengths(lengths: &[usize]) -> Vec<Episode> {
        lengths
            .iter()
            .map(|&n| {
                Episode::new(
                    vec![vec![0.0]; n],
                    vec![0.0; n],
                    vec![1.0; n],
                    vec![0.0; n],
                )
            })
            .collect()
    }

    #[test]
    fn test_locate_spans_episode_boundaries() {
        let eps = episodes_of_lengths(&[3, 1, 2]);
        let mut dist = Distribution::default();
        dist.rebuild(&eps);
        assert_eq!(dist.total(), 6);
        assert_eq!(dist.locate(0), (0, 0));
        assert_eq!(dist.locate(2), (0, 2));
        assert_eq!(dist.locate(3), (1, 0));
        assert_eq!(dist.locate(4), (2, 0));
        assert_eq!(dist.locate(5), (2, 1));
    }

    #[test]
    fn test_draw_marks_just_sampled() {
        let mut eps = episodes_of_lengths(&[4, 4]);
        let sampler = MinibatchSampler::new();
        sampler.prepare(&eps, true);

        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let drawn = sampler.draw(&mut eps, 8, &mut rng);
        assert_eq!(drawn.len(), 8);
        for &(i, j) in &drawn {
            assert!(eps[i].just_sampled.is_some());
            assert!(j < eps[i].ndata());
        }
        let flagged = sampler.last_sampled_episodes();
        assert!(!flagged.is_empty());
        for &i in &flagged {
            assert!(eps[i].just_sampled.is_some());
        }
    }

    #[test]
    fn test_draw_on_empty_buffer() {
        let mut eps: Vec<Episode> = Vec::new();
        let sampler = MinibatchSampler::new();
        sampler.prepare(&eps, true);
        let mut rng = StepRng::new(0, 1);
        assert!(sampler.draw(&mut eps, 4, &mut rng).is_empty());
        assert!(sampler.last_sampled_episodes().is_empty());
    }

    #[test]
    fn test_prepare_tracks_shape_change() {
        let mut eps = episodes_of_lengths(&[2, 2, 2]);
        let sampler = MinibatchSampler::new();
        sampler.prepare(&eps, true);

        eps.pop();
        // Shape changed: prepare rebuilds even without the explicit flag.
        sampler.prepare(&eps, false);
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let drawn = sampler.draw(&mut eps, 16, &mut rng);
        assert!(drawn.iter().all(|&(i, _)| i < 2));
    }
}
