//! Target/decoy score histogram and the sliding-window posterior error
//! probability estimator that runs on top of it.
//!
//! Every validation map in this crate owns one or more of these histograms.
//! Scores are e-value-like: lower is better, and targets dominate the low
//! tail while decoys dominate the high tail. The PEP at a score is estimated
//! as the local decoy/target ratio inside a window that is sized in
//! *target-count* space rather than index or score space, so the estimate
//! adapts to the highly non-uniform score density such scores exhibit.

use fnv::FnvHashMap;

/// Minimum sample size below which PEP estimates are statistically shaky.
pub const MIN_SAMPLE_SIZE: u32 = 100;

/// Once the estimated PEP crosses this value, every worse score is pinned to
/// a PEP of exactly 1.0 to avoid noisy oscillation in the high-error tail.
const PEP_PLATEAU: f64 = 0.98;

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct TargetDecoyPoint {
    pub targets: u32,
    pub decoys: u32,
    pub pep: f64,
}

#[derive(Copy, Clone, Debug, Default)]
struct Metrics {
    n_max: u32,
    target_only_prefix: u32,
}

/// Histogram of target and decoy counts at each distinct score.
///
/// The sorted score list and the derived window metrics are memoized and
/// invalidated by any mutation; callers never manage the caches themselves.
#[derive(Default)]
pub struct ScoreHistogram {
    points: FnvHashMap<u64, TargetDecoyPoint>,
    sorted: Option<Vec<f64>>,
    metrics: Option<Metrics>,
    window_override: Option<u32>,
}

// Normalize -0.0 so that both zero encodings land on the same point.
fn key(score: f64) -> u64 {
    if score == 0.0 {
        0.0f64.to_bits()
    } else {
        score.to_bits()
    }
}

impl ScoreHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one hit at `score`. Creates the point if absent.
    pub fn put(&mut self, score: f64, decoy: bool) {
        let point = self.points.entry(key(score)).or_default();
        match decoy {
            true => point.decoys += 1,
            false => point.targets += 1,
        }
        self.invalidate();
    }

    /// Remove one previously recorded hit. The point disappears once both
    /// counters reach zero; counts never go negative.
    pub fn remove(&mut self, score: f64, decoy: bool) {
        let k = key(score);
        if let Some(point) = self.points.get_mut(&k) {
            match decoy {
                true => point.decoys = point.decoys.saturating_sub(1),
                false => point.targets = point.targets.saturating_sub(1),
            }
            if point.targets == 0 && point.decoys == 0 {
                self.points.remove(&k);
            }
            self.invalidate();
        }
    }

    fn invalidate(&mut self) {
        self.sorted = None;
        self.metrics = None;
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn total_targets(&self) -> u64 {
        self.points.values().map(|p| p.targets as u64).sum()
    }

    pub fn total_decoys(&self) -> u64 {
        self.points.values().map(|p| p.decoys as u64).sum()
    }

    pub fn point(&self, score: f64) -> Option<TargetDecoyPoint> {
        self.points.get(&key(score)).copied()
    }

    /// Estimated PEP at `score`, if the score is present and
    /// [`estimate_probabilities`](Self::estimate_probabilities) has run.
    pub fn pep_at(&self, score: f64) -> Option<f64> {
        self.points.get(&key(score)).map(|p| p.pep)
    }

    pub fn iter_points(&self) -> impl Iterator<Item = (f64, TargetDecoyPoint)> + '_ {
        self.points.iter().map(|(k, p)| (f64::from_bits(*k), *p))
    }

    /// Distinct scores in ascending order, memoized until the next mutation.
    pub fn sorted_scores(&mut self) -> &[f64] {
        if self.sorted.is_none() {
            let mut scores = self
                .points
                .keys()
                .map(|k| f64::from_bits(*k))
                .collect::<Vec<_>>();
            scores.sort_by(|a, b| a.total_cmp(b));
            self.sorted = Some(scores);
        }
        self.sorted.as_deref().unwrap_or(&[])
    }

    /// Override the sliding-window size. `None` restores the default
    /// (`n_max`). Takes effect on the next estimation.
    pub fn set_window_size(&mut self, window: Option<u32>) {
        self.window_override = window;
    }

    pub fn window_size(&mut self) -> u32 {
        match self.window_override {
            Some(w) => w,
            None => self.n_max(),
        }
    }

    /// Longest run of target hits strictly between two decoy hits. Runs that
    /// end at the very last observed score are excluded, since they would
    /// otherwise distort the window size at the PEP-plateau boundary.
    pub fn n_max(&mut self) -> u32 {
        self.estimate_ns().n_max
    }

    /// Number of target hits observed before the first decoy.
    pub fn target_only_prefix(&mut self) -> u32 {
        self.estimate_ns().target_only_prefix
    }

    fn estimate_ns(&mut self) -> Metrics {
        if let Some(metrics) = self.metrics {
            return metrics;
        }
        let scores = self.sorted_scores().to_vec();
        let n = scores.len();

        let mut metrics = Metrics::default();
        let mut seen_decoy = false;
        let mut run = 0u32;
        for (i, score) in scores.iter().enumerate() {
            let point = self.points[&key(*score)];
            if seen_decoy {
                run += point.targets;
            } else {
                metrics.target_only_prefix += point.targets;
            }
            if point.decoys > 0 {
                if seen_decoy && i + 1 < n {
                    metrics.n_max = metrics.n_max.max(run);
                }
                seen_decoy = true;
                run = 0;
            }
        }
        self.metrics = Some(metrics);
        metrics
    }

    /// Estimate the PEP at every point with a symmetric sliding window.
    ///
    /// The window is defined in target-count space: it extends on each side
    /// of the current point until roughly `window_size / 2` target hits have
    /// been covered, then the decoy/target ratio inside the window is the PEP
    /// estimate, clamped to 1. Both window boundaries only ever advance, so a
    /// full pass is O(n). Idempotent until the histogram is mutated again.
    pub fn estimate_probabilities(&mut self) {
        let window = self.window_size();
        let scores = self.sorted_scores().to_vec();
        let n = scores.len();
        if n == 0 {
            return;
        }

        // Prefix sums over the sorted points.
        let mut cum_targets = vec![0u64; n + 1];
        let mut cum_decoys = vec![0u64; n + 1];
        for (i, score) in scores.iter().enumerate() {
            let point = self.points[&key(*score)];
            cum_targets[i + 1] = cum_targets[i] + point.targets as u64;
            cum_decoys[i + 1] = cum_decoys[i] + point.decoys as u64;
        }

        let half = window as u64 / 2;
        let mut lo = 0usize;
        let mut hi = 0usize;
        let mut plateau = false;
        for i in 0..n {
            if plateau {
                self.points.get_mut(&key(scores[i])).unwrap().pep = 1.0;
                continue;
            }
            if hi < i {
                hi = i;
            }
            // Shrink below and grow above until each side holds ~half the
            // window's target mass. Windows saturate at the boundaries.
            while cum_targets[i] - cum_targets[lo] > half {
                lo += 1;
            }
            while hi + 1 < n && cum_targets[hi + 2] - cum_targets[i + 1] <= half {
                hi += 1;
            }
            let targets = cum_targets[hi + 1] - cum_targets[lo];
            let decoys = cum_decoys[hi + 1] - cum_decoys[lo];
            let pep = if targets == 0 {
                1.0
            } else {
                (decoys as f64 / targets as f64).min(1.0)
            };
            self.points.get_mut(&key(scores[i])).unwrap().pep = pep;
            if pep >= PEP_PLATEAU {
                plateau = true;
            }
        }
        // estimate_probabilities does not mutate counts, so the caches built
        // above stay valid.
        self.sorted = Some(scores);
    }

    /// Advisory flag: the sample is too thin for the PEP estimate to be
    /// trusted. Callers surface this as a warning; estimation proceeds.
    pub fn suspicious_input(&mut self) -> bool {
        let metrics = self.estimate_ns();
        metrics.n_max < MIN_SAMPLE_SIZE
            || metrics.target_only_prefix < MIN_SAMPLE_SIZE
            || metrics.target_only_prefix <= metrics.n_max
    }
}
