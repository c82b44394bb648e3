//! Protein-level validation map: a single global histogram.
//!
//! Protein scores all live on the same probability scale, so no context key
//! is needed. The map supports a full rebuild because protein-group
//! resolution changes the underlying score population in a way the
//! estimator cannot update incrementally.

use crate::histogram::ScoreHistogram;
use crate::thresholds::{TargetDecoyResults, Thresholder};

#[derive(Default)]
pub struct ProteinScoreMap {
    hist: ScoreHistogram,
}

impl ProteinScoreMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, score: f64, decoy: bool) {
        self.hist.put(score, decoy);
    }

    pub fn remove(&mut self, score: f64, decoy: bool) {
        self.hist.remove(score, decoy);
    }

    /// Drop everything; used for the post-resolution re-estimation pass.
    pub fn reset(&mut self) {
        self.hist = ScoreHistogram::new();
    }

    pub fn estimate(&mut self, window_override: Option<u32>) {
        self.hist.set_window_size(window_override);
        self.hist.estimate_probabilities();
    }

    pub fn pep(&self, score: f64) -> Option<f64> {
        self.hist.pep_at(score)
    }

    pub fn results(&mut self, thresholder: &Thresholder) -> TargetDecoyResults {
        thresholder.results(&mut self.hist)
    }

    pub fn suspicious(&mut self) -> bool {
        self.hist.suspicious_input()
    }

    pub fn total_points(&self) -> u64 {
        self.hist.total_targets() + self.hist.total_decoys()
    }

    pub fn histogram(&self) -> &ScoreHistogram {
        &self.hist
    }
}
