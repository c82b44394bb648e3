//! Score thresholding at a configured false-discovery rate.
//!
//! Scans a histogram's sorted scores, builds a cumulative FDR series, and
//! picks the most permissive score whose FDR stays at or below the limit.

use crate::histogram::ScoreHistogram;
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FdrEstimator {
    /// Raw cumulative decoy / target ratio.
    #[default]
    Classical,
    /// Cumulative PEP mass over targets stands in for the decoy count
    /// (Käll et al. style), usable when decoy counts are sparse.
    Probabilistic,
}

/// One entry of the FDR/FNR series, at a distinct score.
#[derive(Copy, Clone, Debug, Serialize)]
pub struct FdrPoint {
    pub score: f64,
    pub fdr: f64,
    pub fnr: f64,
    pub cum_targets: u64,
    pub cum_decoys: u64,
}

/// Derived outputs of thresholding one histogram.
#[derive(Copy, Clone, Debug, Serialize)]
pub struct TargetDecoyResults {
    /// Most permissive score with FDR <= the limit; `NEG_INFINITY` when no
    /// score qualifies (nothing validates).
    pub score_limit: f64,
    /// Configured limit, in percent.
    pub fdr_limit: f64,
    pub fdr_at_limit: f64,
    pub fnr_at_limit: f64,
    pub validated_targets: u64,
    pub validated_decoys: u64,
    pub estimator: FdrEstimator,
    pub suspicious: bool,
}

#[derive(Copy, Clone, Debug, Serialize)]
pub struct Thresholder {
    /// Target FDR in percent (1.0 = 1%).
    pub fdr_limit: f64,
    pub estimator: FdrEstimator,
}

impl Default for Thresholder {
    fn default() -> Self {
        Self {
            fdr_limit: 1.0,
            estimator: FdrEstimator::Classical,
        }
    }
}

impl Thresholder {
    pub fn new(fdr_limit: f64, estimator: FdrEstimator) -> Self {
        Self {
            fdr_limit,
            estimator,
        }
    }

    /// Cumulative FDR/FNR series over the histogram's ascending scores.
    ///
    /// FNR is derived from PEP mass: the estimated number of true positives
    /// is `sum(1 - pep)` over targets, and the FNR at a score is the share
    /// of that mass rejected by thresholding there.
    pub fn series(&self, hist: &mut ScoreHistogram) -> Vec<FdrPoint> {
        let scores = hist.sorted_scores().to_vec();

        let mut tp_total = 0.0;
        for score in &scores {
            let point = hist.point(*score).unwrap_or_default();
            tp_total += (1.0 - point.pep) * point.targets as f64;
        }

        let mut cum_targets = 0u64;
        let mut cum_decoys = 0u64;
        let mut cum_pep = 0.0f64;
        let mut cum_tp = 0.0f64;
        scores
            .iter()
            .map(|score| {
                let point = hist.point(*score).unwrap_or_default();
                cum_targets += point.targets as u64;
                cum_decoys += point.decoys as u64;
                cum_pep += point.pep * point.targets as f64;
                cum_tp += (1.0 - point.pep) * point.targets as f64;

                let false_hits = match self.estimator {
                    FdrEstimator::Classical => cum_decoys as f64,
                    FdrEstimator::Probabilistic => cum_pep,
                };
                let fdr = match cum_targets {
                    0 => f64::INFINITY,
                    t => false_hits / t as f64,
                };
                let fnr = if tp_total > 0.0 {
                    ((tp_total - cum_tp) / tp_total).max(0.0)
                } else {
                    0.0
                };
                FdrPoint {
                    score: *score,
                    fdr,
                    fnr,
                    cum_targets,
                    cum_decoys,
                }
            })
            .collect()
    }

    /// Threshold the histogram, reporting the chosen score limit and the
    /// rates at that limit. Scanning ascending and keeping the last
    /// qualifying score breaks ties toward the less strict boundary.
    pub fn results(&self, hist: &mut ScoreHistogram) -> TargetDecoyResults {
        let suspicious = hist.suspicious_input();
        let series = self.series(hist);
        let limit = self.fdr_limit / 100.0;

        let mut results = TargetDecoyResults {
            score_limit: f64::NEG_INFINITY,
            fdr_limit: self.fdr_limit,
            fdr_at_limit: 0.0,
            fnr_at_limit: 1.0,
            validated_targets: 0,
            validated_decoys: 0,
            estimator: self.estimator,
            suspicious,
        };
        for point in &series {
            if point.fdr <= limit {
                results.score_limit = point.score;
                results.fdr_at_limit = point.fdr;
                results.fnr_at_limit = point.fnr;
                results.validated_targets = point.cum_targets;
                results.validated_decoys = point.cum_decoys;
            }
        }
        results
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn spec_histogram() -> ScoreHistogram {
        let mut hist = ScoreHistogram::new();
        hist.put(0.01, true);
        hist.put(0.02, false);
        hist.put(0.03, false);
        hist.put(0.5, true);
        hist
    }

    #[test]
    fn classical_threshold_at_fifty_percent() {
        let mut hist = spec_histogram();
        let results = Thresholder::new(50.0, FdrEstimator::Classical).results(&mut hist);
        assert_eq!(results.score_limit, 0.03);
        assert_eq!(results.fdr_at_limit, 0.5);
        assert_eq!(results.validated_targets, 2);
    }

    #[test]
    fn no_qualifying_score() {
        let mut hist = spec_histogram();
        let results = Thresholder::new(1.0, FdrEstimator::Classical).results(&mut hist);
        assert_eq!(results.score_limit, f64::NEG_INFINITY);
        assert_eq!(results.validated_targets, 0);
    }

    #[test]
    fn stricter_limit_never_validates_more() {
        let mut hist = ScoreHistogram::new();
        for i in 0..200 {
            hist.put(i as f64 * 0.01, false);
        }
        for i in 0..20 {
            hist.put(1.0 + i as f64 * 0.1, true);
        }
        let loose = Thresholder::new(5.0, FdrEstimator::Classical).results(&mut hist);
        let strict = Thresholder::new(1.0, FdrEstimator::Classical).results(&mut hist);
        assert!(strict.validated_targets <= loose.validated_targets);
        assert!(strict.score_limit <= loose.score_limit);
    }

    #[test]
    fn probabilistic_estimator_uses_pep_mass() {
        let mut hist = ScoreHistogram::new();
        for i in 0..100 {
            hist.put(i as f64 * 0.01, false);
        }
        for i in 0..10 {
            hist.put(5.0 + i as f64, true);
        }
        hist.set_window_size(Some(10));
        hist.estimate_probabilities();
        let results = Thresholder::new(5.0, FdrEstimator::Probabilistic).results(&mut hist);
        // The clean low-score region has zero PEP mass, so it qualifies.
        assert!(results.score_limit.is_finite());
        assert!(results.validated_targets > 0);
    }

    #[test]
    fn series_is_cumulative() {
        let mut hist = spec_histogram();
        let series = Thresholder::default().series(&mut hist);
        assert_eq!(series.len(), 4);
        assert_eq!(series[0].cum_decoys, 1);
        assert_eq!(series[0].cum_targets, 0);
        assert_eq!(series[3].cum_targets, 2);
        assert_eq!(series[3].cum_decoys, 2);
        assert!(series[0].fdr.is_infinite());
        assert_eq!(series[2].fdr, 0.5);
    }
}
