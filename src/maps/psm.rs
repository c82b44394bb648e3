//! PSM-level validation map, keyed by precursor charge.
//!
//! Score populations differ systematically by charge state, so each charge
//! gets its own histogram and its own threshold.

use super::KeyedScoreMap;
use crate::thresholds::{TargetDecoyResults, Thresholder};
use fnv::FnvHashMap;

#[derive(Default)]
pub struct PsmScoreMap {
    map: KeyedScoreMap<u8>,
}

impl PsmScoreMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, charge: u8, score: f64, decoy: bool) {
        self.map.put(charge, score, decoy);
    }

    pub fn remove(&mut self, charge: u8, score: f64, decoy: bool) {
        self.map.remove(&charge, score, decoy);
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn estimate(&mut self, window_override: Option<u32>) {
        self.map.estimate_all(window_override);
    }

    pub fn pep(&self, charge: u8, score: f64) -> Option<f64> {
        self.map.pep(&charge, score)
    }

    /// Per-charge thresholding results at the configured FDR.
    pub fn results(&mut self, thresholder: &Thresholder) -> FnvHashMap<u8, TargetDecoyResults> {
        self.map.results(thresholder)
    }

    pub fn suspicious_charges(&mut self) -> Vec<u8> {
        let mut charges = self.map.suspicious_keys();
        charges.sort_unstable();
        charges
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::thresholds::FdrEstimator;

    #[test]
    fn per_charge_thresholds() {
        let mut map = PsmScoreMap::new();
        for i in 0..100 {
            map.put(2, i as f64 * 0.001, false);
            // Charge 3 population is contaminated early.
            map.put(3, i as f64 * 0.001, i % 4 == 0);
        }
        map.put(2, 0.5, true);
        map.put(3, 0.5, true);
        map.estimate(Some(10));

        let results = map.results(&Thresholder::new(5.0, FdrEstimator::Classical));
        let clean = &results[&2];
        let dirty = &results[&3];
        assert!(clean.validated_targets > dirty.validated_targets);
    }
}
