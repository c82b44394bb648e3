//! Per-search-engine score calibration.
//!
//! Raw engine scores (e-values and the like) are not comparable across
//! engines. Each engine gets its own target/decoy histogram, and the PEP
//! estimated from it replaces the raw score as a common probability scale
//! before evidence is combined across engines.

use super::KeyedScoreMap;
use crate::histogram::ScoreHistogram;

pub type EngineId = u32;

#[derive(Default)]
pub struct InputMap {
    map: KeyedScoreMap<EngineId>,
}

impl InputMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one peptide assumption for `engine`. `decoy` is derived from
    /// the assumption's parent protein accessions.
    pub fn add(&mut self, engine: EngineId, score: f64, decoy: bool) {
        self.map.put(engine, score, decoy);
    }

    pub fn estimate(&mut self, window_override: Option<u32>) {
        self.map.estimate_all(window_override);
    }

    /// Calibrated PEP for a raw score previously added for this engine.
    pub fn probability(&self, engine: EngineId, score: f64) -> Option<f64> {
        self.map.pep(&engine, score)
    }

    pub fn histogram(&self, engine: EngineId) -> Option<&ScoreHistogram> {
        self.map.histogram(&engine)
    }

    pub fn engines(&self) -> impl Iterator<Item = EngineId> + '_ {
        self.map.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Engines whose calibration histograms are statistically unreliable.
    pub fn suspicious_engines(&mut self) -> Vec<EngineId> {
        let mut engines = self.map.suspicious_keys();
        engines.sort_unstable();
        engines
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn calibration_is_per_engine() {
        let mut map = InputMap::new();
        // Engine 1: clean separation. Engine 2: decoys everywhere.
        for i in 0..50 {
            map.add(1, i as f64 * 0.01, false);
            map.add(2, i as f64 * 0.01, i % 2 == 0);
        }
        for i in 0..10 {
            map.add(1, 10.0 + i as f64, true);
        }
        map.estimate(Some(10));

        let clean = map.probability(1, 0.0).unwrap();
        let noisy = map.probability(2, 0.0).unwrap();
        assert!(clean < noisy);
        assert_eq!(map.probability(3, 0.0), None);
    }
}
