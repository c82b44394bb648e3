//! The validation maps: one or more target/decoy histograms per level,
//! keyed by a context key, all delegating estimation to the histogram's
//! sliding-window PEP estimator and thresholding to [`Thresholder`].

pub mod input;
pub mod peptide;
pub mod protein;
pub mod psm;

use crate::histogram::ScoreHistogram;
use crate::thresholds::{TargetDecoyResults, Thresholder};
use fnv::FnvHashMap;
use std::hash::Hash;

pub use input::InputMap;
pub use peptide::PeptideScoreMap;
pub use protein::ProteinScoreMap;
pub use psm::PsmScoreMap;

/// Histograms keyed by a context key (search-engine id, charge state,
/// modification profile). Shared machinery for the map family.
pub struct KeyedScoreMap<K> {
    histograms: FnvHashMap<K, ScoreHistogram>,
}

impl<K> Default for KeyedScoreMap<K> {
    fn default() -> Self {
        Self {
            histograms: FnvHashMap::default(),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedScoreMap<K> {
    pub fn put(&mut self, key: K, score: f64, decoy: bool) {
        self.histograms.entry(key).or_default().put(score, decoy);
    }

    pub fn remove(&mut self, key: &K, score: f64, decoy: bool) {
        if let Some(hist) = self.histograms.get_mut(key) {
            hist.remove(score, decoy);
        }
    }

    pub fn histogram(&self, key: &K) -> Option<&ScoreHistogram> {
        self.histograms.get(key)
    }

    pub fn histogram_mut(&mut self, key: &K) -> Option<&mut ScoreHistogram> {
        self.histograms.get_mut(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.histograms.keys()
    }

    pub fn len(&self) -> usize {
        self.histograms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histograms.is_empty()
    }

    pub fn clear(&mut self) {
        self.histograms.clear();
    }

    /// Detach and return the histogram stored under `key`.
    pub fn take(&mut self, key: &K) -> Option<ScoreHistogram> {
        self.histograms.remove(key)
    }

    /// Run PEP estimation on every histogram, applying the configured
    /// window-size override first.
    pub fn estimate_all(&mut self, window_override: Option<u32>) {
        for hist in self.histograms.values_mut() {
            hist.set_window_size(window_override);
            hist.estimate_probabilities();
        }
    }

    pub fn pep(&self, key: &K, score: f64) -> Option<f64> {
        self.histograms.get(key).and_then(|h| h.pep_at(score))
    }

    /// Threshold every histogram independently.
    pub fn results(&mut self, thresholder: &Thresholder) -> FnvHashMap<K, TargetDecoyResults> {
        self.histograms
            .iter_mut()
            .map(|(key, hist)| (key.clone(), thresholder.results(hist)))
            .collect()
    }

    /// Keys whose histograms are statistically unreliable.
    pub fn suspicious_keys(&mut self) -> Vec<K> {
        self.histograms
            .iter_mut()
            .filter_map(|(key, hist)| hist.suspicious_input().then(|| key.clone()))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn keys_are_independent() {
        let mut map = KeyedScoreMap::default();
        map.put(2u8, 0.1, false);
        map.put(2u8, 0.2, true);
        map.put(3u8, 0.1, false);

        assert_eq!(map.len(), 2);
        assert_eq!(map.histogram(&2).unwrap().total_decoys(), 1);
        assert_eq!(map.histogram(&3).unwrap().total_decoys(), 0);

        map.remove(&2, 0.2, true);
        assert_eq!(map.histogram(&2).unwrap().total_decoys(), 0);
    }

    #[test]
    fn suspicious_keys_flags_thin_samples() {
        let mut map = KeyedScoreMap::default();
        // Key 1: a healthy population. Key 2: a handful of points.
        for i in 0..500 {
            map.put(1u8, i as f64 * 0.001, false);
        }
        map.put(1u8, 1.0, true);
        for i in 0..150 {
            map.put(1u8, 2.0 + i as f64 * 0.001, false);
        }
        map.put(1u8, 3.0, true);
        map.put(1u8, 4.0, false);
        for i in 0..5 {
            map.put(2u8, i as f64, false);
        }
        map.put(2u8, 10.0, true);

        assert_eq!(map.suspicious_keys(), vec![2]);
    }

    #[test]
    fn estimate_all_fills_peps() {
        let mut map = KeyedScoreMap::default();
        for i in 0..10 {
            map.put(1u8, i as f64, false);
        }
        map.put(1u8, 20.0, true);
        map.estimate_all(Some(4));
        assert!(map.pep(&1, 0.0).is_some());
        assert!(map.pep(&2, 0.0).is_none());
    }
}
