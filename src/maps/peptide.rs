//! Peptide-level validation map, keyed by modification profile.
//!
//! Rare modification profiles do not carry enough hits for a stable PEP
//! estimate, so after filling, sparse keys are folded into the compatible
//! profile sharing the most modifications ("corrected key"). All lookups and
//! thresholds go through the corrected key.

use super::KeyedScoreMap;
use crate::histogram::MIN_SAMPLE_SIZE;
use crate::thresholds::{TargetDecoyResults, Thresholder};
use fnv::FnvHashMap;
use itertools::Itertools;

/// Canonical map key for a set of modifications: sorted, comma-joined.
/// The empty string is the unmodified profile.
pub fn modification_key(modifications: &[String]) -> String {
    modifications.iter().sorted().join(",")
}

#[derive(Default)]
pub struct PeptideScoreMap {
    map: KeyedScoreMap<String>,
    corrected: FnvHashMap<String, String>,
}

impl PeptideScoreMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: String, score: f64, decoy: bool) {
        self.map.put(key, score, decoy);
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.corrected.clear();
    }

    /// The key whose histogram actually holds this profile's hits.
    pub fn corrected_key<'a>(&'a self, key: &'a str) -> &'a str {
        self.corrected.get(key).map(String::as_str).unwrap_or(key)
    }

    /// Fold keys with fewer than [`MIN_SAMPLE_SIZE`] points into the
    /// sufficiently-populated key sharing the most modification tokens
    /// (ties toward the larger key). With no sufficiently-populated key at
    /// all, everything folds into the largest key.
    pub fn fold_sparse_keys(&mut self) {
        let sizes = self
            .map
            .keys()
            .map(|key| {
                let hist = self.map.histogram(key).unwrap();
                let size = hist.total_targets() + hist.total_decoys();
                (key.clone(), size)
            })
            .collect::<Vec<_>>();

        let anchors = sizes
            .iter()
            .filter(|(_, size)| *size >= MIN_SAMPLE_SIZE as u64)
            .cloned()
            .collect::<Vec<_>>();
        let fallback = sizes
            .iter()
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
            .map(|(key, _)| key.clone());

        for (key, size) in &sizes {
            if *size >= MIN_SAMPLE_SIZE as u64 {
                continue;
            }
            let target = anchors
                .iter()
                .filter(|(anchor, _)| anchor != key)
                .max_by(|a, b| {
                    shared_tokens(key, &a.0)
                        .cmp(&shared_tokens(key, &b.0))
                        .then(a.1.cmp(&b.1))
                        .then_with(|| b.0.cmp(&a.0))
                })
                .map(|(anchor, _)| anchor.clone())
                .or_else(|| fallback.clone().filter(|f| f != key));

            if let Some(target) = target {
                self.fold_into(key, &target);
            }
        }
    }

    fn fold_into(&mut self, from: &str, into: &str) {
        let hist = match self.map.take(&from.to_string()) {
            Some(hist) => hist,
            None => return,
        };
        for (score, point) in hist.iter_points() {
            for _ in 0..point.targets {
                self.map.put(into.to_string(), score, false);
            }
            for _ in 0..point.decoys {
                self.map.put(into.to_string(), score, true);
            }
        }
        self.corrected.insert(from.to_string(), into.to_string());
        // Chains: anything previously folded into `from` now points at `into`.
        for target in self.corrected.values_mut() {
            if target == from {
                *target = into.to_string();
            }
        }
    }

    pub fn estimate(&mut self, window_override: Option<u32>) {
        self.map.estimate_all(window_override);
    }

    pub fn pep(&self, key: &str, score: f64) -> Option<f64> {
        let corrected = self.corrected_key(key).to_string();
        self.map.pep(&corrected, score)
    }

    pub fn results(&mut self, thresholder: &Thresholder) -> FnvHashMap<String, TargetDecoyResults> {
        self.map.results(thresholder)
    }

    pub fn suspicious_profiles(&mut self) -> Vec<String> {
        let mut profiles = self.map.suspicious_keys();
        profiles.sort_unstable();
        profiles
    }
}

fn shared_tokens(a: &str, b: &str) -> usize {
    a.split(',')
        .filter(|t| !t.is_empty())
        .filter(|t| b.split(',').any(|other| other == *t))
        .count()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn modification_key_is_canonical() {
        let a = modification_key(&["Oxidation of M".into(), "Carbamidomethyl of C".into()]);
        let b = modification_key(&["Carbamidomethyl of C".into(), "Oxidation of M".into()]);
        assert_eq!(a, b);
        assert_eq!(modification_key(&[]), "");
    }

    fn fill(map: &mut PeptideScoreMap, key: &str, n: usize) {
        for i in 0..n {
            map.put(key.to_string(), i as f64 * 0.01, i % 10 == 9);
        }
    }

    #[test]
    fn sparse_keys_fold_into_best_match() {
        let mut map = PeptideScoreMap::new();
        fill(&mut map, "ox", 200);
        fill(&mut map, "cmm", 150);
        // Sparse profile, shares the "ox" token with the "ox" anchor.
        fill(&mut map, "ox,phospho", 5);

        map.fold_sparse_keys();
        assert_eq!(map.corrected_key("ox,phospho"), "ox");
        assert_eq!(map.corrected_key("ox"), "ox");

        // The sparse histogram's hits moved into the anchor.
        let hist = map.map.histogram(&"ox".to_string()).unwrap();
        assert_eq!(hist.total_targets() + hist.total_decoys(), 205);
        assert!(map.map.histogram(&"ox,phospho".to_string()).is_none());
    }

    #[test]
    fn no_anchor_folds_into_largest() {
        let mut map = PeptideScoreMap::new();
        fill(&mut map, "a", 50);
        fill(&mut map, "b", 30);
        map.fold_sparse_keys();
        assert_eq!(map.corrected_key("b"), "a");
        assert_eq!(map.corrected_key("a"), "a");
    }

    #[test]
    fn lookups_follow_corrected_key() {
        let mut map = PeptideScoreMap::new();
        fill(&mut map, "big", 300);
        fill(&mut map, "small", 3);
        map.fold_sparse_keys();
        map.estimate(Some(10));
        assert!(map.pep("small", 0.0).is_some());
        assert_eq!(map.pep("small", 0.0), map.pep("big", 0.0));
    }
}
