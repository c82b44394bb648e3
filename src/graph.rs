//! The identification graph: spectrum matches, peptide matches and protein
//! matches in arena-style indexed storage, plus the typed probability/
//! validation records the pipeline attaches to each match.
//!
//! The graph is normally built by an external importer; [`build_matches`]
//! provides the minimal grouping an importer would do (spectra grouped by
//! first-hit peptide, peptides grouped by accession set), which is enough
//! for callers that only have spectrum-level identifications.

use crate::maps::input::EngineId;
use crate::{Error, MatchLevel};
use fnv::{FnvHashMap, FnvHashSet};
use itertools::Itertools;
use serde::Serialize;
use std::sync::Arc;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpectrumIx(pub u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeptideIx(pub u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProteinIx(pub u32);

/// One candidate peptide reported by one search engine for one spectrum.
#[derive(Clone, Debug)]
pub struct PeptideAssumption {
    /// Theoretical peptide key: sequence plus modification signature.
    pub peptide: Arc<str>,
    /// Plain amino-acid sequence.
    pub sequence: Arc<str>,
    pub modifications: Vec<String>,
    /// Parent protein accessions.
    pub proteins: Vec<Arc<str>>,
    /// Engine-reported rank, 1 is best.
    pub rank: u32,
    /// Raw engine score, e-value-like: lower is better.
    pub raw_score: f64,
    /// Calibrated probability, filled in by the pipeline. 1.0 until then.
    pub probability: f64,
}

impl PeptideAssumption {
    pub fn new(
        peptide: impl Into<Arc<str>>,
        sequence: impl Into<Arc<str>>,
        proteins: Vec<Arc<str>>,
        rank: u32,
        raw_score: f64,
    ) -> Self {
        Self {
            peptide: peptide.into(),
            sequence: sequence.into(),
            modifications: Vec::new(),
            proteins,
            rank,
            raw_score,
            probability: 1.0,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct SpectrumMatch {
    pub spec_id: String,
    pub charge: u8,
    /// Ranked assumptions per reporting engine. At most one entry per engine.
    pub assumptions: FnvHashMap<EngineId, Vec<PeptideAssumption>>,
    /// Index of each engine's declared first hit into its assumption list.
    pub first_hits: FnvHashMap<EngineId, usize>,
    /// The overall best candidate: (engine, assumption index).
    pub best_assumption: Option<(EngineId, usize)>,
}

impl SpectrumMatch {
    pub fn new(spec_id: impl Into<String>, charge: u8) -> Self {
        Self {
            spec_id: spec_id.into(),
            charge,
            ..Default::default()
        }
    }

    pub fn best(&self) -> Option<&PeptideAssumption> {
        let (engine, ix) = self.best_assumption?;
        self.assumptions.get(&engine)?.get(ix)
    }

    pub fn first_hit(&self, engine: EngineId) -> Option<&PeptideAssumption> {
        let ix = *self.first_hits.get(&engine)?;
        self.assumptions.get(&engine)?.get(ix)
    }
}

/// All spectrum matches sharing one theoretical peptide.
#[derive(Clone, Debug)]
pub struct PeptideMatch {
    pub key: Arc<str>,
    pub sequence: Arc<str>,
    pub modifications: Vec<String>,
    pub proteins: Vec<Arc<str>>,
    pub spectrum_matches: Vec<SpectrumIx>,
}

/// All peptide matches sharing one parent accession set.
#[derive(Clone, Debug)]
pub struct ProteinMatch {
    /// Lexically sorted accessions.
    pub accessions: Vec<Arc<str>>,
    pub peptide_matches: Vec<PeptideIx>,
    pub main_accession: Option<Arc<str>>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupClass {
    Unique,
    Isoforms,
    IsoformsUnrelated,
    Unrelated,
}

#[derive(Copy, Clone, Debug, Default, Serialize)]
pub struct PsmRecord {
    pub probability_score: f64,
    pub pep: f64,
    pub validated: bool,
}

#[derive(Copy, Clone, Debug, Default, Serialize)]
pub struct PeptideRecord {
    pub probability_score: f64,
    pub pep: f64,
    pub validated: bool,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ProteinRecord {
    pub probability_score: f64,
    pub pep: f64,
    pub validated: bool,
    pub group_class: Option<GroupClass>,
}

/// Probability/validation records, stored in side tables parallel to the
/// match arenas - no back-references between a match and its annotations.
#[derive(Default)]
pub struct Annotations {
    pub psms: Vec<Option<PsmRecord>>,
    pub peptides: Vec<Option<PeptideRecord>>,
    pub proteins: Vec<Option<ProteinRecord>>,
}

impl Annotations {
    pub fn psm(&self, ix: SpectrumIx) -> Result<&PsmRecord, Error> {
        self.psms
            .get(ix.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(Error::MissingRecord {
                level: MatchLevel::Spectrum,
                index: ix.0 as usize,
            })
    }

    pub fn peptide(&self, ix: PeptideIx) -> Result<&PeptideRecord, Error> {
        self.peptides
            .get(ix.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(Error::MissingRecord {
                level: MatchLevel::Peptide,
                index: ix.0 as usize,
            })
    }

    pub fn protein(&self, ix: ProteinIx) -> Result<&ProteinRecord, Error> {
        self.proteins
            .get(ix.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(Error::MissingRecord {
                level: MatchLevel::Protein,
                index: ix.0 as usize,
            })
    }
}

#[derive(Default)]
pub struct IdentificationGraph {
    pub spectrum_matches: Vec<SpectrumMatch>,
    pub peptide_matches: Vec<PeptideMatch>,
    pub protein_matches: Vec<ProteinMatch>,
    decoy_accessions: FnvHashSet<Arc<str>>,
    descriptions: FnvHashMap<Arc<str>, String>,
}

impl IdentificationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_decoy_accession(&mut self, accession: impl Into<Arc<str>>) {
        self.decoy_accessions.insert(accession.into());
    }

    pub fn set_description(&mut self, accession: impl Into<Arc<str>>, description: impl Into<String>) {
        self.descriptions.insert(accession.into(), description.into());
    }

    pub fn description(&self, accession: &str) -> Option<&str> {
        self.descriptions.get(accession).map(String::as_str)
    }

    pub fn is_decoy_accession(&self, accession: &str) -> bool {
        self.decoy_accessions.contains(accession)
    }

    /// An assumption is a decoy hit if any parent accession is a decoy.
    pub fn assumption_is_decoy(&self, assumption: &PeptideAssumption) -> bool {
        assumption
            .proteins
            .iter()
            .any(|acc| self.is_decoy_accession(acc))
    }

    pub fn peptide_is_decoy(&self, peptide: &PeptideMatch) -> bool {
        peptide
            .proteins
            .iter()
            .any(|acc| self.is_decoy_accession(acc))
    }

    pub fn protein_is_decoy(&self, protein: &ProteinMatch) -> bool {
        protein
            .accessions
            .iter()
            .any(|acc| self.is_decoy_accession(acc))
    }

    pub fn add_spectrum_match(&mut self, psm: SpectrumMatch) -> SpectrumIx {
        let ix = SpectrumIx(self.spectrum_matches.len() as u32);
        self.spectrum_matches.push(psm);
        ix
    }

    /// Attach one engine's ranked assumptions to an existing spectrum match.
    /// At most one assumption set per engine per spectrum.
    pub fn add_assumptions(
        &mut self,
        ix: SpectrumIx,
        engine: EngineId,
        assumptions: Vec<PeptideAssumption>,
    ) -> Result<(), Error> {
        let psm = &mut self.spectrum_matches[ix.0 as usize];
        if psm.assumptions.contains_key(&engine) {
            return Err(Error::DuplicateEngineMatch {
                spectrum: psm.spec_id.clone(),
                engine,
            });
        }
        psm.assumptions.insert(engine, assumptions);
        Ok(())
    }

    /// Group spectrum matches into peptide matches (by first-hit peptide
    /// key) and peptide matches into protein matches (by accession set).
    ///
    /// Stands in for the external match builder between PSM scoring and
    /// peptide scoring. A spectrum joins the peptide match of every engine's
    /// first hit, so a peptide match may aggregate spectra whose best
    /// assumption points elsewhere; peptide scoring excludes those.
    pub fn build_matches(&mut self) {
        self.peptide_matches.clear();
        self.protein_matches.clear();

        let mut by_peptide: FnvHashMap<Arc<str>, PeptideIx> = FnvHashMap::default();
        for (i, psm) in self.spectrum_matches.iter().enumerate() {
            let six = SpectrumIx(i as u32);
            let mut seen: FnvHashSet<Arc<str>> = FnvHashSet::default();
            for engine in psm.assumptions.keys().copied().sorted() {
                let assumption = match psm.first_hit(engine) {
                    Some(a) => a,
                    None => continue,
                };
                if !seen.insert(assumption.peptide.clone()) {
                    continue;
                }
                let ix = *by_peptide
                    .entry(assumption.peptide.clone())
                    .or_insert_with(|| {
                        let ix = PeptideIx(self.peptide_matches.len() as u32);
                        self.peptide_matches.push(PeptideMatch {
                            key: assumption.peptide.clone(),
                            sequence: assumption.sequence.clone(),
                            modifications: assumption.modifications.clone(),
                            proteins: assumption.proteins.iter().cloned().sorted().collect(),
                            spectrum_matches: Vec::new(),
                        });
                        ix
                    });
                self.peptide_matches[ix.0 as usize].spectrum_matches.push(six);
            }
        }

        let mut by_accessions: FnvHashMap<String, ProteinIx> = FnvHashMap::default();
        for (i, peptide) in self.peptide_matches.iter().enumerate() {
            let key = peptide.proteins.iter().join("|");
            let ix = *by_accessions.entry(key).or_insert_with(|| {
                let ix = ProteinIx(self.protein_matches.len() as u32);
                self.protein_matches.push(ProteinMatch {
                    accessions: peptide.proteins.clone(),
                    peptide_matches: Vec::new(),
                    main_accession: None,
                });
                ix
            });
            self.protein_matches[ix.0 as usize]
                .peptide_matches
                .push(PeptideIx(i as u32));
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn assumption(peptide: &str, proteins: &[&str], score: f64) -> PeptideAssumption {
        PeptideAssumption::new(
            peptide,
            peptide,
            proteins.iter().map(|p| Arc::from(*p)).collect(),
            1,
            score,
        )
    }

    #[test]
    fn duplicate_engine_is_rejected() {
        let mut graph = IdentificationGraph::new();
        let ix = graph.add_spectrum_match(SpectrumMatch::new("scan=1", 2));
        graph
            .add_assumptions(ix, 1, vec![assumption("PEPTIDEK", &["P1"], 0.01)])
            .unwrap();
        let err = graph
            .add_assumptions(ix, 1, vec![assumption("OTHERK", &["P2"], 0.02)])
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateEngineMatch { .. }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn decoy_derivation_from_accessions() {
        let mut graph = IdentificationGraph::new();
        graph.add_decoy_accession("rev_P1");
        let target = assumption("AAK", &["P1"], 0.1);
        let decoy = assumption("KAA", &["rev_P1", "P2"], 0.1);
        assert!(!graph.assumption_is_decoy(&target));
        assert!(graph.assumption_is_decoy(&decoy));
    }

    #[test]
    fn build_matches_groups_by_peptide_and_accessions() {
        let mut graph = IdentificationGraph::new();
        for (spec, pep, prots) in [
            ("scan=1", "AAK", vec!["P1"]),
            ("scan=2", "AAK", vec!["P1"]),
            ("scan=3", "CCK", vec!["P1", "P2"]),
        ] {
            let ix = graph.add_spectrum_match(SpectrumMatch::new(spec, 2));
            graph
                .add_assumptions(ix, 1, vec![assumption(pep, &prots, 0.01)])
                .unwrap();
            graph.spectrum_matches[ix.0 as usize].first_hits.insert(1, 0);
        }
        graph.build_matches();

        assert_eq!(graph.peptide_matches.len(), 2);
        assert_eq!(graph.protein_matches.len(), 2);
        let aak = graph
            .peptide_matches
            .iter()
            .find(|p| &*p.key == "AAK")
            .unwrap();
        assert_eq!(aak.spectrum_matches.len(), 2);
        let shared = graph
            .protein_matches
            .iter()
            .find(|p| p.accessions.len() == 2)
            .unwrap();
        assert_eq!(shared.peptide_matches.len(), 1);
    }

    #[test]
    fn missing_record_is_fatal() {
        let annotations = Annotations::default();
        let err = annotations.psm(SpectrumIx(0)).unwrap_err();
        assert!(matches!(err, Error::MissingRecord { .. }));
        assert!(!err.is_recoverable());
    }
}
