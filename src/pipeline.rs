//! The aggregation pipeline: a strict linear state machine that turns raw
//! per-engine scores into calibrated probabilities, combines them into PSM
//! scores, aggregates upward to peptides and proteins, resolves protein
//! groups, and validates every level at the configured FDR.
//!
//! Each phase iterates the full identification graph once and must complete
//! before the next phase reads its output. The caller-supplied progress
//! handler is polled between whole-collection passes only; on cancellation
//! the current phase finishes and the remaining ones are skipped.

use crate::config::ValidationSettings;
use crate::graph::{Annotations, IdentificationGraph, PeptideRecord, ProteinRecord, PsmRecord};
use crate::grouping::{self, GroupResolution};
use crate::maps::input::EngineId;
use crate::maps::peptide::modification_key;
use crate::maps::{InputMap, PeptideScoreMap, ProteinScoreMap, PsmScoreMap};
use crate::validate::{self, ValidationCounts};
use crate::{Error, MatchLevel};
use fnv::{FnvHashMap, FnvHashSet};
use itertools::Itertools;
use log::{info, warn};
use rayon::prelude::*;
use std::sync::Arc;
use std::time::Instant;

/// Caller-supplied progress reporting and cancellation.
pub trait ProgressHandler {
    fn message(&mut self, _msg: &str) {}
    fn cancelled(&self) -> bool {
        false
    }
}

/// Handler that never cancels and drops all messages.
#[derive(Default)]
pub struct NoProgress;

impl ProgressHandler for NoProgress {}

/// Builds peptide and protein matches from scored spectrum matches. Runs
/// exactly once per pipeline run, between PSM scoring and peptide scoring.
pub trait MatchBuilder {
    fn build(&mut self, graph: &mut IdentificationGraph) -> Result<(), Error>;
}

/// Default builder: the graph's own grouping.
#[derive(Default)]
pub struct GroupingBuilder;

impl MatchBuilder for GroupingBuilder {
    fn build(&mut self, graph: &mut IdentificationGraph) -> Result<(), Error> {
        graph.build_matches();
        Ok(())
    }
}

#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct RunSummary {
    pub cancelled: bool,
    /// Statistical-unreliability warnings, one per affected map.
    pub advisories: Vec<String>,
    pub validated: ValidationCounts,
    pub merged_protein_groups: usize,
    pub removed_protein_groups: usize,
}

pub struct Pipeline<'a> {
    graph: &'a mut IdentificationGraph,
    pub settings: ValidationSettings,
    pub input_map: InputMap,
    pub psm_map: PsmScoreMap,
    pub peptide_map: PeptideScoreMap,
    pub protein_map: ProteinScoreMap,
    pub annotations: Annotations,
    advisories: Vec<String>,
    last_counts: ValidationCounts,
}

impl<'a> Pipeline<'a> {
    pub fn new(graph: &'a mut IdentificationGraph, settings: ValidationSettings) -> Self {
        Self {
            graph,
            settings,
            input_map: InputMap::new(),
            psm_map: PsmScoreMap::new(),
            peptide_map: PeptideScoreMap::new(),
            protein_map: ProteinScoreMap::new(),
            annotations: Annotations::default(),
            advisories: Vec::new(),
            last_counts: ValidationCounts::default(),
        }
    }

    /// Run the full pipeline.
    pub fn run(
        &mut self,
        builder: &mut dyn MatchBuilder,
        progress: &mut dyn ProgressHandler,
    ) -> Result<RunSummary, Error> {
        let start = Instant::now();
        let mut summary = RunSummary::default();
        self.advisories.clear();

        progress.message("calibrating search engine scores");
        self.fill_input_map();
        self.calibrate_assumptions()?;
        if self.poll(progress, &mut summary) {
            return Ok(summary);
        }

        progress.message("resolving first hits");
        self.resolve_first_hits();
        if self.poll(progress, &mut summary) {
            return Ok(summary);
        }

        progress.message("scoring spectrum matches");
        self.score_psms()?;
        if self.poll(progress, &mut summary) {
            return Ok(summary);
        }

        progress.message("building peptide and protein matches");
        builder.build(self.graph)?;
        if self.poll(progress, &mut summary) {
            return Ok(summary);
        }

        progress.message("scoring peptides");
        self.score_peptides()?;
        if self.poll(progress, &mut summary) {
            return Ok(summary);
        }

        progress.message("scoring proteins");
        self.score_proteins()?;
        if self.poll(progress, &mut summary) {
            return Ok(summary);
        }

        progress.message("resolving protein groups");
        match self.resolve_and_rescore() {
            Ok(GroupResolution { merged, removed }) => {
                summary.merged_protein_groups = merged;
                summary.removed_protein_groups = removed;
            }
            Err(e) if e.is_recoverable() => {
                warn!("protein group resolution failed: {}", e);
                progress.message(&format!("protein group resolution failed: {}", e));
            }
            Err(e) => return Err(e),
        }
        if self.poll(progress, &mut summary) {
            return Ok(summary);
        }

        progress.message("validating matches");
        summary.validated = self.validate();
        summary.advisories = self.advisories.clone();

        info!(
            "validated {} PSMs, {} peptides, {} proteins in {:?}ms",
            summary.validated.psms,
            summary.validated.peptides,
            summary.validated.proteins,
            start.elapsed().as_millis()
        );
        Ok(summary)
    }

    fn poll(&self, progress: &mut dyn ProgressHandler, summary: &mut RunSummary) -> bool {
        if progress.cancelled() {
            info!("cancellation requested, skipping remaining phases");
            summary.cancelled = true;
            summary.advisories = self.advisories.clone();
            true
        } else {
            false
        }
    }

    /// Populate one calibration histogram per search engine from every
    /// reported assumption, and estimate its PEP curve.
    fn fill_input_map(&mut self) {
        self.input_map = InputMap::new();
        for psm in self.graph.spectrum_matches.iter() {
            for (engine, assumptions) in &psm.assumptions {
                for assumption in assumptions {
                    self.input_map.add(
                        *engine,
                        assumption.raw_score,
                        self.graph.assumption_is_decoy(assumption),
                    );
                }
            }
        }
        self.input_map.estimate(self.settings.window_size);
        for engine in self.input_map.suspicious_engines() {
            self.advisories.push(format!(
                "input map: scores for search engine {} are statistically unreliable",
                engine
            ));
        }
    }

    /// Replace each assumption's raw score with a calibrated probability.
    ///
    /// Walking each engine's e-values in ascending order and assigning the
    /// running maximum keeps calibrated probabilities monotone in the raw
    /// score, so a better-ranked but worse-scored hit can never look more
    /// confident than a lower-ranked, better-scored one.
    fn calibrate_assumptions(&mut self) -> Result<(), Error> {
        let input_map = &self.input_map;
        for psm in self.graph.spectrum_matches.iter_mut() {
            for (engine, assumptions) in psm.assumptions.iter_mut() {
                let mut order = (0..assumptions.len()).collect::<Vec<_>>();
                order.sort_by(|&a, &b| {
                    assumptions[a].raw_score.total_cmp(&assumptions[b].raw_score)
                });
                let mut running = 0.0f64;
                for ix in order {
                    let p = input_map
                        .probability(*engine, assumptions[ix].raw_score)
                        .ok_or(Error::MissingCalibration { engine: *engine })?;
                    running = running.max(p);
                    assumptions[ix].probability = running;
                }
            }
        }
        Ok(())
    }

    /// Declare each engine's first hit. Where several candidates tie at the
    /// top e-value, prefer the peptide group (I/L treated as identical) that
    /// explains the most spectra across the whole dataset.
    fn resolve_first_hits(&mut self) {
        let mut counts: FnvHashMap<String, u32> = FnvHashMap::default();
        for psm in self.graph.spectrum_matches.iter() {
            let mut seen: FnvHashSet<String> = FnvHashSet::default();
            for assumptions in psm.assumptions.values() {
                let best = assumptions
                    .iter()
                    .map(|a| a.raw_score)
                    .fold(f64::INFINITY, f64::min);
                for assumption in assumptions.iter().filter(|a| a.raw_score == best) {
                    seen.insert(il_normalized(&assumption.sequence));
                }
            }
            for key in seen {
                *counts.entry(key).or_default() += 1;
            }
        }

        for psm in self.graph.spectrum_matches.iter_mut() {
            psm.first_hits.clear();
            for (engine, assumptions) in &psm.assumptions {
                if assumptions.is_empty() {
                    continue;
                }
                let best = assumptions
                    .iter()
                    .map(|a| a.raw_score)
                    .fold(f64::INFINITY, f64::min);
                let pick = assumptions
                    .iter()
                    .enumerate()
                    .filter(|(_, a)| a.raw_score == best)
                    .max_by(|(ia, a), (ib, b)| {
                        let ka = il_normalized(&a.sequence);
                        let kb = il_normalized(&b.sequence);
                        let ca = counts.get(&ka).copied().unwrap_or(0);
                        let cb = counts.get(&kb).copied().unwrap_or(0);
                        // Ties break toward the lexically smaller group,
                        // then the earlier assumption, for reproducibility.
                        ca.cmp(&cb).then_with(|| kb.cmp(&ka)).then(ib.cmp(ia))
                    })
                    .map(|(ix, _)| ix);
                if let Some(ix) = pick {
                    psm.first_hits.insert(*engine, ix);
                }
            }
        }
    }

    /// Combine per-engine probabilities into one PSM probability score,
    /// choose the best assumption, and populate/estimate the PSM map.
    pub fn score_psms(&mut self) -> Result<(), Error> {
        self.psm_map.clear();
        let n = self.graph.spectrum_matches.len();

        let choices = self
            .graph
            .spectrum_matches
            .iter()
            .map(|psm| {
                let engines = psm.first_hits.keys().copied().sorted().collect::<Vec<_>>();
                match engines.len() {
                    0 => None,
                    1 => {
                        let engine = engines[0];
                        let ix = psm.first_hits[&engine];
                        let score = psm.assumptions[&engine][ix].probability;
                        Some((score, (engine, ix)))
                    }
                    _ => Some(combine_engines(psm, &engines)),
                }
            })
            .collect::<Vec<_>>();

        self.annotations.psms = vec![None; n];
        for (i, choice) in choices.into_iter().enumerate() {
            let (score, best) = match choice {
                Some(c) => c,
                None => continue,
            };
            let psm = &mut self.graph.spectrum_matches[i];
            psm.best_assumption = Some(best);
            let charge = psm.charge;
            let decoy = {
                let psm = &self.graph.spectrum_matches[i];
                match psm.best() {
                    Some(a) => self.graph.assumption_is_decoy(a),
                    None => true,
                }
            };
            self.annotations.psms[i] = Some(PsmRecord {
                probability_score: score,
                pep: 0.0,
                validated: false,
            });
            self.psm_map.put(charge, score, decoy);
        }

        self.psm_map.estimate(self.settings.window_size);
        for charge in self.psm_map.suspicious_charges() {
            self.advisories.push(format!(
                "PSM map: charge {} scores are statistically unreliable",
                charge
            ));
        }
        self.attach_psm_peps()
    }

    /// Copy the estimated PEP back onto each spectrum match record.
    fn attach_psm_peps(&mut self) -> Result<(), Error> {
        let psm_map = &self.psm_map;
        self.graph
            .spectrum_matches
            .par_iter()
            .zip(self.annotations.psms.par_iter_mut())
            .enumerate()
            .try_for_each(|(i, (psm, record))| {
                if let Some(record) = record.as_mut() {
                    record.pep = psm_map
                        .pep(psm.charge, record.probability_score)
                        .ok_or(Error::MissingRecord {
                            level: MatchLevel::Spectrum,
                            index: i,
                        })?;
                }
                Ok(())
            })
    }

    /// Peptide probability score: product of the PEPs of all spectrum
    /// matches whose best assumption is this theoretical peptide. Spectrum
    /// matches pointing at a different peptide are excluded.
    pub fn score_peptides(&mut self) -> Result<(), Error> {
        self.peptide_map.clear();
        let n = self.graph.peptide_matches.len();
        self.annotations.peptides = vec![None; n];

        for i in 0..n {
            let peptide = &self.graph.peptide_matches[i];
            let mut score = 1.0f64;
            for &six in &peptide.spectrum_matches {
                let psm = &self.graph.spectrum_matches[six.0 as usize];
                let points_here = psm.best().map(|a| a.peptide == peptide.key).unwrap_or(false);
                if points_here {
                    score *= self.annotations.psm(six)?.pep;
                }
            }
            let key = modification_key(&peptide.modifications);
            let decoy = self.graph.peptide_is_decoy(peptide);
            self.annotations.peptides[i] = Some(PeptideRecord {
                probability_score: score,
                pep: 0.0,
                validated: false,
            });
            self.peptide_map.put(key, score, decoy);
        }

        self.peptide_map.fold_sparse_keys();
        self.peptide_map.estimate(self.settings.window_size);
        for profile in self.peptide_map.suspicious_profiles() {
            let name = if profile.is_empty() {
                "unmodified"
            } else {
                profile.as_str()
            };
            self.advisories.push(format!(
                "peptide map: profile `{}` scores are statistically unreliable",
                name
            ));
        }

        for (i, peptide) in self.graph.peptide_matches.iter().enumerate() {
            let key = modification_key(&peptide.modifications);
            if let Some(record) = self.annotations.peptides[i].as_mut() {
                record.pep = self
                    .peptide_map
                    .pep(&key, record.probability_score)
                    .ok_or(Error::MissingRecord {
                        level: MatchLevel::Peptide,
                        index: i,
                    })?;
            }
        }
        Ok(())
    }

    /// Protein probability score: product of the PEPs of all contained
    /// peptide matches. Rebuilds the protein map from scratch, preserving
    /// any group classification already attached.
    pub fn score_proteins(&mut self) -> Result<(), Error> {
        self.protein_map.reset();
        let n = self.graph.protein_matches.len();

        let mut records = Vec::with_capacity(n);
        for i in 0..n {
            let protein = &self.graph.protein_matches[i];
            let mut score = 1.0f64;
            for &pix in &protein.peptide_matches {
                score *= self.annotations.peptide(pix)?.pep;
            }
            let group_class = self
                .annotations
                .proteins
                .get(i)
                .and_then(|r| r.as_ref())
                .and_then(|r| r.group_class);
            records.push(Some(ProteinRecord {
                probability_score: score,
                pep: 0.0,
                validated: false,
                group_class,
            }));
            self.protein_map
                .put(score, self.graph.protein_is_decoy(protein));
        }
        self.annotations.proteins = records;

        self.protein_map.estimate(self.settings.window_size);
        if !self.graph.protein_matches.is_empty() && self.protein_map.suspicious() {
            self.advisories
                .push("protein map: scores are statistically unreliable".into());
        }

        for record in self.annotations.proteins.iter_mut().flatten() {
            record.pep = self
                .protein_map
                .pep(record.probability_score)
                .ok_or(Error::MissingRecord {
                    level: MatchLevel::Protein,
                    index: 0,
                })?;
        }
        Ok(())
    }

    /// Resolve protein groups, then rebuild the protein map from the
    /// surviving groups. Removal changes the score population, so the map
    /// must be re-estimated from scratch.
    fn resolve_and_rescore(&mut self) -> Result<GroupResolution, Error> {
        let resolution =
            grouping::resolve_groups(self.graph, &mut self.annotations, &mut self.protein_map)?;
        self.score_proteins()?;
        Ok(resolution)
    }

    fn validate(&mut self) -> ValidationCounts {
        let thresholder = self.settings.thresholder();
        let counts = validate::apply(
            self.graph,
            &mut self.annotations,
            &mut self.psm_map,
            &mut self.peptide_map,
            &mut self.protein_map,
            &thresholder,
        );
        self.last_counts = counts;
        counts
    }

    /// Re-entry point after the PSM map was edited (e.g. a new window size):
    /// re-runs estimation and every downstream step, never upstream ones.
    /// Re-estimation moves protein scores, so group domination is resolved
    /// again before validating.
    pub fn spectrum_map_changed(&mut self) -> Result<ValidationCounts, Error> {
        let result = (|| {
            self.psm_map.estimate(self.settings.window_size);
            self.attach_psm_peps()?;
            self.score_peptides()?;
            self.score_proteins()?;
            self.resolve_and_rescore()?;
            Ok(self.validate())
        })();
        self.recover(result, "spectrum map change")
    }

    /// Re-entry point after the peptide map was edited.
    pub fn peptide_map_changed(&mut self) -> Result<ValidationCounts, Error> {
        let result = (|| {
            self.peptide_map.estimate(self.settings.window_size);
            for (i, peptide) in self.graph.peptide_matches.iter().enumerate() {
                let key = modification_key(&peptide.modifications);
                if let Some(record) = self.annotations.peptides[i].as_mut() {
                    record.pep = self
                        .peptide_map
                        .pep(&key, record.probability_score)
                        .ok_or(Error::MissingRecord {
                            level: MatchLevel::Peptide,
                            index: i,
                        })?;
                }
            }
            self.score_proteins()?;
            self.resolve_and_rescore()?;
            Ok(self.validate())
        })();
        self.recover(result, "peptide map change")
    }

    /// Re-entry point after the protein map was edited.
    pub fn protein_map_changed(&mut self) -> Result<ValidationCounts, Error> {
        let result = (|| {
            self.protein_map.estimate(self.settings.window_size);
            for record in self.annotations.proteins.iter_mut().flatten() {
                record.pep = self
                    .protein_map
                    .pep(record.probability_score)
                    .ok_or(Error::MissingRecord {
                        level: MatchLevel::Protein,
                        index: 0,
                    })?;
            }
            Ok(self.validate())
        })();
        self.recover(result, "protein map change")
    }

    /// Data-consistency failures during a re-entry are logged and the
    /// previously computed state stands; logic errors propagate.
    fn recover(
        &self,
        result: Result<ValidationCounts, Error>,
        context: &str,
    ) -> Result<ValidationCounts, Error> {
        match result {
            Err(e) if e.is_recoverable() => {
                warn!("{} failed, keeping previous results: {}", context, e);
                Ok(self.last_counts)
            }
            other => other,
        }
    }

    pub fn advisories(&self) -> &[String] {
        &self.advisories
    }
}

/// Multi-engine combination: the PSM probability score is the product of
/// each engine's first-hit probability; every candidate peptide seen across
/// engines accumulates a product of per-engine support, and the candidate
/// with the smallest accumulated product becomes the best assumption.
fn combine_engines(
    psm: &crate::graph::SpectrumMatch,
    engines: &[EngineId],
) -> (f64, (EngineId, usize)) {
    let mut score = 1.0f64;
    for engine in engines {
        let ix = psm.first_hits[engine];
        score *= psm.assumptions[engine][ix].probability;
    }

    let mut support: FnvHashMap<Arc<str>, f64> = FnvHashMap::default();
    let mut occurrence: FnvHashMap<Arc<str>, (f64, EngineId, usize)> = FnvHashMap::default();
    for engine in engines {
        // Each engine contributes its best probability per distinct candidate.
        let mut per_engine: FnvHashMap<Arc<str>, (f64, usize)> = FnvHashMap::default();
        for (ix, assumption) in psm.assumptions[engine].iter().enumerate() {
            let entry = per_engine
                .entry(assumption.peptide.clone())
                .or_insert((assumption.probability, ix));
            if assumption.probability < entry.0 {
                *entry = (assumption.probability, ix);
            }
        }
        for (key, (p, ix)) in per_engine {
            *support.entry(key.clone()).or_insert(1.0) *= p;
            let entry = occurrence.entry(key).or_insert((p, *engine, ix));
            if p < entry.0 {
                *entry = (p, *engine, ix);
            }
        }
    }

    let best_key = support
        .iter()
        .min_by(|a, b| a.1.total_cmp(b.1).then_with(|| a.0.cmp(b.0)))
        .map(|(key, _)| key.clone())
        .expect("at least one engine reported a first hit");
    let (_, engine, ix) = occurrence[&best_key];
    (score, (engine, ix))
}

fn il_normalized(sequence: &str) -> String {
    sequence.replace('I', "L")
}
