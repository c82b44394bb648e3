//! Final threshold application.
//!
//! Each level (PSM, peptide, protein) is validated independently against its
//! own map's score limit; no cross-level consistency is enforced. A protein
//! may validate while one of its peptides does not - accepted behavior.

use crate::graph::{Annotations, IdentificationGraph};
use crate::maps::peptide::modification_key;
use crate::maps::{PeptideScoreMap, ProteinScoreMap, PsmScoreMap};
use crate::thresholds::Thresholder;
use rayon::prelude::*;
use serde::Serialize;

#[derive(Copy, Clone, Debug, Default, Serialize)]
pub struct ValidationCounts {
    pub psms: usize,
    pub peptides: usize,
    pub proteins: usize,
}

/// Flag every match at every level as validated or not, at the configured
/// FDR. Decoy matches never validate.
pub fn apply(
    graph: &IdentificationGraph,
    annotations: &mut Annotations,
    psm_map: &mut PsmScoreMap,
    peptide_map: &mut PeptideScoreMap,
    protein_map: &mut ProteinScoreMap,
    thresholder: &Thresholder,
) -> ValidationCounts {
    let psm_limits = psm_map.results(thresholder);
    let peptide_limits = peptide_map.results(thresholder);
    let protein_limit = protein_map.results(thresholder).score_limit;

    let psms = graph
        .spectrum_matches
        .par_iter()
        .zip(annotations.psms.par_iter_mut())
        .filter_map(|(psm, record)| {
            let record = record.as_mut()?;
            let decoy = psm
                .best()
                .map(|a| graph.assumption_is_decoy(a))
                .unwrap_or(true);
            let limit = psm_limits
                .get(&psm.charge)
                .map(|r| r.score_limit)
                .unwrap_or(f64::NEG_INFINITY);
            record.validated = !decoy && record.probability_score <= limit;
            record.validated.then_some(())
        })
        .count();

    let peptides = graph
        .peptide_matches
        .par_iter()
        .zip(annotations.peptides.par_iter_mut())
        .filter_map(|(peptide, record)| {
            let record = record.as_mut()?;
            let key = modification_key(&peptide.modifications);
            let limit = peptide_limits
                .get(peptide_map.corrected_key(&key))
                .map(|r| r.score_limit)
                .unwrap_or(f64::NEG_INFINITY);
            record.validated =
                !graph.peptide_is_decoy(peptide) && record.probability_score <= limit;
            record.validated.then_some(())
        })
        .count();

    let proteins = graph
        .protein_matches
        .par_iter()
        .zip(annotations.proteins.par_iter_mut())
        .filter_map(|(protein, record)| {
            let record = record.as_mut()?;
            record.validated =
                !graph.protein_is_decoy(protein) && record.probability_score <= protein_limit;
            record.validated.then_some(())
        })
        .count();

    ValidationCounts {
        psms,
        peptides,
        proteins,
    }
}
