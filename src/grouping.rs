//! Protein-group resolution: merge shared groups whose peptide evidence is
//! subsumed by a better-scoring smaller group, then classify the remaining
//! ambiguous groups by description similarity.
//!
//! The similarity rule is a heuristic (positional token overlap), not a
//! proof of biological equivalence; it is preserved exactly because the
//! downstream validation statistics depend on reproducibility.

use crate::graph::{Annotations, GroupClass, IdentificationGraph, PeptideIx, ProteinIx};
use crate::maps::ProteinScoreMap;
use crate::Error;
use itertools::Itertools;
use log::info;
use std::sync::Arc;
use std::time::Instant;

/// Tokens shorter than this carry no signal (db tags, "OS=?" fragments).
const MIN_TOKEN_LEN: usize = 3;

#[derive(Debug, Default, Clone, Copy)]
pub struct GroupResolution {
    pub merged: usize,
    pub removed: usize,
}

/// Resolve protein-group ambiguity in place.
///
/// For every shared group (more than one accession, probability score < 1)
/// whose accession set is a superset of a smaller group's, the shared
/// group's peptides are merged into the smaller group; if the smaller
/// group's score is at least as good, the shared group is dominated and
/// removed. The removal list is fully collected before any mutation, and
/// every removal is decremented from the protein histogram. Remaining
/// multi-accession groups are then classified.
pub fn resolve_groups(
    graph: &mut IdentificationGraph,
    annotations: &mut Annotations,
    protein_map: &mut ProteinScoreMap,
) -> Result<GroupResolution, Error> {
    let time = Instant::now();
    let n = graph.protein_matches.len();
    let mut remove = vec![false; n];
    let mut merges: Vec<(usize, Vec<PeptideIx>)> = Vec::new();

    for s in 0..n {
        let shared = &graph.protein_matches[s];
        if shared.accessions.len() < 2 {
            continue;
        }
        let shared_score = group_score(annotations, s)?;
        if shared_score >= 1.0 {
            continue;
        }
        for u in 0..n {
            if u == s {
                continue;
            }
            let unique = &graph.protein_matches[u];
            if unique.accessions.len() >= shared.accessions.len() {
                continue;
            }
            if !is_subset(&unique.accessions, &shared.accessions) {
                continue;
            }
            merges.push((u, shared.peptide_matches.clone()));
            let unique_score = group_score(annotations, u)?;
            if unique_score <= shared_score {
                remove[s] = true;
            }
        }
    }

    let merged = merges.len();
    for (into, peptides) in merges {
        let group = &mut graph.protein_matches[into];
        for pep in peptides {
            if !group.peptide_matches.contains(&pep) {
                group.peptide_matches.push(pep);
            }
        }
    }

    let mut removed = 0;
    for (i, flagged) in remove.iter().enumerate() {
        if !*flagged {
            continue;
        }
        let score = group_score(annotations, i)?;
        let decoy = graph.protein_is_decoy(&graph.protein_matches[i]);
        protein_map.remove(score, decoy);
        removed += 1;
    }
    let mut keep = remove.iter().map(|r| !*r);
    graph.protein_matches.retain(|_| keep.next().unwrap());
    let mut keep = remove.iter().map(|r| !*r);
    annotations.proteins.retain(|_| keep.next().unwrap());

    classify_groups(graph, annotations)?;

    info!(
        "resolved protein groups ({} merges, {} removals) in {:?}ms",
        merged,
        removed,
        time.elapsed().as_millis()
    );
    Ok(GroupResolution { merged, removed })
}

/// Classify every remaining group and pick its main accession.
fn classify_groups(
    graph: &mut IdentificationGraph,
    annotations: &mut Annotations,
) -> Result<(), Error> {
    for group in graph.protein_matches.iter_mut() {
        group.accessions.sort();
        group.main_accession = group.accessions.first().cloned();
    }

    let classes = graph
        .protein_matches
        .iter()
        .map(|group| {
            if group.accessions.len() < 2 {
                return GroupClass::Unique;
            }
            let tokens = group
                .accessions
                .iter()
                .map(|acc| description_tokens(graph.description(acc).unwrap_or_default()))
                .collect::<Vec<_>>();

            let mut any_similar = false;
            for (a, b) in (0..tokens.len()).tuple_combinations::<(usize, usize)>() {
                if similar(&tokens[a], &tokens[b]) {
                    any_similar = true;
                    break;
                }
            }
            let all_similar_to_main = (1..tokens.len()).all(|i| similar(&tokens[0], &tokens[i]));

            if !any_similar {
                GroupClass::Unrelated
            } else if all_similar_to_main {
                GroupClass::Isoforms
            } else {
                GroupClass::IsoformsUnrelated
            }
        })
        .collect::<Vec<_>>();

    for (i, class) in classes.into_iter().enumerate() {
        let record = annotations
            .proteins
            .get_mut(i)
            .and_then(Option::as_mut)
            .ok_or_else(|| Error::GroupResolution(format!("no record for protein group {}", i)))?;
        record.group_class = Some(class);
    }
    Ok(())
}

fn group_score(annotations: &Annotations, group: usize) -> Result<f64, Error> {
    annotations
        .protein(ProteinIx(group as u32))
        .map(|record| record.probability_score)
        .map_err(|_| Error::GroupResolution(format!("no record for protein group {}", group)))
}

fn is_subset(small: &[Arc<str>], large: &[Arc<str>]) -> bool {
    small.iter().all(|acc| large.contains(acc))
}

fn description_tokens(description: &str) -> Vec<String> {
    description
        .split_whitespace()
        .filter(|token| token.len() > MIN_TOKEN_LEN)
        .map(String::from)
        .collect()
}

/// Two descriptions are similar when they have the same token count and at
/// least half the tokens match positionally.
fn similar(a: &[String], b: &[String]) -> bool {
    if a.is_empty() || a.len() != b.len() {
        return false;
    }
    let matches = a.iter().zip(b).filter(|(x, y)| x == y).count();
    matches * 2 >= a.len()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::graph::ProteinMatch;

    fn group(accessions: &[&str], peptides: &[u32]) -> ProteinMatch {
        ProteinMatch {
            accessions: accessions.iter().map(|a| Arc::from(*a)).sorted().collect(),
            peptide_matches: peptides.iter().map(|p| PeptideIx(*p)).collect(),
            main_accession: None,
        }
    }

    fn record(score: f64) -> Option<crate::graph::ProteinRecord> {
        Some(crate::graph::ProteinRecord {
            probability_score: score,
            ..Default::default()
        })
    }

    #[test]
    fn dominated_shared_group_is_removed() {
        let mut graph = IdentificationGraph::new();
        graph.protein_matches.push(group(&["P1", "P2"], &[0, 1]));
        graph.protein_matches.push(group(&["P1"], &[2]));

        let mut annotations = Annotations::default();
        annotations.proteins = vec![record(0.3), record(0.1)];

        let mut map = ProteinScoreMap::new();
        map.put(0.3, false);
        map.put(0.1, false);

        let before = map.total_points();
        let resolution = resolve_groups(&mut graph, &mut annotations, &mut map).unwrap();
        assert_eq!(resolution.removed, 1);
        assert_eq!(map.total_points(), before - 1);
        assert!(map.histogram().point(0.3).is_none());

        // Only the unique group survives, with the shared group's peptides.
        assert_eq!(graph.protein_matches.len(), 1);
        let survivor = &graph.protein_matches[0];
        assert_eq!(survivor.accessions.len(), 1);
        assert_eq!(
            survivor.peptide_matches,
            vec![PeptideIx(2), PeptideIx(0), PeptideIx(1)]
        );
        assert_eq!(annotations.proteins.len(), 1);
    }

    #[test]
    fn better_shared_group_survives_but_shares_peptides() {
        let mut graph = IdentificationGraph::new();
        graph.protein_matches.push(group(&["P1", "P2"], &[0]));
        graph.protein_matches.push(group(&["P1"], &[1]));

        let mut annotations = Annotations::default();
        // Shared group scores better (lower) than the unique group.
        annotations.proteins = vec![record(0.05), record(0.4)];

        let mut map = ProteinScoreMap::new();
        map.put(0.05, false);
        map.put(0.4, false);

        let resolution = resolve_groups(&mut graph, &mut annotations, &mut map).unwrap();
        assert_eq!(resolution.removed, 0);
        assert_eq!(resolution.merged, 1);
        assert_eq!(graph.protein_matches.len(), 2);
        // Peptides were still attributed to the subsumed unique group.
        assert_eq!(
            graph.protein_matches[1].peptide_matches,
            vec![PeptideIx(1), PeptideIx(0)]
        );
    }

    #[test]
    fn classification_isoforms() {
        let mut graph = IdentificationGraph::new();
        graph.set_description("P1", "Keratin type II cytoskeletal isoform alpha");
        graph.set_description("P2", "Keratin type II cytoskeletal isoform beta");
        graph.protein_matches.push(group(&["P1", "P2"], &[0]));

        let mut annotations = Annotations::default();
        annotations.proteins = vec![record(1.0)];
        let mut map = ProteinScoreMap::new();

        resolve_groups(&mut graph, &mut annotations, &mut map).unwrap();
        let record = annotations.proteins[0].as_ref().unwrap();
        assert_eq!(record.group_class, Some(GroupClass::Isoforms));
        assert_eq!(
            graph.protein_matches[0].main_accession.as_deref(),
            Some("P1")
        );
    }

    #[test]
    fn classification_unrelated() {
        let mut graph = IdentificationGraph::new();
        graph.set_description("P1", "Serum albumin precursor protein");
        graph.set_description("P2", "Trypsin digestive enzyme");
        graph.protein_matches.push(group(&["P1", "P2"], &[0]));

        let mut annotations = Annotations::default();
        annotations.proteins = vec![record(1.0)];
        let mut map = ProteinScoreMap::new();

        resolve_groups(&mut graph, &mut annotations, &mut map).unwrap();
        let record = annotations.proteins[0].as_ref().unwrap();
        assert_eq!(record.group_class, Some(GroupClass::Unrelated));
    }

    #[test]
    fn classification_mixed_isoforms() {
        let mut graph = IdentificationGraph::new();
        graph.set_description("P1", "Tubulin alpha chain variant");
        graph.set_description("P2", "Tubulin beta chain variant");
        graph.set_description("P3", "Completely different description here");
        graph.protein_matches.push(group(&["P1", "P2", "P3"], &[0]));

        let mut annotations = Annotations::default();
        annotations.proteins = vec![record(1.0)];
        let mut map = ProteinScoreMap::new();

        resolve_groups(&mut graph, &mut annotations, &mut map).unwrap();
        let record = annotations.proteins[0].as_ref().unwrap();
        assert_eq!(record.group_class, Some(GroupClass::IsoformsUnrelated));
    }

    #[test]
    fn single_accession_is_unique() {
        let mut graph = IdentificationGraph::new();
        graph.protein_matches.push(group(&["P1"], &[0]));
        let mut annotations = Annotations::default();
        annotations.proteins = vec![record(0.2)];
        let mut map = ProteinScoreMap::new();

        resolve_groups(&mut graph, &mut annotations, &mut map).unwrap();
        let record = annotations.proteins[0].as_ref().unwrap();
        assert_eq!(record.group_class, Some(GroupClass::Unique));
    }

    #[test]
    fn missing_descriptions_never_match() {
        let mut graph = IdentificationGraph::new();
        graph.protein_matches.push(group(&["P1", "P2"], &[0]));
        let mut annotations = Annotations::default();
        annotations.proteins = vec![record(1.0)];
        let mut map = ProteinScoreMap::new();

        resolve_groups(&mut graph, &mut annotations, &mut map).unwrap();
        let record = annotations.proteins[0].as_ref().unwrap();
        assert_eq!(record.group_class, Some(GroupClass::Unrelated));
    }
}
