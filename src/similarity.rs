//! Pairwise entity similarity and fuzzy duplicate grouping.
//!
//! Duplicate detection is a deliberately offline operation: it scores every
//! unordered pair within each entity-type partition (O(n²) per type) and must
//! not sit on a hot path.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::Serialize;

use crate::error::GraphError;
use crate::graph::{Entity, GraphDocument};

const NAME_WEIGHT: f64 = 0.4;
const TYPE_WEIGHT: f64 = 0.3;
const OBSERVATION_WEIGHT: f64 = 0.3;

/// Similarity threshold used when the caller does not supply one.
pub const DEFAULT_THRESHOLD: f64 = 0.8;

/// A transitively-closed set of entities mutually similar above a threshold.
#[derive(Debug, Clone, Serialize, JsonSchema, PartialEq)]
pub struct DuplicateGroup {
    /// Member entity names, in document order
    pub entities: Vec<String>,
    /// Highest pairwise similarity observed within the group
    pub score: f64,
    /// Member with the earliest `createdAt` (ties break to document order)
    #[serde(rename = "suggestedMergeTarget")]
    pub suggested_merge_target: String,
}

/// Weighted similarity of two entities, in [0, 1].
///
/// 0.4 · name (1 − normalized Levenshtein over lower-cased names)
/// + 0.3 · type (exact equality)
/// + 0.3 · observations (Jaccard over lower-cased observation sets).
pub fn similarity(a: &Entity, b: &Entity) -> f64 {
    NAME_WEIGHT * name_score(&a.name, &b.name)
        + TYPE_WEIGHT * if a.entity_type == b.entity_type { 1.0 } else { 0.0 }
        + OBSERVATION_WEIGHT * observation_score(&a.observations, &b.observations)
}

fn name_score(a: &str, b: &str) -> f64 {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    // Normalize by the longer name, in characters; levenshtein counts chars too.
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - strsim::levenshtein(&a, &b) as f64 / longest as f64
}

fn observation_score(a: &[String], b: &[String]) -> f64 {
    let a: HashSet<String> = a.iter().map(|o| o.to_lowercase()).collect();
    let b: HashSet<String> = b.iter().map(|o| o.to_lowercase()).collect();
    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}

/// Group likely duplicate entities.
///
/// Entities are partitioned by `entityType` (cross-type pairs are never
/// compared). Pairs scoring at or above the threshold are unioned into groups
/// by transitive closure: if either member of a qualifying pair already
/// belongs to a group, the pair joins that group instead of starting a new
/// one, and two existing groups bridged by a pair are merged.
pub fn detect_duplicates(
    graph: &GraphDocument,
    threshold: Option<f64>,
) -> Result<Vec<DuplicateGroup>, GraphError> {
    let threshold = threshold.unwrap_or(DEFAULT_THRESHOLD);
    if !(0.0..=1.0).contains(&threshold) {
        return Err(GraphError::validation(format!(
            "similarity threshold must be within [0, 1], got {threshold}"
        )));
    }

    // Partition entity indices by type, keeping document order within and
    // across partitions.
    let mut type_order: Vec<&str> = Vec::new();
    let mut by_type: HashMap<&str, Vec<usize>> = HashMap::new();
    for (idx, entity) in graph.entities.iter().enumerate() {
        by_type
            .entry(entity.entity_type.as_str())
            .or_insert_with(|| {
                type_order.push(entity.entity_type.as_str());
                Vec::new()
            })
            .push(idx);
    }

    let mut groups: Vec<DuplicateGroup> = Vec::new();

    for entity_type in type_order {
        let members = &by_type[entity_type];

        // members[i] -> group slot, while groups are under construction
        let mut assignment: HashMap<usize, usize> = HashMap::new();
        let mut partition_groups: Vec<(Vec<usize>, f64)> = Vec::new();

        for (i, &a_idx) in members.iter().enumerate() {
            for &b_idx in &members[i + 1..] {
                let score = similarity(&graph.entities[a_idx], &graph.entities[b_idx]);
                if score < threshold {
                    continue;
                }
                match (assignment.get(&a_idx).copied(), assignment.get(&b_idx).copied()) {
                    (None, None) => {
                        let slot = partition_groups.len();
                        partition_groups.push((vec![a_idx, b_idx], score));
                        assignment.insert(a_idx, slot);
                        assignment.insert(b_idx, slot);
                    }
                    (Some(slot), None) => {
                        partition_groups[slot].0.push(b_idx);
                        partition_groups[slot].1 = partition_groups[slot].1.max(score);
                        assignment.insert(b_idx, slot);
                    }
                    (None, Some(slot)) => {
                        partition_groups[slot].0.push(a_idx);
                        partition_groups[slot].1 = partition_groups[slot].1.max(score);
                        assignment.insert(a_idx, slot);
                    }
                    (Some(slot_a), Some(slot_b)) if slot_a == slot_b => {
                        partition_groups[slot_a].1 = partition_groups[slot_a].1.max(score);
                    }
                    (Some(slot_a), Some(slot_b)) => {
                        // A pair bridging two groups collapses them into one.
                        let absorbed = std::mem::take(&mut partition_groups[slot_b].0);
                        let absorbed_score = partition_groups[slot_b].1;
                        for idx in &absorbed {
                            assignment.insert(*idx, slot_a);
                        }
                        partition_groups[slot_a].0.extend(absorbed);
                        partition_groups[slot_a].1 =
                            partition_groups[slot_a].1.max(absorbed_score).max(score);
                    }
                }
            }
        }

        for (mut indices, score) in partition_groups {
            if indices.is_empty() {
                continue; // absorbed into another group
            }
            indices.sort_unstable();
            let target_idx = suggested_target(graph, &indices);
            groups.push(DuplicateGroup {
                entities: indices
                    .iter()
                    .map(|&i| graph.entities[i].name.clone())
                    .collect(),
                score,
                suggested_merge_target: graph.entities[target_idx].name.clone(),
            });
        }
    }

    Ok(groups)
}

/// Earliest `createdAt` wins; document order breaks ties (strict comparison
/// over indices already in document order).
fn suggested_target(graph: &GraphDocument, indices: &[usize]) -> usize {
    let mut best = indices[0];
    let mut best_created: DateTime<Utc> = graph.entities[best].created_at;
    for &idx in &indices[1..] {
        if graph.entities[idx].created_at < best_created {
            best = idx;
            best_created = graph.entities[idx].created_at;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::TimeZone;

    use super::*;

    fn entity(name: &str, entity_type: &str, observations: &[&str], created_secs: i64) -> Entity {
        let created = Utc.timestamp_opt(created_secs, 0).unwrap();
        Entity {
            name: name.to_string(),
            entity_type: entity_type.to_string(),
            observations: observations.iter().map(|s| s.to_string()).collect(),
            created_at: created,
            updated_at: created,
            created_by: None,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn identical_entities_score_one() {
        let a = entity("Alice", "Person", &["engineer", "paris"], 0);
        assert!((similarity(&a, &a) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn scores_stay_within_unit_interval() {
        let cases = [
            entity("Alice", "Person", &["engineer"], 0),
            entity("Alicia", "Person", &["painter"], 0),
            entity("Zebra", "Animal", &[], 0),
            entity("", "Person", &[], 0),
        ];
        for a in &cases {
            for b in &cases {
                let s = similarity(a, b);
                assert!((0.0..=1.0).contains(&s), "similarity {s} out of range");
            }
        }
    }

    #[test]
    fn name_term_uses_longer_name_as_normalizer() {
        let a = entity("abcd", "T", &[], 0);
        let b = entity("abxd", "T", &[], 0);
        // distance 1 over length 4: 0.4 * 0.75 + 0.3 * 1.0 + 0.3 * 0.0
        let expected = 0.4 * 0.75 + 0.3;
        assert!((similarity(&a, &b) - expected).abs() < 1e-9);
    }

    #[test]
    fn empty_observation_sets_contribute_zero() {
        let a = entity("same", "T", &[], 0);
        let b = entity("same", "T", &[], 0);
        let expected = 0.4 + 0.3; // name + type only
        assert!((similarity(&a, &b) - expected).abs() < 1e-9);
    }

    #[test]
    fn cross_type_pairs_are_never_grouped() {
        let graph = GraphDocument {
            entities: vec![
                entity("Acme", "Organization", &[], 0),
                entity("Acme", "Person", &[], 1),
            ],
            relations: vec![],
        };
        assert!(detect_duplicates(&graph, Some(0.5)).unwrap().is_empty());
    }

    #[test]
    fn groups_close_transitively() {
        // A ~ B and B ~ C but A !~ C: all three must land in one group.
        let graph = GraphDocument {
            entities: vec![
                entity("node-aaaa", "T", &["x"], 10),
                entity("node-aabb", "T", &["x"], 5),
                entity("node-bbbb", "T", &["x"], 20),
            ],
            relations: vec![],
        };

        let ab = similarity(&graph.entities[0], &graph.entities[1]);
        let bc = similarity(&graph.entities[1], &graph.entities[2]);
        let ac = similarity(&graph.entities[0], &graph.entities[2]);
        let threshold = bc.min(ab) - 0.01;
        assert!(ac < threshold, "test premise: A and C must not qualify directly");

        let groups = detect_duplicates(&graph, Some(threshold)).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].entities.len(), 3);
        // Earliest createdAt (5s) is the merge target.
        assert_eq!(groups[0].suggested_merge_target, "node-aabb");
        assert!((groups[0].score - ab.max(bc)).abs() < 1e-9);
    }

    #[test]
    fn created_at_tie_breaks_to_document_order() {
        let graph = GraphDocument {
            entities: vec![
                entity("dup-one", "T", &["x"], 7),
                entity("dup-two", "T", &["x"], 7),
            ],
            relations: vec![],
        };
        let groups = detect_duplicates(&graph, Some(0.7)).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].suggested_merge_target, "dup-one");
    }

    #[test]
    fn threshold_outside_unit_interval_is_rejected() {
        let graph = GraphDocument::default();
        assert!(detect_duplicates(&graph, Some(1.2)).is_err());
        assert!(detect_duplicates(&graph, Some(-0.1)).is_err());
        assert!(detect_duplicates(&graph, None).is_ok());
    }
}
