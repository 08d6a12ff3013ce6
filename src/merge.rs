//! Merge engine: consolidate duplicate entities into one and rewire relations.

use std::collections::HashSet;

use chrono::Utc;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::graph::{union_observations, Entity, GraphDocument, RelationKey};

/// How source entities contribute to the merge target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    /// Union observations and shallow-merge metadata from the sources
    Combine,
    /// Keep the target's observations/metadata as-is; sources are only removed
    Replace,
}

/// Outcome of a merge, including what was removed so record-indexing
/// backends can drop orphans.
#[derive(Debug, Clone)]
pub struct MergeReport {
    pub merged: Entity,
    pub removed_entities: Vec<String>,
    pub removed_relations: Vec<RelationKey>,
}

/// Absorb `sources` into `target`.
///
/// The whole operation fails with `NotFound` (and the graph is left
/// untouched) when the target or any source is missing. Afterwards every
/// relation endpoint naming a source is rewritten to the target; relations
/// that become self-loops are dropped, as are rewritten relations whose
/// triple now collides with an already-present one (first occurrence wins).
pub fn merge_entities(
    graph: &mut GraphDocument,
    target: &str,
    sources: &[String],
    strategy: MergeStrategy,
) -> Result<MergeReport, GraphError> {
    if sources.is_empty() {
        return Err(GraphError::validation("merge requires at least one source entity"));
    }
    if sources.iter().any(|s| s == target) {
        return Err(GraphError::validation(
            "merge target cannot be one of the sources",
        ));
    }
    if !graph.has_entity(target) {
        return Err(GraphError::entity_not_found(target));
    }
    for source in sources {
        if !graph.has_entity(source) {
            return Err(GraphError::entity_not_found(source));
        }
    }

    let now = Utc::now();
    let source_names: HashSet<&str> = sources.iter().map(String::as_str).collect();

    if strategy == MergeStrategy::Combine {
        // Drain sources in the caller-given order so later sources overwrite
        // earlier metadata keys (and the target's own).
        let mut observations = Vec::new();
        let mut metadata = Vec::new();
        for source in sources {
            let entity = graph.entity(source).expect("source resolved above");
            observations.extend(entity.observations.iter().cloned());
            metadata.extend(entity.metadata.clone());
        }

        let target_entity = graph.entity_mut(target).expect("target resolved above");
        union_observations(&mut target_entity.observations, observations);
        target_entity.metadata.extend(metadata);
    }

    // Rewire relations, then drop self-loops and triple collisions created by
    // the rewrite.
    let mut removed_relations = Vec::new();
    let mut seen: HashSet<(String, String, String)> = HashSet::new();
    let relations = std::mem::take(&mut graph.relations);
    for mut relation in relations {
        let mut rewritten = false;
        if source_names.contains(relation.from.as_str()) {
            relation.from = target.to_string();
            rewritten = true;
        }
        if source_names.contains(relation.to.as_str()) {
            relation.to = target.to_string();
            rewritten = true;
        }
        if relation.from == relation.to {
            removed_relations.push(relation.key());
            continue;
        }
        if !seen.insert((
            relation.from.clone(),
            relation.to.clone(),
            relation.relation_type.clone(),
        )) {
            removed_relations.push(relation.key());
            continue;
        }
        if rewritten {
            relation.updated_at = now;
        }
        graph.relations.push(relation);
    }

    graph
        .entities
        .retain(|e| !source_names.contains(e.name.as_str()));

    let target_entity = graph.entity_mut(target).expect("target survives the merge");
    target_entity.updated_at = now;
    let merged = target_entity.clone();

    Ok(MergeReport {
        merged,
        removed_entities: sources.to_vec(),
        removed_relations,
    })
}
