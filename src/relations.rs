//! Relation store: create/search/update/delete for typed entity relations.

use std::collections::HashMap;

use chrono::Utc;

use crate::error::GraphError;
use crate::graph::{
    clamp_strength, validate_name, validate_type, GraphDocument, Relation, RelationInput,
    RelationKey, DEFAULT_STRENGTH,
};

/// Create relations, silently dropping inputs whose `(from, to, relationType)`
/// triple already exists (the existing relation is not updated). Duplicates
/// within the input batch collapse to the first occurrence.
///
/// Relations are not referentially enforced: endpoints may name entities that
/// do not exist yet.
///
/// Returns only the newly created relations.
pub fn create_relations(
    graph: &mut GraphDocument,
    inputs: Vec<RelationInput>,
    user_id: Option<&str>,
) -> Result<Vec<Relation>, GraphError> {
    for input in &inputs {
        validate_name(&input.from, "From entity")?;
        validate_name(&input.to, "To entity")?;
        validate_type(&input.relation_type, "Relation type")?;
    }

    let now = Utc::now();
    let mut created = Vec::new();

    for input in inputs {
        if graph.has_relation(&input.from, &input.to, &input.relation_type) {
            continue;
        }
        let relation = Relation {
            from: input.from,
            to: input.to,
            relation_type: input.relation_type,
            strength: clamp_strength(input.strength.unwrap_or(DEFAULT_STRENGTH)),
            created_at: now,
            updated_at: now,
            created_by: user_id.map(str::to_owned),
            metadata: HashMap::new(),
        };
        graph.relations.push(relation.clone());
        created.push(relation);
    }

    Ok(created)
}

/// Case-insensitive substring match per provided field; omitted fields are
/// wildcards.
pub fn search_relations(
    graph: &GraphDocument,
    from: Option<&str>,
    to: Option<&str>,
    relation_type: Option<&str>,
) -> Vec<Relation> {
    let from = from.map(str::to_lowercase);
    let to = to.map(str::to_lowercase);
    let relation_type = relation_type.map(str::to_lowercase);

    graph
        .relations
        .iter()
        .filter(|r| {
            from.as_deref()
                .is_none_or(|f| r.from.to_lowercase().contains(f))
                && to.as_deref().is_none_or(|t| r.to.to_lowercase().contains(t))
                && relation_type
                    .as_deref()
                    .is_none_or(|rt| r.relation_type.to_lowercase().contains(rt))
        })
        .cloned()
        .collect()
}

/// Relations created by a given user (`createdBy` substring match), optionally
/// narrowed by a relation-type substring.
pub fn search_relations_by_user(
    graph: &GraphDocument,
    user_id: &str,
    relation_type: Option<&str>,
) -> Vec<Relation> {
    let relation_type = relation_type.map(str::to_lowercase);

    graph
        .relations
        .iter()
        .filter(|r| {
            r.created_by
                .as_deref()
                .is_some_and(|creator| creator.contains(user_id))
                && relation_type
                    .as_deref()
                    .is_none_or(|rt| r.relation_type.to_lowercase().contains(rt))
        })
        .cloned()
        .collect()
}

/// Set the strength of an existing relation, clamped into [0, 1].
pub fn update_relation_strength(
    graph: &mut GraphDocument,
    from: &str,
    to: &str,
    relation_type: &str,
    strength: f64,
) -> Result<Relation, GraphError> {
    let relation = graph
        .relation_mut(from, to, relation_type)
        .ok_or_else(|| GraphError::relation_not_found(from, to, relation_type))?;

    relation.strength = clamp_strength(strength);
    relation.updated_at = Utc::now();

    Ok(relation.clone())
}

/// Remove every relation matching any of the given triples exactly.
/// Best effort: absent triples are not an error. Returns the number removed.
pub fn delete_relations(graph: &mut GraphDocument, keys: &[RelationKey]) -> usize {
    let before = graph.relations.len();
    graph.relations.retain(|r| {
        !keys
            .iter()
            .any(|k| r.matches(&k.from, &k.to, &k.relation_type))
    });
    before - graph.relations.len()
}
