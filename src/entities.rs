//! Entity store: create/search/update/delete operations on a graph document.
//!
//! Mutating functions take `&mut GraphDocument` and guarantee the document is
//! untouched when they return an error; every fallible check runs before the
//! first write.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use serde_json::Value;

use crate::error::GraphError;
use crate::graph::{
    union_observations, validate_name, validate_observation, validate_type, Entity, EntityInput,
    GraphDocument, RelationKey,
};

/// Outcome of a cascading entity delete.
#[derive(Debug, Clone)]
pub struct CascadeDelete {
    pub name: String,
    /// Relations removed because either endpoint was the deleted entity
    pub removed_relations: Vec<RelationKey>,
}

/// Create entities, merging into existing ones by name.
///
/// An input whose name already exists does not fail and does not create a
/// second entity: its observations are unioned into the existing entity
/// (deduplicated, first-seen order kept) and `updatedAt` is refreshed. New
/// entities are stamped with `createdAt = updatedAt = now` and `createdBy`.
///
/// Returns every entity touched (created or merged), in input order.
pub fn create_entities(
    graph: &mut GraphDocument,
    inputs: Vec<EntityInput>,
    user_id: Option<&str>,
) -> Result<Vec<Entity>, GraphError> {
    for input in &inputs {
        validate_name(&input.name, "Entity name")?;
        validate_type(&input.entity_type, "Entity type")?;
        for obs in &input.observations {
            validate_observation(obs)?;
        }
    }

    let now = Utc::now();
    let mut touched = Vec::with_capacity(inputs.len());

    for input in inputs {
        match graph.entity_mut(&input.name) {
            Some(existing) => {
                union_observations(&mut existing.observations, input.observations);
                existing.updated_at = now;
                touched.push(existing.clone());
            }
            None => {
                let mut observations = Vec::new();
                union_observations(&mut observations, input.observations);
                let entity = Entity {
                    name: input.name,
                    entity_type: input.entity_type,
                    observations,
                    created_at: now,
                    updated_at: now,
                    created_by: user_id.map(str::to_owned),
                    metadata: HashMap::new(),
                };
                graph.entities.push(entity.clone());
                touched.push(entity);
            }
        }
    }

    Ok(touched)
}

/// Field-query search: case-insensitive substring match per provided field,
/// omitted fields are wildcards. Both omitted returns every entity.
pub fn search_entities(
    graph: &GraphDocument,
    name: Option<&str>,
    entity_type: Option<&str>,
) -> Vec<Entity> {
    let name = name.map(str::to_lowercase);
    let entity_type = entity_type.map(str::to_lowercase);

    graph
        .entities
        .iter()
        .filter(|e| {
            name.as_deref()
                .is_none_or(|n| e.name.to_lowercase().contains(n))
                && entity_type
                    .as_deref()
                    .is_none_or(|t| e.entity_type.to_lowercase().contains(t))
        })
        .cloned()
        .collect()
}

/// Free-text search across entity names, types and observations (logical OR).
///
/// Returns matched entities plus the relations whose endpoints both matched,
/// so the result is a self-contained subgraph.
pub fn search_nodes(graph: &GraphDocument, query: Option<&str>) -> GraphDocument {
    let entities: Vec<Entity> = match query {
        None => graph.entities.clone(),
        Some(q) => {
            let q = q.to_lowercase();
            graph
                .entities
                .iter()
                .filter(|e| {
                    e.name.to_lowercase().contains(&q)
                        || e.entity_type.to_lowercase().contains(&q)
                        || e.observations.iter().any(|o| o.to_lowercase().contains(&q))
                })
                .cloned()
                .collect()
        }
    };

    subgraph_with_relations(graph, entities)
}

/// Fetch specific entities by exact name plus the relations among them.
pub fn open_nodes(graph: &GraphDocument, names: &[String]) -> GraphDocument {
    let wanted: HashSet<&str> = names.iter().map(String::as_str).collect();
    let entities: Vec<Entity> = graph
        .entities
        .iter()
        .filter(|e| wanted.contains(e.name.as_str()))
        .cloned()
        .collect();

    subgraph_with_relations(graph, entities)
}

fn subgraph_with_relations(graph: &GraphDocument, entities: Vec<Entity>) -> GraphDocument {
    let names: HashSet<&str> = entities.iter().map(|e| e.name.as_str()).collect();
    let relations = graph
        .relations
        .iter()
        .filter(|r| names.contains(r.from.as_str()) && names.contains(r.to.as_str()))
        .cloned()
        .collect();

    GraphDocument { entities, relations }
}

/// Append a single observation to an existing entity.
///
/// The append is skipped (and `updatedAt` left alone) when the exact
/// observation is already present. Missing entities are an error; callers
/// wanting create-on-miss must create explicitly first.
pub fn add_observation(
    graph: &mut GraphDocument,
    entity_name: &str,
    observation: String,
    _user_id: Option<&str>,
) -> Result<Entity, GraphError> {
    validate_observation(&observation)?;

    let entity = graph
        .entity_mut(entity_name)
        .ok_or_else(|| GraphError::entity_not_found(entity_name))?;

    if !entity.observations.contains(&observation) {
        entity.observations.push(observation);
        entity.updated_at = Utc::now();
    }

    Ok(entity.clone())
}

/// Union new observations into an entity and shallow-merge metadata.
///
/// New metadata keys overwrite existing ones. `createdBy` is back-filled only
/// when previously unset.
pub fn update_entity(
    graph: &mut GraphDocument,
    entity_name: &str,
    observations: Vec<String>,
    user_id: Option<&str>,
    metadata: Option<HashMap<String, Value>>,
) -> Result<Entity, GraphError> {
    for obs in &observations {
        validate_observation(obs)?;
    }

    let entity = graph
        .entity_mut(entity_name)
        .ok_or_else(|| GraphError::entity_not_found(entity_name))?;

    union_observations(&mut entity.observations, observations);
    if let Some(metadata) = metadata {
        entity.metadata.extend(metadata);
    }
    if entity.created_by.is_none() {
        entity.created_by = user_id.map(str::to_owned);
    }
    entity.updated_at = Utc::now();

    Ok(entity.clone())
}

/// Delete an entity and cascade-delete every relation touching it.
///
/// The entity removal and the relation cascade happen together; there is no
/// state in which the entity is gone but its relations remain.
pub fn delete_entity(
    graph: &mut GraphDocument,
    entity_name: &str,
) -> Result<CascadeDelete, GraphError> {
    if !graph.has_entity(entity_name) {
        return Err(GraphError::entity_not_found(entity_name));
    }

    graph.entities.retain(|e| e.name != entity_name);

    let mut removed_relations = Vec::new();
    graph.relations.retain(|r| {
        if r.from == entity_name || r.to == entity_name {
            removed_relations.push(r.key());
            false
        } else {
            true
        }
    });

    Ok(CascadeDelete {
        name: entity_name.to_string(),
        removed_relations,
    })
}
