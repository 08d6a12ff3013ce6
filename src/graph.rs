use std::collections::HashMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GraphError;

/// Default confidence assigned to relations created without an explicit strength.
pub const DEFAULT_STRENGTH: f64 = 0.8;

// Validation constants
const MAX_NAME_LENGTH: usize = 256;
const MAX_TYPE_LENGTH: usize = 128;
const MAX_OBSERVATION_LENGTH: usize = 4096;

/// Entity in the knowledge graph
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Entity {
    /// Unique name of the entity (serves as ID within a workspace)
    pub name: String,

    /// Type of entity (person, organization, concept, etc.)
    #[serde(rename = "entityType")]
    pub entity_type: String,

    /// Facts about the entity, kept in first-insertion order
    #[serde(default)]
    pub observations: Vec<String>,

    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,

    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,

    /// Opaque id of the user that created the entity
    #[serde(rename = "createdBy", default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,

    /// Open string-keyed map for caller-defined annotations
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

/// Relation between two entities.
///
/// Identity is the full `(from, to, relationType)` triple, so multiple
/// relation types may connect the same pair of entities.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Relation {
    /// Source entity name
    pub from: String,

    /// Target entity name
    pub to: String,

    /// Type of relation (works_at, knows, related_to, etc.)
    #[serde(rename = "relationType")]
    pub relation_type: String,

    /// Confidence/weight in [0, 1]
    pub strength: f64,

    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,

    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,

    #[serde(rename = "createdBy", default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl Relation {
    /// True when this relation matches the given identity triple exactly.
    pub fn matches(&self, from: &str, to: &str, relation_type: &str) -> bool {
        self.from == from && self.to == to && self.relation_type == relation_type
    }

    pub fn key(&self) -> RelationKey {
        RelationKey {
            from: self.from.clone(),
            to: self.to.clone(),
            relation_type: self.relation_type.clone(),
        }
    }
}

/// Identity triple of a relation, used for deletes and record-level hooks.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
pub struct RelationKey {
    pub from: String,
    pub to: String,
    #[serde(rename = "relationType")]
    pub relation_type: String,
}

/// Complete knowledge graph for one workspace.
///
/// Entities are unique by name, relations by `(from, to, relationType)`.
/// Insertion order is preserved so observations and entities display in the
/// order they were first seen.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct GraphDocument {
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
}

impl GraphDocument {
    pub fn entity(&self, name: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.name == name)
    }

    pub fn entity_mut(&mut self, name: &str) -> Option<&mut Entity> {
        self.entities.iter_mut().find(|e| e.name == name)
    }

    pub fn has_entity(&self, name: &str) -> bool {
        self.entity(name).is_some()
    }

    pub fn relation(&self, from: &str, to: &str, relation_type: &str) -> Option<&Relation> {
        self.relations
            .iter()
            .find(|r| r.matches(from, to, relation_type))
    }

    pub fn relation_mut(
        &mut self,
        from: &str,
        to: &str,
        relation_type: &str,
    ) -> Option<&mut Relation> {
        self.relations
            .iter_mut()
            .find(|r| r.matches(from, to, relation_type))
    }

    pub fn has_relation(&self, from: &str, to: &str, relation_type: &str) -> bool {
        self.relation(from, to, relation_type).is_some()
    }
}

/// Caller-supplied shape for a new (or re-asserted) entity
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EntityInput {
    pub name: String,
    #[serde(rename = "entityType")]
    pub entity_type: String,
    pub observations: Vec<String>,
}

/// Caller-supplied shape for a new relation
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RelationInput {
    pub from: String,
    pub to: String,
    #[serde(rename = "relationType")]
    pub relation_type: String,
    /// Defaults to 0.8 when omitted; clamped to [0, 1]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strength: Option<f64>,
}

/// Clamp a relation strength into [0, 1].
pub fn clamp_strength(strength: f64) -> f64 {
    strength.clamp(0.0, 1.0)
}

/// Union `incoming` into `existing`, dropping duplicates and preserving
/// first-seen order. Returns the observations that were actually appended.
pub(crate) fn union_observations(existing: &mut Vec<String>, incoming: Vec<String>) -> Vec<String> {
    let mut added = Vec::new();
    for obs in incoming {
        if !existing.contains(&obs) {
            existing.push(obs.clone());
            added.push(obs);
        }
    }
    added
}

/// Validate entity/relation name (no control characters, bounded length)
pub(crate) fn validate_name(name: &str, field: &str) -> Result<(), GraphError> {
    if name.is_empty() {
        return Err(GraphError::validation(format!("{field} cannot be empty")));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(GraphError::validation(format!(
            "{field} too long (max {MAX_NAME_LENGTH} chars)"
        )));
    }
    if name.chars().any(|c| c.is_control()) {
        return Err(GraphError::validation(format!(
            "{field} contains invalid characters"
        )));
    }
    Ok(())
}

/// Validate entity/relation type (alphanumeric, dashes, underscores, dots, colons)
pub(crate) fn validate_type(type_str: &str, field: &str) -> Result<(), GraphError> {
    if type_str.is_empty() {
        return Err(GraphError::validation(format!("{field} cannot be empty")));
    }
    if type_str.len() > MAX_TYPE_LENGTH {
        return Err(GraphError::validation(format!(
            "{field} too long (max {MAX_TYPE_LENGTH} chars)"
        )));
    }
    if !type_str
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.' || c == ':')
    {
        return Err(GraphError::validation(format!(
            "{field} contains invalid characters (only alphanumeric, -, _, ., : allowed)"
        )));
    }
    Ok(())
}

/// Validate observation content
pub(crate) fn validate_observation(obs: &str) -> Result<(), GraphError> {
    if obs.len() > MAX_OBSERVATION_LENGTH {
        return Err(GraphError::validation(format!(
            "Observation too long (max {MAX_OBSERVATION_LENGTH} chars)"
        )));
    }
    if obs.contains('\0') {
        return Err(GraphError::validation("Observation contains null bytes"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strength_clamped_to_unit_interval() {
        assert_eq!(clamp_strength(1.7), 1.0);
        assert_eq!(clamp_strength(-0.2), 0.0);
        assert_eq!(clamp_strength(0.35), 0.35);
    }

    #[test]
    fn observation_union_preserves_first_seen_order() {
        let mut existing = vec!["a".to_string(), "b".to_string()];
        let added = union_observations(
            &mut existing,
            vec!["b".to_string(), "c".to_string(), "a".to_string()],
        );
        assert_eq!(existing, vec!["a", "b", "c"]);
        assert_eq!(added, vec!["c"]);
    }

    #[test]
    fn name_validation_rejects_control_characters() {
        assert!(validate_name("Alice", "Entity name").is_ok());
        assert!(validate_name("Alice\0Bob", "Entity name").is_err());
        assert!(validate_name("", "Entity name").is_err());
        assert!(validate_name(&"A".repeat(257), "Entity name").is_err());
    }

    #[test]
    fn type_validation_rejects_spaces() {
        assert!(validate_type("work-relation:knows_v1.0", "Relation type").is_ok());
        assert!(validate_type("per son", "Entity type").is_err());
    }
}
