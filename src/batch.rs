//! Batch executor: heterogeneous mutations with per-item isolation.
//!
//! Operations run sequentially against a working copy of the graph. A failed
//! item is recorded and skipped; it never rolls back earlier items or aborts
//! the rest of the batch. Callers persist the working copy once, and only if
//! at least one item succeeded.

use std::collections::HashMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::entities;
use crate::error::GraphError;
use crate::graph::{EntityInput, GraphDocument, RelationInput};
use crate::relations;

/// One mutation in a batch. `data` is the operation-specific payload, parsed
/// per `type`; a payload that does not parse is a per-item failure.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct BatchOperation {
    /// One of: create_entity, create_relation, update_entity, delete_entity
    #[serde(rename = "type")]
    pub op_type: String,
    pub data: Value,
    #[serde(rename = "userId", default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct UpdateEntityData {
    #[serde(rename = "entityName")]
    entity_name: String,
    #[serde(default)]
    observations: Vec<String>,
    #[serde(default)]
    metadata: Option<HashMap<String, Value>>,
}

#[derive(Debug, Clone, Deserialize)]
struct DeleteEntityData {
    #[serde(rename = "entityName")]
    entity_name: String,
}

/// Per-batch report: counts, error strings tagged with the failing operation
/// type, and one result entry per input operation (`null` for failures).
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct BatchOutcome {
    pub successful: usize,
    pub failed: usize,
    pub errors: Vec<String>,
    pub results: Vec<Option<Value>>,
}

/// Apply `operations` to a working copy of `graph`.
///
/// Returns the working copy and the outcome report. The input document is
/// never touched; persisting the working copy (when `successful >= 1`) is the
/// caller's decision.
pub fn execute_batch(
    graph: &GraphDocument,
    operations: Vec<BatchOperation>,
    default_user: Option<&str>,
) -> (GraphDocument, BatchOutcome) {
    let mut working = graph.clone();
    let mut outcome = BatchOutcome {
        successful: 0,
        failed: 0,
        errors: Vec::new(),
        results: Vec::new(),
    };

    for op in operations {
        let user = op.user_id.as_deref().or(default_user);
        match apply(&mut working, &op.op_type, op.data, user) {
            Ok(result) => {
                outcome.successful += 1;
                outcome.results.push(Some(result));
            }
            Err(err) => {
                outcome.failed += 1;
                outcome.errors.push(format!("{}: {}", op.op_type, err));
                outcome.results.push(None);
            }
        }
    }

    (working, outcome)
}

fn apply(
    working: &mut GraphDocument,
    op_type: &str,
    data: Value,
    user: Option<&str>,
) -> Result<Value, GraphError> {
    match op_type {
        "create_entity" => {
            let input: EntityInput = parse(data)?;
            let touched = entities::create_entities(working, vec![input], user)?;
            Ok(json!(touched.into_iter().next()))
        }
        "create_relation" => {
            let input: RelationInput = parse(data)?;
            let created = relations::create_relations(working, vec![input], user)?;
            // Empty when the triple already existed; still a success.
            Ok(json!(created))
        }
        "update_entity" => {
            let input: UpdateEntityData = parse(data)?;
            let updated = entities::update_entity(
                working,
                &input.entity_name,
                input.observations,
                user,
                input.metadata,
            )?;
            Ok(json!(updated))
        }
        "delete_entity" => {
            let input: DeleteEntityData = parse(data)?;
            let cascade = entities::delete_entity(working, &input.entity_name)?;
            Ok(json!({
                "deleted": cascade.name,
                "relationsRemoved": cascade.removed_relations.len(),
            }))
        }
        other => Err(GraphError::validation(format!(
            "unknown operation type '{other}'"
        ))),
    }
}

fn parse<T: serde::de::DeserializeOwned>(data: Value) -> Result<T, GraphError> {
    serde_json::from_value(data).map_err(|e| GraphError::validation(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(op_type: &str, data: Value) -> BatchOperation {
        BatchOperation {
            op_type: op_type.to_string(),
            data,
            user_id: None,
        }
    }

    fn create_entity_op(name: &str) -> BatchOperation {
        op(
            "create_entity",
            json!({"name": name, "entityType": "Person", "observations": []}),
        )
    }

    #[test]
    fn failures_do_not_abort_or_roll_back() {
        let graph = GraphDocument::default();
        let (working, outcome) = execute_batch(
            &graph,
            vec![
                create_entity_op("X"),
                op("delete_entity", json!({"entityName": "missing"})),
                create_entity_op("Y"),
            ],
            None,
        );

        assert_eq!(outcome.successful, 2);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].starts_with("delete_entity:"));
        assert_eq!(outcome.results.len(), 3);
        assert!(outcome.results[0].is_some());
        assert!(outcome.results[1].is_none());
        assert!(outcome.results[2].is_some());

        assert!(working.has_entity("X"));
        assert!(working.has_entity("Y"));
        // The original document is untouched.
        assert!(graph.entities.is_empty());
    }

    #[test]
    fn later_operations_see_earlier_mutations() {
        let graph = GraphDocument::default();
        let (working, outcome) = execute_batch(
            &graph,
            vec![
                create_entity_op("A"),
                op(
                    "update_entity",
                    json!({"entityName": "A", "observations": ["fresh"]}),
                ),
                op(
                    "create_relation",
                    json!({"from": "A", "to": "B", "relationType": "knows"}),
                ),
            ],
            None,
        );

        assert_eq!(outcome.successful, 3);
        assert_eq!(working.entity("A").unwrap().observations, vec!["fresh"]);
        assert!(working.has_relation("A", "B", "knows"));
    }

    #[test]
    fn malformed_payload_and_unknown_type_fail_per_item() {
        let graph = GraphDocument::default();
        let (_, outcome) = execute_batch(
            &graph,
            vec![
                op("create_entity", json!({"entityType": "Person"})),
                op("bulk_explode", json!({})),
                create_entity_op("Z"),
            ],
            None,
        );

        assert_eq!(outcome.successful, 1);
        assert_eq!(outcome.failed, 2);
        assert!(outcome.errors[0].starts_with("create_entity:"));
        assert!(outcome.errors[1].starts_with("bulk_explode:"));
    }

    #[test]
    fn per_operation_user_overrides_batch_default() {
        let graph = GraphDocument::default();
        let (working, _) = execute_batch(
            &graph,
            vec![
                BatchOperation {
                    user_id: Some("override".to_string()),
                    ..create_entity_op("A")
                },
                create_entity_op("B"),
            ],
            Some("batch-user"),
        );

        assert_eq!(working.entity("A").unwrap().created_by.as_deref(), Some("override"));
        assert_eq!(
            working.entity("B").unwrap().created_by.as_deref(),
            Some("batch-user")
        );
    }

    #[test]
    fn duplicate_relation_create_counts_as_success() {
        let mut graph = GraphDocument::default();
        crate::relations::create_relations(
            &mut graph,
            vec![RelationInput {
                from: "A".to_string(),
                to: "B".to_string(),
                relation_type: "knows".to_string(),
                strength: None,
            }],
            None,
        )
        .unwrap();

        let (_, outcome) = execute_batch(
            &graph,
            vec![op(
                "create_relation",
                json!({"from": "A", "to": "B", "relationType": "knows"}),
            )],
            None,
        );

        assert_eq!(outcome.successful, 1);
        assert_eq!(outcome.results[0], Some(json!([])));
    }
}
