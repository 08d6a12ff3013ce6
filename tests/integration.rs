use std::collections::HashMap;

use graph_memory_mcp_rs::batch::BatchOperation;
use graph_memory_mcp_rs::graph::{EntityInput, RelationInput, RelationKey};
use graph_memory_mcp_rs::manager::KnowledgeGraphManager;
use graph_memory_mcp_rs::merge::MergeStrategy;
use graph_memory_mcp_rs::temporal::{EventAction, TemporalQuery};
use serde_json::json;
use tempfile::TempDir;

const WS: &str = "default";

/// Helper to create a manager over a temp SQLite database
fn sqlite_manager() -> (TempDir, KnowledgeGraphManager) {
    let dir = TempDir::new().unwrap();
    let manager = KnowledgeGraphManager::with_sqlite_store(&dir.path().join("test.db")).unwrap();
    (dir, manager)
}

/// Helper to create a manager over a temp file-store directory
fn file_manager() -> (TempDir, KnowledgeGraphManager) {
    let dir = TempDir::new().unwrap();
    let manager = KnowledgeGraphManager::with_file_store(dir.path().join("graphs")).unwrap();
    (dir, manager)
}

fn entity(name: &str, entity_type: &str, observations: &[&str]) -> EntityInput {
    EntityInput {
        name: name.to_string(),
        entity_type: entity_type.to_string(),
        observations: observations.iter().map(|s| s.to_string()).collect(),
    }
}

fn relation(from: &str, to: &str, relation_type: &str) -> RelationInput {
    RelationInput {
        from: from.to_string(),
        to: to.to_string(),
        relation_type: relation_type.to_string(),
        strength: None,
    }
}

fn key(from: &str, to: &str, relation_type: &str) -> RelationKey {
    RelationKey {
        from: from.to_string(),
        to: to.to_string(),
        relation_type: relation_type.to_string(),
    }
}

#[tokio::test]
async fn test_create_and_read_entities() {
    let (_dir, manager) = sqlite_manager();

    let touched = manager
        .create_entities(
            WS,
            vec![entity("Alice", "person", &["Works at Acme Corp"])],
            Some("user-1"),
        )
        .await
        .unwrap();
    assert_eq!(touched.len(), 1);
    assert_eq!(touched[0].created_at, touched[0].updated_at);
    assert_eq!(touched[0].created_by.as_deref(), Some("user-1"));

    let graph = manager.read_graph(WS).await.unwrap();
    assert_eq!(graph.entities.len(), 1);
    assert_eq!(graph.entities[0].name, "Alice");
    assert_eq!(graph.entities[0].entity_type, "person");
    assert_eq!(graph.entities[0].observations.len(), 1);
}

#[tokio::test]
async fn test_recreate_merges_observations() {
    let (_dir, manager) = sqlite_manager();

    manager
        .create_entities(WS, vec![entity("Alice", "Person", &["engineer"])], None)
        .await
        .unwrap();
    let touched = manager
        .create_entities(
            WS,
            vec![entity("Alice", "Person", &["engineer", "likes coffee"])],
            None,
        )
        .await
        .unwrap();

    // Still one entity; observations accumulate as a deduplicated union.
    assert_eq!(touched.len(), 1);
    let graph = manager.read_graph(WS).await.unwrap();
    assert_eq!(graph.entities.len(), 1);
    assert_eq!(graph.entities[0].observations, vec!["engineer", "likes coffee"]);
}

#[tokio::test]
async fn test_relation_identity_is_the_full_triple() {
    let (_dir, manager) = sqlite_manager();

    let created = manager
        .create_relations(
            WS,
            vec![relation("A", "B", "knows"), relation("A", "B", "works_with")],
            None,
        )
        .await
        .unwrap();
    assert_eq!(created.len(), 2);

    // Same triple again: silently dropped, nothing updated.
    let created = manager
        .create_relations(WS, vec![relation("A", "B", "knows")], None)
        .await
        .unwrap();
    assert!(created.is_empty());

    let graph = manager.read_graph(WS).await.unwrap();
    assert_eq!(graph.relations.len(), 2);
}

#[tokio::test]
async fn test_relations_do_not_require_entities() {
    let (_dir, manager) = sqlite_manager();

    // Endpoints are not referentially enforced at write time.
    let created = manager
        .create_relations(WS, vec![relation("Ghost", "Phantom", "haunts")], None)
        .await
        .unwrap();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].strength, 0.8);
}

#[tokio::test]
async fn test_cascade_delete() {
    let (_dir, manager) = sqlite_manager();

    manager
        .create_entities(
            WS,
            vec![
                entity("Alice", "person", &[]),
                entity("Bob", "person", &[]),
                entity("Carol", "person", &[]),
            ],
            None,
        )
        .await
        .unwrap();
    manager
        .create_relations(
            WS,
            vec![
                relation("Alice", "Bob", "knows"),
                relation("Carol", "Alice", "knows"),
                relation("Bob", "Carol", "knows"),
            ],
            None,
        )
        .await
        .unwrap();

    let count = manager
        .delete_entities(WS, vec!["Alice".to_string()])
        .await
        .unwrap();
    assert_eq!(count, 1);

    let graph = manager.read_graph(WS).await.unwrap();
    assert_eq!(graph.entities.len(), 2);
    // Only the relation not touching Alice survives.
    assert_eq!(graph.relations.len(), 1);
    assert!(graph.has_relation("Bob", "Carol", "knows"));
}

#[tokio::test]
async fn test_delete_missing_entities_is_best_effort() {
    let (_dir, manager) = sqlite_manager();

    manager
        .create_entities(WS, vec![entity("Alice", "person", &[])], None)
        .await
        .unwrap();

    let count = manager
        .delete_entities(WS, vec!["Ghost".to_string(), "Alice".to_string()])
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_add_observation() {
    let (_dir, manager) = sqlite_manager();

    manager
        .create_entities(WS, vec![entity("Alice", "person", &["Works at Acme"])], None)
        .await
        .unwrap();

    manager
        .add_observation(WS, "Alice", "Lives in Paris".to_string(), None)
        .await
        .unwrap();
    // Exact duplicates are skipped.
    manager
        .add_observation(WS, "Alice", "Lives in Paris".to_string(), None)
        .await
        .unwrap();

    let graph = manager.read_graph(WS).await.unwrap();
    assert_eq!(graph.entities[0].observations, vec!["Works at Acme", "Lives in Paris"]);
}

#[tokio::test]
async fn test_add_observation_requires_entity() {
    let (_dir, manager) = sqlite_manager();

    let result = manager
        .add_observation(WS, "NonExistent", "test".to_string(), None)
        .await;

    assert!(result.is_err());
    let err_msg = result.unwrap_err().to_string();
    assert!(err_msg.contains("NonExistent"));
    assert!(err_msg.contains("does not exist"));
}

#[tokio::test]
async fn test_update_entity_merges_metadata() {
    let (_dir, manager) = sqlite_manager();

    manager
        .create_entities(WS, vec![entity("Alice", "person", &["a"])], None)
        .await
        .unwrap();

    let mut metadata = HashMap::new();
    metadata.insert("team".to_string(), json!("storage"));
    let updated = manager
        .update_entity(WS, "Alice", vec!["b".to_string()], Some("u1"), Some(metadata))
        .await
        .unwrap();

    assert_eq!(updated.observations, vec!["a", "b"]);
    assert_eq!(updated.metadata["team"], json!("storage"));
    // createdBy was unset, so it gets back-filled.
    assert_eq!(updated.created_by.as_deref(), Some("u1"));

    let graph = manager.read_graph(WS).await.unwrap();
    assert_eq!(graph.entities[0].metadata["team"], json!("storage"));
}

#[tokio::test]
async fn test_delete_relations() {
    let (_dir, manager) = sqlite_manager();

    manager
        .create_relations(
            WS,
            vec![relation("Alice", "Bob", "knows"), relation("Alice", "Bob", "likes")],
            None,
        )
        .await
        .unwrap();

    let count = manager
        .delete_relations(
            WS,
            vec![key("Alice", "Bob", "knows"), key("Alice", "Bob", "missing")],
        )
        .await
        .unwrap();
    assert_eq!(count, 1);

    let graph = manager.read_graph(WS).await.unwrap();
    assert_eq!(graph.relations.len(), 1);
    assert_eq!(graph.relations[0].relation_type, "likes");
}

#[tokio::test]
async fn test_search_nodes_free_text() {
    let (_dir, manager) = sqlite_manager();

    manager
        .create_entities(
            WS,
            vec![
                entity("Alice", "person", &["Lives in Paris"]),
                entity("Bob", "person", &["Lives in London"]),
            ],
            None,
        )
        .await
        .unwrap();
    manager
        .create_relations(WS, vec![relation("Alice", "Bob", "knows")], None)
        .await
        .unwrap();

    // Search by observation
    let result = manager.search_nodes(WS, Some("paris".to_string())).await.unwrap();
    assert_eq!(result.entities.len(), 1);
    assert_eq!(result.entities[0].name, "Alice");
    // Bob didn't match, so the connecting relation is not part of the subgraph.
    assert!(result.relations.is_empty());

    // Search by type
    let result = manager.search_nodes(WS, Some("person".to_string())).await.unwrap();
    assert_eq!(result.entities.len(), 2);
    assert_eq!(result.relations.len(), 1);

    // Search all
    let result = manager.search_nodes(WS, None).await.unwrap();
    assert_eq!(result.entities.len(), 2);
}

#[tokio::test]
async fn test_search_entities_field_query() {
    let (_dir, manager) = sqlite_manager();

    manager
        .create_entities(
            WS,
            vec![
                entity("Alice", "person", &[]),
                entity("Acme Corp", "organization", &[]),
            ],
            None,
        )
        .await
        .unwrap();

    let result = manager
        .search_entities(WS, Some("ac".to_string()), None)
        .await
        .unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].name, "Acme Corp");

    let result = manager
        .search_entities(WS, None, Some("PERSON".to_string()))
        .await
        .unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].name, "Alice");

    let result = manager.search_entities(WS, None, None).await.unwrap();
    assert_eq!(result.len(), 2);
}

#[tokio::test]
async fn test_search_relations() {
    let (_dir, manager) = sqlite_manager();

    manager
        .create_relations(
            WS,
            vec![relation("Alice", "Acme", "works_at"), relation("Bob", "Alice", "knows")],
            Some("user-7"),
        )
        .await
        .unwrap();

    let result = manager
        .search_relations(WS, Some("alice".to_string()), None, None)
        .await
        .unwrap();
    assert_eq!(result.len(), 1);

    let result = manager
        .search_relations(WS, None, None, Some("works".to_string()))
        .await
        .unwrap();
    assert_eq!(result.len(), 1);

    let by_user = manager
        .search_relations_by_user(WS, "user-7", Some("knows".to_string()))
        .await
        .unwrap();
    assert_eq!(by_user.len(), 1);
    assert_eq!(by_user[0].relation_type, "knows");
}

#[tokio::test]
async fn test_open_nodes() {
    let (_dir, manager) = sqlite_manager();

    manager
        .create_entities(
            WS,
            vec![
                entity("Alice", "person", &[]),
                entity("Bob", "person", &[]),
                entity("Charlie", "person", &[]),
            ],
            None,
        )
        .await
        .unwrap();
    manager
        .create_relations(
            WS,
            vec![relation("Alice", "Charlie", "knows"), relation("Alice", "Bob", "knows")],
            None,
        )
        .await
        .unwrap();

    let result = manager
        .open_nodes(WS, vec!["Alice".to_string(), "Charlie".to_string()])
        .await
        .unwrap();

    assert_eq!(result.entities.len(), 2);
    let names: Vec<_> = result.entities.iter().map(|e| e.name.as_str()).collect();
    assert!(names.contains(&"Alice"));
    assert!(names.contains(&"Charlie"));
    // Only the relation between the opened nodes comes back.
    assert_eq!(result.relations.len(), 1);
    assert_eq!(result.relations[0].to, "Charlie");
}

#[tokio::test]
async fn test_update_relation_strength_clamps() {
    let (_dir, manager) = sqlite_manager();

    manager
        .create_relations(WS, vec![relation("A", "B", "knows")], None)
        .await
        .unwrap();

    let updated = manager
        .update_relation_strength(WS, "A", "B", "knows", 7.5)
        .await
        .unwrap();
    assert_eq!(updated.strength, 1.0);

    let missing = manager
        .update_relation_strength(WS, "A", "B", "likes", 0.5)
        .await;
    assert!(missing.is_err());
}

#[tokio::test]
async fn test_merge_removes_self_loops() {
    let (_dir, manager) = sqlite_manager();

    manager
        .create_entities(
            WS,
            vec![entity("A", "person", &["a1"]), entity("B", "person", &["b1"])],
            None,
        )
        .await
        .unwrap();
    manager
        .create_relations(WS, vec![relation("A", "B", "knows")], None)
        .await
        .unwrap();

    let merged = manager
        .merge_entities(WS, "A", vec!["B".to_string()], MergeStrategy::Combine)
        .await
        .unwrap();

    assert_eq!(merged.observations, vec!["a1", "b1"]);

    let graph = manager.read_graph(WS).await.unwrap();
    assert_eq!(graph.entities.len(), 1);
    // (A, B, knows) became (A, A, knows) and was dropped.
    assert!(graph.relations.is_empty());
}

#[tokio::test]
async fn test_merge_missing_source_changes_nothing() {
    let (_dir, manager) = sqlite_manager();

    manager
        .create_entities(WS, vec![entity("A", "person", &[])], None)
        .await
        .unwrap();

    let result = manager
        .merge_entities(WS, "A", vec!["Ghost".to_string()], MergeStrategy::Combine)
        .await;
    assert!(result.is_err());

    let graph = manager.read_graph(WS).await.unwrap();
    assert_eq!(graph.entities.len(), 1);
}

#[tokio::test]
async fn test_detect_duplicates_via_manager() {
    let (_dir, manager) = sqlite_manager();

    manager
        .create_entities(
            WS,
            vec![
                entity("John Smith", "person", &["works at acme"]),
                entity("Jon Smith", "person", &["works at acme"]),
                entity("Acme", "organization", &[]),
            ],
            None,
        )
        .await
        .unwrap();

    let groups = manager.detect_duplicates(WS, Some(0.8)).await.unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].entities, vec!["John Smith", "Jon Smith"]);
    assert_eq!(groups[0].suggested_merge_target, "John Smith");

    assert!(manager.detect_duplicates(WS, Some(1.5)).await.is_err());
}

#[tokio::test]
async fn test_batch_isolation_persists_survivors() {
    let (_dir, manager) = sqlite_manager();

    let outcome = manager
        .execute_batch(
            WS,
            vec![
                BatchOperation {
                    op_type: "create_entity".to_string(),
                    data: json!({"name": "X", "entityType": "person", "observations": []}),
                    user_id: None,
                },
                BatchOperation {
                    op_type: "delete_entity".to_string(),
                    data: json!({"entityName": "missing"}),
                    user_id: None,
                },
                BatchOperation {
                    op_type: "create_entity".to_string(),
                    data: json!({"name": "Y", "entityType": "person", "observations": []}),
                    user_id: None,
                },
            ],
            None,
        )
        .await
        .unwrap();

    assert_eq!(outcome.successful, 2);
    assert_eq!(outcome.failed, 1);
    assert_eq!(outcome.errors.len(), 1);
    assert!(outcome.results[1].is_none());

    // Both survivors are persisted despite the middle failure.
    let graph = manager.read_graph(WS).await.unwrap();
    assert!(graph.has_entity("X"));
    assert!(graph.has_entity("Y"));
}

#[tokio::test]
async fn test_batch_with_no_successes_saves_nothing() {
    let (_dir, manager) = sqlite_manager();

    manager
        .create_entities(WS, vec![entity("Keep", "person", &[])], None)
        .await
        .unwrap();

    let outcome = manager
        .execute_batch(
            WS,
            vec![BatchOperation {
                op_type: "delete_entity".to_string(),
                data: json!({"entityName": "missing"}),
                user_id: None,
            }],
            None,
        )
        .await
        .unwrap();

    assert_eq!(outcome.successful, 0);
    assert_eq!(outcome.failed, 1);

    let graph = manager.read_graph(WS).await.unwrap();
    assert_eq!(graph.entities.len(), 1);
}

#[tokio::test]
async fn test_temporal_classification() {
    let (_dir, manager) = sqlite_manager();

    manager
        .create_entities(WS, vec![entity("Alice", "person", &["a"])], Some("u1"))
        .await
        .unwrap();

    let events = manager
        .get_temporal_events(WS, TemporalQuery::default())
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action_type, EventAction::Created);

    // An update moves the classification to 'updated'.
    manager
        .add_observation(WS, "Alice", "b".to_string(), None)
        .await
        .unwrap();

    let events = manager
        .get_temporal_events(WS, TemporalQuery::default())
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action_type, EventAction::Updated);

    let filtered = manager
        .get_temporal_events(
            WS,
            TemporalQuery {
                user_id: Some("u1".to_string()),
                ..TemporalQuery::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(filtered.len(), 1);

    let none = manager
        .get_temporal_events(
            WS,
            TemporalQuery {
                user_id: Some("someone-else".to_string()),
                ..TemporalQuery::default()
            },
        )
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn test_workspaces_are_isolated() {
    let (_dir, manager) = sqlite_manager();

    manager
        .create_entities("team-a", vec![entity("Alice", "person", &[])], None)
        .await
        .unwrap();
    manager
        .create_entities("team-b", vec![entity("Bob", "person", &[])], None)
        .await
        .unwrap();

    let a = manager.read_graph("team-a").await.unwrap();
    let b = manager.read_graph("team-b").await.unwrap();
    assert_eq!(a.entities.len(), 1);
    assert_eq!(a.entities[0].name, "Alice");
    assert_eq!(b.entities.len(), 1);
    assert_eq!(b.entities[0].name, "Bob");
}

#[tokio::test]
async fn test_file_store_persistence_across_reopen() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("graphs");

    {
        let manager = KnowledgeGraphManager::with_file_store(root.clone()).unwrap();
        manager
            .create_entities(WS, vec![entity("Alice", "person", &["Test"])], None)
            .await
            .unwrap();
    }

    {
        let manager = KnowledgeGraphManager::with_file_store(root).unwrap();
        let graph = manager.read_graph(WS).await.unwrap();
        assert_eq!(graph.entities.len(), 1);
        assert_eq!(graph.entities[0].name, "Alice");
    }
}

#[tokio::test]
async fn test_sqlite_persistence_across_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.db");

    {
        let manager = KnowledgeGraphManager::with_sqlite_store(&path).unwrap();
        manager
            .create_entities(WS, vec![entity("Alice", "person", &["Test"])], None)
            .await
            .unwrap();
        manager
            .create_relations(WS, vec![relation("Alice", "Acme", "works_at")], None)
            .await
            .unwrap();
    }

    {
        let manager = KnowledgeGraphManager::with_sqlite_store(&path).unwrap();
        let graph = manager.read_graph(WS).await.unwrap();
        assert_eq!(graph.entities.len(), 1);
        assert_eq!(graph.relations.len(), 1);
    }
}

#[tokio::test]
async fn test_file_manager_full_cycle() {
    let (_dir, manager) = file_manager();

    manager
        .create_entities(
            WS,
            vec![entity("Alice", "person", &[]), entity("Bob", "person", &[])],
            None,
        )
        .await
        .unwrap();
    manager
        .create_relations(WS, vec![relation("Alice", "Bob", "knows")], None)
        .await
        .unwrap();
    manager.delete_entities(WS, vec!["Alice".to_string()]).await.unwrap();

    let graph = manager.read_graph(WS).await.unwrap();
    assert_eq!(graph.entities.len(), 1);
    assert!(graph.relations.is_empty());
}

// ============================================================================
// VALIDATION TESTS
// ============================================================================

#[tokio::test]
async fn test_validation_empty_entity_name() {
    let (_dir, manager) = sqlite_manager();

    let result = manager
        .create_entities(WS, vec![entity("", "person", &[])], None)
        .await;

    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("cannot be empty"));
}

#[tokio::test]
async fn test_validation_entity_name_too_long() {
    let (_dir, manager) = sqlite_manager();

    let long_name = "A".repeat(257);
    let result = manager
        .create_entities(WS, vec![entity(&long_name, "person", &[])], None)
        .await;

    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("too long"));
}

#[tokio::test]
async fn test_validation_entity_type_invalid_chars() {
    let (_dir, manager) = sqlite_manager();

    let result = manager
        .create_entities(WS, vec![entity("Alice", "per son", &[])], None)
        .await;

    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("invalid characters"));
}

#[tokio::test]
async fn test_validation_observation_too_long() {
    let (_dir, manager) = sqlite_manager();

    let long_obs = "A".repeat(4097);
    let result = manager
        .create_entities(WS, vec![entity("Alice", "person", &[&long_obs])], None)
        .await;

    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("too long"));
}

#[tokio::test]
async fn test_validation_relation_type_valid() {
    let (_dir, manager) = sqlite_manager();

    let result = manager
        .create_relations(
            WS,
            vec![relation("Alice", "Bob", "work-relation:knows_v1.0")],
            None,
        )
        .await;

    assert!(result.is_ok());
}

#[tokio::test]
async fn test_validation_bad_workspace_id() {
    let (_dir, manager) = sqlite_manager();

    let result = manager
        .create_entities("../escape", vec![entity("Alice", "person", &[])], None)
        .await;

    assert!(result.is_err());
}
