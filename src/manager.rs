//! Manager for knowledge graph operations.
//!
//! Each call loads the workspace document from the store, runs one pure
//! engine transformation, and writes the document back when it mutated.
//! Concurrent writers to the same workspace race: the later save wins.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;

use crate::batch::{self, BatchOperation, BatchOutcome};
use crate::entities;
use crate::error::GraphError;
use crate::graph::{Entity, EntityInput, GraphDocument, Relation, RelationInput, RelationKey};
use crate::merge::{self, MergeStrategy};
use crate::relations;
use crate::similarity::{self, DuplicateGroup};
use crate::storage::{FileStore, GraphStore, SqliteStore};
use crate::temporal::{self, TemporalEvent, TemporalQuery};

pub struct KnowledgeGraphManager {
    store: Arc<dyn GraphStore>,
}

impl KnowledgeGraphManager {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    /// Manager backed by per-workspace JSON documents under `root`.
    pub fn with_file_store(root: impl Into<PathBuf>) -> Result<Self, GraphError> {
        Ok(Self::new(Arc::new(FileStore::new(root)?)))
    }

    /// Manager backed by the SQLite tabular store at `db_path`.
    pub fn with_sqlite_store(db_path: &Path) -> Result<Self, GraphError> {
        Ok(Self::new(Arc::new(SqliteStore::open(db_path)?)))
    }

    fn load(&self, workspace: &str) -> Result<GraphDocument, GraphError> {
        Ok(self.store.load_graph(workspace)?)
    }

    fn save(&self, workspace: &str, graph: &GraphDocument) -> Result<(), GraphError> {
        Ok(self.store.save_graph(workspace, graph)?)
    }

    /// Create entities, merging into existing ones by name. Returns every
    /// entity touched, in input order.
    pub async fn create_entities(
        &self,
        workspace: &str,
        inputs: Vec<EntityInput>,
        user_id: Option<&str>,
    ) -> Result<Vec<Entity>, GraphError> {
        let mut graph = self.load(workspace)?;
        let touched = entities::create_entities(&mut graph, inputs, user_id)?;
        self.save(workspace, &graph)?;
        Ok(touched)
    }

    /// Create relations. Existing triples are silently dropped; returns only
    /// newly created relations.
    pub async fn create_relations(
        &self,
        workspace: &str,
        inputs: Vec<RelationInput>,
        user_id: Option<&str>,
    ) -> Result<Vec<Relation>, GraphError> {
        let mut graph = self.load(workspace)?;
        let created = relations::create_relations(&mut graph, inputs, user_id)?;
        if !created.is_empty() {
            self.save(workspace, &graph)?;
        }
        Ok(created)
    }

    /// Append one observation to an existing entity.
    pub async fn add_observation(
        &self,
        workspace: &str,
        entity_name: &str,
        observation: String,
        user_id: Option<&str>,
    ) -> Result<Entity, GraphError> {
        let mut graph = self.load(workspace)?;
        let entity = entities::add_observation(&mut graph, entity_name, observation, user_id)?;
        self.save(workspace, &graph)?;
        Ok(entity)
    }

    /// Union observations into an entity and shallow-merge its metadata.
    pub async fn update_entity(
        &self,
        workspace: &str,
        entity_name: &str,
        observations: Vec<String>,
        user_id: Option<&str>,
        metadata: Option<HashMap<String, Value>>,
    ) -> Result<Entity, GraphError> {
        let mut graph = self.load(workspace)?;
        let entity =
            entities::update_entity(&mut graph, entity_name, observations, user_id, metadata)?;
        self.save(workspace, &graph)?;
        Ok(entity)
    }

    /// Delete entities by name, cascading to their relations. Missing names
    /// are skipped; returns the number of entities deleted.
    pub async fn delete_entities(
        &self,
        workspace: &str,
        names: Vec<String>,
    ) -> Result<usize, GraphError> {
        let mut graph = self.load(workspace)?;
        let mut cascades = Vec::new();
        for name in &names {
            match entities::delete_entity(&mut graph, name) {
                Ok(cascade) => cascades.push(cascade),
                Err(err) if err.is_not_found() => continue,
                Err(err) => return Err(err),
            }
        }
        if cascades.is_empty() {
            return Ok(0);
        }
        self.save(workspace, &graph)?;
        // Tell record-indexing backends what vanished from the document.
        for cascade in &cascades {
            self.store.delete_entity_record(workspace, &cascade.name)?;
            for key in &cascade.removed_relations {
                self.store
                    .delete_relation_record(workspace, &key.from, &key.to, &key.relation_type)?;
            }
        }
        Ok(cascades.len())
    }

    /// Delete relations by exact triple, best effort. Returns count removed.
    pub async fn delete_relations(
        &self,
        workspace: &str,
        keys: Vec<RelationKey>,
    ) -> Result<usize, GraphError> {
        let mut graph = self.load(workspace)?;
        let removed = relations::delete_relations(&mut graph, &keys);
        if removed > 0 {
            self.save(workspace, &graph)?;
            for key in &keys {
                self.store
                    .delete_relation_record(workspace, &key.from, &key.to, &key.relation_type)?;
            }
        }
        Ok(removed)
    }

    /// Read the entire workspace document.
    pub async fn read_graph(&self, workspace: &str) -> Result<GraphDocument, GraphError> {
        self.load(workspace)
    }

    /// Free-text search across names, types and observations.
    pub async fn search_nodes(
        &self,
        workspace: &str,
        query: Option<String>,
    ) -> Result<GraphDocument, GraphError> {
        let graph = self.load(workspace)?;
        Ok(entities::search_nodes(&graph, query.as_deref()))
    }

    /// Field query over entity name and type.
    pub async fn search_entities(
        &self,
        workspace: &str,
        name: Option<String>,
        entity_type: Option<String>,
    ) -> Result<Vec<Entity>, GraphError> {
        let graph = self.load(workspace)?;
        Ok(entities::search_entities(
            &graph,
            name.as_deref(),
            entity_type.as_deref(),
        ))
    }

    /// Fetch specific entities plus the relations among them.
    pub async fn open_nodes(
        &self,
        workspace: &str,
        names: Vec<String>,
    ) -> Result<GraphDocument, GraphError> {
        let graph = self.load(workspace)?;
        Ok(entities::open_nodes(&graph, &names))
    }

    /// Field query over relation endpoints and type.
    pub async fn search_relations(
        &self,
        workspace: &str,
        from: Option<String>,
        to: Option<String>,
        relation_type: Option<String>,
    ) -> Result<Vec<Relation>, GraphError> {
        let graph = self.load(workspace)?;
        Ok(relations::search_relations(
            &graph,
            from.as_deref(),
            to.as_deref(),
            relation_type.as_deref(),
        ))
    }

    /// Relations created by a given user.
    pub async fn search_relations_by_user(
        &self,
        workspace: &str,
        user_id: &str,
        relation_type: Option<String>,
    ) -> Result<Vec<Relation>, GraphError> {
        let graph = self.load(workspace)?;
        Ok(relations::search_relations_by_user(
            &graph,
            user_id,
            relation_type.as_deref(),
        ))
    }

    /// Set the strength of an existing relation (clamped to [0, 1]).
    pub async fn update_relation_strength(
        &self,
        workspace: &str,
        from: &str,
        to: &str,
        relation_type: &str,
        strength: f64,
    ) -> Result<Relation, GraphError> {
        let mut graph = self.load(workspace)?;
        let relation =
            relations::update_relation_strength(&mut graph, from, to, relation_type, strength)?;
        self.save(workspace, &graph)?;
        Ok(relation)
    }

    /// Group likely duplicate entities. Offline operation: O(n²) per type.
    pub async fn detect_duplicates(
        &self,
        workspace: &str,
        threshold: Option<f64>,
    ) -> Result<Vec<DuplicateGroup>, GraphError> {
        let graph = self.load(workspace)?;
        similarity::detect_duplicates(&graph, threshold)
    }

    /// Absorb source entities into a target, rewiring relations.
    pub async fn merge_entities(
        &self,
        workspace: &str,
        target: &str,
        sources: Vec<String>,
        strategy: MergeStrategy,
    ) -> Result<Entity, GraphError> {
        let mut graph = self.load(workspace)?;
        let report = merge::merge_entities(&mut graph, target, &sources, strategy)?;
        self.save(workspace, &graph)?;
        for name in &report.removed_entities {
            self.store.delete_entity_record(workspace, name)?;
        }
        for key in &report.removed_relations {
            self.store
                .delete_relation_record(workspace, &key.from, &key.to, &key.relation_type)?;
        }
        Ok(report.merged)
    }

    /// Run a heterogeneous batch with per-item isolation. The working copy is
    /// saved once, and only when at least one operation succeeded.
    pub async fn execute_batch(
        &self,
        workspace: &str,
        operations: Vec<BatchOperation>,
        user_id: Option<&str>,
    ) -> Result<BatchOutcome, GraphError> {
        let graph = self.load(workspace)?;
        let (working, outcome) = batch::execute_batch(&graph, operations, user_id);
        if outcome.successful > 0 {
            self.save(workspace, &working)?;
        }
        Ok(outcome)
    }

    /// Time-windowed retrieval of creations and updates.
    pub async fn get_temporal_events(
        &self,
        workspace: &str,
        query: TemporalQuery,
    ) -> Result<Vec<TemporalEvent>, GraphError> {
        let graph = self.load(workspace)?;
        Ok(temporal::get_temporal_events(&graph, &query))
    }
}
