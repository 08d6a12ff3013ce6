//! Persistence backends for workspace graph documents.
//!
//! The engine only ever loads a whole document, mutates it in memory, and
//! saves the whole document back. Backends implement that contract; the
//! optional record-deletion hooks exist for backends that index entities and
//! relations as individual records, so replacement saves after delete/merge
//! operations do not leave orphans behind.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use serde_json::Value;

use crate::error::StoreError;
use crate::graph::{Entity, GraphDocument, Relation};

const MAX_WORKSPACE_LENGTH: usize = 128;

/// Storage contract: whole-document load and save, per workspace.
///
/// `load_graph` returns an empty document (not an error) when nothing has
/// been stored for the workspace yet.
pub trait GraphStore: Send + Sync {
    fn load_graph(&self, workspace: &str) -> Result<GraphDocument, StoreError>;

    fn save_graph(&self, workspace: &str, graph: &GraphDocument) -> Result<(), StoreError>;

    /// Drop a single entity record. No-op for whole-document backends.
    fn delete_entity_record(&self, _workspace: &str, _name: &str) -> Result<(), StoreError> {
        Ok(())
    }

    /// Drop a single relation record. No-op for whole-document backends.
    fn delete_relation_record(
        &self,
        _workspace: &str,
        _from: &str,
        _to: &str,
        _relation_type: &str,
    ) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Validate a workspace id before it reaches a filename or a SQL key.
fn validate_workspace(workspace: &str) -> Result<(), StoreError> {
    if workspace.is_empty() {
        return Err(StoreError::InvalidWorkspace("cannot be empty".to_string()));
    }
    if workspace.len() > MAX_WORKSPACE_LENGTH {
        return Err(StoreError::InvalidWorkspace(format!(
            "too long (max {MAX_WORKSPACE_LENGTH} chars)"
        )));
    }
    if !workspace
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(StoreError::InvalidWorkspace(format!(
            "'{workspace}' contains invalid characters (only alphanumeric, -, _, . allowed)"
        )));
    }
    // `.` is fine inside a workspace id but `..` is a path.
    if workspace == "." || workspace == ".." {
        return Err(StoreError::InvalidWorkspace(format!(
            "'{workspace}' is not a valid workspace id"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// File backend: one JSON document per workspace
// ---------------------------------------------------------------------------

pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn workspace_path(&self, workspace: &str) -> Result<PathBuf, StoreError> {
        validate_workspace(workspace)?;
        Ok(self.root.join(format!("{workspace}.json")))
    }
}

impl GraphStore for FileStore {
    fn load_graph(&self, workspace: &str) -> Result<GraphDocument, StoreError> {
        let path = self.workspace_path(workspace)?;
        if !path.exists() {
            return Ok(GraphDocument::default());
        }
        let data = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&data)?)
    }

    fn save_graph(&self, workspace: &str, graph: &GraphDocument) -> Result<(), StoreError> {
        let path = self.workspace_path(workspace)?;
        let data = serde_json::to_vec_pretty(graph)?;
        // Write-then-rename so a crash mid-save never truncates the document.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SQLite backend: tabular store, one row per entity/relation
// ---------------------------------------------------------------------------

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS entities (
    workspace TEXT NOT NULL,
    name TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    observations TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    created_by TEXT,
    metadata TEXT,
    PRIMARY KEY (workspace, name)
) STRICT;

-- No FOREIGN KEY on relations: endpoints may name entities that do not
-- exist yet, and referential checks belong to the caller.
CREATE TABLE IF NOT EXISTS relations (
    workspace TEXT NOT NULL,
    from_entity TEXT NOT NULL,
    to_entity TEXT NOT NULL,
    relation_type TEXT NOT NULL,
    strength REAL NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    created_by TEXT,
    metadata TEXT,
    PRIMARY KEY (workspace, from_entity, to_entity, relation_type)
) STRICT;

CREATE INDEX IF NOT EXISTS idx_entities_workspace ON entities(workspace);
CREATE INDEX IF NOT EXISTS idx_relations_workspace ON relations(workspace);
CREATE INDEX IF NOT EXISTS idx_relations_workspace_type ON relations(workspace, relation_type);
"#;

pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStore {
    /// Open or create the database with a connection pool.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        validate_db_path(path)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder().max_size(15).build(manager)?;

        {
            let conn = pool.get()?;
            // WAL mode for concurrent reads
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
            conn.execute_batch(SCHEMA)?;
        }

        Ok(Self { pool })
    }
}

/// Validate database file path
fn validate_db_path(path: &Path) -> Result<(), StoreError> {
    match path.extension() {
        Some(ext) if ext == "db" => Ok(()),
        _ => Err(StoreError::InvalidPath(
            "database path must have .db extension".to_string(),
        )),
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp '{raw}': {e}")))
}

fn parse_metadata(raw: Option<String>) -> Result<HashMap<String, Value>, StoreError> {
    match raw {
        None => Ok(HashMap::new()),
        Some(raw) => serde_json::from_str(&raw)
            .map_err(|e| StoreError::Corrupt(format!("bad metadata: {e}"))),
    }
}

fn metadata_json(metadata: &HashMap<String, Value>) -> Result<Option<String>, StoreError> {
    if metadata.is_empty() {
        Ok(None)
    } else {
        Ok(Some(serde_json::to_string(metadata)?))
    }
}

impl GraphStore for SqliteStore {
    fn load_graph(&self, workspace: &str) -> Result<GraphDocument, StoreError> {
        validate_workspace(workspace)?;
        let conn = self.pool.get()?;

        let mut entities = Vec::new();
        {
            // rowid order preserves insertion order across save/load cycles
            let mut stmt = conn.prepare(
                "SELECT name, entity_type, observations, created_at, updated_at, created_by, metadata
                 FROM entities WHERE workspace = ?1 ORDER BY rowid",
            )?;
            let rows = stmt.query_map(params![workspace], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                ))
            })?;

            for row in rows {
                let (name, entity_type, obs_json, created_at, updated_at, created_by, metadata) =
                    row?;
                let observations: Vec<String> = serde_json::from_str(&obs_json)
                    .map_err(|e| StoreError::Corrupt(format!("bad observations: {e}")))?;
                entities.push(Entity {
                    name,
                    entity_type,
                    observations,
                    created_at: parse_timestamp(&created_at)?,
                    updated_at: parse_timestamp(&updated_at)?,
                    created_by,
                    metadata: parse_metadata(metadata)?,
                });
            }
        }

        let mut relations = Vec::new();
        {
            let mut stmt = conn.prepare(
                "SELECT from_entity, to_entity, relation_type, strength, created_at, updated_at, created_by, metadata
                 FROM relations WHERE workspace = ?1 ORDER BY rowid",
            )?;
            let rows = stmt.query_map(params![workspace], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, Option<String>>(7)?,
                ))
            })?;

            for row in rows {
                let (from, to, relation_type, strength, created_at, updated_at, created_by, metadata) =
                    row?;
                relations.push(Relation {
                    from,
                    to,
                    relation_type,
                    strength,
                    created_at: parse_timestamp(&created_at)?,
                    updated_at: parse_timestamp(&updated_at)?,
                    created_by,
                    metadata: parse_metadata(metadata)?,
                });
            }
        }

        Ok(GraphDocument { entities, relations })
    }

    /// Whole-document overwrite: replace every row for the workspace in one
    /// transaction.
    fn save_graph(&self, workspace: &str, graph: &GraphDocument) -> Result<(), StoreError> {
        validate_workspace(workspace)?;
        let conn = self.pool.get()?;
        let tx = conn.unchecked_transaction()?;

        tx.execute("DELETE FROM entities WHERE workspace = ?1", params![workspace])?;
        tx.execute("DELETE FROM relations WHERE workspace = ?1", params![workspace])?;

        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO entities (workspace, name, entity_type, observations, created_at, updated_at, created_by, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for entity in &graph.entities {
                let obs_json = serde_json::to_string(&entity.observations)?;
                stmt.execute(params![
                    workspace,
                    &entity.name,
                    &entity.entity_type,
                    &obs_json,
                    entity.created_at.to_rfc3339(),
                    entity.updated_at.to_rfc3339(),
                    &entity.created_by,
                    metadata_json(&entity.metadata)?,
                ])?;
            }
        }

        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO relations (workspace, from_entity, to_entity, relation_type, strength, created_at, updated_at, created_by, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for relation in &graph.relations {
                stmt.execute(params![
                    workspace,
                    &relation.from,
                    &relation.to,
                    &relation.relation_type,
                    relation.strength,
                    relation.created_at.to_rfc3339(),
                    relation.updated_at.to_rfc3339(),
                    &relation.created_by,
                    metadata_json(&relation.metadata)?,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn delete_entity_record(&self, workspace: &str, name: &str) -> Result<(), StoreError> {
        validate_workspace(workspace)?;
        let conn = self.pool.get()?;
        conn.execute(
            "DELETE FROM entities WHERE workspace = ?1 AND name = ?2",
            params![workspace, name],
        )?;
        Ok(())
    }

    fn delete_relation_record(
        &self,
        workspace: &str,
        from: &str,
        to: &str,
        relation_type: &str,
    ) -> Result<(), StoreError> {
        validate_workspace(workspace)?;
        let conn = self.pool.get()?;
        conn.execute(
            "DELETE FROM relations
             WHERE workspace = ?1 AND from_entity = ?2 AND to_entity = ?3 AND relation_type = ?4",
            params![workspace, from, to, relation_type],
        )?;
        Ok(())
    }
}
