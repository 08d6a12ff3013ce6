use thiserror::Error;

/// Failure taxonomy for graph engine operations.
///
/// Duplicate creates are not represented here: they are documented filtering
/// behavior (the duplicate is silently dropped from the "created" result),
/// not a failure.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Malformed input shape or value
    #[error("validation failed: {0}")]
    Validation(String),

    /// Operation target does not exist
    #[error("{kind} '{name}' does not exist")]
    NotFound { kind: &'static str, name: String },

    /// Propagated verbatim from the persistence backend; never retried here
    #[error(transparent)]
    Persistence(#[from] StoreError),
}

impl GraphError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn entity_not_found(name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "entity",
            name: name.into(),
        }
    }

    pub fn relation_not_found(from: &str, to: &str, relation_type: &str) -> Self {
        Self::NotFound {
            kind: "relation",
            name: format!("{from} -> {to} ({relation_type})"),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Errors raised by `GraphStore` backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid workspace id: {0}")]
    InvalidWorkspace(String),

    #[error("invalid store path: {0}")]
    InvalidPath(String),

    #[error("stored document is corrupted: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Pool(#[from] r2d2::Error),
}
