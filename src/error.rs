use thiserror::Error;

/// Main error type for Metaview
#[derive(Error, Debug)]
pub enum MetaviewError {
    /// Record is missing its identifier or type name, or its payload is unreadable
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    /// Element vanished or never existed
    #[error("Element not found: {0}")]
    NotFound(String),

    /// Relationship references an endpoint that cannot be resolved
    #[error("Relationship integrity error on {relationship_guid}: {reason}")]
    RelationshipIntegrity {
        relationship_guid: String,
        reason: String,
    },

    /// Transient failure reported by the repository collaborator
    #[error("Repository error: {0}")]
    Repository(String),

    /// A single fetch took longer than the configured timeout
    #[error("Fetch for {guid} timed out after {timeout_ms}ms")]
    Timeout { guid: String, timeout_ms: u64 },

    /// Invalid input (bad depth, unknown policy, empty filter)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Fixture parse errors
    #[error("Parse error: {0}")]
    Parse(String),

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MetaviewError {
    pub(crate) fn integrity(relationship_guid: &str, reason: impl Into<String>) -> Self {
        MetaviewError::RelationshipIntegrity {
            relationship_guid: relationship_guid.to_string(),
            reason: reason.into(),
        }
    }
}

/// Convenient Result type using MetaviewError
pub type Result<T> = std::result::Result<T, MetaviewError>;
