//! Error taxonomy for a sourcing run.
//!
//! Only failures that abort the whole run live here. Per-attachment failures
//! are logged by the media resolver and never surface as a `SourceError`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SourceError>;

#[derive(Debug, Error)]
pub enum SourceError {
    /// Inconsistent entity declaration, detected before any query runs.
    #[error("invalid configuration for `{entity}`: {reason}")]
    Config { entity: String, reason: String },

    /// The batch query collaborator failed.
    #[error("query for `{entity}` failed: {source}")]
    Query {
        entity: String,
        #[source]
        source: anyhow::Error,
    },

    /// A row has no usable natural key.
    #[error("row {row} of `{entity}` has no value in id field `{field}`")]
    MissingIdField {
        entity: String,
        field: String,
        row: usize,
    },

    /// A computed link field would overwrite a raw column.
    #[error("link field `{field}` on `{entity}` collides with a column of the same name")]
    FieldCollision { entity: String, field: String },

    /// The node store rejected a node or a parent-child link.
    #[error("failed to register node {id}: {source}")]
    Registration {
        id: String,
        #[source]
        source: anyhow::Error,
    },
}

impl SourceError {
    pub fn config(entity: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            entity: entity.into(),
            reason: reason.into(),
        }
    }
}
