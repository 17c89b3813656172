//! Error types for the runtime
//!
//! Setup-time failures ([`RegistrationError`]) are meant to abort startup.
//! Per-event failures ([`IngestError`]) reject a single event and leave every
//! query exactly as if the event had never been offered.

use ceplite_core::SchemaViolation;
use thiserror::Error;

use crate::engine::QueryHandle;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("event type '{0}' is already registered with a different schema")]
    DuplicateType(String),

    #[error("unknown event type '{0}'")]
    UnknownType(String),

    #[error("cannot compile query '{query}': {reason}")]
    QueryCompile { query: String, reason: String },

    #[error("unknown query handle {0}")]
    UnknownQuery(QueryHandle),
}

impl RegistrationError {
    pub fn compile(query: impl Into<String>, reason: impl Into<String>) -> Self {
        RegistrationError::QueryCompile {
            query: query.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngestError {
    #[error("unknown event type '{0}'")]
    UnknownType(String),

    #[error("event does not match schema of '{event_type}': {violation}")]
    SchemaMismatch {
        event_type: String,
        violation: SchemaViolation,
    },

    #[error("engine is shutting down")]
    ShuttingDown,
}

pub type RegistrationResult<T> = Result<T, RegistrationError>;
pub type IngestResult<T> = Result<T, IngestError>;
