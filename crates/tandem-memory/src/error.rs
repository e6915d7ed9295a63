//! Error types for the memory, resolution and retrieval layers
//!
//! Absence is not an error: reads of missing or expired data return `Ok(None)`
//! or an empty collection. The variants below cover the cases where a caller
//! referenced state that must exist, supplied bad input, or an upstream
//! collaborator (storage, embeddings) failed.

use std::fmt;
use thiserror::Error;

/// Result alias used throughout the crate
pub type MemoryResult<T> = Result<T, MemoryError>;

/// External collaborator that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upstream {
    /// The embedding provider
    Embedding,
    /// The storage adapter
    Storage,
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Upstream::Embedding => write!(f, "embedding provider"),
            Upstream::Storage => write!(f, "storage"),
        }
    }
}

/// Errors raised by memory, resolver and retrieval operations
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Referenced state is absent where presence was required
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Caller-supplied index or parameter outside valid bounds
    #[error("{field} out of range: {value} (expected {bounds})")]
    OutOfRange {
        field: String,
        value: String,
        bounds: String,
    },

    /// Malformed identifier passed to a lookup
    #[error("invalid {entity} reference: {reference}")]
    InvalidReference { entity: String, reference: String },

    /// Embedding provider or storage call failed or timed out
    #[error("{service} unavailable during {operation}: {message}")]
    UpstreamUnavailable {
        service: Upstream,
        operation: String,
        message: String,
    },

    /// Malformed input to a write operation
    #[error("validation failed for {field}: {message}")]
    Validation { field: String, message: String },

    /// A typed record could not be mapped to or from a document
    #[error("serialization error in {context}: {source}")]
    Serialization {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    /// Settings could not be loaded
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl MemoryError {
    /// Create a not found error
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Create an out of range error
    pub fn out_of_range(
        field: impl Into<String>,
        value: impl fmt::Display,
        bounds: impl Into<String>,
    ) -> Self {
        Self::OutOfRange {
            field: field.into(),
            value: value.to_string(),
            bounds: bounds.into(),
        }
    }

    /// Create an invalid reference error
    pub fn invalid_reference(entity: impl Into<String>, reference: impl Into<String>) -> Self {
        Self::InvalidReference {
            entity: entity.into(),
            reference: reference.into(),
        }
    }

    /// Wrap a storage failure
    pub fn storage(operation: impl Into<String>, error: impl fmt::Display) -> Self {
        Self::UpstreamUnavailable {
            service: Upstream::Storage,
            operation: operation.into(),
            message: error.to_string(),
        }
    }

    /// Wrap an embedding provider failure
    pub fn embedding(operation: impl Into<String>, error: impl fmt::Display) -> Self {
        Self::UpstreamUnavailable {
            service: Upstream::Embedding,
            operation: operation.into(),
            message: error.to_string(),
        }
    }

    /// Create a validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Wrap a serde failure
    pub fn serialization(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            context: context.into(),
            source,
        }
    }

    /// Check if this error is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this error is an out of range error
    pub fn is_out_of_range(&self) -> bool {
        matches!(self, Self::OutOfRange { .. })
    }

    /// Check if this error came from an upstream collaborator
    pub fn is_upstream(&self) -> bool {
        matches!(self, Self::UpstreamUnavailable { .. })
    }

    /// Check if this error is a failed embedding call
    pub fn is_embedding_failure(&self) -> bool {
        matches!(
            self,
            Self::UpstreamUnavailable {
                service: Upstream::Embedding,
                ..
            }
        )
    }

    /// Check if this error is a validation error
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = MemoryError::not_found("handoff", "abc");
        assert!(err.is_not_found());
        assert!(err.to_string().contains("handoff"));
        assert!(err.to_string().contains("abc"));

        let err = MemoryError::out_of_range("selected_index", 7, "0..3");
        assert!(err.is_out_of_range());
        assert!(err.to_string().contains("0..3"));

        let err = MemoryError::embedding("resolve", "connection reset");
        assert!(err.is_upstream());
        assert!(err.is_embedding_failure());
        assert!(err.to_string().contains("embedding provider"));

        let err = MemoryError::storage("find_one", "timeout");
        assert!(err.is_upstream());
        assert!(!err.is_embedding_failure());
    }
}
