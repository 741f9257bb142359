//! Error types for the continuous-authorization domain.

/// The result type used throughout conauth-engine.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in engine operations.
///
/// Every public transition either returns the updated aggregate or exactly
/// one of these errors; there is no partial-success shape. Check execution
/// failures are deliberately absent: they are absorbed into the check's own
/// status machine rather than surfaced to callers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transition was attempted from a status that does not permit it.
    ///
    /// Always recoverable by the caller correcting the call sequence; never
    /// retried automatically by the engine.
    #[error("precondition violation in {operation}: current status {status}, requires {required}")]
    Precondition {
        /// The operation that was attempted.
        operation: &'static str,
        /// The aggregate's current status.
        status: String,
        /// The statuses from which the operation is legal.
        required: String,
    },

    /// Malformed input to a transition (unknown category, out-of-range
    /// quarter, empty required field).
    #[error("validation error: {message}")]
    Validation {
        /// Description of the invalid input.
        message: String,
    },

    /// The addressed aggregate does not exist.
    #[error("not found: {resource_type} with id {id}")]
    NotFound {
        /// The type of aggregate that was not found.
        resource_type: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// A concurrent transition on the same aggregate won the race.
    ///
    /// The caller should reload the aggregate and re-evaluate before
    /// retrying.
    #[error("version conflict on {resource_type} {id}: expected version {expected}")]
    VersionConflict {
        /// The type of aggregate that conflicted.
        resource_type: &'static str,
        /// The identifier of the conflicting aggregate.
        id: String,
        /// The version the caller expected to replace.
        expected: u64,
    },

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A serialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// An error from conauth-core.
    #[error("core error: {0}")]
    Core(#[from] conauth_core::Error),
}

impl Error {
    /// Creates a new precondition violation.
    #[must_use]
    pub fn precondition(
        operation: &'static str,
        status: impl Into<String>,
        required: impl Into<String>,
    ) -> Self {
        Self::Precondition {
            operation,
            status: status.into(),
            required: required.into(),
        }
    }

    /// Creates a new validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a new not-found error.
    #[must_use]
    pub fn not_found(resource_type: &'static str, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            resource_type,
            id: id.to_string(),
        }
    }

    /// Creates a new storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Returns true if this is a precondition violation.
    #[must_use]
    pub const fn is_precondition(&self) -> bool {
        matches!(self, Self::Precondition { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precondition_display() {
        let err = Error::precondition("close", "analyzing", "recovered | lessons_learned");
        let msg = err.to_string();
        assert!(msg.contains("close"));
        assert!(msg.contains("analyzing"));
        assert!(msg.contains("recovered"));
        assert!(err.is_precondition());
    }

    #[test]
    fn not_found_display() {
        let err = Error::not_found("incident", "01ARZ3NDEKTSV4RRFFQ69G5FAV");
        assert!(err.to_string().contains("incident"));
        assert!(!err.is_precondition());
    }

    #[test]
    fn version_conflict_display() {
        let err = Error::VersionConflict {
            resource_type: "check",
            id: "abc".into(),
            expected: 4,
        };
        assert!(err.to_string().contains("version conflict"));
        assert!(err.to_string().contains('4'));
    }
}
