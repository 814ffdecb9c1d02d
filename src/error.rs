//! Error types for the governance layer.
//!
//! Errors are strongly typed with thiserror and layered by concern. Most of
//! them never leave a run: the call sites that talk to external services
//! degrade to a deterministic fallback and log instead of propagating. The
//! one service error allowed to abort a run is a missing credential on the
//! web research path.

use thiserror::Error;

use crate::storage::StorageError;

/// Validation errors that occur during input validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Topic cannot be empty")]
    EmptyTopic,

    #[error("Malformed evidence id '{raw}': expected 'episode:<n>' or 'fact:<n>'")]
    InvalidTypedId {
        raw: String,
    },

    #[error("Invalid policy field '{field}': {reason}")]
    InvalidPolicyField {
        field: String,
        reason: String,
    },

    #[error("Invalid configuration value '{field}': {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },
}

/// Failures of the external collaborators (completion, search, fetch).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("{service} call failed: {message}")]
    Failed {
        service: String,
        message: String,
    },

    #[error("{service} returned a malformed response: {message}")]
    Malformed {
        service: String,
        message: String,
    },

    #[error("Missing credential: environment variable {variable} is not set")]
    MissingCredential {
        variable: String,
    },

    #[error("{service} call timed out after {duration_ms}ms")]
    Timeout {
        service: String,
        duration_ms: u64,
    },
}

impl ServiceError {
    /// Creates a call failure for `service`.
    #[must_use]
    pub fn failed(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Creates a malformed-response failure for `service`.
    #[must_use]
    pub fn malformed(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Malformed {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Returns true if this error must abort the code path that hit it.
    ///
    /// Only a missing credential is fatal; every other failure degrades.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::MissingCredential { .. })
    }
}

/// Configuration and skill-catalog loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Failed to parse YAML skill catalog: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Top-level error type.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl GateError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a missing-credential failure.
    #[must_use]
    pub const fn is_missing_credential(&self) -> bool {
        matches!(self, Self::Service(ServiceError::MissingCredential { .. }))
    }

    /// Returns true if this is a storage error.
    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

/// Result type alias for governance operations.
pub type GateResult<T> = Result<T, GateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_typed_id_message() {
        let err = ValidationError::InvalidTypedId {
            raw: "fact:abc".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("fact:abc"));
        assert!(msg.contains("episode:<n>"));
    }

    #[test]
    fn test_only_missing_credential_is_fatal() {
        assert!(ServiceError::MissingCredential {
            variable: "SERPAPI_API_KEY".to_string()
        }
        .is_fatal());
        assert!(!ServiceError::failed("search", "boom").is_fatal());
        assert!(!ServiceError::malformed("completion", "not json").is_fatal());
        assert!(!ServiceError::Timeout {
            service: "fetch".to_string(),
            duration_ms: 15_000
        }
        .is_fatal());
    }

    #[test]
    fn test_timeout_message() {
        let err = ServiceError::Timeout {
            service: "fetch".to_string(),
            duration_ms: 5000,
        };
        assert!(err.to_string().contains("5000ms"));
    }

    #[test]
    fn test_gate_error_from_service() {
        let err: GateError = ServiceError::MissingCredential {
            variable: "SERPAPI_API_KEY".to_string(),
        }
        .into();
        assert!(err.is_missing_credential());
        assert!(!err.is_validation());
        assert!(err.to_string().contains("SERPAPI_API_KEY"));
    }

    #[test]
    fn test_gate_error_from_validation() {
        let err: GateError = ValidationError::EmptyTopic.into();
        assert!(err.is_validation());
        assert!(!err.is_missing_credential());
    }

    #[test]
    fn test_gate_error_internal() {
        let err = GateError::internal("unexpected state");
        assert!(err.to_string().contains("unexpected state"));
        assert!(!err.is_storage());
    }
}
