//! Error types for Kiln controllers
//!
//! Errors are structured so a reconciler can classify them without string
//! matching. There are three outcomes a controller cares about:
//!
//! - **benign absence**: the reconciled object itself is gone ([`Error::is_not_found`])
//! - **transient**: retried with backoff (dependency missing or not ready,
//!   credentials not resolvable yet, optimistic-concurrency conflicts)
//! - **permanent**: recorded on the resource status and only retried when a
//!   new event arrives ([`Error::is_permanent`])

use thiserror::Error;

/// Main error type for Kiln operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A resource is not present in the cache
    #[error("{kind} {name:?} not found")]
    NotFound {
        /// Kind of the missing resource
        kind: String,
        /// Name (or namespace/name key) of the missing resource
        name: String,
    },

    /// A polymorphic reference carried a kind tag with no backing accessor
    #[error("unknown builder type: {0}")]
    UnknownKind(String),

    /// Malformed input (references, keys, identities)
    #[error("validation error: {0}")]
    Validation(String),

    /// A dependency exists but does not report ready
    #[error("{0}")]
    NotReady(String),

    /// Registry credentials could not be resolved
    #[error("credentials error for {account}: {message}")]
    Credentials {
        /// namespace/name of the service account
        account: String,
        /// Description of what failed
        message: String,
    },

    /// The builder image could not be materialized
    #[error("{0}")]
    Materialize(String),

    /// A status write was rejected because the resource changed since it was read
    #[error("conflict writing {kind} {name:?}: resource was modified")]
    Conflict {
        /// Kind of the resource being written
        kind: String,
        /// Name of the resource being written
        name: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Wraps an error that must not be retried on a timer
    #[error("{0}")]
    Permanent(Box<Error>),
}

impl Error {
    /// Create a not-found error for a resource kind and name
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a not-ready error with the given message
    pub fn not_ready(msg: impl Into<String>) -> Self {
        Self::NotReady(msg.into())
    }

    /// Create a credentials error for a service account
    pub fn credentials(account: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Credentials {
            account: account.into(),
            message: msg.into(),
        }
    }

    /// Create a materialization error with the given message
    pub fn materialize(msg: impl Into<String>) -> Self {
        Self::Materialize(msg.into())
    }

    /// Create a conflict error for a rejected write
    pub fn conflict(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Conflict {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Wrap an error so the controller does not retry it with backoff
    ///
    /// Wrapping twice is a no-op.
    pub fn permanent(err: Error) -> Self {
        match err {
            Self::Permanent(_) => err,
            other => Self::Permanent(Box::new(other)),
        }
    }

    /// Whether this error means the requested resource does not exist
    ///
    /// Holds for cache misses and for 404 responses from the API server, so
    /// callers need a single predicate regardless of where the lookup went.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 404,
            Self::Permanent(inner) => inner.is_not_found(),
            _ => false,
        }
    }

    /// Whether the controller should wait for a new event instead of retrying
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }

    /// Whether this error is permanent by nature, before any wrapping
    ///
    /// Malformed input and materialization failures need a user or upstream
    /// change to resolve; everything else may clear up on its own.
    pub fn is_permanent_cause(&self) -> bool {
        matches!(
            self,
            Self::Permanent(_)
                | Self::UnknownKind(_)
                | Self::Validation(_)
                | Self::Materialize(_)
                | Self::Serialization(_)
        )
    }
}
