//! # Error Types
//!
//! Error types for keel-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  keel-core errors (this file)                                          │
//! │  └── CoreError        - Identity, snapshot and callback failures        │
//! │                                                                         │
//! │  keel-db errors (separate crate)                                       │
//! │  ├── DbError          - DataSource / Database failures                 │
//! │  └── FlushError       - Which flush stage failed, and why              │
//! │                                                                         │
//! │  Flow: CoreError ──► FlushError::Callback ──► caller                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A missing relation is NOT an error anywhere in Keel: `select` returns
//! `None` and `destroy` is a no-op.

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Errors raised while building or evaluating tracked operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An entity identifier could not be parsed.
    #[error("Invalid entity identity '{value}': {reason}")]
    InvalidIdentity { value: String, reason: String },

    /// A model could not be serialized into a field snapshot.
    #[error("Failed to snapshot model: {0}")]
    SnapshotFailed(#[from] serde_json::Error),

    /// A model serialized to something other than a field map.
    ///
    /// ## When This Occurs
    /// - The model is a newtype around a scalar
    /// - `Serialize` is implemented by hand and emits a sequence
    #[error("Model must serialize to an object of fields, got {kind}")]
    NotAnObject { kind: &'static str },

    /// A user supplied create or sync routine failed.
    #[error("Callback failed: {0}")]
    Callback(String),
}

impl CoreError {
    /// Creates a Callback error from any displayable reason.
    pub fn callback(reason: impl std::fmt::Display) -> Self {
        CoreError::Callback(reason.to_string())
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
