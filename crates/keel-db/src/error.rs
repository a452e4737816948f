//! # Database Error Types
//!
//! Error types for data sources, flushes and configuration.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  DataSource / Database call fails                                      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  DbError (this module) ← What the backend reported                     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  FlushError ← Adds the flush stage that was running                    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Caller: treat as "unknown partial effect", roll back the              │
//! │  surrounding transaction before retrying                               │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use keel_core::{CoreError, ModelId};

use crate::manager::FlushStage;
use crate::source::Operation;

// =============================================================================
// Database Error
// =============================================================================

/// Data source and transaction boundary errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Row not found.
    ///
    /// ## When This Occurs
    /// - Updating, deleting or hiding a row that was never inserted
    /// - Row already hard-deleted
    #[error("{model} not found: {id}")]
    NotFound { model: String, id: ModelId },

    /// Row already exists.
    ///
    /// ## When This Occurs
    /// - Inserting the same model id twice
    #[error("Duplicate {model}: {id} already exists")]
    UniqueViolation { model: String, id: ModelId },

    /// The backend refused the operation.
    #[error("{operation} rejected: {message}")]
    Rejected {
        operation: Operation,
        message: String,
    },

    /// The backend does not support this operation or payload.
    #[error("{operation} not supported: {message}")]
    Unsupported {
        operation: Operation,
        message: String,
    },

    /// Transaction could not be opened, committed or rolled back.
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Operation requires a connected backend.
    #[error("Not connected")]
    NotConnected,

    /// Internal backend error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a model type and id.
    pub fn not_found(model: impl Into<String>, id: ModelId) -> Self {
        DbError::NotFound {
            model: model.into(),
            id,
        }
    }

    /// Creates a UniqueViolation error.
    pub fn duplicate(model: impl Into<String>, id: ModelId) -> Self {
        DbError::UniqueViolation {
            model: model.into(),
            id,
        }
    }
}

/// Result type for data source operations.
pub type DbResult<T> = Result<T, DbError>;

// =============================================================================
// Flush Error
// =============================================================================

/// Why a flush stopped.
///
/// Stages after the failing one never run, and the manager keeps its queues
/// and relations so the caller can inspect or retry.
#[derive(Debug, Error)]
pub enum FlushError {
    /// A DataSource call failed.
    #[error("{stage} stage failed: {source}")]
    DataSource {
        stage: FlushStage,
        #[source]
        source: DbError,
    },

    /// A create routine or sync mutation failed.
    #[error("{stage} stage callback failed: {source}")]
    Callback {
        stage: FlushStage,
        #[source]
        source: CoreError,
    },

    /// The surrounding transaction could not be opened or committed.
    #[error("Transaction boundary failed: {0}")]
    Transaction(#[source] DbError),
}

impl FlushError {
    pub(crate) fn data_source(stage: FlushStage) -> impl FnOnce(DbError) -> FlushError {
        move |source| FlushError::DataSource { stage, source }
    }

    pub(crate) fn callback(stage: FlushStage) -> impl FnOnce(CoreError) -> FlushError {
        move |source| FlushError::Callback { stage, source }
    }

    /// Stage that failed, if the failure happened inside the pipeline.
    pub fn stage(&self) -> Option<FlushStage> {
        match self {
            FlushError::DataSource { stage, .. } | FlushError::Callback { stage, .. } => {
                Some(*stage)
            }
            FlushError::Transaction(_) => None,
        }
    }
}

// =============================================================================
// Config Error
// =============================================================================

/// Manager configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read or write config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("No config path available")]
    NoConfigPath,
}

pub type ConfigResult<T> = Result<T, ConfigError>;

// =============================================================================
// Unit Tests
// =============================================================================
