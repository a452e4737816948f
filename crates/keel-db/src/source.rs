//! # Data Source Port
//!
//! The only thing an entity manager writes to.
//!
//! ```text
//! EntityManager::flush()            DataSource (adapter)
//! ──────────────────────            ─────────────────────────────
//! create stage   ───────────────►   insert(model)
//! update stage   ───────────────►   update(model, None)
//! sync stage     ───────────────►   update(model, Some(dirty))
//! hidden stage   ───────────────►   hidden(model)
//! destroy stage  ───────────────►   delete(model)
//! procedure stage ──────────────►   procedure(p)
//! ```
//!
//! Every call is per item; batching is the manager's job. Calls of one stage
//! may be in flight at the same time, so implementations must tolerate
//! concurrent use through `&self`.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use keel_core::{ModelHandle, Procedure, Snapshot};

use crate::error::DbResult;

/// Kinds of DataSource call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Insert,
    Update,
    Delete,
    Hidden,
    Procedure,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Insert => write!(f, "insert"),
            Operation::Update => write!(f, "update"),
            Operation::Delete => write!(f, "delete"),
            Operation::Hidden => write!(f, "hidden"),
            Operation::Procedure => write!(f, "procedure"),
        }
    }
}

/// Backend writes consumed by the entity manager.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Creates a new persisted record.
    async fn insert(&self, model: &ModelHandle) -> DbResult<()>;

    /// Writes a model. `dirty = None` is a full write; `Some` carries only
    /// the changed fields (plus an `updated_at` stamp for editable models).
    async fn update(&self, model: &ModelHandle, dirty: Option<&Snapshot>) -> DbResult<()>;

    /// Hard removal.
    async fn delete(&self, model: &ModelHandle) -> DbResult<()>;

    /// Soft removal of a hideable model (flag + timestamp).
    async fn hidden(&self, model: &ModelHandle) -> DbResult<()>;

    /// Backend-defined side effect.
    async fn procedure(&self, procedure: &dyn Procedure) -> DbResult<()>;
}
