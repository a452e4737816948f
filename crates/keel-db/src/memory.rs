//! # In-Memory Store
//!
//! A [`DataSource`] and [`Database`] that keeps rows in a map.
//!
//! Suitable for:
//! - Unit and integration tests
//! - The demo binary
//! - Prototyping a model layer before a real backend exists
//!
//! ## Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          MemoryStore                                    │
//! │                                                                         │
//! │  rows:     (type name, id) ──► Snapshot      current row values        │
//! │  journal:  [SourceCall]                      every call, in call order │
//! │  savepoint: Option<rows>                     copy taken by transaction │
//! │  failures: [(Operation, Option<id>)]         injected faults           │
//! │                                                                         │
//! │  rollback() restores rows from the savepoint. The journal is never     │
//! │  rewound, so tests can still see what was attempted.                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use keel_core::{ModelHandle, ModelId, Procedure, Snapshot, HIDDEN_AT_FIELD, HIDDEN_FIELD};

use crate::database::Database;
use crate::error::{DbError, DbResult};
use crate::source::{DataSource, Operation};

type RowKey = (&'static str, ModelId);

/// One call received by a [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum SourceCall {
    Insert {
        model: String,
        id: ModelId,
    },
    /// `fields` is `None` for a full write.
    Update {
        model: String,
        id: ModelId,
        fields: Option<Vec<String>>,
    },
    Delete {
        model: String,
        id: ModelId,
    },
    Hidden {
        model: String,
        id: ModelId,
    },
    Procedure {
        name: String,
    },
}

impl SourceCall {
    pub fn operation(&self) -> Operation {
        match self {
            SourceCall::Insert { .. } => Operation::Insert,
            SourceCall::Update { .. } => Operation::Update,
            SourceCall::Delete { .. } => Operation::Delete,
            SourceCall::Hidden { .. } => Operation::Hidden,
            SourceCall::Procedure { .. } => Operation::Procedure,
        }
    }
}

#[derive(Debug)]
struct StoreState {
    rows: HashMap<RowKey, Snapshot>,
    journal: Vec<SourceCall>,
    connected: bool,
    savepoint: Option<HashMap<RowKey, Snapshot>>,
    failures: Vec<(Operation, Option<ModelId>)>,
}

impl StoreState {
    fn ensure_connected(&self) -> DbResult<()> {
        if self.connected {
            Ok(())
        } else {
            Err(DbError::NotConnected)
        }
    }

    fn check_fault(&self, operation: Operation, id: Option<ModelId>) -> DbResult<()> {
        let hit = self
            .failures
            .iter()
            .any(|(op, target)| *op == operation && (target.is_none() || *target == id));

        if hit {
            return Err(DbError::Rejected {
                operation,
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn row_mut(&mut self, model: &ModelHandle) -> DbResult<&mut Snapshot> {
        let id = model.id();
        self.rows
            .get_mut(&(model.type_name(), id))
            .ok_or_else(|| DbError::not_found(short_name(model.type_name()), id))
    }
}

/// Map-backed store. Starts connected, outside any transaction.
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        MemoryStore {
            state: Mutex::new(StoreState {
                rows: HashMap::new(),
                journal: Vec::new(),
                connected: true,
                savepoint: None,
                failures: Vec::new(),
            }),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later `operation` call fail, for one model id or for all
    /// of them when `id` is `None`.
    pub fn fail_on(&self, operation: Operation, id: Option<ModelId>) {
        self.state.lock().failures.push((operation, id));
    }

    /// Removes every injected failure.
    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Every call received so far.
    pub fn journal(&self) -> Vec<SourceCall> {
        self.state.lock().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.state.lock().journal.clear();
    }

    /// Stored values of a row, looked up by the model's type and id.
    pub fn row(&self, model: &ModelHandle) -> Option<Snapshot> {
        self.state
            .lock()
            .rows
            .get(&(model.type_name(), model.id()))
            .cloned()
    }

    pub fn row_count(&self) -> usize {
        self.state.lock().rows.len()
    }

    pub fn in_transaction(&self) -> bool {
        self.state.lock().savepoint.is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }
}

/// Last path segment of a Rust type name.
fn short_name(type_name: &str) -> String {
    type_name
        .rsplit("::")
        .next()
        .unwrap_or(type_name)
        .to_string()
}

fn call_target(model: &ModelHandle) -> (String, ModelId) {
    (short_name(model.type_name()), model.id())
}

// =============================================================================
// DataSource
// =============================================================================

#[async_trait]
impl DataSource for MemoryStore {
    async fn insert(&self, model: &ModelHandle) -> DbResult<()> {
        let values = model
            .snapshot()
            .map_err(|e| DbError::Internal(e.to_string()))?;
        let (name, id) = call_target(model);

        let mut state = self.state.lock();
        state.ensure_connected()?;
        state.journal.push(SourceCall::Insert {
            model: name.clone(),
            id,
        });
        state.check_fault(Operation::Insert, Some(id))?;

        let key = (model.type_name(), id);
        if state.rows.contains_key(&key) {
            return Err(DbError::duplicate(name, id));
        }
        state.rows.insert(key, values);

        debug!(model = %name, id, "Row inserted");
        Ok(())
    }

    async fn update(&self, model: &ModelHandle, dirty: Option<&Snapshot>) -> DbResult<()> {
        // full writes need the model's values, read them before taking the store lock
        let full = match dirty {
            Some(_) => None,
            None => Some(
                model
                    .snapshot()
                    .map_err(|e| DbError::Internal(e.to_string()))?,
            ),
        };
        let (name, id) = call_target(model);

        let mut state = self.state.lock();
        state.ensure_connected()?;
        state.journal.push(SourceCall::Update {
            model: name.clone(),
            id,
            fields: dirty.map(|changes| changes.keys().map(str::to_string).collect()),
        });
        state.check_fault(Operation::Update, Some(id))?;

        let row = state.row_mut(model)?;
        match (full, dirty) {
            (Some(values), _) => *row = values,
            (None, Some(changes)) => row.merge(changes),
            (None, None) => {}
        }

        debug!(model = %name, id, partial = dirty.is_some(), "Row updated");
        Ok(())
    }

    async fn delete(&self, model: &ModelHandle) -> DbResult<()> {
        let (name, id) = call_target(model);

        let mut state = self.state.lock();
        state.ensure_connected()?;
        state.journal.push(SourceCall::Delete {
            model: name.clone(),
            id,
        });
        state.check_fault(Operation::Delete, Some(id))?;

        state
            .rows
            .remove(&(model.type_name(), id))
            .ok_or_else(|| DbError::not_found(name.clone(), id))?;

        debug!(model = %name, id, "Row deleted");
        Ok(())
    }

    async fn hidden(&self, model: &ModelHandle) -> DbResult<()> {
        if !model.capabilities().hideable {
            return Err(DbError::Unsupported {
                operation: Operation::Hidden,
                message: format!("{} is not hideable", short_name(model.type_name())),
            });
        }
        let (name, id) = call_target(model);

        let mut state = self.state.lock();
        state.ensure_connected()?;
        state.journal.push(SourceCall::Hidden {
            model: name.clone(),
            id,
        });
        state.check_fault(Operation::Hidden, Some(id))?;

        let row = state.row_mut(model)?;
        row.insert(HIDDEN_FIELD, Value::Bool(true));
        row.stamp(HIDDEN_AT_FIELD, Utc::now())
            .map_err(|e| DbError::Internal(e.to_string()))?;

        debug!(model = %name, id, "Row hidden");
        Ok(())
    }

    async fn procedure(&self, procedure: &dyn Procedure) -> DbResult<()> {
        let mut state = self.state.lock();
        state.ensure_connected()?;
        state.journal.push(SourceCall::Procedure {
            name: procedure.name().to_string(),
        });
        state.check_fault(Operation::Procedure, None)?;

        debug!(procedure = procedure.name(), "Procedure recorded");
        Ok(())
    }
}

// =============================================================================
// Database
// =============================================================================

#[async_trait]
impl Database for MemoryStore {
    async fn connect(&self) -> DbResult<()> {
        self.state.lock().connected = true;
        Ok(())
    }

    async fn disconnect(&self, _all: bool) -> DbResult<()> {
        let mut state = self.state.lock();
        state.connected = false;
        state.savepoint = None;
        Ok(())
    }

    async fn transaction(&self) -> DbResult<()> {
        let mut state = self.state.lock();
        state.ensure_connected()?;
        if state.savepoint.is_some() {
            return Err(DbError::TransactionFailed(
                "transaction already open".to_string(),
            ));
        }
        state.savepoint = Some(state.rows.clone());
        debug!("Transaction opened");
        Ok(())
    }

    async fn commit(&self) -> DbResult<()> {
        let mut state = self.state.lock();
        state.ensure_connected()?;
        if state.savepoint.take().is_none() {
            return Err(DbError::TransactionFailed("no open transaction".to_string()));
        }
        debug!("Transaction committed");
        Ok(())
    }

    async fn rollback(&self) -> DbResult<()> {
        let mut state = self.state.lock();
        state.ensure_connected()?;
        let rows = state
            .savepoint
            .take()
            .ok_or_else(|| DbError::TransactionFailed("no open transaction".to_string()))?;
        state.rows = rows;
        debug!("Transaction rolled back");
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
