//! # Database Port
//!
//! Transaction boundary owned by the caller.
//!
//! The entity manager never opens or closes transactions on its own. When a
//! flush has to be atomic across stages, wrap it:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                SINGLE TRANSACTION (EntityManager::flush_in)             │
//! │                                                                         │
//! │  database.transaction()                                                │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  manager.flush()  ── inserts, updates, syncs, hidden, deletes, procs   │
//! │       │                                                                 │
//! │       ├── Ok  ──► database.commit()                                    │
//! │       └── Err ──► database.rollback()   (queues stay intact)           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;

use crate::error::DbResult;

/// Connection and transaction lifecycle of a backend.
#[async_trait]
pub trait Database: Send + Sync {
    async fn connect(&self) -> DbResult<()>;

    /// Closes this connection, or every connection when `all` is set.
    async fn disconnect(&self, all: bool) -> DbResult<()>;

    async fn transaction(&self) -> DbResult<()>;

    async fn commit(&self) -> DbResult<()>;

    async fn rollback(&self) -> DbResult<()>;
}
