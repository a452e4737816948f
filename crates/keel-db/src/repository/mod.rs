//! # Repository Module
//!
//! CRUD facade that end users call.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository over a Unit of Work                       │
//! │                                                                         │
//! │  Service code                                                          │
//! │       │                                                                 │
//! │       │  tasks.persist(&task)                                          │
//! │       ▼                                                                 │
//! │  Repository<Task>                                                      │
//! │  ├── persist(&self, entity)      → manager.persist / manager.sync      │
//! │  ├── find_by_uuid(&self, uuid)                                         │
//! │  ├── find_all(&self)                                                   │
//! │  └── destroy(&self, entity)      → manager.destroy                     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  EntityManager::flush() → DataSource                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Keel only defines the port. Implementations decide how domain objects
//! map to models and when the manager is flushed.

use async_trait::async_trait;
use uuid::Uuid;

use keel_core::Identity;

use crate::error::DbResult;

/// Domain-facing persistence for one entity type.
#[async_trait]
pub trait Repository<T>: Send + Sync
where
    T: Identity + Send + Sync,
{
    /// Creates or updates `entity`.
    async fn persist(&self, entity: &T) -> DbResult<()>;

    async fn find_by_uuid(&self, uuid: Uuid) -> DbResult<Option<T>>;

    async fn find_all(&self) -> DbResult<Vec<T>>;

    /// Removes `entity` (soft or hard, depending on its model).
    async fn destroy(&self, entity: &T) -> DbResult<()>;
}
