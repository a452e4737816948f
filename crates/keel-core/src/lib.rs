//! # keel-core: Change Tracking Types for Keel
//!
//! This crate holds everything a unit of work needs to *describe* pending
//! changes, with zero I/O. Running those changes against a backend is the
//! job of `keel-db`.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Keel Architecture                              │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    Application code                             │   │
//! │  │    builds entities, wraps models, queues operations             │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ keel-core (THIS CRATE) ★                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │  entity   │  │   model   │  │ snapshot  │  │ operation │  │   │
//! │  │   │  Entity   │  │  Model    │  │ Snapshot  │  │ EntityLink│  │   │
//! │  │   │  Identity │  │  Handle   │  │  diffs    │  │ EntitySync│  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK                             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               keel-db (EntityManager + DataSource)              │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`entity`] - Identity tokens
//! - [`model`] - Model trait, capabilities, shared handles
//! - [`snapshot`] - Field snapshots and dirty diffs
//! - [`operation`] - Link / Update / Sync descriptors
//! - [`procedure`] - Opaque side effects
//! - [`error`] - Core error types
//!
//! ## Example Usage
//!
//! ```rust
//! use keel_core::{shared, CoreResult, Entity, EntitySync, Model, ModelId, Snapshot};
//! use serde::Serialize;
//!
//! #[derive(Serialize)]
//! struct Row {
//!     id: i64,
//!     name: String,
//! }
//!
//! impl Model for Row {
//!     fn id(&self) -> ModelId {
//!         self.id
//!     }
//!
//!     fn snapshot(&self) -> CoreResult<Snapshot> {
//!         Snapshot::capture(self)
//!     }
//! }
//!
//! let row = shared(Row { id: 1, name: "a".into() });
//! let mut sync = EntitySync::new(Entity::new(), row, |r: &mut Row| r.name = "x".into()).unwrap();
//!
//! let dirty = sync.verify().unwrap().unwrap();
//! assert_eq!(dirty.keys().collect::<Vec<_>>(), vec!["name"]);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod entity;
pub mod error;
pub mod model;
pub mod operation;
pub mod procedure;
pub mod snapshot;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use entity::{Entity, Identity};
pub use error::{CoreError, CoreResult};
pub use model::{
    shared, Capabilities, Model, ModelHandle, ModelId, Shared, HIDDEN_AT_FIELD, HIDDEN_FIELD,
    UPDATED_AT_FIELD,
};
pub use operation::{EntityLink, EntitySync, EntityUpdate, ModelFactory, QueryEntityManager};
pub use procedure::Procedure;
pub use snapshot::Snapshot;
