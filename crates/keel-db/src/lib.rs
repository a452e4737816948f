//! # keel-db: Unit of Work for Keel
//!
//! This crate turns tracked changes into ordered calls on a backend.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Keel Data Flow                                 │
//! │                                                                         │
//! │  Service / Repository<T>                                               │
//! │       │  persist · update · sync · destroy · procedure                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     keel-db (THIS CRATE)                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │ EntityManager │    │ FlushStage    │    │ ManagerConfig│  │   │
//! │  │   │ (manager/)    │───►│ run_stage     │    │ (config.rs)  │  │   │
//! │  │   │ RelationTable │    │ FlushReport   │    │ keel.toml    │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  DataSource + Database (ports)                                  │   │
//! │  │  MemoryStore here, SQL / remote adapters elsewhere              │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`manager`] - Entity manager, relation table and flush pipeline
//! - [`source`] - DataSource port (per-model writes)
//! - [`database`] - Database port (connection and transaction boundary)
//! - [`repository`] - Repository facade trait
//! - [`memory`] - In-memory DataSource/Database
//! - [`config`] - Manager configuration
//! - [`error`] - Error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use keel_db::{EntityManager, MemoryStore};
//!
//! let store = Arc::new(MemoryStore::new());
//! let mut manager = EntityManager::new(store.clone());
//!
//! manager.persist(EntityLink::from_fn(&task, |_| Ok(ModelHandle::new(row))));
//! let report = manager.flush_in(store.as_ref()).await?;
//! println!("{} calls", report.calls());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod database;
pub mod error;
pub mod manager;
pub mod memory;
pub mod repository;
pub mod source;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{FlushSettings, ManagerConfig};
pub use database::Database;
pub use error::{ConfigError, DbError, DbResult, FlushError};
pub use manager::{EntityManager, FlushReport, FlushStage, PendingWork, RelationTable};
pub use memory::{MemoryStore, SourceCall};
pub use repository::Repository;
pub use source::{DataSource, Operation};
