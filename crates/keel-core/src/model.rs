//! # Models
//!
//! A model is the persistence-facing record associated with an entity.
//!
//! ## Capabilities
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Model Capabilities                                 │
//! │                                                                         │
//! │  NONE       plain row           destroy ──► hard delete                 │
//! │  EDITABLE   has updated_at      sync diff ──► + updated_at stamp        │
//! │  HIDEABLE   has hidden flag     destroy ──► soft delete (hidden)        │
//! │  ALL        both of the above                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Capabilities are declared by the model value through
//! [`Model::capabilities`], never inferred from its fields.
//!
//! ## Sharing
//! The caller, the relation table and queued operations must all see the
//! same model value, so models travel as [`ModelHandle`]s: a shared,
//! lockable cell that also remembers the concrete type for
//! [`ModelHandle::downcast`].

use std::any::{type_name, Any};
use std::fmt;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};

use crate::error::CoreResult;
use crate::snapshot::Snapshot;

// =============================================================================
// Constants
// =============================================================================

/// Numeric row identifier.
pub type ModelId = i64;

/// Default name of the field stamped on editable models.
pub const UPDATED_AT_FIELD: &str = "updated_at";

/// Field flipped to `true` by a soft delete.
pub const HIDDEN_FIELD: &str = "hidden";

/// Field stamped by a soft delete.
pub const HIDDEN_AT_FIELD: &str = "hidden_at";

// =============================================================================
// Capabilities
// =============================================================================

/// Behaviour flags that change how a model is flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Capabilities {
    /// Sync diffs get an `updated_at` stamp when something changed.
    pub editable: bool,

    /// `destroy` soft-deletes instead of hard-deleting.
    pub hideable: bool,
}

impl Capabilities {
    pub const NONE: Capabilities = Capabilities {
        editable: false,
        hideable: false,
    };

    pub const EDITABLE: Capabilities = Capabilities {
        editable: true,
        hideable: false,
    };

    pub const HIDEABLE: Capabilities = Capabilities {
        editable: false,
        hideable: true,
    };

    pub const ALL: Capabilities = Capabilities {
        editable: true,
        hideable: true,
    };
}

// =============================================================================
// Model
// =============================================================================

/// A persistence-facing record.
///
/// ## Example
/// ```rust
/// use keel_core::{Capabilities, CoreResult, Model, ModelId, Snapshot};
/// use serde::Serialize;
///
/// #[derive(Serialize)]
/// struct TaskRow {
///     id: i64,
///     title: String,
///     updated_at: Option<String>,
/// }
///
/// impl Model for TaskRow {
///     fn id(&self) -> ModelId {
///         self.id
///     }
///
///     fn capabilities(&self) -> Capabilities {
///         Capabilities::EDITABLE
///     }
///
///     fn snapshot(&self) -> CoreResult<Snapshot> {
///         Snapshot::capture(self)
///     }
/// }
/// ```
pub trait Model: Send + Sync + 'static {
    /// Row identifier.
    fn id(&self) -> ModelId;

    /// Flush behaviour of this value. Defaults to a plain row.
    fn capabilities(&self) -> Capabilities {
        Capabilities::NONE
    }

    /// Top-level field map, usually `Snapshot::capture(self)`.
    fn snapshot(&self) -> CoreResult<Snapshot>;

    /// Field that receives the sync stamp on editable models.
    fn updated_at_field(&self) -> &str {
        UPDATED_AT_FIELD
    }
}

/// Typed shared model, as held by application code.
pub type Shared<M> = Arc<RwLock<M>>;

/// Wraps a model for sharing with an entity manager.
pub fn shared<M: Model>(model: M) -> Shared<M> {
    Arc::new(RwLock::new(model))
}

// =============================================================================
// Model Handle
// =============================================================================

/// Type-erased shared model.
///
/// Cloning a handle clones the pointer, not the model. Two handles are the
/// same model when they point at the same allocation ([`Self::same_model`]).
#[derive(Clone)]
pub struct ModelHandle {
    erased: Arc<RwLock<dyn Model>>,
    typed: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl ModelHandle {
    /// Moves a model into a new handle.
    pub fn new<M: Model>(model: M) -> Self {
        Self::from_shared(shared(model))
    }

    /// Creates a handle over an existing shared model.
    pub fn from_shared<M: Model>(model: Shared<M>) -> Self {
        let typed: Arc<dyn Any + Send + Sync> = model.clone();
        let erased: Arc<RwLock<dyn Model>> = model;
        ModelHandle {
            erased,
            typed,
            type_name: type_name::<M>(),
        }
    }

    pub fn id(&self) -> ModelId {
        self.erased.read().id()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.erased.read().capabilities()
    }

    pub fn snapshot(&self) -> CoreResult<Snapshot> {
        self.erased.read().snapshot()
    }

    pub fn updated_at_field(&self) -> String {
        self.erased.read().updated_at_field().to_string()
    }

    /// Rust type name of the model (used by stores as a table key).
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Read access to the erased model. Do not hold across an `.await`.
    pub fn read(&self) -> RwLockReadGuard<'_, dyn Model> {
        self.erased.read()
    }

    /// Write access to the erased model. Do not hold across an `.await`.
    pub fn write(&self) -> RwLockWriteGuard<'_, dyn Model> {
        self.erased.write()
    }

    /// Recovers the typed shared model, if `M` is the concrete type.
    pub fn downcast<M: Model>(&self) -> Option<Shared<M>> {
        Arc::clone(&self.typed).downcast::<RwLock<M>>().ok()
    }

    /// True when both handles point at the same model value.
    pub fn same_model(&self, other: &ModelHandle) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.erased) as *const (),
            Arc::as_ptr(&other.erased) as *const (),
        )
    }
}

impl<M: Model> From<Shared<M>> for ModelHandle {
    fn from(model: Shared<M>) -> Self {
        ModelHandle::from_shared(model)
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("ModelHandle");
        out.field("type", &self.type_name);
        // try_read: Debug must not deadlock inside a sync mutation
        match self.erased.try_read() {
            Some(model) => out.field("id", &model.id()),
            None => out.field("id", &"<locked>"),
        };
        out.finish()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Plain {
        id: i64,
    }

    impl Model for Plain {
        fn id(&self) -> ModelId {
            self.id
        }

        fn snapshot(&self) -> CoreResult<Snapshot> {
            Snapshot::capture(self)
        }
    }

    #[derive(Serialize)]
    struct Archived {
        id: i64,
        hidden: bool,
    }

    impl Model for Archived {
        fn id(&self) -> ModelId {
            self.id
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::HIDEABLE
        }

        fn snapshot(&self) -> CoreResult<Snapshot> {
            Snapshot::capture(self)
        }
    }

    #[test]
    fn test_default_capabilities() {
        let handle = ModelHandle::new(Plain { id: 1 });
        assert_eq!(handle.capabilities(), Capabilities::NONE);
        assert_eq!(handle.updated_at_field(), UPDATED_AT_FIELD);

        let handle = ModelHandle::new(Archived {
            id: 2,
            hidden: false,
        });
        assert!(handle.capabilities().hideable);
        assert!(!handle.capabilities().editable);
    }

    #[test]
    fn test_handle_shares_the_model() {
        let model = shared(Plain { id: 1 });
        let handle = ModelHandle::from(model.clone());

        model.write().id = 99;
        assert_eq!(handle.id(), 99);
    }

    #[test]
    fn test_identity_is_by_allocation() {
        let a = ModelHandle::new(Plain { id: 1 });
        let b = ModelHandle::new(Plain { id: 1 });

        assert!(a.same_model(&a.clone()));
        assert!(!a.same_model(&b));
    }

    #[test]
    fn test_downcast() {
        let model = shared(Plain { id: 5 });
        let handle = ModelHandle::from_shared(model.clone());

        let typed = handle.downcast::<Plain>().unwrap();
        assert!(Arc::ptr_eq(&typed, &model));
        assert!(handle.downcast::<Archived>().is_none());
        assert!(handle.type_name().ends_with("Plain"));
    }

    #[test]
    fn test_debug_shows_id() {
        let handle = ModelHandle::new(Plain { id: 3 });
        let text = format!("{:?}", handle);
        assert!(text.contains("id: 3"));
    }
}
