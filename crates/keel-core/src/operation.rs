//! # Operation Descriptors
//!
//! Small values that bind an entity to a model and describe one pending
//! change. They are built by application code and queued on an entity
//! manager; nothing here performs I/O.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Operation Descriptors                             │
//! │                                                                         │
//! │  EntityLink    entity + ModelFactory     ──► insert   (create stage)    │
//! │  EntityUpdate  entity + model            ──► update   (always sent)     │
//! │  EntitySync    entity + model + mutation ──► partial update, only when  │
//! │                + first-dirty snapshot        a field really changed     │
//! │                                                                         │
//! │  bindable = true (default): entity ──► model is written into the        │
//! │  relation table (on enqueue for update/sync, after create for links)   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::entity::{Entity, Identity};
use crate::error::CoreResult;
use crate::model::{Model, ModelHandle, Shared};
use crate::snapshot::Snapshot;

// =============================================================================
// Query View
// =============================================================================

/// Read-only view of an entity manager, handed to model factories.
///
/// Lets a create routine resolve models bound earlier in the same unit of
/// work (for example a parent row created by a previous flush stage).
pub trait QueryEntityManager: Send + Sync {
    /// Model currently bound to `entity`, if any.
    fn select(&self, entity: &dyn Identity) -> Option<ModelHandle>;
}

impl<'a> dyn QueryEntityManager + 'a {
    /// Typed variant of [`QueryEntityManager::select`].
    pub fn select_as<M: Model>(&self, entity: &dyn Identity) -> Option<Shared<M>> {
        self.select(entity).and_then(|model| model.downcast::<M>())
    }
}

// =============================================================================
// Link (create)
// =============================================================================

/// Produces the model for a queued create.
#[async_trait]
pub trait ModelFactory: Send + Sync {
    async fn create(&self, manager: &dyn QueryEntityManager) -> CoreResult<ModelHandle>;
}

struct FnFactory<F>(F);

#[async_trait]
impl<F> ModelFactory for FnFactory<F>
where
    F: Fn(&dyn QueryEntityManager) -> CoreResult<ModelHandle> + Send + Sync,
{
    async fn create(&self, manager: &dyn QueryEntityManager) -> CoreResult<ModelHandle> {
        (self.0)(manager)
    }
}

/// A queued create.
///
/// The factory runs during flush, not when the link is queued, so it can
/// see relations bound by everything enqueued before the flush.
pub struct EntityLink {
    entity: Entity,
    bindable: bool,
    factory: Box<dyn ModelFactory>,
}

impl EntityLink {
    /// Creates a link with an async factory.
    pub fn new(entity: impl Identity, factory: impl ModelFactory + 'static) -> Self {
        EntityLink {
            entity: entity.entity(),
            bindable: true,
            factory: Box::new(factory),
        }
    }

    /// Creates a link from a synchronous closure.
    ///
    /// ## Example
    /// ```rust,ignore
    /// let link = EntityLink::from_fn(&task, |manager| {
    ///     let project = manager.select(&project_entity);
    ///     Ok(ModelHandle::new(TaskRow::new(42, project)))
    /// });
    /// ```
    pub fn from_fn<F>(entity: impl Identity, create: F) -> Self
    where
        F: Fn(&dyn QueryEntityManager) -> CoreResult<ModelHandle> + Send + Sync + 'static,
    {
        Self::new(entity, FnFactory(create))
    }

    /// Keeps the created model out of the relation table.
    pub fn unbound(mut self) -> Self {
        self.bindable = false;
        self
    }

    pub fn entity(&self) -> Entity {
        self.entity
    }

    pub fn bindable(&self) -> bool {
        self.bindable
    }

    /// Runs the factory.
    pub async fn create(&self, manager: &dyn QueryEntityManager) -> CoreResult<ModelHandle> {
        self.factory.create(manager).await
    }
}

impl fmt::Debug for EntityLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityLink")
            .field("entity", &self.entity)
            .field("bindable", &self.bindable)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Update
// =============================================================================

/// A queued unconditional update.
#[derive(Debug, Clone)]
pub struct EntityUpdate {
    entity: Entity,
    model: ModelHandle,
    bindable: bool,
}

impl EntityUpdate {
    pub fn new(entity: impl Identity, model: impl Into<ModelHandle>) -> Self {
        EntityUpdate {
            entity: entity.entity(),
            model: model.into(),
            bindable: true,
        }
    }

    /// Leaves the relation table untouched when queued.
    pub fn unbound(mut self) -> Self {
        self.bindable = false;
        self
    }

    pub fn entity(&self) -> Entity {
        self.entity
    }

    pub fn model(&self) -> &ModelHandle {
        &self.model
    }

    pub fn bindable(&self) -> bool {
        self.bindable
    }
}

// =============================================================================
// Sync (dirty-checked update)
// =============================================================================

type Mutation = Box<dyn FnMut() -> CoreResult<()> + Send + Sync>;

/// A queued dirty-checked update.
///
/// ## Lifecycle
/// ```text
/// EntitySync::new(entity, model, mutation)
///      │
///      ├── first_dirty = model.snapshot()       (registration time)
///      ▼
/// ... caller may keep mutating the shared model ...
///      │
///      ▼  flush, sync stage: verify()
/// mutation(&mut model)
///      │
///      ▼
/// dirty = model.snapshot().changes_since(first_dirty)
///      │
///      ├── empty ──────────────► None (no I/O)
///      ├── editable model ─────► dirty + updated_at = now
///      ▼
/// Some(dirty) ──► DataSource::update(model, Some(dirty))
/// ```
pub struct EntitySync {
    entity: Entity,
    model: ModelHandle,
    bindable: bool,
    first_dirty: Snapshot,
    mutation: Mutation,
}

impl EntitySync {
    /// Registers a sync whose mutation runs at flush time.
    pub fn new<M, F>(entity: impl Identity, model: Shared<M>, mut mutation: F) -> CoreResult<Self>
    where
        M: Model,
        F: FnMut(&mut M) + Send + Sync + 'static,
    {
        Self::fallible(entity, model, move |target: &mut M| {
            mutation(target);
            Ok(())
        })
    }

    /// Registers a sync whose mutation may fail; a failure aborts the flush.
    pub fn fallible<M, F>(entity: impl Identity, model: Shared<M>, mut mutation: F) -> CoreResult<Self>
    where
        M: Model,
        F: FnMut(&mut M) -> CoreResult<()> + Send + Sync + 'static,
    {
        let first_dirty = model.read().snapshot()?;
        let target = Arc::clone(&model);

        Ok(EntitySync {
            entity: entity.entity(),
            model: ModelHandle::from_shared(model),
            bindable: true,
            first_dirty,
            mutation: Box::new(move || {
                let mut guard = target.write();
                mutation(&mut *guard)
            }),
        })
    }

    /// Registers a sync with no mutation of its own: whatever the caller
    /// changes on the shared model before flush is what gets written.
    pub fn watch<M: Model>(entity: impl Identity, model: Shared<M>) -> CoreResult<Self> {
        Self::fallible(entity, model, |_: &mut M| Ok(()))
    }

    /// Leaves the relation table untouched when queued.
    pub fn unbound(mut self) -> Self {
        self.bindable = false;
        self
    }

    pub fn entity(&self) -> Entity {
        self.entity
    }

    pub fn model(&self) -> &ModelHandle {
        &self.model
    }

    pub fn bindable(&self) -> bool {
        self.bindable
    }

    /// Field values captured at registration.
    pub fn first_dirty(&self) -> &Snapshot {
        &self.first_dirty
    }

    /// Runs the mutation and returns the changed fields, stamped with the
    /// current time when the model is editable.
    pub fn verify(&mut self) -> CoreResult<Option<Snapshot>> {
        self.verify_at(Utc::now())
    }

    /// [`Self::verify`] with an explicit stamp time.
    pub fn verify_at(&mut self, now: DateTime<Utc>) -> CoreResult<Option<Snapshot>> {
        (self.mutation)()?;

        let mut dirty = self.model.snapshot()?.changes_since(&self.first_dirty);
        if dirty.is_empty() {
            return Ok(None);
        }

        if self.model.capabilities().editable {
            dirty.stamp(&self.model.updated_at_field(), now)?;
        }

        Ok(Some(dirty))
    }
}

impl fmt::Debug for EntitySync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntitySync")
            .field("entity", &self.entity)
            .field("model", &self.model)
            .field("bindable", &self.bindable)
            .field("first_dirty", &self.first_dirty)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
