//! # Entity Manager
//!
//! Unit of work: collects changes in memory and writes them to a
//! [`DataSource`] in one ordered flush.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         EntityManager                                   │
//! │                                                                         │
//! │  ┌───────────────────┐     ┌──────────────────────────────────────┐    │
//! │  │  RelationTable    │     │  Queues (submission order)           │    │
//! │  │  entity ──► model │     │  links · updates · syncs             │    │
//! │  └───────────────────┘     │  hiddens · destroys · procedures     │    │
//! │                            └──────────────────────────────────────┘    │
//! │                                       │                                 │
//! │                                       ▼ flush()                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │ create ─► update ─► sync ─► hidden ─► destroy ─► procedure       │  │
//! │  │ (each stage a concurrent batch, barrier before the next one)     │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! │                                       │                                 │
//! │                                       ▼ Ok                              │
//! │                                   dispose()                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Routing Rules
//! - `destroy` looks up the bound model. Unbound entities are ignored.
//!   Hideable models are soft-deleted, every other model is hard-deleted.
//! - A sync whose model is also queued for hard deletion is dropped.
//! - A sync that changed nothing makes no DataSource call.
//!
//! ## Failure
//! The first failing call aborts the flush. Nothing is disposed, so the
//! same queues can be flushed again; wrap the flush in a transaction
//! ([`EntityManager::flush_in`]) when a replay must not double-apply.

mod flush;
mod relation;

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use keel_core::{
    EntityLink, EntitySync, EntityUpdate, Identity, Model, ModelHandle, Procedure,
    QueryEntityManager, Shared, Snapshot,
};

use crate::config::ManagerConfig;
use crate::database::Database;
use crate::error::FlushError;
use crate::source::DataSource;

use flush::{run_stage, settle, StageCall};

pub use flush::{FlushReport, FlushStage};
pub use relation::RelationTable;

// =============================================================================
// Pending Work
// =============================================================================

/// Queue lengths of a manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingWork {
    pub links: usize,
    pub updates: usize,
    pub syncs: usize,
    pub hiddens: usize,
    pub destroys: usize,
    pub procedures: usize,
}

impl PendingWork {
    pub fn total(&self) -> usize {
        self.links + self.updates + self.syncs + self.hiddens + self.destroys + self.procedures
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

// =============================================================================
// Entity Manager
// =============================================================================

/// Collects creates, updates, syncs, deletes and procedures, then writes
/// them in a fixed order.
///
/// ## Example
/// ```rust,ignore
/// let mut manager = EntityManager::new(store.clone());
///
/// manager.persist(EntityLink::from_fn(&task, |_| Ok(ModelHandle::new(row))));
/// manager.sync(EntitySync::new(&project, project_row, |p: &mut ProjectRow| {
///     p.task_count += 1;
/// })?);
/// manager.destroy(&old_task);
///
/// let report = manager.flush_in(store.as_ref()).await?;
/// ```
pub struct EntityManager {
    source: Arc<dyn DataSource>,
    config: ManagerConfig,
    relations: RelationTable,
    links: Vec<EntityLink>,
    updates: Vec<EntityUpdate>,
    syncs: Vec<EntitySync>,
    hiddens: Vec<ModelHandle>,
    destroys: Vec<ModelHandle>,
    procedures: Vec<Box<dyn Procedure>>,
}

impl EntityManager {
    /// Creates an empty manager with default settings.
    pub fn new(source: Arc<dyn DataSource>) -> Self {
        Self::with_config(source, ManagerConfig::default())
    }

    pub fn with_config(source: Arc<dyn DataSource>, config: ManagerConfig) -> Self {
        EntityManager {
            source,
            config,
            relations: RelationTable::new(),
            links: Vec::new(),
            updates: Vec::new(),
            syncs: Vec::new(),
            hiddens: Vec::new(),
            destroys: Vec::new(),
            procedures: Vec::new(),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    // =========================================================================
    // Queueing
    // =========================================================================

    /// Queues a create. The factory runs at flush time.
    pub fn persist(&mut self, link: EntityLink) -> &mut Self {
        debug!(entity = %link.entity(), "Queued create");
        self.links.push(link);
        self
    }

    /// Queues an unconditional update, binding the entity first when the
    /// descriptor is bindable.
    pub fn update(&mut self, update: EntityUpdate) -> &mut Self {
        if update.bindable() {
            self.relations.bind(update.entity(), update.model().clone());
        }
        debug!(entity = %update.entity(), model = ?update.model(), "Queued update");
        self.updates.push(update);
        self
    }

    /// Older name of [`Self::update`].
    pub fn refresh(&mut self, update: EntityUpdate) -> &mut Self {
        self.update(update)
    }

    /// Queues a dirty-checked update, binding the entity first when the
    /// descriptor is bindable.
    pub fn sync(&mut self, sync: EntitySync) -> &mut Self {
        if sync.bindable() {
            self.relations.bind(sync.entity(), sync.model().clone());
        }
        debug!(entity = %sync.entity(), model = ?sync.model(), "Queued sync");
        self.syncs.push(sync);
        self
    }

    /// Queues removal of the model bound to `entity`.
    ///
    /// Hideable models go to the soft-delete queue, all others to the
    /// hard-delete queue. Does nothing when `entity` is unbound.
    pub fn destroy(&mut self, entity: &dyn Identity) -> &mut Self {
        let uuid = entity.uuid();
        let Some(model) = self.relations.get(&uuid).cloned() else {
            debug!(entity = %uuid, "Destroy ignored, entity has no model");
            return self;
        };

        if model.capabilities().hideable {
            debug!(entity = %uuid, model = ?model, "Queued soft delete");
            self.hiddens.push(model);
        } else {
            debug!(entity = %uuid, model = ?model, "Queued hard delete");
            self.destroys.push(model);
        }
        self
    }

    /// Queues a backend procedure, run after every other stage.
    pub fn procedure(&mut self, procedure: impl Procedure) -> &mut Self {
        debug!(procedure = procedure.name(), "Queued procedure");
        self.procedures.push(Box::new(procedure));
        self
    }

    /// Binds `entity` to `model`, replacing any earlier binding.
    pub fn relation(&mut self, entity: &dyn Identity, model: impl Into<ModelHandle>) -> &mut Self {
        let model = model.into();
        if let Some(previous) = self.relations.bind(entity.entity(), model.clone()) {
            if !previous.same_model(&model) {
                debug!(entity = %entity.uuid(), replaced = ?previous, "Relation overwritten");
            }
        }
        self
    }

    /// Binds `entity` to `model` and hands the entity back.
    pub fn link<E: Identity>(&mut self, entity: E, model: impl Into<ModelHandle>) -> E {
        self.relation(&entity, model);
        entity
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    pub fn select(&self, entity: &dyn Identity) -> Option<ModelHandle> {
        self.relations.get(&entity.uuid()).cloned()
    }

    /// Typed [`Self::select`]. `None` when unbound or bound to another type.
    pub fn select_as<M: Model>(&self, entity: &dyn Identity) -> Option<Shared<M>> {
        self.select(entity).and_then(|model| model.downcast::<M>())
    }

    pub fn relations(&self) -> &RelationTable {
        &self.relations
    }

    pub fn pending(&self) -> PendingWork {
        PendingWork {
            links: self.links.len(),
            updates: self.updates.len(),
            syncs: self.syncs.len(),
            hiddens: self.hiddens.len(),
            destroys: self.destroys.len(),
            procedures: self.procedures.len(),
        }
    }

    /// True when nothing is queued or bound.
    pub fn is_clean(&self) -> bool {
        self.pending().is_empty() && self.relations.is_empty()
    }

    /// Forgets every relation and queued operation. No I/O.
    pub fn dispose(&mut self) {
        self.relations.clear();
        self.links.clear();
        self.updates.clear();
        self.syncs.clear();
        self.hiddens.clear();
        self.destroys.clear();
        self.procedures.clear();
    }

    // =========================================================================
    // Flush
    // =========================================================================

    /// Writes everything queued, stage by stage, then disposes.
    ///
    /// On error the manager is left untouched apart from relations bound by
    /// the create stage and mutations already applied by syncs.
    pub async fn flush(&mut self) -> Result<FlushReport, FlushError> {
        let report = self.run_pipeline().await?;
        self.dispose();
        Ok(report)
    }

    /// Flushes inside a transaction of `database`.
    ///
    /// Commits on success. On failure the transaction is rolled back and
    /// the queues are kept, so calling this again replays the whole unit.
    pub async fn flush_in(&mut self, database: &dyn Database) -> Result<FlushReport, FlushError> {
        database.transaction().await.map_err(FlushError::Transaction)?;

        let report = match self.run_pipeline().await {
            Ok(report) => report,
            Err(err) => {
                if let Err(rollback) = database.rollback().await {
                    warn!(error = %rollback, "Rollback after failed flush also failed");
                }
                return Err(err);
            }
        };

        if let Err(err) = database.commit().await {
            warn!(error = %err, "Commit failed, rolling back");
            if let Err(rollback) = database.rollback().await {
                warn!(error = %rollback, "Rollback after failed commit also failed");
            }
            return Err(FlushError::Transaction(err));
        }

        self.dispose();
        Ok(report)
    }

    async fn run_pipeline(&mut self) -> Result<FlushReport, FlushError> {
        let started = Instant::now();
        let pending = self.pending();

        info!(
            links = pending.links,
            updates = pending.updates,
            syncs = pending.syncs,
            hiddens = pending.hiddens,
            destroys = pending.destroys,
            procedures = pending.procedures,
            "Flush started"
        );

        let mut report = FlushReport::default();
        let result = self.run_stages(&mut report).await;
        report.elapsed = started.elapsed();

        if let Err(err) = result {
            warn!(
                stage = ?err.stage(),
                error = %err,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "Flush failed, queues kept"
            );
            return Err(err);
        }

        info!(
            calls = report.calls(),
            sync_clean = report.sync_clean,
            sync_skipped = report.sync_skipped,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Flush complete"
        );

        if let Some(threshold) = self.config.slow_flush_threshold() {
            if report.elapsed > threshold {
                warn!(
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    threshold_ms = threshold.as_millis() as u64,
                    "Slow flush"
                );
            }
        }

        Ok(report)
    }

    async fn run_stages(&mut self, report: &mut FlushReport) -> Result<(), FlushError> {
        let limit = self.config.fan_out();

        report.inserted = self.persist_all(limit).await?;
        debug!(stage = %FlushStage::Create, calls = report.inserted, "Stage done");

        report.updated = self.update_all(limit).await?;
        debug!(stage = %FlushStage::Update, calls = report.updated, "Stage done");

        self.sync_all(limit, report).await?;
        debug!(stage = %FlushStage::Sync, calls = report.synced, "Stage done");

        report.hidden = self.hidden_all(limit).await?;
        debug!(stage = %FlushStage::Hidden, calls = report.hidden, "Stage done");

        report.destroyed = self.destroy_all(limit).await?;
        debug!(stage = %FlushStage::Destroy, calls = report.destroyed, "Stage done");

        report.procedures = self.procedure_all(limit).await?;
        debug!(stage = %FlushStage::Procedure, calls = report.procedures, "Stage done");

        Ok(())
    }

    // Each stage boxes its calls into a Vec before awaiting, which keeps the
    // flush future Send (no borrowing iterator adapters live across awaits).

    /// Create stage: every factory, then bindings, then inserts.
    async fn persist_all(&mut self, limit: usize) -> Result<usize, FlushError> {
        let created: Vec<ModelHandle> = {
            let query: &dyn QueryEntityManager = &*self;
            let factories: Vec<StageCall<'_, ModelHandle>> = self
                .links
                .iter()
                .map(|link| {
                    async move {
                        link.create(query)
                            .await
                            .map_err(FlushError::callback(FlushStage::Create))
                    }
                    .boxed()
                })
                .collect();
            settle(limit, factories).await?
        };

        for (link, model) in self.links.iter().zip(&created) {
            if link.bindable() {
                self.relations.bind(link.entity(), model.clone());
            }
        }

        let source = &self.source;
        let inserts: Vec<StageCall<'_, ()>> = created
            .iter()
            .map(|model| {
                async move {
                    source
                        .insert(model)
                        .await
                        .map_err(FlushError::data_source(FlushStage::Create))
                }
                .boxed()
            })
            .collect();
        run_stage(limit, inserts).await
    }

    async fn update_all(&self, limit: usize) -> Result<usize, FlushError> {
        let source = &self.source;
        let calls: Vec<StageCall<'_, ()>> = self
            .updates
            .iter()
            .map(|update| {
                async move {
                    source
                        .update(update.model(), None)
                        .await
                        .map_err(FlushError::data_source(FlushStage::Update))
                }
                .boxed()
            })
            .collect();
        run_stage(limit, calls).await
    }

    async fn sync_all(&mut self, limit: usize, report: &mut FlushReport) -> Result<(), FlushError> {
        let mut dirty: Vec<(ModelHandle, Snapshot)> = Vec::new();

        for sync in self.syncs.iter_mut() {
            if self.destroys.iter().any(|model| model.same_model(sync.model())) {
                debug!(entity = %sync.entity(), "Sync dropped, model is being deleted");
                report.sync_skipped += 1;
                continue;
            }

            match sync
                .verify()
                .map_err(FlushError::callback(FlushStage::Sync))?
            {
                Some(changes) => dirty.push((sync.model().clone(), changes)),
                None => report.sync_clean += 1,
            }
        }

        let source = &self.source;
        let calls: Vec<StageCall<'_, ()>> = dirty
            .iter()
            .map(|(model, changes)| {
                async move {
                    source
                        .update(model, Some(changes))
                        .await
                        .map_err(FlushError::data_source(FlushStage::Sync))
                }
                .boxed()
            })
            .collect();
        report.synced = run_stage(limit, calls).await?;

        Ok(())
    }

    async fn hidden_all(&self, limit: usize) -> Result<usize, FlushError> {
        let source = &self.source;
        let calls: Vec<StageCall<'_, ()>> = self
            .hiddens
            .iter()
            .map(|model| {
                async move {
                    source
                        .hidden(model)
                        .await
                        .map_err(FlushError::data_source(FlushStage::Hidden))
                }
                .boxed()
            })
            .collect();
        run_stage(limit, calls).await
    }

    async fn destroy_all(&self, limit: usize) -> Result<usize, FlushError> {
        let source = &self.source;
        let calls: Vec<StageCall<'_, ()>> = self
            .destroys
            .iter()
            .map(|model| {
                async move {
                    source
                        .delete(model)
                        .await
                        .map_err(FlushError::data_source(FlushStage::Destroy))
                }
                .boxed()
            })
            .collect();
        run_stage(limit, calls).await
    }

    async fn procedure_all(&self, limit: usize) -> Result<usize, FlushError> {
        let source = &self.source;
        let calls: Vec<StageCall<'_, ()>> = self
            .procedures
            .iter()
            .map(|procedure| {
                async move {
                    source
                        .procedure(procedure.as_ref())
                        .await
                        .map_err(FlushError::data_source(FlushStage::Procedure))
                }
                .boxed()
            })
            .collect();
        run_stage(limit, calls).await
    }
}

impl QueryEntityManager for EntityManager {
    fn select(&self, entity: &dyn Identity) -> Option<ModelHandle> {
        EntityManager::select(self, entity)
    }
}

impl fmt::Debug for EntityManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityManager")
            .field("config", &self.config)
            .field("relations", &self.relations.len())
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DbError, DbResult};
    use async_trait::async_trait;
    use keel_core::{shared, Capabilities, CoreError, CoreResult, Entity, ModelId};
    use parking_lot::Mutex;
    use serde::Serialize;
    use std::any::Any;

    #[derive(Debug, Clone, Serialize)]
    struct Post {
        id: i64,
        title: String,
        updated_at: Option<String>,
    }

    impl Model for Post {
        fn id(&self) -> ModelId {
            self.id
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::EDITABLE
        }

        fn snapshot(&self) -> CoreResult<Snapshot> {
            Snapshot::capture(self)
        }
    }

    #[derive(Debug, Clone, Serialize)]
    struct Comment {
        id: i64,
        hidden: bool,
    }

    impl Model for Comment {
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

    #[derive(Debug)]
    struct Reindex;

    impl Procedure for Reindex {
        fn name(&self) -> &str {
            "reindex"
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    /// Records every call as "<operation>:<id>".
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        dirty: Mutex<Vec<Vec<String>>>,
        fail_delete: bool,
    }

    impl Recorder {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl DataSource for Recorder {
        async fn insert(&self, model: &ModelHandle) -> DbResult<()> {
            self.calls.lock().push(format!("insert:{}", model.id()));
            Ok(())
        }

        async fn update(&self, model: &ModelHandle, dirty: Option<&Snapshot>) -> DbResult<()> {
            match dirty {
                Some(changes) => {
                    self.calls.lock().push(format!("sync:{}", model.id()));
                    self.dirty
                        .lock()
                        .push(changes.keys().map(str::to_string).collect());
                }
                None => self.calls.lock().push(format!("update:{}", model.id())),
            }
            Ok(())
        }

        async fn delete(&self, model: &ModelHandle) -> DbResult<()> {
            if self.fail_delete {
                return Err(DbError::not_found(model.type_name(), model.id()));
            }
            self.calls.lock().push(format!("delete:{}", model.id()));
            Ok(())
        }

        async fn hidden(&self, model: &ModelHandle) -> DbResult<()> {
            self.calls.lock().push(format!("hidden:{}", model.id()));
            Ok(())
        }

        async fn procedure(&self, procedure: &dyn Procedure) -> DbResult<()> {
            self.calls.lock().push(format!("procedure:{}", procedure.name()));
            Ok(())
        }
    }

    fn post(id: i64) -> Shared<Post> {
        shared(Post {
            id,
            title: format!("post {id}"),
            updated_at: None,
        })
    }

    fn manager() -> (Arc<Recorder>, EntityManager) {
        let recorder = Arc::new(Recorder::default());
        let manager = EntityManager::new(recorder.clone());
        (recorder, manager)
    }

    #[tokio::test]
    async fn test_stages_run_in_order() {
        let (recorder, mut manager) = manager();

        let doomed = manager.link(Entity::new(), post(4));
        let archived = manager.link(
            Entity::new(),
            ModelHandle::new(Comment {
                id: 5,
                hidden: false,
            }),
        );

        manager
            .procedure(Reindex)
            .destroy(&doomed)
            .destroy(&archived)
            .sync(
                EntitySync::new(Entity::new(), post(3), |p: &mut Post| {
                    p.title = "edited".to_string();
                })
                .unwrap(),
            )
            .update(EntityUpdate::new(Entity::new(), post(2)))
            .persist(EntityLink::from_fn(Entity::new(), |_| {
                Ok(ModelHandle::new(Post {
                    id: 1,
                    title: "new".to_string(),
                    updated_at: None,
                }))
            }));

        let report = manager.flush().await.unwrap();

        assert_eq!(
            recorder.calls(),
            vec![
                "insert:1",
                "update:2",
                "sync:3",
                "hidden:5",
                "delete:4",
                "procedure:reindex"
            ]
        );
        assert_eq!(report.calls(), 6);
        assert!(manager.is_clean());
    }

    #[tokio::test]
    async fn test_hideable_is_never_hard_deleted() {
        let (recorder, mut manager) = manager();
        let comment = manager.link(
            Entity::new(),
            ModelHandle::new(Comment {
                id: 9,
                hidden: false,
            }),
        );

        manager.destroy(&comment);
        assert_eq!(manager.pending().hiddens, 1);
        assert_eq!(manager.pending().destroys, 0);

        manager.flush().await.unwrap();
        assert_eq!(recorder.calls(), vec!["hidden:9"]);
    }

    #[tokio::test]
    async fn test_destroy_unbound_is_noop() {
        let (recorder, mut manager) = manager();
        manager.destroy(&Entity::new());

        assert!(manager.pending().is_empty());
        let report = manager.flush().await.unwrap();
        assert_eq!(report.calls(), 0);
        assert!(recorder.calls().is_empty());
    }

    #[tokio::test]
    async fn test_clean_sync_makes_no_call() {
        let (recorder, mut manager) = manager();
        manager.sync(EntitySync::watch(Entity::new(), post(1)).unwrap());

        let report = manager.flush().await.unwrap();
        assert_eq!(report.sync_clean, 1);
        assert_eq!(report.synced, 0);
        assert!(recorder.calls().is_empty());
    }

    #[tokio::test]
    async fn test_sync_sends_changed_fields_and_stamp() {
        let (recorder, mut manager) = manager();
        manager.sync(
            EntitySync::new(Entity::new(), post(1), |p: &mut Post| {
                p.title = "renamed".to_string();
            })
            .unwrap(),
        );

        manager.flush().await.unwrap();
        assert_eq!(
            recorder.dirty.lock().clone(),
            vec![vec!["title".to_string(), "updated_at".to_string()]]
        );
    }

    #[tokio::test]
    async fn test_destroy_wins_over_sync() {
        let (recorder, mut manager) = manager();
        let entity = Entity::new();
        let model = post(7);

        manager.sync(
            EntitySync::new(entity, model, |p: &mut Post| {
                p.title = "never written".to_string();
            })
            .unwrap(),
        );
        manager.destroy(&entity);

        let report = manager.flush().await.unwrap();
        assert_eq!(report.sync_skipped, 1);
        assert_eq!(recorder.calls(), vec!["delete:7"]);
    }

    #[tokio::test]
    async fn test_factory_sees_existing_relations() {
        let (_, mut manager) = manager();
        let parent = manager.link(Entity::new(), post(10));
        let child = Entity::new();

        manager.persist(EntityLink::from_fn(child, move |query| {
            let parent = query
                .select_as::<Post>(&parent)
                .ok_or_else(|| CoreError::callback("parent not bound"))?;
            let id = parent.read().id + 1;
            Ok(ModelHandle::new(Post {
                id,
                title: "child".to_string(),
                updated_at: None,
            }))
        }));

        let report = manager.flush().await.unwrap();
        assert_eq!(report.inserted, 1);
    }

    #[tokio::test]
    async fn test_create_binds_unless_unbound() {
        let (recorder, mut manager) = manager();
        let bound = Entity::new();
        let loose = Entity::new();

        manager
            .persist(EntityLink::from_fn(bound, |_| Ok(ModelHandle::from_shared(post(1)))))
            .persist(EntityLink::from_fn(loose, |_| Ok(ModelHandle::from_shared(post(2)))).unbound())
            .destroy(&bound);

        // destroy ran before the create bound anything
        assert_eq!(manager.pending().destroys, 0);

        manager.run_pipeline().await.unwrap();
        assert!(manager.select(&bound).is_some());
        assert!(manager.select(&loose).is_none());
        assert_eq!(recorder.calls(), vec!["insert:1", "insert:2"]);
    }

    #[tokio::test]
    async fn test_failed_stage_keeps_queues() {
        let recorder = Arc::new(Recorder {
            fail_delete: true,
            ..Default::default()
        });
        let mut manager = EntityManager::new(recorder.clone());
        let entity = manager.link(Entity::new(), post(1));
        manager.destroy(&entity).procedure(Reindex);

        let err = manager.flush().await.unwrap_err();
        assert_eq!(err.stage(), Some(FlushStage::Destroy));
        assert_eq!(manager.pending().destroys, 1);
        assert_eq!(manager.pending().procedures, 1);
        assert!(manager.select(&entity).is_some());
        assert!(recorder.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failing_factory_aborts_before_inserts() {
        let (recorder, mut manager) = manager();
        manager.persist(EntityLink::from_fn(Entity::new(), |_| {
            Err(CoreError::callback("no id available"))
        }));

        let err = manager.flush().await.unwrap_err();
        assert!(matches!(
            err,
            FlushError::Callback {
                stage: FlushStage::Create,
                ..
            }
        ));
        assert!(recorder.calls().is_empty());
        assert_eq!(manager.pending().links, 1);
    }

    #[test]
    fn test_relation_overwrite_and_select_as() {
        let (_, mut manager) = manager();
        let entity = Entity::new();
        let first = post(1);
        let second = post(2);

        manager.relation(&entity, first);
        manager.relation(&entity, second.clone());

        let selected = manager.select_as::<Post>(&entity).unwrap();
        assert!(Arc::ptr_eq(&selected, &second));
        assert!(manager.select_as::<Comment>(&entity).is_none());
        assert_eq!(manager.relations().len(), 1);
    }

    #[test]
    fn test_unbound_update_leaves_relations() {
        let (_, mut manager) = manager();
        let entity = Entity::new();
        manager.update(EntityUpdate::new(entity, post(1)).unbound());

        assert!(manager.select(&entity).is_none());
        assert_eq!(manager.pending().updates, 1);

        manager.dispose();
        assert!(manager.is_clean());
    }

    #[test]
    fn test_bindable_update_binds_on_queue() {
        let (_, mut manager) = manager();
        let entity = Entity::new();
        let model = ModelHandle::from_shared(post(1));

        manager.update(EntityUpdate::new(entity, model.clone()));

        let selected = manager.select(&entity).unwrap();
        assert!(selected.same_model(&model));
        assert_eq!(manager.pending().updates, 1);
    }

    #[test]
    fn test_bindable_sync_binds_on_queue() {
        let (_, mut manager) = manager();
        let entity = Entity::new();
        let model = post(1);

        manager.sync(EntitySync::watch(entity, model.clone()).unwrap());

        let selected = manager.select_as::<Post>(&entity).unwrap();
        assert!(Arc::ptr_eq(&selected, &model));
        assert_eq!(manager.pending().syncs, 1);
    }

    #[tokio::test]
    async fn test_flush_runs_in_spawned_task() {
        let (recorder, mut manager) = manager();
        manager
            .update(EntityUpdate::new(Entity::new(), post(1)))
            .persist(EntityLink::from_fn(Entity::new(), |_| {
                Ok(ModelHandle::from_shared(post(2)))
            }))
            .procedure(Reindex);

        let handle = tokio::spawn(async move {
            let report = manager.flush().await?;
            Ok::<_, FlushError>((report.calls(), manager.is_clean()))
        });

        let (calls, clean) = handle.await.unwrap().unwrap();
        assert_eq!(calls, 3);
        assert!(clean);
        assert_eq!(
            recorder.calls(),
            vec!["insert:2", "update:1", "procedure:reindex"]
        );
    }

    /// Update of id 1 fails at once, every other update sleeps before recording.
    #[derive(Default)]
    struct Staggered {
        settled: Mutex<Vec<ModelId>>,
    }

    #[async_trait]
    impl DataSource for Staggered {
        async fn insert(&self, _model: &ModelHandle) -> DbResult<()> {
            Ok(())
        }

        async fn update(&self, model: &ModelHandle, _dirty: Option<&Snapshot>) -> DbResult<()> {
            let id = model.id();
            if id == 1 {
                return Err(DbError::not_found(model.type_name(), id));
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            self.settled.lock().push(id);
            Ok(())
        }

        async fn delete(&self, _model: &ModelHandle) -> DbResult<()> {
            Ok(())
        }

        async fn hidden(&self, _model: &ModelHandle) -> DbResult<()> {
            Ok(())
        }

        async fn procedure(&self, _procedure: &dyn Procedure) -> DbResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failed_update_lets_started_siblings_finish() {
        let source = Arc::new(Staggered::default());
        let mut manager = EntityManager::new(source.clone());
        manager
            .update(EntityUpdate::new(Entity::new(), post(1)))
            .update(EntityUpdate::new(Entity::new(), post(2)));

        let err = manager.flush().await.unwrap_err();

        assert_eq!(err.stage(), Some(FlushStage::Update));
        assert_eq!(source.settled.lock().clone(), vec![2]);
        assert_eq!(manager.pending().updates, 2);
    }
}
