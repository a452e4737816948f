//! Entity → model relation table.
//!
//! At most one model per entity. Binding an entity that is already bound
//! replaces the previous model (last write wins, no merge) and hands the
//! replaced handle back to the caller.

use std::collections::HashMap;

use uuid::Uuid;

use keel_core::{Entity, Identity, ModelHandle};

#[derive(Debug, Clone, Default)]
pub struct RelationTable {
    relations: HashMap<Uuid, ModelHandle>,
}

impl RelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `entity` to `model`, returning the model it replaced.
    pub fn bind(&mut self, entity: Entity, model: ModelHandle) -> Option<ModelHandle> {
        self.relations.insert(entity.uuid(), model)
    }

    pub fn get(&self, uuid: &Uuid) -> Option<&ModelHandle> {
        self.relations.get(uuid)
    }

    pub fn len(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Entity, &ModelHandle)> {
        self.relations
            .iter()
            .map(|(uuid, model)| (Entity::from_uuid(*uuid), model))
    }

    pub fn clear(&mut self) {
        self.relations.clear();
    }
}
