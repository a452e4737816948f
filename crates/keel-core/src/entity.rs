//! # Entities
//!
//! An entity is an identity token and nothing else. The unit of work uses
//! its UUID as the key of the relation table; it never owns or inspects the
//! rest of a domain object.
//!
//! ```text
//! ┌──────────────────────┐        ┌──────────────────────┐
//! │  Domain object       │        │  Relation table      │
//! │  ──────────────────  │ uuid() │  ──────────────────  │
//! │  uuid (Identity)     │───────►│  Uuid ──► Model      │
//! │  title, due, ...     │        │                      │
//! └──────────────────────┘        └──────────────────────┘
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

// =============================================================================
// Identity
// =============================================================================

/// Anything that can be tracked by an entity manager.
///
/// Domain types either embed an [`Entity`] or carry their own UUID and
/// implement this trait directly.
pub trait Identity {
    /// Stable identifier of this entity.
    fn uuid(&self) -> Uuid;

    /// Returns the bare identity token.
    fn entity(&self) -> Entity {
        Entity::from_uuid(self.uuid())
    }
}

// =============================================================================
// Entity
// =============================================================================

/// Bare identity token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Entity {
    uuid: Uuid,
}

impl Entity {
    /// Creates an entity with a fresh UUID v4.
    pub fn new() -> Self {
        Entity {
            uuid: Uuid::new_v4(),
        }
    }

    /// Wraps an existing UUID.
    #[inline]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Entity { uuid }
    }
}

impl Default for Entity {
    fn default() -> Self {
        Entity::new()
    }
}

impl Identity for Entity {
    #[inline]
    fn uuid(&self) -> Uuid {
        self.uuid
    }
}

impl<T: Identity + ?Sized> Identity for &T {
    fn uuid(&self) -> Uuid {
        (**self).uuid()
    }
}

impl From<Uuid> for Entity {
    fn from(uuid: Uuid) -> Self {
        Entity::from_uuid(uuid)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uuid)
    }
}

impl FromStr for Entity {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Entity::from_uuid)
            .map_err(|e| CoreError::InvalidIdentity {
                value: s.to_string(),
                reason: e.to_string(),
            })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct Customer {
        uuid: Uuid,
    }

    impl Identity for Customer {
        fn uuid(&self) -> Uuid {
            self.uuid
        }
    }

    #[test]
    fn test_new_entities_are_unique() {
        assert_ne!(Entity::new(), Entity::new());
    }

    #[test]
    fn test_parse_round_trips_display() {
        let entity = Entity::new();
        let parsed: Entity = entity.to_string().parse().unwrap();
        assert_eq!(parsed, entity);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = "not-a-uuid".parse::<Entity>().unwrap_err();
        assert!(matches!(err, CoreError::InvalidIdentity { .. }));
    }

    #[test]
    fn test_domain_type_exposes_entity() {
        let uuid = Uuid::new_v4();
        let customer = Customer { uuid };
        assert_eq!(customer.entity(), Entity::from_uuid(uuid));
        assert_eq!((&customer).uuid(), uuid);
    }
}
