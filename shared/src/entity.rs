use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{ClientId, Vec2};

/// Stable identity of a networked entity. Never reused within one authority
/// process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u32);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Kind-specific, immutable facts about an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    Head {
        owner: ClientId,
    },
    Segment {
        /// Owning head. A plain id, the head may be destroyed first
        head: EntityId,
        /// Entity immediately ahead in the chain
        follow: EntityId,
        /// 1-based position in the chain, 1 is next to the head
        index: u16,
    },
    Pickup {
        slot: u32,
    },
}

impl EntityKind {
    pub fn name(&self) -> &'static str {
        match self {
            EntityKind::Head { .. } => "head",
            EntityKind::Segment { .. } => "segment",
            EntityKind::Pickup { .. } => "pickup",
        }
    }
}

/// Names a replicated field of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Field {
    Position,
    Rotation,
    Alive,
    Length,
    Visible,
    Active,
}

/// A replicated field's value as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Position(Vec2),
    Rotation(f32),
    Alive(bool),
    Length(u16),
    Visible(bool),
    Active(bool),
}

impl FieldValue {
    pub fn field(&self) -> Field {
        match self {
            FieldValue::Position(_) => Field::Position,
            FieldValue::Rotation(_) => Field::Rotation,
            FieldValue::Alive(_) => Field::Alive,
            FieldValue::Length(_) => Field::Length,
            FieldValue::Visible(_) => Field::Visible,
            FieldValue::Active(_) => Field::Active,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldState {
    pub seq: u32,
    pub value: FieldValue,
}

/// Everything a replica needs to mirror one entity from scratch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: EntityId,
    pub kind: EntityKind,
    pub fields: Vec<FieldState>,
}

impl EntitySnapshot {
    pub fn field(&self, field: Field) -> Option<&FieldState> {
        self.fields.iter().find(|state| state.value.field() == field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_value_maps_to_field() {
        assert_eq!(FieldValue::Alive(false).field(), Field::Alive);
        assert_eq!(FieldValue::Length(3).field(), Field::Length);
        assert_eq!(
            FieldValue::Position(Vec2::new(1.0, 2.0)).field(),
            Field::Position
        );
    }

    #[test]
    fn test_snapshot_field_lookup() {
        let snapshot = EntitySnapshot {
            id: EntityId(4),
            kind: EntityKind::Head { owner: 1 },
            fields: vec![
                FieldState {
                    seq: 2,
                    value: FieldValue::Alive(true),
                },
                FieldState {
                    seq: 5,
                    value: FieldValue::Length(3),
                },
            ],
        };

        assert_eq!(snapshot.field(Field::Length).map(|s| s.seq), Some(5));
        assert!(snapshot.field(Field::Visible).is_none());
    }

    #[test]
    fn test_entity_id_display() {
        assert_eq!(EntityId(12).to_string(), "#12");
    }
}
