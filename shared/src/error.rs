use thiserror::Error;

use crate::entity::EntityId;
use crate::replicated::Role;
use crate::ClientId;

/// Violations detected by the authoritative core.
///
/// None of these is fatal. Each is contained where it is detected, logged,
/// and never forwarded to other participants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A write was attempted by a role the variable's write policy excludes
    #[error("{role:?} may not {operation}")]
    PermissionDenied {
        role: Role,
        operation: &'static str,
    },

    /// Every slot of a fixed-capacity pool is active
    #[error("pool exhausted: all {capacity} slots are active")]
    PoolExhausted { capacity: usize },

    /// An event or command names an entity that no longer participates
    #[error("entity {0} is destroyed, recycled or out of play")]
    StaleReference(EntityId),

    /// A movement intent references an entity the sender does not own
    #[error("client {client} does not own entity {entity}")]
    UnauthorizedIntent { client: ClientId, entity: EntityId },

    /// A pool slot was released while already free
    #[error("pool slot {0} is not active")]
    SlotNotActive(u32),

    /// An id refers to an entity of a different kind than the operation needs
    #[error("entity {entity} is not a {expected}")]
    WrongKind {
        entity: EntityId,
        expected: &'static str,
    },

    /// A head is already at the longest length the wire format can carry
    #[error("head {head} is at its maximum length {max}")]
    LengthOverflow { head: EntityId, max: u16 },
}

/// Invalid startup configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("world bounds are empty: x [{min_x}, {max_x}], y [{min_y}, {max_y}]")]
    EmptyBounds {
        min_x: f32,
        max_x: f32,
        min_y: f32,
        max_y: f32,
    },

    #[error("{field} must be greater than zero")]
    NotPositive { field: &'static str },

    #[error("initial pickup batch {initial} exceeds pickup capacity {capacity}")]
    InitialBatchTooLarge { initial: usize, capacity: usize },
}
