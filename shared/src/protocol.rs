//! Messages exchanged between the authority and its participants.
//!
//! Clients only ever send intents and acknowledgements. Everything the
//! authority sends is already validated: replication traffic is fanned out to
//! every connected participant, notifications are unicast to the one
//! participant they concern.

use serde::{Deserialize, Serialize};

use crate::entity::{EntityId, EntitySnapshot, FieldValue};
use crate::{ClientId, Vec2};

pub const PROTOCOL_VERSION: u32 = 1;

/// Largest UDP payload either side will send or accept.
pub const MAX_DATAGRAM: usize = 65_507;

/// Entities per snapshot datagram.
pub const SNAPSHOT_CHUNK: usize = 64;

/// Replication events per delta datagram.
pub const DELTA_CHUNK: usize = 128;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    Connect {
        client_version: u32,
    },
    Intent(Intent),
    NotificationAck {
        id: u64,
    },
    Disconnect,

    Connected {
        client_id: ClientId,
        head: EntityId,
    },
    /// Every live entity with per-field sequence numbers, split into
    /// `parts` datagrams
    Snapshot {
        tick: u32,
        timestamp: u64,
        part: u16,
        parts: u16,
        entities: Vec<EntitySnapshot>,
    },
    /// Replication events committed during one tick, in commit order
    Delta {
        tick: u32,
        events: Vec<Replication>,
    },
    Notify(Notification),
    Disconnected {
        reason: String,
    },
}

/// Desired steering target for the sender's own head.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Intent {
    pub sequence: u32,
    pub timestamp: u64,
    pub head: EntityId,
    pub target: Vec2,
}

/// One committed change to a replicated field.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct VarUpdate {
    pub entity: EntityId,
    pub seq: u32,
    pub value: FieldValue,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Replication {
    Spawn(EntitySnapshot),
    Update(VarUpdate),
    Despawn(EntityId),
}

impl Replication {
    pub fn entity(&self) -> EntityId {
        match self {
            Replication::Spawn(snapshot) => snapshot.id,
            Replication::Update(update) => update.entity,
            Replication::Despawn(id) => *id,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    AteOpponent,
    Eliminated,
}

/// Outcome report sent to exactly one participant.
///
/// `loser_alive_seq` is the sequence number of the loser's `alive = false`
/// commit. Replicas hold the notification back until they have applied it.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct Notification {
    pub id: u64,
    pub recipient: ClientId,
    pub kind: NotificationKind,
    pub winner: EntityId,
    pub loser: EntityId,
    pub loser_alive_seq: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityKind, FieldState};

    #[test]
    fn test_packet_serialization_intent() {
        let packet = Packet::Intent(Intent {
            sequence: 123,
            timestamp: 456789,
            head: EntityId(9),
            target: Vec2::new(1.5, -2.0),
        });

        let serialized = bincode::serialize(&packet).unwrap();
        let deserialized: Packet = bincode::deserialize(&serialized).unwrap();

        assert_eq!(deserialized, packet);
    }

    #[test]
    fn test_packet_serialization_delta() {
        let packet = Packet::Delta {
            tick: 42,
            events: vec![
                Replication::Spawn(EntitySnapshot {
                    id: EntityId(3),
                    kind: EntityKind::Segment {
                        head: EntityId(1),
                        follow: EntityId(1),
                        index: 1,
                    },
                    fields: vec![FieldState {
                        seq: 0,
                        value: FieldValue::Visible(true),
                    }],
                }),
                Replication::Update(VarUpdate {
                    entity: EntityId(1),
                    seq: 4,
                    value: FieldValue::Length(2),
                }),
                Replication::Despawn(EntityId(7)),
            ],
        };

        let serialized = bincode::serialize(&packet).unwrap();
        let deserialized: Packet = bincode::deserialize(&serialized).unwrap();

        match deserialized {
            Packet::Delta { tick, events } => {
                assert_eq!(tick, 42);
                assert_eq!(events.len(), 3);
                assert_eq!(events[0].entity(), EntityId(3));
                assert_eq!(events[1].entity(), EntityId(1));
                assert_eq!(events[2].entity(), EntityId(7));
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_truncated_packet_rejected() {
        let packet = Packet::Notify(Notification {
            id: 1,
            recipient: 2,
            kind: NotificationKind::Eliminated,
            winner: EntityId(5),
            loser: EntityId(6),
            loser_alive_seq: 1,
        });
        let data = bincode::serialize(&packet).unwrap();

        let result: Result<Packet, _> = bincode::deserialize(&data[..data.len() / 2]);
        assert!(result.is_err());
    }
}
