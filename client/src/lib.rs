//! # Snake Arena Client Library
//!
//! A headless participant. It never writes game state; it mirrors what the
//! authority replicates and submits steering intents for its own head.
//!
//! ## Module Organization
//!
//! ### Game Module (`game`)
//! The replica world:
//! - Mirrored fields that only accept newer sequence numbers
//! - Snapshot and delta application with despawn tombstones
//! - Notification dedup and ordering against the loser's `alive` commit
//! - Display interpolation
//!
//! ### Steering Module (`steering`)
//! Picks a target (nearest active pickup, else a wander point) and packages
//! it as a sequenced, timestamped intent.
//!
//! ### Network Module (`network`)
//! UDP connection handling, notification acknowledgement and the client loop.
//!
//! ## Usage Example
//!
//! ```rust
//! use client::game::ReplicaWorld;
//! use client::steering::SteeringController;
//! use shared::WorldBounds;
//!
//! let world = ReplicaWorld::new();
//! let mut steering = SteeringController::new(WorldBounds::default());
//!
//! // Nothing to steer until the server assigns a head
//! assert!(steering.update(&world).is_none());
//! ```

pub mod game;
pub mod network;
pub mod steering;
