//! # Snake Arena Server Library
//!
//! The authoritative half of the arena. It owns the only writable copy of the
//! world, applies movement intents from connected clients, resolves
//! collisions, and replicates every committed change to all participants.
//!
//! ## Module Organization
//!
//! ### Entity Store (`entity`)
//! Heads, segments and pickups as one tagged variant in a single ordered
//! map. Every replicated write goes through the store, which enforces the
//! field's write policy and queues the change for fan-out in commit order.
//!
//! ### Entity Pool (`pool`)
//! A fixed set of pickup instances created at startup and toggled between
//! active and free, never destroyed.
//!
//! ### Segmented Body (`body`)
//! Growth, visibility and follow movement for the chain behind each head.
//!
//! ### Collision Resolver (`collision`, `physics`, `notifier`)
//! Circle overlaps produce `(initiator, other)` events. The resolver decides
//! each one deterministically, commits the outcome atomically and queues
//! targeted notifications for the two participants involved.
//!
//! ### Lifecycle (`lifecycle`)
//! Initial pickup batch, head creation on join, teardown on leave, and the
//! participant-keyed spawn task.
//!
//! ### Networking (`client_manager`, `network`)
//! UDP transport, per-client intent buffering and notification
//! acknowledgement, and the fixed-rate tick loop.
//!
//! ## Concurrency
//!
//! Only the tick loop mutates game state. The receiver, sender, timeout
//! checker and spawn tasks talk to it through a single message queue, so the
//! pool and the entity store need no locks.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Server;
//! use shared::GameConfig;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new(
//!         "127.0.0.1:8080",
//!         Duration::from_millis(33), // 30Hz
//!         GameConfig::default(),
//!     ).await?;
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod body;
pub mod client_manager;
pub mod collision;
pub mod entity;
pub mod game;
pub mod lifecycle;
pub mod network;
pub mod notifier;
pub mod physics;
pub mod pool;
