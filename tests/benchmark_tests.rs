//! Performance benchmarks for critical game systems

use bincode::serialize;
use client::game::ReplicaWorld;
use server::entity::{Entity, EntityStore, Head};
use server::game::GameState;
use server::physics::{detect_overlaps, Radii};
use server::pool::{CapacityPolicy, EntityPool};
use shared::{
    circles_overlap, EntityId, GameConfig, Intent, Packet, Pose, Replicated, Role, Vec2,
    HEAD_RADIUS, SNAPSHOT_CHUNK,
};
use std::time::Instant;

/// Benchmarks the circle overlap primitive
#[test]
fn benchmark_circle_overlap() {
    let a = Vec2::new(1.0, 1.0);
    let b = Vec2::new(1.4, 1.2);

    let iterations = 100_000;
    let start = Instant::now();

    let mut hits = 0;
    for _ in 0..iterations {
        if circles_overlap(&a, HEAD_RADIUS, &b, HEAD_RADIUS) {
            hits += 1;
        }
    }

    let duration = start.elapsed();
    println!(
        "Circle overlap: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert_eq!(hits, iterations);
    assert!(duration.as_millis() < 500);
}

/// Benchmarks replicated writes including change detection
#[test]
fn benchmark_replicated_set() {
    let mut var = Replicated::server_owned(0u32);

    let iterations = 100_000;
    let start = Instant::now();

    for i in 0..iterations {
        var.set(Role::Authority, i / 2).unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Replicated set: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    // Every other write is a no-op
    assert_eq!(var.seq(), iterations / 2 - 1);
    assert!(duration.as_millis() < 500);
}

/// Benchmarks body growth for a long snake
#[test]
fn benchmark_body_growth() {
    let mut store = EntityStore::new();
    let head = store.allocate_id();
    store.insert(Entity::Head(Head::new(head, 1, Vec2::ZERO)));

    let segments = 1_000;
    let start = Instant::now();

    for _ in 0..segments {
        server::body::grow(&mut store, Role::Authority, head).unwrap();
    }

    let duration = start.elapsed();
    println!("Body growth: {} segments in {:?}", segments, duration);

    assert_eq!(*store.head(head).unwrap().length.get(), 1_001);
    assert!(server::body::is_acyclic(&store, head).unwrap());
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks pool churn at full capacity
#[test]
fn benchmark_pool_churn() {
    let mut store = EntityStore::new();
    let mut pool: EntityPool<EntityId> =
        EntityPool::initialize(50, CapacityPolicy::Fixed, &mut store);
    store.drain_outbox();

    let iterations = 10_000;
    let start = Instant::now();

    for i in 0..iterations {
        let (slot, _) = pool
            .acquire(Pose::at(Vec2::new((i % 9) as f32, 0.0)), &mut store)
            .unwrap();
        if pool.active_count() == pool.capacity() {
            pool.release(slot, &mut store).unwrap();
        }
        if i % 100 == 0 {
            store.drain_outbox();
        }
    }

    let duration = start.elapsed();
    println!(
        "Pool churn: {} acquires in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert_eq!(store.pickups().count(), 50);
    assert!(pool.active_count() <= 50);
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks overlap detection on a crowded arena
#[test]
fn benchmark_overlap_detection() {
    let mut game = GameState::with_seed(GameConfig::default(), 42);
    for client in 0..16 {
        let head = game.add_player(client);
        for _ in 0..10 {
            game.grow(head).unwrap();
        }
    }
    for _ in 0..50 {
        game.spawn_pickup().unwrap();
    }
    let radii = Radii::from(game.config());

    let iterations = 200;
    let start = Instant::now();

    for _ in 0..iterations {
        let _ = detect_overlaps(game.store(), radii);
    }

    let duration = start.elapsed();
    println!(
        "Overlap detection: {} passes over {} entities in {:?} ({:.2} μs/pass)",
        iterations,
        game.store().len(),
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 5000);
}

/// Benchmarks full simulation steps with steering players
#[test]
fn benchmark_simulation_step() {
    let mut game = GameState::with_seed(GameConfig::default(), 8);
    let heads: Vec<(u32, EntityId)> = (0..16).map(|c| (c, game.add_player(c))).collect();
    for _ in 0..30 {
        game.spawn_pickup().unwrap();
    }

    let ticks = 300;
    let start = Instant::now();

    for tick in 0..ticks {
        for (client, head) in &heads {
            let angle = (tick as f32 * 0.05) + *client as f32;
            let intent = Intent {
                sequence: tick,
                timestamp: tick as u64,
                head: *head,
                target: Vec2::new(angle.cos() * 8.0, angle.sin() * 4.0),
            };
            let _ = game.submit_intent(*client, &intent);
        }
        game.step(1.0 / 30.0);
        game.tick += 1;
        game.drain_replication();
        game.drain_notifications();
    }

    let duration = start.elapsed();
    println!(
        "Simulation: {} ticks in {:?} ({:.2} μs/tick)",
        ticks,
        duration,
        duration.as_micros() as f64 / ticks as f64
    );

    assert!(duration.as_millis() < 5000);
}

/// Benchmarks snapshot encoding and replica application
#[test]
fn benchmark_snapshot_replication() {
    let mut game = GameState::with_seed(GameConfig::default(), 1);
    for client in 0..8 {
        let head = game.add_player(client);
        for _ in 0..5 {
            game.grow(head).unwrap();
        }
    }
    for _ in 0..30 {
        game.spawn_pickup().unwrap();
    }
    let snapshot = game.snapshot();
    let parts = snapshot.chunks(SNAPSHOT_CHUNK).count() as u16;

    let iterations = 100;
    let start = Instant::now();
    let mut largest = 0;

    for i in 0..iterations {
        let mut replica = ReplicaWorld::new();
        for (part, chunk) in snapshot.chunks(SNAPSHOT_CHUNK).enumerate() {
            let packet = Packet::Snapshot {
                tick: i,
                timestamp: 0,
                part: part as u16,
                parts,
                entities: chunk.to_vec(),
            };
            largest = largest.max(serialize(&packet).unwrap().len());
            replica.apply_snapshot(i, part as u16, parts, chunk.to_vec());
        }
        assert_eq!(replica.len(), snapshot.len());
    }

    let duration = start.elapsed();
    println!(
        "Snapshot replication: {} entities x {} in {:?}, largest datagram {} bytes",
        snapshot.len(),
        iterations,
        duration,
        largest
    );

    assert!(largest < shared::MAX_DATAGRAM);
    assert!(duration.as_millis() < 5000);
}
