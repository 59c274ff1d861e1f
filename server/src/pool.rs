//! Fixed set of reusable entity instances.
//!
//! All instances are created up front, while the authority starts, so spawning
//! during play never allocates a new entity. Acquiring a slot activates its
//! instance at a pose; releasing it deactivates the instance and puts the slot
//! back on the free list. Instances are never destroyed.

use log::debug;
use shared::{CoreError, Pose};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PoolSlot(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityPolicy {
    /// Acquiring with every slot active fails with `PoolExhausted`
    Fixed,
    /// Acquiring with every slot active creates one more instance
    Growable,
}

/// Creates and toggles the pooled instances.
pub trait PoolHost<K> {
    /// Creates one instance in the inactive state.
    fn create(&mut self, slot: PoolSlot) -> K;
    fn activate(&mut self, item: &K, pose: Pose);
    fn deactivate(&mut self, item: &K);
}

#[derive(Debug)]
struct PoolEntry<K> {
    item: K,
    active: bool,
}

#[derive(Debug)]
pub struct EntityPool<K> {
    entries: Vec<PoolEntry<K>>,
    /// Inactive slot indices, reused most recently released first
    free: Vec<u32>,
    capacity: usize,
    policy: CapacityPolicy,
    active: usize,
}

impl<K: Copy> EntityPool<K> {
    /// Creates `capacity` inactive instances through `host`.
    pub fn initialize(
        capacity: usize,
        policy: CapacityPolicy,
        host: &mut impl PoolHost<K>,
    ) -> Self {
        let entries: Vec<PoolEntry<K>> = (0..capacity)
            .map(|index| PoolEntry {
                item: host.create(PoolSlot(index as u32)),
                active: false,
            })
            .collect();
        let free = (0..capacity as u32).rev().collect();

        debug!("Pool initialized with {} inactive instances", capacity);

        Self {
            entries,
            free,
            capacity,
            policy,
            active: 0,
        }
    }

    /// Activates a free instance at `pose`.
    pub fn acquire(
        &mut self,
        pose: Pose,
        host: &mut impl PoolHost<K>,
    ) -> Result<(PoolSlot, K), CoreError> {
        let index = match self.free.pop() {
            Some(index) => index,
            None if self.policy == CapacityPolicy::Growable => {
                let index = self.entries.len() as u32;
                self.entries.push(PoolEntry {
                    item: host.create(PoolSlot(index)),
                    active: false,
                });
                self.capacity = self.entries.len();
                debug!("Pool grew to {} instances", self.capacity);
                index
            }
            None => {
                return Err(CoreError::PoolExhausted {
                    capacity: self.capacity,
                })
            }
        };

        let entry = &mut self.entries[index as usize];
        entry.active = true;
        self.active += 1;
        host.activate(&entry.item, pose);

        Ok((PoolSlot(index), entry.item))
    }

    /// Deactivates the instance in `slot` and makes the slot reusable.
    pub fn release(&mut self, slot: PoolSlot, host: &mut impl PoolHost<K>) -> Result<K, CoreError> {
        let entry = self
            .entries
            .get_mut(slot.0 as usize)
            .filter(|entry| entry.active)
            .ok_or(CoreError::SlotNotActive(slot.0))?;

        entry.active = false;
        self.active -= 1;
        self.free.push(slot.0);
        host.deactivate(&entry.item);

        Ok(entry.item)
    }

    pub fn is_active(&self, slot: PoolSlot) -> bool {
        self.entries
            .get(slot.0 as usize)
            .map_or(false, |entry| entry.active)
    }

    pub fn item(&self, slot: PoolSlot) -> Option<K> {
        self.entries.get(slot.0 as usize).map(|entry| entry.item)
    }

    pub fn active_items(&self) -> Vec<(PoolSlot, K)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.active)
            .map(|(index, entry)| (PoolSlot(index as u32), entry.item))
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.active
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> CapacityPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Vec2;

    #[derive(Default)]
    struct MockHost {
        created: u32,
        active: Vec<bool>,
        activations: Vec<(u32, Vec2)>,
    }

    impl PoolHost<u32> for MockHost {
        fn create(&mut self, slot: PoolSlot) -> u32 {
            assert_eq!(slot.0, self.created);
            self.created += 1;
            self.active.push(false);
            100 + slot.0
        }

        fn activate(&mut self, item: &u32, pose: Pose) {
            self.active[(*item - 100) as usize] = true;
            self.activations.push((*item, pose.position));
        }

        fn deactivate(&mut self, item: &u32) {
            self.active[(*item - 100) as usize] = false;
        }
    }

    #[test]
    fn test_initialize_creates_inactive_instances() {
        let mut host = MockHost::default();
        let pool = EntityPool::initialize(5, CapacityPolicy::Fixed, &mut host);

        assert_eq!(host.created, 5);
        assert!(host.active.iter().all(|active| !active));
        assert_eq!(pool.active_count(), 0);
        assert_eq!(pool.free_count(), 5);
    }

    #[test]
    fn test_acquire_activates_at_pose() {
        let mut host = MockHost::default();
        let mut pool = EntityPool::initialize(3, CapacityPolicy::Fixed, &mut host);

        let (slot, item) = pool
            .acquire(Pose::at(Vec2::new(2.0, -1.0)), &mut host)
            .unwrap();

        assert_eq!(slot, PoolSlot(0));
        assert_eq!(item, 100);
        assert!(pool.is_active(slot));
        assert_eq!(host.activations, vec![(100, Vec2::new(2.0, -1.0))]);
    }

    #[test]
    fn test_fixed_pool_exhaustion() {
        let mut host = MockHost::default();
        let mut pool = EntityPool::initialize(2, CapacityPolicy::Fixed, &mut host);

        pool.acquire(Pose::default(), &mut host).unwrap();
        pool.acquire(Pose::default(), &mut host).unwrap();
        let result = pool.acquire(Pose::default(), &mut host);

        assert_eq!(result, Err(CoreError::PoolExhausted { capacity: 2 }));
        assert_eq!(host.created, 2);
    }

    #[test]
    fn test_growable_pool_creates_on_demand() {
        let mut host = MockHost::default();
        let mut pool = EntityPool::initialize(1, CapacityPolicy::Growable, &mut host);

        pool.acquire(Pose::default(), &mut host).unwrap();
        let (slot, _) = pool.acquire(Pose::default(), &mut host).unwrap();

        assert_eq!(slot, PoolSlot(1));
        assert_eq!(pool.capacity(), 2);
        assert_eq!(host.created, 2);
    }

    #[test]
    fn test_release_returns_slot_for_reuse() {
        let mut host = MockHost::default();
        let mut pool = EntityPool::initialize(2, CapacityPolicy::Fixed, &mut host);

        let (first, _) = pool.acquire(Pose::default(), &mut host).unwrap();
        pool.acquire(Pose::default(), &mut host).unwrap();
        pool.release(first, &mut host).unwrap();

        assert!(!host.active[0]);
        let (reused, item) = pool.acquire(Pose::default(), &mut host).unwrap();
        assert_eq!(reused, first);
        assert_eq!(item, 100);
    }

    #[test]
    fn test_release_inactive_slot_rejected() {
        let mut host = MockHost::default();
        let mut pool = EntityPool::initialize(2, CapacityPolicy::Fixed, &mut host);

        assert_eq!(
            pool.release(PoolSlot(1), &mut host),
            Err(CoreError::SlotNotActive(1))
        );
        assert_eq!(
            pool.release(PoolSlot(9), &mut host),
            Err(CoreError::SlotNotActive(9))
        );
    }

    #[test]
    fn test_interleaved_use_never_exceeds_capacity() {
        let mut host = MockHost::default();
        let mut pool = EntityPool::initialize(50, CapacityPolicy::Fixed, &mut host);
        let mut held = Vec::new();

        for round in 0..200 {
            if round % 3 == 2 {
                if let Some(slot) = held.pop() {
                    pool.release(slot, &mut host).unwrap();
                }
            } else {
                match pool.acquire(Pose::default(), &mut host) {
                    Ok((slot, _)) => held.push(slot),
                    Err(e) => assert_eq!(e, CoreError::PoolExhausted { capacity: 50 }),
                }
            }
            assert!(pool.active_count() <= 50);
            assert_eq!(pool.active_count() + pool.free_count(), 50);
        }

        assert_eq!(host.created, 50);
        assert_eq!(pool.active_count(), held.len());
    }
}
