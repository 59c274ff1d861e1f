//! A single value written by one role and mirrored to everyone allowed to
//! read it.
//!
//! The same type lives on both sides of the wire. On the authority, writes go
//! through [`Replicated::set`], which enforces the write policy and bumps the
//! variable's sequence number. On a replica, updates arrive through
//! [`Replicated::apply`], which only accepts sequence numbers newer than the
//! one already held, so every observer sees the variable's history in commit
//! order even if datagrams are duplicated or reordered in transit.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;
use crate::ClientId;

/// Who is performing an access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// The process holding the canonical game state
    Authority,
    /// A connected client, acting through its own replica
    Participant(ClientId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadPolicy {
    AuthorityOnly,
    Everyone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WritePolicy {
    AuthorityOnly,
    /// Only the participant recorded as the variable's owner
    OwnerOnly,
}

type Observer<T> = Box<dyn FnMut(&T, &T) + Send>;

pub struct Replicated<T> {
    value: T,
    seq: u32,
    owner: Option<ClientId>,
    read: ReadPolicy,
    write: WritePolicy,
    observers: Vec<Observer<T>>,
}

impl<T: Clone + PartialEq> Replicated<T> {
    pub fn new(value: T, read: ReadPolicy, write: WritePolicy) -> Self {
        Self {
            value,
            seq: 0,
            owner: None,
            read,
            write,
            observers: Vec::new(),
        }
    }

    /// Everyone-readable, authority-written. The common case for game state.
    pub fn server_owned(value: T) -> Self {
        Self::new(value, ReadPolicy::Everyone, WritePolicy::AuthorityOnly)
    }

    /// Replica-side copy of a variable first seen at `seq`.
    pub fn mirrored(value: T, seq: u32) -> Self {
        let mut var = Self::server_owned(value);
        var.seq = seq;
        var
    }

    pub fn owned_by(mut self, owner: ClientId) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    /// Sequence number of the last committed or applied change.
    pub fn seq(&self) -> u32 {
        self.seq
    }

    pub fn owner(&self) -> Option<ClientId> {
        self.owner
    }

    pub fn read_policy(&self) -> ReadPolicy {
        self.read
    }

    pub fn can_read(&self, role: Role) -> bool {
        match self.read {
            ReadPolicy::Everyone => true,
            ReadPolicy::AuthorityOnly => role == Role::Authority,
        }
    }

    pub fn can_write(&self, role: Role) -> bool {
        match (self.write, role) {
            (WritePolicy::AuthorityOnly, Role::Authority) => true,
            (WritePolicy::OwnerOnly, Role::Participant(client)) => self.owner == Some(client),
            _ => false,
        }
    }

    /// Registers a callback invoked with `(previous, new)` once per change.
    pub fn observe(&mut self, observer: impl FnMut(&T, &T) + Send + 'static) {
        self.observers.push(Box::new(observer));
    }

    /// Commits `value` on behalf of `caller`.
    ///
    /// Returns the new sequence number, or `None` when the value is unchanged
    /// and nothing was committed.
    pub fn set(&mut self, caller: Role, value: T) -> Result<Option<u32>, CoreError> {
        if !self.can_write(caller) {
            return Err(CoreError::PermissionDenied {
                role: caller,
                operation: "write this variable",
            });
        }
        if self.value == value {
            return Ok(None);
        }

        self.seq = self.seq.wrapping_add(1);
        self.commit(value);
        Ok(Some(self.seq))
    }

    /// Applies an update received from the authority. Stale or duplicate
    /// sequence numbers are ignored and `false` is returned.
    pub fn apply(&mut self, seq: u32, value: T) -> bool {
        if seq <= self.seq {
            return false;
        }

        self.seq = seq;
        if self.value != value {
            self.commit(value);
        }
        true
    }

    fn commit(&mut self, value: T) {
        let previous = std::mem::replace(&mut self.value, value);
        for observer in &mut self.observers {
            observer(&previous, &self.value);
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Replicated<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Replicated")
            .field("value", &self.value)
            .field("seq", &self.seq)
            .field("owner", &self.owner)
            .field("read", &self.read)
            .field("write", &self.write)
            .field("observers", &self.observers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_authority_only_rejects_participant_write() {
        let mut alive = Replicated::server_owned(true);

        let result = alive.set(Role::Participant(3), false);

        assert!(matches!(result, Err(CoreError::PermissionDenied { .. })));
        assert!(*alive.get());
        assert_eq!(alive.seq(), 0);
    }

    #[test]
    fn test_authority_write_bumps_sequence() {
        let mut length = Replicated::server_owned(1u16);

        assert_eq!(length.set(Role::Authority, 2), Ok(Some(1)));
        assert_eq!(length.set(Role::Authority, 3), Ok(Some(2)));
        assert_eq!(*length.get(), 3);
    }

    #[test]
    fn test_unchanged_value_commits_nothing() {
        let mut length = Replicated::server_owned(4u16);

        assert_eq!(length.set(Role::Authority, 4), Ok(None));
        assert_eq!(length.seq(), 0);
    }

    #[test]
    fn test_owner_only_write_policy() {
        let mut target =
            Replicated::new(0.0f32, ReadPolicy::AuthorityOnly, WritePolicy::OwnerOnly).owned_by(7);

        assert!(target.set(Role::Participant(7), 1.0).is_ok());
        assert!(target.set(Role::Participant(8), 2.0).is_err());
        assert!(target.set(Role::Authority, 3.0).is_err());
        assert_eq!(*target.get(), 1.0);
    }

    #[test]
    fn test_read_policy() {
        let public = Replicated::server_owned(0u8);
        let private = Replicated::new(0u8, ReadPolicy::AuthorityOnly, WritePolicy::AuthorityOnly);

        assert!(public.can_read(Role::Participant(1)));
        assert!(private.can_read(Role::Authority));
        assert!(!private.can_read(Role::Participant(1)));
    }

    #[test]
    fn test_observers_fire_once_per_change_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut length = Replicated::server_owned(1u16);
        {
            let seen = Arc::clone(&seen);
            length.observe(move |prev, new| seen.lock().unwrap().push((*prev, *new)));
        }

        length.set(Role::Authority, 2).unwrap();
        length.set(Role::Authority, 2).unwrap();
        length.set(Role::Authority, 3).unwrap();
        let _ = length.set(Role::Participant(1), 9);

        assert_eq!(*seen.lock().unwrap(), vec![(1, 2), (2, 3)]);
    }

    #[test]
    fn test_apply_ignores_stale_and_duplicate_updates() {
        let mut position = Replicated::mirrored(0i32, 5);

        assert!(!position.apply(5, 10));
        assert!(!position.apply(4, 10));
        assert!(position.apply(7, 10));
        assert!(!position.apply(6, 99));

        assert_eq!(*position.get(), 10);
        assert_eq!(position.seq(), 7);
    }

    #[test]
    fn test_mirrored_copy_cannot_be_written_by_replica() {
        let mut alive = Replicated::mirrored(true, 1);

        assert!(alive.set(Role::Participant(1), false).is_err());
        assert!(*alive.get());
    }
}
