//! Targeted outcome notifications.
//!
//! Notifications are queued in the order the resolver emits them and drained
//! by the network layer once per tick. Ids are unique for the lifetime of the
//! authority so replicas can deduplicate re-sent copies.

use log::debug;
use shared::{ClientId, EntityId, Notification, NotificationKind};

#[derive(Debug)]
pub struct Notifier {
    next_id: u64,
    outbox: Vec<Notification>,
}

impl Notifier {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            outbox: Vec::new(),
        }
    }

    pub fn notify(
        &mut self,
        recipient: ClientId,
        kind: NotificationKind,
        winner: EntityId,
        loser: EntityId,
        loser_alive_seq: u32,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.outbox.push(Notification {
            id,
            recipient,
            kind,
            winner,
            loser,
            loser_alive_seq,
        });
        debug!("Queued {:?} notification {} for client {}", kind, id, recipient);
        id
    }

    pub fn pending(&self) -> &[Notification] {
        &self.outbox
    }

    pub fn drain(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.outbox)
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique_and_ordered() {
        let mut notifier = Notifier::new();

        let a = notifier.notify(1, NotificationKind::AteOpponent, EntityId(1), EntityId(2), 3);
        let b = notifier.notify(2, NotificationKind::Eliminated, EntityId(1), EntityId(2), 3);

        assert!(b > a);
        let drained = notifier.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].recipient, 1);
        assert_eq!(drained[1].kind, NotificationKind::Eliminated);
        assert!(notifier.pending().is_empty());
    }
}
