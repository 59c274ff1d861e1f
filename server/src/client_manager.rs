//! Connected participants and their per-connection protocol state
//!
//! This module tracks, for every connected client:
//! - Its address, assigned head and last activity
//! - Buffered movement intents, ordered by sequence number
//! - Notifications sent to it that it has not acknowledged yet
//!
//! Intents that arrive with a sequence number at or below the last one
//! processed are out of turn. They are dropped and counted, like intents that
//! name a head the sender does not own.

use log::{debug, info};
use shared::{ClientId, EntityId, Intent, Notification};
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A notification waiting for the client's acknowledgement
#[derive(Debug, Clone)]
pub struct PendingNotification {
    pub notification: Notification,
    pub last_sent: Instant,
}

#[derive(Debug)]
pub struct Client {
    pub id: ClientId,
    pub addr: SocketAddr,
    /// Head created for this client on join
    pub head: Option<EntityId>,
    pub last_seen: Instant,
    /// Highest intent sequence number applied so far
    pub last_processed_intent: u32,
    pub pending_intents: Vec<Intent>,
    /// Unacknowledged notifications by id
    pub unacked: BTreeMap<u64, PendingNotification>,
}

impl Client {
    pub fn new(id: ClientId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            head: None,
            last_seen: Instant::now(),
            last_processed_intent: 0,
            pending_intents: Vec::new(),
            unacked: BTreeMap::new(),
        }
    }

    /// Buffers an intent in sequence order. Returns false when the intent is
    /// out of turn: already processed or already buffered.
    pub fn add_intent(&mut self, intent: Intent) -> bool {
        self.last_seen = Instant::now();

        if intent.sequence <= self.last_processed_intent
            || self
                .pending_intents
                .iter()
                .any(|pending| pending.sequence == intent.sequence)
        {
            return false;
        }

        self.pending_intents.push(intent);
        // Datagrams can arrive out of order
        self.pending_intents.sort_by_key(|i| i.sequence);
        true
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Counters for intents that were dropped
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IntentDiagnostics {
    /// Intents naming a head the sender does not own
    pub unauthorized: u64,
    /// Intents repeating or preceding an already processed sequence number
    pub out_of_turn: u64,
}

pub struct ClientManager {
    clients: HashMap<ClientId, Client>,
    next_client_id: ClientId,
    max_clients: usize,
    timeout: Duration,
    diagnostics: IntentDiagnostics,
}

impl ClientManager {
    pub fn new(max_clients: usize, timeout: Duration) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
            timeout,
            diagnostics: IntentDiagnostics::default(),
        }
    }

    /// Returns `None` when the server is at capacity.
    pub fn add_client(&mut self, addr: SocketAddr) -> Option<ClientId> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        info!("Client {} connected from {}", client_id, addr);
        self.clients.insert(client_id, Client::new(client_id, addr));

        Some(client_id)
    }

    pub fn remove_client(&mut self, client_id: &ClientId) -> bool {
        if let Some(client) = self.clients.remove(client_id) {
            info!(
                "Client {} disconnected with {} unacknowledged notifications",
                client.id,
                client.unacked.len()
            );
            true
        } else {
            false
        }
    }

    pub fn get(&self, client_id: ClientId) -> Option<&Client> {
        self.clients.get(&client_id)
    }

    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<ClientId> {
        self.clients
            .iter()
            .find(|(_, client)| client.addr == addr)
            .map(|(id, _)| *id)
    }

    pub fn addr_of(&self, client_id: ClientId) -> Option<SocketAddr> {
        self.clients.get(&client_id).map(|client| client.addr)
    }

    pub fn set_head(&mut self, client_id: ClientId, head: EntityId) {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.head = Some(head);
        }
    }

    pub fn touch(&mut self, client_id: ClientId) {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.touch();
        }
    }

    /// Buffers an intent. Returns false if the client is unknown or the
    /// intent is out of turn.
    pub fn add_intent(&mut self, client_id: ClientId, intent: Intent) -> bool {
        let Some(client) = self.clients.get_mut(&client_id) else {
            return false;
        };

        if client.add_intent(intent) {
            true
        } else {
            self.diagnostics.out_of_turn += 1;
            debug!(
                "Dropped out-of-turn intent {} from client {}",
                intent.sequence, client_id
            );
            false
        }
    }

    /// Takes every buffered intent, ordered by timestamp and then sequence,
    /// and marks them processed.
    pub fn take_intents(&mut self) -> Vec<(ClientId, Intent)> {
        let mut intents = Vec::new();
        for (client_id, client) in &mut self.clients {
            for intent in client.pending_intents.drain(..) {
                client.last_processed_intent = client.last_processed_intent.max(intent.sequence);
                intents.push((*client_id, intent));
            }
        }

        intents.sort_by_key(|(client_id, intent)| (intent.timestamp, *client_id, intent.sequence));
        intents
    }

    pub fn record_unauthorized(&mut self) {
        self.diagnostics.unauthorized += 1;
    }

    pub fn diagnostics(&self) -> IntentDiagnostics {
        self.diagnostics
    }

    /// Remembers a notification as sent to its recipient. Returns the
    /// recipient's address, or `None` if it is no longer connected.
    pub fn track_notification(&mut self, notification: Notification) -> Option<SocketAddr> {
        let client = self.clients.get_mut(&notification.recipient)?;
        client.unacked.insert(
            notification.id,
            PendingNotification {
                notification,
                last_sent: Instant::now(),
            },
        );
        Some(client.addr)
    }

    /// Returns true if the notification was pending.
    pub fn acknowledge(&mut self, client_id: ClientId, notification_id: u64) -> bool {
        self.clients
            .get_mut(&client_id)
            .map_or(false, |client| {
                client.touch();
                client.unacked.remove(&notification_id).is_some()
            })
    }

    /// Notifications sent longer than `resend_after` ago without an
    /// acknowledgement. Their send time is reset.
    pub fn due_resends(&mut self, resend_after: Duration) -> Vec<(SocketAddr, Notification)> {
        let now = Instant::now();
        let mut due = Vec::new();
        for client in self.clients.values_mut() {
            for pending in client.unacked.values_mut() {
                if now.duration_since(pending.last_sent) >= resend_after {
                    pending.last_sent = now;
                    due.push((client.addr, pending.notification));
                }
            }
        }
        due
    }

    /// Removes and returns clients that have been silent too long.
    pub fn check_timeouts(&mut self) -> Vec<ClientId> {
        let timeout = self.timeout;
        let timed_out: Vec<ClientId> = self
            .clients
            .iter()
            .filter(|(_, client)| client.is_timed_out(timeout))
            .map(|(id, _)| *id)
            .collect();

        for client_id in &timed_out {
            self.remove_client(client_id);
        }

        timed_out
    }

    pub fn get_client_addrs(&self) -> Vec<(ClientId, SocketAddr)> {
        self.clients
            .iter()
            .map(|(id, client)| (*id, client.addr))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
