//! Who is connected right now, and how to reach them.
//!
//! The [`PresenceRegistry`] maps each user to at most one
//! [`ConnectionHandle`]. A newer connection silently supersedes an older one;
//! a disconnect only removes the entry if it still belongs to the
//! connection that is going away, so a stale disconnect cannot evict a
//! fresh reconnect.
//!
//! Every connect and disconnect broadcasts a
//! [`ServerEvent::PresenceSnapshot`] to everyone online.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;

use duet_proto::event::ServerEvent;
use duet_proto::message::UserId;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of one WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Sending half of a connection's outbound event queue.
///
/// Handles compare equal only if they belong to the same connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}

impl ConnectionHandle {
    /// Wraps a fresh connection's outbound sender.
    #[must_use]
    pub fn new(tx: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self {
            id: ConnectionId::next(),
            tx,
        }
    }

    /// This connection's id.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues `event` for the connection's writer.
    ///
    /// Returns `false` if the connection has already gone away.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// An event addressed to one user, routed through presence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    /// Recipient.
    pub to: UserId,
    /// What to send them.
    pub event: ServerEvent,
}

impl Outbound {
    /// Addresses `event` to `to`.
    #[must_use]
    pub const fn new(to: UserId, event: ServerEvent) -> Self {
        Self { to, event }
    }
}

/// Concurrent map from user id to their live connection.
#[derive(Default)]
pub struct PresenceRegistry {
    connections: DashMap<UserId, ConnectionHandle>,
}

impl PresenceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `handle` as `user`'s connection and broadcasts presence.
    ///
    /// Returns the handle it superseded, if any.
    pub fn on_connect(&self, user: &UserId, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let previous = self.connections.insert(user.clone(), handle);
        if previous.is_some() {
            tracing::info!(user_id = %user, "connection superseded by reconnect");
        }
        self.broadcast_snapshot();
        previous
    }

    /// Removes `user`'s entry if it is still `connection`, then broadcasts
    /// presence.
    ///
    /// Returns `true` if the entry was removed.
    pub fn on_disconnect(&self, user: &UserId, connection: ConnectionId) -> bool {
        let removed = self
            .connections
            .remove_if(user, |_, handle| handle.id == connection)
            .is_some();
        if removed {
            self.broadcast_snapshot();
        } else {
            tracing::debug!(user_id = %user, "stale disconnect ignored");
        }
        removed
    }

    /// The live connection for `user`; `None` means offline.
    #[must_use]
    pub fn lookup(&self, user: &UserId) -> Option<ConnectionHandle> {
        self.connections.get(user).map(|entry| entry.value().clone())
    }

    /// Returns `true` if `user` has a live connection.
    #[must_use]
    pub fn is_online(&self, user: &UserId) -> bool {
        self.connections.contains_key(user)
    }

    /// Every connected user id, sorted.
    #[must_use]
    pub fn online_ids(&self) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self.connections.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Sends the current online set to every connection.
    ///
    /// Returns how many connections accepted it.
    pub fn broadcast_snapshot(&self) -> usize {
        let event = ServerEvent::PresenceSnapshot {
            online: self.online_ids(),
        };
        let handles: Vec<ConnectionHandle> =
            self.connections.iter().map(|e| e.value().clone()).collect();
        handles
            .iter()
            .filter(|handle| handle.send(event.clone()))
            .count()
    }

    /// Delivers each outbound event to its recipient if they are online.
    ///
    /// Offline recipients are skipped. The same event is sent at most once
    /// per connection even if two recipients resolve to it.
    pub fn route(&self, outbound: Vec<Outbound>) -> usize {
        let mut sent: Vec<(ConnectionId, ServerEvent)> = Vec::with_capacity(outbound.len());
        for Outbound { to, event } in outbound {
            let Some(handle) = self.lookup(&to) else {
                tracing::debug!(user_id = %to, event = event.name(), "recipient offline");
                continue;
            };
            if sent.iter().any(|(id, e)| *id == handle.id && *e == event) {
                continue;
            }
            if handle.send(event.clone()) {
                sent.push((handle.id, event));
            } else {
                tracing::warn!(user_id = %to, event = event.name(), "connection closed before routing");
            }
        }
        sent.len()
    }
}
