//! Connection registry.
//!
//! Process-wide map from user id to that user's single live connection.
//! Entries live in a sharded map, so registrations for different users never
//! block each other while operations on the same user id are serialized by
//! the shard lock.

use crate::model::{now_millis, Identity};
use dashmap::DashMap;
use huddle_protocol::{OnlineUser, PresenceStatus, ServerEvent, UserId};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, trace};

/// Keeps connection ids unique within the same millisecond.
static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Generate a fresh connection ID.
    #[must_use]
    pub fn generate() -> Self {
        let counter = CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{:x}_{:x}", now_millis(), counter))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outbound side of a connection.
///
/// Events are queued on an unbounded channel drained by the connection's
/// socket task, so sending never suspends and events queued by one caller
/// keep their order.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Arc<ServerEvent>>,
    shutdown: Arc<Notify>,
}

/// Receiving end of a [`ConnectionHandle`].
pub type EventReceiver = mpsc::UnboundedReceiver<Arc<ServerEvent>>;

impl ConnectionHandle {
    /// Create a handle and the receiver its socket task drains.
    #[must_use]
    pub fn channel() -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: ConnectionId::generate(),
                tx,
                shutdown: Arc::new(Notify::new()),
            },
            rx,
        )
    }

    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Queue an event. Returns `false` if the connection is gone.
    pub fn send(&self, event: impl Into<Arc<ServerEvent>>) -> bool {
        self.tx.send(event.into()).is_ok()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Ask the socket task to close this connection.
    pub fn close(&self) {
        self.shutdown.notify_one();
    }

    /// Resolves once [`close`](Self::close) was called on any clone.
    pub async fn closed(&self) {
        self.shutdown.notified().await;
    }
}

/// A verified identity bound to its connection.
///
/// Replies to the initiator of an operation go through the session's own
/// handle, never through a registry lookup.
#[derive(Debug, Clone)]
pub struct Session {
    pub identity: Identity,
    pub handle: ConnectionHandle,
}

impl Session {
    #[must_use]
    pub fn new(identity: Identity, handle: ConnectionHandle) -> Self {
        Self { identity, handle }
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.identity.id
    }

    /// Queue an event for this connection only.
    pub fn reply(&self, event: impl Into<Arc<ServerEvent>>) -> bool {
        self.handle.send(event)
    }
}

/// A registered connection.
#[derive(Debug, Clone)]
pub struct ConnectionEntry {
    pub identity: Identity,
    pub handle: ConnectionHandle,
    pub established_at: u64,
    /// Registration order, for a stable snapshot ordering.
    seq: u64,
}

/// Registry of live connections, at most one per user.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<UserId, ConnectionEntry>,
    sequence: AtomicU64,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection, replacing any prior entry for the same user.
    ///
    /// The replaced connection is told to close, and its handle returned.
    pub fn register(&self, identity: Identity, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let user_id = identity.id.clone();
        let entry = ConnectionEntry {
            identity,
            handle,
            established_at: now_millis(),
            seq: self.sequence.fetch_add(1, Ordering::Relaxed),
        };
        debug!(user = %user_id, connection = %entry.handle.id(), "Connection registered");

        let previous = self.connections.insert(user_id.clone(), entry);
        if let Some(prev) = &previous {
            prev.handle.close();
            debug!(user = %user_id, connection = %prev.handle.id(), "Replaced previous connection");
        }
        previous.map(|e| e.handle)
    }

    /// Remove whatever connection the user has.
    pub fn unregister(&self, user_id: &str) -> Option<ConnectionEntry> {
        let removed = self.connections.remove(user_id).map(|(_, e)| e);
        if removed.is_some() {
            debug!(user = %user_id, "Connection unregistered");
        }
        removed
    }

    /// Remove the user's entry only if it is still `connection_id`.
    ///
    /// A connection that was replaced must not unregister its successor.
    pub fn unregister_connection(&self, user_id: &str, connection_id: &ConnectionId) -> bool {
        let removed = self
            .connections
            .remove_if(user_id, |_, e| e.handle.id() == connection_id)
            .is_some();
        if removed {
            debug!(user = %user_id, connection = %connection_id, "Connection unregistered");
        }
        removed
    }

    /// The user's live connection, if any.
    #[must_use]
    pub fn lookup(&self, user_id: &str) -> Option<ConnectionHandle> {
        self.connections.get(user_id).map(|e| e.handle.clone())
    }

    #[must_use]
    pub fn is_online(&self, user_id: &str) -> bool {
        self.connections.contains_key(user_id)
    }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Online users in registration order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<OnlineUser> {
        let mut entries: Vec<(u64, OnlineUser)> = self
            .connections
            .iter()
            .map(|e| {
                (
                    e.seq,
                    OnlineUser {
                        id: e.identity.id.clone(),
                        username: e.identity.username.clone(),
                        status: PresenceStatus::Online,
                    },
                )
            })
            .collect();
        entries.sort_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, u)| u).collect()
    }

    /// Send an event to one user. Returns `false` if they are offline.
    pub fn send_to(&self, user_id: &str, event: impl Into<Arc<ServerEvent>>) -> bool {
        match self.lookup(user_id) {
            Some(handle) => handle.send(event),
            None => false,
        }
    }

    /// Send an event to every connection except `except`.
    ///
    /// Returns the number of connections the event was queued for.
    pub fn broadcast(&self, event: impl Into<Arc<ServerEvent>>, except: Option<&str>) -> usize {
        let event = event.into();
        let handles: Vec<ConnectionHandle> = self
            .connections
            .iter()
            .filter(|e| except != Some(e.key().as_str()))
            .map(|e| e.handle.clone())
            .collect();

        let count = handles
            .iter()
            .filter(|h| h.send(Arc::clone(&event)))
            .count();
        trace!(event = event.name(), recipients = count, "Broadcast");
        count
    }
}
