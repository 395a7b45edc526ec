//! Room channel hub.
//!
//! Tracks which users' connections are attached to which room channels and
//! fans events out to them through the [`ConnectionRegistry`]. Channel
//! attachment is distinct from membership: members are attached when they
//! connect, join, create or get approved, and detached when they leave or
//! disconnect.

use crate::registry::ConnectionRegistry;
use dashmap::{DashMap, DashSet};
use huddle_protocol::{RoomId, ServerEvent, UserId};
use std::sync::Arc;
use tracing::{debug, trace};

/// Fan-out hub for room channels.
pub struct Hub {
    /// Attached users per room.
    channels: DashMap<RoomId, DashSet<UserId>>,
    /// Rooms per user (user -> set of room ids).
    subscriptions: DashMap<UserId, DashSet<RoomId>>,
    registry: Arc<ConnectionRegistry>,
}

impl Hub {
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            channels: DashMap::new(),
            subscriptions: DashMap::new(),
            registry,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Attach a user to a room channel. Idempotent.
    pub fn subscribe(&self, user_id: &str, room_id: &str) {
        self.subscriptions
            .entry(user_id.to_string())
            .or_default()
            .insert(room_id.to_string());
        let inserted = self
            .channels
            .entry(room_id.to_string())
            .or_default()
            .insert(user_id.to_string());

        if inserted {
            debug!(room = %room_id, user = %user_id, "Subscribed to room channel");
        }
    }

    /// Detach a user from a room channel.
    ///
    /// Returns `true` if the user was attached.
    pub fn unsubscribe(&self, user_id: &str, room_id: &str) -> bool {
        if let Some(rooms) = self.subscriptions.get(user_id) {
            rooms.remove(room_id);
        }

        let removed = match self.channels.get(room_id) {
            Some(users) => users.remove(user_id).is_some(),
            None => false,
        };
        self.channels.remove_if(room_id, |_, users| users.is_empty());

        if removed {
            debug!(room = %room_id, user = %user_id, "Unsubscribed from room channel");
        }
        removed
    }

    /// Detach a user from every channel. Returns the rooms they were attached to.
    pub fn unsubscribe_all(&self, user_id: &str) -> Vec<RoomId> {
        let Some((_, rooms)) = self.subscriptions.remove(user_id) else {
            return Vec::new();
        };

        let rooms: Vec<RoomId> = rooms.into_iter().collect();
        for room_id in &rooms {
            if let Some(users) = self.channels.get(room_id.as_str()) {
                users.remove(user_id);
            }
            self.channels
                .remove_if(room_id.as_str(), |_, users| users.is_empty());
        }

        debug!(user = %user_id, rooms = rooms.len(), "Unsubscribed from all room channels");
        rooms
    }

    /// Drop a room channel entirely.
    pub fn close_channel(&self, room_id: &str) {
        if let Some((_, users)) = self.channels.remove(room_id) {
            for user in users.iter() {
                if let Some(rooms) = self.subscriptions.get(user.as_str()) {
                    rooms.remove(room_id);
                }
            }
            debug!(room = %room_id, "Closed room channel");
        }
    }

    #[must_use]
    pub fn is_subscribed(&self, user_id: &str, room_id: &str) -> bool {
        self.channels
            .get(room_id)
            .map(|users| users.contains(user_id))
            .unwrap_or(false)
    }

    /// Users attached to a room channel.
    #[must_use]
    pub fn subscribers(&self, room_id: &str) -> Vec<UserId> {
        self.channels
            .get(room_id)
            .map(|users| users.iter().map(|u| u.clone()).collect())
            .unwrap_or_default()
    }

    /// Rooms a user is attached to.
    #[must_use]
    pub fn rooms_of(&self, user_id: &str) -> Vec<RoomId> {
        self.subscriptions
            .get(user_id)
            .map(|rooms| rooms.iter().map(|r| r.clone()).collect())
            .unwrap_or_default()
    }

    /// Publish an event to every attached, online user except `except`.
    ///
    /// Returns the number of connections the event was queued for.
    pub fn publish(
        &self,
        room_id: &str,
        event: impl Into<Arc<ServerEvent>>,
        except: Option<&str>,
    ) -> usize {
        let event = event.into();
        let count = self
            .subscribers(room_id)
            .iter()
            .filter(|user| except != Some(user.as_str()))
            .filter(|user| self.registry.send_to(user, Arc::clone(&event)))
            .count();

        trace!(room = %room_id, event = event.name(), recipients = count, "Published");
        count
    }

    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            channel_count: self.channels.len(),
            subscriber_count: self.subscriptions.len(),
            total_subscriptions: self.subscriptions.iter().map(|s| s.len()).sum(),
        }
    }
}

/// Hub statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubStats {
    /// Room channels with at least one attached user.
    pub channel_count: usize,
    /// Users attached to at least one channel.
    pub subscriber_count: usize,
    /// Total (user, room) attachments.
    pub total_subscriptions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Identity;
    use crate::registry::ConnectionHandle;

    fn hub_with(users: &[&str]) -> (Hub, Vec<crate::registry::EventReceiver>) {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut receivers = Vec::new();
        for id in users {
            let (handle, rx) = ConnectionHandle::channel();
            registry.register(Identity::new(*id, *id), handle);
            receivers.push(rx);
        }
        (Hub::new(registry), receivers)
    }

    #[test]
    fn test_subscribe_unsubscribe() {
        let (hub, _rx) = hub_with(&["alice"]);

        hub.subscribe("alice", "r1");
        hub.subscribe("alice", "r1");
        assert!(hub.is_subscribed("alice", "r1"));
        assert_eq!(hub.subscribers("r1"), vec!["alice".to_string()]);

        assert!(hub.unsubscribe("alice", "r1"));
        assert!(!hub.unsubscribe("alice", "r1"));
        // Empty channels are dropped.
        assert_eq!(hub.stats().channel_count, 0);
    }

    #[test]
    fn test_publish_respects_exclusion() {
        let (hub, mut rx) = hub_with(&["alice", "bob"]);
        hub.subscribe("alice", "r1");
        hub.subscribe("bob", "r1");

        let count = hub.publish("r1", ServerEvent::error("hello"), Some("alice"));
        assert_eq!(count, 1);
        assert!(rx[0].try_recv().is_err());
        assert!(rx[1].try_recv().is_ok());

        assert_eq!(hub.publish("r1", ServerEvent::error("all"), None), 2);
    }

    #[test]
    fn test_publish_skips_offline_subscribers() {
        let (hub, _rx) = hub_with(&["alice"]);
        hub.subscribe("alice", "r1");
        hub.subscribe("ghost", "r1");

        assert_eq!(hub.publish("r1", ServerEvent::error("x"), None), 1);
    }

    #[test]
    fn test_unsubscribe_all_and_close() {
        let (hub, _rx) = hub_with(&["alice", "bob"]);
        hub.subscribe("alice", "r1");
        hub.subscribe("alice", "r2");
        hub.subscribe("bob", "r2");

        let stats = hub.stats();
        assert_eq!(stats.channel_count, 2);
        assert_eq!(stats.total_subscriptions, 3);

        let mut rooms = hub.unsubscribe_all("alice");
        rooms.sort();
        assert_eq!(rooms, vec!["r1".to_string(), "r2".to_string()]);
        assert_eq!(hub.subscribers("r2"), vec!["bob".to_string()]);

        hub.close_channel("r2");
        assert!(hub.subscribers("r2").is_empty());
        assert!(hub.rooms_of("bob").is_empty());
    }
}
