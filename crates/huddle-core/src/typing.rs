//! Typing indicators.
//!
//! Relays start/stop transitions to the other members of a room. There is no
//! server-side timeout: clients send `typing_stop` after going idle, and a
//! disconnect clears whatever the user left behind.

use crate::access::load_active_room;
use crate::error::{ChatError, ChatResult};
use crate::hub::Hub;
use crate::locks::RoomLocks;
use crate::model::Identity;
use crate::registry::Session;
use crate::store::Store;
use dashmap::{DashMap, DashSet};
use huddle_protocol::{RoomId, ServerEvent, Typing, UserId};
use std::sync::Arc;
use tracing::trace;

pub struct TypingTracker {
    /// Users currently typing, per room.
    typing: DashMap<RoomId, DashSet<UserId>>,
    store: Arc<dyn Store>,
    hub: Arc<Hub>,
    locks: Arc<RoomLocks>,
}

impl TypingTracker {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, hub: Arc<Hub>, locks: Arc<RoomLocks>) -> Self {
        Self {
            typing: DashMap::new(),
            store,
            hub,
            locks,
        }
    }

    /// Mark the caller as typing. Returns `false` if they already were.
    pub async fn start(&self, session: &Session, room_id: &str) -> ChatResult<bool> {
        let _guard = self.locks.lock(room_id).await;
        self.check_member(session, room_id).await?;

        let started = self
            .typing
            .entry(room_id.to_string())
            .or_default()
            .insert(session.user_id().to_string());
        if started {
            self.relay(&session.identity, room_id, true);
        }
        Ok(started)
    }

    /// Clear the caller's typing state. Returns `false` if they were not typing.
    pub async fn stop(&self, session: &Session, room_id: &str) -> ChatResult<bool> {
        let _guard = self.locks.lock(room_id).await;
        self.check_member(session, room_id).await?;

        let stopped = self.remove(room_id, session.user_id());
        if stopped {
            self.relay(&session.identity, room_id, false);
        }
        Ok(stopped)
    }

    /// Clear every room the user was typing in, telling the others.
    pub async fn clear_user(&self, identity: &Identity) -> usize {
        let rooms: Vec<RoomId> = self
            .typing
            .iter()
            .filter(|entry| entry.value().contains(identity.id.as_str()))
            .map(|entry| entry.key().clone())
            .collect();

        let mut cleared = 0;
        for room_id in rooms {
            let _guard = self.locks.lock(&room_id).await;
            if self.remove(&room_id, &identity.id) {
                self.relay(identity, &room_id, false);
                cleared += 1;
            }
        }
        cleared
    }

    /// Forget a room's typing state without relaying anything.
    pub fn clear_room(&self, room_id: &str) {
        self.typing.remove(room_id);
    }

    /// Users typing in a room.
    #[must_use]
    pub fn typing_in(&self, room_id: &str) -> Vec<UserId> {
        self.typing
            .get(room_id)
            .map(|users| users.iter().map(|u| u.clone()).collect())
            .unwrap_or_default()
    }

    async fn check_member(&self, session: &Session, room_id: &str) -> ChatResult<()> {
        let room = load_active_room(self.store.as_ref(), room_id).await?;
        if room.is_member(session.user_id()) {
            Ok(())
        } else {
            Err(ChatError::AccessDenied(
                "You are not a member of this room.".into(),
            ))
        }
    }

    fn remove(&self, room_id: &str, user_id: &str) -> bool {
        let removed = self
            .typing
            .get(room_id)
            .is_some_and(|users| users.remove(user_id).is_some());
        self.typing.remove_if(room_id, |_, users| users.is_empty());
        removed
    }

    fn relay(&self, identity: &Identity, room_id: &str, typing: bool) {
        let payload = Typing {
            user_id: identity.id.clone(),
            username: identity.username.clone(),
            room_id: room_id.to_string(),
        };
        let event = if typing {
            ServerEvent::UserTyping(payload)
        } else {
            ServerEvent::UserStoppedTyping(payload)
        };
        let recipients = self.hub.publish(room_id, event, Some(&identity.id));
        trace!(room = %room_id, user = %identity.id, typing, recipients, "Typing relayed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use crate::model::Room;
    use crate::registry::{ConnectionHandle, ConnectionRegistry, EventReceiver};
    use huddle_protocol::{MemberRole, RoomKind};

    async fn setup() -> (TypingTracker, String, Vec<(Session, EventReceiver)>) {
        let store = Arc::new(InMemoryStore::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let hub = Arc::new(Hub::new(Arc::clone(&registry)));

        let mut room = Room::new("general", None, RoomKind::Public, "alice", 100);
        room.add_member("bob", MemberRole::Member);
        let room_id = room.id.clone();
        store.create_room(room).await.unwrap();

        let mut sessions = Vec::new();
        for id in ["alice", "bob", "carol"] {
            let identity = Identity::new(id, id);
            let (handle, rx) = ConnectionHandle::channel();
            registry.register(identity.clone(), handle.clone());
            if id != "carol" {
                hub.subscribe(id, &room_id);
            }
            sessions.push((Session::new(identity, handle), rx));
        }

        let tracker = TypingTracker::new(store, hub, Arc::new(RoomLocks::new()));
        (tracker, room_id, sessions)
    }

    #[tokio::test]
    async fn test_typing_relayed_to_others_only() {
        let (tracker, room, mut sessions) = setup().await;
        let alice = sessions[0].0.clone();

        assert!(tracker.start(&alice, &room).await.unwrap());
        assert!(!tracker.start(&alice, &room).await.unwrap());
        assert_eq!(tracker.typing_in(&room), vec!["alice".to_string()]);

        assert!(sessions[0].1.try_recv().is_err());
        assert_eq!(
            *sessions[1].1.try_recv().unwrap(),
            ServerEvent::UserTyping(Typing {
                user_id: "alice".into(),
                username: "alice".into(),
                room_id: room.clone(),
            })
        );
        assert!(sessions[1].1.try_recv().is_err());

        assert!(tracker.stop(&alice, &room).await.unwrap());
        assert!(matches!(
            &*sessions[1].1.try_recv().unwrap(),
            ServerEvent::UserStoppedTyping(_)
        ));
        assert!(tracker.typing_in(&room).is_empty());
    }

    #[tokio::test]
    async fn test_non_member_cannot_type() {
        let (tracker, room, sessions) = setup().await;
        let carol = &sessions[2].0;

        assert!(matches!(
            tracker.start(carol, &room).await,
            Err(ChatError::AccessDenied(_))
        ));
        assert!(matches!(
            tracker.stop(carol, &room).await,
            Err(ChatError::AccessDenied(_))
        ));
    }

    #[tokio::test]
    async fn test_disconnect_clears_typing() {
        let (tracker, room, mut sessions) = setup().await;
        let bob = sessions[1].0.clone();

        tracker.start(&bob, &room).await.unwrap();
        sessions[0].1.try_recv().unwrap();

        assert_eq!(tracker.clear_user(&bob.identity).await, 1);
        assert!(matches!(
            &*sessions[0].1.try_recv().unwrap(),
            ServerEvent::UserStoppedTyping(_)
        ));
        assert_eq!(tracker.clear_user(&bob.identity).await, 0);
    }
}
