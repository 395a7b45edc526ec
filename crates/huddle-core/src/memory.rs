//! In-memory [`Store`] implementation.
//!
//! Backed by sharded maps so unrelated rooms and users never contend on a
//! single lock. Suitable for development, tests and single-node deployments
//! where losing history on restart is acceptable.

use crate::model::{Message, Room, User};
use crate::store::{Page, Store, StoreError};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use huddle_protocol::{MessageId, RoomId, RoomKind};
use std::sync::atomic::{AtomicU64, Ordering};

/// Message plus its insertion sequence, used to break timestamp ties.
struct StoredMessage {
    seq: u64,
    message: Message,
}

/// Store that keeps everything in process memory.
#[derive(Default)]
pub struct InMemoryStore {
    users: DashMap<String, User>,
    rooms: DashMap<RoomId, Room>,
    /// Non-direct room names, for uniqueness.
    room_names: DashMap<String, RoomId>,
    messages: DashMap<MessageId, StoredMessage>,
    sequence: AtomicU64,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored messages, including soft-deleted ones.
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }
}

fn by_recent_activity(rooms: &mut [Room]) {
    rooms.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        Ok(self.users.get(id).map(|u| u.clone()))
    }

    async fn put_user(&self, user: User) -> Result<(), StoreError> {
        self.users.insert(user.id.clone(), user);
        Ok(())
    }

    async fn create_room(&self, room: Room) -> Result<(), StoreError> {
        if room.kind != RoomKind::Direct {
            match self.room_names.entry(room.name.clone()) {
                Entry::Occupied(_) => {
                    return Err(StoreError::Conflict(format!(
                        "room name '{}' already taken",
                        room.name
                    )))
                }
                Entry::Vacant(slot) => {
                    slot.insert(room.id.clone());
                }
            }
        }
        self.rooms.insert(room.id.clone(), room);
        Ok(())
    }

    async fn get_room(&self, id: &str) -> Result<Option<Room>, StoreError> {
        Ok(self.rooms.get(id).map(|r| r.clone()))
    }

    async fn update_room(&self, room: &Room) -> Result<(), StoreError> {
        match self.rooms.get_mut(&room.id) {
            Some(mut stored) => {
                *stored = room.clone();
                Ok(())
            }
            None => Err(StoreError::Backend(format!("room {} does not exist", room.id))),
        }
    }

    async fn find_room_by_name(&self, name: &str) -> Result<Option<Room>, StoreError> {
        let Some(id) = self.room_names.get(name).map(|id| id.clone()) else {
            return Ok(None);
        };
        Ok(self.rooms.get(&id).map(|r| r.clone()))
    }

    async fn find_direct_room(&self, a: &str, b: &str) -> Result<Option<Room>, StoreError> {
        Ok(self
            .rooms
            .iter()
            .find(|r| r.is_active && r.kind == RoomKind::Direct && r.is_member(a) && r.is_member(b))
            .map(|r| r.clone()))
    }

    async fn list_active_rooms(&self) -> Result<Vec<Room>, StoreError> {
        let mut rooms: Vec<Room> = self
            .rooms
            .iter()
            .filter(|r| r.is_active)
            .map(|r| r.clone())
            .collect();
        by_recent_activity(&mut rooms);
        Ok(rooms)
    }

    async fn rooms_for_member(&self, user: &str) -> Result<Vec<Room>, StoreError> {
        let mut rooms: Vec<Room> = self
            .rooms
            .iter()
            .filter(|r| r.is_active && r.is_member(user))
            .map(|r| r.clone())
            .collect();
        by_recent_activity(&mut rooms);
        Ok(rooms)
    }

    async fn create_message(&self, message: Message) -> Result<(), StoreError> {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        self.messages
            .insert(message.id.clone(), StoredMessage { seq, message });
        Ok(())
    }

    async fn get_message(&self, id: &str) -> Result<Option<Message>, StoreError> {
        Ok(self.messages.get(id).map(|m| m.message.clone()))
    }

    async fn update_message(&self, message: &Message) -> Result<(), StoreError> {
        match self.messages.get_mut(&message.id) {
            Some(mut stored) => {
                stored.message = message.clone();
                Ok(())
            }
            None => Err(StoreError::Backend(format!(
                "message {} does not exist",
                message.id
            ))),
        }
    }

    async fn messages_by_room(&self, room: &str, page: Page) -> Result<Vec<Message>, StoreError> {
        let mut found: Vec<(u64, u64, Message)> = self
            .messages
            .iter()
            .filter(|m| m.message.room == room && !m.message.is_deleted)
            .map(|m| (m.message.created_at, m.seq, m.message.clone()))
            .collect();
        found.sort_by(|a, b| (b.0, b.1).cmp(&(a.0, a.1)));

        Ok(found
            .into_iter()
            .skip(page.offset())
            .take(page.limit)
            .map(|(_, _, m)| m)
            .collect())
    }

    async fn expired_messages(
        &self,
        cutoff: u64,
    ) -> Result<Vec<(MessageId, RoomId)>, StoreError> {
        Ok(self
            .messages
            .iter()
            .filter(|m| m.message.is_expired(cutoff))
            .map(|m| (m.message.id.clone(), m.message.room.clone()))
            .collect())
    }

    async fn purge_messages(&self, ids: &[MessageId], cutoff: u64) -> Result<usize, StoreError> {
        let removed = ids
            .iter()
            .filter(|id| {
                self.messages
                    .remove_if(id.as_str(), |_, m| m.message.is_expired(cutoff))
                    .is_some()
            })
            .count();
        Ok(removed)
    }
}
