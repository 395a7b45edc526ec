//! Persistence seam.
//!
//! The engine treats storage as an external collaborator exposing CRUD for
//! users, rooms and messages plus a handful of queries. Every method is a
//! suspension point; callers hold at most one room lock across them.

use crate::model::{Message, Room, User};
use async_trait::async_trait;
use huddle_protocol::{MessageId, RoomId};
use thiserror::Error;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint was violated.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The backend failed.
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// One page of a most-recent-first listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    /// 1-based page number.
    pub number: usize,
    /// Items per page.
    pub limit: usize,
}

impl Page {
    /// The first page of `limit` items.
    #[must_use]
    pub fn first(limit: usize) -> Self {
        Self { number: 1, limit }
    }

    /// Number of items to skip.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.number.saturating_sub(1) * self.limit
    }
}

/// CRUD interface over users, rooms and messages.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch a user.
    async fn get_user(&self, id: &str) -> Result<Option<User>, StoreError>;

    /// Insert or replace a user.
    async fn put_user(&self, user: User) -> Result<(), StoreError>;

    /// Insert a new room.
    ///
    /// Fails with [`StoreError::Conflict`] if a non-direct room with the same
    /// name exists.
    async fn create_room(&self, room: Room) -> Result<(), StoreError>;

    /// Fetch a room, active or not.
    async fn get_room(&self, id: &str) -> Result<Option<Room>, StoreError>;

    /// Replace a stored room.
    async fn update_room(&self, room: &Room) -> Result<(), StoreError>;

    /// Find a non-direct room by exact name.
    async fn find_room_by_name(&self, name: &str) -> Result<Option<Room>, StoreError>;

    /// Find the active direct room shared by two users.
    async fn find_direct_room(&self, a: &str, b: &str) -> Result<Option<Room>, StoreError>;

    /// All active rooms, most recently active first.
    async fn list_active_rooms(&self) -> Result<Vec<Room>, StoreError>;

    /// Active rooms where `user` is a member.
    async fn rooms_for_member(&self, user: &str) -> Result<Vec<Room>, StoreError>;

    /// Append a message.
    async fn create_message(&self, message: Message) -> Result<(), StoreError>;

    /// Fetch a message, deleted or not.
    async fn get_message(&self, id: &str) -> Result<Option<Message>, StoreError>;

    /// Replace a stored message.
    async fn update_message(&self, message: &Message) -> Result<(), StoreError>;

    /// Non-deleted messages of a room, most recent first.
    async fn messages_by_room(&self, room: &str, page: Page) -> Result<Vec<Message>, StoreError>;

    /// Soft-deleted messages with `deleted_at <= cutoff`, as (message, room) pairs.
    async fn expired_messages(&self, cutoff: u64)
        -> Result<Vec<(MessageId, RoomId)>, StoreError>;

    /// Hard-delete the given messages, re-checking that each is still
    /// soft-deleted with `deleted_at <= cutoff`. Returns how many were removed.
    async fn purge_messages(&self, ids: &[MessageId], cutoff: u64) -> Result<usize, StoreError>;
}

/// Display name for a user id, falling back to the id itself.
pub(crate) async fn username_of(store: &dyn Store, id: &str) -> Result<String, StoreError> {
    Ok(store
        .get_user(id)
        .await?
        .map(|u| u.username)
        .unwrap_or_else(|| id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_offset() {
        assert_eq!(Page::first(50).offset(), 0);
        assert_eq!(Page { number: 3, limit: 20 }.offset(), 40);
        assert_eq!(Page { number: 0, limit: 20 }.offset(), 0);
    }
}
