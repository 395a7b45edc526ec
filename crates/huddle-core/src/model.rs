//! Domain records owned by the chat engine.
//!
//! Rooms and messages are plain values loaded from and saved to the
//! [`Store`](crate::store::Store); all membership mutation goes through the
//! [`Room`] methods so the member/pending invariant holds in one place.

use huddle_protocol::{
    MemberRole, MemberView, MessageId, MessageKind, MessageView, PresenceStatus, ReactionView,
    RoomId, RoomKind, RoomView, SenderView, UserId,
};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Maximum room name length, in characters.
pub const MAX_ROOM_NAME_LENGTH: usize = 50;

/// Maximum room description length, in characters.
pub const MAX_ROOM_DESCRIPTION_LENGTH: usize = 200;

/// Maximum message content length after trimming, in characters.
pub const MAX_MESSAGE_LENGTH: usize = 1000;

/// Content shown in place of a soft-deleted message.
pub const DELETED_PLACEHOLDER: &str = "message deleted";

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Generate a new time-ordered identifier.
#[must_use]
pub fn new_id() -> String {
    Uuid::now_v7().to_string()
}

/// A verified user identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: UserId,
    pub username: String,
    pub avatar: Option<String>,
}

impl Identity {
    #[must_use]
    pub fn new(id: impl Into<UserId>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            avatar: None,
        }
    }

    /// Sender fields as rendered on messages.
    #[must_use]
    pub fn sender_view(&self) -> SenderView {
        SenderView {
            id: self.id.clone(),
            username: self.username.clone(),
            avatar: self.avatar.clone(),
        }
    }
}

/// Persisted user record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub avatar: Option<String>,
    pub status: PresenceStatus,
    pub last_seen: u64,
}

impl User {
    #[must_use]
    pub fn from_identity(identity: &Identity) -> Self {
        Self {
            id: identity.id.clone(),
            username: identity.username.clone(),
            avatar: identity.avatar.clone(),
            status: PresenceStatus::Offline,
            last_seen: now_millis(),
        }
    }

    #[must_use]
    pub fn identity(&self) -> Identity {
        Identity {
            id: self.id.clone(),
            username: self.username.clone(),
            avatar: self.avatar.clone(),
        }
    }
}

/// Access state of a user with respect to one room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    NonMember,
    Pending,
    Member,
}

/// A room member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub user: UserId,
    pub role: MemberRole,
    pub joined_at: u64,
}

/// A chat room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub description: Option<String>,
    pub kind: RoomKind,
    /// Canonical ownership: the creator's id, compared directly everywhere.
    pub creator: UserId,
    members: Vec<Member>,
    join_requests: Vec<UserId>,
    pub is_active: bool,
    pub max_members: usize,
    pub last_activity: u64,
    pub last_message: Option<MessageId>,
    pub created_at: u64,
}

impl Room {
    /// Create a room with its creator as admin.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        description: Option<String>,
        kind: RoomKind,
        creator: impl Into<UserId>,
        max_members: usize,
    ) -> Self {
        let now = now_millis();
        let creator = creator.into();
        Self {
            id: new_id(),
            name: name.into(),
            description,
            kind,
            members: vec![Member {
                user: creator.clone(),
                role: MemberRole::Admin,
                joined_at: now,
            }],
            creator,
            join_requests: Vec::new(),
            is_active: true,
            max_members,
            last_activity: now,
            last_message: None,
            created_at: now,
        }
    }

    /// Create a direct room; both parties start as members.
    #[must_use]
    pub fn direct(name: impl Into<String>, creator: impl Into<UserId>, peer: impl Into<UserId>) -> Self {
        let mut room = Self::new(name, None, RoomKind::Direct, creator, 2);
        room.add_member(peer, MemberRole::Member);
        room
    }

    #[must_use]
    pub fn members(&self) -> &[Member] {
        &self.members
    }

    #[must_use]
    pub fn join_requests(&self) -> &[UserId] {
        &self.join_requests
    }

    #[must_use]
    pub fn is_creator(&self, user: &str) -> bool {
        self.creator == user
    }

    #[must_use]
    pub fn is_member(&self, user: &str) -> bool {
        self.members.iter().any(|m| m.user == user)
    }

    #[must_use]
    pub fn is_pending(&self, user: &str) -> bool {
        self.join_requests.iter().any(|u| u == user)
    }

    #[must_use]
    pub fn membership(&self, user: &str) -> Membership {
        if self.is_member(user) {
            Membership::Member
        } else if self.is_pending(user) {
            Membership::Pending
        } else {
            Membership::NonMember
        }
    }

    #[must_use]
    pub fn role_of(&self, user: &str) -> Option<MemberRole> {
        self.members.iter().find(|m| m.user == user).map(|m| m.role)
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.members.len() >= self.max_members
    }

    /// Add a member, clearing any pending request.
    ///
    /// Returns `false` if the user was already a member.
    pub fn add_member(&mut self, user: impl Into<UserId>, role: MemberRole) -> bool {
        let user = user.into();
        self.join_requests.retain(|u| *u != user);
        if self.is_member(&user) {
            return false;
        }
        self.members.push(Member {
            user,
            role,
            joined_at: now_millis(),
        });
        true
    }

    /// Returns `false` if the user was not a member.
    pub fn remove_member(&mut self, user: &str) -> bool {
        let before = self.members.len();
        self.members.retain(|m| m.user != user);
        self.members.len() != before
    }

    /// Record a join request.
    ///
    /// Returns `false` if the user is already a member or already pending.
    pub fn add_join_request(&mut self, user: impl Into<UserId>) -> bool {
        let user = user.into();
        if self.is_member(&user) || self.is_pending(&user) {
            return false;
        }
        self.join_requests.push(user);
        true
    }

    /// Returns `false` if the user had no pending request.
    pub fn take_join_request(&mut self, user: &str) -> bool {
        let before = self.join_requests.len();
        self.join_requests.retain(|u| u != user);
        self.join_requests.len() != before
    }

    /// Record a new message as the room's latest activity.
    pub fn touch(&mut self, message_id: impl Into<MessageId>, at: u64) {
        self.last_activity = at;
        self.last_message = Some(message_id.into());
    }

    #[must_use]
    pub fn view(&self) -> RoomView {
        RoomView {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            kind: self.kind,
            creator: self.creator.clone(),
            members: self
                .members
                .iter()
                .map(|m| MemberView {
                    user: m.user.clone(),
                    role: m.role,
                    joined_at: m.joined_at,
                })
                .collect(),
            join_requests: self.join_requests.clone(),
            is_active: self.is_active,
            max_members: self.max_members,
            last_activity: self.last_activity,
            last_message: self.last_message.clone(),
            created_at: self.created_at,
        }
    }
}

/// File reference produced by the upload service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub url: String,
    pub name: Option<String>,
    pub size: Option<u64>,
}

/// A reaction, unique per (user, emoji).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reaction {
    pub user: UserId,
    pub emoji: String,
    pub created_at: u64,
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub content: String,
    pub sender: UserId,
    pub room: RoomId,
    pub kind: MessageKind,
    pub attachment: Option<Attachment>,
    pub reply_to: Option<MessageId>,
    reactions: Vec<Reaction>,
    pub is_deleted: bool,
    pub deleted_at: Option<u64>,
    pub created_at: u64,
}

impl Message {
    #[must_use]
    pub fn new(
        room: impl Into<RoomId>,
        sender: impl Into<UserId>,
        content: impl Into<String>,
        kind: MessageKind,
    ) -> Self {
        Self {
            id: new_id(),
            content: content.into(),
            sender: sender.into(),
            room: room.into(),
            kind,
            attachment: None,
            reply_to: None,
            reactions: Vec::new(),
            is_deleted: false,
            deleted_at: None,
            created_at: now_millis(),
        }
    }

    #[must_use]
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    #[must_use]
    pub fn with_reply_to(mut self, reply_to: impl Into<MessageId>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    #[must_use]
    pub fn reactions(&self) -> &[Reaction] {
        &self.reactions
    }

    /// Returns `false` if the (user, emoji) pair was already present.
    pub fn add_reaction(&mut self, user: &str, emoji: &str) -> bool {
        if self
            .reactions
            .iter()
            .any(|r| r.user == user && r.emoji == emoji)
        {
            return false;
        }
        self.reactions.push(Reaction {
            user: user.to_string(),
            emoji: emoji.to_string(),
            created_at: now_millis(),
        });
        true
    }

    /// Returns `false` if the (user, emoji) pair was absent.
    pub fn remove_reaction(&mut self, user: &str, emoji: &str) -> bool {
        let before = self.reactions.len();
        self.reactions
            .retain(|r| !(r.user == user && r.emoji == emoji));
        self.reactions.len() != before
    }

    /// Mark deleted at `at`.
    ///
    /// Returns `false` (leaving `deleted_at` untouched) if already deleted.
    pub fn soft_delete(&mut self, at: u64) -> bool {
        if self.is_deleted {
            return false;
        }
        self.is_deleted = true;
        self.deleted_at = Some(at);
        true
    }

    /// Whether the sweeper may reclaim this message at cutoff `cutoff`.
    #[must_use]
    pub fn is_expired(&self, cutoff: u64) -> bool {
        self.is_deleted && self.deleted_at.is_some_and(|at| at <= cutoff)
    }

    #[must_use]
    pub fn reaction_views(&self) -> Vec<ReactionView> {
        self.reactions
            .iter()
            .map(|r| ReactionView {
                user: r.user.clone(),
                emoji: r.emoji.clone(),
            })
            .collect()
    }

    /// Render for clients with resolved sender fields.
    ///
    /// Deleted messages keep their metadata but lose content and attachment.
    #[must_use]
    pub fn view(&self, sender: SenderView) -> MessageView {
        let (content, attachment) = if self.is_deleted {
            (DELETED_PLACEHOLDER.to_string(), None)
        } else {
            (self.content.clone(), self.attachment.as_ref())
        };

        MessageView {
            id: self.id.clone(),
            content,
            sender,
            room: self.room.clone(),
            kind: self.kind,
            file_url: attachment.map(|a| a.url.clone()),
            file_name: attachment.and_then(|a| a.name.clone()),
            file_size: attachment.and_then(|a| a.size),
            reactions: self.reaction_views(),
            reply_to: self.reply_to.clone(),
            is_deleted: self.is_deleted,
            deleted_at: self.deleted_at,
            created_at: self.created_at,
        }
    }
}
