//! Event types for the Huddle protocol.
//!
//! Every message on the wire is one event: an `event` name plus an optional
//! `data` payload. Inbound and outbound events are closed enums so that
//! malformed payloads are rejected at the boundary, before any component sees
//! them. Field names are part of the client contract and use camelCase.

use serde::{Deserialize, Serialize};

/// Opaque user identifier issued by the identity collaborator.
pub type UserId = String;

/// Room identifier.
pub type RoomId = String;

/// Message identifier.
pub type MessageId = String;

/// Room visibility.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    /// Anyone may join.
    #[default]
    Public,
    /// Joining requires the creator's approval.
    Private,
    /// Two-party conversation, created on demand.
    Direct,
}

/// Message content kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    File,
    /// Server-generated; clients cannot send these.
    System,
}

/// Role of a room member.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Admin,
    Moderator,
    #[default]
    Member,
}

/// User presence status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Away,
    Busy,
    #[default]
    Offline,
}

// ---------------------------------------------------------------------------
// Inbound payloads
// ---------------------------------------------------------------------------

/// A bare room reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRef {
    pub room_id: RoomId,
}

/// Creator's answer to a pending join request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestResponse {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub approved: bool,
}

/// Request to create a public or private room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: RoomKind,
}

/// Request to post a message to a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub room_id: RoomId,
    pub content: String,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
    /// URL produced by the upload service for image/file messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
}

impl SendMessageRequest {
    /// A plain text message.
    #[must_use]
    pub fn text(room_id: impl Into<RoomId>, content: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            content: content.into(),
            kind: MessageKind::Text,
            reply_to: None,
            file_url: None,
            file_name: None,
            file_size: None,
        }
    }
}

/// Add or remove a reaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionRequest {
    pub message_id: MessageId,
    pub emoji: String,
}

/// Events sent by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinRoom(RoomId),
    LeaveRoom(RoomId),
    RequestAccess(RoomRef),
    RespondRequest(RequestResponse),
    CreateRoom(CreateRoomRequest),
    CreatePrivateRoomWith(UserId),
    SendMessage(SendMessageRequest),
    DeleteMessage(MessageId),
    AddReaction(ReactionRequest),
    RemoveReaction(ReactionRequest),
    DeleteRoom(RoomId),
    TypingStart(RoomId),
    TypingStop(RoomId),
    GetRooms,
    GetMessages(RoomId),
}

impl ClientEvent {
    /// The wire name of this event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinRoom(_) => "join_room",
            ClientEvent::LeaveRoom(_) => "leave_room",
            ClientEvent::RequestAccess(_) => "request_access",
            ClientEvent::RespondRequest(_) => "respond_request",
            ClientEvent::CreateRoom(_) => "create_room",
            ClientEvent::CreatePrivateRoomWith(_) => "create_private_room_with",
            ClientEvent::SendMessage(_) => "send_message",
            ClientEvent::DeleteMessage(_) => "delete_message",
            ClientEvent::AddReaction(_) => "add_reaction",
            ClientEvent::RemoveReaction(_) => "remove_reaction",
            ClientEvent::DeleteRoom(_) => "delete_room",
            ClientEvent::TypingStart(_) => "typing_start",
            ClientEvent::TypingStop(_) => "typing_stop",
            ClientEvent::GetRooms => "get_rooms",
            ClientEvent::GetMessages(_) => "get_messages",
        }
    }

    /// The room this event targets, when it names one directly.
    #[must_use]
    pub fn room_id(&self) -> Option<&str> {
        match self {
            ClientEvent::JoinRoom(id)
            | ClientEvent::LeaveRoom(id)
            | ClientEvent::DeleteRoom(id)
            | ClientEvent::TypingStart(id)
            | ClientEvent::TypingStop(id)
            | ClientEvent::GetMessages(id) => Some(id),
            ClientEvent::RequestAccess(r) => Some(&r.room_id),
            ClientEvent::RespondRequest(r) => Some(&r.room_id),
            ClientEvent::SendMessage(m) => Some(&m.room_id),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound payloads
// ---------------------------------------------------------------------------

/// Entry of the online-users snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineUser {
    pub id: UserId,
    pub username: String,
    pub status: PresenceStatus,
}

/// Room membership record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberView {
    pub user: UserId,
    pub role: MemberRole,
    pub joined_at: u64,
}

/// A room as shown to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomView {
    pub id: RoomId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub kind: RoomKind,
    pub creator: UserId,
    pub members: Vec<MemberView>,
    pub join_requests: Vec<UserId>,
    pub is_active: bool,
    pub max_members: usize,
    pub last_activity: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<MessageId>,
    pub created_at: u64,
}

/// Resolved sender fields of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderView {
    pub id: UserId,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// A single reaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionView {
    pub user: UserId,
    pub emoji: String,
}

/// A message as shown to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: MessageId,
    pub content: String,
    pub sender: SenderView,
    pub room: RoomId,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    pub reactions: Vec<ReactionView>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
    pub is_deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<u64>,
    pub created_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomJoined {
    pub room_id: RoomId,
    pub room_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Denial {
    pub room_id: RoomId,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedMessage {
    pub message_id: MessageId,
    pub deleted_by: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionSet {
    pub message_id: MessageId,
    pub reactions: Vec<ReactionView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    pub id: UserId,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub room_id: RoomId,
    pub requester: Requester,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Typing {
    pub user_id: UserId,
    pub username: String,
    pub room_id: RoomId,
}

/// A short-lived room notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoticeView {
    pub notice_id: String,
    pub room_id: RoomId,
    pub message: String,
    pub expires_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoticeRef {
    pub notice_id: String,
    pub room_id: RoomId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

/// Events sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    OnlineUsers(Vec<OnlineUser>),
    UserJoined(OnlineUser),
    UserLeft(UserId),
    RoomsList(Vec<RoomView>),
    RoomCreated(RoomView),
    RoomDeleted(RoomRef),
    JoinedRoom(RoomJoined),
    LeftRoom(RoomJoined),
    AccessDenied(Denial),
    NewMessage(MessageView),
    MessageDeleted(DeletedMessage),
    MessagesHistory(Vec<MessageView>),
    MessageReactions(ReactionSet),
    NewJoinRequest(JoinRequest),
    RequestApproved(RoomRef),
    RequestDenied(RoomRef),
    UserTyping(Typing),
    UserStoppedTyping(Typing),
    SystemNotice(NoticeView),
    NoticeExpired(NoticeRef),
    Error(ErrorPayload),
}

impl ServerEvent {
    /// Create an `error` event.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error(ErrorPayload {
            message: message.into(),
        })
    }

    /// Create a `room_deleted`, `request_approved` or similar room reference.
    #[must_use]
    pub fn room_ref(room_id: impl Into<RoomId>) -> RoomRef {
        RoomRef {
            room_id: room_id.into(),
        }
    }

    /// The wire name of this event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::OnlineUsers(_) => "online_users",
            ServerEvent::UserJoined(_) => "user_joined",
            ServerEvent::UserLeft(_) => "user_left",
            ServerEvent::RoomsList(_) => "rooms_list",
            ServerEvent::RoomCreated(_) => "room_created",
            ServerEvent::RoomDeleted(_) => "room_deleted",
            ServerEvent::JoinedRoom(_) => "joined_room",
            ServerEvent::LeftRoom(_) => "left_room",
            ServerEvent::AccessDenied(_) => "access_denied",
            ServerEvent::NewMessage(_) => "new_message",
            ServerEvent::MessageDeleted(_) => "message_deleted",
            ServerEvent::MessagesHistory(_) => "messages_history",
            ServerEvent::MessageReactions(_) => "message_reactions",
            ServerEvent::NewJoinRequest(_) => "new_join_request",
            ServerEvent::RequestApproved(_) => "request_approved",
            ServerEvent::RequestDenied(_) => "request_denied",
            ServerEvent::UserTyping(_) => "user_typing",
            ServerEvent::UserStoppedTyping(_) => "user_stopped_typing",
            ServerEvent::SystemNotice(_) => "system_notice",
            ServerEvent::NoticeExpired(_) => "notice_expired",
            ServerEvent::Error(_) => "error",
        }
    }
}
