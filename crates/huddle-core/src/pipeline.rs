//! Message pipeline.
//!
//! Validates, persists and fans out chat messages, reactions and soft
//! deletes. Persistence and the resulting broadcast happen under the room
//! lock, so every subscriber observes a room's messages in acceptance order.

use crate::access::load_active_room;
use crate::error::{ChatError, ChatResult};
use crate::hub::Hub;
use crate::locks::RoomLocks;
use crate::model::{now_millis, Attachment, Message, MAX_MESSAGE_LENGTH};
use crate::registry::Session;
use crate::store::{Page, Store, StoreError};
use huddle_protocol::{
    DeletedMessage, MessageKind, MessageView, ReactionRequest, ReactionSet, SendMessageRequest,
    SenderView, ServerEvent, UserId,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Resolve the display fields of a message sender.
pub(crate) async fn sender_view(store: &dyn Store, id: &str) -> Result<SenderView, StoreError> {
    Ok(match store.get_user(id).await? {
        Some(user) => user.identity().sender_view(),
        None => SenderView {
            id: id.to_string(),
            username: id.to_string(),
            avatar: None,
        },
    })
}

/// The latest page of a room's visible messages, oldest first.
pub(crate) async fn latest_history(
    store: &dyn Store,
    room_id: &str,
    limit: usize,
) -> Result<Vec<MessageView>, StoreError> {
    let mut messages = store.messages_by_room(room_id, Page::first(limit)).await?;
    messages.reverse();

    let mut senders: HashMap<UserId, SenderView> = HashMap::new();
    let mut views = Vec::with_capacity(messages.len());
    for message in &messages {
        let sender = match senders.get(&message.sender) {
            Some(sender) => sender.clone(),
            None => {
                let sender = sender_view(store, &message.sender).await?;
                senders.insert(message.sender.clone(), sender.clone());
                sender
            }
        };
        views.push(message.view(sender));
    }
    Ok(views)
}

pub struct MessagePipeline {
    store: Arc<dyn Store>,
    hub: Arc<Hub>,
    locks: Arc<RoomLocks>,
    history_limit: usize,
}

impl MessagePipeline {
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        hub: Arc<Hub>,
        locks: Arc<RoomLocks>,
        history_limit: usize,
    ) -> Self {
        Self {
            store,
            hub,
            locks,
            history_limit,
        }
    }

    /// Persist a message and broadcast it to the room, sender included.
    pub async fn send_message(
        &self,
        session: &Session,
        request: &SendMessageRequest,
    ) -> ChatResult<MessageView> {
        let content = request.content.trim();
        if content.is_empty() {
            return Err(ChatError::Validation("Message content cannot be empty".into()));
        }
        if content.chars().count() > MAX_MESSAGE_LENGTH {
            return Err(ChatError::Validation(format!(
                "Message cannot exceed {MAX_MESSAGE_LENGTH} characters"
            )));
        }
        let attachment = validate_attachment(request)?;

        let room_id = request.room_id.as_str();
        let user_id = session.user_id();
        let _guard = self.locks.lock(room_id).await;
        let mut room = load_active_room(self.store.as_ref(), room_id).await?;
        if !room.is_member(user_id) {
            return Err(ChatError::AccessDenied(
                "You are not a member of this room.".into(),
            ));
        }

        let mut message = Message::new(room_id, user_id, content, request.kind);
        if let Some(attachment) = attachment {
            message = message.with_attachment(attachment);
        }
        if let Some(reply_to) = &request.reply_to {
            match self.store.get_message(reply_to).await? {
                Some(target) if target.room == room_id && !target.is_deleted => {
                    message = message.with_reply_to(reply_to.clone());
                }
                _ => {
                    return Err(ChatError::Validation(
                        "Replied-to message not found in this room".into(),
                    ))
                }
            }
        }

        self.store.create_message(message.clone()).await?;
        room.touch(message.id.clone(), message.created_at);
        self.store.update_room(&room).await?;

        let view = message.view(session.identity.sender_view());
        self.hub.subscribe(user_id, room_id);
        let recipients = self
            .hub
            .publish(room_id, ServerEvent::NewMessage(view.clone()), None);

        trace!(room = %room_id, user = %user_id, message = %message.id, recipients, "Message sent");
        Ok(view)
    }

    /// Soft-delete a message. Sender or room creator only.
    ///
    /// Returns `false` if it was already deleted.
    pub async fn delete_message(&self, session: &Session, message_id: &str) -> ChatResult<bool> {
        let user_id = session.user_id();
        let room_id = self.room_of(message_id).await?;

        let _guard = self.locks.lock(&room_id).await;
        let mut message = self.message(message_id).await?;
        let room = load_active_room(self.store.as_ref(), &room_id).await?;

        if message.sender != user_id && !room.is_creator(user_id) {
            return Err(ChatError::Unauthorized(
                "You can only delete your own messages".into(),
            ));
        }
        if !message.soft_delete(now_millis()) {
            debug!(message = %message_id, "Message already deleted");
            return Ok(false);
        }
        self.store.update_message(&message).await?;

        self.hub.publish(
            &room_id,
            ServerEvent::MessageDeleted(DeletedMessage {
                message_id: message.id.clone(),
                deleted_by: user_id.to_string(),
            }),
            None,
        );
        debug!(room = %room_id, user = %user_id, message = %message_id, "Message deleted");
        Ok(true)
    }

    /// Add a reaction. Returns `false` if it was already present.
    pub async fn add_reaction(&self, session: &Session, request: &ReactionRequest) -> ChatResult<bool> {
        self.react(session, request, true).await
    }

    /// Remove a reaction. Returns `false` if it was absent.
    pub async fn remove_reaction(
        &self,
        session: &Session,
        request: &ReactionRequest,
    ) -> ChatResult<bool> {
        self.react(session, request, false).await
    }

    async fn react(&self, session: &Session, request: &ReactionRequest, add: bool) -> ChatResult<bool> {
        let emoji = request.emoji.trim();
        if emoji.is_empty() {
            return Err(ChatError::Validation("Emoji is required".into()));
        }

        let user_id = session.user_id();
        let room_id = self.room_of(&request.message_id).await?;

        let _guard = self.locks.lock(&room_id).await;
        let mut message = self.message(&request.message_id).await?;
        let room = load_active_room(self.store.as_ref(), &room_id).await?;

        if !room.is_member(user_id) {
            return Err(ChatError::AccessDenied(
                "You are not a member of this room.".into(),
            ));
        }
        if message.is_deleted {
            return Err(ChatError::Validation(
                "Cannot react to a deleted message".into(),
            ));
        }

        let changed = if add {
            message.add_reaction(user_id, emoji)
        } else {
            message.remove_reaction(user_id, emoji)
        };
        if !changed {
            return Ok(false);
        }
        self.store.update_message(&message).await?;

        self.hub.publish(
            &room_id,
            ServerEvent::MessageReactions(ReactionSet {
                message_id: message.id.clone(),
                reactions: message.reaction_views(),
            }),
            None,
        );
        Ok(true)
    }

    /// Reply with the latest history page of a room the caller belongs to.
    pub async fn history(&self, session: &Session, room_id: &str) -> ChatResult<Vec<MessageView>> {
        let room = load_active_room(self.store.as_ref(), room_id).await?;
        if !room.is_member(session.user_id()) {
            return Err(ChatError::AccessDenied(
                "You are not a member of this room.".into(),
            ));
        }

        let history = latest_history(self.store.as_ref(), room_id, self.history_limit).await?;
        session.reply(ServerEvent::MessagesHistory(history.clone()));
        Ok(history)
    }

    async fn message(&self, message_id: &str) -> ChatResult<Message> {
        self.store
            .get_message(message_id)
            .await?
            .ok_or_else(|| ChatError::NotFound("Message not found".into()))
    }

    async fn room_of(&self, message_id: &str) -> ChatResult<String> {
        Ok(self.message(message_id).await?.room)
    }
}

fn validate_attachment(request: &SendMessageRequest) -> ChatResult<Option<Attachment>> {
    let url = request
        .file_url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty());

    match request.kind {
        MessageKind::System => Err(ChatError::Validation(
            "System messages cannot be sent by clients".into(),
        )),
        MessageKind::Image | MessageKind::File if url.is_none() => Err(ChatError::Validation(
            "Attachments require a file URL".into(),
        )),
        _ => Ok(url.map(|url| Attachment {
            url: url.to_string(),
            name: request.file_name.clone(),
            size: request.file_size,
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use crate::model::{new_id, Identity, Room, User};
    use crate::registry::{ConnectionHandle, ConnectionRegistry, EventReceiver};
    use huddle_protocol::{MemberRole, RoomKind};

    struct Harness {
        pipeline: MessagePipeline,
        store: Arc<InMemoryStore>,
        registry: Arc<ConnectionRegistry>,
        hub: Arc<Hub>,
    }

    impl Harness {
        fn new() -> Self {
            let store = Arc::new(InMemoryStore::new());
            let registry = Arc::new(ConnectionRegistry::new());
            let hub = Arc::new(Hub::new(Arc::clone(&registry)));
            let pipeline =
                MessagePipeline::new(store.clone(), Arc::clone(&hub), Arc::new(RoomLocks::new()), 50);
            Self {
                pipeline,
                store,
                registry,
                hub,
            }
        }

        async fn connect(&self, id: &str) -> (Session, EventReceiver) {
            let identity = Identity::new(id, format!("{id}-name"));
            self.store
                .put_user(User::from_identity(&identity))
                .await
                .unwrap();
            let (handle, rx) = ConnectionHandle::channel();
            self.registry.register(identity.clone(), handle.clone());
            (Session::new(identity, handle), rx)
        }

        /// Room created by `creator` with `members` attached.
        async fn room(&self, creator: &str, members: &[&str]) -> String {
            let mut room = Room::new(new_id(), None, RoomKind::Public, creator, 100);
            for member in members {
                room.add_member(*member, MemberRole::Member);
            }
            let id = room.id.clone();
            self.store.create_room(room).await.unwrap();
            self.hub.subscribe(creator, &id);
            for member in members {
                self.hub.subscribe(member, &id);
            }
            id
        }
    }

    #[tokio::test]
    async fn test_send_broadcasts_to_room_including_sender() {
        let h = Harness::new();
        let (alice, mut alice_rx) = h.connect("alice").await;
        let (_bob, mut bob_rx) = h.connect("bob").await;
        let room = h.room("alice", &["bob"]).await;

        let view = h
            .pipeline
            .send_message(&alice, &SendMessageRequest::text(&room, "  hello  "))
            .await
            .unwrap();
        assert_eq!(view.content, "hello");
        assert_eq!(view.sender.username, "alice-name");

        assert_eq!(*alice_rx.try_recv().unwrap(), ServerEvent::NewMessage(view.clone()));
        assert_eq!(*bob_rx.try_recv().unwrap(), ServerEvent::NewMessage(view.clone()));

        let stored = h.store.get_room(&room).await.unwrap().unwrap();
        assert_eq!(stored.last_message, Some(view.id));
    }

    #[tokio::test]
    async fn test_send_validation() {
        let h = Harness::new();
        let (alice, mut alice_rx) = h.connect("alice").await;
        let room = h.room("alice", &[]).await;

        let empty = SendMessageRequest::text(&room, "   ");
        assert!(matches!(
            h.pipeline.send_message(&alice, &empty).await,
            Err(ChatError::Validation(_))
        ));

        let long = SendMessageRequest::text(&room, "x".repeat(MAX_MESSAGE_LENGTH + 1));
        assert!(matches!(
            h.pipeline.send_message(&alice, &long).await,
            Err(ChatError::Validation(_))
        ));

        let mut image = SendMessageRequest::text(&room, "look");
        image.kind = MessageKind::Image;
        assert!(h.pipeline.send_message(&alice, &image).await.is_err());
        image.file_url = Some("https://files.example/cat.png".into());
        let view = h.pipeline.send_message(&alice, &image).await.unwrap();
        assert_eq!(view.file_url.as_deref(), Some("https://files.example/cat.png"));

        let mut system = SendMessageRequest::text(&room, "hi");
        system.kind = MessageKind::System;
        assert!(h.pipeline.send_message(&alice, &system).await.is_err());

        let missing = SendMessageRequest::text("nope", "hi");
        assert!(matches!(
            h.pipeline.send_message(&alice, &missing).await,
            Err(ChatError::NotFound(_))
        ));

        // Only the successful image message was delivered.
        assert!(matches!(&*alice_rx.try_recv().unwrap(), ServerEvent::NewMessage(_)));
        assert!(alice_rx.try_recv().is_err());
        assert_eq!(h.store.message_count(), 1);
    }

    #[tokio::test]
    async fn test_reply_must_be_in_same_room() {
        let h = Harness::new();
        let (alice, _rx) = h.connect("alice").await;
        let room = h.room("alice", &[]).await;
        let other = h.room("alice", &[]).await;

        let original = h
            .pipeline
            .send_message(&alice, &SendMessageRequest::text(&other, "elsewhere"))
            .await
            .unwrap();

        let mut reply = SendMessageRequest::text(&room, "re");
        reply.reply_to = Some(original.id.clone());
        assert!(matches!(
            h.pipeline.send_message(&alice, &reply).await,
            Err(ChatError::Validation(_))
        ));

        reply.room_id = other.clone();
        let view = h.pipeline.send_message(&alice, &reply).await.unwrap();
        assert_eq!(view.reply_to, Some(original.id));
    }

    #[tokio::test]
    async fn test_delete_by_sender_or_creator_only() {
        let h = Harness::new();
        let (alice, _a) = h.connect("alice").await;
        let (bob, mut bob_rx) = h.connect("bob").await;
        let (carol, _c) = h.connect("carol").await;
        let room = h.room("alice", &["bob", "carol"]).await;

        let msg = h
            .pipeline
            .send_message(&bob, &SendMessageRequest::text(&room, "oops"))
            .await
            .unwrap();
        bob_rx.try_recv().unwrap();

        assert!(matches!(
            h.pipeline.delete_message(&carol, &msg.id).await,
            Err(ChatError::Unauthorized(_))
        ));

        // The room creator may delete anyone's message.
        assert!(h.pipeline.delete_message(&alice, &msg.id).await.unwrap());
        let first = h.store.get_message(&msg.id).await.unwrap().unwrap().deleted_at;
        assert_eq!(
            *bob_rx.try_recv().unwrap(),
            ServerEvent::MessageDeleted(DeletedMessage {
                message_id: msg.id.clone(),
                deleted_by: "alice".into(),
            })
        );

        // Second delete is silent and keeps the first timestamp.
        assert!(!h.pipeline.delete_message(&bob, &msg.id).await.unwrap());
        assert!(bob_rx.try_recv().is_err());
        let second = h.store.get_message(&msg.id).await.unwrap().unwrap().deleted_at;
        assert_eq!(first, second);

        let history = h.pipeline.history(&bob, &room).await.unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_reactions_broadcast_only_on_change() {
        let h = Harness::new();
        let (alice, mut alice_rx) = h.connect("alice").await;
        let (bob, _b) = h.connect("bob").await;
        let room = h.room("alice", &["bob"]).await;

        let msg = h
            .pipeline
            .send_message(&alice, &SendMessageRequest::text(&room, "ship it"))
            .await
            .unwrap();
        alice_rx.try_recv().unwrap();

        let thumbs = ReactionRequest {
            message_id: msg.id.clone(),
            emoji: "👍".into(),
        };
        assert!(h.pipeline.add_reaction(&bob, &thumbs).await.unwrap());
        assert!(!h.pipeline.add_reaction(&bob, &thumbs).await.unwrap());
        match &*alice_rx.try_recv().unwrap() {
            ServerEvent::MessageReactions(set) => assert_eq!(set.reactions.len(), 1),
            other => panic!("unexpected {other:?}"),
        }
        assert!(alice_rx.try_recv().is_err());

        assert!(h.pipeline.remove_reaction(&bob, &thumbs).await.unwrap());
        assert!(!h.pipeline.remove_reaction(&bob, &thumbs).await.unwrap());
        match &*alice_rx.try_recv().unwrap() {
            ServerEvent::MessageReactions(set) => assert!(set.reactions.is_empty()),
            other => panic!("unexpected {other:?}"),
        }

        h.pipeline.delete_message(&alice, &msg.id).await.unwrap();
        assert!(matches!(
            h.pipeline.add_reaction(&bob, &thumbs).await,
            Err(ChatError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_history_is_chronological() {
        let h = Harness::new();
        let (alice, _a) = h.connect("alice").await;
        let (outsider, _o) = h.connect("outsider").await;
        let room = h.room("alice", &[]).await;

        for text in ["one", "two", "three"] {
            h.pipeline
                .send_message(&alice, &SendMessageRequest::text(&room, text))
                .await
                .unwrap();
        }

        let contents: Vec<_> = h
            .pipeline
            .history(&alice, &room)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["one", "two", "three"]);

        assert!(matches!(
            h.pipeline.history(&outsider, &room).await,
            Err(ChatError::AccessDenied(_))
        ));
    }
}
