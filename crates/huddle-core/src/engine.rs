//! The chat engine.
//!
//! Wires the components together over shared state and dispatches decoded
//! client events to them. Transport code only ever talks to [`ChatEngine`].

use crate::access::RoomAccessController;
use crate::error::{ChatError, ChatResult};
use crate::hub::Hub;
use crate::locks::RoomLocks;
use crate::model::Identity;
use crate::notice::{NoticeBoard, DEFAULT_NOTICE_TTL};
use crate::pipeline::MessagePipeline;
use crate::presence::PresenceBroadcaster;
use crate::registry::{ConnectionHandle, ConnectionRegistry, Session};
use crate::store::Store;
use crate::sweeper::{RetentionSweeper, DEFAULT_RETENTION, DEFAULT_SWEEP_INTERVAL};
use crate::typing::TypingTracker;
use huddle_protocol::{ClientEvent, ServerEvent};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Engine tunables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Capacity given to new public and private rooms.
    pub max_room_members: usize,
    /// Messages per history page.
    pub history_limit: usize,
    /// Lifetime of room notices.
    pub notice_ttl: Duration,
    /// Time between retention sweeps.
    pub sweep_interval: Duration,
    /// Age at which soft-deleted messages are purged.
    pub retention: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_room_members: 100,
            history_limit: 50,
            notice_ttl: DEFAULT_NOTICE_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            retention: DEFAULT_RETENTION,
        }
    }
}

pub struct ChatEngine {
    config: EngineConfig,
    store: Arc<dyn Store>,
    registry: Arc<ConnectionRegistry>,
    hub: Arc<Hub>,
    locks: Arc<RoomLocks>,
    notices: Arc<NoticeBoard>,
    presence: PresenceBroadcaster,
    access: RoomAccessController,
    pipeline: MessagePipeline,
    typing: TypingTracker,
    sweeper: Arc<RetentionSweeper>,
}

impl ChatEngine {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: EngineConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let hub = Arc::new(Hub::new(Arc::clone(&registry)));
        let locks = Arc::new(RoomLocks::new());
        let notices = Arc::new(NoticeBoard::new(Arc::clone(&hub), config.notice_ttl));

        let presence = PresenceBroadcaster::new(Arc::clone(&registry), Arc::clone(&store));
        let access = RoomAccessController::new(
            Arc::clone(&store),
            Arc::clone(&hub),
            Arc::clone(&locks),
            Arc::clone(&notices),
            config.max_room_members,
            config.history_limit,
        );
        let pipeline = MessagePipeline::new(
            Arc::clone(&store),
            Arc::clone(&hub),
            Arc::clone(&locks),
            config.history_limit,
        );
        let typing = TypingTracker::new(Arc::clone(&store), Arc::clone(&hub), Arc::clone(&locks));
        let sweeper = Arc::new(RetentionSweeper::new(
            Arc::clone(&store),
            Arc::clone(&locks),
            config.sweep_interval,
            config.retention,
        ));

        Self {
            config,
            store,
            registry,
            hub,
            locks,
            notices,
            presence,
            access,
            pipeline,
            typing,
            sweeper,
        }
    }

    /// Bring a verified connection online.
    ///
    /// The connection receives `online_users` then `rooms_list`, and is
    /// attached to every room channel its user belongs to. Connect and
    /// disconnect of one user never interleave.
    pub async fn connect(&self, identity: Identity, handle: ConnectionHandle) -> Session {
        let session = Session::new(identity, handle);
        let user_id = session.user_id();
        let _user_guard = self.locks.lock(&RoomLocks::user_key(user_id)).await;

        if let Some(previous) = self
            .presence
            .connect(&session.identity, session.handle.clone())
            .await
        {
            info!(user = %user_id, replaced = %previous.id(), "Connection replaced");
        }

        let attached = self.access.attach_member_rooms(user_id).await;
        let rooms = match attached {
            Ok(_) => self.access.rooms_for(user_id).await,
            Err(e) => Err(e),
        };
        match rooms {
            Ok(rooms) => {
                session.reply(ServerEvent::RoomsList(rooms));
            }
            Err(e) => {
                error!(user = %user_id, error = %e, "Failed to load rooms on connect");
                session.reply(e.to_event(None, "load rooms"));
            }
        }

        info!(user = %user_id, connection = %session.handle.id(), "User connected");
        session
    }

    /// Take a connection offline.
    ///
    /// A connection that was already replaced by a newer one for the same
    /// user leaves no trace.
    pub async fn disconnect(&self, session: &Session) {
        let _user_guard = self.locks.lock(&RoomLocks::user_key(session.user_id())).await;
        if !self
            .presence
            .disconnect(&session.identity, session.handle.id())
            .await
        {
            return;
        }

        let typing = self.typing.clear_user(&session.identity).await;
        let rooms = self.hub.unsubscribe_all(session.user_id());
        info!(
            user = %session.user_id(),
            connection = %session.handle.id(),
            rooms = rooms.len(),
            typing,
            "User disconnected"
        );
    }

    /// Handle a client event, replying to the caller on failure.
    ///
    /// The error is returned after the reply was queued, for accounting.
    pub async fn dispatch(&self, session: &Session, event: ClientEvent) -> ChatResult<()> {
        let name = event.name();
        let room_id = event.room_id().map(str::to_string);

        let result = self.handle(session, event).await;
        if let Err(e) = &result {
            if e.is_internal() {
                error!(user = %session.user_id(), event = name, room = ?room_id, error = %e, "Operation failed");
            } else {
                warn!(user = %session.user_id(), event = name, room = ?room_id, reason = %e, "Operation rejected");
            }
            session.reply(e.to_event(room_id.as_deref(), &name.replace('_', " ")));
        }
        result
    }

    /// Handle a client event without replying on failure.
    pub async fn handle(&self, session: &Session, event: ClientEvent) -> ChatResult<()> {
        debug!(user = %session.user_id(), event = event.name(), "Handling event");

        match event {
            ClientEvent::JoinRoom(room_id) => {
                self.access.join_room(session, &room_id).await?;
            }
            ClientEvent::LeaveRoom(room_id) => {
                self.access.leave_room(session, &room_id).await?;
            }
            ClientEvent::RequestAccess(room) => {
                self.access.request_access(session, &room.room_id).await?;
            }
            ClientEvent::RespondRequest(response) => {
                self.access.respond_to_request(session, &response).await?;
            }
            ClientEvent::CreateRoom(request) => {
                self.access.create_room(session, &request).await?;
            }
            ClientEvent::CreatePrivateRoomWith(target) => {
                self.access.open_direct_room(session, &target).await?;
            }
            ClientEvent::SendMessage(request) => {
                self.pipeline.send_message(session, &request).await?;
            }
            ClientEvent::DeleteMessage(message_id) => {
                self.pipeline.delete_message(session, &message_id).await?;
            }
            ClientEvent::AddReaction(request) => {
                self.pipeline.add_reaction(session, &request).await?;
            }
            ClientEvent::RemoveReaction(request) => {
                self.pipeline.remove_reaction(session, &request).await?;
            }
            ClientEvent::DeleteRoom(room_id) => {
                self.access.delete_room(session, &room_id).await?;
                self.typing.clear_room(&room_id);
            }
            ClientEvent::TypingStart(room_id) => {
                self.typing.start(session, &room_id).await?;
            }
            ClientEvent::TypingStop(room_id) => {
                self.typing.stop(session, &room_id).await?;
            }
            ClientEvent::GetRooms => {
                let rooms = self.access.rooms_for(session.user_id()).await?;
                session.reply(ServerEvent::RoomsList(rooms));
            }
            ClientEvent::GetMessages(room_id) => {
                self.pipeline.history(session, &room_id).await?;
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    #[must_use]
    pub fn notices(&self) -> &Arc<NoticeBoard> {
        &self.notices
    }

    #[must_use]
    pub fn access(&self) -> &RoomAccessController {
        &self.access
    }

    #[must_use]
    pub fn pipeline(&self) -> &MessagePipeline {
        &self.pipeline
    }

    #[must_use]
    pub fn typing(&self) -> &TypingTracker {
        &self.typing
    }

    #[must_use]
    pub fn sweeper(&self) -> &Arc<RetentionSweeper> {
        &self.sweeper
    }

    /// Number of users online.
    #[must_use]
    pub fn online_count(&self) -> usize {
        self.registry.len()
    }
}
