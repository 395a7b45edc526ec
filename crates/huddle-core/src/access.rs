//! Room access control.
//!
//! Owns the per-(room, user) membership state machine:
//!
//! ```text
//!              join (public)            approve
//!   NonMember ──────────────▶ Member ◀──────────── Pending
//!       │  ▲                    │                    ▲  │
//!       │  └──── leave ─────────┘                    │  │
//!       └─────────────── request_access ─────────────┘  │
//!          ▲                                            │
//!          └──────────────── deny / leave ──────────────┘
//! ```
//!
//! Every transition runs under the room's lock, and every resulting event is
//! emitted after the store accepted the new state.

use crate::error::{ChatError, ChatResult};
use crate::hub::Hub;
use crate::locks::RoomLocks;
use crate::model::{Membership, Room, MAX_ROOM_DESCRIPTION_LENGTH, MAX_ROOM_NAME_LENGTH};
use crate::notice::NoticeBoard;
use crate::pipeline::latest_history;
use crate::registry::Session;
use crate::store::{username_of, Store, StoreError};
use huddle_protocol::{
    CreateRoomRequest, JoinRequest, MemberRole, RequestResponse, Requester, RoomId, RoomJoined,
    RoomKind, RoomView, ServerEvent,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Load a room, treating deactivated rooms as absent.
pub(crate) async fn load_active_room(store: &dyn Store, room_id: &str) -> ChatResult<Room> {
    match store.get_room(room_id).await? {
        Some(room) if room.is_active => Ok(room),
        _ => Err(ChatError::NotFound("Room not found".into())),
    }
}

/// Result of a successful join.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub room: RoomView,
    /// `false` if the user was already a member.
    pub newly_joined: bool,
}

/// Outcome of a creator's response to an access request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestDecision {
    Approved,
    Denied,
    /// The user was not pending (already a member, or never asked).
    NoOp,
}

/// Enforces room membership and access-request rules.
pub struct RoomAccessController {
    store: Arc<dyn Store>,
    hub: Arc<Hub>,
    locks: Arc<RoomLocks>,
    notices: Arc<NoticeBoard>,
    max_room_members: usize,
    history_limit: usize,
}

impl RoomAccessController {
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        hub: Arc<Hub>,
        locks: Arc<RoomLocks>,
        notices: Arc<NoticeBoard>,
        max_room_members: usize,
        history_limit: usize,
    ) -> Self {
        Self {
            store,
            hub,
            locks,
            notices,
            max_room_members,
            history_limit,
        }
    }

    /// Join a room, replying `joined_room` and the latest history page.
    pub async fn join_room(&self, session: &Session, room_id: &str) -> ChatResult<JoinOutcome> {
        let _guard = self.locks.lock(room_id).await;
        let mut room = load_active_room(self.store.as_ref(), room_id).await?;
        let user_id = session.user_id();

        let newly_joined = match room.membership(user_id) {
            Membership::Member => false,
            Membership::Pending => {
                return Err(ChatError::AccessDenied(
                    "Your access request is still pending.".into(),
                ))
            }
            Membership::NonMember => {
                match room.kind {
                    RoomKind::Public => {
                        if room.is_full() {
                            return Err(ChatError::RoomFull);
                        }
                        room.add_member(user_id, MemberRole::Member);
                    }
                    // A creator who left may come back to their own room.
                    _ if room.is_creator(user_id) => {
                        room.add_member(user_id, MemberRole::Admin);
                    }
                    _ => {
                        return Err(ChatError::AccessDenied(
                            "Permission needed to join this room.".into(),
                        ))
                    }
                }
                self.store.update_room(&room).await?;
                true
            }
        };

        self.hub.subscribe(user_id, room_id);
        session.reply(ServerEvent::JoinedRoom(RoomJoined {
            room_id: room.id.clone(),
            room_name: room.name.clone(),
        }));
        let history = latest_history(self.store.as_ref(), room_id, self.history_limit).await?;
        session.reply(ServerEvent::MessagesHistory(history));

        if newly_joined {
            info!(room = %room_id, user = %user_id, "User joined room");
            self.notices.post(
                room_id,
                format!("{} joined the room", session.identity.username),
            );
        }

        Ok(JoinOutcome {
            room: room.view(),
            newly_joined,
        })
    }

    /// Ask the creator of a private room for access.
    ///
    /// Returns `false` if a request was already pending.
    pub async fn request_access(&self, session: &Session, room_id: &str) -> ChatResult<bool> {
        let _guard = self.locks.lock(room_id).await;
        let mut room = load_active_room(self.store.as_ref(), room_id).await?;
        let user_id = session.user_id();

        if room.kind != RoomKind::Private {
            return Err(ChatError::Validation(
                "Access requests are only needed for private rooms".into(),
            ));
        }
        match room.membership(user_id) {
            Membership::Member => {
                return Err(ChatError::Validation(
                    "You are already a member of this room".into(),
                ))
            }
            Membership::Pending => return Ok(false),
            Membership::NonMember => {}
        }

        room.add_join_request(user_id);
        self.store.update_room(&room).await?;

        self.hub.registry().send_to(
            &room.creator,
            ServerEvent::NewJoinRequest(JoinRequest {
                room_id: room.id.clone(),
                requester: Requester {
                    id: session.identity.id.clone(),
                    username: session.identity.username.clone(),
                },
            }),
        );
        debug!(room = %room_id, user = %user_id, "Access requested");
        Ok(true)
    }

    /// Approve or deny a pending request. Creator only.
    pub async fn respond_to_request(
        &self,
        session: &Session,
        response: &RequestResponse,
    ) -> ChatResult<RequestDecision> {
        let room_id = response.room_id.as_str();
        let requester = response.user_id.as_str();

        let _guard = self.locks.lock(room_id).await;
        let mut room = load_active_room(self.store.as_ref(), room_id).await?;

        if !room.is_creator(session.user_id()) {
            return Err(ChatError::Unauthorized(
                "Only the room creator can respond to access requests".into(),
            ));
        }
        if room.membership(requester) != Membership::Pending {
            debug!(room = %room_id, user = %requester, "No pending request, ignoring response");
            return Ok(RequestDecision::NoOp);
        }

        let registry = self.hub.registry();
        if !response.approved {
            room.take_join_request(requester);
            self.store.update_room(&room).await?;
            registry.send_to(
                requester,
                ServerEvent::RequestDenied(ServerEvent::room_ref(room_id)),
            );
            info!(room = %room_id, user = %requester, "Access request denied");
            return Ok(RequestDecision::Denied);
        }

        room.add_member(requester, MemberRole::Member);
        self.store.update_room(&room).await?;

        if registry.is_online(requester) {
            self.hub.subscribe(requester, room_id);
            registry.send_to(
                requester,
                ServerEvent::RequestApproved(ServerEvent::room_ref(room_id)),
            );
            registry.send_to(
                requester,
                ServerEvent::RoomsList(self.rooms_for(requester).await?),
            );
        }
        session.reply(ServerEvent::RoomsList(
            self.rooms_for(session.user_id()).await?,
        ));

        let username = username_of(self.store.as_ref(), requester).await?;
        self.notices
            .post(room_id, format!("{username} joined the room"));
        info!(room = %room_id, user = %requester, "Access request approved");
        Ok(RequestDecision::Approved)
    }

    /// Leave a room, or withdraw a pending request.
    pub async fn leave_room(&self, session: &Session, room_id: &str) -> ChatResult<()> {
        let _guard = self.locks.lock(room_id).await;
        let mut room = load_active_room(self.store.as_ref(), room_id).await?;
        let user_id = session.user_id();

        if room.kind == RoomKind::Direct {
            return Err(ChatError::Validation("Direct rooms cannot be left".into()));
        }

        let was_member = match room.membership(user_id) {
            Membership::Member => room.remove_member(user_id),
            Membership::Pending => {
                room.take_join_request(user_id);
                false
            }
            Membership::NonMember => {
                return Err(ChatError::Validation(
                    "You are not a member of this room".into(),
                ))
            }
        };
        self.store.update_room(&room).await?;

        self.hub.unsubscribe(user_id, room_id);
        session.reply(ServerEvent::LeftRoom(RoomJoined {
            room_id: room.id.clone(),
            room_name: room.name.clone(),
        }));

        if was_member {
            info!(room = %room_id, user = %user_id, "User left room");
            self.notices.post(
                room_id,
                format!("{} left the room", session.identity.username),
            );
        }
        Ok(())
    }

    /// Create a public or private room owned by the caller.
    pub async fn create_room(
        &self,
        session: &Session,
        request: &CreateRoomRequest,
    ) -> ChatResult<RoomView> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(ChatError::Validation("Room name is required".into()));
        }
        if name.chars().count() > MAX_ROOM_NAME_LENGTH {
            return Err(ChatError::Validation(format!(
                "Room name must be at most {MAX_ROOM_NAME_LENGTH} characters"
            )));
        }
        let description = request
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty());
        if description.is_some_and(|d| d.chars().count() > MAX_ROOM_DESCRIPTION_LENGTH) {
            return Err(ChatError::Validation(format!(
                "Room description must be at most {MAX_ROOM_DESCRIPTION_LENGTH} characters"
            )));
        }
        if request.kind == RoomKind::Direct {
            return Err(ChatError::Validation(
                "Direct rooms are opened with another user, not created by name".into(),
            ));
        }

        let room = Room::new(
            name,
            description.map(str::to_string),
            request.kind,
            session.user_id(),
            self.max_room_members,
        );
        let _guard = self.locks.lock(&room.id).await;
        self.store
            .create_room(room.clone())
            .await
            .map_err(|e| match e {
                StoreError::Conflict(_) => {
                    ChatError::Validation("Room with this name already exists".into())
                }
                other => other.into(),
            })?;

        let view = room.view();
        self.hub.subscribe(session.user_id(), &room.id);
        self.hub
            .registry()
            .broadcast(ServerEvent::RoomCreated(view.clone()), None);

        info!(room = %room.id, name = %room.name, kind = ?room.kind, creator = %room.creator, "Room created");
        Ok(view)
    }

    /// Open (or reopen) the direct room between the caller and `target`.
    pub async fn open_direct_room(&self, session: &Session, target: &str) -> ChatResult<RoomView> {
        let user_id = session.user_id();
        if target == user_id {
            return Err(ChatError::Validation(
                "Cannot open a direct room with yourself".into(),
            ));
        }
        let Some(peer) = self.store.get_user(target).await? else {
            return Err(ChatError::NotFound("User not found".into()));
        };

        let _pair_guard = self.locks.lock(&RoomLocks::direct_key(user_id, target)).await;

        if let Some(room) = self.store.find_direct_room(user_id, target).await? {
            let _guard = self.locks.lock(&room.id).await;
            self.hub.subscribe(user_id, &room.id);
            session.reply(ServerEvent::JoinedRoom(RoomJoined {
                room_id: room.id.clone(),
                room_name: room.name.clone(),
            }));
            let history =
                latest_history(self.store.as_ref(), &room.id, self.history_limit).await?;
            session.reply(ServerEvent::MessagesHistory(history));
            debug!(room = %room.id, user = %user_id, peer = %target, "Reopened direct room");
            return Ok(room.view());
        }

        let room = Room::direct(
            format!("{} & {}", session.identity.username, peer.username),
            user_id,
            target,
        );
        let _guard = self.locks.lock(&room.id).await;
        self.store.create_room(room.clone()).await?;

        let registry = self.hub.registry();
        self.hub.subscribe(user_id, &room.id);
        if registry.is_online(target) {
            self.hub.subscribe(target, &room.id);
        }

        let view = room.view();
        session.reply(ServerEvent::JoinedRoom(RoomJoined {
            room_id: room.id.clone(),
            room_name: room.name.clone(),
        }));
        session.reply(ServerEvent::RoomCreated(view.clone()));
        registry.send_to(target, ServerEvent::RoomCreated(view.clone()));

        info!(room = %room.id, user = %user_id, peer = %target, "Direct room created");
        Ok(view)
    }

    /// Deactivate a room. Creator only; every connected user is told.
    pub async fn delete_room(&self, session: &Session, room_id: &str) -> ChatResult<()> {
        let _guard = self.locks.lock(room_id).await;
        let mut room = load_active_room(self.store.as_ref(), room_id).await?;

        if !room.is_creator(session.user_id()) {
            return Err(ChatError::Unauthorized(
                "Only the room creator can delete this room".into(),
            ));
        }

        room.is_active = false;
        self.store.update_room(&room).await?;

        self.hub
            .registry()
            .broadcast(ServerEvent::RoomDeleted(ServerEvent::room_ref(room_id)), None);
        self.hub.close_channel(room_id);

        info!(room = %room_id, user = %session.user_id(), "Room deleted");
        Ok(())
    }

    /// Rooms visible to `user`: public, then private, then their direct rooms.
    ///
    /// Each group is ordered most recently active first.
    pub async fn rooms_for(&self, user: &str) -> ChatResult<Vec<RoomView>> {
        let rooms = self.store.list_active_rooms().await?;

        let mut public = Vec::new();
        let mut private = Vec::new();
        let mut direct = Vec::new();
        for room in rooms {
            match room.kind {
                RoomKind::Public => public.push(room.view()),
                RoomKind::Private => private.push(room.view()),
                RoomKind::Direct if room.is_member(user) => direct.push(room.view()),
                RoomKind::Direct => {}
            }
        }

        public.extend(private);
        public.extend(direct);
        Ok(public)
    }

    /// Attach the user to every room channel they are a member of.
    pub async fn attach_member_rooms(&self, user: &str) -> ChatResult<Vec<RoomId>> {
        let rooms = self.store.rooms_for_member(user).await?;
        let ids: Vec<RoomId> = rooms.into_iter().map(|r| r.id).collect();
        for room_id in &ids {
            self.hub.subscribe(user, room_id);
        }
        debug!(user = %user, rooms = ids.len(), "Attached member rooms");
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use crate::model::{Identity, User};
    use crate::registry::{ConnectionHandle, ConnectionRegistry, EventReceiver};
    use std::time::Duration;

    struct Harness {
        access: RoomAccessController,
        store: Arc<InMemoryStore>,
        registry: Arc<ConnectionRegistry>,
        hub: Arc<Hub>,
    }

    impl Harness {
        fn new(max_room_members: usize) -> Self {
            let store = Arc::new(InMemoryStore::new());
            let registry = Arc::new(ConnectionRegistry::new());
            let hub = Arc::new(Hub::new(Arc::clone(&registry)));
            let notices = Arc::new(NoticeBoard::new(Arc::clone(&hub), Duration::from_secs(5)));
            let access = RoomAccessController::new(
                store.clone(),
                Arc::clone(&hub),
                Arc::new(RoomLocks::new()),
                notices,
                max_room_members,
                50,
            );
            Self {
                access,
                store,
                registry,
                hub,
            }
        }

        async fn connect(&self, id: &str) -> (Session, EventReceiver) {
            let identity = Identity::new(id, id);
            self.store
                .put_user(User::from_identity(&identity))
                .await
                .unwrap();
            let (handle, rx) = ConnectionHandle::channel();
            self.registry.register(identity.clone(), handle.clone());
            (Session::new(identity, handle), rx)
        }

        async fn room(&self, id: &str) -> Room {
            self.store.get_room(id).await.unwrap().unwrap()
        }
    }

    fn drain(rx: &mut EventReceiver) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(e) = rx.try_recv() {
            events.push((*e).clone());
        }
        events
    }

    fn create(name: &str, kind: RoomKind) -> CreateRoomRequest {
        CreateRoomRequest {
            name: name.into(),
            description: None,
            kind,
        }
    }

    #[tokio::test]
    async fn test_public_room_full() {
        let h = Harness::new(2);
        let (alice, _a) = h.connect("alice").await;
        let (bob, _b) = h.connect("bob").await;
        let (carol, _c) = h.connect("carol").await;

        let room = h.access.create_room(&alice, &create("lobby", RoomKind::Public)).await.unwrap();
        assert!(h.access.join_room(&bob, &room.id).await.unwrap().newly_joined);

        let err = h.access.join_room(&carol, &room.id).await.unwrap_err();
        assert!(matches!(err, ChatError::RoomFull));
        assert!(!h.room(&room.id).await.is_member("carol"));
    }

    #[tokio::test]
    async fn test_join_twice_does_not_duplicate_member() {
        let h = Harness::new(10);
        let (alice, _a) = h.connect("alice").await;
        let (bob, mut bob_rx) = h.connect("bob").await;
        let room = h.access.create_room(&alice, &create("lobby", RoomKind::Public)).await.unwrap();

        h.access.join_room(&bob, &room.id).await.unwrap();
        let again = h.access.join_room(&bob, &room.id).await.unwrap();
        assert!(!again.newly_joined);
        assert_eq!(h.room(&room.id).await.members().len(), 2);

        let events = drain(&mut bob_rx);
        assert!(events.contains(&ServerEvent::JoinedRoom(RoomJoined {
            room_id: room.id.clone(),
            room_name: "lobby".into(),
        })));
        assert!(events.contains(&ServerEvent::MessagesHistory(Vec::new())));
    }

    #[tokio::test]
    async fn test_private_join_denied_without_request() {
        let h = Harness::new(10);
        let (alice, _a) = h.connect("alice").await;
        let (bob, _b) = h.connect("bob").await;
        let room = h.access.create_room(&alice, &create("ops", RoomKind::Private)).await.unwrap();

        let err = h.access.join_room(&bob, &room.id).await.unwrap_err();
        assert!(matches!(err, ChatError::AccessDenied(_)));

        assert!(h.access.request_access(&bob, &room.id).await.unwrap());
        let err = h.access.join_room(&bob, &room.id).await.unwrap_err();
        assert!(matches!(err, ChatError::AccessDenied(_)));
    }

    #[tokio::test]
    async fn test_request_access_idempotent_and_notifies_creator() {
        let h = Harness::new(10);
        let (alice, mut alice_rx) = h.connect("alice").await;
        let (bob, _b) = h.connect("bob").await;
        let room = h.access.create_room(&alice, &create("ops", RoomKind::Private)).await.unwrap();
        drain(&mut alice_rx);

        assert!(h.access.request_access(&bob, &room.id).await.unwrap());
        assert!(!h.access.request_access(&bob, &room.id).await.unwrap());
        assert_eq!(h.room(&room.id).await.join_requests(), ["bob".to_string()]);

        let events = drain(&mut alice_rx);
        assert_eq!(
            events,
            vec![ServerEvent::NewJoinRequest(JoinRequest {
                room_id: room.id.clone(),
                requester: Requester {
                    id: "bob".into(),
                    username: "bob".into(),
                },
            })]
        );
    }

    #[tokio::test]
    async fn test_request_access_on_public_room_rejected() {
        let h = Harness::new(10);
        let (alice, _a) = h.connect("alice").await;
        let (bob, _b) = h.connect("bob").await;
        let room = h.access.create_room(&alice, &create("lobby", RoomKind::Public)).await.unwrap();

        let err = h.access.request_access(&bob, &room.id).await.unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
    }

    #[tokio::test]
    async fn test_only_creator_responds() {
        let h = Harness::new(10);
        let (alice, _a) = h.connect("alice").await;
        let (bob, _b) = h.connect("bob").await;
        let (carol, _c) = h.connect("carol").await;
        let room = h.access.create_room(&alice, &create("ops", RoomKind::Private)).await.unwrap();
        h.access.request_access(&bob, &room.id).await.unwrap();

        let response = RequestResponse {
            room_id: room.id.clone(),
            user_id: "bob".into(),
            approved: true,
        };
        let err = h.access.respond_to_request(&carol, &response).await.unwrap_err();
        assert!(matches!(err, ChatError::Unauthorized(_)));
        assert!(h.room(&room.id).await.is_pending("bob"));
    }

    #[tokio::test]
    async fn test_deny_clears_pending() {
        let h = Harness::new(10);
        let (alice, _a) = h.connect("alice").await;
        let (bob, mut bob_rx) = h.connect("bob").await;
        let room = h.access.create_room(&alice, &create("ops", RoomKind::Private)).await.unwrap();
        h.access.request_access(&bob, &room.id).await.unwrap();
        drain(&mut bob_rx);

        let response = RequestResponse {
            room_id: room.id.clone(),
            user_id: "bob".into(),
            approved: false,
        };
        let decision = h.access.respond_to_request(&alice, &response).await.unwrap();
        assert_eq!(decision, RequestDecision::Denied);

        let stored = h.room(&room.id).await;
        assert!(!stored.is_pending("bob"));
        assert!(!stored.is_member("bob"));
        assert_eq!(
            drain(&mut bob_rx),
            vec![ServerEvent::RequestDenied(ServerEvent::room_ref(room.id.clone()))]
        );

        // Nothing pending any more.
        let again = h.access.respond_to_request(&alice, &response).await.unwrap();
        assert_eq!(again, RequestDecision::NoOp);
    }

    #[tokio::test]
    async fn test_creator_can_leave_and_rejoin() {
        let h = Harness::new(10);
        let (alice, _a) = h.connect("alice").await;
        let room = h.access.create_room(&alice, &create("ops", RoomKind::Private)).await.unwrap();

        h.access.leave_room(&alice, &room.id).await.unwrap();
        assert!(!h.room(&room.id).await.is_member("alice"));
        assert!(!h.hub.is_subscribed("alice", &room.id));

        let outcome = h.access.join_room(&alice, &room.id).await.unwrap();
        assert!(outcome.newly_joined);
        assert_eq!(h.room(&room.id).await.role_of("alice"), Some(MemberRole::Admin));
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let h = Harness::new(10);
        let (alice, _a) = h.connect("alice").await;
        h.access.create_room(&alice, &create("lobby", RoomKind::Public)).await.unwrap();

        let err = h
            .access
            .create_room(&alice, &create("  lobby ", RoomKind::Private))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Room with this name already exists");

        let err = h.access.create_room(&alice, &create("   ", RoomKind::Public)).await.unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
    }

    #[tokio::test]
    async fn test_direct_room_reused() {
        let h = Harness::new(10);
        let (alice, mut alice_rx) = h.connect("alice").await;
        let (bob, mut bob_rx) = h.connect("bob").await;

        let first = h.access.open_direct_room(&alice, "bob").await.unwrap();
        assert_eq!(first.kind, RoomKind::Direct);
        assert_eq!(first.name, "alice & bob");
        assert!(h.hub.is_subscribed("bob", &first.id));
        assert!(drain(&mut bob_rx).contains(&ServerEvent::RoomCreated(first.clone())));
        drain(&mut alice_rx);

        let second = h.access.open_direct_room(&bob, "alice").await.unwrap();
        assert_eq!(second.id, first.id);
        assert!(drain(&mut alice_rx).is_empty());

        let err = h.access.leave_room(&alice, &first.id).await.unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
        assert!(h.access.open_direct_room(&alice, "alice").await.is_err());
        assert!(matches!(
            h.access.open_direct_room(&alice, "nobody").await,
            Err(ChatError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rooms_for_groups_and_hides_foreign_direct_rooms() {
        let h = Harness::new(10);
        let (alice, _a) = h.connect("alice").await;
        let (_bob, _b) = h.connect("bob").await;
        let (carol, _c) = h.connect("carol").await;

        let private = h.access.create_room(&alice, &create("ops", RoomKind::Private)).await.unwrap();
        let public = h.access.create_room(&alice, &create("lobby", RoomKind::Public)).await.unwrap();
        let direct = h.access.open_direct_room(&alice, "bob").await.unwrap();

        let ids: Vec<_> = h.access.rooms_for("alice").await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![public.id.clone(), private.id.clone(), direct.id]);

        let ids: Vec<_> = h.access.rooms_for(carol.user_id()).await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![public.id, private.id]);
    }
}
