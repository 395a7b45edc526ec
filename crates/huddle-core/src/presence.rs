//! Presence broadcasting.
//!
//! Turns registry changes into `online_users`, `user_joined` and `user_left`
//! events. A joining user always receives their snapshot (which includes
//! themselves) before anyone else is told they came online.

use crate::model::{now_millis, Identity, User};
use crate::registry::{ConnectionHandle, ConnectionId, ConnectionRegistry};
use crate::store::Store;
use huddle_protocol::{OnlineUser, PresenceStatus, ServerEvent};
use std::sync::Arc;
use tracing::{debug, warn};

/// Announces users coming online and going offline.
pub struct PresenceBroadcaster {
    registry: Arc<ConnectionRegistry>,
    store: Arc<dyn Store>,
}

impl PresenceBroadcaster {
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>, store: Arc<dyn Store>) -> Self {
        Self { registry, store }
    }

    /// Register a connection and announce it.
    ///
    /// Returns the handle of the connection this one replaced, if any.
    pub async fn connect(
        &self,
        identity: &Identity,
        handle: ConnectionHandle,
    ) -> Option<ConnectionHandle> {
        let previous = self.registry.register(identity.clone(), handle.clone());

        // Captured after our own registration, so we always see ourselves.
        handle.send(ServerEvent::OnlineUsers(self.registry.snapshot()));

        let notified = self.registry.broadcast(
            ServerEvent::UserJoined(OnlineUser {
                id: identity.id.clone(),
                username: identity.username.clone(),
                status: PresenceStatus::Online,
            }),
            Some(&identity.id),
        );
        debug!(user = %identity.id, notified, "User online");

        self.persist_status(identity, PresenceStatus::Online).await;
        previous
    }

    /// Unregister a connection and announce the departure.
    ///
    /// Does nothing and returns `false` if `connection_id` was already
    /// replaced by a newer connection for the same user.
    pub async fn disconnect(&self, identity: &Identity, connection_id: &ConnectionId) -> bool {
        if !self
            .registry
            .unregister_connection(&identity.id, connection_id)
        {
            debug!(user = %identity.id, connection = %connection_id, "Stale connection closed");
            return false;
        }

        let notified = self
            .registry
            .broadcast(ServerEvent::UserLeft(identity.id.clone()), None);
        debug!(user = %identity.id, notified, "User offline");

        self.persist_status(identity, PresenceStatus::Offline).await;
        true
    }

    /// Current online users.
    #[must_use]
    pub fn online_users(&self) -> Vec<OnlineUser> {
        self.registry.snapshot()
    }

    /// Best effort: presence itself lives in memory, the stored status is informational.
    async fn persist_status(&self, identity: &Identity, status: PresenceStatus) {
        let result = async {
            let mut user = self
                .store
                .get_user(&identity.id)
                .await?
                .unwrap_or_else(|| User::from_identity(identity));
            user.username = identity.username.clone();
            user.status = status;
            user.last_seen = now_millis();
            self.store.put_user(user).await
        }
        .await;

        if let Err(e) = result {
            warn!(user = %identity.id, ?status, error = %e, "Failed to persist presence status");
        }
    }
}
