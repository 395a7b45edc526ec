//! Ephemeral room notices.
//!
//! A notice is a TTL-tagged value: posting it publishes `system_notice` to the
//! room channel and schedules exactly one expiry task, which removes the
//! notice and publishes `notice_expired`.

use crate::hub::Hub;
use crate::model::{new_id, now_millis};
use dashmap::DashMap;
use huddle_protocol::{NoticeRef, NoticeView, RoomId, ServerEvent};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Default notice lifetime.
pub const DEFAULT_NOTICE_TTL: Duration = Duration::from_millis(5000);

/// A live notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub id: String,
    pub room_id: RoomId,
    pub message: String,
    /// Expiry in milliseconds since the epoch.
    pub expires_at: u64,
}

impl Notice {
    #[must_use]
    pub fn view(&self) -> NoticeView {
        NoticeView {
            notice_id: self.id.clone(),
            room_id: self.room_id.clone(),
            message: self.message.clone(),
            expires_at: self.expires_at,
        }
    }
}

/// Live notices and their expiry schedule.
pub struct NoticeBoard {
    notices: DashMap<String, Notice>,
    hub: Arc<Hub>,
    ttl: Duration,
}

impl NoticeBoard {
    #[must_use]
    pub fn new(hub: Arc<Hub>, ttl: Duration) -> Self {
        Self {
            notices: DashMap::new(),
            hub,
            ttl,
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Post a notice to a room and schedule its expiry.
    ///
    /// Must be called from within a tokio runtime.
    pub fn post(self: &Arc<Self>, room_id: &str, message: impl Into<String>) -> Notice {
        let notice = Notice {
            id: new_id(),
            room_id: room_id.to_string(),
            message: message.into(),
            expires_at: now_millis() + self.ttl.as_millis() as u64,
        };
        self.notices.insert(notice.id.clone(), notice.clone());
        self.hub
            .publish(room_id, ServerEvent::SystemNotice(notice.view()), None);
        trace!(room = %room_id, notice = %notice.id, "Notice posted");

        let board = Arc::clone(self);
        let notice_id = notice.id.clone();
        let ttl = self.ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            board.expire(&notice_id);
        });

        notice
    }

    /// Remove a notice now. Returns `false` if it already expired.
    pub fn expire(&self, notice_id: &str) -> bool {
        let Some((_, notice)) = self.notices.remove(notice_id) else {
            return false;
        };
        self.hub.publish(
            &notice.room_id,
            ServerEvent::NoticeExpired(NoticeRef {
                notice_id: notice.id.clone(),
                room_id: notice.room_id.clone(),
            }),
            None,
        );
        trace!(room = %notice.room_id, notice = %notice.id, "Notice expired");
        true
    }

    /// Live notices for a room, oldest first.
    #[must_use]
    pub fn active(&self, room_id: &str) -> Vec<Notice> {
        let mut notices: Vec<Notice> = self
            .notices
            .iter()
            .filter(|n| n.room_id == room_id)
            .map(|n| n.clone())
            .collect();
        notices.sort_by(|a, b| a.expires_at.cmp(&b.expires_at).then_with(|| a.id.cmp(&b.id)));
        notices
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.notices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.notices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Identity;
    use crate::registry::{ConnectionHandle, ConnectionRegistry, EventReceiver};

    fn board(ttl: Duration) -> (Arc<NoticeBoard>, EventReceiver) {
        let registry = Arc::new(ConnectionRegistry::new());
        let (handle, rx) = ConnectionHandle::channel();
        registry.register(Identity::new("alice", "alice"), handle);
        let hub = Arc::new(Hub::new(registry));
        hub.subscribe("alice", "r1");
        (Arc::new(NoticeBoard::new(hub, ttl)), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_notice_expires_after_ttl() {
        let (board, mut rx) = board(Duration::from_millis(5000));

        let notice = board.post("r1", "bob joined the room");
        assert_eq!(board.active("r1"), vec![notice.clone()]);
        assert_eq!(*rx.recv().await.unwrap(), ServerEvent::SystemNotice(notice.view()));

        tokio::time::sleep(Duration::from_millis(4000)).await;
        assert_eq!(board.len(), 1);
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(1001)).await;
        assert!(board.is_empty());
        match &*rx.recv().await.unwrap() {
            ServerEvent::NoticeExpired(r) => {
                assert_eq!(r.notice_id, notice.id);
                assert_eq!(r.room_id, "r1");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_early_expiry_is_not_repeated() {
        let (board, mut rx) = board(Duration::from_millis(100));
        let notice = board.post("r1", "hello");
        rx.recv().await.unwrap();

        assert!(board.expire(&notice.id));
        rx.recv().await.unwrap();

        // The scheduled task finds nothing left to expire.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(rx.try_recv().is_err());
        assert!(!board.expire(&notice.id));
    }
}
