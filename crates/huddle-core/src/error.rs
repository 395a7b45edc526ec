//! Error taxonomy for chat operations.
//!
//! Every rejected operation maps to exactly one variant and produces a
//! targeted reply to the initiating connection only.

use crate::store::StoreError;
use huddle_protocol::{Denial, ServerEvent};
use thiserror::Error;

/// Result type for chat operations.
pub type ChatResult<T> = Result<T, ChatError>;

/// Chat operation errors.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Room or message absent (or room deactivated).
    #[error("{0}")]
    NotFound(String),

    /// Caller lacks membership for the room.
    #[error("{0}")]
    AccessDenied(String),

    /// Caller is not allowed to perform a creator- or sender-only action.
    #[error("{0}")]
    Unauthorized(String),

    /// Input rejected before any persistence.
    #[error("{0}")]
    Validation(String),

    /// Public room at capacity.
    #[error("Room is full")]
    RoomFull,

    /// Persistence or transport failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChatError {
    /// Short label for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ChatError::NotFound(_) => "not_found",
            ChatError::AccessDenied(_) => "access_denied",
            ChatError::Unauthorized(_) => "unauthorized",
            ChatError::Validation(_) => "validation",
            ChatError::RoomFull => "room_full",
            ChatError::Internal(_) => "internal",
        }
    }

    /// Whether this error is a server-side failure rather than a rejected request.
    #[must_use]
    pub fn is_internal(&self) -> bool {
        matches!(self, ChatError::Internal(_))
    }

    /// Render the reply sent to the initiating connection.
    ///
    /// `action` names the failed operation for the generic internal message;
    /// internal details never reach the client.
    #[must_use]
    pub fn to_event(&self, room_id: Option<&str>, action: &str) -> ServerEvent {
        match (self, room_id) {
            (ChatError::AccessDenied(reason), Some(room_id)) => ServerEvent::AccessDenied(Denial {
                room_id: room_id.to_string(),
                reason: reason.clone(),
            }),
            (ChatError::Internal(_), _) => ServerEvent::error(format!("Failed to {action}")),
            _ => ServerEvent::error(self.to_string()),
        }
    }
}

impl From<StoreError> for ChatError {
    fn from(err: StoreError) -> Self {
        ChatError::Internal(err.to_string())
    }
}
