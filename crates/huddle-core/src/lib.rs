//! # huddle-core
//!
//! Presence, room access, message fan-out and retention for the Huddle chat
//! engine.
//!
//! - **Registry** - one live connection per user
//! - **Hub** - room channels and event fan-out
//! - **Access** - the NonMember / Pending / Member state machine
//! - **Presence** - online snapshots and join/leave broadcasts
//! - **Pipeline** - messages, reactions and soft deletes
//! - **Typing** - typing indicator relay
//! - **Notices** - TTL-tagged room notices
//! - **Sweeper** - hard deletion of expired soft-deleted messages
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Transport  │────▶│ ChatEngine  │────▶│   Access    │──┐
//! └─────────────┘     └─────────────┘     │  Pipeline   │  │
//!        ▲                   │            │   Typing    │  │
//!        │                   ▼            └─────────────┘  │
//!        │            ┌─────────────┐            │         ▼
//!        └────────────│  Registry   │◀── Hub ◀───┘      Store
//!                     └─────────────┘
//! ```

pub mod access;
pub mod auth;
pub mod engine;
pub mod error;
pub mod hub;
pub mod locks;
pub mod memory;
pub mod model;
pub mod notice;
pub mod pipeline;
pub mod presence;
pub mod registry;
pub mod store;
pub mod sweeper;
pub mod typing;

pub use access::{JoinOutcome, RequestDecision, RoomAccessController};
pub use auth::{AuthError, IdentityVerifier};
pub use engine::{ChatEngine, EngineConfig};
pub use error::{ChatError, ChatResult};
pub use hub::{Hub, HubStats};
pub use locks::RoomLocks;
pub use memory::InMemoryStore;
pub use model::{Identity, Membership, Message, Room, User};
pub use notice::{Notice, NoticeBoard};
pub use pipeline::MessagePipeline;
pub use presence::PresenceBroadcaster;
pub use registry::{ConnectionHandle, ConnectionId, ConnectionRegistry, EventReceiver, Session};
pub use store::{Page, Store, StoreError};
pub use sweeper::{RetentionSweeper, SweepReport};
pub use typing::TypingTracker;
