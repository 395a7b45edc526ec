//! # huddle-protocol
//!
//! Wire events for the Huddle chat engine.
//!
//! Clients and server exchange named events over a WebSocket. This crate
//! defines the closed set of inbound ([`ClientEvent`]) and outbound
//! ([`ServerEvent`]) events, their payloads, the JSON and MessagePack codecs,
//! and protocol versioning.
//!
//! ## Example
//!
//! ```rust
//! use huddle_protocol::{codec, ClientEvent};
//!
//! let event: ClientEvent = codec::decode_text(r#"{"event":"join_room","data":"lobby"}"#).unwrap();
//! assert_eq!(event, ClientEvent::JoinRoom("lobby".into()));
//!
//! let text = codec::encode_text(&event).unwrap();
//! let again: ClientEvent = codec::decode_text(&text).unwrap();
//! assert_eq!(again, event);
//! ```

pub mod codec;
pub mod events;
pub mod version;

pub use codec::{Encoding, ProtocolError};
pub use events::*;
pub use version::{Version, VersionError, PROTOCOL_VERSION};
