#![forbid(unsafe_code)]

pub mod framing;

use homeport_domain::{AccessToken, ChatMessage, IdentityId, PresenceUpdate, RoomId};
use serde::{Deserialize, Serialize};

pub use framing::{DEFAULT_MAX_FRAME_SIZE, FramingError, decode_frame, encode_frame, encode_frame_default, try_decode_frame_from_buffer};

/// Current protocol version carried in `Envelope.version`.
pub const PROTOCOL_VERSION: u32 = 1;

/// Top-level frame exchanged on the chat connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
	pub version: u32,
	pub msg: Msg,
}

impl Envelope {
	/// Wrap a message with the current protocol version.
	pub fn v1(msg: Msg) -> Self {
		Self {
			version: PROTOCOL_VERSION,
			msg,
		}
	}
}

/// Closed set of messages on the chat connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum Msg {
	/// First client frame: identity binding + access token.
	Hello(Hello),
	/// Server acknowledgment of an authenticated session.
	Welcome(Welcome),
	/// Server-pushed event.
	Event(EventFrame),
	/// Client fire-and-forget send. No acknowledgment frame exists.
	Send(SendMessage),
	/// Server-side rejection (pre- or post-handshake).
	Error(ErrorFrame),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hello {
	pub identity_id: IdentityId,
	pub token: AccessToken,
	pub client_name: String,
	pub client_instance_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Welcome {
	pub server_name: String,
	pub server_instance_id: String,
	pub server_time_unix_ms: i64,
	pub max_frame_bytes: u32,
}

/// Server-pushed events, fixed payload shape per kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum EventFrame {
	Message(ChatMessage),
	Presence(PresenceUpdate),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendMessage {
	pub room_id: RoomId,
	pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorFrame {
	pub code: String,
	pub message: String,
}

/// Error codes emitted by the chat endpoint.
pub mod error_code {
	pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
	pub const INVALID_ROOM: &str = "INVALID_ROOM";
	pub const PROTOCOL: &str = "PROTOCOL";
}
