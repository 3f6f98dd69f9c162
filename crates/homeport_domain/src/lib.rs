#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors for parsing identifiers from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("unknown role: {0}")]
	UnknownRole(String),
	#[error("invalid format: {0}")]
	InvalidFormat(String),
}

/// Opaque identifier of an authenticated principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(i64);

impl IdentityId {
	pub const fn new(id: i64) -> Self {
		Self(id)
	}
	pub const fn as_i64(self) -> i64 {
		self.0
	}
}

impl fmt::Display for IdentityId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for IdentityId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseIdError::Empty);
		}
		s.parse::<i64>()
			.map(IdentityId::new)
			.map_err(|_| ParseIdError::InvalidFormat(format!("expected integer identity id, got {s:?}")))
	}
}

/// Authorization role ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
	User,
	Admin,
	SuperAdmin,
}

impl Role {
	/// Stable string identifier.
	pub const fn as_str(self) -> &'static str {
		match self {
			Role::User => "user",
			Role::Admin => "admin",
			Role::SuperAdmin => "superadmin",
		}
	}

	/// Admin and superadmin both clear admin checks.
	pub const fn is_admin(self) -> bool {
		matches!(self, Role::Admin | Role::SuperAdmin)
	}

	pub const fn is_superadmin(self) -> bool {
		matches!(self, Role::SuperAdmin)
	}
}

impl fmt::Display for Role {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for Role {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseIdError::Empty);
		}

		match s.to_ascii_lowercase().as_str() {
			"user" => Ok(Role::User),
			"admin" => Ok(Role::Admin),
			"superadmin" | "super_admin" => Ok(Role::SuperAdmin),
			other => Err(ParseIdError::UnknownRole(other.to_string())),
		}
	}
}

/// Authenticated principal as seen by the core.
///
/// Owned by the identity backend; the core only reads the role and the
/// approved/enabled flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
	pub id: IdentityId,
	pub display_name: String,
	pub role: Role,
	pub approved: bool,
	pub enabled: bool,
}

impl Identity {
	pub fn is_admin(&self) -> bool {
		self.role.is_admin()
	}

	/// Approved and not disabled.
	pub fn may_use_dashboard(&self) -> bool {
		self.approved && self.enabled
	}
}

/// Opaque short-lived token scoping one identity to one messaging session.
///
/// `Debug` output never reveals the token value.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessToken(String);

impl AccessToken {
	pub fn new(token: impl Into<String>) -> Self {
		Self(token.into())
	}

	/// Access the underlying token value.
	pub fn expose(&self) -> &str {
		&self.0
	}
}

impl fmt::Debug for AccessToken {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("AccessToken(***)")
	}
}

/// Chat room identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
	/// Create a non-empty `RoomId`.
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		if id.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(id))
	}
	pub fn as_str(&self) -> &str {
		&self.0
	}
	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for RoomId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for RoomId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		RoomId::new(s.to_string())
	}
}

/// Server-assigned chat message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub uuid::Uuid);

impl MessageId {
	/// Create a new random message id.
	pub fn new_v4() -> Self {
		Self(uuid::Uuid::new_v4())
	}
}

impl fmt::Display for MessageId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// A chat message as delivered by the backend. Never mutated client-side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
	pub id: MessageId,
	pub room_id: RoomId,
	pub sender_id: IdentityId,
	pub content: String,
	pub sent_at_unix_ms: i64,
}

/// Online/offline flag for one identity, last-writer-wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceUpdate {
	pub identity_id: IdentityId,
	pub is_online: bool,
	pub observed_at_unix_ms: i64,
}

impl PresenceUpdate {
	/// Whether this update replaces `current` under last-writer-wins.
	/// Equal timestamps favor the incoming update.
	pub fn supersedes(&self, current: &PresenceUpdate) -> bool {
		self.observed_at_unix_ms >= current.observed_at_unix_ms
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn role_parse_and_display() {
		assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
		assert_eq!("Super_Admin".parse::<Role>().unwrap(), Role::SuperAdmin);
		assert_eq!(Role::User.to_string(), "user");
		assert!("owner".parse::<Role>().is_err());
	}

	#[test]
	fn role_ladder() {
		assert!(!Role::User.is_admin());
		assert!(Role::Admin.is_admin());
		assert!(Role::SuperAdmin.is_admin());
		assert!(!Role::Admin.is_superadmin());
		assert!(Role::SuperAdmin.is_superadmin());
	}

	#[test]
	fn identity_id_parse() {
		assert_eq!("42".parse::<IdentityId>().unwrap(), IdentityId::new(42));
		assert!("".parse::<IdentityId>().is_err());
		assert!("abc".parse::<IdentityId>().is_err());
	}

	#[test]
	fn rejects_empty_room_ids() {
		assert!(RoomId::new("").is_err());
		assert!(RoomId::new("   ").is_err());
		assert_eq!(RoomId::new("lobby").unwrap().as_str(), "lobby");
	}

	#[test]
	fn access_token_debug_is_redacted() {
		let token = AccessToken::new("v1.secret.sig");
		let rendered = format!("{token:?}");
		assert!(!rendered.contains("secret"));
	}

	#[test]
	fn presence_last_writer_wins() {
		let old = PresenceUpdate {
			identity_id: IdentityId::new(7),
			is_online: true,
			observed_at_unix_ms: 1_000,
		};
		let newer = PresenceUpdate {
			is_online: false,
			observed_at_unix_ms: 2_000,
			..old
		};

		assert!(newer.supersedes(&old));
		assert!(!old.supersedes(&newer));

		let same_instant = PresenceUpdate { is_online: false, ..old };
		assert!(same_instant.supersedes(&old));
	}

	#[test]
	fn dashboard_access_requires_approved_and_enabled() {
		let mut identity = Identity {
			id: IdentityId::new(1),
			display_name: "ops".to_string(),
			role: Role::User,
			approved: true,
			enabled: true,
		};
		assert!(identity.may_use_dashboard());

		identity.approved = false;
		assert!(!identity.may_use_dashboard());

		identity.approved = true;
		identity.enabled = false;
		assert!(!identity.may_use_dashboard());
	}
}
