#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use homeport_domain::Identity;
use homeport_util::secret::SecretString;

use crate::server::directory::Directory;
use crate::server::http::HealthState;
use crate::server::hub::ChatHub;
use crate::server::sessions::SessionStore;

/// Shared server state handed to the HTTP service and every chat connection.
pub struct AppState {
	pub directory: Arc<dyn Directory>,
	pub sessions: SessionStore,
	pub hub: ChatHub,
	pub health: HealthState,

	/// HMAC secret for chat access tokens.
	pub auth_hmac_secret: SecretString,

	/// Lifetime of issued chat tokens. Short: one is fetched fresh per
	/// connection attempt.
	pub chat_token_ttl: Duration,

	pub server_name: String,
	pub server_instance_id: String,

	/// Dev-only seam standing in for the external identity provider's login
	/// flow; gated off by default.
	pub dev_allow_unverified_login: bool,
}

impl AppState {
	/// Resolve a bearer session token to its identity, if any.
	pub async fn identity_for_session(&self, token: Option<&str>) -> Option<Identity> {
		let token = token?;
		let identity_id = self.sessions.resolve(token).await?;
		self.directory.get(identity_id).await
	}
}
