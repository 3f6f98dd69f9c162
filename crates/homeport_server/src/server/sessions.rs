#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use homeport_domain::IdentityId;
use homeport_util::time::unix_ms_now;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct Session {
	identity_id: IdentityId,
	expires_at_unix_ms: i64,
}

/// In-process bearer-session store.
///
/// Sessions are created by the identity provider boundary (login is outside
/// the core), resolved on every protected request, and revoked on logout.
/// Tokens are opaque uuids; nothing about the identity is derivable from
/// them.
#[derive(Debug, Clone)]
pub struct SessionStore {
	inner: Arc<RwLock<HashMap<String, Session>>>,
	ttl: Duration,
}

impl SessionStore {
	pub fn new(ttl: Duration) -> Self {
		Self {
			inner: Arc::new(RwLock::new(HashMap::new())),
			ttl,
		}
	}

	/// Mint a session for an identity and return the bearer token.
	pub async fn create(&self, identity_id: IdentityId) -> String {
		let token = uuid::Uuid::new_v4().to_string();
		let session = Session {
			identity_id,
			expires_at_unix_ms: unix_ms_now().saturating_add(self.ttl.as_millis() as i64),
		};

		let mut sessions = self.inner.write().await;
		sessions.insert(token.clone(), session);
		token
	}

	/// Resolve a bearer token to its identity. Expired sessions resolve to
	/// `None` and are dropped.
	pub async fn resolve(&self, token: &str) -> Option<IdentityId> {
		let now = unix_ms_now();

		{
			let sessions = self.inner.read().await;
			match sessions.get(token) {
				Some(session) if session.expires_at_unix_ms > now => return Some(session.identity_id),
				Some(_) => {}
				None => return None,
			}
		}

		// Expired: take the write lock only on this slower path.
		let mut sessions = self.inner.write().await;
		sessions.remove(token);
		None
	}

	/// Drop one session. Idempotent.
	pub async fn revoke(&self, token: &str) -> bool {
		let mut sessions = self.inner.write().await;
		sessions.remove(token).is_some()
	}

	/// Drop every session belonging to an identity (account disabled).
	pub async fn revoke_identity(&self, identity_id: IdentityId) -> usize {
		let mut sessions = self.inner.write().await;
		let before = sessions.len();
		sessions.retain(|_, s| s.identity_id != identity_id);
		before - sessions.len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn create_resolve_revoke_roundtrip() {
		let store = SessionStore::new(Duration::from_secs(60));
		let token = store.create(IdentityId::new(7)).await;

		assert_eq!(store.resolve(&token).await, Some(IdentityId::new(7)));
		assert!(store.revoke(&token).await);
		assert_eq!(store.resolve(&token).await, None);
		assert!(!store.revoke(&token).await, "revoke is idempotent");
	}

	#[tokio::test]
	async fn expired_sessions_resolve_to_none() {
		let store = SessionStore::new(Duration::from_secs(0));
		let token = store.create(IdentityId::new(7)).await;
		assert_eq!(store.resolve(&token).await, None);
	}

	#[tokio::test]
	async fn revoke_identity_drops_all_of_its_sessions() {
		let store = SessionStore::new(Duration::from_secs(60));
		let a1 = store.create(IdentityId::new(7)).await;
		let a2 = store.create(IdentityId::new(7)).await;
		let b = store.create(IdentityId::new(8)).await;

		assert_eq!(store.revoke_identity(IdentityId::new(7)).await, 2);
		assert_eq!(store.resolve(&a1).await, None);
		assert_eq!(store.resolve(&a2).await, None);
		assert_eq!(store.resolve(&b).await, Some(IdentityId::new(8)));
	}

	#[tokio::test]
	async fn unknown_tokens_resolve_to_none() {
		let store = SessionStore::new(Duration::from_secs(60));
		assert_eq!(store.resolve("not-a-token").await, None);
	}
}
