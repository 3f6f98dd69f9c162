#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;

use homeport_domain::{Identity, IdentityId, Role};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum DirectoryError {
	#[error("identity {0} not found")]
	NotFound(IdentityId),
}

/// Seam to the identity backend. The real user store is an external
/// collaborator; the core only reads identities and flips the flags the
/// admin operations own.
#[async_trait::async_trait]
pub trait Directory: Send + Sync {
	async fn get(&self, id: IdentityId) -> Option<Identity>;

	async fn list(&self) -> Vec<Identity>;

	async fn set_approved(&self, id: IdentityId, approved: bool) -> Result<Identity, DirectoryError>;

	async fn set_role(&self, id: IdentityId, role: Role) -> Result<Identity, DirectoryError>;

	async fn set_enabled(&self, id: IdentityId, enabled: bool) -> Result<Identity, DirectoryError>;
}

/// In-memory directory seeded from configuration.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
	inner: Arc<RwLock<HashMap<IdentityId, Identity>>>,
}

impl InMemoryDirectory {
	pub fn new(seed: Vec<Identity>) -> Self {
		let map = seed.into_iter().map(|identity| (identity.id, identity)).collect();
		Self {
			inner: Arc::new(RwLock::new(map)),
		}
	}

	async fn update(
		&self,
		id: IdentityId,
		apply: impl FnOnce(&mut Identity) + Send,
	) -> Result<Identity, DirectoryError> {
		let mut identities = self.inner.write().await;
		let identity = identities.get_mut(&id).ok_or(DirectoryError::NotFound(id))?;
		apply(identity);
		Ok(identity.clone())
	}
}

#[async_trait::async_trait]
impl Directory for InMemoryDirectory {
	async fn get(&self, id: IdentityId) -> Option<Identity> {
		let identities = self.inner.read().await;
		identities.get(&id).cloned()
	}

	async fn list(&self) -> Vec<Identity> {
		let identities = self.inner.read().await;
		let mut all: Vec<Identity> = identities.values().cloned().collect();
		all.sort_by_key(|i| i.id);
		all
	}

	async fn set_approved(&self, id: IdentityId, approved: bool) -> Result<Identity, DirectoryError> {
		self.update(id, |identity| identity.approved = approved).await
	}

	async fn set_role(&self, id: IdentityId, role: Role) -> Result<Identity, DirectoryError> {
		self.update(id, |identity| identity.role = role).await
	}

	async fn set_enabled(&self, id: IdentityId, enabled: bool) -> Result<Identity, DirectoryError> {
		self.update(id, |identity| identity.enabled = enabled).await
	}
}
