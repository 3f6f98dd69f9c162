use std::collections::HashMap;

use homeport_domain::{ChatMessage, IdentityId, PresenceUpdate};

/// Closed set of event kinds the multiplexer dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
	MessageReceived,
	PresenceChanged,
	ConnectionError,
	Connected,
	Disconnected,
}

/// Events fanned out to subscribers. One fixed payload shape per kind.
#[derive(Debug, Clone)]
pub enum ChatEvent {
	Connected {
		server_name: String,
		server_instance_id: String,
	},
	Disconnected {
		reason: String,
	},
	ConnectionError {
		detail: String,
	},
	MessageReceived(ChatMessage),
	PresenceChanged(PresenceUpdate),
}

impl ChatEvent {
	pub fn kind(&self) -> EventKind {
		match self {
			ChatEvent::Connected { .. } => EventKind::Connected,
			ChatEvent::Disconnected { .. } => EventKind::Disconnected,
			ChatEvent::ConnectionError { .. } => EventKind::ConnectionError,
			ChatEvent::MessageReceived(_) => EventKind::MessageReceived,
			ChatEvent::PresenceChanged(_) => EventKind::PresenceChanged,
		}
	}
}

/// Client-side presence cache, last-writer-wins per identity.
#[derive(Debug, Default)]
pub struct PresenceMap {
	by_identity: HashMap<IdentityId, PresenceUpdate>,
}

impl PresenceMap {
	pub fn new() -> Self {
		Self::default()
	}

	/// Apply an update; returns false when a newer observation already won.
	pub fn apply(&mut self, update: PresenceUpdate) -> bool {
		match self.by_identity.get(&update.identity_id) {
			Some(current) if !update.supersedes(current) => false,
			_ => {
				self.by_identity.insert(update.identity_id, update);
				true
			}
		}
	}

	pub fn is_online(&self, identity_id: IdentityId) -> bool {
		self.by_identity.get(&identity_id).map(|p| p.is_online).unwrap_or(false)
	}

	pub fn snapshot(&self) -> Vec<PresenceUpdate> {
		let mut all: Vec<PresenceUpdate> = self.by_identity.values().copied().collect();
		all.sort_by_key(|p| p.identity_id);
		all
	}
}
