#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;

use homeport_domain::{ChatMessage, IdentityId, PresenceUpdate};
use homeport_util::time::unix_ms_now;
use homeport_wire::EventFrame;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

/// Items emitted on a connection's hub stream.
#[derive(Debug, Clone)]
pub enum HubItem {
	Event(EventFrame),

	/// The subscriber lagged and items were dropped.
	Lagged {
		dropped: u64,
	},
}

/// Settings for `ChatHub`.
#[derive(Debug, Clone)]
pub struct ChatHubConfig {
	/// Maximum queued items per connection.
	pub subscriber_queue_capacity: usize,
}

impl Default for ChatHubConfig {
	fn default() -> Self {
		Self {
			subscriber_queue_capacity: 1024,
		}
	}
}

/// Fan-out hub for the chat endpoint plus the presence registry.
///
/// The dashboard is single-team: every connection receives every room's
/// messages and all presence transitions; clients group by room for
/// display. Presence is last-writer-wins per identity, with the online
/// flag derived from the live connection count.
#[derive(Debug, Clone)]
pub struct ChatHub {
	inner: Arc<Mutex<Inner>>,
	cfg: ChatHubConfig,
}

#[derive(Debug, Default)]
struct Inner {
	subscribers: Vec<Subscriber>,
	presence: HashMap<IdentityId, PresenceUpdate>,
	conns_by_identity: HashMap<IdentityId, u32>,
}

#[derive(Debug)]
struct Subscriber {
	conn_id: u64,
	identity_id: IdentityId,
	tx: mpsc::Sender<HubItem>,
	pending_lag: u64,
}

impl ChatHub {
	pub fn new(cfg: ChatHubConfig) -> Self {
		Self {
			inner: Arc::new(Mutex::new(Inner::default())),
			cfg,
		}
	}

	/// Register a connection. Marks the identity online (first connection
	/// only) and broadcasts the transition.
	pub async fn connect(&self, conn_id: u64, identity_id: IdentityId) -> mpsc::Receiver<HubItem> {
		let (tx, rx) = mpsc::channel(self.cfg.subscriber_queue_capacity);

		let went_online = {
			let mut inner = self.inner.lock().await;
			prune_closed_subscribers(&mut inner);

			inner.subscribers.push(Subscriber {
				conn_id,
				identity_id,
				tx,
				pending_lag: 0,
			});

			let conns = inner.conns_by_identity.entry(identity_id).or_insert(0);
			*conns += 1;
			*conns == 1
		};

		debug!(conn_id, identity = %identity_id, went_online, "chat hub: connection registered");

		if went_online {
			self.broadcast_presence(PresenceUpdate {
				identity_id,
				is_online: true,
				observed_at_unix_ms: unix_ms_now(),
			})
			.await;
		}

		rx
	}

	/// Unregister a connection. Marks the identity offline once its last
	/// connection is gone, and broadcasts the transition.
	pub async fn disconnect(&self, conn_id: u64) {
		let went_offline = {
			let mut inner = self.inner.lock().await;

			let Some(position) = inner.subscribers.iter().position(|s| s.conn_id == conn_id) else {
				return;
			};
			let identity_id = inner.subscribers.swap_remove(position).identity_id;

			match inner.conns_by_identity.get_mut(&identity_id) {
				Some(conns) if *conns > 1 => {
					*conns -= 1;
					None
				}
				Some(_) => {
					inner.conns_by_identity.remove(&identity_id);
					Some(identity_id)
				}
				None => None,
			}
		};

		if let Some(identity_id) = went_offline {
			debug!(conn_id, identity = %identity_id, "chat hub: identity went offline");
			self.broadcast_presence(PresenceUpdate {
				identity_id,
				is_online: false,
				observed_at_unix_ms: unix_ms_now(),
			})
			.await;
		}
	}

	/// Fan a chat message out to every live connection (sender included).
	pub async fn broadcast_message(&self, message: ChatMessage) {
		metrics::counter!("homeport_server_hub_messages_total").increment(1);
		self.broadcast(HubItem::Event(EventFrame::Message(message))).await;
	}

	/// Apply a presence update (last-writer-wins) and fan it out.
	pub async fn broadcast_presence(&self, update: PresenceUpdate) {
		{
			let mut inner = self.inner.lock().await;
			match inner.presence.get(&update.identity_id) {
				Some(current) if !update.supersedes(current) => {
					debug!(identity = %update.identity_id, "chat hub: stale presence update ignored");
					return;
				}
				_ => {
					inner.presence.insert(update.identity_id, update);
				}
			}
		}

		metrics::counter!("homeport_server_hub_presence_total").increment(1);
		self.broadcast(HubItem::Event(EventFrame::Presence(update))).await;
	}

	/// Whether the identity has at least one live connection.
	pub async fn is_online(&self, identity_id: IdentityId) -> bool {
		let inner = self.inner.lock().await;
		inner.conns_by_identity.get(&identity_id).copied().unwrap_or(0) > 0
	}

	/// Snapshot of the presence registry, ordered by identity.
	pub async fn presence_snapshot(&self) -> Vec<PresenceUpdate> {
		let inner = self.inner.lock().await;
		let mut all: Vec<PresenceUpdate> = inner.presence.values().copied().collect();
		all.sort_by_key(|p| p.identity_id);
		all
	}

	async fn broadcast(&self, item: HubItem) {
		let mut inner = self.inner.lock().await;
		prune_closed_subscribers(&mut inner);

		let mut dropped_total: u64 = 0;

		for sub in inner.subscribers.iter_mut() {
			match sub.tx.try_send(item.clone()) {
				Ok(()) => {
					if sub.pending_lag > 0
						&& sub
							.tx
							.try_send(HubItem::Lagged {
								dropped: sub.pending_lag,
							})
							.is_ok()
					{
						sub.pending_lag = 0;
					}
				}
				Err(mpsc::error::TrySendError::Full(_)) => {
					dropped_total += 1;
					sub.pending_lag = sub.pending_lag.saturating_add(1);
				}
				Err(mpsc::error::TrySendError::Closed(_)) => {}
			}
		}

		if dropped_total > 0 {
			metrics::counter!("homeport_server_hub_dropped_total").increment(dropped_total);
			debug!(dropped = dropped_total, "chat hub: dropped items on full subscriber queues");
		}
	}
}

fn prune_closed_subscribers(inner: &mut Inner) {
	inner.subscribers.retain(|s| !s.tx.is_closed());
}
