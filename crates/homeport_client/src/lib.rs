#![forbid(unsafe_code)]

pub mod binder;
pub mod controller;
pub mod gate;
pub mod mux;
pub mod rest;
pub mod retry;
pub mod session;
pub mod types;

use std::sync::{Arc, Mutex};

use homeport_domain::{IdentityId, PresenceUpdate};
use tokio::sync::{mpsc, oneshot};

pub use controller::{ChatCommand, ChatController, ShutdownHandle};
pub use gate::{GateDecision, IdentityLoad, RedirectTarget, decide_for_route, evaluate, route_is_guarded};
pub use mux::{EventMultiplexer, SubscriptionId};
pub use rest::{DashboardApi, RestError};
pub use retry::RetryPolicy;
pub use session::{Connector, QuicConnector, TokenSource};
pub use types::{ChatEvent, EventKind, PresenceMap};

/// Running chat runtime: the binder task plus the shared fan-out registry
/// and a presence cache fed from it.
pub struct ChatRuntime {
	controller: ChatController,
	events: Arc<EventMultiplexer>,
	presence: Arc<Mutex<PresenceMap>>,
	shutdown: ShutdownHandle,
}

impl ChatRuntime {
	/// Spawn the binder task on the current tokio runtime.
	///
	/// There is exactly one transport handle and it lives inside the binder;
	/// callers interact through the returned controller and the multiplexer.
	pub fn start(connector: Arc<dyn Connector>, tokens: Arc<dyn TokenSource>, policy: RetryPolicy) -> Self {
		let (cmd_tx, cmd_rx) = mpsc::channel::<ChatCommand>(128);
		let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

		let events = Arc::new(EventMultiplexer::new());

		let presence = Arc::new(Mutex::new(PresenceMap::new()));
		{
			let presence = Arc::clone(&presence);
			events.subscribe(EventKind::PresenceChanged, move |event| {
				if let ChatEvent::PresenceChanged(update) = event {
					presence.lock().expect("presence cache lock").apply(*update);
				}
			});
		}

		let join_handle = tokio::spawn(binder::run_binder_task(
			cmd_rx,
			shutdown_rx,
			Arc::clone(&events),
			connector,
			tokens,
			policy,
		));

		Self {
			controller: ChatController::new(cmd_tx),
			events,
			presence,
			shutdown: ShutdownHandle::new(shutdown_tx, join_handle),
		}
	}

	pub fn controller(&self) -> ChatController {
		self.controller.clone()
	}

	pub fn events(&self) -> Arc<EventMultiplexer> {
		Arc::clone(&self.events)
	}

	pub fn is_online(&self, identity_id: IdentityId) -> bool {
		self.presence.lock().expect("presence cache lock").is_online(identity_id)
	}

	pub fn presence_snapshot(&self) -> Vec<PresenceUpdate> {
		self.presence.lock().expect("presence cache lock").snapshot()
	}

	/// Stop the binder task and wait for it to wind down.
	pub async fn shutdown(self) {
		self.shutdown.shutdown().await;
	}
}
