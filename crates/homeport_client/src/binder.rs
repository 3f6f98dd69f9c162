use std::sync::Arc;

use homeport_domain::IdentityId;
use homeport_wire::{EventFrame, Welcome};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::controller::ChatCommand;
use crate::mux::EventMultiplexer;
use crate::retry::RetryPolicy;
use crate::session::{BoxedTransport, BoxedTransportEvents, Connector, TokenSource};
use crate::types::ChatEvent;

/// Binder lifecycle phase. `Failed` keeps the identity so a later identity
/// refresh can start a fresh cycle instead of being swallowed as a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
	Idle,
	AwaitingToken,
	Connecting,
	Retrying,
	Connected,
	Failed,
}

/// Completions from the attempt/events tasks. Every variant carries the
/// generation it was started under; stale completions are discarded.
enum BinderEvent {
	TokenReady {
		generation: u64,
	},
	AttemptFailed {
		generation: u64,
		failures: u32,
		detail: String,
		terminal: bool,
	},
	AttemptSucceeded {
		generation: u64,
		transport: BoxedTransport,
		events: BoxedTransportEvents,
		welcome: Welcome,
	},
	EventsEnded {
		generation: u64,
		reason: String,
	},
}

struct Active {
	identity_id: IdentityId,
	transport: BoxedTransport,
	events_task: tokio::task::JoinHandle<()>,
}

struct Binder {
	generation: u64,
	identity: Option<homeport_domain::Identity>,
	phase: Phase,
	attempt_task: Option<tokio::task::JoinHandle<()>>,
	active: Option<Active>,
	mux: Arc<EventMultiplexer>,
	connector: Arc<dyn Connector>,
	tokens: Arc<dyn TokenSource>,
	policy: RetryPolicy,
	internal_tx: mpsc::UnboundedSender<BinderEvent>,
}

/// Run the binder task: the single owner of the chat transport.
///
/// Identity transitions, sends, and transport completions are serialized
/// through this loop, so no two call sites can race the connection.
pub(crate) async fn run_binder_task(
	mut cmd_rx: mpsc::Receiver<ChatCommand>,
	mut shutdown_rx: oneshot::Receiver<()>,
	mux: Arc<EventMultiplexer>,
	connector: Arc<dyn Connector>,
	tokens: Arc<dyn TokenSource>,
	policy: RetryPolicy,
) {
	let (internal_tx, mut internal_rx) = mpsc::unbounded_channel::<BinderEvent>();
	let mut binder = Binder {
		generation: 0,
		identity: None,
		phase: Phase::Idle,
		attempt_task: None,
		active: None,
		mux,
		connector,
		tokens,
		policy,
		internal_tx,
	};

	loop {
		tokio::select! {
			_ = &mut shutdown_rx => {
				binder.teardown("shutdown");
				break;
			}

			Some(ev) = internal_rx.recv() => {
				binder.handle_internal(ev);
			}

			cmd = cmd_rx.recv() => {
				let Some(cmd) = cmd else {
					binder.teardown("controller dropped");
					break;
				};
				binder.handle_command(cmd).await;
			}
		}
	}
}

impl Binder {
	async fn handle_command(&mut self, cmd: ChatCommand) {
		match cmd {
			ChatCommand::IdentityChanged { identity: Some(identity) } => {
				let same = self.identity.as_ref().map(|i| i.id) == Some(identity.id);
				if same && !matches!(self.phase, Phase::Idle | Phase::Failed) {
					debug!(identity = %identity.id, phase = ?self.phase, "identity unchanged with live session; no-op");
					return;
				}

				self.teardown("identity changed");
				self.generation += 1;
				self.identity = Some(identity);
				self.begin_cycle();
			}

			ChatCommand::IdentityChanged { identity: None } => {
				// Close the transport before acknowledging the transition so
				// a stale identity can never hold a live connection.
				self.teardown("logged out");
				self.generation += 1;
				self.identity = None;
				self.phase = Phase::Idle;
			}

			ChatCommand::SendMessage { room_id, content } => match self.active.as_mut() {
				Some(active) => {
					if let Err(e) = active.transport.send_message(room_id, content).await {
						warn!(identity = %active.identity_id, error = %e, "chat send failed");
						self.mux.dispatch(&ChatEvent::ConnectionError {
							detail: format!("send failed: {e}"),
						});
					}
				}
				None => {
					self.mux.dispatch(&ChatEvent::ConnectionError {
						detail: "not connected".to_string(),
					});
				}
			},
		}
	}

	fn handle_internal(&mut self, ev: BinderEvent) {
		match ev {
			BinderEvent::TokenReady { generation } => {
				if generation != self.generation {
					return;
				}
				if matches!(self.phase, Phase::AwaitingToken | Phase::Retrying) {
					self.phase = Phase::Connecting;
					debug!("chat token ready; connecting");
				}
			}

			BinderEvent::AttemptFailed {
				generation,
				failures,
				detail,
				terminal,
			} => {
				if generation != self.generation {
					return;
				}

				if terminal {
					warn!(failures, %detail, "chat connect failed; attempts exhausted");
					self.phase = Phase::Failed;
					self.mux.dispatch(&ChatEvent::ConnectionError { detail });
				} else {
					let delay = self.policy.delay_after(failures);
					debug!(failures, retry_in_ms = delay.as_millis() as u64, %detail, "chat connect failed; will retry");
					self.phase = Phase::Retrying;
				}
			}

			BinderEvent::AttemptSucceeded {
				generation,
				transport,
				events,
				welcome,
			} => {
				if generation != self.generation {
					// Completed under a previous identity; discard the
					// result rather than leak a connection.
					transport.close(0, "stale identity");
					return;
				}

				let Some(identity) = self.identity.clone() else {
					transport.close(0, "identity gone");
					return;
				};

				let events_task = self.spawn_events_loop(events, generation);
				self.active = Some(Active {
					identity_id: identity.id,
					transport,
					events_task,
				});
				self.phase = Phase::Connected;
				info!(identity = %identity.id, server = %welcome.server_name, "chat session connected");
				self.mux.dispatch(&ChatEvent::Connected {
					server_name: welcome.server_name,
					server_instance_id: welcome.server_instance_id,
				});
			}

			BinderEvent::EventsEnded { generation, reason } => {
				if generation != self.generation {
					return;
				}

				if let Some(active) = self.active.take() {
					active.transport.close(0, "events stream ended");
				}
				warn!(%reason, "chat session dropped; reconnecting");
				self.mux.dispatch(&ChatEvent::Disconnected { reason });
				// Fresh bounded retry cycle for the same identity.
				self.begin_cycle();
			}
		}
	}

	fn begin_cycle(&mut self) {
		let Some(identity) = self.identity.as_ref() else {
			return;
		};

		self.phase = Phase::AwaitingToken;
		let identity_id = identity.id;
		let generation = self.generation;
		let connector = Arc::clone(&self.connector);
		let tokens = Arc::clone(&self.tokens);
		let policy = self.policy.clone();
		let internal_tx = self.internal_tx.clone();

		self.attempt_task = Some(tokio::spawn(run_connect_attempts(
			identity_id,
			generation,
			connector,
			tokens,
			policy,
			internal_tx,
		)));
	}

	fn spawn_events_loop(&self, mut events: BoxedTransportEvents, generation: u64) -> tokio::task::JoinHandle<()> {
		let mux = Arc::clone(&self.mux);
		let internal_tx = self.internal_tx.clone();

		tokio::spawn(async move {
			let res = events
				.run_events_loop(Box::new(move |frame| match frame {
					EventFrame::Message(message) => mux.dispatch(&ChatEvent::MessageReceived(message)),
					EventFrame::Presence(update) => mux.dispatch(&ChatEvent::PresenceChanged(update)),
				}))
				.await;

			let reason = match res {
				Ok(()) => "events stream closed".to_string(),
				Err(e) => e.to_string(),
			};
			let _ = internal_tx.send(BinderEvent::EventsEnded { generation, reason });
		})
	}

	fn teardown(&mut self, reason: &str) {
		if let Some(task) = self.attempt_task.take() {
			task.abort();
		}

		if let Some(active) = self.active.take() {
			active.transport.close(0, reason);
			active.events_task.abort();
			self.mux.dispatch(&ChatEvent::Disconnected {
				reason: reason.to_string(),
			});
		}

		self.phase = Phase::Idle;
	}
}

/// One bounded connect cycle: token exchange + dial per attempt, sleeping
/// the documented schedule between failures. A failed token exchange is a
/// connection failure, not a separate error path.
async fn run_connect_attempts(
	identity_id: IdentityId,
	generation: u64,
	connector: Arc<dyn Connector>,
	tokens: Arc<dyn TokenSource>,
	policy: RetryPolicy,
	internal_tx: mpsc::UnboundedSender<BinderEvent>,
) {
	let mut failures: u32 = 0;

	loop {
		debug!(identity = %identity_id, attempt = failures + 1, "chat connect attempt");

		let failure_detail = match tokens.chat_token().await {
			Ok(token) => {
				let _ = internal_tx.send(BinderEvent::TokenReady { generation });

				match connector.connect(identity_id, token).await {
					Ok((transport, events, welcome)) => {
						let _ = internal_tx.send(BinderEvent::AttemptSucceeded {
							generation,
							transport,
							events,
							welcome,
						});
						return;
					}
					Err(e) => e.to_string(),
				}
			}
			Err(e) => e.to_string(),
		};

		failures += 1;
		let terminal = policy.attempts_exhausted(failures);
		let _ = internal_tx.send(BinderEvent::AttemptFailed {
			generation,
			failures,
			detail: failure_detail,
			terminal,
		});

		if terminal {
			return;
		}

		tokio::time::sleep(policy.delay_after(failures)).await;
	}
}
