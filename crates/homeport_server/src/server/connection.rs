#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::{Context as _, anyhow};
use homeport_domain::{ChatMessage, Identity, MessageId};
use homeport_util::time::unix_ms_now;
use homeport_wire::framing::{DEFAULT_MAX_FRAME_SIZE, encode_frame};
use homeport_wire::{Envelope, ErrorFrame, Hello, Msg, Welcome, error_code};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::server::auth::verify_chat_token;
use crate::server::directory::Directory as _;
use crate::server::hub::HubItem;
use crate::server::state::AppState;

/// Per-connection chat endpoint settings.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
	pub max_frame_bytes: u32,
}

impl Default for ConnectionSettings {
	fn default() -> Self {
		Self {
			max_frame_bytes: DEFAULT_MAX_FRAME_SIZE as u32,
		}
	}
}

/// Drive one chat connection: authenticate the `Hello`, register with the
/// hub, relay sends, and push hub events until either side goes away.
pub async fn handle_connection(
	conn_id: u64,
	connection: quinn::Connection,
	state: Arc<AppState>,
	settings: ConnectionSettings,
) -> anyhow::Result<()> {
	struct ConnectionGaugeGuard;
	impl Drop for ConnectionGaugeGuard {
		fn drop(&mut self) {
			metrics::gauge!("homeport_server_active_connections").decrement(1.0);
		}
	}

	metrics::gauge!("homeport_server_active_connections").increment(1.0);
	let _conn_guard = ConnectionGaugeGuard;

	let max_frame_bytes = settings.max_frame_bytes as usize;

	let (mut send, mut recv) = connection.accept_bi().await.context("accept chat bidirectional stream")?;

	let (ctrl_tx, mut ctrl_rx) = mpsc::unbounded_channel::<Envelope>();
	let reader_task = tokio::spawn(async move {
		let mut buf = Vec::<u8>::with_capacity(16 * 1024);
		let mut tmp = [0u8; 8192];

		loop {
			let n = match recv.read(&mut tmp).await {
				Ok(Some(n)) => n,
				Ok(None) => return Ok::<(), anyhow::Error>(()),
				Err(e) => return Err(anyhow!(e).context("chat stream read failed")),
			};

			metrics::counter!("homeport_server_chat_bytes_in_total").increment(n as u64);
			buf.extend_from_slice(&tmp[..n]);

			loop {
				match homeport_wire::decode_frame::<Envelope>(&buf, max_frame_bytes) {
					Ok((env, used)) => {
						buf.drain(0..used);
						metrics::counter!("homeport_server_envelopes_in_total").increment(1);

						if ctrl_tx.send(env).is_err() {
							return Ok(());
						}
					}
					Err(homeport_wire::FramingError::InsufficientData { .. }) => break,
					Err(e) => {
						metrics::counter!("homeport_server_chat_decode_errors_total").increment(1);
						return Err(anyhow!(e).context("failed to decode chat frame"));
					}
				}
			}
		}
	});

	let hello = wait_for_hello(&mut ctrl_rx).await?;

	let identity = match authenticate_hello(&state, &hello).await {
		Ok(identity) => identity,
		Err(reason) => {
			warn!(conn_id, identity = %hello.identity_id, %reason, "chat connection rejected");
			metrics::counter!("homeport_server_chat_unauthorized_total").increment(1);
			send_envelope(
				&mut send,
				Envelope::v1(Msg::Error(ErrorFrame {
					code: error_code::UNAUTHORIZED.to_string(),
					message: reason.to_string(),
				})),
				max_frame_bytes,
			)
			.await
			.ok();
			return Ok(());
		}
	};

	info!(
		conn_id,
		identity = %identity.id,
		client_name = %hello.client_name,
		client_instance_id = %hello.client_instance_id,
		"chat connection authenticated"
	);
	metrics::counter!("homeport_server_hello_total").increment(1);

	send_envelope(
		&mut send,
		Envelope::v1(Msg::Welcome(Welcome {
			server_name: state.server_name.clone(),
			server_instance_id: state.server_instance_id.clone(),
			server_time_unix_ms: unix_ms_now(),
			max_frame_bytes: settings.max_frame_bytes,
		})),
		max_frame_bytes,
	)
	.await
	.context("send Welcome")?;

	let mut hub_rx = state.hub.connect(conn_id, identity.id).await;

	let loop_result = async {
		loop {
			tokio::select! {
				item = hub_rx.recv() => {
					let Some(item) = item else {
						return Ok::<(), anyhow::Error>(());
					};

					match item {
						HubItem::Event(event) => {
							send_envelope(&mut send, Envelope::v1(Msg::Event(event)), max_frame_bytes)
								.await
								.context("chat stream write failed")?;
						}
						HubItem::Lagged { dropped } => {
							warn!(conn_id, identity = %identity.id, dropped, "subscriber lagged; events were dropped");
							send_envelope(
								&mut send,
								Envelope::v1(Msg::Error(ErrorFrame {
									code: "LAGGED".to_string(),
									message: format!("{dropped} events dropped on a full queue"),
								})),
								max_frame_bytes,
							)
							.await
							.context("chat stream write failed (lag marker)")?;
						}
					}
				}

				env = ctrl_rx.recv() => {
					let Some(env) = env else {
						return Ok(());
					};

					match env.msg {
						Msg::Send(send_msg) => {
							if send_msg.room_id.as_str().trim().is_empty() {
								metrics::counter!("homeport_server_sends_invalid_total").increment(1);
								send_envelope(
									&mut send,
									Envelope::v1(Msg::Error(ErrorFrame {
										code: error_code::INVALID_ROOM.to_string(),
										message: "room id must be non-empty".to_string(),
									})),
									max_frame_bytes,
								)
								.await?;
								continue;
							}

							if send_msg.content.trim().is_empty() {
								metrics::counter!("homeport_server_sends_invalid_total").increment(1);
								send_envelope(
									&mut send,
									Envelope::v1(Msg::Error(ErrorFrame {
										code: error_code::PROTOCOL.to_string(),
										message: "empty message".to_string(),
									})),
									max_frame_bytes,
								)
								.await?;
								continue;
							}

							let message = ChatMessage {
								id: MessageId::new_v4(),
								room_id: send_msg.room_id,
								sender_id: identity.id,
								content: send_msg.content,
								sent_at_unix_ms: unix_ms_now(),
							};

							debug!(conn_id, identity = %identity.id, room = %message.room_id, "relaying chat message");
							metrics::counter!("homeport_server_sends_total").increment(1);
							state.hub.broadcast_message(message).await;
						}

						Msg::Hello(_) => {
							debug!(conn_id, "ignoring duplicate Hello");
						}

						other => {
							warn!(conn_id, "unhandled chat message: {:?}", other);
						}
					}
				}
			}
		}
	}
	.await;

	state.hub.disconnect(conn_id).await;

	reader_task.abort();
	let _ = reader_task.await;

	loop_result
}

/// Token signature, expiry, subject binding, and directory flags must all
/// hold before a connection is admitted.
async fn authenticate_hello(state: &AppState, hello: &Hello) -> Result<Identity, &'static str> {
	let claims = verify_chat_token(hello.token.expose(), &state.auth_hmac_secret).map_err(|_| "invalid chat token")?;

	if claims.identity_id() != hello.identity_id {
		return Err("token subject mismatch");
	}

	match state.directory.get(hello.identity_id).await {
		Some(identity) if identity.approved && identity.enabled => Ok(identity),
		Some(_) => Err("account not approved"),
		None => Err("unknown identity"),
	}
}

async fn wait_for_hello(ctrl_rx: &mut mpsc::UnboundedReceiver<Envelope>) -> anyhow::Result<Hello> {
	while let Some(env) = ctrl_rx.recv().await {
		if let Msg::Hello(hello) = env.msg {
			return Ok(hello);
		}
	}
	Err(anyhow!("connection closed before Hello"))
}

async fn send_envelope(send: &mut quinn::SendStream, env: Envelope, max_frame_bytes: usize) -> anyhow::Result<()> {
	let frame = encode_frame(&env, max_frame_bytes).map_err(|e| anyhow!(e))?;
	metrics::counter!("homeport_server_envelopes_out_total").increment(1);
	metrics::counter!("homeport_server_chat_bytes_out_total").increment(frame.len() as u64);

	send.write_all(&frame).await.context("stream write")?;
	Ok(())
}
