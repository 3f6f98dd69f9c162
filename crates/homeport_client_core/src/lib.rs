#![forbid(unsafe_code)]

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use bytes::BytesMut;
use tokio::io::AsyncWriteExt as _;
use homeport_domain::{AccessToken, IdentityId, RoomId};
use homeport_util::endpoint::QuicEndpoint;
use homeport_wire::framing::{DEFAULT_MAX_FRAME_SIZE, FramingError, encode_frame, try_decode_frame_from_buffer};
use homeport_wire::{Envelope, EventFrame, Hello, Msg, SendMessage, Welcome};
use quinn::{ClientConfig, Endpoint, TransportConfig, VarInt};
use tracing::{debug, info, warn};

/// Chat transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfigV1 {
	/// Remote chat endpoint host (DNS name or IP literal).
	pub server_host: String,

	/// Remote chat endpoint UDP port.
	pub server_port: u16,

	/// Resolved remote address override.
	pub server_addr: Option<SocketAddr>,

	/// Client identifier sent in `Hello`.
	pub client_name: String,

	/// Per-tab instance id sent in `Hello`.
	pub client_instance_id: String,

	/// Maximum inbound/outbound frame size.
	pub max_frame_bytes: usize,

	/// Timeout for connect + handshake.
	pub connect_timeout: Duration,
}

impl TransportConfigV1 {
	/// Parse a `quic://host:port` endpoint into `(host, port)`.
	pub fn parse_quic_endpoint(endpoint: &str) -> Result<(String, u16), ClientCoreError> {
		let e = QuicEndpoint::parse(endpoint)
			.map_err(|msg| ClientCoreError::Protocol(format!("invalid endpoint (expected quic://host:port): {msg}")))?;
		Ok((e.host, e.port))
	}

	/// Convenience: create a config from `quic://host:port`.
	pub fn from_quic_endpoint(endpoint: &str) -> Result<Self, ClientCoreError> {
		let (host, port) = Self::parse_quic_endpoint(endpoint)?;
		Ok(Self {
			server_host: host,
			server_port: port,
			server_addr: None,
			..Self::default()
		})
	}
}

impl Default for TransportConfigV1 {
	fn default() -> Self {
		// Local dev default; deployments configure the endpoint explicitly.
		Self {
			server_host: "localhost".to_string(),
			server_port: 18420,
			server_addr: Some("127.0.0.1:18420".parse().expect("valid default addr")),
			client_name: format!("homeport-client/{}", env!("CARGO_PKG_VERSION")),
			client_instance_id: "dev-instance".to_string(),
			max_frame_bytes: DEFAULT_MAX_FRAME_SIZE,
			connect_timeout: Duration::from_secs(15),
		}
	}
}

/// Errors for chat transport operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientCoreError {
	/// QUIC endpoint setup failed.
	#[error("failed to create QUIC endpoint: {0}")]
	Endpoint(String),

	/// Connection establishment failed.
	#[error("failed to connect: {0}")]
	Connect(String),

	/// Protocol framing error.
	#[error(transparent)]
	Framing(#[from] FramingError),

	/// Protocol error (unexpected message ordering/types).
	#[error("protocol error: {0}")]
	Protocol(String),

	/// The server refused the session (bad/expired token, disabled account).
	#[error("rejected by server: {code}: {message}")]
	Rejected {
		code: String,
		message: String,
	},

	/// IO error.
	#[error("io error: {0}")]
	Io(String),

	/// Other error.
	#[error("error: {0}")]
	Other(String),
}

impl From<anyhow::Error> for ClientCoreError {
	fn from(e: anyhow::Error) -> Self {
		ClientCoreError::Other(format!("{e:#}"))
	}
}

/// Write/command half of a chat connection.
pub struct ChatConnection {
	conn: quinn::Connection,
	send: quinn::SendStream,
	max_frame_bytes: usize,
}

/// Read half of a chat connection; yields server-pushed events.
///
/// Carries over any bytes buffered past the `Welcome` frame so events
/// arriving in the same datagram as the handshake are not lost.
pub struct ChatEvents {
	recv: quinn::RecvStream,
	buf: BytesMut,
	max_frame_bytes: usize,
}

impl ChatConnection {
	/// Connect and perform the v1 handshake for `identity_id`.
	///
	/// The token is sent once in `Hello` and never stored; callers obtain a
	/// fresh one per attempt.
	pub async fn connect(
		cfg: &TransportConfigV1,
		identity_id: IdentityId,
		token: AccessToken,
	) -> Result<(Self, ChatEvents, Welcome), ClientCoreError> {
		let endpoint = make_client_endpoint().map_err(|e| ClientCoreError::Endpoint(format!("{e:#}")))?;
		let quinn_cfg = make_insecure_client_config().map_err(|e| ClientCoreError::Endpoint(format!("{e:#}")))?;

		let connect_timeout = cfg.connect_timeout;
		let server_name = cfg.server_host.clone();

		let candidates: Vec<SocketAddr> = match cfg.server_addr {
			Some(addr) => vec![addr],
			None => {
				let hostport = format!("{}:{}", cfg.server_host, cfg.server_port);
				let addrs = hostport
					.to_socket_addrs()
					.map_err(|e| ClientCoreError::Connect(format!("failed to resolve {hostport}: {e}")))?;

				let addrs: Vec<SocketAddr> = addrs.collect();
				if addrs.is_empty() {
					return Err(ClientCoreError::Connect(format!(
						"DNS resolution returned no addresses for {hostport}"
					)));
				}
				addrs
			}
		};

		let mut last_err: Option<String> = None;
		let mut conn: Option<quinn::Connection> = None;

		for server_addr in candidates {
			let connecting = endpoint
				.connect_with(quinn_cfg.clone(), server_addr, &server_name)
				.map_err(|e| ClientCoreError::Connect(format!("connect_with({server_addr}, sni={server_name}): {e}")))?;

			match tokio::time::timeout(connect_timeout, connecting).await {
				Ok(Ok(c)) => {
					conn = Some(c);
					break;
				}
				Ok(Err(e)) => {
					last_err = Some(format!("connect failed (addr={server_addr}, sni={server_name}): {e}"));
				}
				Err(_) => {
					last_err = Some(format!(
						"connect timeout after {connect_timeout:?} (addr={server_addr}, sni={server_name})"
					));
				}
			}
		}

		let conn = conn.ok_or_else(|| {
			ClientCoreError::Connect(
				last_err.unwrap_or_else(|| format!("connect failed (no addresses attempted) (sni={server_name})")),
			)
		})?;

		info!(remote = %conn.remote_address(), identity = %identity_id, "chat transport connected");

		let (mut send, mut recv) = tokio::time::timeout(connect_timeout, conn.open_bi())
			.await
			.map_err(|_| ClientCoreError::Io(format!("timeout opening chat stream after {connect_timeout:?}")))?
			.map_err(|e| ClientCoreError::Io(format!("open_bi(chat) failed: {e}")))?;

		let hello = Envelope::v1(Msg::Hello(Hello {
			identity_id,
			token,
			client_name: cfg.client_name.clone(),
			client_instance_id: cfg.client_instance_id.clone(),
		}));
		write_envelope(&mut send, &hello, cfg.max_frame_bytes)
			.await
			.map_err(|e| ClientCoreError::Io(format!("send Hello failed: {e}")))?;

		let mut handshake_buf = BytesMut::with_capacity(8 * 1024);
		let welcome_env = tokio::time::timeout(
			connect_timeout,
			read_one_envelope(&mut recv, &mut handshake_buf, cfg.max_frame_bytes),
		)
		.await
		.map_err(|_| ClientCoreError::Protocol(format!("timeout waiting for Welcome after {connect_timeout:?}")))??;

		let welcome = match welcome_env.msg {
			Msg::Welcome(w) => w,
			Msg::Error(e) => {
				return Err(ClientCoreError::Rejected {
					code: e.code,
					message: e.message,
				});
			}
			other => {
				return Err(ClientCoreError::Protocol(format!("expected Welcome, got {other:?}")));
			}
		};

		debug!(
			server_name = %welcome.server_name,
			server_instance_id = %welcome.server_instance_id,
			max_frame_bytes = welcome.max_frame_bytes,
			"received Welcome"
		);

		let max_frame_bytes = (welcome.max_frame_bytes as usize).min(cfg.max_frame_bytes);

		let connection = Self {
			conn,
			send,
			max_frame_bytes,
		};
		let events = ChatEvents {
			recv,
			buf: handshake_buf,
			max_frame_bytes,
		};

		Ok((connection, events, welcome))
	}

	/// Fire-and-forget send. At-most-once: no acknowledgment frame exists.
	pub async fn send_message(&mut self, room_id: RoomId, content: String) -> Result<(), ClientCoreError> {
		let env = Envelope::v1(Msg::Send(SendMessage { room_id, content }));
		write_envelope(&mut self.send, &env, self.max_frame_bytes).await
	}

	/// Whether the underlying connection is still live.
	pub fn is_connected(&self) -> bool {
		self.conn.close_reason().is_none()
	}

	/// Close the connection. Safe to call more than once.
	pub fn close(&self, code: u32, reason: &str) {
		self.conn.close(VarInt::from_u32(code), reason.as_bytes());
	}
}

impl ChatEvents {
	/// Run the events loop until EOF or error, handing each event to `on_event`.
	///
	/// Events are handed over in the order the server wrote them; no
	/// reordering or coalescing across kinds.
	pub async fn run_events_loop<F>(&mut self, mut on_event: F) -> Result<(), ClientCoreError>
	where
		F: FnMut(EventFrame),
	{
		let mut tmp = [0u8; 8192];

		loop {
			// Drain whatever is already buffered (including handshake
			// leftovers) before reading more.
			loop {
				match try_decode_frame_from_buffer::<Envelope>(&mut self.buf, self.max_frame_bytes) {
					Ok(Some(env)) => match env.msg {
						Msg::Event(ev) => {
							debug!(event_kind = event_kind(&ev), "chat event decoded");
							on_event(ev);
						}
						Msg::Error(e) => {
							warn!(code = %e.code, message = %e.message, "server error frame on chat stream");
						}
						other => warn!("unexpected message on chat stream: {:?}", other),
					},
					Ok(None) => break,
					Err(e) => return Err(ClientCoreError::Framing(e)),
				}
			}

			let n = match self.recv.read(&mut tmp).await {
				Ok(Some(n)) => n,
				Ok(None) => {
					info!("chat events stream closed");
					return Ok(());
				}
				Err(e) => return Err(ClientCoreError::Io(e.to_string())),
			};

			self.buf.extend_from_slice(&tmp[..n]);
		}
	}
}

async fn write_envelope(
	send: &mut quinn::SendStream,
	env: &Envelope,
	max_frame_bytes: usize,
) -> Result<(), ClientCoreError> {
	let frame = encode_frame(env, max_frame_bytes).map_err(ClientCoreError::Framing)?;
	send.write_all(&frame).await.map_err(|e| ClientCoreError::Io(e.to_string()))?;
	send.flush().await.map_err(|e| ClientCoreError::Io(e.to_string()))?;
	Ok(())
}

fn event_kind(ev: &EventFrame) -> &'static str {
	match ev {
		EventFrame::Message(_) => "message",
		EventFrame::Presence(_) => "presence",
	}
}

async fn read_one_envelope(
	recv: &mut quinn::RecvStream,
	buf: &mut BytesMut,
	max_frame_bytes: usize,
) -> Result<Envelope, ClientCoreError> {
	let mut tmp = [0u8; 8192];

	loop {
		// Try decoding first in case the buffer already has a full frame.
		match try_decode_frame_from_buffer::<Envelope>(buf, max_frame_bytes) {
			Ok(Some(env)) => return Ok(env),
			Ok(None) => {}
			Err(e) => return Err(ClientCoreError::Framing(e)),
		}

		let n = match recv.read(&mut tmp).await {
			Ok(Some(n)) => n,
			Ok(None) => {
				return Err(ClientCoreError::Protocol(
					"stream closed before receiving full message".to_string(),
				));
			}
			Err(e) => return Err(ClientCoreError::Io(e.to_string())),
		};

		buf.extend_from_slice(&tmp[..n]);
	}
}

fn make_client_endpoint() -> anyhow::Result<Endpoint> {
	let addr: SocketAddr = "0.0.0.0:0".parse().context("parse wildcard bind addr")?;
	let endpoint = Endpoint::client(addr).context("create client endpoint")?;
	Ok(endpoint)
}

/// Dev-only TLS config that skips server cert validation.
fn make_insecure_client_config() -> anyhow::Result<ClientConfig> {
	let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

	#[derive(Debug)]
	struct NoVerifier;

	impl rustls::client::danger::ServerCertVerifier for NoVerifier {
		fn verify_server_cert(
			&self,
			_end_entity: &rustls::pki_types::CertificateDer<'_>,
			_intermediates: &[rustls::pki_types::CertificateDer<'_>],
			_server_name: &rustls::pki_types::ServerName<'_>,
			_ocsp_response: &[u8],
			_now: rustls::pki_types::UnixTime,
		) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
			Ok(rustls::client::danger::ServerCertVerified::assertion())
		}

		fn verify_tls12_signature(
			&self,
			_message: &[u8],
			_cert: &rustls::pki_types::CertificateDer<'_>,
			_dss: &rustls::DigitallySignedStruct,
		) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
			Err(rustls::Error::General("TLS1.2 not supported".into()))
		}

		fn verify_tls13_signature(
			&self,
			_message: &[u8],
			_cert: &rustls::pki_types::CertificateDer<'_>,
			_dss: &rustls::DigitallySignedStruct,
		) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
			Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
		}

		fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
			vec![
				rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
				rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
				rustls::SignatureScheme::RSA_PSS_SHA256,
				rustls::SignatureScheme::RSA_PSS_SHA384,
				rustls::SignatureScheme::RSA_PSS_SHA512,
				rustls::SignatureScheme::ED25519,
			]
		}
	}

	let mut tls = rustls::ClientConfig::builder()
		.with_root_certificates(rustls::RootCertStore::empty())
		.with_no_client_auth();

	tls.dangerous().set_certificate_verifier(Arc::new(NoVerifier));
	tls.alpn_protocols = vec![b"homeport-v1".to_vec()];

	let quic_tls = quinn::crypto::rustls::QuicClientConfig::try_from(tls)?;

	let mut cfg = ClientConfig::new(Arc::new(quic_tls));

	let mut transport = TransportConfig::default();
	transport.max_concurrent_bidi_streams(VarInt::from_u32(8));
	transport.max_concurrent_uni_streams(VarInt::from_u32(8));
	cfg.transport_config(Arc::new(transport));

	Ok(cfg)
}
