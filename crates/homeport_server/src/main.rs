#![forbid(unsafe_code)]

mod config;
mod quic;
mod server;

use std::net::SocketAddr;
use std::sync::Arc;

use homeport_util::endpoint::QuicEndpoint;
use homeport_util::secret::SecretString;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::quic::config::ChatQuicConfig;
use crate::server::connection::{ConnectionSettings, handle_connection};
use crate::server::directory::InMemoryDirectory;
use crate::server::http::{HealthState, spawn_http_server};
use crate::server::hub::{ChatHub, ChatHubConfig};
use crate::server::sessions::SessionStore;
use crate::server::state::AppState;

const DEFAULT_HTTP_BIND: &str = "127.0.0.1:8787";

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: homeport_server [--bind quic://host:port]\n\
\n\
Options:\n\
\t--bind    Chat endpoint bind (default: quic://127.0.0.1:18420)\n\
\t         Format: quic://host:port\n\
\t--help   Show this help\n\
"
	);
	std::process::exit(2)
}

fn parse_args() -> SocketAddr {
	let mut bind_endpoint = "quic://127.0.0.1:18420".to_string();

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--bind" | "--listen" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--bind must be non-empty (expected quic://host:port)");
					usage_and_exit();
				}
				bind_endpoint = v;
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	let bind = QuicEndpoint::parse(&bind_endpoint).unwrap_or_else(|e| {
		eprintln!("{e}");
		usage_and_exit();
	});

	bind.to_socket_addr_if_ip_literal().unwrap_or_else(|e| {
		eprintln!("{e}");
		usage_and_exit();
	})
}

fn init_rustls_crypto_provider() {
	let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,homeport_server=debug".to_string());

	let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
		.ok()
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty());
	let base = tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false));

	if let Some(endpoint) = otlp_endpoint {
		use opentelemetry::global;
		use opentelemetry::trace::TracerProvider as _;
		use opentelemetry_otlp::WithExportConfig;

		match opentelemetry_otlp::SpanExporter::builder()
			.with_tonic()
			.with_endpoint(endpoint.clone())
			.build()
		{
			Ok(exporter) => {
				let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
					.with_batch_exporter(exporter)
					.build();
				let tracer = tracer_provider.tracer("homeport_server");
				global::set_tracer_provider(tracer_provider);

				let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
				base.with(otel_layer).init();
				info!(endpoint = %endpoint, "otlp tracing enabled");
			}
			Err(e) => {
				base.init();
				warn!(error = %e, "failed to initialize otlp tracing");
			}
		}
	} else {
		base.init();
	}
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match bind.parse::<std::net::SocketAddr>() {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => {
			warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)");
		}
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_rustls_crypto_provider();
	init_tracing();

	let chat_bind_addr = parse_args();

	let config_path = crate::config::default_config_path()?;
	let server_cfg = crate::config::load_server_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded server config (toml + env overrides)");

	init_metrics(server_cfg.server.metrics_bind.as_deref());

	let auth_hmac_secret = server_cfg
		.server
		.auth_hmac_secret
		.clone()
		.unwrap_or_else(|| SecretString::new(uuid::Uuid::new_v4().to_string()));

	let hub_cfg = match server_cfg.chat.subscriber_queue_capacity {
		Some(subscriber_queue_capacity) => ChatHubConfig {
			subscriber_queue_capacity,
		},
		None => ChatHubConfig::default(),
	};

	let health = HealthState::new();
	let state = Arc::new(AppState {
		directory: Arc::new(InMemoryDirectory::new(server_cfg.users.clone())),
		sessions: SessionStore::new(server_cfg.server.session_ttl),
		hub: ChatHub::new(hub_cfg),
		health: health.clone(),
		auth_hmac_secret,
		chat_token_ttl: server_cfg.chat.token_ttl,
		server_name: format!("homeport-server/{}", env!("CARGO_PKG_VERSION")),
		server_instance_id: uuid::Uuid::new_v4().to_string(),
		dev_allow_unverified_login: server_cfg.server.dev_allow_unverified_login,
	});

	let http_bind: SocketAddr = server_cfg
		.server
		.http_bind
		.as_deref()
		.unwrap_or(DEFAULT_HTTP_BIND)
		.parse()
		.map_err(|e| anyhow::anyhow!("invalid http bind address: {e}"))?;
	spawn_http_server(http_bind, Arc::clone(&state));

	let quic_cfg = ChatQuicConfig::dev(chat_bind_addr);
	let tls_paths = match (
		server_cfg.server.tls_cert_path.as_deref(),
		server_cfg.server.tls_key_path.as_deref(),
	) {
		(Some(cert), Some(key)) => {
			info!(cert = %cert.display(), key = %key.display(), "loading TLS cert/key");
			Some((cert, key))
		}
		_ => None,
	};

	let (endpoint, dev_cert_der) = quic_cfg.bind_endpoint(tls_paths)?;
	if let Some(cert_der) = dev_cert_der {
		info!(
			bind = %chat_bind_addr,
			cert_der_len = cert_der.len(),
			"chat endpoint ready (dev self-signed cert)"
		);
	} else {
		info!(bind = %chat_bind_addr, "chat endpoint ready");
	}

	let conn_settings = match server_cfg.chat.max_frame_bytes {
		Some(max_frame_bytes) => ConnectionSettings { max_frame_bytes },
		None => ConnectionSettings::default(),
	};

	health.mark_ready();

	let mut next_conn_id: u64 = 1;

	loop {
		let Some(connecting) = endpoint.accept().await else {
			break;
		};

		let conn_id = next_conn_id;
		next_conn_id += 1;
		metrics::counter!("homeport_server_connections_total").increment(1);

		let state = Arc::clone(&state);
		let conn_settings = conn_settings.clone();

		tokio::spawn(async move {
			match connecting.await {
				Ok(connection) => {
					info!(conn_id, remote = %connection.remote_address(), "accepted chat connection");

					if let Err(e) = handle_connection(conn_id, connection, state, conn_settings).await {
						warn!(conn_id, error = %e, "connection handler exited with error");
					}
				}
				Err(e) => {
					warn!(conn_id, error = %e, "failed to establish QUIC connection");
				}
			}
		});
	}

	Ok(())
}
