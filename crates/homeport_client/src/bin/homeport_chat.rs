#![forbid(unsafe_code)]

use std::sync::Arc;

use homeport_client::{
	ChatRuntime, DashboardApi, EventKind, GateDecision, QuicConnector, RetryPolicy, evaluate, ChatEvent, IdentityLoad,
};
use homeport_client_core::TransportConfigV1;
use homeport_domain::RoomId;
use tracing::info;

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: homeport_chat [--api http://host:port] [--connect quic://host:port] [--room room] [--send text]\n\
\n\
Options:\n\
\t--api      Dashboard HTTP API base (default: http://127.0.0.1:8787)\n\
\t--connect  Chat endpoint (default: quic://127.0.0.1:18420)\n\
\t--room     Room to send into (default: lobby)\n\
\t--send     Send one message after connecting, then keep listening\n\
\t--help     Show this help\n\
\n\
The session bearer token is read from HOMEPORT_SESSION_TOKEN.\n"
	);
	std::process::exit(2)
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
	tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

struct Args {
	api_base: String,
	chat_endpoint: String,
	room: String,
	send: Option<String>,
}

fn parse_args() -> Args {
	let mut args = Args {
		api_base: "http://127.0.0.1:8787".to_string(),
		chat_endpoint: "quic://127.0.0.1:18420".to_string(),
		room: "lobby".to_string(),
		send: None,
	};

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--api" => args.api_base = it.next().unwrap_or_else(|| usage_and_exit()),
			"--connect" | "--endpoint" => args.chat_endpoint = it.next().unwrap_or_else(|| usage_and_exit()),
			"--room" => args.room = it.next().unwrap_or_else(|| usage_and_exit()),
			"--send" => args.send = Some(it.next().unwrap_or_else(|| usage_and_exit())),
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	args
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();
	let args = parse_args();

	let session_token = std::env::var("HOMEPORT_SESSION_TOKEN").ok().and_then(|v| {
		let v = v.trim().to_string();
		(!v.is_empty()).then_some(v)
	});

	let api = DashboardApi::new(&args.api_base, session_token)?;

	// Same decision the dashboard shell makes on every navigation.
	let load = api.load_identity().await;
	let identity = match (evaluate(&load), load) {
		(GateDecision::Render, IdentityLoad::Loaded(Some(identity))) => identity,
		(GateDecision::Redirect(target), _) => {
			eprintln!("not signed in for the dashboard; would redirect to {}", target.path());
			std::process::exit(1);
		}
		_ => {
			eprintln!("identity lookup is still pending; try again");
			std::process::exit(1);
		}
	};

	info!(identity = %identity.id, display_name = %identity.display_name, "signed in");

	let transport_cfg = TransportConfigV1 {
		client_name: format!("homeport-chat-cli/{}", env!("CARGO_PKG_VERSION")),
		client_instance_id: format!("cli-{}", std::process::id()),
		server_addr: None,
		..TransportConfigV1::from_quic_endpoint(&args.chat_endpoint)?
	};

	let runtime = ChatRuntime::start(
		Arc::new(QuicConnector::new(transport_cfg)),
		Arc::new(api),
		RetryPolicy::default(),
	);

	let events = runtime.events();
	events.subscribe(EventKind::Connected, |ev| {
		if let ChatEvent::Connected { server_name, .. } = ev {
			println!("* connected to {server_name}");
		}
	});
	events.subscribe(EventKind::Disconnected, |ev| {
		if let ChatEvent::Disconnected { reason } = ev {
			println!("* disconnected: {reason}");
		}
	});
	events.subscribe(EventKind::ConnectionError, |ev| {
		if let ChatEvent::ConnectionError { detail } = ev {
			println!("* chat unavailable: {detail}");
		}
	});
	events.subscribe(EventKind::MessageReceived, |ev| {
		if let ChatEvent::MessageReceived(m) = ev {
			println!("[{}] {}: {}", m.room_id, m.sender_id, m.content);
		}
	});
	events.subscribe(EventKind::PresenceChanged, |ev| {
		if let ChatEvent::PresenceChanged(p) = ev {
			println!("* {} is {}", p.identity_id, if p.is_online { "online" } else { "offline" });
		}
	});

	runtime
		.controller()
		.identity_changed(Some(identity))
		.await
		.map_err(anyhow::Error::msg)?;

	if let Some(text) = args.send {
		// Give the binder a moment to finish the handshake.
		tokio::time::sleep(std::time::Duration::from_secs(1)).await;
		let room = RoomId::new(args.room.clone()).map_err(anyhow::Error::msg)?;
		runtime.controller().send_message(room, text).await.map_err(anyhow::Error::msg)?;
	}

	tokio::signal::ctrl_c().await?;
	info!("shutting down");

	runtime.controller().identity_changed(None).await.ok();
	runtime.shutdown().await;

	Ok(())
}
