#![forbid(unsafe_code)]

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{HeaderMap, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{info, warn};

use homeport_domain::{Identity, IdentityId, Role};

use crate::server::auth::issue_chat_token;
use crate::server::directory::Directory as _;
use crate::server::middleware::{Capability, CapabilityError, authorize};
use crate::server::state::AppState;

#[derive(Clone, Default)]
pub struct HealthState {
	ready: Arc<AtomicBool>,
}

impl HealthState {
	pub fn new() -> Self {
		Self {
			ready: Arc::new(AtomicBool::new(false)),
		}
	}

	pub fn mark_ready(&self) {
		self.ready.store(true, Ordering::Relaxed);
	}

	pub fn is_ready(&self) -> bool {
		self.ready.load(Ordering::Relaxed)
	}
}

#[derive(Debug, Deserialize)]
struct ApproveBody {
	approved: bool,
}

#[derive(Debug, Deserialize)]
struct RoleBody {
	role: String,
}

#[derive(Debug, Deserialize)]
struct EnabledBody {
	enabled: bool,
}

#[derive(Debug, Deserialize)]
struct DevLoginBody {
	identity_id: i64,
}

#[derive(Debug, Serialize)]
struct TokenBody<'a> {
	token: &'a str,
}

#[derive(Debug, Serialize)]
struct SessionBody {
	token: String,
}

/// Directory entry plus the live presence flag for `GET /api/users`.
#[derive(Debug, Serialize)]
struct UserSummary {
	#[serde(flatten)]
	identity: Identity,
	is_online: bool,
}

pub fn spawn_http_server(bind: SocketAddr, state: Arc<AppState>) {
	tokio::spawn(async move {
		if let Err(err) = run_http_server(bind, state).await {
			warn!(error = %err, "http server stopped");
		}
	});
}

async fn run_http_server(bind: SocketAddr, state: Arc<AppState>) -> anyhow::Result<()> {
	let listener = TcpListener::bind(bind).await?;
	info!(%bind, "http api listening");

	loop {
		let (stream, _addr) = listener.accept().await?;
		let io = TokioIo::new(stream);
		let state = Arc::clone(&state);
		tokio::spawn(async move {
			let service = service_fn(move |req: Request<Incoming>| handle_request(req, Arc::clone(&state)));
			if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
				warn!(error = %err, "http connection error");
			}
		});
	}
}

/// One service for health and the protected dashboard API. Every protected
/// route runs through `authorize` server-side, whatever the client gate
/// decided.
pub async fn handle_request<B>(req: Request<B>, state: Arc<AppState>) -> Result<Response<Full<Bytes>>, Infallible>
where
	B: hyper::body::Body,
	B::Data: Send,
{
	let method = req.method().clone();
	let path = req.uri().path().to_string();
	let session_token = bearer_token(req.headers());

	if method == Method::GET && path == "/healthz" {
		return Ok(text_response(StatusCode::OK, "ok"));
	}
	if method == Method::GET && path == "/readyz" {
		return Ok(if state.health.is_ready() {
			text_response(StatusCode::OK, "ready")
		} else {
			text_response(StatusCode::SERVICE_UNAVAILABLE, "not-ready")
		});
	}

	let body = match req.into_body().collect().await {
		Ok(collected) => collected.to_bytes(),
		Err(_) => return Ok(message_response(StatusCode::BAD_REQUEST, "unreadable request body")),
	};

	let identity = state.identity_for_session(session_token.as_deref()).await;
	let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

	metrics::counter!("homeport_server_http_requests_total").increment(1);

	let response = match (method.as_str(), segments.as_slice()) {
		("GET", ["api", "identity"]) => match identity {
			Some(identity) if identity.enabled => json_response(StatusCode::OK, &identity),
			_ => capability_response(&CapabilityError::Unauthenticated),
		},

		("POST", ["api", "logout"]) => match (identity, session_token) {
			(Some(_), Some(token)) => {
				state.sessions.revoke(&token).await;
				Response::builder()
					.status(StatusCode::NO_CONTENT)
					.body(Full::new(Bytes::new()))
					.unwrap()
			}
			_ => capability_response(&CapabilityError::Unauthenticated),
		},

		("GET", ["api", "chat-token"]) => match authorize(identity.as_ref(), &[Capability::Approved]) {
			Ok(identity) => {
				let token = issue_chat_token(identity.id, state.chat_token_ttl, &state.auth_hmac_secret);
				metrics::counter!("homeport_server_chat_tokens_issued_total").increment(1);
				json_response(StatusCode::OK, &TokenBody { token: token.expose() })
			}
			Err(e) => capability_response(&e),
		},

		("GET", ["api", "users"]) => match authorize(identity.as_ref(), &[Capability::Approved]) {
			Ok(_) => {
				let mut users = Vec::new();
				for entry in state.directory.list().await {
					let is_online = state.hub.is_online(entry.id).await;
					users.push(UserSummary {
						identity: entry,
						is_online,
					});
				}
				json_response(StatusCode::OK, &users)
			}
			Err(e) => capability_response(&e),
		},

		("POST", ["api", "users", raw_id, "approve"]) => set_approved(&state, identity.as_ref(), raw_id, &body).await,

		("POST", ["api", "users", raw_id, "role"]) => set_role(&state, identity.as_ref(), raw_id, &body).await,

		("POST", ["api", "users", raw_id, "enabled"]) => set_enabled(&state, identity.as_ref(), raw_id, &body).await,

		("POST", ["api", "session"]) if state.dev_allow_unverified_login => dev_login(&state, &body).await,

		_ => message_response(StatusCode::NOT_FOUND, "not found"),
	};

	Ok(response)
}

async fn set_approved(
	state: &AppState,
	identity: Option<&Identity>,
	raw_id: &str,
	body: &[u8],
) -> Response<Full<Bytes>> {
	let caller = match authorize(identity, &[Capability::Approved, Capability::Admin]) {
		Ok(caller) => caller,
		Err(e) => return capability_response(&e),
	};

	let Ok(target) = raw_id.parse::<IdentityId>() else {
		return message_response(StatusCode::BAD_REQUEST, "invalid identity id");
	};
	let Ok(update) = serde_json::from_slice::<ApproveBody>(body) else {
		return message_response(StatusCode::BAD_REQUEST, "expected {\"approved\": <bool>}");
	};

	match state.directory.set_approved(target, update.approved).await {
		Ok(updated) => {
			info!(admin = %caller.id, target = %target, approved = update.approved, "approval flag changed");
			json_response(StatusCode::OK, &updated)
		}
		Err(e) => message_response(StatusCode::NOT_FOUND, &e.to_string()),
	}
}

async fn set_role(state: &AppState, identity: Option<&Identity>, raw_id: &str, body: &[u8]) -> Response<Full<Bytes>> {
	let caller = match authorize(identity, &[Capability::Approved, Capability::SuperAdmin]) {
		Ok(caller) => caller,
		Err(e) => return capability_response(&e),
	};

	let Ok(target) = raw_id.parse::<IdentityId>() else {
		return message_response(StatusCode::BAD_REQUEST, "invalid identity id");
	};
	let role = match serde_json::from_slice::<RoleBody>(body).map(|b| b.role.parse::<Role>()) {
		Ok(Ok(role)) => role,
		_ => return message_response(StatusCode::BAD_REQUEST, "expected {\"role\": \"user|admin|superadmin\"}"),
	};

	match state.directory.set_role(target, role).await {
		Ok(updated) => {
			info!(admin = %caller.id, target = %target, role = %role, "role changed");
			json_response(StatusCode::OK, &updated)
		}
		Err(e) => message_response(StatusCode::NOT_FOUND, &e.to_string()),
	}
}

async fn set_enabled(state: &AppState, identity: Option<&Identity>, raw_id: &str, body: &[u8]) -> Response<Full<Bytes>> {
	let caller = match authorize(identity, &[Capability::Approved, Capability::Admin]) {
		Ok(caller) => caller,
		Err(e) => return capability_response(&e),
	};

	let Ok(target) = raw_id.parse::<IdentityId>() else {
		return message_response(StatusCode::BAD_REQUEST, "invalid identity id");
	};
	let Ok(update) = serde_json::from_slice::<EnabledBody>(body) else {
		return message_response(StatusCode::BAD_REQUEST, "expected {\"enabled\": <bool>}");
	};

	match state.directory.set_enabled(target, update.enabled).await {
		Ok(updated) => {
			if !update.enabled {
				let revoked = state.sessions.revoke_identity(target).await;
				info!(admin = %caller.id, target = %target, revoked, "account disabled; sessions revoked");
			} else {
				info!(admin = %caller.id, target = %target, "account enabled");
			}
			json_response(StatusCode::OK, &updated)
		}
		Err(e) => message_response(StatusCode::NOT_FOUND, &e.to_string()),
	}
}

/// Dev-only stand-in for the external identity provider's login flow.
async fn dev_login(state: &AppState, body: &[u8]) -> Response<Full<Bytes>> {
	let Ok(login) = serde_json::from_slice::<DevLoginBody>(body) else {
		return message_response(StatusCode::BAD_REQUEST, "expected {\"identity_id\": <integer>}");
	};

	let identity_id = IdentityId::new(login.identity_id);
	match state.directory.get(identity_id).await {
		Some(_) => {
			let token = state.sessions.create(identity_id).await;
			json_response(StatusCode::OK, &SessionBody { token })
		}
		None => message_response(StatusCode::NOT_FOUND, "unknown identity"),
	}
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
	let value = headers.get(hyper::header::AUTHORIZATION)?.to_str().ok()?;
	value.strip_prefix("Bearer ").map(|t| t.trim().to_string())
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
	let payload = serde_json::to_vec(body).unwrap_or_default();
	Response::builder()
		.status(status)
		.header("content-type", "application/json")
		.body(Full::new(Bytes::from(payload)))
		.unwrap()
}

fn message_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
	let payload = serde_json::json!({ "message": message });
	json_response(status, &payload)
}

fn capability_response(err: &CapabilityError) -> Response<Full<Bytes>> {
	metrics::counter!("homeport_server_authorization_rejections_total").increment(1);
	let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::FORBIDDEN);
	message_response(status, &err.to_string())
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
	Response::builder()
		.status(status)
		.body(Full::new(Bytes::from_static(body.as_bytes())))
		.unwrap()
}
