#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request, StatusCode};
use serde_json::{Value, json};

use homeport_domain::{Identity, IdentityId, Role};
use homeport_util::secret::SecretString;

use crate::server::auth::verify_chat_token;
use crate::server::directory::{Directory, InMemoryDirectory};
use crate::server::http::{HealthState, handle_request};
use crate::server::hub::{ChatHub, ChatHubConfig};
use crate::server::sessions::SessionStore;
use crate::server::state::AppState;

fn seed_identity(id: i64, name: &str, role: Role, approved: bool) -> Identity {
	Identity {
		id: IdentityId::new(id),
		display_name: name.to_string(),
		role,
		approved,
		enabled: true,
	}
}

fn test_state() -> Arc<AppState> {
	let directory = Arc::new(InMemoryDirectory::new(vec![
		seed_identity(1, "root", Role::SuperAdmin, true),
		seed_identity(2, "ops-admin", Role::Admin, true),
		seed_identity(3, "member", Role::User, true),
		seed_identity(7, "newcomer", Role::User, false),
	]));

	Arc::new(AppState {
		directory,
		sessions: SessionStore::new(Duration::from_secs(3600)),
		hub: ChatHub::new(ChatHubConfig::default()),
		health: HealthState::new(),
		auth_hmac_secret: SecretString::new("http-test-secret"),
		chat_token_ttl: Duration::from_secs(60),
		server_name: "homeport-test".to_string(),
		server_instance_id: "test-1".to_string(),
		dev_allow_unverified_login: false,
	})
}

async fn call(
	state: &Arc<AppState>,
	method: Method,
	path: &str,
	bearer: Option<&str>,
	body: Option<Value>,
) -> (StatusCode, Value) {
	let mut builder = Request::builder().method(method).uri(path);
	if let Some(token) = bearer {
		builder = builder.header("authorization", format!("Bearer {token}"));
	}

	let payload = body.map(|v| serde_json::to_vec(&v).unwrap()).unwrap_or_default();
	let req = builder.body(Full::new(Bytes::from(payload))).unwrap();

	let resp = handle_request(req, Arc::clone(state)).await.unwrap();
	let status = resp.status();
	let bytes = resp.into_body().collect().await.unwrap().to_bytes();
	let value = if bytes.is_empty() {
		Value::Null
	} else {
		serde_json::from_slice(&bytes).unwrap_or(Value::Null)
	};

	(status, value)
}

#[tokio::test]
async fn unauthenticated_requests_get_401() {
	let state = test_state();

	for path in ["/api/identity", "/api/users", "/api/chat-token"] {
		let (status, body) = call(&state, Method::GET, path, None, None).await;
		assert_eq!(status, StatusCode::UNAUTHORIZED, "{path}");
		assert!(body["message"].as_str().unwrap().contains("log in"), "{path}");
	}
}

#[tokio::test]
async fn unapproved_identity_is_forbidden_regardless_of_client_state() {
	let state = test_state();
	let session = state.sessions.create(IdentityId::new(7)).await;

	for path in ["/api/users", "/api/chat-token"] {
		let (status, body) = call(&state, Method::GET, path, Some(&session), None).await;
		assert_eq!(status, StatusCode::FORBIDDEN, "{path}");
		assert!(body["message"].as_str().unwrap().contains("pending approval"), "{path}");
	}

	// Authentication itself still works: the identity endpoint answers so
	// the client can route to the pending page.
	let (status, body) = call(&state, Method::GET, "/api/identity", Some(&session), None).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["approved"], json!(false));
}

#[tokio::test]
async fn approved_identity_lists_users_with_presence() {
	let state = test_state();
	let session = state.sessions.create(IdentityId::new(3)).await;

	let (status, body) = call(&state, Method::GET, "/api/users", Some(&session), None).await;
	assert_eq!(status, StatusCode::OK);

	let users = body.as_array().unwrap();
	assert_eq!(users.len(), 4);
	assert!(users.iter().all(|u| u["is_online"] == json!(false)));

	// A live hub registration flips the flag.
	let _rx = state.hub.connect(1, IdentityId::new(3)).await;
	let (_, body) = call(&state, Method::GET, "/api/users", Some(&session), None).await;
	let member = body.as_array().unwrap().iter().find(|u| u["id"] == json!(3)).unwrap().clone();
	assert_eq!(member["is_online"], json!(true));
}

#[tokio::test]
async fn chat_token_is_scoped_to_the_session_identity() {
	let state = test_state();
	let session = state.sessions.create(IdentityId::new(3)).await;

	let (status, body) = call(&state, Method::GET, "/api/chat-token", Some(&session), None).await;
	assert_eq!(status, StatusCode::OK);

	let token = body["token"].as_str().unwrap();
	let claims = verify_chat_token(token, &state.auth_hmac_secret).expect("token verifies");
	assert_eq!(claims.identity_id(), IdentityId::new(3));
}

#[tokio::test]
async fn approval_requires_admin() {
	let state = test_state();
	let member = state.sessions.create(IdentityId::new(3)).await;
	let admin = state.sessions.create(IdentityId::new(2)).await;

	let (status, body) = call(
		&state,
		Method::POST,
		"/api/users/7/approve",
		Some(&member),
		Some(json!({ "approved": true })),
	)
	.await;
	assert_eq!(status, StatusCode::FORBIDDEN);
	assert!(body["message"].as_str().unwrap().contains("admin privileges"));

	let (status, body) = call(
		&state,
		Method::POST,
		"/api/users/7/approve",
		Some(&admin),
		Some(json!({ "approved": true })),
	)
	.await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["approved"], json!(true));
	assert!(state.directory.get(IdentityId::new(7)).await.unwrap().approved);
}

#[tokio::test]
async fn role_changes_require_superadmin() {
	let state = test_state();
	let admin = state.sessions.create(IdentityId::new(2)).await;
	let root = state.sessions.create(IdentityId::new(1)).await;

	let (status, body) = call(
		&state,
		Method::POST,
		"/api/users/3/role",
		Some(&admin),
		Some(json!({ "role": "admin" })),
	)
	.await;
	assert_eq!(status, StatusCode::FORBIDDEN);
	assert!(body["message"].as_str().unwrap().contains("superadmin"));

	let (status, body) = call(
		&state,
		Method::POST,
		"/api/users/3/role",
		Some(&root),
		Some(json!({ "role": "admin" })),
	)
	.await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["role"], json!("admin"));
}

#[tokio::test]
async fn logout_revokes_the_session() {
	let state = test_state();
	let session = state.sessions.create(IdentityId::new(3)).await;

	let (status, _) = call(&state, Method::GET, "/api/identity", Some(&session), None).await;
	assert_eq!(status, StatusCode::OK);

	let (status, _) = call(&state, Method::POST, "/api/logout", Some(&session), None).await;
	assert_eq!(status, StatusCode::NO_CONTENT);

	let (status, _) = call(&state, Method::GET, "/api/identity", Some(&session), None).await;
	assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn disabling_an_account_revokes_its_sessions() {
	let state = test_state();
	let admin = state.sessions.create(IdentityId::new(2)).await;
	let member = state.sessions.create(IdentityId::new(3)).await;

	let (status, _) = call(
		&state,
		Method::POST,
		"/api/users/3/enabled",
		Some(&admin),
		Some(json!({ "enabled": false })),
	)
	.await;
	assert_eq!(status, StatusCode::OK);

	let (status, _) = call(&state, Method::GET, "/api/identity", Some(&member), None).await;
	assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn dev_login_is_gated_off_by_default() {
	let state = test_state();
	let (status, _) = call(
		&state,
		Method::POST,
		"/api/session",
		None,
		Some(json!({ "identity_id": 3 })),
	)
	.await;
	assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn readiness_flips_with_health_state() {
	let state = test_state();

	let (status, _) = call(&state, Method::GET, "/readyz", None, None).await;
	assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

	state.health.mark_ready();
	let (status, _) = call(&state, Method::GET, "/readyz", None, None).await;
	assert_eq!(status, StatusCode::OK);

	let (status, _) = call(&state, Method::GET, "/healthz", None, None).await;
	assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn unknown_routes_are_404() {
	let state = test_state();
	let (status, body) = call(&state, Method::GET, "/api/nope", None, None).await;
	assert_eq!(status, StatusCode::NOT_FOUND);
	assert_eq!(body["message"], json!("not found"));
}
