use std::time::Duration;

use homeport_domain::{AccessToken, Identity};
use serde::Deserialize;
use tracing::warn;

use crate::gate::IdentityLoad;
use crate::session::{TokenError, TokenFuture, TokenSource};

/// Errors from the dashboard HTTP API.
#[derive(Debug, thiserror::Error)]
pub enum RestError {
	#[error("http transport error: {0}")]
	Transport(#[from] reqwest::Error),

	#[error("unexpected status {status}: {message}")]
	Status {
		status: u16,
		message: String,
	},
}

#[derive(Debug, Deserialize)]
struct ChatTokenResponse {
	token: String,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
	#[serde(default)]
	message: String,
}

/// Client for the dashboard HTTP API: identity lookup, logout, chat-token
/// exchange. The session bearer token comes from the identity provider's
/// login flow, outside this crate's scope.
#[derive(Clone)]
pub struct DashboardApi {
	http: reqwest::Client,
	base_url: String,
	session_token: Option<String>,
}

impl DashboardApi {
	pub fn new(base_url: impl Into<String>, session_token: Option<String>) -> Result<Self, RestError> {
		let http = reqwest::Client::builder().timeout(Duration::from_secs(10)).build()?;

		let mut base_url = base_url.into();
		while base_url.ends_with('/') {
			base_url.pop();
		}

		Ok(Self {
			http,
			base_url,
			session_token,
		})
	}

	fn get(&self, path: &str) -> reqwest::RequestBuilder {
		let req = self.http.get(format!("{}{}", self.base_url, path));
		match &self.session_token {
			Some(token) => req.bearer_auth(token),
			None => req,
		}
	}

	fn post(&self, path: &str) -> reqwest::RequestBuilder {
		let req = self.http.post(format!("{}{}", self.base_url, path));
		match &self.session_token {
			Some(token) => req.bearer_auth(token),
			None => req,
		}
	}

	async fn error_message(resp: reqwest::Response) -> String {
		let status = resp.status();
		match resp.json::<ApiMessage>().await {
			Ok(body) if !body.message.is_empty() => body.message,
			_ => status.canonical_reason().unwrap_or("unknown error").to_string(),
		}
	}

	/// `GET /api/identity`. A missing session is `None`, not an error.
	pub async fn current_identity(&self) -> Result<Option<Identity>, RestError> {
		let resp = self.get("/api/identity").send().await?;
		match resp.status().as_u16() {
			200 => Ok(Some(resp.json::<Identity>().await?)),
			401 => Ok(None),
			status => Err(RestError::Status {
				status,
				message: Self::error_message(resp).await,
			}),
		}
	}

	/// Identity lookup shaped for the gate: every failure mode collapses to
	/// `Failed`, which the gate resolves to the login redirect (fail closed).
	pub async fn load_identity(&self) -> IdentityLoad {
		match self.current_identity().await {
			Ok(identity) => IdentityLoad::Loaded(identity),
			Err(e) => {
				warn!(error = %e, "identity lookup failed; gate will fail closed");
				IdentityLoad::Failed
			}
		}
	}

	/// `POST /api/logout`. Revokes the session server-side.
	pub async fn logout(&self) -> Result<(), RestError> {
		let resp = self.post("/api/logout").send().await?;
		match resp.status().as_u16() {
			200 | 204 => Ok(()),
			status => Err(RestError::Status {
				status,
				message: Self::error_message(resp).await,
			}),
		}
	}

	/// `GET /api/chat-token`. Scoped to the caller's session; fetched fresh
	/// per connection attempt and never cached.
	pub async fn chat_token(&self) -> Result<AccessToken, RestError> {
		let resp = self.get("/api/chat-token").send().await?;
		match resp.status().as_u16() {
			200 => {
				let body = resp.json::<ChatTokenResponse>().await?;
				Ok(AccessToken::new(body.token))
			}
			status => Err(RestError::Status {
				status,
				message: Self::error_message(resp).await,
			}),
		}
	}
}

impl TokenSource for DashboardApi {
	fn chat_token(&self) -> TokenFuture {
		let api = self.clone();
		Box::pin(async move { DashboardApi::chat_token(&api).await.map_err(|e| TokenError(e.to_string())) })
	}
}
