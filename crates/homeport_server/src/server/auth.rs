#![forbid(unsafe_code)]

use std::time::Duration;

use anyhow::{Context, anyhow};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use homeport_domain::{AccessToken, IdentityId};
use homeport_util::secret::SecretString;
use homeport_util::time::unix_secs_now;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

/// Claims carried by a chat access token. The subject is the identity the
/// token was issued for; the chat endpoint rejects a `Hello` whose identity
/// does not match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTokenClaims {
	pub sub: i64,
	pub exp: u64,
}

impl ChatTokenClaims {
	pub fn identity_id(&self) -> IdentityId {
		IdentityId::new(self.sub)
	}
}

/// Issue a `v1.<claims>.<sig>` HMAC-SHA256 token scoped to one identity.
pub fn issue_chat_token(identity_id: IdentityId, ttl: Duration, secret: &SecretString) -> AccessToken {
	let claims = ChatTokenClaims {
		sub: identity_id.as_i64(),
		exp: unix_secs_now().saturating_add(ttl.as_secs()),
	};

	let payload = serde_json::to_vec(&claims).expect("claims are always serializable");
	let payload_b64 = URL_SAFE_NO_PAD.encode(payload);
	let sig = sign(payload_b64.as_bytes(), secret.expose().as_bytes());
	let sig_b64 = URL_SAFE_NO_PAD.encode(sig);

	AccessToken::new(format!("v1.{payload_b64}.{sig_b64}"))
}

/// Verify signature and expiry of a `v1.<claims>.<sig>` token.
pub fn verify_chat_token(token: &str, secret: &SecretString) -> anyhow::Result<ChatTokenClaims> {
	let parts = token.split('.').collect::<Vec<_>>();
	if parts.len() != 3 || parts[0] != "v1" {
		return Err(anyhow!("invalid token format"));
	}

	let payload_b64 = parts[1];
	let sig_b64 = parts[2];

	let payload = URL_SAFE_NO_PAD.decode(payload_b64).context("decode token payload")?;
	let expected_sig = sign(payload_b64.as_bytes(), secret.expose().as_bytes());
	let provided_sig = URL_SAFE_NO_PAD.decode(sig_b64).context("decode token signature")?;

	if !constant_time_eq(&expected_sig, &provided_sig) {
		return Err(anyhow!("invalid token signature"));
	}

	let claims: ChatTokenClaims = serde_json::from_slice(&payload).context("parse token claims")?;
	if claims.exp <= unix_secs_now() {
		return Err(anyhow!("token expired"));
	}

	Ok(claims)
}

fn sign(payload_b64: &[u8], secret: &[u8]) -> Vec<u8> {
	let mut mac = Hmac::<Sha256>::new_from_slice(secret).expect("hmac accepts any key length");
	mac.update(payload_b64);
	mac.finalize().into_bytes().to_vec()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
	if a.len() != b.len() {
		return false;
	}

	let mut diff = 0u8;
	for (x, y) in a.iter().zip(b.iter()) {
		diff |= x ^ y;
	}

	diff == 0
}
