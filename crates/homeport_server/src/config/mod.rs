#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use homeport_domain::{Identity, IdentityId, Role};
use homeport_util::secret::SecretString;
use serde::Deserialize;
use tracing::{info, warn};

/// Default config path: `~/.homeport/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".homeport").join("config.toml"))
}

/// Load the server config from TOML and env overrides.
#[allow(dead_code)]
pub fn load_server_config() -> anyhow::Result<ServerConfig> {
	let path = default_config_path()?;
	load_server_config_from_path(&path)
}

/// Same as `load_server_config` but with an explicit config path.
pub fn load_server_config_from_path(path: &Path) -> anyhow::Result<ServerConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = ServerConfig::from_file(file_cfg)?;

	apply_env_overrides(&mut cfg);

	Ok(cfg)
}

/// Server config (v1).
#[derive(Debug, Clone)]
pub struct ServerConfig {
	pub server: ServerSettings,
	pub chat: ChatSettings,

	/// Seed identities for the in-memory directory. The real user store is
	/// the identity backend's concern; this stands in at its boundary.
	pub users: Vec<Identity>,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
	/// HTTP API bind address (host:port).
	pub http_bind: Option<String>,
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
	/// PEM-encoded certificate path for QUIC/TLS.
	pub tls_cert_path: Option<PathBuf>,
	/// PEM-encoded private key path for QUIC/TLS.
	pub tls_key_path: Option<PathBuf>,
	/// HMAC secret for chat access tokens.
	pub auth_hmac_secret: Option<SecretString>,
	/// Bearer-session lifetime.
	pub session_ttl: Duration,
	/// Allow `POST /api/session` without credential verification (dev only).
	pub dev_allow_unverified_login: bool,
}

impl Default for ServerSettings {
	fn default() -> Self {
		Self {
			http_bind: None,
			metrics_bind: None,
			tls_cert_path: None,
			tls_key_path: None,
			auth_hmac_secret: None,
			session_ttl: Duration::from_secs(8 * 60 * 60),
			dev_allow_unverified_login: false,
		}
	}
}

#[derive(Debug, Clone)]
pub struct ChatSettings {
	/// Lifetime of issued chat tokens.
	pub token_ttl: Duration,
	/// Maximum queued hub items per connection.
	pub subscriber_queue_capacity: Option<usize>,
	/// Maximum chat frame size.
	pub max_frame_bytes: Option<u32>,
}

impl Default for ChatSettings {
	fn default() -> Self {
		Self {
			token_ttl: Duration::from_secs(120),
			subscriber_queue_capacity: None,
			max_frame_bytes: None,
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	server: FileServerSettings,

	#[serde(default)]
	chat: FileChatSettings,

	#[serde(default)]
	users: Vec<FileUser>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileServerSettings {
	http_bind: Option<String>,
	metrics_bind: Option<String>,
	tls_cert_path: Option<String>,
	tls_key_path: Option<String>,
	auth_hmac_secret: Option<String>,
	session_ttl_secs: Option<u64>,
	dev_allow_unverified_login: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileChatSettings {
	token_ttl_secs: Option<u64>,
	subscriber_queue_capacity: Option<usize>,
	max_frame_bytes: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
struct FileUser {
	id: i64,
	display_name: String,
	role: Option<String>,
	approved: Option<bool>,
	enabled: Option<bool>,
}

impl ServerConfig {
	fn from_file(file: FileConfig) -> anyhow::Result<Self> {
		let mut users = Vec::with_capacity(file.users.len());
		for user in file.users {
			let role = match user.role.as_deref() {
				None => Role::User,
				Some(raw) => raw
					.parse::<Role>()
					.with_context(|| format!("invalid role for user {}: {raw:?}", user.id))?,
			};

			users.push(Identity {
				id: IdentityId::new(user.id),
				display_name: user.display_name,
				role,
				approved: user.approved.unwrap_or(false),
				enabled: user.enabled.unwrap_or(true),
			});
		}

		let defaults = ServerSettings::default();
		let chat_defaults = ChatSettings::default();

		Ok(Self {
			server: ServerSettings {
				http_bind: file.server.http_bind.filter(|s| !s.trim().is_empty()),
				metrics_bind: file.server.metrics_bind.filter(|s| !s.trim().is_empty()),
				tls_cert_path: file.server.tls_cert_path.filter(|s| !s.trim().is_empty()).map(PathBuf::from),
				tls_key_path: file.server.tls_key_path.filter(|s| !s.trim().is_empty()).map(PathBuf::from),
				auth_hmac_secret: file
					.server
					.auth_hmac_secret
					.filter(|s| !s.trim().is_empty())
					.map(SecretString::new),
				session_ttl: file
					.server
					.session_ttl_secs
					.map(Duration::from_secs)
					.unwrap_or(defaults.session_ttl),
				dev_allow_unverified_login: file.server.dev_allow_unverified_login.unwrap_or(false),
			},
			chat: ChatSettings {
				token_ttl: file
					.chat
					.token_ttl_secs
					.map(Duration::from_secs)
					.unwrap_or(chat_defaults.token_ttl),
				subscriber_queue_capacity: file.chat.subscriber_queue_capacity,
				max_frame_bytes: file.chat.max_frame_bytes,
			},
			users,
		})
	}
}

fn parse_env_bool(v: &str) -> Option<bool> {
	match v.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Some(true),
		"0" | "false" | "no" | "off" => Some(false),
		_ => None,
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn apply_env_overrides(cfg: &mut ServerConfig) {
	if let Ok(v) = std::env::var("HOMEPORT_HTTP_BIND") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.http_bind = Some(v);
			info!("server config: http_bind overridden by env");
		}
	}

	if let Ok(v) = std::env::var("HOMEPORT_METRICS_BIND") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.metrics_bind = Some(v);
			info!("server config: metrics_bind overridden by env");
		}
	}

	if let Ok(v) = std::env::var("HOMEPORT_TLS_CERT") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.tls_cert_path = Some(PathBuf::from(v));
			info!("server config: tls_cert_path overridden by env");
		}
	}

	if let Ok(v) = std::env::var("HOMEPORT_TLS_KEY") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.tls_key_path = Some(PathBuf::from(v));
			info!("server config: tls_key_path overridden by env");
		}
	}

	if let Ok(v) = std::env::var("HOMEPORT_AUTH_HMAC_SECRET") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.auth_hmac_secret = Some(SecretString::new(v));
			info!("server auth: auth_hmac_secret overridden by env");
		}
	}

	if let Ok(v) = std::env::var("HOMEPORT_SESSION_TTL_SECS")
		&& let Ok(secs) = v.trim().parse::<u64>()
	{
		cfg.server.session_ttl = Duration::from_secs(secs);
		info!(secs, "server config: session_ttl overridden by env");
	}

	if let Ok(v) = std::env::var("HOMEPORT_CHAT_TOKEN_TTL_SECS")
		&& let Ok(secs) = v.trim().parse::<u64>()
	{
		cfg.chat.token_ttl = Duration::from_secs(secs);
		info!(secs, "chat config: token_ttl overridden by env");
	}

	if let Ok(v) = std::env::var("HOMEPORT_CHAT_QUEUE_CAPACITY")
		&& let Ok(capacity) = v.trim().parse::<usize>()
	{
		cfg.chat.subscriber_queue_capacity = Some(capacity);
		info!(capacity, "chat config: subscriber_queue_capacity overridden by env");
	}

	if let Ok(v) = std::env::var("HOMEPORT_DEV_LOGIN")
		&& let Some(enabled) = parse_env_bool(&v)
	{
		cfg.server.dev_allow_unverified_login = enabled;
		info!(enabled, "server config: dev_allow_unverified_login overridden by env");
	}

	if cfg.server.auth_hmac_secret.is_none() {
		warn!("server auth: no auth_hmac_secret configured; a random per-process secret will be generated");
	}

	if cfg.users.is_empty() {
		warn!("directory: no seed users configured; every chat connection will be rejected");
	}
}
