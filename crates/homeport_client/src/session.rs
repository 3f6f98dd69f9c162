use std::future::Future;
use std::pin::Pin;

use homeport_client_core::{ChatConnection, ChatEvents, ClientCoreError, TransportConfigV1};
use homeport_domain::{AccessToken, IdentityId, RoomId};
use homeport_wire::{EventFrame, Welcome};

pub type BoxedTransport = Box<dyn TransportApi>;
pub type BoxedTransportEvents = Box<dyn TransportEventsApi>;

/// Object-safe view of the write half of a chat connection, so the binder
/// can be driven by fakes in tests.
pub trait TransportApi: Send {
	fn send_message<'a>(
		&'a mut self,
		room_id: RoomId,
		content: String,
	) -> Pin<Box<dyn Future<Output = Result<(), ClientCoreError>> + Send + 'a>>;

	fn is_connected(&self) -> bool;

	fn close(&self, code: u32, reason: &str);
}

/// Object-safe view of the read half of a chat connection.
pub trait TransportEventsApi: Send {
	fn run_events_loop<'a>(
		&'a mut self,
		on_event: Box<dyn FnMut(EventFrame) + Send + 'a>,
	) -> Pin<Box<dyn Future<Output = Result<(), ClientCoreError>> + Send + 'a>>;
}

impl TransportApi for ChatConnection {
	fn send_message<'a>(
		&'a mut self,
		room_id: RoomId,
		content: String,
	) -> Pin<Box<dyn Future<Output = Result<(), ClientCoreError>> + Send + 'a>> {
		Box::pin(async move { ChatConnection::send_message(self, room_id, content).await })
	}

	fn is_connected(&self) -> bool {
		ChatConnection::is_connected(self)
	}

	fn close(&self, code: u32, reason: &str) {
		ChatConnection::close(self, code, reason);
	}
}

impl TransportEventsApi for ChatEvents {
	fn run_events_loop<'a>(
		&'a mut self,
		mut on_event: Box<dyn FnMut(EventFrame) + Send + 'a>,
	) -> Pin<Box<dyn Future<Output = Result<(), ClientCoreError>> + Send + 'a>> {
		Box::pin(async move { ChatEvents::run_events_loop(self, &mut on_event).await })
	}
}

pub type ConnectFuture =
	Pin<Box<dyn Future<Output = Result<(BoxedTransport, BoxedTransportEvents, Welcome), ClientCoreError>> + Send>>;

/// Seam for opening one chat connection. The binder owns the single live
/// connection; this trait only dials.
pub trait Connector: Send + Sync + 'static {
	fn connect(&self, identity_id: IdentityId, token: AccessToken) -> ConnectFuture;
}

/// Real connector over the QUIC transport.
pub struct QuicConnector {
	cfg: TransportConfigV1,
}

impl QuicConnector {
	pub fn new(cfg: TransportConfigV1) -> Self {
		Self { cfg }
	}
}

impl Connector for QuicConnector {
	fn connect(&self, identity_id: IdentityId, token: AccessToken) -> ConnectFuture {
		let cfg = self.cfg.clone();
		Box::pin(async move {
			let (conn, events, welcome) = ChatConnection::connect(&cfg, identity_id, token).await?;
			Ok((
				Box::new(conn) as BoxedTransport,
				Box::new(events) as BoxedTransportEvents,
				welcome,
			))
		})
	}
}

/// Token exchange failure, folded into the connection-failure path by the
/// binder (it is never a separate retry track).
#[derive(Debug, thiserror::Error)]
#[error("token exchange failed: {0}")]
pub struct TokenError(pub String);

pub type TokenFuture = Pin<Box<dyn Future<Output = Result<AccessToken, TokenError>> + Send>>;

/// Seam for the per-attempt chat token exchange.
pub trait TokenSource: Send + Sync + 'static {
	fn chat_token(&self) -> TokenFuture;
}
