use homeport_domain::{Identity, RoomId};
use tokio::sync::{mpsc, oneshot};

/// Commands accepted by the binder task.
#[derive(Debug)]
pub enum ChatCommand {
	/// The authenticated identity changed (login, logout, account switch).
	IdentityChanged {
		identity: Option<Identity>,
	},
	/// Fire-and-forget send into a room.
	SendMessage {
		room_id: RoomId,
		content: String,
	},
}

/// Cloneable handle used by UI components to talk to the binder. All
/// transport opens/closes funnel through the one binder task, so callers
/// can never race the connection.
#[derive(Clone)]
pub struct ChatController {
	pub(crate) cmd_tx: mpsc::Sender<ChatCommand>,
}

impl ChatController {
	pub fn new(cmd_tx: mpsc::Sender<ChatCommand>) -> Self {
		Self { cmd_tx }
	}

	pub async fn identity_changed(&self, identity: Option<Identity>) -> Result<(), String> {
		self.cmd_tx
			.send(ChatCommand::IdentityChanged { identity })
			.await
			.map_err(|_| "chat binder task is not running".to_string())
	}

	pub async fn send_message(&self, room_id: RoomId, content: impl Into<String>) -> Result<(), String> {
		self.cmd_tx
			.send(ChatCommand::SendMessage {
				room_id,
				content: content.into(),
			})
			.await
			.map_err(|_| "chat binder task is not running".to_string())
	}
}

/// Stops the binder task and waits for it to wind down.
pub struct ShutdownHandle {
	pub(crate) shutdown_tx: oneshot::Sender<()>,
	pub(crate) join_handle: tokio::task::JoinHandle<()>,
}

impl ShutdownHandle {
	pub fn new(shutdown_tx: oneshot::Sender<()>, join_handle: tokio::task::JoinHandle<()>) -> Self {
		Self {
			shutdown_tx,
			join_handle,
		}
	}

	pub async fn shutdown(self) {
		let _ = self.shutdown_tx.send(());
		let _ = self.join_handle.await;
	}
}
