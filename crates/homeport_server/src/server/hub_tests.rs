#![forbid(unsafe_code)]

use std::time::Duration;

use homeport_domain::{ChatMessage, IdentityId, MessageId, PresenceUpdate, RoomId};
use homeport_wire::EventFrame;
use tokio::time::timeout;

use crate::server::hub::{ChatHub, ChatHubConfig, HubItem};

fn message(room: &str, sender: i64, content: &str) -> ChatMessage {
	ChatMessage {
		id: MessageId::new_v4(),
		room_id: RoomId::new(room).expect("valid room id"),
		sender_id: IdentityId::new(sender),
		content: content.to_string(),
		sent_at_unix_ms: 0,
	}
}

async fn recv_item(rx: &mut tokio::sync::mpsc::Receiver<HubItem>) -> HubItem {
	timeout(Duration::from_millis(250), rx.recv())
		.await
		.expect("expected an item within the timeout")
		.expect("channel open")
}

#[tokio::test]
async fn messages_reach_every_live_connection() {
	let hub = ChatHub::new(ChatHubConfig::default());

	let mut rx_a = hub.connect(1, IdentityId::new(7)).await;
	let mut rx_b = hub.connect(2, IdentityId::new(8)).await;

	// Drain the presence transitions produced by registration.
	let _ = recv_item(&mut rx_a).await; // 7 online
	let _ = recv_item(&mut rx_a).await; // 8 online
	let _ = recv_item(&mut rx_b).await; // 8 online

	hub.broadcast_message(message("lobby", 7, "hello")).await;

	for rx in [&mut rx_a, &mut rx_b] {
		match recv_item(rx).await {
			HubItem::Event(EventFrame::Message(m)) => assert_eq!(m.content, "hello"),
			other => panic!("expected chat message, got: {other:?}"),
		}
	}
}

#[tokio::test]
async fn identity_goes_offline_only_after_its_last_connection() {
	let hub = ChatHub::new(ChatHubConfig::default());
	let id = IdentityId::new(7);

	let _rx_a = hub.connect(1, id).await;
	let _rx_b = hub.connect(2, id).await;
	assert!(hub.is_online(id).await);

	hub.disconnect(1).await;
	assert!(hub.is_online(id).await, "second tab keeps the identity online");

	hub.disconnect(2).await;
	assert!(!hub.is_online(id).await);

	let snapshot = hub.presence_snapshot().await;
	assert_eq!(snapshot.len(), 1);
	assert!(!snapshot[0].is_online);
}

#[tokio::test]
async fn second_connection_does_not_rebroadcast_online() {
	let hub = ChatHub::new(ChatHubConfig::default());
	let id = IdentityId::new(7);

	let mut rx_a = hub.connect(1, id).await;
	match recv_item(&mut rx_a).await {
		HubItem::Event(EventFrame::Presence(p)) => assert!(p.is_online),
		other => panic!("expected presence, got: {other:?}"),
	}

	let _rx_b = hub.connect(2, id).await;
	let extra = timeout(Duration::from_millis(50), rx_a.recv()).await;
	assert!(extra.is_err(), "no duplicate online transition for a second tab");
}

#[tokio::test]
async fn stale_presence_updates_are_ignored() {
	let hub = ChatHub::new(ChatHubConfig::default());
	let id = IdentityId::new(7);

	hub.broadcast_presence(PresenceUpdate {
		identity_id: id,
		is_online: true,
		observed_at_unix_ms: 2_000,
	})
	.await;

	hub.broadcast_presence(PresenceUpdate {
		identity_id: id,
		is_online: false,
		observed_at_unix_ms: 1_000,
	})
	.await;

	let snapshot = hub.presence_snapshot().await;
	assert_eq!(snapshot.len(), 1);
	assert!(snapshot[0].is_online, "older observation must not win");
}

#[tokio::test]
async fn bounded_queue_drops_and_emits_lag_marker() {
	let hub = ChatHub::new(ChatHubConfig {
		subscriber_queue_capacity: 2,
	});

	let mut rx = hub.connect(1, IdentityId::new(7)).await;

	// The presence transition and m1 fill the queue; m2 is dropped and
	// recorded as pending lag.
	hub.broadcast_message(message("lobby", 7, "m1")).await;
	hub.broadcast_message(message("lobby", 7, "m2")).await;

	match recv_item(&mut rx).await {
		HubItem::Event(EventFrame::Presence(p)) => assert!(p.is_online),
		other => panic!("expected presence first, got: {other:?}"),
	}
	match recv_item(&mut rx).await {
		HubItem::Event(EventFrame::Message(m)) => assert_eq!(m.content, "m1"),
		other => panic!("expected chat message, got: {other:?}"),
	}

	// Queue has room again: the next message lands, then the lag marker.
	hub.broadcast_message(message("lobby", 7, "m3")).await;

	match recv_item(&mut rx).await {
		HubItem::Event(EventFrame::Message(m)) => assert_eq!(m.content, "m3"),
		other => panic!("expected chat message, got: {other:?}"),
	}
	match recv_item(&mut rx).await {
		HubItem::Lagged { dropped } => assert!(dropped >= 1),
		other => panic!("expected lag marker, got: {other:?}"),
	}
}
