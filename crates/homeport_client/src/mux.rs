use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::types::{ChatEvent, EventKind};

/// Handle returned by `subscribe`; required to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&ChatEvent) + Send + Sync + 'static>;

struct Entry {
	id: u64,
	kind: EventKind,
	callback: Callback,
}

/// Typed pub/sub fan-out over the chat transport.
///
/// Delivery is at-most-once and unbuffered: events reach only the
/// subscribers registered at dispatch time; there is no replay. Each
/// registration is independent: subscribing the same callback twice yields
/// two deliveries and requires two unsubscribes.
#[derive(Default)]
pub struct EventMultiplexer {
	inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
	next_id: u64,
	entries: Vec<Entry>,
}

impl EventMultiplexer {
	pub fn new() -> Self {
		Self::default()
	}

	/// Register a callback for one event kind. Callbacks for a kind fire in
	/// registration order.
	pub fn subscribe(
		&self,
		kind: EventKind,
		callback: impl Fn(&ChatEvent) + Send + Sync + 'static,
	) -> SubscriptionId {
		let mut inner = self.inner.lock().expect("multiplexer registry lock");
		inner.next_id += 1;
		let id = inner.next_id;
		inner.entries.push(Entry {
			id,
			kind,
			callback: Arc::new(callback),
		});
		SubscriptionId(id)
	}

	/// Remove a registration. Idempotent: unknown ids are ignored.
	pub fn unsubscribe(&self, id: SubscriptionId) {
		let mut inner = self.inner.lock().expect("multiplexer registry lock");
		inner.entries.retain(|e| e.id != id.0);
	}

	/// Number of live registrations for a kind.
	pub fn subscriber_count(&self, kind: EventKind) -> usize {
		let inner = self.inner.lock().expect("multiplexer registry lock");
		inner.entries.iter().filter(|e| e.kind == kind).count()
	}

	/// Fan an event out to every subscriber of its kind.
	///
	/// Iterates a snapshot taken at entry, so callbacks may subscribe or
	/// unsubscribe freely; a subscriber removed mid-dispatch is skipped (the
	/// registry is re-checked immediately before each callback runs). A
	/// panicking callback is isolated, logged, and does not stop delivery.
	pub fn dispatch(&self, event: &ChatEvent) {
		let kind = event.kind();
		let snapshot: Vec<(u64, Callback)> = {
			let inner = self.inner.lock().expect("multiplexer registry lock");
			inner
				.entries
				.iter()
				.filter(|e| e.kind == kind)
				.map(|e| (e.id, Arc::clone(&e.callback)))
				.collect()
		};

		for (id, callback) in snapshot {
			let still_registered = {
				let inner = self.inner.lock().expect("multiplexer registry lock");
				inner.entries.iter().any(|e| e.id == id)
			};
			if !still_registered {
				continue;
			}

			if let Err(panic) = catch_unwind(AssertUnwindSafe(|| (*callback)(event))) {
				let detail = panic_message(panic.as_ref());
				warn!(kind = ?kind, subscription = id, %detail, "subscriber panicked during dispatch; continuing");
			}
		}
	}
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
	if let Some(s) = panic.downcast_ref::<&str>() {
		(*s).to_string()
	} else if let Some(s) = panic.downcast_ref::<String>() {
		s.clone()
	} else {
		"non-string panic payload".to_string()
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use homeport_domain::{ChatMessage, IdentityId, MessageId, RoomId};

	use super::*;

	fn message_event(content: &str) -> ChatEvent {
		ChatEvent::MessageReceived(ChatMessage {
			id: MessageId::new_v4(),
			room_id: RoomId::new("lobby").unwrap(),
			sender_id: IdentityId::new(1),
			content: content.to_string(),
			sent_at_unix_ms: 0,
		})
	}

	#[test]
	fn dispatch_reaches_only_matching_kind() {
		let mux = EventMultiplexer::new();
		let messages = Arc::new(AtomicUsize::new(0));
		let presences = Arc::new(AtomicUsize::new(0));

		let m = Arc::clone(&messages);
		mux.subscribe(EventKind::MessageReceived, move |_| {
			m.fetch_add(1, Ordering::SeqCst);
		});
		let p = Arc::clone(&presences);
		mux.subscribe(EventKind::PresenceChanged, move |_| {
			p.fetch_add(1, Ordering::SeqCst);
		});

		mux.dispatch(&message_event("hi"));

		assert_eq!(messages.load(Ordering::SeqCst), 1);
		assert_eq!(presences.load(Ordering::SeqCst), 0);
	}

	#[test]
	fn callbacks_fire_in_registration_order() {
		let mux = EventMultiplexer::new();
		let order = Arc::new(Mutex::new(Vec::new()));

		for tag in ["first", "second", "third"] {
			let order = Arc::clone(&order);
			mux.subscribe(EventKind::MessageReceived, move |_| {
				order.lock().unwrap().push(tag);
			});
		}

		mux.dispatch(&message_event("hi"));

		assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
	}

	#[test]
	fn duplicate_registrations_each_fire() {
		let mux = EventMultiplexer::new();
		let count = Arc::new(AtomicUsize::new(0));

		let cb = {
			let count = Arc::clone(&count);
			Arc::new(move |_: &ChatEvent| {
				count.fetch_add(1, Ordering::SeqCst);
			})
		};

		let cb_a = Arc::clone(&cb);
		let first = mux.subscribe(EventKind::MessageReceived, move |ev| (*cb_a)(ev));
		let cb_b = Arc::clone(&cb);
		let _second = mux.subscribe(EventKind::MessageReceived, move |ev| (*cb_b)(ev));

		mux.dispatch(&message_event("once"));
		assert_eq!(count.load(Ordering::SeqCst), 2, "each registration is independent");

		// One unsubscribe removes one registration, not both.
		mux.unsubscribe(first);
		mux.dispatch(&message_event("twice"));
		assert_eq!(count.load(Ordering::SeqCst), 3);
	}

	#[test]
	fn unsubscribe_is_idempotent() {
		let mux = EventMultiplexer::new();
		let id = mux.subscribe(EventKind::Connected, |_| {});
		mux.unsubscribe(id);
		mux.unsubscribe(id);
		assert_eq!(mux.subscriber_count(EventKind::Connected), 0);
	}

	#[test]
	fn unsubscribing_during_dispatch_skips_removed_and_keeps_others() {
		let mux = Arc::new(EventMultiplexer::new());
		let removed_fired = Arc::new(AtomicUsize::new(0));
		let unrelated_fired = Arc::new(AtomicUsize::new(0));

		// Registered first: removes the *second* subscriber mid-dispatch.
		let victim_slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));
		{
			let mux = Arc::clone(&mux);
			let victim_slot = Arc::clone(&victim_slot);
			mux.clone().subscribe(EventKind::MessageReceived, move |_| {
				if let Some(victim) = victim_slot.lock().unwrap().take() {
					mux.unsubscribe(victim);
				}
			});
		}

		let victim = {
			let removed_fired = Arc::clone(&removed_fired);
			mux.subscribe(EventKind::MessageReceived, move |_| {
				removed_fired.fetch_add(1, Ordering::SeqCst);
			})
		};
		*victim_slot.lock().unwrap() = Some(victim);

		{
			let unrelated_fired = Arc::clone(&unrelated_fired);
			mux.subscribe(EventKind::MessageReceived, move |_| {
				unrelated_fired.fetch_add(1, Ordering::SeqCst);
			});
		}

		mux.dispatch(&message_event("hi"));
		assert_eq!(removed_fired.load(Ordering::SeqCst), 0, "removed mid-dispatch, must not fire");
		assert_eq!(unrelated_fired.load(Ordering::SeqCst), 1, "unrelated subscriber still fires");

		// And nothing later either.
		mux.dispatch(&message_event("again"));
		assert_eq!(removed_fired.load(Ordering::SeqCst), 0);
		assert_eq!(unrelated_fired.load(Ordering::SeqCst), 2);
	}

	#[test]
	fn panicking_subscriber_does_not_stop_delivery() {
		let mux = EventMultiplexer::new();
		let after = Arc::new(AtomicUsize::new(0));

		mux.subscribe(EventKind::MessageReceived, |_| {
			panic!("subscriber bug");
		});
		{
			let after = Arc::clone(&after);
			mux.subscribe(EventKind::MessageReceived, move |_| {
				after.fetch_add(1, Ordering::SeqCst);
			});
		}

		mux.dispatch(&message_event("hi"));
		assert_eq!(after.load(Ordering::SeqCst), 1);

		// The panicking subscriber stays registered; isolation is per dispatch.
		mux.dispatch(&message_event("again"));
		assert_eq!(after.load(Ordering::SeqCst), 2);
	}
}
