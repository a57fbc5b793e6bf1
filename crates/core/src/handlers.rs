//! Bridge event subscriptions.
//!
//! [`EventHandlers<E>`] keeps synchronous callbacks in an [`IndexMap`] so they
//! fire in subscription order and unsubscribe in O(1). Subscribing returns a
//! [`Subscription`] that removes its callback when dropped.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use cefbridge_runtime::dispatcher::panic_message;
use indexmap::IndexMap;
use parking_lot::Mutex;

/// Identifies one subscribed callback.
pub type HandlerId = u64;

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

fn next_handler_id() -> HandlerId {
	NEXT_HANDLER_ID.fetch_add(1, Ordering::Relaxed)
}

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;
type CallbackMap<E> = Mutex<IndexMap<HandlerId, Callback<E>>>;

/// Subscribers to one bridge event.
pub struct EventHandlers<E> {
	callbacks: Arc<CallbackMap<E>>,
}

impl<E> Default for EventHandlers<E> {
	fn default() -> Self {
		Self {
			callbacks: Arc::new(Mutex::new(IndexMap::new())),
		}
	}
}

impl<E: 'static> EventHandlers<E> {
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds a callback. It stays registered until the [`Subscription`] is dropped.
	#[must_use = "dropping the subscription unregisters the handler"]
	pub fn subscribe<F>(&self, callback: F) -> Subscription
	where
		F: Fn(&E) + Send + Sync + 'static,
	{
		let id = next_handler_id();
		self.callbacks.lock().insert(id, Arc::new(callback));

		let callbacks: Weak<CallbackMap<E>> = Arc::downgrade(&self.callbacks);
		Subscription {
			id,
			remove: Some(Box::new(move || {
				if let Some(callbacks) = callbacks.upgrade() {
					callbacks.lock().shift_remove(&id);
				}
			})),
		}
	}

	/// Calls every callback in subscription order and returns how many ran.
	///
	/// Callbacks run outside the lock, so one may subscribe or unsubscribe.
	/// A panicking callback is logged and the rest still run.
	pub fn emit(&self, event: &E) -> usize {
		let snapshot: Vec<Callback<E>> = self.callbacks.lock().values().cloned().collect();
		for callback in &snapshot {
			if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(event))) {
				tracing::error!(panic = %panic_message(payload.as_ref()), "event subscriber panicked");
			}
		}
		snapshot.len()
	}

	pub fn len(&self) -> usize {
		self.callbacks.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.callbacks.lock().is_empty()
	}

	pub fn clear(&self) {
		self.callbacks.lock().clear();
	}
}

/// Unregisters its callback when dropped.
///
/// Outliving the [`EventHandlers`] it came from is fine; the drop is then a no-op.
pub struct Subscription {
	id: HandlerId,
	remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
	pub fn id(&self) -> HandlerId {
		self.id
	}

	/// Same as dropping.
	pub fn unsubscribe(self) {}

	/// Leaves the callback registered for as long as its event source lives.
	pub fn detach(mut self) {
		self.remove = None;
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		if let Some(remove) = self.remove.take() {
			remove();
		}
	}
}

impl std::fmt::Debug for Subscription {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Subscription")
			.field("id", &self.id)
			.field("active", &self.remove.is_some())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicBool, AtomicUsize};

	use super::*;

	#[test]
	fn test_emit_in_subscription_order() {
		let handlers: EventHandlers<u32> = EventHandlers::new();
		let seen = Arc::new(Mutex::new(Vec::new()));

		let a = Arc::clone(&seen);
		let _s1 = handlers.subscribe(move |n| a.lock().push(("a", *n)));
		let b = Arc::clone(&seen);
		let _s2 = handlers.subscribe(move |n| b.lock().push(("b", *n)));

		assert_eq!(handlers.emit(&5), 2);
		assert_eq!(*seen.lock(), vec![("a", 5), ("b", 5)]);
	}

	#[test]
	fn test_panicking_subscriber_skipped() {
		let handlers: EventHandlers<()> = EventHandlers::new();
		let reached = Arc::new(AtomicBool::new(false));

		let _s1 = handlers.subscribe(|_| panic!("subscriber bug"));
		let flag = Arc::clone(&reached);
		let _s2 = handlers.subscribe(move |_| flag.store(true, Ordering::SeqCst));

		handlers.emit(&());
		assert!(reached.load(Ordering::SeqCst));
	}

	#[test]
	fn test_drop_and_unsubscribe_remove_callback() {
		let handlers: EventHandlers<()> = EventHandlers::new();
		let count = Arc::new(AtomicUsize::new(0));

		let counter = Arc::clone(&count);
		let first = handlers.subscribe(move |_| {
			counter.fetch_add(1, Ordering::SeqCst);
		});
		let second = handlers.subscribe(|_| {});
		assert_ne!(first.id(), second.id());

		handlers.emit(&());
		drop(first);
		second.unsubscribe();
		handlers.emit(&());

		assert_eq!(count.load(Ordering::SeqCst), 1);
		assert!(handlers.is_empty());
	}

	#[test]
	fn test_detached_subscription_stays() {
		let handlers: EventHandlers<()> = EventHandlers::new();
		handlers.subscribe(|_| {}).detach();
		assert_eq!(handlers.len(), 1);
		handlers.clear();
		assert!(handlers.is_empty());
	}

	#[test]
	fn test_subscription_outlives_source() {
		let handlers: EventHandlers<String> = EventHandlers::new();
		let sub = handlers.subscribe(|_| {});
		drop(handlers);
		drop(sub);
	}
}
