//! Pending-call registry
//!
//! Correlates asynchronous requests with out-of-order responses.
//!
//! # Call lifecycle
//!
//! 1. [`PendingCalls::issue`] allocates the next [`CallId`] and stores a oneshot sender
//! 2. The caller sends its request carrying that id
//! 3. The caller awaits the returned [`PendingCall`]
//! 4. The response handler calls [`PendingCalls::complete`] with the id
//! 5. The entry is removed and its waiter wakes with the result
//!
//! Every terminal transition removes the entry, so a second completion for the
//! same id finds nothing and is discarded. Dropping a [`PendingCall`] before it
//! resolves removes its entry too.
//!
//! [`PendingCalls::close`] cancels everything in flight and refuses later
//! calls, so nothing issued after teardown can wait forever.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use cefbridge_protocol::{CallId, FrameId};
use dashmap::DashMap;
use tokio::sync::oneshot;

use crate::error::{CancelReason, Error, Result};

struct PendingEntry<T> {
	tx: oneshot::Sender<Result<T>>,
	scope: Option<FrameId>,
}

type CallMap<T> = Arc<DashMap<CallId, PendingEntry<T>>>;

/// Registry of in-flight calls for one endpoint.
pub struct PendingCalls<T> {
	next_id: AtomicU32,
	calls: CallMap<T>,
	closed: AtomicBool,
}

impl<T> Default for PendingCalls<T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T> PendingCalls<T> {
	pub fn new() -> Self {
		Self::with_first_id(1)
	}

	/// Starts the id counter at `first`. Zero is never issued.
	pub fn with_first_id(first: u32) -> Self {
		Self {
			next_id: AtomicU32::new(first.max(1)),
			calls: Arc::new(DashMap::new()),
			closed: AtomicBool::new(false),
		}
	}

	fn next_call_id(&self) -> CallId {
		loop {
			let id = self.next_id.fetch_add(1, Ordering::SeqCst);
			if id != 0 {
				return CallId(id);
			}
		}
	}

	/// Stores a new pending entry, optionally tagged with the frame it belongs to.
	///
	/// On a closed registry the call resolves at once to
	/// [`CancelReason::OwnerDisposed`].
	pub fn issue(&self, scope: Option<FrameId>) -> (CallId, PendingCall<T>) {
		let id = self.next_call_id();
		let (tx, rx) = oneshot::channel();
		self.calls.insert(id, PendingEntry { tx, scope });
		tracing::debug!(call_id = %id, "issued pending call");
		// checked after the insert so a concurrent close() cannot miss the entry
		if self.is_closed() {
			self.cancel(id, CancelReason::OwnerDisposed);
		}

		let guard = CancelGuard {
			id,
			calls: Arc::downgrade(&self.calls),
			completed: false,
		};
		(id, PendingCall { id, rx, guard })
	}

	/// Issues a call and runs `send` with its id. If `send` fails the entry is
	/// rolled back and the send error returned.
	pub fn issue_with<F>(&self, scope: Option<FrameId>, send: F) -> Result<PendingCall<T>>
	where
		F: FnOnce(CallId) -> Result<()>,
	{
		if self.is_closed() {
			return Err(Error::CallCanceled(CancelReason::OwnerDisposed));
		}
		let (id, call) = self.issue(scope);
		if let Err(err) = send(id) {
			self.calls.remove(&id);
			tracing::debug!(call_id = %id, error = %err, "send failed; pending call rolled back");
			return Err(err);
		}
		Ok(call)
	}

	/// Completes a call. Returns `false` if no such call is pending, which
	/// covers late, duplicate and unknown responses.
	pub fn complete(&self, id: CallId, result: Result<T>) -> bool {
		let Some((_, entry)) = self.calls.remove(&id) else {
			tracing::debug!(call_id = %id, "discarding result for unknown or finished call");
			return false;
		};
		if entry.tx.send(result).is_err() {
			tracing::debug!(call_id = %id, "waiter gone before completion");
		}
		true
	}

	pub fn resolve(&self, id: CallId, value: T) -> bool {
		self.complete(id, Ok(value))
	}

	pub fn reject(&self, id: CallId, error: Error) -> bool {
		self.complete(id, Err(error))
	}

	pub fn cancel(&self, id: CallId, reason: CancelReason) -> bool {
		self.complete(id, Err(Error::CallCanceled(reason)))
	}

	/// Cancels every call tagged with `scope`. Returns how many were canceled.
	pub fn cancel_scope(&self, scope: &FrameId, reason: CancelReason) -> usize {
		let ids: Vec<CallId> = self
			.calls
			.iter()
			.filter(|entry| entry.scope.as_ref() == Some(scope))
			.map(|entry| *entry.key())
			.collect();
		let canceled = ids.into_iter().filter(|id| self.cancel(*id, reason)).count();
		if canceled > 0 {
			tracing::debug!(frame = %scope, canceled, %reason, "canceled scoped calls");
		}
		canceled
	}

	/// Cancels everything. Returns how many were canceled.
	pub fn cancel_all(&self, reason: CancelReason) -> usize {
		let ids: Vec<CallId> = self.calls.iter().map(|entry| *entry.key()).collect();
		ids.into_iter().filter(|id| self.cancel(*id, reason)).count()
	}

	/// Cancels everything with [`CancelReason::OwnerDisposed`] and refuses
	/// later calls. Returns how many were canceled.
	pub fn close(&self) -> usize {
		self.closed.store(true, Ordering::SeqCst);
		self.cancel_all(CancelReason::OwnerDisposed)
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	pub fn len(&self) -> usize {
		self.calls.len()
	}

	pub fn is_empty(&self) -> bool {
		self.calls.is_empty()
	}

	pub fn contains(&self, id: CallId) -> bool {
		self.calls.contains_key(&id)
	}
}

/// Removes the entry of a call whose waiter went away before completion.
struct CancelGuard<T> {
	id: CallId,
	calls: Weak<DashMap<CallId, PendingEntry<T>>>,
	completed: bool,
}

impl<T> Drop for CancelGuard<T> {
	fn drop(&mut self) {
		if self.completed {
			return;
		}
		let Some(calls) = self.calls.upgrade() else {
			return;
		};
		if calls.remove(&self.id).is_some() {
			tracing::debug!(call_id = %self.id, "CancelGuard: removed orphaned pending call");
		}
	}
}

/// Awaitable side of a pending call.
///
/// Resolves with the completion result. If the registry is dropped first
/// it resolves to [`CancelReason::OwnerDisposed`].
pub struct PendingCall<T> {
	id: CallId,
	rx: oneshot::Receiver<Result<T>>,
	guard: CancelGuard<T>,
}

impl<T> PendingCall<T> {
	pub fn id(&self) -> CallId {
		self.id
	}

	/// Waits for completion, bounded by `timeout` when given.
	///
	/// On expiry the entry is removed immediately and the caller sees
	/// [`CancelReason::Timeout`]; a response arriving later is discarded.
	pub async fn with_timeout(self, timeout: Option<Duration>) -> Result<T> {
		let Some(limit) = timeout else {
			return self.await;
		};
		let id = self.id;
		match tokio::time::timeout(limit, self).await {
			Ok(result) => result,
			Err(_) => {
				tracing::debug!(call_id = %id, ?limit, "pending call timed out");
				Err(Error::CallCanceled(CancelReason::Timeout))
			}
		}
	}
}

impl<T> Future for PendingCall<T> {
	type Output = Result<T>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		match Pin::new(&mut self.rx).poll(cx) {
			Poll::Ready(result) => {
				self.guard.completed = true;
				Poll::Ready(
					result
						.map_err(|_| Error::CallCanceled(CancelReason::OwnerDisposed))
						.and_then(|r| r),
				)
			}
			Poll::Pending => Poll::Pending,
		}
	}
}

impl<T> std::fmt::Debug for PendingCall<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("PendingCall").field("id", &self.id).finish()
	}
}

#[cfg(test)]
mod tests;
