use std::time::{Duration, Instant};

use super::*;

#[test]
fn test_call_ids_start_at_one_and_increase() {
	let calls: PendingCalls<u32> = PendingCalls::new();

	let (id1, _c1) = calls.issue(None);
	let (id2, _c2) = calls.issue(None);
	let (id3, _c3) = calls.issue(None);

	assert_eq!(id1, CallId(1));
	assert!(id2 > id1);
	assert!(id3 > id2);
	assert_eq!(calls.len(), 3);
}

#[test]
fn test_zero_is_never_issued() {
	let calls: PendingCalls<u32> = PendingCalls::with_first_id(u32::MAX);

	let (last, _a) = calls.issue(None);
	let (wrapped, _b) = calls.issue(None);

	assert_eq!(last, CallId(u32::MAX));
	assert_eq!(wrapped, CallId(1));
}

#[tokio::test]
async fn test_complete_resolves_waiter() {
	let calls = PendingCalls::new();
	let (id, call) = calls.issue(None);

	assert!(calls.resolve(id, "done".to_string()));
	assert_eq!(call.await.unwrap(), "done");
	assert!(calls.is_empty());
}

#[tokio::test]
async fn test_out_of_order_completion() {
	let calls = PendingCalls::new();
	let (id_a, a) = calls.issue(None);
	let (id_b, b) = calls.issue(None);

	assert!(calls.resolve(id_b, 2));
	assert!(calls.resolve(id_a, 1));

	assert_eq!(b.await.unwrap(), 2);
	assert_eq!(a.await.unwrap(), 1);
}

#[tokio::test]
async fn test_duplicate_completion_is_noop() {
	let calls = PendingCalls::new();
	let (id, call) = calls.issue(None);

	assert!(calls.resolve(id, 1));
	assert!(!calls.resolve(id, 2));
	assert!(!calls.reject(CallId(999), Error::Protocol("stray".into())));
	assert_eq!(call.await.unwrap(), 1);
}

#[tokio::test]
async fn test_reject_surfaces_error() {
	let calls: PendingCalls<u32> = PendingCalls::new();
	let (id, call) = calls.issue(None);

	calls.reject(id, Error::ScriptException("x is not defined".into()));
	let err = call.await.unwrap_err();
	assert!(matches!(err, Error::ScriptException(ref m) if m.contains("x")));
}

#[tokio::test]
async fn test_timeout_purges_entry() {
	let calls: PendingCalls<u32> = PendingCalls::new();
	let (id, call) = calls.issue(None);

	let started = Instant::now();
	let err = call.with_timeout(Some(Duration::from_millis(100))).await.unwrap_err();

	assert!(err.is_timeout());
	assert!(started.elapsed() >= Duration::from_millis(100));
	assert!(!calls.contains(id));
	// A late response hits the absent-entry path.
	assert!(!calls.resolve(id, 5));
}

#[tokio::test]
async fn test_no_timeout_waits_for_completion() {
	let calls = Arc::new(PendingCalls::new());
	let (id, call) = calls.issue(None);

	let completer = Arc::clone(&calls);
	tokio::spawn(async move {
		tokio::time::sleep(Duration::from_millis(20)).await;
		completer.resolve(id, 42u32);
	});

	assert_eq!(call.with_timeout(None).await.unwrap(), 42);
}

#[test]
fn test_dropped_waiter_removes_entry() {
	let calls: PendingCalls<u32> = PendingCalls::new();
	let (id, call) = calls.issue(None);
	assert!(calls.contains(id));

	drop(call);
	assert!(!calls.contains(id));
}

#[tokio::test]
async fn test_cancel_scope_only_touches_that_frame() {
	let calls: PendingCalls<u32> = PendingCalls::new();
	let child = FrameId::new("child");
	let (_, in_child) = calls.issue(Some(child.clone()));
	let (main_id, in_main) = calls.issue(Some(FrameId::new("main")));

	assert_eq!(calls.cancel_scope(&child, CancelReason::ContextReleased), 1);

	let err = in_child.await.unwrap_err();
	assert_eq!(err.cancel_reason(), Some(CancelReason::ContextReleased));

	assert!(calls.contains(main_id));
	calls.resolve(main_id, 7);
	assert_eq!(in_main.await.unwrap(), 7);
}

#[tokio::test]
async fn test_cancel_all_and_owner_drop() {
	let calls: PendingCalls<u32> = PendingCalls::new();
	let (_, first) = calls.issue(None);
	let (_, second) = calls.issue(None);

	assert_eq!(calls.cancel_all(CancelReason::OwnerDisposed), 2);
	assert!(first.await.unwrap_err().is_canceled());
	assert!(second.await.unwrap_err().is_canceled());

	let (_, orphan) = calls.issue(None);
	drop(calls);
	assert_eq!(
		orphan.await.unwrap_err().cancel_reason(),
		Some(CancelReason::OwnerDisposed)
	);
}

#[tokio::test]
async fn test_closed_registry_refuses_new_calls() {
	let calls: PendingCalls<u32> = PendingCalls::new();
	let (_, in_flight) = calls.issue(None);

	assert_eq!(calls.close(), 1);
	assert!(calls.is_closed());
	assert_eq!(
		in_flight.await.unwrap_err().cancel_reason(),
		Some(CancelReason::OwnerDisposed)
	);

	let mut sent = false;
	let err = calls
		.issue_with(None, |_| {
			sent = true;
			Ok(())
		})
		.unwrap_err();
	assert_eq!(err.cancel_reason(), Some(CancelReason::OwnerDisposed));
	assert!(!sent);

	let (_, late) = calls.issue(None);
	assert_eq!(
		late.await.unwrap_err().cancel_reason(),
		Some(CancelReason::OwnerDisposed)
	);
	assert!(calls.is_empty());
}

#[test]
fn test_issue_with_rolls_back_on_send_failure() {
	let calls: PendingCalls<u32> = PendingCalls::new();

	let err = calls
		.issue_with(None, |_| Err(Error::PeerUnreachable("renderer gone".into())))
		.unwrap_err();

	assert!(matches!(err, Error::PeerUnreachable(_)));
	assert!(calls.is_empty());
}

#[test]
fn test_issue_with_passes_issued_id() {
	let calls: PendingCalls<u32> = PendingCalls::new();
	let mut sent = None;

	let call = calls
		.issue_with(None, |id| {
			sent = Some(id);
			Ok(())
		})
		.unwrap();

	assert_eq!(sent, Some(call.id()));
	assert!(calls.contains(call.id()));
}
