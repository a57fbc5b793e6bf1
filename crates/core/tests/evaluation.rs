// Script evaluation round trips between the host bridge and a renderer.

mod bridge_harness;

use std::sync::Arc;
use std::time::{Duration, Instant};

use bridge_harness::{Harness, wait_until};
use cefbridge::protocol::{
	CallOutcome, ContextReleased, EncodeOptions, Envelope, EvaluationRequest, EvaluationResult,
	StackFrame, Value, encode,
};
use cefbridge::renderer::RenderProcessHandler;
use cefbridge::runtime::NullSideChannel;
use cefbridge::{
	BridgeConfig, CancelReason, Error, ProcessId, ProcessMessage, QueueChannel, StructuredValue,
};
use parking_lot::Mutex;
use serde::Deserialize;

fn int_result(request: &EvaluationRequest, n: i64) -> ProcessMessage {
	let bytes = encode(&StructuredValue::from(Value::Int(n)), EncodeOptions::default()).unwrap();
	EvaluationResult {
		call_id: request.call_id,
		outcome: CallOutcome::Success(bytes),
	}
	.to_process_message()
}

#[tokio::test]
async fn test_evaluate_returns_converted_result() {
	let harness = Harness::start();
	let context = harness.create_context("main", true).await;
	let frame = harness.host_frame("main", true);

	let two: i64 = harness
		.host
		.evaluate("1+1", "about:blank", 1, &frame, None)
		.await
		.unwrap();

	assert_eq!(two, 2);
	assert_eq!(context.depth(), 0);
	assert_eq!(harness.host.javascript().pending_count(), 0);
}

#[tokio::test]
async fn test_structured_result_converts_to_struct() {
	#[derive(Debug, Deserialize, PartialEq)]
	struct Point {
		x: i64,
		y: i64,
		tags: Vec<String>,
	}

	let harness = Harness::start();
	harness.create_context("main", true).await;
	let frame = harness.host_frame("main", true);

	let point: Point = harness
		.host
		.evaluate(r#"{"x": 1, "y": 2, "tags": ["a", "b"]}"#, "", 1, &frame, None)
		.await
		.unwrap();

	assert_eq!(
		point,
		Point {
			x: 1,
			y: 2,
			tags: vec!["a".into(), "b".into()],
		}
	);
}

#[tokio::test]
async fn test_script_exception_carries_message_and_location() {
	let harness = Harness::start();
	harness.create_context("main", true).await;
	let frame = harness.host_frame("main", true);

	let err = harness
		.host
		.evaluate::<i64>("throw new Error('x')", "test.js", 3, &frame, None)
		.await
		.unwrap_err();

	let Error::ScriptException(text) = err else {
		panic!("expected script exception, got {err:?}");
	};
	assert!(text.contains('x'));
	assert!(text.ends_with("test.js:3:0"));
}

#[tokio::test]
async fn test_result_of_wrong_shape_is_conversion_error() {
	let harness = Harness::start();
	harness.create_context("main", true).await;
	let frame = harness.host_frame("main", true);

	let err = harness
		.host
		.evaluate::<Vec<String>>("1+1", "", 1, &frame, None)
		.await
		.unwrap_err();
	assert!(matches!(err, Error::TypeConversion(_)));
}

#[tokio::test]
async fn test_frame_without_context_fails_fast() {
	let harness = Harness::start();
	harness.create_context("main", true).await;
	let frame = harness.host_frame("ghost", false);

	let err = harness
		.host
		.evaluate::<i64>("1+1", "", 1, &frame, Some(Duration::from_secs(2)))
		.await
		.unwrap_err();
	assert!(matches!(err, Error::ScriptException(ref t) if t.contains("ghost")));
}

#[tokio::test]
async fn test_context_that_refuses_entry_fails() {
	let harness = Harness::start();
	let context = harness.create_context("main", true).await;
	context.set_enterable(false);
	let frame = harness.host_frame("main", true);

	let err = harness
		.host
		.evaluate::<i64>("1+1", "", 1, &frame, Some(Duration::from_secs(2)))
		.await
		.unwrap_err();
	assert!(matches!(err, Error::ScriptException(ref t) if t.contains("unavailable")));
}

#[tokio::test]
async fn test_timeout_cancels_and_leaves_no_entry() {
	let harness = Harness::start();
	let (channel, _requests) = QueueChannel::new();
	let frame = channel.frame("silent", true);

	let started = Instant::now();
	let err = harness
		.host
		.evaluate::<i64>("1+1", "", 1, &frame, Some(Duration::from_millis(100)))
		.await
		.unwrap_err();

	assert!(err.is_timeout());
	assert!(started.elapsed() >= Duration::from_millis(100));
	assert_eq!(harness.host.javascript().pending_count(), 0);
}

#[tokio::test]
async fn test_default_timeout_from_config() {
	let config = BridgeConfig {
		default_evaluation_timeout_ms: Some(50),
		..BridgeConfig::default()
	};
	let harness = Harness::with(
		config,
		RenderProcessHandler::with_side_channel(Arc::new(NullSideChannel)),
	);
	let (channel, _requests) = QueueChannel::new();
	let frame = channel.frame("silent", true);

	let err = harness
		.host
		.evaluate::<i64>("1+1", "", 1, &frame, None)
		.await
		.unwrap_err();
	assert!(err.is_timeout());
}

#[tokio::test]
async fn test_late_and_duplicate_results_are_ignored() {
	let harness = Harness::start();
	let (channel, mut requests) = QueueChannel::new();
	let frame = channel.frame("main", true);

	let host = Arc::clone(&harness.host);
	let eval_frame = frame.clone();
	let evaluation =
		tokio::spawn(async move { host.evaluate::<i64>("1+1", "", 1, &eval_frame, None).await });

	let delivery = requests.recv().await.unwrap();
	let request = EvaluationRequest::from_process_message(&delivery.message).unwrap();
	assert_eq!(request.script, "1+1");

	let first = harness
		.host
		.on_process_message_received(ProcessId::Renderer, &frame, &int_result(&request, 2));
	let second = harness
		.host
		.on_process_message_received(ProcessId::Renderer, &frame, &int_result(&request, 3));

	assert!(first.is_ok());
	assert!(second.is_ok());
	assert_eq!(evaluation.await.unwrap().unwrap(), 2);
	assert_eq!(harness.host.javascript().pending_count(), 0);
}

#[tokio::test]
async fn test_out_of_order_completion() {
	let harness = Harness::start();
	let (channel, mut requests) = QueueChannel::new();
	let frame = channel.frame("main", true);

	let spawn_eval = |script: &'static str| {
		let host = Arc::clone(&harness.host);
		let frame = frame.clone();
		tokio::spawn(async move { host.evaluate::<i64>(script, "", 1, &frame, None).await })
	};
	let a = spawn_eval("a");
	let b = spawn_eval("b");

	let mut issued = Vec::new();
	for _ in 0..2 {
		let delivery = requests.recv().await.unwrap();
		issued.push(EvaluationRequest::from_process_message(&delivery.message).unwrap());
	}
	issued.sort_by(|x, y| x.script.cmp(&y.script));
	assert_ne!(issued[0].call_id, issued[1].call_id);

	// answer b before a
	harness
		.host
		.on_process_message_received(ProcessId::Renderer, &frame, &int_result(&issued[1], 20));
	harness
		.host
		.on_process_message_received(ProcessId::Renderer, &frame, &int_result(&issued[0], 10));

	assert_eq!(b.await.unwrap().unwrap(), 20);
	assert_eq!(a.await.unwrap().unwrap(), 10);
}

#[tokio::test]
async fn test_context_release_cancels_only_that_frame() {
	let harness = Harness::start();
	let (channel, mut requests) = QueueChannel::new();
	let main = channel.frame("main", true);
	let child = channel.frame("child", false);

	let spawn_eval = |frame: &cefbridge::Frame| {
		let host = Arc::clone(&harness.host);
		let frame = frame.clone();
		tokio::spawn(async move { host.evaluate::<i64>("1+1", "", 1, &frame, None).await })
	};
	let on_main = spawn_eval(&main);
	let on_child = spawn_eval(&child);

	let mut main_request = None;
	for _ in 0..2 {
		let delivery = requests.recv().await.unwrap();
		if delivery.frame_id.as_str() == "main" {
			main_request = Some(EvaluationRequest::from_process_message(&delivery.message).unwrap());
		}
	}

	let released = ContextReleased {
		frame_id: child.id().clone(),
	};
	harness
		.host
		.on_process_message_received(ProcessId::Renderer, &child, &released.to_process_message());

	let err = on_child.await.unwrap().unwrap_err();
	assert_eq!(err.cancel_reason(), Some(CancelReason::ContextReleased));
	assert_eq!(harness.host.javascript().pending_count(), 1);

	let main_request = main_request.unwrap();
	harness
		.host
		.on_process_message_received(ProcessId::Renderer, &main, &int_result(&main_request, 2));
	assert_eq!(on_main.await.unwrap().unwrap(), 2);

	// a released frame is refused without a round trip
	let err = harness
		.host
		.evaluate::<i64>("1+1", "", 1, &child, None)
		.await
		.unwrap_err();
	assert!(matches!(err, Error::ContextUnavailable { ref frame_id } if frame_id.as_str() == "child"));
}

#[tokio::test]
async fn test_dispose_cancels_pending_evaluations() {
	let harness = Harness::start();
	let (channel, mut requests) = QueueChannel::new();
	let frame = channel.frame("main", true);

	let host = Arc::clone(&harness.host);
	let evaluation =
		tokio::spawn(async move { host.evaluate::<i64>("1+1", "", 1, &frame, None).await });
	requests.recv().await.unwrap();

	harness.host.dispose();

	let err = evaluation.await.unwrap().unwrap_err();
	assert_eq!(err.cancel_reason(), Some(CancelReason::OwnerDisposed));
	assert!(harness.host.is_disposed());
}

#[tokio::test]
async fn test_evaluate_after_dispose_fails_immediately() {
	let harness = Harness::start();
	harness.create_context("main", true).await;
	let frame = harness.host_frame("main", true);

	harness.host.dispose();

	let outcome = tokio::time::timeout(
		Duration::from_secs(1),
		harness.host.evaluate::<i64>("1+1", "", 1, &frame, None),
	)
	.await
	.expect("evaluation after dispose must not hang");
	assert_eq!(
		outcome.unwrap_err().cancel_reason(),
		Some(CancelReason::OwnerDisposed)
	);
	assert_eq!(harness.host.javascript().pending_count(), 0);
}

#[tokio::test]
async fn test_context_events_and_main_frame_flag() {
	let harness = Harness::start();
	let created = Arc::new(Mutex::new(Vec::new()));
	let released = Arc::new(Mutex::new(Vec::new()));

	let sink = Arc::clone(&created);
	let _created = harness
		.host
		.on_context_created(move |frame| sink.lock().push(frame.id().to_string()));
	let sink = Arc::clone(&released);
	let _released = harness
		.host
		.on_context_released(move |frame| sink.lock().push(frame.id().to_string()));

	assert!(!harness.host.is_main_frame_context_initialized());
	harness.create_context("child", false).await;
	assert!(!harness.host.is_main_frame_context_initialized());
	harness.create_context("main", true).await;
	assert!(harness.host.is_main_frame_context_initialized());
	harness.release_context("main", true).await;
	assert!(!harness.host.is_main_frame_context_initialized());

	assert_eq!(*created.lock(), vec!["child".to_string(), "main".to_string()]);
	assert_eq!(*released.lock(), vec!["main".to_string()]);
}

#[tokio::test]
async fn test_uncaught_exception_event() {
	let harness = Harness::start();
	let events = Arc::new(Mutex::new(Vec::new()));
	let sink = Arc::clone(&events);
	let _sub = harness
		.host
		.on_uncaught_exception(move |event| sink.lock().push(event.clone()));

	harness.renderer.on_uncaught_exception(
		&harness.renderer_frame("main", true),
		"Uncaught TypeError: nope",
		vec![StackFrame {
			function_name: "onClick".into(),
			source_url: "app.js".into(),
			line: 12,
			column: 4,
		}],
	);

	wait_until(|| events.lock().len() == 1).await;
	let event = events.lock()[0].clone();
	assert_eq!(event.frame.id().as_str(), "main");
	assert_eq!(event.message, "Uncaught TypeError: nope");
	assert_eq!(event.stack_frames[0].function_name, "onClick");
	assert_eq!(event.stack_frames[0].line, 12);
}

#[tokio::test]
async fn test_unknown_messages_are_ignored_by_both_sides() {
	let harness = Harness::start();
	let message = ProcessMessage::new("FromANewerPeer");

	let report = harness.host.on_process_message_received(
		ProcessId::Renderer,
		&harness.host_frame("main", true),
		&message,
	);
	assert!(report.is_ok());
	assert!(report.is_unhandled());

	let handled = harness.renderer.on_process_message_received(
		ProcessId::Browser,
		&harness.renderer_frame("main", true),
		&message,
	);
	assert!(!handled);
}
