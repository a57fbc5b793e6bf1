//! Host-side script evaluation.
//!
//! # Evaluation flow
//!
//! 1. [`JavascriptExecutionEngine::evaluate`] issues a call id scoped to the frame
//! 2. An `EvaluationRequest` is sent to the renderer through that frame
//! 3. The renderer answers with an `EvaluationResult` carrying the same id
//! 4. The result handler decodes the payload and completes the pending call
//! 5. The caller converts the structured value to its requested type
//!
//! A `ContextReleased` notification cancels every evaluation still pending
//! for that frame.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use cefbridge_protocol::{
	CallOutcome, ContextCreated, ContextReleased, EvaluationRequest, EvaluationResult, FrameId,
	ProcessId, StackFrame, StructuredValue, UncaughtException, decode,
};
use cefbridge_runtime::{CancelReason, Error, Frame, MessageDispatcher, PendingCalls, Result};
use dashmap::DashMap;
use serde::de::DeserializeOwned;

use crate::handlers::{EventHandlers, Subscription};

/// Last observed lifecycle state of a frame's script context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
	Created,
	Released,
}

/// A script threw and nothing caught it.
#[derive(Debug, Clone)]
pub struct UncaughtExceptionEvent {
	pub frame: Frame,
	pub message: String,
	pub stack_frames: Vec<StackFrame>,
}

/// Evaluates scripts in renderer frames and tracks their contexts.
pub struct JavascriptExecutionEngine {
	pending: PendingCalls<StructuredValue>,
	contexts: DashMap<FrameId, ContextState>,
	main_frame_initialized: AtomicBool,
	default_timeout: Option<Duration>,
	context_created: EventHandlers<Frame>,
	context_released: EventHandlers<Frame>,
	uncaught_exception: EventHandlers<UncaughtExceptionEvent>,
}

impl JavascriptExecutionEngine {
	pub fn new(default_timeout: Option<Duration>) -> Self {
		Self {
			pending: PendingCalls::new(),
			contexts: DashMap::new(),
			main_frame_initialized: AtomicBool::new(false),
			default_timeout,
			context_created: EventHandlers::new(),
			context_released: EventHandlers::new(),
			uncaught_exception: EventHandlers::new(),
		}
	}

	/// Registers the engine's message handlers. Handlers hold a weak reference.
	pub fn attach(self: &Arc<Self>, dispatcher: &MessageDispatcher) {
		let weak = Arc::downgrade(self);
		dispatcher.register_envelope(with_engine(&weak, |engine, _, result: EvaluationResult| {
			engine.handle_result(result);
			Ok(())
		}));
		dispatcher.register_envelope(with_engine(&weak, |engine, frame, created: ContextCreated| {
			engine.handle_context_created(frame, created);
			Ok(())
		}));
		dispatcher.register_envelope(with_engine(&weak, |engine, frame, released: ContextReleased| {
			engine.handle_context_released(frame, released);
			Ok(())
		}));
		dispatcher.register_envelope(with_engine(&weak, |engine, frame, exception: UncaughtException| {
			engine.uncaught_exception.emit(&UncaughtExceptionEvent {
				frame: frame.clone(),
				message: exception.message,
				stack_frames: exception.stack_frames,
			});
			Ok(())
		}));
	}

	fn handle_result(&self, result: EvaluationResult) {
		let outcome = match result.outcome {
			CallOutcome::Success(bytes) => decode(&bytes).map_err(Error::from),
			CallOutcome::Failure(text) => Err(Error::ScriptException(text)),
		};
		if !self.pending.complete(result.call_id, outcome) {
			tracing::debug!(call_id = %result.call_id, "evaluation result for unknown call ignored");
		}
	}

	fn handle_context_created(&self, frame: &Frame, created: ContextCreated) {
		tracing::debug!(frame = %created.frame_id, main = frame.is_main(), "script context created");
		self.contexts.insert(created.frame_id, ContextState::Created);
		if frame.is_main() {
			self.main_frame_initialized.store(true, Ordering::SeqCst);
		}
		self.context_created.emit(frame);
	}

	fn handle_context_released(&self, frame: &Frame, released: ContextReleased) {
		tracing::debug!(frame = %released.frame_id, main = frame.is_main(), "script context released");
		self.pending
			.cancel_scope(&released.frame_id, CancelReason::ContextReleased);
		self.contexts.insert(released.frame_id, ContextState::Released);
		if frame.is_main() {
			self.main_frame_initialized.store(false, Ordering::SeqCst);
		}
		self.context_released.emit(frame);
	}

	/// Evaluates `script` in `frame` and converts the result to `T`.
	///
	/// `timeout` falls back to the configured default. Expiry yields
	/// [`Error::CallCanceled`] with [`CancelReason::Timeout`].
	pub async fn evaluate<T: DeserializeOwned>(
		&self,
		script: &str,
		url: &str,
		line: i32,
		frame: &Frame,
		timeout: Option<Duration>,
	) -> Result<T> {
		let value = self.evaluate_value(script, url, line, frame, timeout).await?;
		Ok(value.deserialize()?)
	}

	/// Evaluates `script` and returns the raw structured result.
	pub async fn evaluate_value(
		&self,
		script: &str,
		url: &str,
		line: i32,
		frame: &Frame,
		timeout: Option<Duration>,
	) -> Result<StructuredValue> {
		if self.context_state(frame.id()) == Some(ContextState::Released) {
			return Err(Error::ContextUnavailable {
				frame_id: frame.id().clone(),
			});
		}

		let call = self.pending.issue_with(Some(frame.id().clone()), |call_id| {
			frame.send_envelope(
				ProcessId::Renderer,
				&EvaluationRequest {
					call_id,
					frame_id: frame.id().clone(),
					script: script.to_string(),
					source_url: url.to_string(),
					source_line: line,
				},
			)
		})?;

		call.with_timeout(timeout.or(self.default_timeout)).await
	}

	pub fn is_main_frame_context_initialized(&self) -> bool {
		self.main_frame_initialized.load(Ordering::SeqCst)
	}

	pub fn context_state(&self, frame_id: &FrameId) -> Option<ContextState> {
		self.contexts.get(frame_id).map(|state| *state)
	}

	/// Evaluations still waiting for a result.
	pub fn pending_count(&self) -> usize {
		self.pending.len()
	}

	pub fn on_context_created<F>(&self, handler: F) -> Subscription
	where
		F: Fn(&Frame) + Send + Sync + 'static,
	{
		self.context_created.subscribe(handler)
	}

	pub fn on_context_released<F>(&self, handler: F) -> Subscription
	where
		F: Fn(&Frame) + Send + Sync + 'static,
	{
		self.context_released.subscribe(handler)
	}

	pub fn on_uncaught_exception<F>(&self, handler: F) -> Subscription
	where
		F: Fn(&UncaughtExceptionEvent) + Send + Sync + 'static,
	{
		self.uncaught_exception.subscribe(handler)
	}

	/// Cancels every pending evaluation. Later evaluations fail with
	/// [`CancelReason::OwnerDisposed`].
	pub fn dispose(&self) -> usize {
		self.pending.close()
	}
}

/// Adapts an engine method into an envelope handler holding a weak reference.
fn with_engine<E, F>(
	weak: &Weak<JavascriptExecutionEngine>,
	f: F,
) -> impl Fn(&cefbridge_runtime::MessageReceived<'_>, E) -> Result<()> + Send + Sync + 'static
where
	E: 'static,
	F: Fn(&JavascriptExecutionEngine, &Frame, E) -> Result<()> + Send + Sync + 'static,
{
	let weak = weak.clone();
	move |received, envelope| match weak.upgrade() {
		Some(engine) => f(&engine, received.frame, envelope),
		None => Ok(()),
	}
}
