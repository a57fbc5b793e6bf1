//! Renderer-side script evaluation.

use std::sync::{Arc, Weak};

use cefbridge_protocol::{
	CallOutcome, EncodeOptions, EvaluationRequest, EvaluationResult, ProcessId, encode,
};
use cefbridge_runtime::{Error, MessageDispatcher};

use super::contexts::ContextRegistry;
use super::script::ContextGuard;

/// Answers `EvaluationRequest`s by running the script in the frame's context.
pub struct JavascriptExecutionEngineRenderSide {
	contexts: Arc<ContextRegistry>,
}

impl JavascriptExecutionEngineRenderSide {
	pub fn new(contexts: Arc<ContextRegistry>) -> Self {
		Self { contexts }
	}

	pub fn attach(self: &Arc<Self>, dispatcher: &MessageDispatcher) {
		let weak: Weak<Self> = Arc::downgrade(self);
		dispatcher.register_envelope(move |received, request: EvaluationRequest| {
			let Some(engine) = weak.upgrade() else {
				return Ok(());
			};
			let reply = EvaluationResult {
				call_id: request.call_id,
				outcome: engine.evaluate(&request),
			};
			received.frame.send_envelope(ProcessId::Browser, &reply)
		});
	}

	/// Runs the request. A frame without an enterable context yields a failure
	/// outcome naming the frame.
	pub fn evaluate(&self, request: &EvaluationRequest) -> CallOutcome {
		let unavailable = || {
			tracing::warn!(frame = %request.frame_id, "evaluation requested for frame without script context");
			CallOutcome::Failure(
				Error::ContextUnavailable {
					frame_id: request.frame_id.clone(),
				}
				.to_string(),
			)
		};

		let Some(context) = self.contexts.get(&request.frame_id) else {
			return unavailable();
		};
		let Some(_entered) = ContextGuard::enter(context.as_ref()) else {
			return unavailable();
		};

		match context.eval(&request.script, &request.source_url, request.source_line) {
			Ok(value) => match encode(&value, EncodeOptions::default()) {
				Ok(bytes) => CallOutcome::Success(bytes),
				Err(err) => CallOutcome::Failure(err.to_string()),
			},
			Err(exception) => {
				tracing::debug!(frame = %request.frame_id, message = %exception.message, "script threw");
				CallOutcome::Failure(exception.compose())
			}
		}
	}
}
