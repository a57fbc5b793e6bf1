//! Renderer-process side of the bridge.
//!
//! The engine integration calls into [`RenderProcessHandler`] from its
//! render-process callbacks: context creation and release, uncaught script
//! exceptions and inbound process messages. Every callback runs under
//! [`RenderProcessHandler::with_error_handling`], so a failure is reported to
//! the host instead of tearing down the renderer.

pub mod binding;
pub mod contexts;
pub mod execution;
pub mod script;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use cefbridge_protocol::{
	ContextCreated, ContextReleased, ProcessId, ProcessMessage, StackFrame, UncaughtException,
	UnhandledException,
};
use cefbridge_runtime::dispatcher::panic_message;
use cefbridge_runtime::{
	BridgeConfig, Frame, MessageDispatcher, MessageReceived, Result, SideChannel,
};

pub use self::binding::{JavascriptToNativeDispatcherRenderSide, NativeObjectProxy};
pub use self::contexts::ContextRegistry;
pub use self::execution::JavascriptExecutionEngineRenderSide;
pub use self::script::{ContextGuard, ScriptContext, ScriptException};

/// Renderer endpoint of the bridge.
pub struct RenderProcessHandler {
	dispatcher: MessageDispatcher,
	contexts: Arc<ContextRegistry>,
	javascript: Arc<JavascriptExecutionEngineRenderSide>,
	native: Arc<JavascriptToNativeDispatcherRenderSide>,
	side_channel: Arc<dyn SideChannel>,
}

impl RenderProcessHandler {
	/// Crash reports that cannot reach the host go to the side channels
	/// derived from `config`.
	pub fn new(config: &BridgeConfig) -> Self {
		Self::with_side_channel(Arc::new(config.side_channel()))
	}

	pub fn with_side_channel(side_channel: Arc<dyn SideChannel>) -> Self {
		let dispatcher = MessageDispatcher::new();
		let contexts = Arc::new(ContextRegistry::new());

		let javascript = Arc::new(JavascriptExecutionEngineRenderSide::new(Arc::clone(&contexts)));
		javascript.attach(&dispatcher);
		let native = Arc::new(JavascriptToNativeDispatcherRenderSide::new(Arc::clone(
			&contexts,
		)));
		native.attach(&dispatcher);

		Self {
			dispatcher,
			contexts,
			javascript,
			native,
			side_channel,
		}
	}

	pub fn dispatcher(&self) -> &MessageDispatcher {
		&self.dispatcher
	}

	pub fn contexts(&self) -> &Arc<ContextRegistry> {
		&self.contexts
	}

	pub fn javascript(&self) -> &Arc<JavascriptExecutionEngineRenderSide> {
		&self.javascript
	}

	pub fn native(&self) -> &Arc<JavascriptToNativeDispatcherRenderSide> {
		&self.native
	}

	/// Entry point for every message the host sends. Returns whether any
	/// handler was registered for it.
	pub fn on_process_message_received(
		&self,
		source: ProcessId,
		frame: &Frame,
		message: &ProcessMessage,
	) -> bool {
		let report = self.with_error_handling(frame, || {
			Ok(self
				.dispatcher
				.dispatch(&MessageReceived::new(source, frame, message)))
		});
		let Some(report) = report else {
			return false;
		};
		for failure in &report.failures {
			self.report(Some(frame), failure.to_unhandled_exception());
		}
		!report.is_unhandled()
	}

	pub fn on_context_created(&self, frame: &Frame, context: Arc<dyn ScriptContext>) {
		self.with_error_handling(frame, || {
			self.contexts.insert(frame, context);
			frame.send_envelope(
				ProcessId::Browser,
				&ContextCreated {
					frame_id: frame.id().clone(),
				},
			)
		});
	}

	pub fn on_context_released(&self, frame: &Frame) {
		self.with_error_handling(frame, || {
			let canceled = self
				.native
				.handle_context_released(frame.id(), frame.is_main());
			tracing::debug!(frame = %frame.id(), canceled, "script context released");
			self.contexts.remove(frame.id());
			frame.send_envelope(
				ProcessId::Browser,
				&ContextReleased {
					frame_id: frame.id().clone(),
				},
			)
		});
	}

	pub fn on_uncaught_exception(&self, frame: &Frame, message: &str, stack_frames: Vec<StackFrame>) {
		self.with_error_handling(frame, || {
			frame.send_envelope(
				ProcessId::Browser,
				&UncaughtException {
					frame_id: frame.id().clone(),
					message: message.to_string(),
					stack_frames,
				},
			)
		});
	}

	/// Runs a callback body, reporting an error or panic instead of propagating it.
	pub fn with_error_handling<T>(&self, frame: &Frame, action: impl FnOnce() -> Result<T>) -> Option<T> {
		let exception = match catch_unwind(AssertUnwindSafe(action)) {
			Ok(Ok(value)) => return Some(value),
			Ok(Err(err)) => UnhandledException {
				exception_type: "Error".into(),
				message: err.to_string(),
				stack_trace: String::new(),
			},
			Err(payload) => UnhandledException {
				exception_type: "Panic".into(),
				message: panic_message(payload.as_ref()),
				stack_trace: String::new(),
			},
		};
		self.report(Some(frame), exception);
		None
	}

	/// Reports a failure that happened outside any frame callback.
	pub fn report_unhandled(&self, exception: UnhandledException) {
		self.report(None, exception);
	}

	/// Sends `exception` to the host through `frame`, then the main frame, then
	/// the side channel, stopping at the first that accepts it.
	fn report(&self, frame: Option<&Frame>, exception: UnhandledException) {
		tracing::error!(%exception, "unhandled exception in render process");

		let main = self.contexts.main_frame();
		let candidates = frame.into_iter().cloned().chain(
			main.filter(|m| frame.is_none_or(|f| f.id() != m.id())),
		);
		for target in candidates {
			match target.send_envelope(ProcessId::Browser, &exception) {
				Ok(()) => return,
				Err(err) => {
					tracing::warn!(frame = %target.id(), error = %err, "failed to forward exception to host");
				}
			}
		}

		if let Err(err) = self.side_channel.report(&exception) {
			tracing::error!(error = %err, "crash report lost: side channel failed");
		}
	}

	/// Cancels outstanding native calls.
	pub fn dispose(&self) -> usize {
		self.native.dispose()
	}
}
