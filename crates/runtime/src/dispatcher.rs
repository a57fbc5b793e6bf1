//! Name-keyed message dispatch.
//!
//! Each endpoint owns one [`MessageDispatcher`]. Handlers are chained per
//! message name and run in registration order on the delivering thread.
//! A handler that fails or panics does not stop the rest of the chain; the
//! failure is collected into the returned [`DispatchReport`].

use std::any::Any;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use cefbridge_protocol::{Envelope, ProcessId, ProcessMessage, UnhandledException};
use parking_lot::RwLock;

use crate::channel::Frame;
use crate::error::{Error, Result};

/// An inbound message together with where it came from.
#[derive(Debug, Clone, Copy)]
pub struct MessageReceived<'a> {
	/// Process that sent the message.
	pub source: ProcessId,
	/// Frame the message arrived on. Replies go back through it.
	pub frame: &'a Frame,
	pub message: &'a ProcessMessage,
}

impl<'a> MessageReceived<'a> {
	pub fn new(source: ProcessId, frame: &'a Frame, message: &'a ProcessMessage) -> Self {
		Self {
			source,
			frame,
			message,
		}
	}

	/// Decodes the message as envelope `E`.
	pub fn decode<E: Envelope>(&self) -> Result<E> {
		Ok(E::from_process_message(self.message)?)
	}
}

/// Handler invoked for every message with a matching name.
pub type MessageHandler = Arc<dyn Fn(&MessageReceived<'_>) -> Result<()> + Send + Sync>;

/// What went wrong inside a handler.
#[derive(Debug)]
pub enum FailureCause {
	Error(Error),
	Panic(String),
}

/// One failed handler invocation.
#[derive(Debug)]
pub struct HandlerFailure {
	pub message_name: String,
	pub cause: FailureCause,
}

impl HandlerFailure {
	/// Packages the failure for the crash-report path.
	pub fn to_unhandled_exception(&self) -> UnhandledException {
		let (exception_type, message) = match &self.cause {
			FailureCause::Error(err) => ("Error", err.to_string()),
			FailureCause::Panic(msg) => ("Panic", msg.clone()),
		};
		UnhandledException {
			exception_type: exception_type.to_string(),
			message,
			stack_trace: format!("in handler for '{}'", self.message_name),
		}
	}
}

/// Summary of one [`MessageDispatcher::dispatch`] call.
#[derive(Debug, Default)]
pub struct DispatchReport {
	pub handlers_invoked: usize,
	pub failures: Vec<HandlerFailure>,
}

impl DispatchReport {
	pub fn is_ok(&self) -> bool {
		self.failures.is_empty()
	}

	/// True if no handler was registered for the message.
	pub fn is_unhandled(&self) -> bool {
		self.handlers_invoked == 0
	}
}

/// Registry of message-name to handler chain.
#[derive(Default)]
pub struct MessageDispatcher {
	handlers: RwLock<HashMap<String, Vec<MessageHandler>>>,
}

impl MessageDispatcher {
	pub fn new() -> Self {
		Self::default()
	}

	/// Appends `handler` to the chain for `name`.
	pub fn register<F>(&self, name: impl Into<String>, handler: F)
	where
		F: Fn(&MessageReceived<'_>) -> Result<()> + Send + Sync + 'static,
	{
		let name = name.into();
		tracing::debug!(name = %name, "registering message handler");
		self.handlers.write().entry(name).or_default().push(Arc::new(handler));
	}

	/// Registers a handler that receives the message decoded as `E`.
	pub fn register_envelope<E, F>(&self, handler: F)
	where
		E: Envelope + 'static,
		F: Fn(&MessageReceived<'_>, E) -> Result<()> + Send + Sync + 'static,
	{
		self.register(E::NAME, move |received| {
			let envelope = received.decode::<E>()?;
			handler(received, envelope)
		});
	}

	pub fn handler_count(&self, name: &str) -> usize {
		self.handlers.read().get(name).map_or(0, Vec::len)
	}

	/// Runs every handler registered for the message name.
	///
	/// Unknown names are ignored. The chain is snapshotted first, so a
	/// handler may register further handlers without deadlocking.
	pub fn dispatch(&self, received: &MessageReceived<'_>) -> DispatchReport {
		let name = received.message.name.as_str();
		let chain = match self.handlers.read().get(name) {
			Some(chain) => chain.clone(),
			None => {
				tracing::debug!(name, source = %received.source, "no handler for message; ignoring");
				return DispatchReport::default();
			}
		};

		let mut report = DispatchReport {
			handlers_invoked: chain.len(),
			failures: Vec::new(),
		};

		for handler in chain {
			let outcome = catch_unwind(AssertUnwindSafe(|| handler(received)));
			let cause = match outcome {
				Ok(Ok(())) => continue,
				Ok(Err(err)) => FailureCause::Error(err),
				Err(payload) => FailureCause::Panic(panic_message(payload.as_ref())),
			};
			tracing::error!(name, frame = %received.frame.id(), ?cause, "message handler failed");
			report.failures.push(HandlerFailure {
				message_name: name.to_string(),
				cause,
			});
		}

		report
	}
}

/// Extracts the text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
	if let Some(msg) = payload.downcast_ref::<&str>() {
		(*msg).to_string()
	} else if let Some(msg) = payload.downcast_ref::<String>() {
		msg.clone()
	} else {
		"unknown panic".to_string()
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use cefbridge_protocol::ContextCreated;

	use super::*;
	use crate::channel::QueueChannel;

	fn frame() -> Frame {
		QueueChannel::new().0.frame("main", true)
	}

	#[test]
	fn test_chain_runs_in_order() {
		let dispatcher = MessageDispatcher::new();
		let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
		for tag in ["first", "second"] {
			let order = Arc::clone(&order);
			dispatcher.register("Ping", move |_| {
				order.lock().push(tag);
				Ok(())
			});
		}

		let frame = frame();
		let message = ProcessMessage::new("Ping");
		let report = dispatcher.dispatch(&MessageReceived::new(ProcessId::Renderer, &frame, &message));

		assert!(report.is_ok());
		assert_eq!(report.handlers_invoked, 2);
		assert_eq!(*order.lock(), vec!["first", "second"]);
	}

	#[test]
	fn test_unknown_name_ignored() {
		let dispatcher = MessageDispatcher::new();
		let frame = frame();
		let message = ProcessMessage::new("FromTheFuture");
		let report = dispatcher.dispatch(&MessageReceived::new(ProcessId::Browser, &frame, &message));

		assert!(report.is_ok());
		assert!(report.is_unhandled());
	}

	#[test]
	fn test_panic_does_not_stop_chain() {
		let dispatcher = MessageDispatcher::new();
		let reached = Arc::new(AtomicUsize::new(0));

		dispatcher.register("Ping", |_| panic!("handler exploded"));
		dispatcher.register("Ping", |_| Err(Error::Protocol("bad slot".into())));
		let counter = Arc::clone(&reached);
		dispatcher.register("Ping", move |_| {
			counter.fetch_add(1, Ordering::SeqCst);
			Ok(())
		});

		let frame = frame();
		let message = ProcessMessage::new("Ping");
		let report = dispatcher.dispatch(&MessageReceived::new(ProcessId::Renderer, &frame, &message));

		assert_eq!(reached.load(Ordering::SeqCst), 1);
		assert_eq!(report.failures.len(), 2);
		assert!(matches!(&report.failures[0].cause, FailureCause::Panic(m) if m == "handler exploded"));

		let exception = report.failures[1].to_unhandled_exception();
		assert_eq!(exception.exception_type, "Error");
		assert!(exception.message.contains("bad slot"));
		assert!(exception.stack_trace.contains("Ping"));
	}

	#[test]
	fn test_envelope_handler_decodes() {
		let dispatcher = MessageDispatcher::new();
		let seen = Arc::new(parking_lot::Mutex::new(None));
		let sink = Arc::clone(&seen);
		dispatcher.register_envelope(move |_, created: ContextCreated| {
			*sink.lock() = Some(created.frame_id);
			Ok(())
		});

		let frame = frame();
		let message = ContextCreated {
			frame_id: frame.id().clone(),
		}
		.to_process_message();
		dispatcher.dispatch(&MessageReceived::new(ProcessId::Renderer, &frame, &message));

		assert_eq!(seen.lock().as_ref().map(|f| f.as_str()), Some("main"));
	}

	#[test]
	fn test_handler_may_register_during_dispatch() {
		let dispatcher = Arc::new(MessageDispatcher::new());
		let inner = Arc::clone(&dispatcher);
		dispatcher.register("Ping", move |_| {
			inner.register("Pong", |_| Ok(()));
			Ok(())
		});

		let frame = frame();
		let message = ProcessMessage::new("Ping");
		dispatcher.dispatch(&MessageReceived::new(ProcessId::Renderer, &frame, &message));
		assert_eq!(dispatcher.handler_count("Pong"), 1);
	}
}
