//! Browser-process side of the bridge.
//!
//! [`BrowserBridge`] owns the host dispatcher, the script evaluation engine
//! and the native object registry. The embedder forwards every process
//! message from the renderer to [`BrowserBridge::on_process_message_received`].

pub mod javascript;
pub mod objects;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use cefbridge_protocol::{
	ContextCreated, ContextReleased, Envelope, ProcessId, ProcessMessage, StructuredValue,
	UnhandledException,
};
use cefbridge_runtime::{
	BridgeConfig, DispatchReport, Error, Frame, MessageDispatcher, MessageReceived, PipeReceiver,
	Result,
};
use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use tokio::io::AsyncRead;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

pub use self::javascript::{ContextState, JavascriptExecutionEngine, UncaughtExceptionEvent};
pub use self::objects::NativeObjectRegistry;
use crate::binding::{BoundObject, InvokeResult};
use crate::handlers::{EventHandlers, Subscription};

/// Host endpoint of the bridge.
pub struct BrowserBridge {
	config: BridgeConfig,
	handle: Handle,
	dispatcher: MessageDispatcher,
	javascript: Arc<JavascriptExecutionEngine>,
	objects: Arc<NativeObjectRegistry>,
	renderer_crashed: EventHandlers<UnhandledException>,
	disposed: AtomicBool,
}

impl BrowserBridge {
	/// Creates the bridge on the current tokio runtime.
	///
	/// Fails with [`Error::RuntimeUnavailable`] outside a runtime.
	pub fn new(config: BridgeConfig) -> Result<Arc<Self>> {
		let handle = Handle::try_current().map_err(|e| Error::RuntimeUnavailable(e.to_string()))?;
		let javascript = Arc::new(JavascriptExecutionEngine::new(
			config.default_evaluation_timeout(),
		));
		let objects = Arc::new(NativeObjectRegistry::new(handle.clone()));

		let bridge = Arc::new_cyclic(|weak: &Weak<Self>| {
			let dispatcher = MessageDispatcher::new();
			javascript.attach(&dispatcher);
			objects.attach(&dispatcher);

			let registry = Arc::downgrade(&objects);
			dispatcher.register_envelope(move |received, _: ContextCreated| {
				if !received.frame.is_main() {
					return Ok(());
				}
				match registry.upgrade() {
					Some(registry) => registry.attach_main_frame(received.frame),
					None => Ok(()),
				}
			});

			let registry = Arc::downgrade(&objects);
			dispatcher.register_envelope(move |received, _: ContextReleased| {
				if received.frame.is_main() {
					if let Some(registry) = registry.upgrade() {
						registry.detach_main_frame();
					}
				}
				Ok(())
			});

			let bridge = weak.clone();
			dispatcher.register_envelope(move |_, exception: UnhandledException| {
				if let Some(bridge) = bridge.upgrade() {
					bridge.report_renderer_crash(exception);
				}
				Ok(())
			});

			Self {
				config,
				handle,
				dispatcher,
				javascript,
				objects,
				renderer_crashed: EventHandlers::new(),
				disposed: AtomicBool::new(false),
			}
		});

		tracing::info!("browser bridge initialized");
		Ok(bridge)
	}

	pub fn config(&self) -> &BridgeConfig {
		&self.config
	}

	pub fn dispatcher(&self) -> &MessageDispatcher {
		&self.dispatcher
	}

	pub fn javascript(&self) -> &Arc<JavascriptExecutionEngine> {
		&self.javascript
	}

	pub fn objects(&self) -> &Arc<NativeObjectRegistry> {
		&self.objects
	}

	/// Entry point for every message the renderer sends.
	pub fn on_process_message_received(
		&self,
		source: ProcessId,
		frame: &Frame,
		message: &ProcessMessage,
	) -> DispatchReport {
		if self.is_disposed() {
			tracing::debug!(name = %message.name, "bridge disposed; dropping message");
			return DispatchReport::default();
		}
		self.dispatcher
			.dispatch(&MessageReceived::new(source, frame, message))
	}

	/// Evaluates `script` in `frame`. See [`JavascriptExecutionEngine::evaluate`].
	pub async fn evaluate<T: DeserializeOwned>(
		&self,
		script: &str,
		url: &str,
		line: i32,
		frame: &Frame,
		timeout: Option<Duration>,
	) -> Result<T> {
		self.javascript
			.evaluate(script, url, line, frame, timeout)
			.await
	}

	pub async fn evaluate_value(
		&self,
		script: &str,
		url: &str,
		line: i32,
		frame: &Frame,
		timeout: Option<Duration>,
	) -> Result<StructuredValue> {
		self.javascript
			.evaluate_value(script, url, line, frame, timeout)
			.await
	}

	pub fn is_main_frame_context_initialized(&self) -> bool {
		self.javascript.is_main_frame_context_initialized()
	}

	/// Exposes `object` to script as a global named `name`.
	///
	/// Returns `false` if the name is already taken.
	pub fn register_object<O: BoundObject>(&self, name: &str, object: O) -> Result<bool> {
		self.register_object_arc(name, Arc::new(object))
	}

	pub fn register_object_arc(&self, name: &str, object: Arc<dyn BoundObject>) -> Result<bool> {
		self.objects.register(name, object)
	}

	/// Like [`register_object`](Self::register_object), but every member call
	/// is handed to `interceptor` together with the member name, and the
	/// future it returns is awaited instead.
	pub fn register_object_with<O, F>(&self, name: &str, object: O, interceptor: F) -> Result<bool>
	where
		O: BoundObject,
		F: Fn(&str, BoxFuture<'static, InvokeResult>) -> BoxFuture<'static, InvokeResult>
			+ Send
			+ Sync
			+ 'static,
	{
		self.objects
			.register_with(name, Arc::new(object), Some(Arc::new(interceptor)))
	}

	pub fn unregister_object(&self, name: &str) -> Result<bool> {
		self.objects.unregister(name)
	}

	pub fn on_context_created<F>(&self, handler: F) -> Subscription
	where
		F: Fn(&Frame) + Send + Sync + 'static,
	{
		self.javascript.on_context_created(handler)
	}

	pub fn on_context_released<F>(&self, handler: F) -> Subscription
	where
		F: Fn(&Frame) + Send + Sync + 'static,
	{
		self.javascript.on_context_released(handler)
	}

	pub fn on_uncaught_exception<F>(&self, handler: F) -> Subscription
	where
		F: Fn(&UncaughtExceptionEvent) + Send + Sync + 'static,
	{
		self.javascript.on_uncaught_exception(handler)
	}

	/// Fires for failures the renderer could not handle itself, whether they
	/// arrive as a process message or over the side channel.
	pub fn on_renderer_crash<F>(&self, handler: F) -> Subscription
	where
		F: Fn(&UnhandledException) + Send + Sync + 'static,
	{
		self.renderer_crashed.subscribe(handler)
	}

	fn report_renderer_crash(&self, exception: UnhandledException) {
		tracing::error!(%exception, "unhandled exception in renderer process");
		self.renderer_crashed.emit(&exception);
	}

	/// Reads crash reports the renderer sends over a side-channel pipe.
	///
	/// The returned task ends when the pipe closes or the bridge is dropped.
	pub fn listen_side_channel<R>(self: &Arc<Self>, reader: R) -> JoinHandle<()>
	where
		R: AsyncRead + Unpin + Send + 'static,
	{
		let (mut receiver, mut rx) = PipeReceiver::new(reader);
		self.handle.spawn(async move {
			if let Err(err) = receiver.run().await {
				tracing::debug!(error = %err, "side channel pipe closed");
			}
		});

		let weak = Arc::downgrade(self);
		self.handle.spawn(async move {
			while let Some(message) = rx.recv().await {
				let Some(bridge) = weak.upgrade() else {
					break;
				};
				if message.name != UnhandledException::NAME {
					tracing::debug!(name = %message.name, "ignoring side channel message");
					continue;
				}
				match UnhandledException::from_process_message(&message) {
					Ok(exception) => bridge.report_renderer_crash(exception),
					Err(err) => tracing::warn!(error = %err, "malformed crash report on side channel"),
				}
			}
		})
	}

	pub fn is_disposed(&self) -> bool {
		self.disposed.load(Ordering::SeqCst)
	}

	/// Cancels pending evaluations and stops handling messages.
	pub fn dispose(&self) {
		if self.disposed.swap(true, Ordering::SeqCst) {
			return;
		}
		let canceled = self.javascript.dispose();
		self.objects.detach_main_frame();
		tracing::info!(canceled, "browser bridge disposed");
	}
}

impl Drop for BrowserBridge {
	fn drop(&mut self) {
		self.dispose();
	}
}
