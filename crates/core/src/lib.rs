//! cefbridge: typed asynchronous bridge between a browser host and its
//! renderer processes.
//!
//! The host evaluates scripts in renderer frames and awaits their results,
//! and exposes native objects that script can call back into. Both directions
//! are request/response exchanges correlated by call id over the engine's
//! per-frame process-message channel.
//!
//! # Host
//!
//! ```ignore
//! use cefbridge::{BrowserBridge, BridgeConfig, ObjectBinding, to_value};
//!
//! let bridge = BrowserBridge::new(BridgeConfig::default())?;
//! bridge.register_object(
//!     "calc",
//!     ObjectBinding::new().sync_method("add", 2, |args| {
//!         to_value(&(args.get::<i64>(0)? + args.get::<i64>(1)?))
//!     }),
//! )?;
//!
//! // from the engine's message callback:
//! bridge.on_process_message_received(source, &frame, &message);
//!
//! let two: i64 = bridge.evaluate("1+1", "about:blank", 1, &frame, None).await?;
//! ```
//!
//! # Renderer
//!
//! ```ignore
//! use cefbridge::{BridgeConfig, RenderProcessHandler};
//!
//! let config = BridgeConfig::from_args(std::env::args());
//! let handler = RenderProcessHandler::new(&config);
//!
//! handler.on_context_created(&frame, context);
//! handler.on_process_message_received(ProcessId::Browser, &frame, &message);
//! ```

pub mod binding;
pub mod handlers;
pub mod host;
pub mod renderer;

pub use binding::{
	BoundObject, CallArguments, InvokeError, InvokeResult, MethodInterceptor, ObjectBinding, to_value,
};
pub use cefbridge_protocol as protocol;
pub use cefbridge_protocol::{FrameId, ProcessId, ProcessMessage, StructuredValue};
pub use cefbridge_runtime as runtime;
pub use cefbridge_runtime::{
	BridgeConfig, CancelReason, Error, Frame, ProcessMessageSink, QueueChannel, Result, SideChannel,
};
pub use handlers::{EventHandlers, Subscription};
pub use host::{BrowserBridge, ContextState, JavascriptExecutionEngine, UncaughtExceptionEvent};
pub use renderer::{NativeObjectProxy, RenderProcessHandler, ScriptContext, ScriptException};
