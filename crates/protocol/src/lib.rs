//! Wire-level types shared by the browser and renderer sides of the bridge.
//!
//! - [`value`]: structured values with reference identity
//! - [`codec`]: reference-preserving JSON codec for structured values
//! - [`message`]: the engine's opaque named message and its argument list
//! - [`messages`]: typed envelope schemas carried in those messages

pub mod codec;
pub mod error;
pub mod message;
pub mod messages;
pub mod value;

pub use codec::{EncodeOptions, decode, encode};
pub use error::{Error, Result};
pub use message::{ArgValue, ListValue, ProcessId, ProcessMessage};
pub use messages::{
	CallId, CallOutcome, ContextCreated, ContextReleased, Envelope, EvaluationRequest,
	EvaluationResult, FrameId, MethodInfo, ObjectCallRequest, ObjectCallResult,
	ObjectRegistrationRequest, ObjectUnregistrationRequest, StackFrame, UncaughtException,
	UnhandledException,
};
pub use value::{Graph, Node, NodeId, StructuredValue, Value};
