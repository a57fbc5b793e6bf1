//! Message envelope schemas.
//!
//! Each envelope is a name plus a fixed slot layout. [`Envelope`] writes
//! field `i` to argument slot `i` and reads it back by position, checking the
//! message name first.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::message::{ArgValue, ListValue, ProcessMessage};

/// Identifier correlating a request with its result.
///
/// Travels in the engine's signed 32-bit integer slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallId(pub u32);

impl CallId {
	pub fn to_wire(self) -> i32 {
		self.0 as i32
	}

	pub fn from_wire(raw: i32) -> Self {
		CallId(raw as u32)
	}
}

impl fmt::Display for CallId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Engine-assigned frame identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameId(pub String);

impl FrameId {
	pub fn new(id: impl Into<String>) -> Self {
		FrameId(id.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for FrameId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for FrameId {
	fn from(id: &str) -> Self {
		FrameId(id.to_string())
	}
}

impl From<String> for FrameId {
	fn from(id: String) -> Self {
		FrameId(id)
	}
}

/// A typed message schema.
pub trait Envelope: Sized {
	const NAME: &'static str;

	fn write_arguments(&self, arguments: &mut ListValue);

	fn read_arguments(arguments: &ListValue) -> Result<Self>;

	fn to_process_message(&self) -> ProcessMessage {
		let mut message = ProcessMessage::new(Self::NAME);
		self.write_arguments(&mut message.arguments);
		message
	}

	fn from_process_message(message: &ProcessMessage) -> Result<Self> {
		if message.name != Self::NAME {
			return Err(Error::protocol(format!(
				"expected message '{}', got '{}'",
				Self::NAME,
				message.name
			)));
		}
		Self::read_arguments(&message.arguments)
	}
}

/// Result of a remote evaluation or object call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
	/// Encoded structured result.
	Success(Vec<u8>),
	/// Exception text.
	Failure(String),
}

impl CallOutcome {
	pub fn is_success(&self) -> bool {
		matches!(self, CallOutcome::Success(_))
	}

	/// Writes slots `start..start + 3`: success flag, result, exception.
	fn write(&self, arguments: &mut ListValue, start: usize) {
		match self {
			CallOutcome::Success(bytes) => {
				arguments.set_bool(start, true);
				// An empty payload would be carried as null.
				let bytes = if bytes.is_empty() { b"null".to_vec() } else { bytes.clone() };
				arguments.set_byte_array(start + 1, bytes);
				arguments.set_null(start + 2);
			}
			CallOutcome::Failure(text) => {
				arguments.set_bool(start, false);
				arguments.set_null(start + 1);
				arguments.set_string(start + 2, text.as_str());
			}
		}
	}

	fn read(arguments: &ListValue, start: usize) -> Result<Self> {
		let success = arguments.get_bool(start)?;
		let result_present = !arguments.is_null(start + 1);
		let exception_present = !arguments.is_null(start + 2);
		if success {
			if !result_present || exception_present {
				return Err(Error::protocol(
					"successful result must carry a payload and no exception",
				));
			}
			Ok(CallOutcome::Success(arguments.get_byte_array(start + 1)?))
		} else {
			if result_present || !exception_present {
				return Err(Error::protocol(
					"failed result must carry an exception and no payload",
				));
			}
			Ok(CallOutcome::Failure(arguments.get_string(start + 2)?.to_string()))
		}
	}
}

/// Host asks the renderer to run a script in a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationRequest {
	pub call_id: CallId,
	pub frame_id: FrameId,
	pub script: String,
	pub source_url: String,
	pub source_line: i32,
}

impl Envelope for EvaluationRequest {
	const NAME: &'static str = "EvaluationRequest";

	fn write_arguments(&self, arguments: &mut ListValue) {
		arguments.set_int(0, self.call_id.to_wire());
		arguments.set_string(1, self.frame_id.as_str());
		arguments.set_string(2, self.script.as_str());
		arguments.set_string(3, self.source_url.as_str());
		arguments.set_int(4, self.source_line);
	}

	fn read_arguments(arguments: &ListValue) -> Result<Self> {
		Ok(Self {
			call_id: CallId::from_wire(arguments.get_int(0)?),
			frame_id: FrameId::new(arguments.get_string(1)?),
			script: arguments.get_string(2)?.to_string(),
			source_url: arguments.get_string(3)?.to_string(),
			source_line: arguments.get_int(4)?,
		})
	}
}

/// Renderer's answer to an [`EvaluationRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationResult {
	pub call_id: CallId,
	pub outcome: CallOutcome,
}

impl Envelope for EvaluationResult {
	const NAME: &'static str = "EvaluationResult";

	fn write_arguments(&self, arguments: &mut ListValue) {
		arguments.set_int(0, self.call_id.to_wire());
		self.outcome.write(arguments, 1);
	}

	fn read_arguments(arguments: &ListValue) -> Result<Self> {
		Ok(Self {
			call_id: CallId::from_wire(arguments.get_int(0)?),
			outcome: CallOutcome::read(arguments, 1)?,
		})
	}
}

/// A frame's script context was created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextCreated {
	pub frame_id: FrameId,
}

impl Envelope for ContextCreated {
	const NAME: &'static str = "ContextCreated";

	fn write_arguments(&self, arguments: &mut ListValue) {
		arguments.set_string(0, self.frame_id.as_str());
	}

	fn read_arguments(arguments: &ListValue) -> Result<Self> {
		Ok(Self {
			frame_id: FrameId::new(arguments.get_string(0)?),
		})
	}
}

/// A frame's script context was released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextReleased {
	pub frame_id: FrameId,
}

impl Envelope for ContextReleased {
	const NAME: &'static str = "ContextReleased";

	fn write_arguments(&self, arguments: &mut ListValue) {
		arguments.set_string(0, self.frame_id.as_str());
	}

	fn read_arguments(arguments: &ListValue) -> Result<Self> {
		Ok(Self {
			frame_id: FrameId::new(arguments.get_string(0)?),
		})
	}
}

/// One frame of a script stack trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
	pub function_name: String,
	pub source_url: String,
	pub line: i32,
	pub column: i32,
}

impl StackFrame {
	fn to_list(&self) -> ListValue {
		let mut list = ListValue::new();
		list.set_string(0, self.function_name.as_str());
		list.set_string(1, self.source_url.as_str());
		list.set_int(2, self.line);
		list.set_int(3, self.column);
		list
	}

	fn from_list(list: &ListValue) -> Result<Self> {
		Ok(Self {
			function_name: list.get_string(0)?.to_string(),
			source_url: list.get_string(1)?.to_string(),
			line: list.get_int(2)?,
			column: list.get_int(3)?,
		})
	}
}

/// A script threw and nothing caught it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UncaughtException {
	pub frame_id: FrameId,
	pub message: String,
	pub stack_frames: Vec<StackFrame>,
}

impl Envelope for UncaughtException {
	const NAME: &'static str = "UncaughtException";

	fn write_arguments(&self, arguments: &mut ListValue) {
		arguments.set_string(0, self.frame_id.as_str());
		arguments.set_string(1, self.message.as_str());
		arguments.set_list(2, self.stack_frames.iter().map(|f| ArgValue::List(f.to_list())).collect());
	}

	fn read_arguments(arguments: &ListValue) -> Result<Self> {
		let frames = arguments.get_list(2)?;
		let stack_frames = (0..frames.len())
			.map(|i| frames.get_list(i).and_then(StackFrame::from_list))
			.collect::<Result<Vec<_>>>()?;
		Ok(Self {
			frame_id: FrameId::new(arguments.get_string(0)?),
			message: arguments.get_string(1)?.to_string(),
			stack_frames,
		})
	}
}

/// Script invoked a member of a bound native object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectCallRequest {
	pub call_id: CallId,
	pub object_name: String,
	pub member_name: String,
	/// Encoded argument list.
	pub arguments: Vec<u8>,
}

impl Envelope for ObjectCallRequest {
	const NAME: &'static str = "ObjectCallRequest";

	fn write_arguments(&self, arguments: &mut ListValue) {
		arguments.set_int(0, self.call_id.to_wire());
		arguments.set_string(1, self.object_name.as_str());
		arguments.set_string(2, self.member_name.as_str());
		arguments.set_byte_array(3, self.arguments.clone());
	}

	fn read_arguments(arguments: &ListValue) -> Result<Self> {
		Ok(Self {
			call_id: CallId::from_wire(arguments.get_int(0)?),
			object_name: arguments.get_string(1)?.to_string(),
			member_name: arguments.get_string(2)?.to_string(),
			arguments: arguments.get_byte_array(3)?,
		})
	}
}

/// Host's answer to an [`ObjectCallRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectCallResult {
	pub call_id: CallId,
	pub outcome: CallOutcome,
}

impl Envelope for ObjectCallResult {
	const NAME: &'static str = "ObjectCallResult";

	fn write_arguments(&self, arguments: &mut ListValue) {
		arguments.set_int(0, self.call_id.to_wire());
		self.outcome.write(arguments, 1);
	}

	fn read_arguments(arguments: &ListValue) -> Result<Self> {
		Ok(Self {
			call_id: CallId::from_wire(arguments.get_int(0)?),
			outcome: CallOutcome::read(arguments, 1)?,
		})
	}
}

/// A renderer callback failed. Sent on the crash path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnhandledException {
	pub exception_type: String,
	pub message: String,
	pub stack_trace: String,
}

impl Envelope for UnhandledException {
	const NAME: &'static str = "UnhandledException";

	fn write_arguments(&self, arguments: &mut ListValue) {
		arguments.set_string(0, self.exception_type.as_str());
		arguments.set_string(1, self.message.as_str());
		arguments.set_string(2, self.stack_trace.as_str());
	}

	fn read_arguments(arguments: &ListValue) -> Result<Self> {
		Ok(Self {
			exception_type: arguments.get_string(0)?.to_string(),
			message: arguments.get_string(1)?.to_string(),
			stack_trace: arguments.get_string(2)?.to_string(),
		})
	}
}

impl fmt::Display for UnhandledException {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}: {}", self.exception_type, self.message)?;
		if !self.stack_trace.is_empty() {
			write!(f, "\n{}", self.stack_trace)?;
		}
		Ok(())
	}
}

/// Method table entry of a bound object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodInfo {
	pub name: String,
	pub parameter_count: i32,
}

impl MethodInfo {
	pub fn new(name: impl Into<String>, parameter_count: i32) -> Self {
		Self {
			name: name.into(),
			parameter_count,
		}
	}
}

/// Host asks the renderer to expose a proxy for a native object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRegistrationRequest {
	pub object_name: String,
	pub methods: Vec<MethodInfo>,
}

impl Envelope for ObjectRegistrationRequest {
	const NAME: &'static str = "ObjectRegistrationRequest";

	fn write_arguments(&self, arguments: &mut ListValue) {
		arguments.set_string(0, self.object_name.as_str());
		let methods = self
			.methods
			.iter()
			.map(|m| {
				let mut entry = ListValue::new();
				entry.set_string(0, m.name.as_str());
				entry.set_int(1, m.parameter_count);
				ArgValue::List(entry)
			})
			.collect();
		arguments.set_list(1, methods);
	}

	fn read_arguments(arguments: &ListValue) -> Result<Self> {
		let list = arguments.get_list(1)?;
		let methods = (0..list.len())
			.map(|i| {
				let entry = list.get_list(i)?;
				Ok(MethodInfo::new(entry.get_string(0)?, entry.get_int(1)?))
			})
			.collect::<Result<Vec<_>>>()?;
		Ok(Self {
			object_name: arguments.get_string(0)?.to_string(),
			methods,
		})
	}
}

/// Host asks the renderer to remove a previously exposed proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectUnregistrationRequest {
	pub object_name: String,
}

impl Envelope for ObjectUnregistrationRequest {
	const NAME: &'static str = "ObjectUnregistrationRequest";

	fn write_arguments(&self, arguments: &mut ListValue) {
		arguments.set_string(0, self.object_name.as_str());
	}

	fn read_arguments(arguments: &ListValue) -> Result<Self> {
		Ok(Self {
			object_name: arguments.get_string(0)?.to_string(),
		})
	}
}
