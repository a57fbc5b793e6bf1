//! Error types for the bridge runtime.

use std::fmt;

use cefbridge_protocol::FrameId;
use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a pending call ended without a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelReason {
	/// The wait outlived its timeout.
	Timeout,
	/// The registry owning the call was disposed.
	OwnerDisposed,
	/// The script context the call belonged to was released.
	ContextReleased,
	/// The call was canceled explicitly or its waiter went away.
	Dropped,
}

impl fmt::Display for CancelReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let text = match self {
			CancelReason::Timeout => "timed out",
			CancelReason::OwnerDisposed => "owner disposed",
			CancelReason::ContextReleased => "script context released",
			CancelReason::Dropped => "dropped",
		};
		f.write_str(text)
	}
}

/// Errors surfaced by the bridge.
#[derive(Debug, Error)]
pub enum Error {
	/// A structured value could not be encoded or decoded.
	#[error("Serialization error: {0}")]
	Serialization(String),

	/// The target frame has no usable script context.
	#[error("Script context unavailable for frame '{frame_id}'")]
	ContextUnavailable { frame_id: FrameId },

	/// The script threw. Carries the composed exception text.
	#[error("Script exception: {0}")]
	ScriptException(String),

	/// A bound native member threw. Carries the remote exception text.
	#[error("Native call failed: {0}")]
	RemoteException(String),

	/// The result could not be converted to the requested type.
	#[error("Type conversion error: {0}")]
	TypeConversion(String),

	/// The call ended without a result.
	#[error("Call canceled: {0}")]
	CallCanceled(CancelReason),

	/// The message could not be handed to the peer process.
	#[error("Peer process unreachable: {0}")]
	PeerUnreachable(String),

	/// A message did not match its schema.
	#[error("Protocol error: {0}")]
	Protocol(String),

	/// Framing or pipe failure.
	#[error("Transport error: {0}")]
	Transport(String),

	/// No bound object with this name.
	#[error("Object not found: {0}")]
	ObjectNotFound(String),

	/// The bound object has no such member.
	#[error("Member not found: {object}.{member}")]
	MemberNotFound { object: String, member: String },

	/// Configuration could not be parsed.
	#[error("Invalid configuration: {0}")]
	InvalidConfig(String),

	/// No tokio runtime was available to drive the bridge.
	#[error("Runtime unavailable: {0}")]
	RuntimeUnavailable(String),

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl From<cefbridge_protocol::Error> for Error {
	fn from(err: cefbridge_protocol::Error) -> Self {
		match err {
			cefbridge_protocol::Error::Serialization(msg) => Error::Serialization(msg),
			cefbridge_protocol::Error::Protocol(msg) => Error::Protocol(msg),
			cefbridge_protocol::Error::TypeConversion(msg) => Error::TypeConversion(msg),
		}
	}
}

impl Error {
	/// Returns true if the call was canceled for any reason.
	pub fn is_canceled(&self) -> bool {
		matches!(self, Error::CallCanceled(_))
	}

	/// Returns true if this is a timeout cancellation.
	pub fn is_timeout(&self) -> bool {
		matches!(self, Error::CallCanceled(CancelReason::Timeout))
	}

	/// Returns the cancellation reason, if any.
	pub fn cancel_reason(&self) -> Option<CancelReason> {
		match self {
			Error::CallCanceled(reason) => Some(*reason),
			_ => None,
		}
	}

	/// Returns true if the error carries an exception raised by script or a bound member.
	pub fn is_exception(&self) -> bool {
		matches!(self, Error::ScriptException(_) | Error::RemoteException(_))
	}
}
