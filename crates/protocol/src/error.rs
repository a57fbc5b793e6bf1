//! Error types for value conversion and envelope decoding.

use thiserror::Error;

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while encoding, decoding or converting bridge payloads.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
	/// A structured value could not be encoded or decoded.
	#[error("Serialization error: {0}")]
	Serialization(String),

	/// A message did not match its schema (wrong name, slot type or presence rule).
	#[error("Protocol error: {0}")]
	Protocol(String),

	/// A structured value could not be converted to or from a native type.
	#[error("Type conversion error: {0}")]
	TypeConversion(String),
}

impl Error {
	pub(crate) fn serialization(msg: impl Into<String>) -> Self {
		Error::Serialization(msg.into())
	}

	pub(crate) fn protocol(msg: impl Into<String>) -> Self {
		Error::Protocol(msg.into())
	}

	pub(crate) fn conversion(msg: impl Into<String>) -> Self {
		Error::TypeConversion(msg.into())
	}
}
