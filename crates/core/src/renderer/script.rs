//! The renderer's view of a frame's script engine.

use std::fmt;

use cefbridge_protocol::StructuredValue;
use cefbridge_runtime::Result;

use super::binding::NativeObjectProxy;

/// Exception thrown by a script, as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScriptException {
	pub message: String,
	pub resource_name: String,
	pub line: i32,
	pub start_column: i32,
}

impl ScriptException {
	pub fn new(message: impl Into<String>) -> Self {
		Self {
			message: message.into(),
			..Self::default()
		}
	}

	/// Text sent to the host: the message, then `resource:line:column`.
	pub fn compose(&self) -> String {
		format!(
			"{}\n{}:{}:{}",
			self.message, self.resource_name, self.line, self.start_column
		)
	}
}

impl fmt::Display for ScriptException {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.compose())
	}
}

impl std::error::Error for ScriptException {}

/// A frame's script context, supplied by the engine integration.
///
/// `eval`, `install_object` and `remove_object` are only called between a
/// successful `enter` and the matching `exit`.
pub trait ScriptContext: Send + Sync {
	/// Makes the context current. Returns `false` if it can no longer be entered.
	fn enter(&self) -> bool;

	fn exit(&self);

	/// Runs `script` and copies its completion value out of the engine.
	fn eval(&self, script: &str, url: &str, line: i32)
	-> std::result::Result<StructuredValue, ScriptException>;

	/// Exposes `proxy` as a global named `name`.
	fn install_object(&self, name: &str, proxy: NativeObjectProxy) -> Result<()>;

	fn remove_object(&self, name: &str) -> Result<()>;
}

/// Keeps a context entered until dropped.
pub struct ContextGuard<'a> {
	context: &'a dyn ScriptContext,
}

impl<'a> ContextGuard<'a> {
	/// Enters `context`, or returns `None` if it refuses.
	pub fn enter(context: &'a dyn ScriptContext) -> Option<Self> {
		context.enter().then_some(Self { context })
	}
}

impl Drop for ContextGuard<'_> {
	fn drop(&mut self) {
		self.context.exit();
	}
}
