//! Native objects callable from script.
//!
//! A bound object exposes a method table and a single asynchronous `invoke`
//! entry point. [`ObjectBinding`] is a ready-made implementation backed by a
//! member-name dispatch table.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use cefbridge_protocol::{MethodInfo, StructuredValue};
use downcast_rs::{DowncastSync, impl_downcast};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use indexmap::IndexMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Failure raised by a bound member. Sent back to script as the exception text.
#[derive(Debug, Error)]
pub enum InvokeError {
	#[error("unknown member '{0}'")]
	UnknownMember(String),

	#[error("{0}")]
	Exception(String),
}

impl InvokeError {
	pub fn exception(msg: impl Into<String>) -> Self {
		InvokeError::Exception(msg.into())
	}
}

impl From<cefbridge_protocol::Error> for InvokeError {
	fn from(err: cefbridge_protocol::Error) -> Self {
		InvokeError::Exception(err.to_string())
	}
}

impl From<cefbridge_runtime::Error> for InvokeError {
	fn from(err: cefbridge_runtime::Error) -> Self {
		InvokeError::Exception(err.to_string())
	}
}

/// Result type of a bound member.
pub type InvokeResult = std::result::Result<StructuredValue, InvokeError>;

/// Wraps every member invocation of one registered object.
///
/// Receives the member name and the pending invocation and returns the future
/// awaited in its place, e.g. to run the call on a particular executor or to
/// translate its errors.
pub type MethodInterceptor = Arc<
	dyn Fn(&str, BoxFuture<'static, InvokeResult>) -> BoxFuture<'static, InvokeResult> + Send + Sync,
>;

/// Converts a native return value.
pub fn to_value<T: Serialize + ?Sized>(value: &T) -> InvokeResult {
	Ok(StructuredValue::from_serialize(value)?)
}

/// Arguments of one call, as decoded from the script side.
#[derive(Debug, Clone, Default)]
pub struct CallArguments {
	list: StructuredValue,
}

impl CallArguments {
	/// Wraps a decoded argument list. A null root means no arguments.
	pub fn new(list: StructuredValue) -> Self {
		Self { list }
	}

	pub fn len(&self) -> usize {
		self.list.list_len().unwrap_or(0)
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Argument `index` as a structured value.
	pub fn value(&self, index: usize) -> Option<StructuredValue> {
		self.list.list_item_value(index)
	}

	/// Argument `index` converted to `T`. A missing argument converts from null,
	/// so `Option<T>` parameters may be omitted.
	pub fn get<T: DeserializeOwned>(&self, index: usize) -> Result<T, InvokeError> {
		let value = self.value(index).unwrap_or_default();
		value
			.deserialize()
			.map_err(|e| InvokeError::Exception(format!("argument {index}: {e}")))
	}

	pub fn as_structured(&self) -> &StructuredValue {
		&self.list
	}
}

/// A native object exposed to script under a name.
#[async_trait]
pub trait BoundObject: DowncastSync {
	/// Members callable from script, with their declared parameter counts.
	fn methods(&self) -> Vec<MethodInfo>;

	/// Runs `member`. Unknown members fail with [`InvokeError::UnknownMember`].
	async fn invoke(&self, member: &str, args: CallArguments) -> InvokeResult;
}

impl_downcast!(sync BoundObject);

type MethodFn = Arc<dyn Fn(CallArguments) -> BoxFuture<'static, InvokeResult> + Send + Sync>;

struct MethodEntry {
	parameter_count: i32,
	call: MethodFn,
}

/// Dispatch-table bound object.
///
/// ```ignore
/// let calc = ObjectBinding::new()
///     .sync_method("add", 2, |args| to_value(&(args.get::<i64>(0)? + args.get::<i64>(1)?)));
/// ```
#[derive(Default)]
pub struct ObjectBinding {
	methods: IndexMap<String, MethodEntry>,
}

impl ObjectBinding {
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds an asynchronous member. A later member with the same name replaces it.
	pub fn method<F, Fut>(mut self, name: impl Into<String>, parameter_count: i32, f: F) -> Self
	where
		F: Fn(CallArguments) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = InvokeResult> + Send + 'static,
	{
		let call: MethodFn = Arc::new(move |args| f(args).boxed());
		self.methods.insert(
			name.into(),
			MethodEntry {
				parameter_count,
				call,
			},
		);
		self
	}

	/// Adds a synchronous member.
	pub fn sync_method<F>(self, name: impl Into<String>, parameter_count: i32, f: F) -> Self
	where
		F: Fn(CallArguments) -> InvokeResult + Send + Sync + 'static,
	{
		let f = Arc::new(f);
		self.method(name, parameter_count, move |args| {
			let f = Arc::clone(&f);
			async move { f(args) }
		})
	}

	pub fn len(&self) -> usize {
		self.methods.len()
	}

	pub fn is_empty(&self) -> bool {
		self.methods.is_empty()
	}
}

#[async_trait]
impl BoundObject for ObjectBinding {
	fn methods(&self) -> Vec<MethodInfo> {
		self.methods
			.iter()
			.map(|(name, entry)| MethodInfo::new(name.as_str(), entry.parameter_count))
			.collect()
	}

	async fn invoke(&self, member: &str, args: CallArguments) -> InvokeResult {
		let call = match self.methods.get(member) {
			Some(entry) => Arc::clone(&entry.call),
			None => return Err(InvokeError::UnknownMember(member.to_string())),
		};
		call(args).await
	}
}
