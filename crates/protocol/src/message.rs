//! Opaque process-message carrier.
//!
//! Models the engine's named message with a positional argument list. Slots
//! are typed; reading a slot as the wrong type is a protocol error.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Peer process of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProcessId {
	Browser,
	Renderer,
}

impl ProcessId {
	/// The process on the other end of the channel.
	pub fn peer(self) -> Self {
		match self {
			ProcessId::Browser => ProcessId::Renderer,
			ProcessId::Renderer => ProcessId::Browser,
		}
	}
}

impl std::fmt::Display for ProcessId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			ProcessId::Browser => f.write_str("browser"),
			ProcessId::Renderer => f.write_str("renderer"),
		}
	}
}

/// One argument slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum ArgValue {
	Null,
	Bool(bool),
	Int(i32),
	Double(f64),
	String(String),
	Binary(#[serde(with = "base64_bytes")] Vec<u8>),
	List(ListValue),
	Dictionary(IndexMap<String, ArgValue>),
	/// A slot type this side does not model. Reads as null.
	Unknown,
}

impl ArgValue {
	fn type_name(&self) -> &'static str {
		match self {
			ArgValue::Null => "null",
			ArgValue::Bool(_) => "bool",
			ArgValue::Int(_) => "int",
			ArgValue::Double(_) => "double",
			ArgValue::String(_) => "string",
			ArgValue::Binary(_) => "binary",
			ArgValue::List(_) => "list",
			ArgValue::Dictionary(_) => "dictionary",
			ArgValue::Unknown => "unknown",
		}
	}

	fn is_nullish(&self) -> bool {
		matches!(self, ArgValue::Null | ArgValue::Unknown)
	}
}

/// Ordered argument list of a [`ProcessMessage`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListValue(Vec<ArgValue>);

impl ListValue {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn get(&self, index: usize) -> Option<&ArgValue> {
		self.0.get(index)
	}

	pub fn iter(&self) -> impl Iterator<Item = &ArgValue> {
		self.0.iter()
	}

	/// Writes slot `index`, padding any gap with nulls.
	pub fn set(&mut self, index: usize, value: ArgValue) {
		if index >= self.0.len() {
			self.0.resize(index + 1, ArgValue::Null);
		}
		self.0[index] = value;
	}

	pub fn set_null(&mut self, index: usize) {
		self.set(index, ArgValue::Null);
	}

	pub fn set_bool(&mut self, index: usize, value: bool) {
		self.set(index, ArgValue::Bool(value));
	}

	pub fn set_int(&mut self, index: usize, value: i32) {
		self.set(index, ArgValue::Int(value));
	}

	pub fn set_double(&mut self, index: usize, value: f64) {
		self.set(index, ArgValue::Double(value));
	}

	pub fn set_string(&mut self, index: usize, value: impl Into<String>) {
		self.set(index, ArgValue::String(value.into()));
	}

	/// Writes a binary slot. The engine cannot carry empty blobs, so empty
	/// input is written as null and read back as empty.
	pub fn set_byte_array(&mut self, index: usize, value: Vec<u8>) {
		if value.is_empty() {
			self.set_null(index);
		} else {
			self.set(index, ArgValue::Binary(value));
		}
	}

	pub fn set_list(&mut self, index: usize, value: ListValue) {
		self.set(index, ArgValue::List(value));
	}

	pub fn set_dictionary(&mut self, index: usize, value: IndexMap<String, ArgValue>) {
		self.set(index, ArgValue::Dictionary(value));
	}

	/// True for null, unknown and missing slots.
	pub fn is_null(&self, index: usize) -> bool {
		self.0.get(index).is_none_or(ArgValue::is_nullish)
	}

	fn slot(&self, index: usize) -> Result<&ArgValue> {
		self.0
			.get(index)
			.ok_or_else(|| Error::protocol(format!("missing argument {index} (have {})", self.0.len())))
	}

	fn mismatch(&self, index: usize, expected: &str) -> Error {
		let found = self.0.get(index).map_or("nothing", ArgValue::type_name);
		Error::protocol(format!("argument {index}: expected {expected}, found {found}"))
	}

	pub fn get_bool(&self, index: usize) -> Result<bool> {
		match self.slot(index)? {
			ArgValue::Bool(b) => Ok(*b),
			_ => Err(self.mismatch(index, "bool")),
		}
	}

	pub fn get_int(&self, index: usize) -> Result<i32> {
		match self.slot(index)? {
			ArgValue::Int(i) => Ok(*i),
			_ => Err(self.mismatch(index, "int")),
		}
	}

	pub fn get_double(&self, index: usize) -> Result<f64> {
		match self.slot(index)? {
			ArgValue::Double(d) => Ok(*d),
			ArgValue::Int(i) => Ok(f64::from(*i)),
			_ => Err(self.mismatch(index, "double")),
		}
	}

	pub fn get_string(&self, index: usize) -> Result<&str> {
		match self.slot(index)? {
			ArgValue::String(s) => Ok(s),
			_ => Err(self.mismatch(index, "string")),
		}
	}

	/// Like [`get_string`](Self::get_string), but null slots read as `None`.
	pub fn get_opt_string(&self, index: usize) -> Result<Option<&str>> {
		if self.is_null(index) {
			return Ok(None);
		}
		self.get_string(index).map(Some)
	}

	/// Binary slot; null reads as empty.
	pub fn get_byte_array(&self, index: usize) -> Result<Vec<u8>> {
		match self.slot(index)? {
			ArgValue::Binary(bytes) => Ok(bytes.clone()),
			v if v.is_nullish() => Ok(Vec::new()),
			_ => Err(self.mismatch(index, "binary")),
		}
	}

	pub fn get_list(&self, index: usize) -> Result<&ListValue> {
		match self.slot(index)? {
			ArgValue::List(list) => Ok(list),
			_ => Err(self.mismatch(index, "list")),
		}
	}

	pub fn get_dictionary(&self, index: usize) -> Result<&IndexMap<String, ArgValue>> {
		match self.slot(index)? {
			ArgValue::Dictionary(map) => Ok(map),
			_ => Err(self.mismatch(index, "dictionary")),
		}
	}
}

impl FromIterator<ArgValue> for ListValue {
	fn from_iter<I: IntoIterator<Item = ArgValue>>(iter: I) -> Self {
		Self(iter.into_iter().collect())
	}
}

/// A named message with positional arguments, as carried by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessMessage {
	pub name: String,
	pub arguments: ListValue,
}

impl ProcessMessage {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			arguments: ListValue::new(),
		}
	}
}

mod base64_bytes {
	use base64::Engine as _;
	use base64::engine::general_purpose::STANDARD;
	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&STANDARD.encode(bytes))
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
		let text = String::deserialize(deserializer)?;
		STANDARD.decode(text).map_err(serde::de::Error::custom)
	}
}
