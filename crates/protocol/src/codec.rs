//! Reference-preserving codec for [`StructuredValue`].
//!
//! The wire form is UTF-8 JSON. Every string carries a one-character type
//! marker so dates and binary survive the trip, and every list or dictionary
//! is tagged with `$id` on first sight and replaced by `{"$ref": id}` after
//! that. Lists are wrapped as `{"$id": n, "$values": [...]}`.

use std::collections::HashMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use serde_json::{Map, Value as JsonValue};

use crate::error::{Error, Result};
use crate::value::{Graph, Node, NodeId, StructuredValue, Value};

pub const ID_PROPERTY: &str = "$id";
pub const REF_PROPERTY: &str = "$ref";
pub const VALUES_PROPERTY: &str = "$values";

pub const STRING_MARKER: char = 'S';
pub const DATE_MARKER: char = 'D';
pub const BINARY_MARKER: char = 'B';

/// Deepest JSON container nesting [`decode`] accepts (serde_json's parser limit).
/// A wrapped list counts twice: its object and its `$values` array.
pub const MAX_NESTING: usize = 127;

fn is_reserved(key: &str) -> bool {
	matches!(key, ID_PROPERTY | REF_PROPERTY | VALUES_PROPERTY)
}

/// Encoder switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodeOptions {
	/// Emit an outermost list as a plain JSON array. Its id is still consumed.
	pub bare_root_array: bool,
}

impl EncodeOptions {
	pub fn bare_root_array() -> Self {
		Self {
			bare_root_array: true,
		}
	}
}

/// Encodes a structured value to UTF-8 JSON bytes.
pub fn encode(value: &StructuredValue, options: EncodeOptions) -> Result<Vec<u8>> {
	let mut encoder = Encoder {
		graph: value.graph(),
		ids: HashMap::new(),
		next_id: 1,
		depth: 0,
		options,
	};
	let json = encoder.value(value.root(), true)?;
	serde_json::to_vec(&json).map_err(|e| Error::serialization(e.to_string()))
}

/// Decodes bytes produced by [`encode`]. Empty input is null.
pub fn decode(bytes: &[u8]) -> Result<StructuredValue> {
	if bytes.iter().all(u8::is_ascii_whitespace) {
		return Ok(StructuredValue::null());
	}
	let json: JsonValue =
		serde_json::from_slice(bytes).map_err(|e| Error::serialization(format!("malformed payload: {e}")))?;

	let mut decoder = Decoder::default();
	let root = decoder.value(&json)?;
	if !decoder.pending.is_empty() {
		let mut unresolved: Vec<&String> = decoder.pending.keys().collect();
		unresolved.sort();
		tracing::debug!(?unresolved, "unresolved back-references left as empty placeholders");
	}
	Ok(StructuredValue::new(decoder.graph, root))
}

struct Encoder<'a> {
	graph: &'a Graph,
	ids: HashMap<NodeId, String>,
	next_id: usize,
	depth: usize,
	options: EncodeOptions,
}

impl<'a> Encoder<'a> {
	/// Opens `levels` JSON containers, failing past [`MAX_NESTING`].
	fn enter(&mut self, levels: usize) -> Result<()> {
		let depth = self.depth + levels;
		if depth > MAX_NESTING {
			return Err(Error::serialization(format!(
				"value nests deeper than {MAX_NESTING} levels"
			)));
		}
		self.depth = depth;
		Ok(())
	}

	fn value(&mut self, value: &Value, is_root: bool) -> Result<JsonValue> {
		Ok(match value {
			Value::Null => JsonValue::Null,
			Value::Bool(b) => JsonValue::Bool(*b),
			Value::Int(i) => JsonValue::from(*i),
			Value::Double(d) => match serde_json::Number::from_f64(*d) {
				Some(n) => JsonValue::Number(n),
				None => JsonValue::Null,
			},
			Value::String(s) => JsonValue::String(format!("{STRING_MARKER}{s}")),
			Value::DateTime(dt) => JsonValue::String(format!(
				"{DATE_MARKER}{}",
				dt.to_rfc3339_opts(SecondsFormat::Millis, true)
			)),
			Value::Binary(bytes) => JsonValue::String(format!("{BINARY_MARKER}{}", STANDARD.encode(bytes))),
			Value::Node(id) => self.node(*id, is_root)?,
		})
	}

	fn node(&mut self, id: NodeId, is_root: bool) -> Result<JsonValue> {
		if let Some(existing) = self.ids.get(&id) {
			if self.depth >= MAX_NESTING {
				return Err(Error::serialization(format!(
					"value nests deeper than {MAX_NESTING} levels"
				)));
			}
			let mut map = Map::with_capacity(1);
			map.insert(REF_PROPERTY.to_string(), JsonValue::String(existing.clone()));
			return Ok(JsonValue::Object(map));
		}

		let assigned = self.next_id.to_string();
		self.next_id += 1;
		self.ids.insert(id, assigned.clone());

		let graph = self.graph;
		let node = graph
			.node(id)
			.ok_or_else(|| Error::serialization(format!("dangling node reference {}", id.index())))?;

		match node {
			Node::List(items) => {
				let bare = is_root && self.options.bare_root_array;
				let levels = if bare { 1 } else { 2 };
				self.enter(levels)?;
				let values = items
					.iter()
					.map(|item| self.value(item, false))
					.collect::<Result<Vec<_>>>();
				self.depth -= levels;
				let values = values?;
				if bare {
					return Ok(JsonValue::Array(values));
				}
				let mut map = Map::with_capacity(2);
				map.insert(ID_PROPERTY.to_string(), JsonValue::String(assigned));
				map.insert(VALUES_PROPERTY.to_string(), JsonValue::Array(values));
				Ok(JsonValue::Object(map))
			}
			Node::Dict(entries) => {
				self.enter(1)?;
				let mut map = Map::with_capacity(entries.len() + 1);
				map.insert(ID_PROPERTY.to_string(), JsonValue::String(assigned));
				let mut failed = None;
				for (key, item) in entries {
					if is_reserved(key) {
						tracing::warn!(key = %key, "dropping dictionary entry with reserved key");
						continue;
					}
					match self.value(item, false) {
						Ok(json) => {
							map.insert(key.clone(), json);
						}
						Err(err) => {
							failed = Some(err);
							break;
						}
					}
				}
				self.depth -= 1;
				match failed {
					Some(err) => Err(err),
					None => Ok(JsonValue::Object(map)),
				}
			}
		}
	}
}

#[derive(Default)]
struct Decoder {
	graph: Graph,
	refs: HashMap<String, NodeId>,
	pending: HashMap<String, NodeId>,
}

impl Decoder {
	fn value(&mut self, json: &JsonValue) -> Result<Value> {
		Ok(match json {
			JsonValue::Null => Value::Null,
			JsonValue::Bool(b) => Value::Bool(*b),
			JsonValue::Number(n) => match n.as_i64() {
				Some(i) => Value::Int(i),
				None => Value::Double(
					n.as_f64()
						.ok_or_else(|| Error::serialization(format!("unrepresentable number {n}")))?,
				),
			},
			JsonValue::String(s) => decode_string(s)?,
			JsonValue::Array(items) => {
				let items = items.iter().map(|item| self.value(item)).collect::<Result<Vec<_>>>()?;
				Value::Node(self.graph.alloc(Node::List(items)))
			}
			JsonValue::Object(map) => self.object(map)?,
		})
	}

	fn object(&mut self, map: &Map<String, JsonValue>) -> Result<Value> {
		if let Some(reference) = map.get(REF_PROPERTY) {
			let key = id_text(reference)?;
			if let Some(id) = self.refs.get(&key) {
				return Ok(Value::Node(*id));
			}
			if let Some(id) = self.pending.get(&key) {
				return Ok(Value::Node(*id));
			}
			let placeholder = self.graph.alloc(Node::Dict(IndexMap::new()));
			self.pending.insert(key, placeholder);
			return Ok(Value::Node(placeholder));
		}

		let Some(id_value) = map.get(ID_PROPERTY) else {
			let mut entries = IndexMap::with_capacity(map.len());
			for (key, item) in map {
				entries.insert(key.clone(), self.value(item)?);
			}
			return Ok(Value::Node(self.graph.alloc(Node::Dict(entries))));
		};

		let key = id_text(id_value)?;
		if self.refs.contains_key(&key) {
			return Err(Error::serialization(format!("duplicate {ID_PROPERTY} '{key}'")));
		}
		let id = match self.pending.remove(&key) {
			Some(placeholder) => placeholder,
			None => self.graph.alloc(Node::Dict(IndexMap::new())),
		};
		self.refs.insert(key, id);

		let node = match map.get(VALUES_PROPERTY) {
			Some(JsonValue::Array(items)) => {
				Node::List(items.iter().map(|item| self.value(item)).collect::<Result<Vec<_>>>()?)
			}
			Some(other) => {
				return Err(Error::serialization(format!(
					"{VALUES_PROPERTY} must be an array, found {other}"
				)));
			}
			None => {
				let mut entries = IndexMap::with_capacity(map.len().saturating_sub(1));
				for (key, item) in map {
					if key == ID_PROPERTY {
						continue;
					}
					entries.insert(key.clone(), self.value(item)?);
				}
				Node::Dict(entries)
			}
		};
		self.graph.replace(id, node);
		Ok(Value::Node(id))
	}
}

fn id_text(value: &JsonValue) -> Result<String> {
	match value {
		JsonValue::String(s) => Ok(s.clone()),
		JsonValue::Number(n) => Ok(n.to_string()),
		other => Err(Error::serialization(format!("invalid reference id {other}"))),
	}
}

fn decode_string(raw: &str) -> Result<Value> {
	let mut chars = raw.chars();
	let marker = chars.next();
	let payload = chars.as_str();
	match marker {
		Some(STRING_MARKER) => Ok(Value::String(payload.to_string())),
		Some(DATE_MARKER) => DateTime::parse_from_rfc3339(payload)
			.map(|dt| Value::DateTime(dt.with_timezone(&Utc)))
			.map_err(|e| Error::serialization(format!("invalid date '{payload}': {e}"))),
		Some(BINARY_MARKER) => STANDARD
			.decode(payload)
			.map(Value::Binary)
			.map_err(|e| Error::serialization(format!("invalid binary payload: {e}"))),
		_ => Ok(Value::String(raw.to_string())),
	}
}
