//! Structured values exchanged between the browser and renderer processes.
//!
//! Scalars are stored inline in [`Value`]. Lists and dictionaries are
//! reference types: they live in a [`Graph`] arena and are addressed by
//! [`NodeId`], so shared sub-objects and cycles are plain id reuse.

use std::collections::HashSet;

use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};

/// Stable identity of a list or dictionary inside a [`Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
	pub fn index(self) -> usize {
		self.0
	}
}

/// A single slot in a structured value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
	Null,
	Bool(bool),
	Int(i64),
	Double(f64),
	String(String),
	DateTime(DateTime<Utc>),
	Binary(Vec<u8>),
	/// Reference to a list or dictionary in the owning [`Graph`].
	Node(NodeId),
}

impl Value {
	pub fn is_null(&self) -> bool {
		matches!(self, Value::Null)
	}

	pub fn as_bool(&self) -> Option<bool> {
		match self {
			Value::Bool(b) => Some(*b),
			_ => None,
		}
	}

	pub fn as_i64(&self) -> Option<i64> {
		match self {
			Value::Int(i) => Some(*i),
			_ => None,
		}
	}

	/// Numeric view; integers widen to `f64`.
	pub fn as_f64(&self) -> Option<f64> {
		match self {
			Value::Int(i) => Some(*i as f64),
			Value::Double(d) => Some(*d),
			_ => None,
		}
	}

	pub fn as_str(&self) -> Option<&str> {
		match self {
			Value::String(s) => Some(s),
			_ => None,
		}
	}

	pub fn as_node(&self) -> Option<NodeId> {
		match self {
			Value::Node(id) => Some(*id),
			_ => None,
		}
	}

	/// Short type label used in diagnostics.
	pub fn type_name(&self) -> &'static str {
		match self {
			Value::Null => "null",
			Value::Bool(_) => "boolean",
			Value::Int(_) => "integer",
			Value::Double(_) => "double",
			Value::String(_) => "string",
			Value::DateTime(_) => "date",
			Value::Binary(_) => "binary",
			Value::Node(_) => "object",
		}
	}
}

impl From<bool> for Value {
	fn from(v: bool) -> Self {
		Value::Bool(v)
	}
}

impl From<i32> for Value {
	fn from(v: i32) -> Self {
		Value::Int(v.into())
	}
}

impl From<i64> for Value {
	fn from(v: i64) -> Self {
		Value::Int(v)
	}
}

impl From<f64> for Value {
	fn from(v: f64) -> Self {
		Value::Double(v)
	}
}

impl From<&str> for Value {
	fn from(v: &str) -> Self {
		Value::String(v.to_string())
	}
}

impl From<String> for Value {
	fn from(v: String) -> Self {
		Value::String(v)
	}
}

impl From<DateTime<Utc>> for Value {
	fn from(v: DateTime<Utc>) -> Self {
		Value::DateTime(v)
	}
}

impl From<Vec<u8>> for Value {
	fn from(v: Vec<u8>) -> Self {
		Value::Binary(v)
	}
}

/// A reference-typed value.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
	List(Vec<Value>),
	/// Dictionary entries in insertion order.
	Dict(IndexMap<String, Value>),
}

/// Arena owning every list and dictionary of one structured value.
#[derive(Debug, Clone, Default)]
pub struct Graph {
	nodes: Vec<Node>,
}

impl Graph {
	pub fn new() -> Self {
		Self::default()
	}

	/// Allocates a list node and returns a reference to it.
	pub fn list(&mut self, items: impl IntoIterator<Item = Value>) -> Value {
		Value::Node(self.alloc(Node::List(items.into_iter().collect())))
	}

	/// Allocates a dictionary node and returns a reference to it.
	pub fn dict<K: Into<String>>(&mut self, entries: impl IntoIterator<Item = (K, Value)>) -> Value {
		let map = entries.into_iter().map(|(k, v)| (k.into(), v)).collect();
		Value::Node(self.alloc(Node::Dict(map)))
	}

	pub fn node(&self, id: NodeId) -> Option<&Node> {
		self.nodes.get(id.0)
	}

	pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
		self.nodes.get_mut(id.0)
	}

	/// Appends to a list node.
	pub fn push(&mut self, list: NodeId, value: Value) -> Result<()> {
		match self.node_mut(list) {
			Some(Node::List(items)) => {
				items.push(value);
				Ok(())
			}
			_ => Err(Error::conversion(format!("node {} is not a list", list.0))),
		}
	}

	/// Inserts into a dictionary node, returning the previous value for `key`.
	pub fn insert(&mut self, dict: NodeId, key: impl Into<String>, value: Value) -> Result<Option<Value>> {
		match self.node_mut(dict) {
			Some(Node::Dict(map)) => Ok(map.insert(key.into(), value)),
			_ => Err(Error::conversion(format!("node {} is not a dictionary", dict.0))),
		}
	}

	pub fn len(&self) -> usize {
		self.nodes.len()
	}

	pub fn is_empty(&self) -> bool {
		self.nodes.is_empty()
	}

	pub(crate) fn alloc(&mut self, node: Node) -> NodeId {
		self.nodes.push(node);
		NodeId(self.nodes.len() - 1)
	}

	pub(crate) fn replace(&mut self, id: NodeId, node: Node) {
		if let Some(slot) = self.nodes.get_mut(id.0) {
			*slot = node;
		}
	}
}

/// A root value together with the graph its references point into.
#[derive(Debug, Clone)]
pub struct StructuredValue {
	graph: Graph,
	root: Value,
}

impl Default for StructuredValue {
	fn default() -> Self {
		Self::null()
	}
}

impl From<Value> for StructuredValue {
	/// Wraps a scalar. A [`Value::Node`] would dangle in the empty graph.
	fn from(root: Value) -> Self {
		Self::new(Graph::new(), root)
	}
}

impl StructuredValue {
	pub fn new(graph: Graph, root: Value) -> Self {
		Self { graph, root }
	}

	pub fn null() -> Self {
		Self::new(Graph::new(), Value::Null)
	}

	pub fn root(&self) -> &Value {
		&self.root
	}

	pub fn graph(&self) -> &Graph {
		&self.graph
	}

	pub fn graph_mut(&mut self) -> &mut Graph {
		&mut self.graph
	}

	pub fn into_parts(self) -> (Graph, Value) {
		(self.graph, self.root)
	}

	/// Resolves the root to a node, if it is one.
	pub fn root_node(&self) -> Option<&Node> {
		self.root.as_node().and_then(|id| self.graph.node(id))
	}

	/// Length of the root list, `None` if the root is not a list.
	pub fn list_len(&self) -> Option<usize> {
		match self.root_node()? {
			Node::List(items) => Some(items.len()),
			Node::Dict(_) => None,
		}
	}

	/// Item `index` of the root list.
	pub fn list_item(&self, index: usize) -> Option<&Value> {
		match self.root_node()? {
			Node::List(items) => items.get(index),
			Node::Dict(_) => None,
		}
	}

	/// Entry `key` of the root dictionary.
	pub fn dict_get(&self, key: &str) -> Option<&Value> {
		match self.root_node()? {
			Node::Dict(map) => map.get(key),
			Node::List(_) => None,
		}
	}

	/// Extracts item `index` of the root list as its own structured value.
	///
	/// The graph is cloned so nested references stay valid.
	pub fn list_item_value(&self, index: usize) -> Option<StructuredValue> {
		self.list_item(index)
			.map(|v| StructuredValue::new(self.graph.clone(), v.clone()))
	}

	/// Builds a tree-shaped value from JSON. Numbers that fit `i64` become integers.
	pub fn from_json(json: &JsonValue) -> Self {
		let mut graph = Graph::new();
		let root = json_to_value(&mut graph, json);
		Self::new(graph, root)
	}

	/// Flattens to JSON. Dates become RFC 3339 strings and binary becomes a
	/// byte array. Shared nodes are duplicated; a cycle is an error.
	pub fn to_json(&self) -> Result<JsonValue> {
		let mut visiting = HashSet::new();
		value_to_json(&self.graph, &self.root, &mut visiting)
	}

	/// Converts any serializable native value.
	pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
		let json = serde_json::to_value(value).map_err(|e| Error::conversion(e.to_string()))?;
		Ok(Self::from_json(&json))
	}

	/// Converts to a native type.
	pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
		let json = self.to_json()?;
		serde_json::from_value(json).map_err(|e| Error::conversion(e.to_string()))
	}
}

fn json_to_value(graph: &mut Graph, json: &JsonValue) -> Value {
	match json {
		JsonValue::Null => Value::Null,
		JsonValue::Bool(b) => Value::Bool(*b),
		JsonValue::Number(n) => match n.as_i64() {
			Some(i) => Value::Int(i),
			None => Value::Double(n.as_f64().unwrap_or(f64::NAN)),
		},
		JsonValue::String(s) => Value::String(s.clone()),
		JsonValue::Array(items) => {
			let items: Vec<Value> = items.iter().map(|item| json_to_value(graph, item)).collect();
			graph.list(items)
		}
		JsonValue::Object(map) => {
			let entries: Vec<(String, Value)> = map
				.iter()
				.map(|(k, v)| (k.clone(), json_to_value(graph, v)))
				.collect();
			graph.dict(entries)
		}
	}
}

fn value_to_json(graph: &Graph, value: &Value, visiting: &mut HashSet<NodeId>) -> Result<JsonValue> {
	Ok(match value {
		Value::Null => JsonValue::Null,
		Value::Bool(b) => JsonValue::Bool(*b),
		Value::Int(i) => JsonValue::from(*i),
		Value::Double(d) => serde_json::Number::from_f64(*d)
			.map(JsonValue::Number)
			.unwrap_or(JsonValue::Null),
		Value::String(s) => JsonValue::String(s.clone()),
		Value::DateTime(dt) => JsonValue::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
		Value::Binary(bytes) => JsonValue::Array(bytes.iter().map(|b| JsonValue::from(*b)).collect()),
		Value::Node(id) => {
			if !visiting.insert(*id) {
				return Err(Error::conversion("cyclic value cannot be converted to a native type"));
			}
			let node = graph
				.node(*id)
				.ok_or_else(|| Error::conversion(format!("dangling node reference {}", id.0)))?;
			let json = match node {
				Node::List(items) => JsonValue::Array(
					items
						.iter()
						.map(|item| value_to_json(graph, item, visiting))
						.collect::<Result<_>>()?,
				),
				Node::Dict(map) => {
					let mut out = serde_json::Map::with_capacity(map.len());
					for (k, v) in map {
						out.insert(k.clone(), value_to_json(graph, v, visiting)?);
					}
					JsonValue::Object(out)
				}
			};
			visiting.remove(id);
			json
		}
	})
}

impl PartialEq for StructuredValue {
	/// Structural equality; node pairs already under comparison are assumed equal.
	fn eq(&self, other: &Self) -> bool {
		let mut assumed = HashSet::new();
		values_eq(&self.graph, &self.root, &other.graph, &other.root, &mut assumed)
	}
}

fn values_eq(
	lg: &Graph,
	left: &Value,
	rg: &Graph,
	right: &Value,
	assumed: &mut HashSet<(NodeId, NodeId)>,
) -> bool {
	match (left, right) {
		(Value::Node(l), Value::Node(r)) => {
			if !assumed.insert((*l, *r)) {
				return true;
			}
			match (lg.node(*l), rg.node(*r)) {
				(Some(Node::List(a)), Some(Node::List(b))) => {
					a.len() == b.len()
						&& a.iter().zip(b).all(|(x, y)| values_eq(lg, x, rg, y, assumed))
				}
				(Some(Node::Dict(a)), Some(Node::Dict(b))) => {
					a.len() == b.len()
						&& a.iter().all(|(k, x)| {
							b.get(k).is_some_and(|y| values_eq(lg, x, rg, y, assumed))
						})
				}
				_ => false,
			}
		}
		(l, r) => l == r,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde::Deserialize;
	use serde_json::json;

	#[derive(Debug, Serialize, Deserialize, PartialEq)]
	struct Point {
		x: i32,
		y: i32,
		label: String,
	}

	#[test]
	fn test_native_conversion() {
		let point = Point {
			x: 1,
			y: -2,
			label: "origin".into(),
		};
		let value = StructuredValue::from_serialize(&point).unwrap();
		assert_eq!(value.dict_get("x"), Some(&Value::Int(1)));
		assert_eq!(value.deserialize::<Point>().unwrap(), point);
	}

	#[test]
	fn test_conversion_shape_mismatch() {
		let value = StructuredValue::from(Value::from("two"));
		let err = value.deserialize::<i32>().unwrap_err();
		assert!(matches!(err, Error::TypeConversion(_)));
	}

	#[test]
	fn test_cycle_is_conversion_error() {
		let mut graph = Graph::new();
		let root = graph.dict(Vec::<(String, Value)>::new());
		let id = root.as_node().unwrap();
		graph.insert(id, "self", root.clone()).unwrap();
		let value = StructuredValue::new(graph, root);

		assert!(matches!(value.to_json(), Err(Error::TypeConversion(_))));
	}

	#[test]
	fn test_shared_node_flattens_twice() {
		let mut graph = Graph::new();
		let shared = graph.dict([("n", Value::Int(7))]);
		let root = graph.list([shared.clone(), shared]);
		let value = StructuredValue::new(graph, root);

		assert_eq!(value.to_json().unwrap(), json!([{"n": 7}, {"n": 7}]));
	}

	#[test]
	fn test_dates_and_binary_flatten() {
		let date = DateTime::parse_from_rfc3339("2021-06-01T12:00:00Z")
			.unwrap()
			.with_timezone(&Utc);
		let mut graph = Graph::new();
		let root = graph.list([Value::DateTime(date), Value::Binary(vec![1, 2])]);
		let value = StructuredValue::new(graph, root);

		assert_eq!(value.to_json().unwrap(), json!(["2021-06-01T12:00:00.000Z", [1, 2]]));
	}

	#[test]
	fn test_structural_equality_across_graphs() {
		let a = StructuredValue::from_json(&json!({"a": [1, 2.5, "x"], "b": null}));
		let mut graph = Graph::new();
		let list = graph.list([Value::Int(1), Value::Double(2.5), Value::from("x")]);
		let root = graph.dict([("a", list), ("b", Value::Null)]);
		let b = StructuredValue::new(graph, root);

		assert_eq!(a, b);
		assert_ne!(a, StructuredValue::from_json(&json!({"a": [1], "b": null})));
	}

	#[test]
	fn test_structural_equality_terminates_on_cycles() {
		let build = || {
			let mut graph = Graph::new();
			let root = graph.list(Vec::new());
			let id = root.as_node().unwrap();
			graph.push(id, root.clone()).unwrap();
			StructuredValue::new(graph, root)
		};
		assert_eq!(build(), build());
	}

	#[test]
	fn test_push_rejects_dictionary() {
		let mut graph = Graph::new();
		let dict = graph.dict(Vec::<(String, Value)>::new());
		assert!(graph.push(dict.as_node().unwrap(), Value::Null).is_err());
	}
}
