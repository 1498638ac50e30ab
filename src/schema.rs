//! Row and node types shared by the synthesis pipeline.
//!
//! Rows come out of the query collaborator as ordered column/value pairs;
//! nodes go into the node store as JSON-shaped records.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use sha2::{Digest, Sha256};

use crate::config::QueryConfig;

/// A single column value as returned by the database.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Json(JsonValue),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Canonical string form used when a value becomes part of a node id.
    pub fn to_key_string(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Text(s) => s.clone(),
            Value::Bytes(b) => BASE64.encode(b),
            Value::Json(v) => v.to_string(),
        }
    }

    /// Strict key equality for foreign-key matching.
    ///
    /// Numbers compare by value across `Int`/`Float`; everything else must
    /// match variant and content. `Null` never matches anything.
    pub fn matches_key(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => false,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => (*a as f64) == *b,
            (a, b) => a == b,
        }
    }

    /// JSON rendering for node fields. Binary columns become base64 strings.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Int(i) => JsonValue::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::Text(s) => JsonValue::String(s.clone()),
            Value::Bytes(b) => JsonValue::String(BASE64.encode(b)),
            Value::Json(v) => v.clone(),
        }
    }
}

impl From<JsonValue> for Value {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or_default()),
            },
            JsonValue::String(s) => Value::Text(s),
            other => Value::Json(other),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

/// One database row: column name → value, in column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(column, value);
        self
    }

    /// Insert or replace a column, keeping its original position on replace.
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        let column = column.into();
        let value = value.into();
        match self.columns.iter_mut().find(|(name, _)| *name == column) {
            Some(slot) => slot.1 = value,
            None => self.columns.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.get(column).is_some()
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Build a row from a JSON object. Returns `None` for anything else.
    pub fn from_json(value: JsonValue) -> Option<Self> {
        match value {
            JsonValue::Object(map) => Some(map.into_iter().collect()),
            _ => None,
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (column, value) in iter {
            row.insert(column, value);
        }
        row
    }
}

/// A materialized query result plus the entity declaration it was run for.
#[derive(Debug, Clone)]
pub struct ResultSet {
    pub query: QueryConfig,
    pub rows: Vec<Row>,
}

impl ResultSet {
    pub fn new(query: QueryConfig, rows: Vec<Row>) -> Self {
        Self { query, rows }
    }

    pub fn name(&self) -> &str {
        &self.query.name
    }
}

/// Node bookkeeping consumed by the graph store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInternal {
    #[serde(rename = "type")]
    pub node_type: String,
    pub content_digest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
}

/// A synthesized graph node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub parent: Option<String>,
    #[serde(default)]
    pub children: Vec<String>,
    pub internal: NodeInternal,
    /// Row data plus link fields, in assembly order.
    #[serde(flatten)]
    pub fields: Map<String, JsonValue>,
}

impl Node {
    /// A root node with no structural parent or children yet.
    pub fn new(id: String, node_type: String, fields: Map<String, JsonValue>) -> Self {
        let mut node = Self {
            id,
            parent: None,
            children: Vec::new(),
            internal: NodeInternal {
                node_type,
                content_digest: String::new(),
                media_type: None,
            },
            fields,
        };
        node.update_digest();
        node
    }

    pub fn field(&self, name: &str) -> Option<&JsonValue> {
        self.fields.get(name)
    }

    /// Recompute `internal.content_digest` after fields change.
    pub fn update_digest(&mut self) {
        let payload = serde_json::to_vec(&self.fields).unwrap_or_default();
        self.internal.content_digest = content_digest(&payload);
    }
}

/// SHA-256 hex digest.
pub fn content_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// A file node derived from an image column or a remote URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileNode {
    pub id: String,
    pub name: String,
    pub parent: String,
    #[serde(default)]
    pub children: Vec<String>,
    pub internal: NodeInternal,
    pub extension: String,
    pub size: u64,
    pub pretty_size: String,
    pub absolute_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl From<FileNode> for Node {
    fn from(file: FileNode) -> Self {
        let mut fields = Map::new();
        fields.insert("name".to_string(), JsonValue::String(file.name));
        fields.insert("extension".to_string(), JsonValue::String(file.extension));
        fields.insert("size".to_string(), JsonValue::from(file.size));
        fields.insert("pretty_size".to_string(), JsonValue::String(file.pretty_size));
        fields.insert("absolute_path".to_string(), JsonValue::String(file.absolute_path));
        if let Some(url) = file.url {
            fields.insert("url".to_string(), JsonValue::String(url));
        }

        Node {
            id: file.id,
            parent: Some(file.parent),
            children: file.children,
            internal: file.internal,
            fields,
        }
    }
}
