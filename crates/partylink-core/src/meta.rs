//! Suffix-typed attribute store shared by parties and members
//!
//! Every synchronized attribute travels as an encoded string keyed by a
//! name whose suffix selects the codec:
//!
//! - `_b` boolean ("true" / "false")
//! - `_s` raw string
//! - `_U` unsigned integer (decimal string)
//! - `_j` structured value (serialized JSON)
//!
//! Unknown suffixes are treated as raw strings. Reads of absent keys
//! yield the class default (false, "", 0, `{}`), so consumers never see
//! a missing key. Patches are partial: callers hand over a key subset
//! and receive back exactly the encoded values to put on the wire.

use std::collections::BTreeMap;

use serde_json::Value;

/// Typed value stored under a suffix-classified key
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    /// `_b` class
    Bool(bool),
    /// `_s` class and unknown suffixes
    Str(String),
    /// `_U` class
    Uint(u64),
    /// `_j` class
    Json(Value),
}

impl MetaValue {
    /// Encode into the wire string for the given key's class
    pub fn encode(&self) -> String {
        match self {
            MetaValue::Bool(b) => b.to_string(),
            MetaValue::Str(s) => s.clone(),
            MetaValue::Uint(n) => n.to_string(),
            MetaValue::Json(v) => v.to_string(),
        }
    }
}

impl From<bool> for MetaValue {
    fn from(b: bool) -> Self {
        MetaValue::Bool(b)
    }
}

impl From<&str> for MetaValue {
    fn from(s: &str) -> Self {
        MetaValue::Str(s.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(s: String) -> Self {
        MetaValue::Str(s)
    }
}

impl From<u64> for MetaValue {
    fn from(n: u64) -> Self {
        MetaValue::Uint(n)
    }
}

impl From<Value> for MetaValue {
    fn from(v: Value) -> Self {
        MetaValue::Json(v)
    }
}

/// Codec class selected by a key suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MetaClass {
    Bool,
    Str,
    Uint,
    Json,
}

impl MetaClass {
    fn of(key: &str) -> Self {
        match key.as_bytes().last() {
            Some(b'b') if key.ends_with("_b") => MetaClass::Bool,
            Some(b'U') if key.ends_with("_U") => MetaClass::Uint,
            Some(b'j') if key.ends_with("_j") => MetaClass::Json,
            _ => MetaClass::Str,
        }
    }
}

/// Attribute store: key → encoded-string map with typed access
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Meta {
    schema: BTreeMap<String, String>,
}

impl Meta {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store from already-encoded wire values
    pub fn from_wire(schema: BTreeMap<String, String>) -> Self {
        Self { schema }
    }

    /// Set one attribute, encoding it for the key's class.
    ///
    /// Returns the encoded string that would travel on the wire.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> String {
        let key = key.into();
        let encoded = value.into().encode();
        self.schema.insert(key, encoded.clone());
        encoded
    }

    /// Set one attribute from its already-encoded wire form
    pub fn set_raw(&mut self, key: impl Into<String>, encoded: impl Into<String>) {
        self.schema.insert(key.into(), encoded.into());
    }

    /// Read one attribute, decoding per the key's class.
    ///
    /// Absent keys yield the class default rather than an error.
    pub fn get(&self, key: &str) -> MetaValue {
        let raw = self.schema.get(key);
        match MetaClass::of(key) {
            MetaClass::Bool => MetaValue::Bool(raw.map(|s| s == "true").unwrap_or(false)),
            MetaClass::Uint => {
                MetaValue::Uint(raw.and_then(|s| s.parse().ok()).unwrap_or_default())
            }
            MetaClass::Json => MetaValue::Json(
                raw.and_then(|s| serde_json::from_str(s).ok())
                    .unwrap_or_else(|| Value::Object(Default::default())),
            ),
            MetaClass::Str => MetaValue::Str(raw.cloned().unwrap_or_default()),
        }
    }

    /// Read the raw encoded string for a key, if present
    pub fn get_raw(&self, key: &str) -> Option<&str> {
        self.schema.get(key).map(String::as_str)
    }

    /// Convenience boolean read (`_b` keys)
    pub fn get_bool(&self, key: &str) -> bool {
        matches!(self.get(key), MetaValue::Bool(true))
    }

    /// Convenience string read (`_s` keys)
    pub fn get_str(&self, key: &str) -> String {
        match self.get(key) {
            MetaValue::Str(s) => s,
            other => other.encode(),
        }
    }

    /// Convenience integer read (`_U` keys)
    pub fn get_uint(&self, key: &str) -> u64 {
        match self.get(key) {
            MetaValue::Uint(n) => n,
            _ => 0,
        }
    }

    /// Convenience structured read (`_j` keys)
    pub fn get_json(&self, key: &str) -> Value {
        match self.get(key) {
            MetaValue::Json(v) => v,
            _ => Value::Object(Default::default()),
        }
    }

    /// Merge a map of already-encoded wire values into the store
    pub fn update_raw(&mut self, updated: &BTreeMap<String, String>) {
        for (key, encoded) in updated {
            self.schema.insert(key.clone(), encoded.clone());
        }
    }

    /// Apply a typed partial patch.
    ///
    /// Merges the given subset into the store and returns exactly the
    /// encoded values to transmit, leaving every other key untouched.
    pub fn patch(
        &mut self,
        updated: impl IntoIterator<Item = (String, MetaValue)>,
    ) -> BTreeMap<String, String> {
        let mut wire = BTreeMap::new();
        for (key, value) in updated {
            let encoded = self.set(key.clone(), value);
            wire.insert(key, encoded);
        }
        wire
    }

    /// Delete attributes by key
    pub fn remove(&mut self, keys: &[String]) {
        for key in keys {
            self.schema.remove(key);
        }
    }

    /// Whether the store holds the given key
    pub fn contains(&self, key: &str) -> bool {
        self.schema.contains_key(key)
    }

    /// Number of attributes in the store
    pub fn len(&self) -> usize {
        self.schema.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.schema.is_empty()
    }

    /// Snapshot of the full encoded map, as sent in full-state bodies
    pub fn to_wire(&self) -> BTreeMap<String, String> {
        self.schema.clone()
    }
}
