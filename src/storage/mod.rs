//! Records and on-disk storage: shards, the shard file codec and the WAL

pub mod codec;
pub mod shard;
pub mod wal;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};

pub use shard::{Shard, ShardWriteGuard};
pub use wal::{WalEntry, WalOperation, WriteAheadLog};

/// Longest string the shard codec can frame (u16 length prefix).
pub const MAX_STRING_BYTES: usize = u16::MAX as usize;

/// Graph vertex
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Caller-assigned, globally unique
    pub id: String,

    /// Classification, e.g. "Person" or "Company". Never empty.
    pub label: String,

    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl Node {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Insert or overwrite one property.
    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn validate(&self) -> Result<()> {
        check_non_empty("node id", &self.id)?;
        check_non_empty("node label", &self.label)?;
        check_len("node id", &self.id)?;
        check_len("node label", &self.label)?;
        for (key, value) in &self.properties {
            check_len("property key", key)?;
            check_len("property value", value)?;
        }
        Ok(())
    }

    /// True if `needle` (already lowercased) occurs anywhere in the node's
    /// display form, ignoring case.
    pub fn contains_text(&self, needle: &str) -> bool {
        self.to_string().to_lowercase().contains(needle)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}:{}) {{", self.id, self.label)?;
        for (i, (key, value)) in self.properties.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", key, value)?;
        }
        f.write_str("}")
    }
}

/// Scalar relation property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Number(f64),
    String(String),
}

impl PropertyValue {
    /// Numeric view used for edge weights: numbers as-is, strings parsed,
    /// booleans never.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Number(n) => Some(*n),
            PropertyValue::String(s) => s.trim().parse::<f64>().ok(),
            PropertyValue::Bool(_) => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bool(b) => write!(f, "{}", b),
            PropertyValue::Number(n) => write!(f, "{}", n),
            PropertyValue::String(s) => f.write_str(s),
        }
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Number(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Number(value as f64)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

/// Directed, typed edge. Stored in the shard of `source`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub source: String,
    pub target: String,

    /// Relation type, e.g. "KNOWS". Compared case-insensitively.
    #[serde(rename = "type")]
    pub relation_type: String,

    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
}

impl Relation {
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        relation_type: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            relation_type: relation_type.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Same endpoints and same type, ignoring case of the type.
    pub fn matches(&self, source: &str, target: &str, relation_type: &str) -> bool {
        self.source == source && self.target == target && same_type(&self.relation_type, relation_type)
    }

    /// Edge weight under `key`; 1.0 when absent or not numeric.
    pub fn weight(&self, key: &str) -> f64 {
        self.properties
            .get(key)
            .and_then(PropertyValue::as_f64)
            .unwrap_or(1.0)
    }

    pub fn validate(&self) -> Result<()> {
        check_non_empty("relation source", &self.source)?;
        check_non_empty("relation target", &self.target)?;
        check_non_empty("relation type", &self.relation_type)?;
        check_len("relation source", &self.source)?;
        check_len("relation target", &self.target)?;
        check_len("relation type", &self.relation_type)?;
        for (key, value) in &self.properties {
            check_len("property key", key)?;
            match value {
                PropertyValue::String(s) => check_len("property value", s)?,
                // JSON has no encoding for NaN or the infinities
                PropertyValue::Number(n) if !n.is_finite() => {
                    return Err(GraphError::InvalidRecord(format!(
                        "relation property {} must be a finite number, got {}",
                        key, n
                    )));
                }
                PropertyValue::Number(_) | PropertyValue::Bool(_) => {}
            }
        }
        Ok(())
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})-[{}]->({})", self.source, self.relation_type, self.target)
    }
}

/// Case-insensitive relation type comparison.
pub fn same_type(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b) || a.to_lowercase() == b.to_lowercase()
}

fn check_non_empty(what: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(GraphError::InvalidRecord(format!("{} must not be empty", what)));
    }
    Ok(())
}

fn check_len(what: &str, value: &str) -> Result<()> {
    if value.len() > MAX_STRING_BYTES {
        return Err(GraphError::InvalidRecord(format!(
            "{} is {} bytes; the limit is {}",
            what,
            value.len(),
            MAX_STRING_BYTES
        )));
    }
    Ok(())
}
