//! Query codec: expression tree <-> nested mapping <-> transport string.
//!
//! # Wire format
//!
//! ```text
//! {"connector": "AND"|"OR", "negated": bool, "children": [child, ...]}
//! ```
//!
//! A child is either a nested mapping or a `[qualified_key, value]` pair.
//! Date/time values are written as POSIX timestamps; range values as a pair
//! of timestamps where `null` marks an open end. The JSON text may be
//! base64-encoded for use as a query-string parameter.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as Json;

use super::expr::{Connector, Group, Leaf, Node, Operator, Value};
use crate::{Error, Result};

/// Field name of the synthetic row marking an OR boundary.
pub const OR_FIELD: &str = "_OR";

/// Closed interval substituted for open range ends when decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampBounds {
    pub min: i64,
    pub max: i64,
}

impl TimestampBounds {
    /// 1970-01-01T00:00:00Z
    pub const DEFAULT_MIN: i64 = 0;
    /// 3000-01-01T00:00:00Z
    pub const DEFAULT_MAX: i64 = 32_503_680_000;

    pub fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    fn datetime(ts: i64) -> Result<DateTime<Utc>> {
        DateTime::from_timestamp(ts, 0)
            .ok_or_else(|| Error::Decode(format!("timestamp {} out of range", ts)))
    }
}

impl Default for TimestampBounds {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MIN, Self::DEFAULT_MAX)
    }
}

/// Intermediate nested-mapping form of a query.
///
/// This is what `decode_raw` returns; the flat-row projection works on it
/// directly without building a tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMapping {
    pub connector: Connector,
    #[serde(default)]
    pub negated: bool,
    #[serde(default)]
    pub children: Vec<MappingChild>,
}

/// A child of a mapping: a leaf pair or a nested mapping.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MappingChild {
    Pair(String, Json),
    Group(QueryMapping),
}

impl<'de> Deserialize<'de> for MappingChild {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        use serde::de::Error as _;

        match Json::deserialize(deserializer)? {
            Json::Object(map) => serde_json::from_value(Json::Object(map))
                .map(MappingChild::Group)
                .map_err(D::Error::custom),
            Json::Array(mut items) if items.len() == 2 => {
                let value = items.pop().unwrap_or(Json::Null);
                match items.pop() {
                    Some(Json::String(key)) => Ok(MappingChild::Pair(key, value)),
                    other => Err(D::Error::custom(format!(
                        "leaf key must be a string, got {:?}",
                        other
                    ))),
                }
            }
            other => Err(D::Error::custom(format!(
                "child must be a mapping or a [key, value] pair, got {}",
                other
            ))),
        }
    }
}

/// One flattened leaf of a mapping, before schema-aware parsing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValues {
    /// Qualified key (`field__lookup`) or `_OR` for a separator.
    pub field: String,
    pub value: Json,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<Json>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_to: Option<Json>,
    #[serde(default)]
    pub negate: bool,
}

impl FieldValues {
    /// The synthetic row inserted between OR alternatives.
    pub fn or_separator() -> Self {
        Self {
            field: OR_FIELD.to_string(),
            value: Json::String("null".to_string()),
            value_from: None,
            value_to: None,
            negate: false,
        }
    }

    pub fn is_or_separator(&self) -> bool {
        self.field == OR_FIELD
    }
}

impl QueryMapping {
    /// Flatten the mapping into one row per leaf.
    ///
    /// Each leaf inherits `negate` from its enclosing group. After every
    /// child of an OR group except the last, an `_OR` separator row is
    /// emitted.
    pub fn field_values_list(&self) -> Vec<FieldValues> {
        let mut fields = Vec::new();
        let last = self.children.len().saturating_sub(1);

        for (i, child) in self.children.iter().enumerate() {
            match child {
                MappingChild::Group(group) => fields.extend(group.field_values_list()),
                MappingChild::Pair(key, value) => {
                    let mut row = FieldValues {
                        field: key.clone(),
                        value: value.clone(),
                        value_from: None,
                        value_to: None,
                        negate: self.negated,
                    };
                    if let Some((from, to)) = range_pair(key, value) {
                        row.value_from = Some(from.clone());
                        row.value_to = Some(to.clone());
                    }
                    fields.push(row);
                }
            }

            if self.connector == Connector::Or && i != last {
                fields.push(FieldValues::or_separator());
            }
        }

        fields
    }
}

/// Split a qualified key at its last `__` segment when that segment names
/// an operator. Otherwise the whole key is the field path.
///
/// A field whose own last segment equals a lookup name (e.g. `price__gt`
/// used with `istrue`) is split as well; this ambiguity is inherent to the
/// wire format.
pub fn split_qualified_key(key: &str) -> (&str, Option<Operator>) {
    if let Some((field, suffix)) = key.rsplit_once("__") {
        if let Some(op) = Operator::from_lookup(suffix) {
            return (field, Some(op));
        }
    }
    (key, None)
}

fn range_pair<'a>(key: &str, value: &'a Json) -> Option<(&'a Json, &'a Json)> {
    if !key.ends_with("__range") {
        return None;
    }
    match value.as_array().map(Vec::as_slice) {
        Some([from, to]) => Some((from, to)),
        _ => None,
    }
}

/// Date/time to POSIX timestamp; whole seconds stay integral.
pub fn dt2ts(dt: &DateTime<Utc>) -> Json {
    if dt.timestamp_subsec_nanos() == 0 {
        Json::from(dt.timestamp())
    } else {
        Json::from(dt.timestamp_micros() as f64 / 1_000_000.0)
    }
}

/// POSIX timestamp (integral or fractional) to date/time.
pub fn ts2dt(ts: &Json) -> Result<DateTime<Utc>> {
    let parsed = if let Some(secs) = ts.as_i64() {
        DateTime::from_timestamp(secs, 0)
    } else if let Some(secs) = ts.as_f64() {
        let whole = secs.floor();
        let micros = ((secs - whole) * 1_000_000.0).round() as u32;
        DateTime::from_timestamp(whole as i64, micros.min(999_999) * 1_000)
    } else {
        return Err(Error::Decode(format!("expected a timestamp, got {}", ts)));
    };
    parsed.ok_or_else(|| Error::Decode(format!("timestamp {} out of range", ts)))
}

fn is_absent(ts: &Json) -> bool {
    ts.is_null() || ts.as_f64() == Some(0.0)
}

/// Serializer/deserializer for expression trees.
#[derive(Debug, Clone, Default)]
pub struct QueryCodec {
    base64: bool,
    bounds: TimestampBounds,
}

impl QueryCodec {
    /// Plain JSON codec with default range bounds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Base64 codec with default range bounds.
    pub fn base64() -> Self {
        Self {
            base64: true,
            ..Self::default()
        }
    }

    /// Codec for transport parameters as configured.
    pub fn from_config(config: &crate::Config) -> Self {
        Self {
            base64: config.base64,
            bounds: config.timestamp_bounds(),
        }
    }

    /// Codec for persisted queries: always base64, bounds from config.
    pub fn stored(config: &crate::Config) -> Self {
        Self {
            base64: true,
            bounds: config.timestamp_bounds(),
        }
    }

    pub fn with_bounds(mut self, bounds: TimestampBounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn with_base64(mut self, base64: bool) -> Self {
        self.base64 = base64;
        self
    }

    pub fn is_base64(&self) -> bool {
        self.base64
    }

    pub fn bounds(&self) -> TimestampBounds {
        self.bounds
    }

    /// Encode a tree into its transport string. The root must be a group.
    pub fn encode(&self, node: &Node) -> Result<String> {
        let group = match node {
            Node::Group(group) => group,
            Node::Leaf(leaf) => {
                return Err(Error::SerializationType(format!(
                    "root must be a group, got leaf '{}'",
                    leaf.qualified_key()
                )))
            }
        };

        let mapping = self.to_mapping(group)?;
        let json = serde_json::to_string(&mapping)
            .map_err(|e| Error::SerializationType(e.to_string()))?;

        if self.base64 {
            Ok(STANDARD.encode(json))
        } else {
            Ok(json)
        }
    }

    /// Decode a transport string into a tree.
    pub fn decode(&self, s: &str) -> Result<Group> {
        let mapping = self.decode_raw(s)?;
        self.from_mapping(&mapping)
    }

    /// Decode a transport string into its intermediate mapping.
    pub fn decode_raw(&self, s: &str) -> Result<QueryMapping> {
        let bytes = if self.base64 {
            let trimmed = s.trim();
            STANDARD
                .decode(trimmed)
                .or_else(|_| URL_SAFE.decode(trimmed))
                .or_else(|_| STANDARD_NO_PAD.decode(trimmed.trim_end_matches('=')))
                .or_else(|_| URL_SAFE_NO_PAD.decode(trimmed.trim_end_matches('=')))
                .map_err(|e| Error::Decode(format!("invalid base64: {}", e)))?
        } else {
            s.as_bytes().to_vec()
        };

        serde_json::from_slice(&bytes)
            .map_err(|e| Error::Decode(format!("invalid query mapping: {}", e)))
    }

    /// Serialize a group into a mapping.
    pub fn to_mapping(&self, group: &Group) -> Result<QueryMapping> {
        let children = group
            .children()
            .iter()
            .map(|child| match child {
                Node::Group(g) => self.to_mapping(g).map(MappingChild::Group),
                Node::Leaf(leaf) => encode_leaf(leaf),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(QueryMapping {
            connector: group.connector(),
            negated: group.is_negated(),
            children,
        })
    }

    /// Deserialize a mapping into a group.
    pub fn from_mapping(&self, mapping: &QueryMapping) -> Result<Group> {
        let children = mapping
            .children
            .iter()
            .map(|child| match child {
                MappingChild::Group(m) => self.from_mapping(m).map(Node::Group),
                MappingChild::Pair(key, value) => self.decode_leaf(key, value).map(Node::Leaf),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Group::new(mapping.connector, mapping.negated, children))
    }

    fn decode_leaf(&self, key: &str, value: &Json) -> Result<Leaf> {
        let (field, suffix) = split_qualified_key(key);

        if suffix == Some(Operator::Range) {
            let (from, to) = range_pair(key, value).ok_or_else(|| {
                Error::Decode(format!(
                    "range value for '{}' must be a two-element array, got {}",
                    key, value
                ))
            })?;
            let from = self.range_bound(from, self.bounds.min)?;
            let to = self.range_bound(to, self.bounds.max)?;
            return Ok(Leaf::new(field, Operator::Range, Value::Range(Some(from), Some(to))));
        }

        let value = json_to_value(key, value)?;
        let operator = suffix.unwrap_or(match value {
            Value::Null => Operator::IsNull,
            Value::Bool(true) => Operator::IsTrue,
            Value::Bool(false) => Operator::IsFalse,
            _ => Operator::EqualsCi,
        });

        Ok(Leaf::new(field, operator, value))
    }

    fn range_bound(&self, ts: &Json, default: i64) -> Result<DateTime<Utc>> {
        if is_absent(ts) {
            TimestampBounds::datetime(default)
        } else {
            ts2dt(ts)
        }
    }
}

fn encode_leaf(leaf: &Leaf) -> Result<MappingChild> {
    let value = match (leaf.operator(), leaf.value()) {
        (Operator::Range, Value::Range(from, to)) => Json::Array(vec![
            from.as_ref().map(dt2ts).unwrap_or(Json::Null),
            to.as_ref().map(dt2ts).unwrap_or(Json::Null),
        ]),
        (Operator::Range, other) => {
            return Err(Error::SerializationType(format!(
                "range leaf '{}' needs a range value, got {}",
                leaf.field(),
                other
            )))
        }
        (op, Value::Range(..)) => {
            return Err(Error::SerializationType(format!(
                "'{}' leaf '{}' cannot carry a range value",
                op,
                leaf.field()
            )))
        }
        (_, value) => value_to_json(leaf.field(), value)?,
    };

    Ok(MappingChild::Pair(leaf.qualified_key(), value))
}

fn value_to_json(field: &str, value: &Value) -> Result<Json> {
    Ok(match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(n) => Json::from(*n),
        Value::Float(n) => serde_json::Number::from_f64(*n)
            .map(Json::Number)
            .ok_or_else(|| {
                Error::SerializationType(format!("non-finite number {} for '{}'", n, field))
            })?,
        Value::Text(s) => Json::String(s.clone()),
        Value::DateTime(dt) => dt2ts(dt),
        Value::Range(..) => {
            return Err(Error::SerializationType(format!(
                "unexpected range value for '{}'",
                field
            )))
        }
    })
}

pub(crate) fn json_to_value(key: &str, json: &Json) -> Result<Value> {
    match json {
        Json::Null => Ok(Value::Null),
        Json::Bool(b) => Ok(Value::Bool(*b)),
        Json::Number(n) => Ok(n
            .as_i64()
            .map(Value::Int)
            .unwrap_or_else(|| Value::Float(n.as_f64().unwrap_or(f64::NAN)))),
        Json::String(s) => Ok(Value::Text(s.clone())),
        other => Err(Error::Decode(format!(
            "unsupported value for '{}': {}",
            key, other
        ))),
    }
}
