//! Expression tree: leaf comparisons combined by AND/OR groups.
//!
//! Trees are immutable once built. Builders produce new values by
//! consuming the old ones (`Group::with_child`), so a group that has been
//! handed off can never be changed through another handle.

use std::fmt;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// How the children of a group are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Connector {
    /// Logical conjunction of all children.
    #[default]
    #[serde(rename = "AND")]
    And,
    /// Logical disjunction of all children.
    #[serde(rename = "OR")]
    Or,
}

impl fmt::Display for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Connector::And => write!(f, "AND"),
            Connector::Or => write!(f, "OR"),
        }
    }
}

/// Comparison operators available to a leaf.
///
/// Serialized with the lookup name used in qualified keys (`iexact`,
/// `range`, ...). The descriptive names (`equals_ci`, `is_null`, ...) are
/// accepted as aliases when deserializing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    /// Case-insensitive equality.
    #[serde(rename = "iexact", alias = "equals_ci")]
    EqualsCi,
    /// Case-insensitive substring match.
    #[serde(rename = "icontains", alias = "contains_ci")]
    ContainsCi,
    /// Case-insensitive regex, built as an alternation of comma-separated values.
    #[serde(rename = "iregex", alias = "one_of_ci")]
    OneOfCi,
    /// Date/time range, bounds inclusive.
    #[serde(rename = "range")]
    Range,
    #[serde(rename = "isnull", alias = "is_null")]
    IsNull,
    #[serde(rename = "istrue", alias = "is_true")]
    IsTrue,
    #[serde(rename = "isfalse", alias = "is_false")]
    IsFalse,
    #[serde(rename = "lt", alias = "less_than")]
    LessThan,
    #[serde(rename = "gt", alias = "greater_than")]
    GreaterThan,
    #[serde(rename = "lte", alias = "less_or_equal")]
    LessOrEqual,
    #[serde(rename = "gte", alias = "greater_or_equal")]
    GreaterOrEqual,
}

impl Operator {
    /// Every operator, in the order they are offered to users.
    pub const ALL: [Operator; 11] = [
        Operator::EqualsCi,
        Operator::ContainsCi,
        Operator::OneOfCi,
        Operator::Range,
        Operator::IsNull,
        Operator::IsTrue,
        Operator::IsFalse,
        Operator::LessThan,
        Operator::GreaterThan,
        Operator::LessOrEqual,
        Operator::GreaterOrEqual,
    ];

    /// Lookup name used as the suffix of a qualified key.
    pub fn lookup(self) -> &'static str {
        match self {
            Operator::EqualsCi => "iexact",
            Operator::ContainsCi => "icontains",
            Operator::OneOfCi => "iregex",
            Operator::Range => "range",
            Operator::IsNull => "isnull",
            Operator::IsTrue => "istrue",
            Operator::IsFalse => "isfalse",
            Operator::LessThan => "lt",
            Operator::GreaterThan => "gt",
            Operator::LessOrEqual => "lte",
            Operator::GreaterOrEqual => "gte",
        }
    }

    /// Descriptive name (`equals_ci`, `is_null`, ...).
    pub fn name(self) -> &'static str {
        match self {
            Operator::EqualsCi => "equals_ci",
            Operator::ContainsCi => "contains_ci",
            Operator::OneOfCi => "one_of_ci",
            Operator::Range => "range",
            Operator::IsNull => "is_null",
            Operator::IsTrue => "is_true",
            Operator::IsFalse => "is_false",
            Operator::LessThan => "less_than",
            Operator::GreaterThan => "greater_than",
            Operator::LessOrEqual => "less_or_equal",
            Operator::GreaterOrEqual => "greater_or_equal",
        }
    }

    /// Human-readable label.
    pub fn label(self) -> &'static str {
        match self {
            Operator::EqualsCi => "Equals",
            Operator::ContainsCi => "Contains",
            Operator::OneOfCi => "One of",
            Operator::Range => "DateTime Range",
            Operator::IsNull => "Is NULL",
            Operator::IsTrue => "Is TRUE",
            Operator::IsFalse => "Is FALSE",
            Operator::LessThan => "Less Than",
            Operator::GreaterThan => "Greater Than",
            Operator::LessOrEqual => "Less Than or Equal To",
            Operator::GreaterOrEqual => "Greater Than or Equal To",
        }
    }

    /// Parse a lookup name (the qualified-key suffix form only).
    pub fn from_lookup(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.lookup() == s)
    }

    /// Parse either a lookup name or a descriptive name.
    pub fn from_name(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|op| op.lookup() == s || op.name() == s)
    }

    /// Operators that ignore the supplied value.
    pub fn is_valueless(self) -> bool {
        matches!(self, Operator::IsNull | Operator::IsTrue | Operator::IsFalse)
    }

    /// Fixed value carried by a valueless operator.
    pub fn sentinel(self) -> Option<Value> {
        match self {
            Operator::IsNull => Some(Value::Null),
            Operator::IsTrue => Some(Value::Bool(true)),
            Operator::IsFalse => Some(Value::Bool(false)),
            _ => None,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.lookup())
    }
}

/// Value compared against by a leaf.
///
/// Serializes untagged: scalars as JSON scalars, date-times as RFC 3339
/// strings and ranges as two-element arrays. Strings always deserialize as
/// `Text`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Range bounds; `None` is an open end.
    Range(Option<DateTime<Utc>>, Option<DateTime<Utc>>),
    DateTime(DateTime<Utc>),
}

impl Value {
    /// True for null and for blank text.
    pub fn is_blank(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Text(String::new())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(dt: DateTime<Utc>) -> Self {
        Value::DateTime(dt)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "None"),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(n) => write!(f, "{}", n),
            Value::Text(s) => write!(f, "{:?}", s),
            Value::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
            Value::Range(from, to) => {
                let bound = |b: &Option<DateTime<Utc>>| {
                    b.map(|dt| dt.to_rfc3339()).unwrap_or_else(|| "..".to_string())
                };
                write!(f, "[{}, {}]", bound(from), bound(to))
            }
        }
    }
}

/// A single field/operator/value comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    field: String,
    operator: Operator,
    value: Value,
}

impl Leaf {
    /// Create a leaf. Valueless operators replace `value` with their sentinel.
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        let value = match operator.sentinel().unwrap_or_else(|| value.into()) {
            Value::Range(from, to) => Value::Range(
                from.map(|dt| dt.trunc_subsecs(6)),
                to.map(|dt| dt.trunc_subsecs(6)),
            ),
            Value::DateTime(dt) => Value::DateTime(dt.trunc_subsecs(6)),
            value => value,
        };
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    /// Dotted (`a__b`) field path.
    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Key used on the wire: `field__lookup`, the bare field for
    /// `istrue`/`isfalse`.
    pub fn qualified_key(&self) -> String {
        match self.operator {
            Operator::IsTrue | Operator::IsFalse => self.field.clone(),
            op => format!("{}__{}", self.field, op.lookup()),
        }
    }
}

/// A boolean combination of child nodes, optionally negated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Group {
    connector: Connector,
    negated: bool,
    children: Vec<Node>,
}

impl Group {
    pub fn new(connector: Connector, negated: bool, children: Vec<Node>) -> Self {
        Self {
            connector,
            negated,
            children,
        }
    }

    /// Empty conjunction (matches everything).
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn and(children: Vec<Node>) -> Self {
        Self::new(Connector::And, false, children)
    }

    pub fn or(children: Vec<Node>) -> Self {
        Self::new(Connector::Or, false, children)
    }

    /// Negated singleton conjunction wrapping `node`.
    pub fn not(node: impl Into<Node>) -> Self {
        Self::new(Connector::And, true, vec![node.into()])
    }

    /// Return this group with `child` appended.
    pub fn with_child(mut self, child: impl Into<Node>) -> Self {
        self.children.push(child.into());
        self
    }

    pub fn connector(&self) -> Connector {
        self.connector
    }

    pub fn is_negated(&self) -> bool {
        self.negated
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Number of leaves in this group and all nested groups.
    pub fn leaf_count(&self) -> usize {
        self.children
            .iter()
            .map(|child| match child {
                Node::Leaf(_) => 1,
                Node::Group(g) => g.leaf_count(),
            })
            .sum()
    }

    fn write_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let pad = "  ".repeat(depth);
        let not = if self.negated { "NOT " } else { "" };
        writeln!(f, "{}{}{}", pad, not, self.connector)?;
        for child in &self.children {
            match child {
                Node::Group(g) => g.write_indented(f, depth + 1)?,
                Node::Leaf(leaf) => writeln!(
                    f,
                    "{}  {} {} {}",
                    pad, leaf.field, leaf.operator, leaf.value
                )?,
            }
        }
        Ok(())
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(f, 0)
    }
}

/// A node in an expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Leaf(Leaf),
    Group(Group),
}

impl From<Leaf> for Node {
    fn from(leaf: Leaf) -> Self {
        Node::Leaf(leaf)
    }
}

impl From<Group> for Node {
    fn from(group: Group) -> Self {
        Node::Group(group)
    }
}
