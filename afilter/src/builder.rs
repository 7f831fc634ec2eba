//! Query builder: flat filter rows <-> expression tree.
//!
//! Rows are what an editing form submits: one comparison per row, with a
//! synthetic `_OR` row between runs that should be OR-ed together. Rows
//! between separators are AND-ed.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::query::{
    json_to_value, split_qualified_key, ts2dt, FieldValues, Group, Leaf, Node, Operator,
    QueryMapping, Value, OR_FIELD,
};
use crate::schema::SchemaProvider;
use crate::{Error, Result};

/// Label of the `_OR` choice offered alongside real fields.
pub const OR_LABEL: &str = "Or (mark an or between blocks)";

fn default_operator() -> Operator {
    Operator::EqualsCi
}

/// One editable filter row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterRow {
    /// Dotted field path, or `_OR` for a separator.
    pub field: String,
    #[serde(default = "default_operator")]
    pub operator: Operator,
    #[serde(default)]
    pub value: Value,
    #[serde(default, with = "form_datetime", skip_serializing_if = "Option::is_none")]
    pub value_from: Option<DateTime<Utc>>,
    #[serde(default, with = "form_datetime", skip_serializing_if = "Option::is_none")]
    pub value_to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub negate: bool,
}

impl FilterRow {
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
            value_from: None,
            value_to: None,
            negate: false,
        }
    }

    /// Date range row; either bound may be open.
    pub fn range(
        field: impl Into<String>,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            value_from: from,
            value_to: to,
            ..Self::new(field, Operator::Range, Value::Range(from, to))
        }
    }

    /// The separator row marking an OR boundary.
    pub fn or_separator() -> Self {
        Self::new(OR_FIELD, Operator::EqualsCi, "null")
    }

    pub fn negated(mut self) -> Self {
        self.negate = true;
        self
    }

    pub fn is_or_separator(&self) -> bool {
        self.field == OR_FIELD
    }

    /// Operator after value-typed inference.
    ///
    /// A row left on the default operator whose value is null, true or
    /// false means `isnull`, `istrue` or `isfalse`.
    pub fn effective_operator(&self) -> Operator {
        match (self.operator, &self.value) {
            (Operator::EqualsCi, Value::Null) => Operator::IsNull,
            (Operator::EqualsCi, Value::Bool(true)) => Operator::IsTrue,
            (Operator::EqualsCi, Value::Bool(false)) => Operator::IsFalse,
            (op, _) => op,
        }
    }

    /// Collapse whitespace runs and expand comma lists for `iregex`.
    pub fn cleaned(mut self) -> Self {
        self.field = collapse_whitespace(&self.field);
        if let Value::Text(text) = &self.value {
            let text = collapse_whitespace(text);
            self.value = Value::Text(if self.operator == Operator::OneOfCi {
                one_of_pattern(&text)
            } else {
                text
            });
        }
        self
    }

    /// Value as shown in an editing form; ranges render as `from,to` dates.
    pub fn display_value(&self) -> String {
        match &self.value {
            Value::Range(from, to) => {
                format!("{},{}", date_to_string(from.as_ref()), date_to_string(to.as_ref()))
            }
            Value::Null => String::new(),
            Value::Text(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

fn date_to_string(dt: Option<&DateTime<Utc>>) -> String {
    dt.map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Turn `a, b,c` into the alternation regex `(a|b|c)`.
///
/// Single values are returned trimmed and unchanged.
pub fn one_of_pattern(value: &str) -> String {
    let parts: Vec<&str> = value.split(',').collect();
    if parts.len() < 2 {
        return value.trim().to_string();
    }
    format!(
        "({})",
        parts.iter().map(|p| p.trim()).collect::<Vec<_>>().join("|")
    )
}

/// Parse a form date/time: RFC 3339, `YYYY-MM-DD HH:MM[:SS]` or `YYYY-MM-DD` (UTC).
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Serde adapter for optional form date/times.
mod form_datetime {
    use chrono::{DateTime, Utc};
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value as Json;

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(dt) => serializer.serialize_str(&dt.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<Json>::deserialize(deserializer)? {
            None | Some(Json::Null) => Ok(None),
            Some(Json::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Json::String(s)) => super::parse_datetime(&s)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("invalid date/time '{}'", s))),
            Some(ts @ Json::Number(_)) => crate::query::ts2dt(&ts)
                .map(Some)
                .map_err(D::Error::custom),
            Some(other) => Err(D::Error::custom(format!("invalid date/time {}", other))),
        }
    }
}

/// A field offered for filtering: a path resolved for its label, or a path
/// with an explicit label.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldSpec {
    Path(String),
    Labeled(String, String),
}

impl From<&str> for FieldSpec {
    fn from(path: &str) -> Self {
        FieldSpec::Path(path.to_string())
    }
}

impl From<(&str, &str)> for FieldSpec {
    fn from((path, label): (&str, &str)) -> Self {
        FieldSpec::Labeled(path.to_string(), label.to_string())
    }
}

fn capfirst(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Builds expression trees from rows for one model, and projects stored
/// queries back into rows.
pub struct QueryBuilder<'a> {
    schema: &'a dyn SchemaProvider,
    model: String,
    allowed_fields: Option<Vec<String>>,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(schema: &'a dyn SchemaProvider, model: impl Into<String>) -> Self {
        Self {
            schema,
            model: model.into(),
            allowed_fields: None,
        }
    }

    /// Restrict rows to the given field paths.
    pub fn with_allowed_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// `(path, label)` choices for the given fields, sorted by label, with
    /// the `_OR` choice last. Fields that do not resolve are skipped.
    pub fn field_choices(&self, fields: &[FieldSpec]) -> Vec<(String, String)> {
        let mut choices: Vec<(String, String)> = fields
            .iter()
            .filter_map(|spec| match spec {
                FieldSpec::Labeled(path, label) => Some((path.clone(), capfirst(label))),
                FieldSpec::Path(path) => match self.schema.resolve(&self.model, path) {
                    Ok(field) => Some((path.clone(), capfirst(&field.verbose_name))),
                    Err(e) => {
                        tracing::warn!(model = %self.model, field = %path, error = %e, "Skipping invalid filter field");
                        None
                    }
                },
            })
            .collect();

        choices.sort_by_key(|(_, label)| label.to_lowercase());
        choices.push((OR_FIELD.to_string(), OR_LABEL.to_string()));
        choices
    }

    /// Build the tree for a list of rows.
    ///
    /// Rows are reduced left to right into a running AND group; each `_OR`
    /// row closes it as one alternative. Alternatives are OR-ed at the end
    /// (empty ones are dropped, a lone survivor is the root). All invalid
    /// rows are reported together.
    pub fn build(&self, rows: &[FilterRow]) -> Result<Group> {
        let mut errors = Vec::new();
        let mut alternatives: Vec<Group> = Vec::new();
        let mut current = Group::empty();

        for (index, row) in rows.iter().enumerate() {
            if row.is_or_separator() {
                alternatives.push(std::mem::take(&mut current));
                continue;
            }
            match self.make_query(index, row) {
                Ok(node) => current = current.with_child(node),
                Err(e) => errors.push(e),
            }
        }

        if !errors.is_empty() {
            return Err(if errors.len() == 1 {
                errors.remove(0)
            } else {
                Error::InvalidFilterRows(errors)
            });
        }

        let root = if alternatives.is_empty() {
            current
        } else {
            alternatives.push(current);
            let mut alternatives: Vec<Group> =
                alternatives.into_iter().filter(|g| !g.is_empty()).collect();
            if alternatives.len() <= 1 {
                alternatives.pop().unwrap_or_default()
            } else {
                Group::or(alternatives.into_iter().map(Node::Group).collect())
            }
        };

        tracing::debug!(
            model = %self.model,
            rows = rows.len(),
            leaves = root.leaf_count(),
            "Built filter query"
        );
        Ok(root)
    }

    /// Node for a single row: the leaf, or a negated group wrapping it.
    pub fn make_query(&self, index: usize, row: &FilterRow) -> Result<Node> {
        let invalid = |reason: String| Error::InvalidFilterRow { row: index, reason };
        let row = row.clone().cleaned();

        if let Some(allowed) = &self.allowed_fields {
            if !allowed.iter().any(|f| *f == row.field) {
                return Err(invalid(format!(
                    "{} is not one of the available choices.",
                    row.field
                )));
            }
        }

        self.schema
            .resolve(&self.model, &row.field)
            .map_err(|e| invalid(e.to_string()))?;

        let operator = row.effective_operator();
        let value = match operator {
            op if op.is_valueless() => Value::Null,
            Operator::Range => {
                let (from, to) = match &row.value {
                    Value::Range(from, to) => (row.value_from.or(*from), row.value_to.or(*to)),
                    _ => (row.value_from, row.value_to),
                };
                if from.is_none() && to.is_none() {
                    return Err(invalid("Date range requires values".to_string()));
                }
                Value::Range(from, to)
            }
            op => {
                if row.value.is_blank() {
                    return Err(invalid(format!("a value is required for '{}'", op)));
                }
                if matches!(row.value, Value::Range(..)) {
                    return Err(invalid(format!("'{}' does not accept a range", op)));
                }
                row.value
            }
        };

        let leaf = Leaf::new(row.field, operator, value);
        Ok(if row.negate {
            Group::not(leaf).into()
        } else {
            leaf.into()
        })
    }

    /// Project a stored mapping back into editable rows.
    pub fn project_to_rows(&self, mapping: &QueryMapping) -> Result<Vec<FilterRow>> {
        mapping
            .field_values_list()
            .into_iter()
            .map(|fields| self.parse_field_values(fields))
            .collect()
    }

    /// Parse one flattened leaf into a row, validating its field path.
    pub fn parse_field_values(&self, fields: FieldValues) -> Result<FilterRow> {
        if fields.is_or_separator() {
            return Ok(FilterRow::or_separator());
        }

        let (path, suffix) = split_qualified_key(&fields.field);
        self.schema.resolve(&self.model, path)?;

        let operator = match &fields.value {
            Json::Null => Operator::IsNull,
            Json::Bool(true) => Operator::IsTrue,
            Json::Bool(false) => Operator::IsFalse,
            _ => suffix.unwrap_or(Operator::EqualsCi),
        };

        let mut row = FilterRow {
            field: path.to_string(),
            operator,
            value: Value::Null,
            value_from: None,
            value_to: None,
            negate: fields.negate,
        };

        if operator == Operator::Range {
            row.value_from = projected_bound(fields.value_from.as_ref())?;
            row.value_to = projected_bound(fields.value_to.as_ref())?;
            row.value = Value::Range(row.value_from, row.value_to);
        } else {
            row.value = json_to_value(&fields.field, &fields.value)?;
        }

        Ok(row)
    }
}

fn projected_bound(ts: Option<&Json>) -> Result<Option<DateTime<Utc>>> {
    match ts {
        None | Some(Json::Null) => Ok(None),
        Some(ts) if ts.as_f64() == Some(0.0) => Ok(None),
        Some(ts) => ts2dt(ts).map(Some),
    }
}
