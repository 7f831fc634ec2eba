//! Suggested values for a field, offered while editing a filter row.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::schema::{FieldKind, SchemaProvider};
use crate::{Config, Result};

/// Source of the distinct values a field currently holds.
pub trait DistinctValues {
    fn distinct_values(&self, model: &str, path: &str) -> Result<Vec<String>>;
}

/// A suggested value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub id: String,
    pub text: String,
}

impl Choice {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// Computes value choices for field paths.
pub struct FieldChoices<'a> {
    schema: &'a dyn SchemaProvider,
    disabled_fields: Vec<String>,
    max_choices: usize,
}

impl<'a> FieldChoices<'a> {
    pub fn new(schema: &'a dyn SchemaProvider) -> Self {
        Self {
            schema,
            disabled_fields: Vec::new(),
            max_choices: 254,
        }
    }

    pub fn from_config(schema: &'a dyn SchemaProvider, config: &Config) -> Self {
        Self {
            schema,
            disabled_fields: config.disabled_fields.clone(),
            max_choices: config.max_choices,
        }
    }

    pub fn with_disabled_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.disabled_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_choices(mut self, max_choices: usize) -> Self {
        self.max_choices = max_choices;
        self
    }

    /// Choices for `path` on `model`, sorted by id.
    ///
    /// Declared choices win. Otherwise disabled, boolean and date fields get
    /// none, and distinct values are offered only while there are fewer than
    /// `max_choices` of them.
    pub fn choices(
        &self,
        model: &str,
        path: &str,
        values: &dyn DistinctValues,
    ) -> Result<Vec<Choice>> {
        let field = self.schema.resolve(model, path)?;

        let mut choices: Vec<Choice> = if !field.choices.is_empty() {
            field
                .choices
                .iter()
                .map(|(id, text)| Choice::new(id.as_str(), text.as_str()))
                .collect()
        } else if self.is_disabled(path, &field.name) {
            tracing::debug!(model, field = path, "Choices disabled for field");
            Vec::new()
        } else if matches!(field.kind, FieldKind::Boolean | FieldKind::Date) {
            Vec::new()
        } else {
            let distinct: BTreeSet<String> = values
                .distinct_values(model, path)?
                .into_iter()
                .filter(|v| !v.is_empty())
                .collect();

            if distinct.len() < self.max_choices {
                distinct
                    .into_iter()
                    .map(|v| Choice::new(v.as_str(), v.as_str()))
                    .collect()
            } else {
                tracing::debug!(
                    model,
                    field = path,
                    count = distinct.len(),
                    max = self.max_choices,
                    "Too many distinct values, skipping choices"
                );
                Vec::new()
            }
        };

        choices.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(choices)
    }

    fn is_disabled(&self, path: &str, name: &str) -> bool {
        self.disabled_fields.iter().any(|f| f == path || f == name)
    }
}
