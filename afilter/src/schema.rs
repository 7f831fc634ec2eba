//! Model schema description and dotted field-path resolution.
//!
//! Field paths use `__` to traverse relations: `groups__name` is the `name`
//! field of the model that `groups` points to.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::query::Operator;
use crate::{Error, Result};

/// Value type of a field, as far as filtering cares.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// Date or date-time; filtered with ranges by default.
    Date,
    Boolean,
    #[default]
    Other,
}

/// A resolved field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    /// Field name (last path segment).
    pub name: String,
    /// Model that owns the field (the related model after traversal).
    pub model: String,
    pub verbose_name: String,
    pub kind: FieldKind,
    /// Predefined `(value, label)` choices, if the field declares any.
    pub choices: Vec<(String, String)>,
}

impl FieldDescriptor {
    /// Operator offered first for this field.
    pub fn default_operator(&self) -> Operator {
        match self.kind {
            FieldKind::Date => Operator::Range,
            _ => Operator::EqualsCi,
        }
    }
}

/// Capability to resolve dotted field paths against a model.
pub trait SchemaProvider {
    /// Resolve `path` on `model`, failing with `Error::FieldNotFound` for
    /// the first segment that does not exist.
    fn resolve(&self, model: &str, path: &str) -> Result<FieldDescriptor>;
}

/// A field declared on a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(default)]
    pub kind: FieldKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verbose_name: Option<String>,
    /// Target model when this field is a relation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<(String, String)>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            verbose_name: None,
            related: None,
            choices: Vec::new(),
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Other)
    }

    pub fn date(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Date)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Boolean)
    }

    pub fn relation(name: impl Into<String>, related: impl Into<String>) -> Self {
        Self {
            related: Some(related.into()),
            ..Self::new(name, FieldKind::Other)
        }
    }

    pub fn with_verbose_name(mut self, verbose_name: impl Into<String>) -> Self {
        self.verbose_name = Some(verbose_name.into());
        self
    }

    pub fn with_choices<K, V>(mut self, choices: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.choices = choices
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    fn verbose_name(&self) -> String {
        self.verbose_name
            .clone()
            .unwrap_or_else(|| self.name.replace('_', " "))
    }
}

/// Fields of one model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSchema {
    #[serde(default)]
    pub fields: Vec<FieldDef>,
}

impl ModelSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    fn get(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// In-memory schema registry, loadable from TOML:
///
/// ```toml
/// [models.SalesRep]
/// fields = [
///     { name = "first_name" },
///     { name = "date_joined", kind = "date" },
///     { name = "groups", related = "Group" },
/// ]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaRegistry {
    #[serde(default)]
    pub models: BTreeMap<String, ModelSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, name: impl Into<String>, schema: ModelSchema) -> Self {
        self.models.insert(name.into(), schema);
        self
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| Error::Config(format!("Failed to parse schema: {}", e)))
    }

    /// Load a schema file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn model_names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }
}

impl SchemaProvider for SchemaRegistry {
    fn resolve(&self, model: &str, path: &str) -> Result<FieldDescriptor> {
        let segments: Vec<&str> = path.split("__").collect();
        let mut current = model;

        for (i, segment) in segments.iter().enumerate() {
            let schema = self
                .models
                .get(current)
                .ok_or_else(|| Error::NotFound(format!("No model found for {}", current)))?;

            let field = schema.get(segment).ok_or_else(|| Error::FieldNotFound {
                model: current.to_string(),
                field: segment.to_string(),
            })?;

            if i + 1 == segments.len() {
                return Ok(FieldDescriptor {
                    name: field.name.clone(),
                    model: current.to_string(),
                    verbose_name: field.verbose_name(),
                    kind: field.kind,
                    choices: field.choices.clone(),
                });
            }

            // Only relations can be traversed further
            current = field.related.as_deref().ok_or_else(|| Error::FieldNotFound {
                model: current.to_string(),
                field: segments[i..].join("__"),
            })?;
        }

        Err(Error::FieldNotFound {
            model: model.to_string(),
            field: path.to_string(),
        })
    }
}
