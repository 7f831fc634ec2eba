//! Stored filter records and the actors that own and see them.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::builder::QueryBuilder;
use crate::query::{Group, QueryCodec};
use crate::schema::SchemaProvider;
use crate::{Config, Result};

/// The user on whose behalf an operation runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub username: String,
    #[serde(default)]
    pub groups: BTreeSet<String>,
    #[serde(default)]
    pub is_superuser: bool,
}

impl Actor {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Self::default()
        }
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = groups.into_iter().map(Into::into).collect();
        self
    }

    pub fn superuser(mut self) -> Self {
        self.is_superuser = true;
        self
    }
}

/// A named, persisted filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFilter {
    /// Unique identifier (UUIDv7 for time-ordering).
    pub id: Uuid,

    /// Display title.
    pub title: String,

    /// Username of the creator.
    pub owner: String,

    /// Users the filter is shared with, besides the owner.
    #[serde(default)]
    pub shared_users: BTreeSet<String>,

    /// Groups the filter is shared with.
    #[serde(default)]
    pub shared_groups: BTreeSet<String>,

    /// Model the filter applies to, if bound to one.
    pub model: Option<String>,

    /// Base64 query string as produced by the stored codec.
    pub encoded_query: String,

    pub created_at: DateTime<Utc>,
}

impl StoredFilter {
    /// New unsaved filter owned by `owner`, with an empty query.
    pub fn new(title: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            title: title.into(),
            owner: owner.into(),
            shared_users: BTreeSet::new(),
            shared_groups: BTreeSet::new(),
            model: None,
            encoded_query: String::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn shared_with_users<I, S>(mut self, users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.shared_users = users.into_iter().map(Into::into).collect();
        self
    }

    pub fn shared_with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.shared_groups = groups.into_iter().map(Into::into).collect();
        self
    }

    /// Visible to the owner, to shared users and to members of shared groups.
    pub fn is_visible_to(&self, actor: &Actor) -> bool {
        self.owner == actor.username
            || self.shared_users.contains(&actor.username)
            || self.shared_groups.iter().any(|g| actor.groups.contains(g))
    }

    /// Decoded query, or `None` when nothing has been stored yet.
    pub fn query(&self, codec: &QueryCodec) -> Result<Option<Group>> {
        if self.encoded_query.trim().is_empty() {
            return Ok(None);
        }
        codec.decode(&self.encoded_query).map(Some)
    }

    /// Replace the stored query with the encoding of `query`.
    pub fn set_query(&mut self, codec: &QueryCodec, query: &Group) -> Result<()> {
        self.encoded_query = codec.encode(&query.clone().into())?;
        Ok(())
    }

    /// Distinct field paths referenced by the stored query, in order of
    /// first appearance.
    ///
    /// Paths are validated against the filter's model when `schema` and a
    /// model are available.
    pub fn list_fields(
        &self,
        codec: &QueryCodec,
        schema: Option<&dyn SchemaProvider>,
    ) -> Result<Vec<String>> {
        if self.encoded_query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let mapping = codec.decode_raw(&self.encoded_query)?;

        let rows = match (schema, &self.model) {
            (Some(schema), Some(model)) => QueryBuilder::new(schema, model.as_str())
                .project_to_rows(&mapping)?
                .into_iter()
                .filter(|row| !row.is_or_separator())
                .map(|row| row.field)
                .collect::<Vec<_>>(),
            _ => mapping
                .field_values_list()
                .into_iter()
                .filter(|fields| !fields.is_or_separator())
                .map(|fields| {
                    crate::query::split_qualified_key(&fields.field)
                        .0
                        .to_string()
                })
                .collect(),
        };

        let mut seen = BTreeSet::new();
        Ok(rows
            .into_iter()
            .filter(|field| seen.insert(field.clone()))
            .collect())
    }
}

/// Whether `actor` may modify or delete `filter`.
///
/// Owners and superusers always may. With `edit_by_user_only` turned off,
/// every actor may.
pub fn can_edit(actor: &Actor, filter: &StoredFilter, config: &Config) -> bool {
    actor.is_superuser
        || filter.owner == actor.username
        || !config.edit_by_user_only
}
