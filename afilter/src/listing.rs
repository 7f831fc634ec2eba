//! List filtering by a selected stored filter.

use uuid::Uuid;

use crate::query::{Group, QueryCodec};
use crate::record::{Actor, StoredFilter};
use crate::store::Store;
use crate::Result;

/// A record collection that can be narrowed by an expression tree.
pub trait FilterableStore {
    type Record;

    /// Every record, unfiltered.
    fn all(&self) -> Vec<Self::Record>;

    /// Records matching `query`.
    fn apply(&self, query: &Group) -> Result<Vec<Self::Record>>;
}

/// Offers the stored filters an actor can see and applies the chosen one.
pub struct AdvancedListFilter<'a> {
    store: &'a Store,
    codec: QueryCodec,
}

impl<'a> AdvancedListFilter<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self {
            store,
            codec: store.codec(),
        }
    }

    /// `(id, title)` of the filters on `model` visible to `actor`.
    pub fn lookups(&self, actor: &Actor, model: &str) -> Result<Vec<(Uuid, String)>> {
        Ok(self
            .store
            .list_visible_for_model(actor, model)?
            .into_iter()
            .map(|f| (f.id, f.title))
            .collect())
    }

    /// Records narrowed by the selected filter.
    ///
    /// Nothing selected returns everything. A selection that cannot be
    /// loaded, decoded or applied is logged and also returns everything.
    pub fn queryset<S: FilterableStore>(&self, records: &S, selected: Option<Uuid>) -> Vec<S::Record> {
        let Some(id) = selected else {
            return records.all();
        };

        let query = match self.store.get(id) {
            Ok(Some(filter)) => filter.query(&self.codec),
            Ok(None) => {
                tracing::error!(id = %id, "Selected filter does not exist");
                return records.all();
            }
            Err(e) => Err(e),
        };

        let result = match query {
            Ok(Some(query)) => records.apply(&query),
            Ok(None) => return records.all(),
            Err(e) => Err(e),
        };

        result.unwrap_or_else(|e| {
            tracing::error!(id = %id, error = %e, "Error while applying filter, showing all records");
            records.all()
        })
    }

    /// Visible filters with their decoded query. Filters that fail to
    /// decode are skipped.
    pub fn decoded_visible(&self, actor: &Actor) -> Result<Vec<(StoredFilter, Group)>> {
        Ok(self
            .store
            .list_visible(actor)?
            .into_iter()
            .filter_map(|filter| match filter.query(&self.codec) {
                Ok(query) => Some((filter, query.unwrap_or_default())),
                Err(e) => {
                    tracing::warn!(id = %filter.id, title = %filter.title, error = %e, "Skipping undecodable filter");
                    None
                }
            })
            .collect())
    }
}
