//! Advanced filters: composable boolean queries over model fields.
//!
//! Queries are trees of AND/OR groups over field comparisons. They are
//! edited as flat rows, transported as (base64) JSON and stored with
//! per-user and per-group sharing in DuckDB.

pub mod builder;
pub mod choices;
pub mod config;
pub mod error;
pub mod init;
pub mod listing;
pub mod query;
pub mod record;
pub mod schema;
pub mod store;

pub use builder::{FieldSpec, FilterRow, QueryBuilder};
pub use choices::{Choice, DistinctValues, FieldChoices};
pub use config::Config;
pub use error::{Error, Result};
pub use listing::{AdvancedListFilter, FilterableStore};
pub use query::{
    Connector, FieldValues, Group, Leaf, Node, Operator, QueryCodec, QueryMapping,
    TimestampBounds, Value,
};
pub use record::{can_edit, Actor, StoredFilter};
pub use schema::{FieldDescriptor, FieldKind, SchemaProvider, SchemaRegistry};
pub use store::Store;
