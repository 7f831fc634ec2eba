//! Boolean filter expressions and their transport encoding.
//!
//! # Overview
//!
//! - **Tree**: `Group` nodes (AND/OR, optionally negated) over `Leaf`
//!   comparisons (`field__lookup` = value).
//! - **Mapping**: `{connector, negated, children}` with leaves as
//!   `[qualified_key, value]` pairs.
//! - **String**: compact JSON of the mapping, optionally base64.

mod codec;
mod expr;

pub use codec::{
    dt2ts, split_qualified_key, ts2dt, FieldValues, MappingChild, QueryCodec, QueryMapping,
    TimestampBounds, OR_FIELD,
};
pub use expr::{Connector, Group, Leaf, Node, Operator, Value};

pub(crate) use codec::json_to_value;

#[cfg(test)]
mod tests;
