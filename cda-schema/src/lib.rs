#![forbid(unsafe_code, clippy::unwrap_used)]
#![allow(clippy::needless_return)]
#![warn(clippy::await_holding_lock, clippy::inefficient_to_string)]

mod catalog;
mod error;
mod postgres;
mod relationship;

pub mod testing;

pub use catalog::{
  Catalog, ColumnId, ColumnInfo, ColumnMetadataRow, ColumnSnapshot, ColumnType, ForeignKey,
  ForeignKeySnapshot, ProcessBeforeDisplay, TableId, TableInfo, TableRole, TableSnapshot,
};
pub use error::SchemaError;
pub use postgres::{build_catalog, fetch_column_metadata, introspect_schema};
pub use relationship::{
  AdditionalFilter, IDENTIFIERS_TABLE, RelationshipResolver, TableRelationship,
};
