use log::*;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::catalog::{Catalog, ColumnId, TableId, TableRole};
use crate::error::SchemaError;

/// The polymorphic provenance table keyed by `(cda_table, id_alias)`.
pub const IDENTIFIERS_TABLE: &str = "upstream_identifiers";

/// Pairs with no join path by design; resolution reports them missing
/// instead of failing hard.
const IGNORED_PAIRS: [(&str, &str); 1] = [("file", "external_reference")];

/// Extra predicate a join path must carry, e.g. the discriminator of a
/// polymorphic side table.
#[derive(Clone, Debug, PartialEq)]
pub struct AdditionalFilter {
  pub column: ColumnId,
  pub value: String,
}

/// Canonical join path from an endpoint table to another table.
#[derive(Clone, Debug, PartialEq)]
pub struct TableRelationship {
  pub local_column: ColumnId,
  pub foreign_column: ColumnId,
  pub local_mapping_column: Option<ColumnId>,
  pub foreign_mapping_column: Option<ColumnId>,
  pub additional_filters: Vec<AdditionalFilter>,
}

impl TableRelationship {
  pub fn requires_mapping_table(&self) -> bool {
    return self.local_mapping_column.is_some() && self.foreign_mapping_column.is_some();
  }

  /// Parent table of the mapping-side columns, when the path goes through one.
  pub fn mapping_table(&self, catalog: &Catalog) -> Option<TableId> {
    return self
      .local_mapping_column
      .map(|id| catalog.column_info(id).table);
  }
}

/// Resolves and caches canonical relationships between endpoint tables and
/// the rest of the schema. Resolution is lazy; a missing path only surfaces
/// when a request needs it.
#[derive(Default)]
pub struct RelationshipResolver {
  cache: RwLock<HashMap<(TableId, TableId), Arc<TableRelationship>>>,
}

impl RelationshipResolver {
  pub fn new() -> Self {
    return Self::default();
  }

  pub fn resolve(
    &self,
    catalog: &Catalog,
    local: TableId,
    foreign: TableId,
  ) -> Result<Arc<TableRelationship>, SchemaError> {
    if let Some(hit) = self.cache.read().get(&(local, foreign)) {
      return Ok(hit.clone());
    }

    let relationship = Arc::new(compute_relationship(catalog, local, foreign)?);
    self
      .cache
      .write()
      .insert((local, foreign), relationship.clone());
    return Ok(relationship);
  }
}

fn compute_relationship(
  catalog: &Catalog,
  local: TableId,
  foreign: TableId,
) -> Result<TableRelationship, SchemaError> {
  let local_info = catalog.table_info(local);
  let foreign_info = catalog.table_info(foreign);

  if local_info.role != TableRole::Endpoint {
    return Err(SchemaError::RelationshipNotFound(format!(
      "Unexpected local table: {}. Relationships are only resolved from endpoint tables",
      local_info.name
    )));
  }

  debug!(
    "Resolving relationship between {} and {}",
    local_info.name, foreign_info.name
  );

  let mut local_column: Option<ColumnId> = None;
  let mut foreign_column: Option<ColumnId> = None;
  let mut local_mapping_column: Option<ColumnId> = None;
  let mut foreign_mapping_column: Option<ColumnId> = None;

  if let Some(fk) = foreign_info.foreign_key_to(local) {
    // Direct foreign key from the foreign table into the endpoint.
    local_column = Some(fk.target_column);
    foreign_column = Some(fk.parent_column);
  } else if foreign_info.name == IDENTIFIERS_TABLE {
    // Polymorphic: joined on the endpoint primary key, discriminated below.
    let Some(pk) = local_info.primary_key else {
      return Err(SchemaError::Relationship(format!(
        "Endpoint table {} has no primary key",
        local_info.name
      )));
    };
    local_column = Some(pk);
    foreign_column = Some(
      catalog
        .table_column(&foreign_info.name, "id_alias")?
        .id,
    );
  }

  if local_column.is_none() || foreign_column.is_none() {
    // Enumerate candidate paths through mapping tables.
    let mut local_fks: Vec<ColumnId> = vec![];
    let mut foreign_fks: Vec<ColumnId> = vec![];
    let mut foreign_columns: Vec<ColumnId> = vec![];

    for mapping in catalog.tables().filter(|t| t.role == TableRole::Mapping) {
      let Some(fk_to_local) = mapping.foreign_key_to(local) else {
        continue;
      };

      if let Some(fk_to_foreign) = mapping.foreign_key_to(foreign) {
        push_unique(&mut local_fks, fk_to_local.parent_column);
        push_unique(&mut foreign_fks, fk_to_foreign.parent_column);
      } else {
        // No direct mapping edge; look for a mapping FK sharing its target
        // column with one of the foreign table's FKs, e.g. subject ->
        // file_tumor_vs_normal through file_describes_subject.
        for mapping_fk in &mapping.foreign_keys {
          for foreign_fk in &foreign_info.foreign_keys {
            if foreign_fk.target_column == mapping_fk.target_column {
              push_unique(&mut local_fks, fk_to_local.parent_column);
              push_unique(&mut foreign_fks, mapping_fk.parent_column);
              push_unique(&mut foreign_columns, foreign_fk.parent_column);
            }
          }
        }
      }
    }

    if !local_fks.is_empty() && !foreign_fks.is_empty() {
      if local_fks.len() > 1 || foreign_fks.len() > 1 {
        return Err(SchemaError::Relationship(format!(
          "Unexpectedly found more than one path between {}, {}",
          local_info.name, foreign_info.name
        )));
      }
      if foreign_columns.len() > 1 {
        return Err(SchemaError::Relationship(format!(
          "Unexpectedly found more than one potential secondary column {}, {}",
          local_info.name, foreign_info.name
        )));
      }

      let local_fk = local_fks[0];
      let foreign_fk = foreign_fks[0];
      if local_fk == foreign_fk {
        return Err(SchemaError::Relationship(format!(
          "Unexpectedly found relationship path where {}, {} relate via the same foreign key",
          local_info.name, foreign_info.name
        )));
      }

      local_column = Some(fk_target(catalog, local_fk)?);
      local_mapping_column = Some(local_fk);
      foreign_mapping_column = Some(foreign_fk);
      foreign_column = Some(match foreign_columns.first() {
        Some(column) => *column,
        None => fk_target(catalog, foreign_fk)?,
      });
    }
  }

  let (Some(local_column), Some(foreign_column)) = (local_column, foreign_column) else {
    if IGNORED_PAIRS.contains(&(local_info.name.as_str(), foreign_info.name.as_str())) {
      return Err(SchemaError::RelationshipNotFound(format!(
        "Relationship not found between {} and {}",
        local_info.name, foreign_info.name
      )));
    }
    return Err(SchemaError::Relationship(format!(
      "Unable to find a path between {}, {}",
      local_info.name, foreign_info.name
    )));
  };

  let mut additional_filters: Vec<AdditionalFilter> = vec![];
  if foreign_info.name == IDENTIFIERS_TABLE {
    additional_filters.push(AdditionalFilter {
      column: catalog.table_column(&foreign_info.name, "cda_table")?.id,
      value: local_info.name.clone(),
    });
  }

  let relationship = TableRelationship {
    local_column,
    foreign_column,
    local_mapping_column,
    foreign_mapping_column,
    additional_filters,
  };
  debug!(
    "Resolved {} -> {}: mapping={}",
    local_info.name,
    foreign_info.name,
    relationship.requires_mapping_table()
  );
  return Ok(relationship);
}

fn push_unique(vec: &mut Vec<ColumnId>, id: ColumnId) {
  if !vec.contains(&id) {
    vec.push(id);
  }
}

fn fk_target(catalog: &Catalog, parent_column: ColumnId) -> Result<ColumnId, SchemaError> {
  let column = catalog.column_info(parent_column);
  return column.foreign_key_target.ok_or_else(|| {
    SchemaError::Mapping(format!(
      "Only expected mapping columns which have foreign keys, got {}",
      column.unique_name
    ))
  });
}
