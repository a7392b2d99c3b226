use indexmap::IndexMap;
use log::*;
use std::collections::HashSet;

use cda_schema::{Catalog, ColumnId, ProcessBeforeDisplay, TableId};

use crate::errors::ApiError;
use crate::filter::{FilterKind, FilterSpec};
use crate::models::RequestSpec;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryMode {
  Data,
  Summary,
}

/// Per-table slice of the projection: columns to select and the indices of
/// the filters owned by that table.
#[derive(Clone, Debug, Default)]
pub struct TableSelection {
  pub columns: Vec<ColumnId>,
  pub filters: Vec<usize>,
}

/// The request after column resolution: an ordered map from client-visible
/// tables to their projected columns and filters.
#[derive(Debug)]
pub struct NormalizedRequest {
  pub endpoint: TableId,
  pub filters: Vec<FilterSpec>,
  pub tables: IndexMap<TableId, TableSelection>,
}

pub fn normalize(
  catalog: &Catalog,
  endpoint: TableId,
  spec: &RequestSpec,
  mode: QueryMode,
) -> Result<NormalizedRequest, ApiError> {
  let mut filters: Vec<FilterSpec> = vec![];
  for raw in &spec.match_all {
    filters.push(FilterSpec::resolve(catalog, raw, FilterKind::MatchAll)?);
  }
  for raw in &spec.match_some {
    filters.push(FilterSpec::resolve(catalog, raw, FilterKind::MatchSome)?);
  }

  let mode_columns = |table: TableId| -> Vec<ColumnId> {
    return match mode {
      QueryMode::Data => catalog.data_columns(table),
      QueryMode::Summary => catalog.summary_columns(table),
    };
  };

  let mut tables: IndexMap<TableId, TableSelection> = IndexMap::new();
  let mut seen: HashSet<ColumnId> = HashSet::new();

  // Seed with the endpoint's default columns for the mode.
  let endpoint_columns = mode_columns(endpoint);
  seen.extend(&endpoint_columns);
  tables.insert(
    endpoint,
    TableSelection {
      columns: endpoint_columns,
      filters: vec![],
    },
  );

  // Filter columns join the projection of their owning table.
  for (index, filter) in filters.iter().enumerate() {
    let column = catalog.column_info(filter.selectable_column);
    let table = catalog.selectable_table(column);
    let entry = tables.entry(table).or_default();
    if seen.insert(column.id) {
      debug!("Adding filter column {} to the projection", column.unique_name);
      entry.columns.push(column.id);
    }
    entry.filters.push(index);
  }

  for name in &spec.add_columns {
    if let Some(table_name) = name.strip_suffix(".*") {
      let table = catalog.table_by_name(table_name)?;
      let entry = tables.entry(table.id).or_default();
      for column in mode_columns(table.id) {
        if seen.insert(column) {
          entry.columns.push(column);
        }
      }
    } else {
      let column = catalog.column_by_unique_name(name)?;
      let table = catalog.selectable_table(column);
      let entry = tables.entry(table).or_default();
      if seen.insert(column.id) {
        entry.columns.push(column.id);
      }
    }
  }

  // Exclusions always win over additions.
  for name in &spec.exclude_columns {
    let (table, excluded): (TableId, Vec<ColumnId>) =
      if let Some(table_name) = name.strip_suffix(".*") {
        let table = catalog.table_by_name(table_name)?;
        (table.id, catalog.data_columns(table.id))
      } else {
        let column = catalog.column_by_unique_name(name)?;
        (catalog.selectable_table(column), vec![column.id])
      };

    if let Some(entry) = tables.get_mut(&table) {
      entry.columns.retain(|id| !excluded.contains(id));
    }
  }

  if mode == QueryMode::Data && spec.external_reference {
    let table = catalog.table_by_name("external_reference")?;
    let columns: Vec<ColumnId> = table
      .columns
      .iter()
      .filter(|id| {
        catalog.column_info(**id).process_before_display
          == Some(ProcessBeforeDisplay::ExternalReferenceMetadata)
      })
      .copied()
      .collect();
    tables.insert(
      table.id,
      TableSelection {
        columns,
        filters: vec![],
      },
    );
  }

  return Ok(NormalizedRequest {
    endpoint,
    filters,
    tables,
  });
}
