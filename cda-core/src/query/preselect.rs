use indexmap::IndexMap;
use log::*;

use cda_schema::{Catalog, ColumnId, RelationshipResolver, SchemaError, TableId};

use crate::errors::ApiError;
use crate::filter::{FilterKind, FilterSpec};
use crate::query::normalize::NormalizedRequest;
use crate::sql::{Cte, Expr, Join, JoinKind, Select, TableExpr};

pub const PRESELECT_NAME: &str = "filtered_preselect";

/// The `filtered_preselect` CTE: the set of endpoint (and mapping-side) ids
/// surviving the request's filters, which gates every downstream selection.
#[derive(Debug)]
pub struct Preselect {
  pub cte: Cte,
  /// Table -> the mapping-side column exposed for it in the CTE.
  pub tables: IndexMap<TableId, ColumnId>,
  endpoint: TableId,
}

impl Preselect {
  pub fn label<'a>(&self, catalog: &'a Catalog, table: TableId) -> Option<&'a str> {
    let column = self.tables.get(&table)?;
    return Some(&catalog.column_info(*column).unique_name);
  }

  /// `SELECT "<label>" FROM filtered_preselect` for the given table, falling
  /// back to the endpoint column when the table is not part of the CTE.
  pub fn query_for(&self, catalog: &Catalog, table: TableId) -> Select {
    let label = self
      .label(catalog, table)
      .or_else(|| self.label(catalog, self.endpoint))
      .unwrap_or_default();
    return Select {
      items: vec![Expr::column(PRESELECT_NAME, label).unaliased()],
      from: vec![TableExpr::table(PRESELECT_NAME)],
      ..Default::default()
    };
  }

  /// The CTE column itself, e.g. for distinct counts.
  pub fn column_expr(&self, catalog: &Catalog, table: TableId) -> Option<Expr> {
    return self
      .label(catalog, table)
      .map(|label| Expr::column(PRESELECT_NAME, label));
  }
}

pub fn build_preselect(
  catalog: &Catalog,
  resolver: &RelationshipResolver,
  normalized: &NormalizedRequest,
) -> Result<Preselect, ApiError> {
  let endpoint = normalized.endpoint;

  // Mapping tables sitting between the endpoint and any table of the
  // request, except the external-reference mapping.
  let mut mapping_tables: Vec<TableId> = vec![];
  for table in normalized.tables.keys() {
    if *table == endpoint {
      continue;
    }
    let relationship = match resolver.resolve(catalog, endpoint, *table) {
      Ok(relationship) => relationship,
      Err(SchemaError::RelationshipNotFound(message))
        if catalog.table_info(*table).name == "external_reference" =>
      {
        debug!("Skipping unreachable external reference table: {message}");
        continue;
      }
      Err(err) => return Err(err.into()),
    };
    if !relationship.requires_mapping_table() {
      continue;
    }
    let Some(mapping) = relationship.mapping_table(catalog) else {
      continue;
    };
    if catalog.table_info(mapping).name.ends_with("external_reference") {
      continue;
    }
    if !mapping_tables.contains(&mapping) {
      debug!(
        "Including {} in the filtered preselect",
        catalog.table_info(mapping).name
      );
      mapping_tables.push(mapping);
    }
  }

  let mut map: IndexMap<TableId, ColumnId> = IndexMap::new();
  let mut from: Vec<TableExpr> = vec![];
  let mut joins: Vec<Join> = vec![];

  if mapping_tables.is_empty() {
    let endpoint_info = catalog.table_info(endpoint);
    let Some(pk) = endpoint_info.primary_key else {
      return Err(ApiError::MappingError(format!(
        "Endpoint table {} has no primary key",
        endpoint_info.name
      )));
    };
    map.insert(endpoint, pk);
    from.push(TableExpr::table(&endpoint_info.name));
  } else {
    for (index, mapping) in mapping_tables.iter().enumerate() {
      let mapping_info = catalog.table_info(*mapping);
      let mut join_on: Option<Expr> = None;

      for column_id in &mapping_info.columns {
        let column = catalog.column_info(*column_id);
        let Some(target) = column.foreign_key_target else {
          return Err(ApiError::MappingError(format!(
            "Only expected mapping columns which have foreign keys, got {}",
            column.unique_name
          )));
        };
        let target_table = catalog.column_info(target).table;

        if let Some(existing) = map.get(&target_table) {
          if index > 0 && join_on.is_none() {
            join_on = Some(Expr::eq(
              column_expr(catalog, *column_id),
              column_expr(catalog, *existing),
            ));
          }
        } else {
          map.insert(target_table, *column_id);
        }
      }

      if index == 0 {
        from.push(TableExpr::table(&mapping_info.name));
      } else if let Some(on) = join_on {
        joins.push(Join {
          kind: JoinKind::Inner,
          table: TableExpr::table(&mapping_info.name),
          on,
        });
      } else {
        from.push(TableExpr::table(&mapping_info.name));
      }
    }
  }

  let items = map
    .values()
    .map(|column_id| {
      let column = catalog.column_info(*column_id);
      return column_expr(catalog, *column_id).aliased(&column.unique_name);
    })
    .collect();

  let mut query = Select {
    items,
    from,
    joins,
    ..Default::default()
  };

  let mut match_all: Vec<Expr> = vec![];
  let mut match_some: Vec<Expr> = vec![];
  for filter in &normalized.filters {
    let predicate = lower_preselect_filter(catalog, resolver, filter, &map, endpoint)?;
    match filter.kind {
      FilterKind::MatchAll => match_all.push(predicate),
      FilterKind::MatchSome => match_some.push(predicate),
    }
  }
  if !match_all.is_empty() {
    query.and_where(Expr::and(match_all));
  }
  if !match_some.is_empty() {
    query.and_where(Expr::or(match_some));
  }

  return Ok(Preselect {
    cte: Cte {
      name: PRESELECT_NAME.to_string(),
      query,
    },
    tables: map,
    endpoint,
  });
}

fn column_expr(catalog: &Catalog, column: ColumnId) -> Expr {
  let info = catalog.column_info(column);
  return Expr::column(&catalog.table_info(info.table).name, &info.column_name);
}

/// Lowers one filter to a predicate rooted at the preselect's FROM set:
/// either the literal predicate or an EXISTS subquery reaching the filter's
/// table.
fn lower_preselect_filter(
  catalog: &Catalog,
  resolver: &RelationshipResolver,
  filter: &FilterSpec,
  map: &IndexMap<TableId, ColumnId>,
  endpoint: TableId,
) -> Result<Expr, ApiError> {
  let filter_table = catalog.column_info(filter.column).table;
  let predicate = filter.predicate(catalog);

  // The preselect-side anchor: the filter table's entity parent when it is
  // part of the preselect, the endpoint otherwise.
  let mut anchor = catalog
    .table_info(filter_table)
    .primary_table
    .unwrap_or(endpoint);
  if !map.contains_key(&anchor) {
    anchor = endpoint;
  }
  let anchor_column = column_expr(catalog, map[&anchor]);

  if anchor == filter_table {
    if map.len() == 1 {
      return predicate.ok_or_else(|| {
        ApiError::InternalError(format!(
          "Filter \"{}\" produced no predicate for a direct preselect",
          filter.raw
        ))
      });
    }

    // The filter's table is in the preselect but spans other tables too;
    // correlate through its primary key.
    let table_info = catalog.table_info(filter_table);
    let Some(pk) = table_info.primary_key else {
      return Err(ApiError::MappingError(format!(
        "Table {} has no primary key to correlate on",
        table_info.name
      )));
    };
    let mut subquery = Select {
      items: vec![Expr::integer(1).unaliased()],
      from: vec![TableExpr::table(&table_info.name)],
      ..Default::default()
    };
    subquery.and_where(Expr::eq(anchor_column, column_expr(catalog, pk)));
    if let Some(predicate) = predicate {
      subquery.and_where(predicate);
    }
    return Ok(Expr::Exists(Box::new(subquery)));
  }

  let relationship = resolver.resolve(catalog, anchor, filter_table)?;

  let mut subquery = if relationship.requires_mapping_table() {
    let mapping = relationship
      .mapping_table(catalog)
      .ok_or_else(|| ApiError::MappingError("Mapping relationship without mapping table".to_string()))?;
    let filter_table_name = catalog.table_info(filter_table).name.clone();
    let local_mapping = relationship
      .local_mapping_column
      .ok_or_else(|| ApiError::MappingError("Missing local mapping column".to_string()))?;
    let foreign_mapping = relationship
      .foreign_mapping_column
      .ok_or_else(|| ApiError::MappingError("Missing foreign mapping column".to_string()))?;

    let mut subquery = Select {
      items: vec![Expr::integer(1).unaliased()],
      from: vec![TableExpr::table(&catalog.table_info(mapping).name)],
      joins: vec![Join {
        kind: JoinKind::Inner,
        table: TableExpr::table(&filter_table_name),
        on: Expr::eq(
          column_expr(catalog, foreign_mapping),
          column_expr(catalog, relationship.foreign_column),
        ),
      }],
      ..Default::default()
    };
    subquery.and_where(Expr::eq(anchor_column, column_expr(catalog, local_mapping)));
    subquery
  } else {
    let foreign_parent = catalog.column_info(relationship.foreign_column).table;
    let mut subquery = Select {
      items: vec![Expr::integer(1).unaliased()],
      from: vec![TableExpr::table(&catalog.table_info(foreign_parent).name)],
      ..Default::default()
    };
    subquery.and_where(Expr::eq(
      anchor_column,
      column_expr(catalog, relationship.foreign_column),
    ));
    subquery
  };

  for additional in &relationship.additional_filters {
    subquery.and_where(Expr::eq(
      column_expr(catalog, additional.column),
      Expr::string(&additional.value),
    ));
  }
  if let Some(predicate) = predicate {
    subquery.and_where(predicate);
  }

  return Ok(Expr::Exists(Box::new(subquery)));
}
