use indexmap::IndexMap;
use log::*;
use std::collections::HashSet;
use std::sync::Arc;

use cda_schema::{
  Catalog, ColumnId, IDENTIFIERS_TABLE, RelationshipResolver, TableId, TableRelationship,
};

use crate::errors::ApiError;
use crate::filter::FilterKind;
use crate::query::normalize::NormalizedRequest;
use crate::query::preselect::Preselect;
use crate::sql::{Cte, Expr, Join, JoinKind, Select, SelectItem, TableExpr};

#[derive(Debug)]
pub struct DataQueryPlan {
  pub query: Select,
  pub count_query: Select,
}

/// One foreign-table sub-aggregation: its CTE, the join back to the
/// endpoint, and the outer select items referencing it.
struct Aggregation {
  cte: Cte,
  join: Join,
  items: Vec<SelectItem>,
}

/// Assembles the data-mode query: endpoint columns plus one aggregated CTE
/// per foreign (or virtual-parent) table, all gated by the filtered
/// preselect, wrapped so each row serializes to a single JSON object.
pub fn build_data_query(
  catalog: &Catalog,
  resolver: &RelationshipResolver,
  normalized: &NormalizedRequest,
  preselect: &Preselect,
  collate_results: bool,
) -> Result<DataQueryPlan, ApiError> {
  let endpoint = normalized.endpoint;
  let endpoint_info = catalog.table_info(endpoint);

  let mut ctes: Vec<Cte> = vec![preselect.cte.clone()];
  let mut joins: Vec<Join> = vec![];

  let mut endpoint_items: Vec<SelectItem> = vec![];
  let mut provenance_items: Vec<SelectItem> = vec![];
  let mut filter_items: Vec<SelectItem> = vec![];
  let mut added_items: Vec<SelectItem> = vec![];

  for (table_id, selection) in &normalized.tables {
    if selection.columns.is_empty() {
      debug!(
        "Skipping {} after applying EXCLUDE_COLUMNS",
        catalog.table_info(*table_id).name
      );
      continue;
    }

    if *table_id == endpoint {
      // Plain endpoint columns, then virtual columns grouped by their
      // physical parent and aggregated like a foreign table.
      let mut virtual_parents: IndexMap<TableId, Vec<ColumnId>> = IndexMap::new();
      for column_id in &selection.columns {
        let column = catalog.column_info(*column_id);
        if column.table == endpoint {
          endpoint_items.push(
            Expr::column(&endpoint_info.name, &column.column_name).aliased(&column.unique_name),
          );
        } else {
          virtual_parents.entry(column.table).or_default().push(*column_id);
        }
      }

      for (parent, columns) in virtual_parents {
        let aggregation = build_array_aggregation(
          catalog,
          resolver,
          normalized,
          preselect,
          endpoint,
          endpoint,
          parent,
          &columns,
          &selection.filters,
        )?;
        ctes.push(aggregation.cte);
        joins.push(aggregation.join);
        endpoint_items.extend(aggregation.items);
      }
      continue;
    }

    let table_info = catalog.table_info(*table_id);
    let relating = if table_info.name == IDENTIFIERS_TABLE {
      endpoint
    } else {
      table_info.primary_table.unwrap_or(endpoint)
    };

    let aggregation = if collate_results {
      build_json_aggregation(
        catalog,
        resolver,
        normalized,
        preselect,
        endpoint,
        relating,
        *table_id,
        &selection.columns,
        &selection.filters,
      )?
    } else {
      build_array_aggregation(
        catalog,
        resolver,
        normalized,
        preselect,
        endpoint,
        relating,
        *table_id,
        &selection.columns,
        &selection.filters,
      )?
    };

    let shadow_names: HashSet<&str> = selection
      .filters
      .iter()
      .map(|index| {
        catalog
          .column_info(normalized.filters[*index].selectable_column)
          .unique_name
          .as_str()
      })
      .collect();

    ctes.push(aggregation.cte);
    joins.push(aggregation.join);
    for item in aggregation.items {
      let alias = item.alias.as_deref().unwrap_or_default();
      if table_info.name == IDENTIFIERS_TABLE {
        provenance_items.push(item);
      } else if shadow_names.contains(alias) {
        filter_items.push(item);
      } else {
        added_items.push(item);
      }
    }
  }

  let mut items = endpoint_items;
  items.extend(provenance_items);
  items.extend(filter_items);
  items.extend(added_items);
  if items.is_empty() {
    return Err(ApiError::EmptyQueryError(
      "No columns left to select after applying EXCLUDE_COLUMNS".to_string(),
    ));
  }

  let Some(endpoint_pk) = endpoint_info.primary_key else {
    return Err(ApiError::MappingError(format!(
      "Endpoint table {} has no primary key",
      endpoint_info.name
    )));
  };

  let mut inner = Select {
    ctes,
    items,
    from: vec![TableExpr::table(&endpoint_info.name)],
    joins,
    // Stable ordering so successive pages tile the full result.
    order_by: vec![column_expr(catalog, endpoint_pk)],
    ..Default::default()
  };
  inner.and_where(Expr::InSubquery {
    expr: Box::new(column_expr(catalog, endpoint_pk)),
    negated: false,
    query: Box::new(preselect.query_for(catalog, endpoint)),
  });

  let query = Select {
    items: vec![
      Expr::func("row_to_json", vec![Expr::TableRef("json_result".to_string())]).unaliased(),
    ],
    from: vec![TableExpr::subquery(inner, "json_result")],
    ..Default::default()
  };

  // The unpaged total, computed alongside the row query.
  let mut count_inner = Select {
    ctes: vec![preselect.cte.clone()],
    items: vec![column_expr(catalog, endpoint_pk).unaliased()],
    from: vec![TableExpr::table(&endpoint_info.name)],
    ..Default::default()
  };
  count_inner.and_where(Expr::InSubquery {
    expr: Box::new(column_expr(catalog, endpoint_pk)),
    negated: false,
    query: Box::new(preselect.query_for(catalog, endpoint)),
  });
  let count_query = Select {
    items: vec![Expr::CountStar.unaliased()],
    from: vec![TableExpr::subquery(count_inner, "rows_to_count")],
    ..Default::default()
  };

  return Ok(DataQueryPlan { query, count_query });
}

fn column_expr(catalog: &Catalog, column: ColumnId) -> Expr {
  let info = catalog.column_info(column);
  return Expr::column(&catalog.table_info(info.table).name, &info.column_name);
}

/// Distinct array aggregate with nulls removed.
fn array_agg_item(catalog: &Catalog, column: ColumnId) -> SelectItem {
  let info = catalog.column_info(column);
  return Expr::func(
    "array_remove",
    vec![
      Expr::func(
        "array_agg",
        vec![Expr::Distinct(Box::new(column_expr(catalog, column)))],
      ),
      Expr::Literal(crate::sql::Literal::Null),
    ],
  )
  .aliased(&info.unique_name);
}

/// The CTE-side join column: the mapping-side column when the path crosses a
/// mapping table, the foreign-side FK column otherwise.
fn relating_column(relationship: &TableRelationship) -> ColumnId {
  if relationship.requires_mapping_table() {
    return relationship
      .local_mapping_column
      .expect("mapping relationship without mapping columns");
  }
  return relationship.foreign_column;
}

/// Shared skeleton of both aggregation shapes: the FROM, gating, mapping
/// join, discriminator filters, virtual-parent joins and local filter
/// predicates of the foreign table's sub-select.
#[allow(clippy::too_many_arguments)]
fn build_foreign_base(
  catalog: &Catalog,
  resolver: &RelationshipResolver,
  normalized: &NormalizedRequest,
  preselect: &Preselect,
  endpoint: TableId,
  relating: TableId,
  foreign: TableId,
  columns: &[ColumnId],
  filter_indices: &[usize],
) -> Result<(Select, Arc<TableRelationship>, ColumnId), ApiError> {
  let foreign_info = catalog.table_info(foreign);

  let gate_column = if relating != foreign {
    let relationship = resolver.resolve(catalog, relating, foreign)?;
    relating_column(&relationship)
  } else {
    let Some(pk) = catalog.table_info(relating).primary_key else {
      return Err(ApiError::MappingError(format!(
        "Table {} has no primary key to gate on",
        catalog.table_info(relating).name
      )));
    };
    pk
  };

  let endpoint_relationship = resolver.resolve(catalog, endpoint, foreign)?;
  let key_column = relating_column(&endpoint_relationship);

  let mut query = Select {
    items: vec![],
    from: vec![TableExpr::table(&foreign_info.name)],
    ..Default::default()
  };

  // Columns physically living in a side table of `foreign` need their
  // parent joined in.
  let mut cte_tables: Vec<TableId> = vec![foreign];
  let mut virtual_parents: Vec<TableId> = vec![];
  for column_id in columns {
    let parent = catalog.column_info(*column_id).table;
    if parent != foreign && !virtual_parents.contains(&parent) {
      virtual_parents.push(parent);
    }
  }
  for parent in virtual_parents {
    let relationship = resolver.resolve(catalog, foreign, parent)?;
    let parent_info = catalog.table_info(parent);
    let on = if relationship.requires_mapping_table() {
      Expr::eq(
        column_expr(catalog, relationship.foreign_column),
        column_expr(
          catalog,
          relationship
            .foreign_mapping_column
            .expect("mapping relationship without mapping columns"),
        ),
      )
    } else {
      Expr::eq(
        column_expr(catalog, relationship.local_column),
        column_expr(catalog, relationship.foreign_column),
      )
    };
    query.joins.push(Join {
      kind: JoinKind::Left,
      table: TableExpr::table(&parent_info.name),
      on,
    });
    cte_tables.push(parent);
  }

  query.and_where(Expr::InSubquery {
    expr: Box::new(column_expr(catalog, gate_column)),
    negated: false,
    query: Box::new(preselect.query_for(catalog, relating)),
  });

  if endpoint_relationship.requires_mapping_table() {
    let mapping = endpoint_relationship
      .mapping_table(catalog)
      .ok_or_else(|| ApiError::MappingError("Mapping relationship without mapping table".to_string()))?;
    query.joins.push(Join {
      kind: JoinKind::Inner,
      table: TableExpr::table(&catalog.table_info(mapping).name),
      on: Expr::eq(
        column_expr(catalog, endpoint_relationship.foreign_column),
        column_expr(
          catalog,
          endpoint_relationship
            .foreign_mapping_column
            .expect("mapping relationship without mapping columns"),
        ),
      ),
    });
  }

  for additional in &endpoint_relationship.additional_filters {
    query.and_where(Expr::eq(
      column_expr(catalog, additional.column),
      Expr::string(&additional.value),
    ));
  }

  // Filters owned by this table apply inside the aggregation so arrays only
  // carry matching values.
  let mut match_all: Vec<Expr> = vec![];
  let mut match_some: Vec<Expr> = vec![];
  for index in filter_indices {
    let filter = &normalized.filters[*index];
    if !cte_tables.contains(&catalog.column_info(filter.column).table) {
      continue;
    }
    let Some(predicate) = filter.predicate(catalog) else {
      continue;
    };
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

  return Ok((query, endpoint_relationship, key_column));
}

#[allow(clippy::too_many_arguments)]
fn build_array_aggregation(
  catalog: &Catalog,
  resolver: &RelationshipResolver,
  normalized: &NormalizedRequest,
  preselect: &Preselect,
  endpoint: TableId,
  relating: TableId,
  foreign: TableId,
  columns: &[ColumnId],
  filter_indices: &[usize],
) -> Result<Aggregation, ApiError> {
  let (mut query, endpoint_relationship, key_column) = build_foreign_base(
    catalog, resolver, normalized, preselect, endpoint, relating, foreign, columns, filter_indices,
  )?;

  let foreign_name = &catalog.table_info(foreign).name;
  let endpoint_name = &catalog.table_info(endpoint).name;
  let cte_name = format!("{foreign_name}_{endpoint_name}_columns");
  debug!("Building {cte_name}");

  let key_info = catalog.column_info(key_column);
  let key_expr = column_expr(catalog, key_column);

  query.items.push(key_expr.clone().aliased(&key_info.column_name));
  for column_id in columns {
    query.items.push(array_agg_item(catalog, *column_id));
  }
  query.group_by = vec![key_expr];

  let join = Join {
    kind: JoinKind::Left,
    table: TableExpr::table(&cte_name),
    on: Expr::eq(
      Expr::column(&cte_name, &key_info.column_name),
      column_expr(catalog, endpoint_relationship.local_column),
    ),
  };

  // Empty groups surface as empty lists rather than null.
  let items = columns
    .iter()
    .map(|column_id| {
      let unique_name = &catalog.column_info(*column_id).unique_name;
      return Expr::func(
        "coalesce",
        vec![Expr::column(&cte_name, unique_name), Expr::Raw("'{}'")],
      )
      .aliased(unique_name);
    })
    .collect();

  return Ok(Aggregation {
    cte: Cte {
      name: cte_name,
      query,
    },
    join,
    items,
  });
}

#[allow(clippy::too_many_arguments)]
fn build_json_aggregation(
  catalog: &Catalog,
  resolver: &RelationshipResolver,
  normalized: &NormalizedRequest,
  preselect: &Preselect,
  endpoint: TableId,
  relating: TableId,
  foreign: TableId,
  columns: &[ColumnId],
  filter_indices: &[usize],
) -> Result<Aggregation, ApiError> {
  let (mut inner, endpoint_relationship, key_column) = build_foreign_base(
    catalog, resolver, normalized, preselect, endpoint, relating, foreign, columns, filter_indices,
  )?;

  let foreign_name = catalog.table_info(foreign).name.clone();
  let cte_name = format!("{foreign_name}_collated_preselect");
  let aggregate_name = format!("{foreign_name}_columns");
  debug!("Building {cte_name}");

  let key_info = catalog.column_info(key_column);
  let key_name = key_info.column_name.clone();

  inner
    .items
    .push(column_expr(catalog, key_column).aliased(&key_name));
  for column_id in columns {
    let column = catalog.column_info(*column_id);
    inner
      .items
      .push(column_expr(catalog, *column_id).aliased(&column.unique_name));
  }

  // One JSON object per row, then aggregated per join key.
  let mut json_args: Vec<Expr> = vec![];
  for column_id in columns {
    let unique_name = &catalog.column_info(*column_id).unique_name;
    json_args.push(Expr::string(unique_name));
    json_args.push(Expr::column("subquery", unique_name));
  }
  let json_subquery = Select {
    items: vec![
      Expr::column("subquery", &key_name).aliased(&key_name),
      Expr::func("json_build_object", json_args).aliased("json_results"),
    ],
    from: vec![TableExpr::subquery(inner, "subquery")],
    ..Default::default()
  };

  let cte_query = Select {
    items: vec![
      Expr::column("json_subquery", &key_name).aliased(&key_name),
      Expr::func(
        "array_agg",
        vec![Expr::column("json_subquery", "json_results")],
      )
      .aliased(&aggregate_name),
    ],
    from: vec![TableExpr::subquery(json_subquery, "json_subquery")],
    group_by: vec![Expr::column("json_subquery", &key_name)],
    ..Default::default()
  };

  let join = Join {
    kind: JoinKind::Left,
    table: TableExpr::table(&cte_name),
    on: Expr::eq(
      Expr::column(&cte_name, &key_name),
      column_expr(catalog, endpoint_relationship.local_column),
    ),
  };

  let items = vec![Expr::column(&cte_name, &aggregate_name).aliased(&aggregate_name)];

  return Ok(Aggregation {
    cte: Cte {
      name: cte_name,
      query: cte_query,
    },
    join,
    items,
  });
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::RequestSpec;
  use crate::query::normalize::{QueryMode, normalize};
  use crate::query::preselect::build_preselect;
  use crate::sql::render_for_log;
  use cda_schema::testing::test_catalog;

  fn data_sql(
    catalog: &Catalog,
    endpoint: &str,
    match_all: &[&str],
    add_columns: &[&str],
    collate: bool,
  ) -> (String, String) {
    let resolver = RelationshipResolver::new();
    let endpoint = catalog.table_by_name(endpoint).unwrap().id;
    let spec = RequestSpec {
      match_all: match_all.iter().map(|s| s.to_string()).collect(),
      add_columns: add_columns.iter().map(|s| s.to_string()).collect(),
      collate_results: collate,
      ..Default::default()
    };
    let normalized = normalize(catalog, endpoint, &spec, QueryMode::Data).unwrap();
    let preselect = build_preselect(catalog, &resolver, &normalized).unwrap();
    let plan = build_data_query(catalog, &resolver, &normalized, &preselect, collate).unwrap();
    return (render_for_log(&plan.query), render_for_log(&plan.count_query));
  }

  #[test]
  fn test_default_subject_query() {
    let catalog = test_catalog();
    let (sql, count_sql) = data_sql(&catalog, "subject", &[], &[], false);

    assert!(sql.contains("row_to_json(\"json_result\")"), "{sql}");
    assert!(sql.contains("WITH \"filtered_preselect\" AS ("), "{sql}");
    assert!(
      sql.contains("\"subject\".\"species\" AS \"species\""),
      "{sql}"
    );
    assert!(
      sql.contains(
        "\"subject\".\"id_alias\" IN (SELECT \"filtered_preselect\".\"subject_id_alias\" FROM \"filtered_preselect\")"
      ),
      "{sql}"
    );

    assert!(count_sql.contains("count(*)"), "{count_sql}");
    assert!(count_sql.contains("\"rows_to_count\""), "{count_sql}");
  }

  #[test]
  fn test_foreign_filter_builds_array_cte() {
    let catalog = test_catalog();
    let (sql, _) = data_sql(&catalog, "subject", &["sex like m*"], &[], false);

    assert!(sql.contains("\"observation_subject_columns\" AS ("), "{sql}");
    assert!(
      sql.contains("array_remove(array_agg(DISTINCT \"observation\".\"sex\"), NULL) AS \"sex\""),
      "{sql}"
    );
    // The filter predicate applies inside the aggregation.
    assert!(
      sql.contains("coalesce(upper(\"observation\".\"sex\"), '') LIKE upper('m%')"),
      "{sql}"
    );
    assert!(sql.contains("GROUP BY \"observation\".\"subject_alias\""), "{sql}");
    assert!(
      sql.contains("LEFT OUTER JOIN \"observation_subject_columns\" ON \"observation_subject_columns\".\"subject_alias\" = \"subject\".\"id_alias\""),
      "{sql}"
    );
    // Empty groups coalesce to empty arrays.
    assert!(
      sql.contains("coalesce(\"observation_subject_columns\".\"sex\", '{}') AS \"sex\""),
      "{sql}"
    );
  }

  #[test]
  fn test_mapping_table_join_in_cte() {
    let catalog = test_catalog();
    let (sql, _) = data_sql(&catalog, "subject", &[], &["file.*"], false);

    assert!(sql.contains("\"file_subject_columns\" AS ("), "{sql}");
    assert!(
      sql.contains("JOIN \"file_describes_subject\" ON \"file\".\"id_alias\" = \"file_describes_subject\".\"file_alias\""),
      "{sql}"
    );
    assert!(
      sql.contains("GROUP BY \"file_describes_subject\".\"subject_alias\""),
      "{sql}"
    );
  }

  #[test]
  fn test_collated_json_shape() {
    let catalog = test_catalog();
    let (sql, _) = data_sql(&catalog, "subject", &[], &["observation.*"], true);

    assert!(sql.contains("\"observation_collated_preselect\" AS ("), "{sql}");
    assert!(sql.contains("json_build_object("), "{sql}");
    assert!(sql.contains("'sex', \"subquery\".\"sex\""), "{sql}");
    assert!(
      sql.contains("array_agg(\"json_subquery\".\"json_results\") AS \"observation_columns\""),
      "{sql}"
    );
  }

  #[test]
  fn test_polymorphic_identifiers_aggregation() {
    let catalog = test_catalog();
    let (sql, _) = data_sql(&catalog, "subject", &[], &["upstream_identifiers.*"], false);

    assert!(
      sql.contains("\"upstream_identifiers_subject_columns\" AS ("),
      "{sql}"
    );
    assert!(
      sql.contains("\"upstream_identifiers\".\"cda_table\" = 'subject'"),
      "{sql}"
    );
  }

  #[test]
  fn test_select_item_ordering() {
    let catalog = test_catalog();
    let (sql, _) = data_sql(
      &catalog,
      "subject",
      &["sex = male"],
      &["upstream_identifiers.*", "project_id"],
      false,
    );

    // Endpoint columns first, then provenance aggregates, then the filter
    // shadow, then plain additions.
    let species = sql.find("AS \"species\"").expect("species");
    let provenance = sql
      .find("coalesce(\"upstream_identifiers_subject_columns\"")
      .expect("provenance");
    let shadow = sql
      .find("coalesce(\"observation_subject_columns\".\"sex\"")
      .expect("shadow");
    let added = sql
      .find("coalesce(\"project_subject_columns\".\"project_id\"")
      .expect("added");

    assert!(species < provenance, "{sql}");
    assert!(provenance < shadow, "{sql}");
    assert!(shadow < added, "{sql}");
  }

  #[test]
  fn test_virtual_columns_aggregate_under_endpoint() {
    let catalog = test_catalog();
    let (sql, _) = data_sql(&catalog, "file", &[], &[], false);

    // tumor_vs_normal and anatomic_site ride along with the file endpoint
    // as array aggregations from their physical side tables.
    assert!(sql.contains("\"file_tumor_vs_normal_file_columns\" AS ("), "{sql}");
    assert!(
      sql.contains("array_remove(array_agg(DISTINCT \"file_tumor_vs_normal\".\"tumor_vs_normal\"), NULL)"),
      "{sql}"
    );
  }
}
