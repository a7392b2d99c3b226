use indexmap::IndexMap;
use itertools::Itertools;
use log::*;

use cda_schema::{
  Catalog, ColumnId, ColumnType, ProcessBeforeDisplay, RelationshipResolver, TableId, TableRole,
};

use crate::errors::ApiError;
use crate::query::normalize::NormalizedRequest;
use crate::query::preselect::Preselect;
use crate::sql::{Cte, Expr, Literal, Select, SelectItem, TableExpr};

/// Assembles the one-row summary query: distinct endpoint counts, the other
/// endpoint's count, per-column statistical aggregates, and the data-source
/// subset counts, all as labeled scalar subqueries over per-table preselect
/// CTEs.
pub fn build_summary_query(
  catalog: &Catalog,
  resolver: &RelationshipResolver,
  normalized: &NormalizedRequest,
  preselect: &Preselect,
) -> Result<Select, ApiError> {
  let endpoint = normalized.endpoint;

  let mut ctes: Vec<Cte> = vec![preselect.cte.clone()];
  let mut count_items: Vec<SelectItem> = vec![];
  let mut endpoint_items: Vec<SelectItem> = vec![];
  let mut foreign_items: Vec<SelectItem> = vec![];

  // total_count: distinct endpoint ids surviving the filters.
  let endpoint_preselect_column = preselect
    .column_expr(catalog, endpoint)
    .ok_or_else(|| ApiError::MappingError("Preselect lost its endpoint column".to_string()))?;
  count_items.push(
    Expr::ScalarSubquery(Box::new(Select {
      items: vec![
        Expr::func(
          "count",
          vec![Expr::Distinct(Box::new(endpoint_preselect_column))],
        )
        .unaliased(),
      ],
      from: vec![TableExpr::table(super::preselect::PRESELECT_NAME)],
      ..Default::default()
    }))
    .aliased("total_count"),
  );

  // The other endpoint's distinct count, traversing the mapping
  // relationship when the preselect does not already span it.
  if let Some(other) = catalog.other_endpoint(endpoint) {
    let label = format!("{}_count", catalog.table_info(other).name);
    let item = match preselect.column_expr(catalog, other) {
      Some(column) => Expr::ScalarSubquery(Box::new(Select {
        items: vec![Expr::func("count", vec![Expr::Distinct(Box::new(column))]).unaliased()],
        from: vec![TableExpr::table(super::preselect::PRESELECT_NAME)],
        ..Default::default()
      })),
      None => other_endpoint_count(catalog, resolver, preselect, endpoint, other)?,
    };
    count_items.push(item.aliased(&label));
  }

  // Group projected columns by their physical parent table.
  let mut table_groups: IndexMap<TableId, Vec<ColumnId>> = IndexMap::new();
  for selection in normalized.tables.values() {
    for column_id in &selection.columns {
      let parent = catalog.column_info(*column_id).table;
      let group = table_groups.entry(parent).or_default();
      if !group.contains(column_id) {
        group.push(*column_id);
      }
    }
  }

  for (table_id, columns) in table_groups {
    let table_info = catalog.table_info(table_id);
    debug!("Building column summaries for {}", table_info.name);

    let (connecting, gate_table) =
      connecting_column(catalog, resolver, preselect, endpoint, table_id)?;
    let connecting_info = catalog.column_info(connecting);

    let cte_name = format!("{}_preselect", table_info.name);
    let mut cte_query = Select {
      items: vec![
        column_expr(catalog, connecting).aliased(&connecting_info.unique_name),
      ],
      from: vec![TableExpr::table(&table_info.name)],
      ..Default::default()
    };
    for column_id in &columns {
      let column = catalog.column_info(*column_id);
      cte_query
        .items
        .push(column_expr(catalog, *column_id).aliased(&column.unique_name));
    }
    cte_query.and_where(Expr::InSubquery {
      expr: Box::new(column_expr(catalog, connecting)),
      negated: false,
      query: Box::new(preselect.query_for(catalog, gate_table)),
    });
    ctes.push(Cte {
      name: cte_name.clone(),
      query: cte_query,
    });

    let connecting_column_ref = Expr::column(&cte_name, &connecting_info.unique_name);

    let mut data_source_columns: Vec<ColumnId> = vec![];
    let mut items: Vec<SelectItem> = vec![];
    for column_id in &columns {
      let column = catalog.column_info(*column_id);
      if column.process_before_display == Some(ProcessBeforeDisplay::DataSource) {
        data_source_columns.push(*column_id);
        continue;
      }

      let column_ref = Expr::column(&cte_name, &column.unique_name);
      let summary = match column.column_type {
        ColumnType::Numeric => numeric_summary(&cte_name, &column.unique_name, column_ref),
        ColumnType::Categorical => {
          if table_info.role == TableRole::Endpoint {
            basic_categorical_summary(&cte_name, &column.unique_name, column_ref)
          } else {
            null_aware_categorical_summary(
              &cte_name,
              &column.unique_name,
              column_ref,
              &connecting_info.unique_name,
              connecting_column_ref.clone(),
            )
          }
        }
        ColumnType::Unspecified => {
          debug!(
            "Skipping summary for {}: unsupported column type",
            column.unique_name
          );
          continue;
        }
      };
      items.push(summary.aliased(&format!("{}_summary", column.unique_name)));
    }

    if !data_source_columns.is_empty() {
      let label = if table_id == endpoint {
        "data_source".to_string()
      } else {
        format!("{}_data_source", table_info.name)
      };
      items.push(data_source_counts(catalog, &cte_name, &data_source_columns).aliased(&label));
    }

    if table_id == endpoint {
      endpoint_items.extend(items);
    } else {
      foreign_items.extend(items);
    }
  }

  let mut items = count_items;
  items.extend(endpoint_items);
  items.extend(foreign_items);

  let inner = Select {
    ctes,
    items,
    ..Default::default()
  };

  return Ok(Select {
    items: vec![
      Expr::func("row_to_json", vec![Expr::TableRef("json_result".to_string())])
        .aliased("results"),
    ],
    from: vec![TableExpr::subquery(inner, "json_result")],
    ..Default::default()
  });
}

fn column_expr(catalog: &Catalog, column: ColumnId) -> Expr {
  let info = catalog.column_info(column);
  return Expr::column(&catalog.table_info(info.table).name, &info.column_name);
}

/// The column that keys a table's summary preselect back to the filtered
/// preselect, plus the table whose preselect slice gates it.
fn connecting_column(
  catalog: &Catalog,
  resolver: &RelationshipResolver,
  preselect: &Preselect,
  endpoint: TableId,
  table: TableId,
) -> Result<(ColumnId, TableId), ApiError> {
  if preselect.tables.contains_key(&table) {
    let info = catalog.table_info(table);
    let Some(pk) = info.primary_key else {
      return Err(ApiError::MappingError(format!(
        "Table {} has no primary key to connect on",
        info.name
      )));
    };
    return Ok((pk, table));
  }

  let mut anchor = catalog.table_info(table).primary_table.unwrap_or(endpoint);
  if !preselect.tables.contains_key(&anchor) || anchor == table {
    anchor = endpoint;
  }
  let relationship = resolver.resolve(catalog, anchor, table)?;
  return Ok((relationship.foreign_column, anchor));
}

/// Distinct count of the other endpoint's ids reachable from the preselect.
fn other_endpoint_count(
  catalog: &Catalog,
  resolver: &RelationshipResolver,
  preselect: &Preselect,
  endpoint: TableId,
  other: TableId,
) -> Result<Expr, ApiError> {
  let relationship = resolver.resolve(catalog, endpoint, other)?;

  let (count_column, filter_column, from_table) = if relationship.requires_mapping_table() {
    let mapping = relationship
      .mapping_table(catalog)
      .ok_or_else(|| ApiError::MappingError("Mapping relationship without mapping table".to_string()))?;
    (
      relationship
        .foreign_mapping_column
        .ok_or_else(|| ApiError::MappingError("Missing foreign mapping column".to_string()))?,
      relationship
        .local_mapping_column
        .ok_or_else(|| ApiError::MappingError("Missing local mapping column".to_string()))?,
      mapping,
    )
  } else {
    let parent = catalog.column_info(relationship.foreign_column).table;
    (relationship.foreign_column, relationship.foreign_column, parent)
  };

  let mut query = Select {
    items: vec![
      Expr::func(
        "count",
        vec![Expr::Distinct(Box::new(column_expr(catalog, count_column)))],
      )
      .aliased("count_result"),
    ],
    from: vec![TableExpr::table(&catalog.table_info(from_table).name)],
    ..Default::default()
  };
  query.and_where(Expr::InSubquery {
    expr: Box::new(column_expr(catalog, filter_column)),
    negated: false,
    query: Box::new(preselect.query_for(catalog, endpoint)),
  });

  return Ok(Expr::ScalarSubquery(Box::new(query)));
}

/// `[{min, max, mean, median, lower_quartile, upper_quartile}]` for one
/// numeric column.
fn numeric_summary(cte_name: &str, unique_name: &str, column: Expr) -> Expr {
  let percentile = |fraction: f64, column: Expr| -> Expr {
    return Expr::WithinGroup {
      func: Box::new(Expr::func(
        "percentile_disc",
        vec![Expr::Literal(Literal::Double(fraction))],
      )),
      order_by: Box::new(column),
    };
  };

  let stats = Select {
    items: vec![
      Expr::func("min", vec![column.clone()]).aliased("min"),
      Expr::func("max", vec![column.clone()]).aliased("max"),
      Expr::func("round", vec![Expr::func("avg", vec![column.clone()])]).aliased("mean"),
      percentile(0.5, column.clone()).aliased("median"),
      percentile(0.25, column.clone()).aliased("lower_quartile"),
      percentile(0.75, column).aliased("upper_quartile"),
    ],
    from: vec![TableExpr::table(cte_name)],
    ..Default::default()
  };

  let stats_label = format!("{unique_name}_stats");
  let json_cte_name = format!("json_{unique_name}");
  let json_cte = Cte {
    name: json_cte_name.clone(),
    query: Select {
      items: vec![
        Expr::func("row_to_json", vec![Expr::TableRef("subquery".to_string())])
          .aliased(&stats_label),
      ],
      from: vec![TableExpr::subquery(stats, "subquery")],
      ..Default::default()
    },
  };

  return Expr::ScalarSubquery(Box::new(Select {
    ctes: vec![json_cte],
    items: vec![
      Expr::func(
        "array_agg",
        vec![Expr::column(&json_cte_name, &stats_label)],
      )
      .unaliased(),
    ],
    from: vec![TableExpr::table(&json_cte_name)],
    ..Default::default()
  }));
}

/// `[{value, count_result}, ...]` grouped by value, for categorical columns
/// living on the endpoint's own table.
fn basic_categorical_summary(cte_name: &str, unique_name: &str, column: Expr) -> Expr {
  let grouped = Select {
    items: vec![
      column.clone().aliased(unique_name),
      Expr::CountStar.aliased("count_result"),
    ],
    from: vec![TableExpr::table(cte_name)],
    group_by: vec![column],
    ..Default::default()
  };

  let categories_label = format!("{unique_name}_categories");
  let json_cte_name = format!("json_{unique_name}");
  let json_cte = Cte {
    name: json_cte_name.clone(),
    query: Select {
      items: vec![
        Expr::func("row_to_json", vec![Expr::TableRef("subquery".to_string())])
          .aliased(&categories_label),
      ],
      from: vec![TableExpr::subquery(grouped, "subquery")],
      ..Default::default()
    },
  };

  return Expr::ScalarSubquery(Box::new(Select {
    ctes: vec![json_cte],
    items: vec![
      Expr::func(
        "array_agg",
        vec![Expr::column(&json_cte_name, &categories_label)],
      )
      .unaliased(),
    ],
    from: vec![TableExpr::table(&json_cte_name)],
    ..Default::default()
  }));
}

/// Null-aware variant for categorical columns on non-local tables: entities
/// with no non-null value for the column contribute a null group instead of
/// disappearing.
fn null_aware_categorical_summary(
  cte_name: &str,
  unique_name: &str,
  column: Expr,
  connecting_name: &str,
  connecting: Expr,
) -> Expr {
  let non_nulls_name = format!("{unique_name}_non_nulls");
  let nulls_name = format!("{unique_name}_nulls");
  let union_name = format!("{unique_name}_union");
  let count_name = format!("{unique_name}_count_subquery");

  let non_nulls = Cte {
    name: non_nulls_name.clone(),
    query: {
      let mut query = Select {
        items: vec![
          column.clone().aliased(unique_name),
          connecting.clone().aliased(connecting_name),
        ],
        from: vec![TableExpr::table(cte_name)],
        group_by: vec![connecting.clone(), column.clone()],
        ..Default::default()
      };
      query.and_where(Expr::Is {
        expr: Box::new(column.clone()),
        negated: true,
        test: Literal::Null,
      });
      query
    },
  };

  let nulls = Cte {
    name: nulls_name.clone(),
    query: {
      let mut query = Select {
        items: vec![
          column.clone().aliased(unique_name),
          connecting.clone().aliased(connecting_name),
        ],
        from: vec![TableExpr::table(cte_name)],
        group_by: vec![connecting.clone(), column],
        ..Default::default()
      };
      query.and_where(Expr::InSubquery {
        expr: Box::new(connecting),
        negated: true,
        query: Box::new(Select {
          items: vec![Expr::column(&non_nulls_name, connecting_name).unaliased()],
          from: vec![TableExpr::table(&non_nulls_name)],
          ..Default::default()
        }),
      });
      query
    },
  };

  let union = Select {
    items: vec![
      Expr::column(&non_nulls_name, unique_name).unaliased(),
      Expr::column(&non_nulls_name, connecting_name).unaliased(),
    ],
    from: vec![TableExpr::table(&non_nulls_name)],
    union_all: vec![Select {
      items: vec![
        Expr::column(&nulls_name, unique_name).unaliased(),
        Expr::column(&nulls_name, connecting_name).unaliased(),
      ],
      from: vec![TableExpr::table(&nulls_name)],
      ..Default::default()
    }],
    ..Default::default()
  };

  let counted = Select {
    items: vec![
      Expr::column(&union_name, unique_name).aliased(unique_name),
      Expr::CountStar.aliased("count_result"),
    ],
    from: vec![TableExpr::subquery(union, &union_name)],
    group_by: vec![Expr::column(&union_name, unique_name)],
    ..Default::default()
  };

  return Expr::ScalarSubquery(Box::new(Select {
    ctes: vec![non_nulls, nulls],
    items: vec![
      Expr::func(
        "array_agg",
        vec![Expr::func("row_to_json", vec![Expr::TableRef(count_name.clone())])],
      )
      .unaliased(),
    ],
    from: vec![TableExpr::subquery(counted, &count_name)],
    ..Default::default()
  }));
}

/// One JSON object whose keys enumerate every non-empty subset of the
/// table's data-source flags; proper subsets carry an `_exclusive` suffix.
fn data_source_counts(catalog: &Catalog, cte_name: &str, columns: &[ColumnId]) -> Expr {
  let names: Vec<&str> = columns
    .iter()
    .map(|id| catalog.column_info(*id).unique_name.as_str())
    .collect();

  let mut count_items: Vec<SelectItem> = vec![];
  for size in 1..=names.len() {
    for subset in (0..names.len()).combinations(size) {
      let mut label = subset
        .iter()
        .map(|i| names[*i].rsplit('_').next().unwrap_or_default())
        .join("_");
      if size < names.len() {
        label.push_str("_exclusive");
      }

      let mut count = Select {
        items: vec![Expr::CountStar.unaliased()],
        from: vec![TableExpr::table(cte_name)],
        ..Default::default()
      };
      let predicates = names
        .iter()
        .enumerate()
        .map(|(i, name)| {
          return Expr::eq(
            Expr::column(cte_name, name),
            Expr::Literal(Literal::Bool(subset.contains(&i))),
          );
        })
        .collect();
      count.and_where(Expr::and(predicates));
      count_items.push(Expr::ScalarSubquery(Box::new(count)).aliased(&label));
    }
  }

  let combined = Select {
    items: count_items,
    ..Default::default()
  };

  return Expr::ScalarSubquery(Box::new(Select {
    items: vec![
      Expr::func("row_to_json", vec![Expr::TableRef("subquery".to_string())]).unaliased(),
    ],
    from: vec![TableExpr::subquery(combined, "subquery")],
    ..Default::default()
  }));
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::RequestSpec;
  use crate::query::normalize::{QueryMode, normalize};
  use crate::query::preselect::build_preselect;
  use crate::sql::render_for_log;
  use cda_schema::testing::test_catalog;

  fn summary_sql(
    catalog: &Catalog,
    endpoint: &str,
    match_all: &[&str],
    add_columns: &[&str],
    exclude_columns: &[&str],
  ) -> String {
    let resolver = RelationshipResolver::new();
    let endpoint = catalog.table_by_name(endpoint).unwrap().id;
    let spec = RequestSpec {
      match_all: match_all.iter().map(|s| s.to_string()).collect(),
      add_columns: add_columns.iter().map(|s| s.to_string()).collect(),
      exclude_columns: exclude_columns.iter().map(|s| s.to_string()).collect(),
      ..Default::default()
    };
    let normalized = normalize(catalog, endpoint, &spec, QueryMode::Summary).unwrap();
    let preselect = build_preselect(catalog, &resolver, &normalized).unwrap();
    let query = build_summary_query(catalog, &resolver, &normalized, &preselect).unwrap();
    return render_for_log(&query);
  }

  #[test]
  fn test_counts_and_labels() {
    let catalog = test_catalog();
    let sql = summary_sql(
      &catalog,
      "subject",
      &["subject_id_alias <= 10"],
      &["sex", "file_type"],
      &[],
    );

    assert!(sql.contains("AS \"total_count\""), "{sql}");
    assert!(sql.contains("AS \"file_count\""), "{sql}");
    assert!(sql.contains("AS \"sex_summary\""), "{sql}");
    assert!(sql.contains("AS \"file_type_summary\""), "{sql}");
    assert!(sql.contains("AS \"data_source\""), "{sql}");
    assert!(sql.contains("row_to_json(\"json_result\") AS \"results\""), "{sql}");
  }

  #[test]
  fn test_total_count_is_distinct_over_preselect() {
    let catalog = test_catalog();
    let sql = summary_sql(&catalog, "subject", &["species = human"], &[], &[]);

    assert!(
      sql.contains(
        "(SELECT count(DISTINCT \"filtered_preselect\".\"subject_id_alias\") FROM \"filtered_preselect\") AS \"total_count\""
      ),
      "{sql}"
    );
  }

  #[test]
  fn test_other_endpoint_count_traverses_mapping() {
    let catalog = test_catalog();
    // No file columns requested: the count walks file_describes_subject.
    let sql = summary_sql(&catalog, "subject", &["species = human"], &[], &[]);

    assert!(
      sql.contains("count(DISTINCT \"file_describes_subject\".\"file_alias\")"),
      "{sql}"
    );
    assert!(sql.contains("AS \"file_count\""), "{sql}");
  }

  #[test]
  fn test_numeric_summary_statistics() {
    let catalog = test_catalog();
    let sql = summary_sql(&catalog, "subject", &["species = human"], &[], &[]);

    // year_of_birth is a default numeric summary column of subject.
    assert!(sql.contains("AS \"year_of_birth_summary\""), "{sql}");
    assert!(
      sql.contains("round(avg(\"subject_preselect\".\"year_of_birth\")) AS \"mean\""),
      "{sql}"
    );
    assert!(
      sql.contains("percentile_disc(0.5) WITHIN GROUP (ORDER BY \"subject_preselect\".\"year_of_birth\") AS \"median\""),
      "{sql}"
    );
    assert!(sql.contains("AS \"lower_quartile\""), "{sql}");
    assert!(sql.contains("AS \"upper_quartile\""), "{sql}");
  }

  #[test]
  fn test_local_categorical_is_basic() {
    let catalog = test_catalog();
    let sql = summary_sql(&catalog, "subject", &["species = human"], &[], &[]);

    assert!(sql.contains("WITH \"json_species\" AS ("), "{sql}");
    assert!(sql.contains("AS \"species_summary\""), "{sql}");
    assert!(!sql.contains("species_non_nulls"), "{sql}");
  }

  #[test]
  fn test_foreign_categorical_is_null_aware() {
    let catalog = test_catalog();
    let sql = summary_sql(&catalog, "subject", &["species = human"], &["sex"], &[]);

    assert!(sql.contains("\"sex_non_nulls\" AS ("), "{sql}");
    assert!(sql.contains("\"sex_nulls\" AS ("), "{sql}");
    assert!(sql.contains(" UNION ALL "), "{sql}");
    assert!(sql.contains("\"observation_preselect\".\"sex\" IS NOT NULL"), "{sql}");
    assert!(
      sql.contains("NOT IN (SELECT \"sex_non_nulls\".\"observation_subject_alias\" FROM \"sex_non_nulls\")"),
      "{sql}"
    );
  }

  #[test]
  fn test_data_source_subsets() {
    let catalog = test_catalog();
    let sql = summary_sql(&catalog, "subject", &["species = human"], &[], &[]);

    assert!(sql.contains("AS \"gdc_exclusive\""), "{sql}");
    assert!(sql.contains("AS \"pdc_exclusive\""), "{sql}");
    assert!(sql.contains("AS \"gdc_pdc_exclusive\""), "{sql}");
    // The full set carries no suffix.
    assert!(sql.contains("AS \"gdc_pdc_idc\""), "{sql}");
    assert!(!sql.contains("gdc_pdc_idc_exclusive"), "{sql}");
    assert!(
      sql.contains("\"subject_preselect\".\"subject_data_at_gdc\" = TRUE"),
      "{sql}"
    );
    assert!(
      sql.contains("\"subject_preselect\".\"subject_data_at_pdc\" = FALSE"),
      "{sql}"
    );
  }

  #[test]
  fn test_table_preselect_gated_by_filtered_preselect() {
    let catalog = test_catalog();
    let sql = summary_sql(&catalog, "subject", &["species = human"], &["sex"], &[]);

    assert!(sql.contains("\"observation_preselect\" AS ("), "{sql}");
    assert!(
      sql.contains(
        "\"observation\".\"subject_alias\" IN (SELECT \"filtered_preselect\".\"subject_id_alias\" FROM \"filtered_preselect\")"
      ),
      "{sql}"
    );
  }

  #[test]
  fn test_exclusions_drop_summaries() {
    let catalog = test_catalog();
    let sql = summary_sql(
      &catalog,
      "subject",
      &["species = human"],
      &[],
      &["year_of_birth"],
    );
    assert!(!sql.contains("year_of_birth_summary"), "{sql}");
  }
}
