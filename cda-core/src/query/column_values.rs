use cda_schema::Catalog;

use crate::errors::ApiError;
use crate::sql::{Expr, Join, JoinKind, Select, TableExpr};

#[derive(Debug)]
pub struct ColumnValuesPlan {
  pub query: Select,
  pub count_query: Select,
}

/// Value frequencies for one column: `SELECT column, count(*) GROUP BY
/// column ORDER BY column`, optionally restricted to rows flagged for the
/// given data sources.
pub fn build_column_values(
  catalog: &Catalog,
  column_name: &str,
  data_source: &str,
) -> Result<ColumnValuesPlan, ApiError> {
  let column = catalog.column_by_unique_name(column_name)?;
  let table_info = catalog.table_info(column.table);
  let column_expr = Expr::column(&table_info.name, &column.column_name);

  let mut grouped = Select {
    items: vec![
      column_expr.clone().aliased(&column.unique_name),
      Expr::CountStar.aliased("value_count"),
    ],
    from: vec![TableExpr::table(&table_info.name)],
    group_by: vec![column_expr.clone()],
    order_by: vec![column_expr],
    ..Default::default()
  };

  if !data_source.is_empty() {
    let selectable = catalog.table_info(catalog.selectable_table(column));
    for source in data_source.split(',') {
      let source = source.trim();
      let flag_name = format!("{}_data_at_{}", selectable.name, source.to_lowercase());
      let Ok(flag) = catalog.column_by_unique_name(&flag_name) else {
        return Err(ApiError::SystemNotFound(format!(
          "system: {source} - not found"
        )));
      };

      // Flags of a virtual column live on its client-visible parent; join
      // it in through the physical table's foreign key.
      let flag_table = catalog.table_info(flag.table);
      if flag.table != column.table {
        let flag_table_expr = TableExpr::table(&flag_table.name);
        if !grouped.joins.iter().any(|join| join.table == flag_table_expr) {
          let Some(fk) = table_info.foreign_key_to(flag.table) else {
            return Err(ApiError::MappingError(format!(
              "No join path from {} to {} for the data source filter",
              table_info.name, flag_table.name
            )));
          };
          let parent = catalog.column_info(fk.parent_column);
          let target = catalog.column_info(fk.target_column);
          grouped.joins.push(Join {
            kind: JoinKind::Inner,
            table: flag_table_expr,
            on: Expr::eq(
              Expr::column(&table_info.name, &parent.column_name),
              Expr::column(&flag_table.name, &target.column_name),
            ),
          });
        }
      }
      grouped.and_where(Expr::Is {
        expr: Box::new(Expr::column(&flag_table.name, &flag.column_name)),
        negated: false,
        test: crate::sql::Literal::Bool(true),
      });
    }
  }

  let query = Select {
    items: vec![
      Expr::func("row_to_json", vec![Expr::TableRef("column_json".to_string())]).unaliased(),
    ],
    from: vec![TableExpr::subquery(grouped.clone(), "column_json")],
    ..Default::default()
  };

  let count_query = Select {
    items: vec![Expr::CountStar.unaliased()],
    from: vec![TableExpr::subquery(grouped, "column_json")],
    ..Default::default()
  };

  return Ok(ColumnValuesPlan { query, count_query });
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sql::render_for_log;
  use cda_schema::testing::test_catalog;

  #[test]
  fn test_grouped_frequencies() {
    let catalog = test_catalog();
    let plan = build_column_values(&catalog, "sex", "").unwrap();
    let sql = render_for_log(&plan.query);

    assert!(sql.contains("row_to_json(\"column_json\")"), "{sql}");
    assert!(
      sql.contains("\"observation\".\"sex\" AS \"sex\", count(*) AS \"value_count\""),
      "{sql}"
    );
    assert!(sql.contains("GROUP BY \"observation\".\"sex\""), "{sql}");
    assert!(sql.contains("ORDER BY \"observation\".\"sex\""), "{sql}");

    let count_sql = render_for_log(&plan.count_query);
    assert!(count_sql.starts_with("SELECT count(*) FROM (SELECT"), "{count_sql}");
  }

  #[test]
  fn test_data_source_flag_filter() {
    let catalog = test_catalog();
    let plan = build_column_values(&catalog, "species", "GDC, pdc").unwrap();
    let sql = render_for_log(&plan.query);

    assert!(
      sql.contains("\"subject\".\"subject_data_at_gdc\" IS TRUE"),
      "{sql}"
    );
    assert!(
      sql.contains("\"subject\".\"subject_data_at_pdc\" IS TRUE"),
      "{sql}"
    );
  }

  #[test]
  fn test_virtual_column_flag_joins_parent() {
    let catalog = test_catalog();
    // tumor_vs_normal physically lives on file_tumor_vs_normal but is
    // exposed under file, where the data-source flags live.
    let plan = build_column_values(&catalog, "tumor_vs_normal", "GDC").unwrap();
    let sql = render_for_log(&plan.query);

    assert!(
      sql.contains(
        "JOIN \"file\" ON \"file_tumor_vs_normal\".\"file_alias\" = \"file\".\"id_alias\""
      ),
      "{sql}"
    );
    assert!(sql.contains("\"file\".\"file_data_at_gdc\" IS TRUE"), "{sql}");
    // No second FROM item, i.e. no cross join.
    assert!(!sql.contains("FROM \"file_tumor_vs_normal\", \"file\""), "{sql}");
  }

  #[test]
  fn test_unknown_system_rejected() {
    let catalog = test_catalog();
    let err = build_column_values(&catalog, "species", "nope")
      .err()
      .expect("err");
    assert!(matches!(err, ApiError::SystemNotFound(_)));
    assert!(err.to_string().contains("nope"));
  }

  #[test]
  fn test_unknown_column_rejected() {
    let catalog = test_catalog();
    let err = build_column_values(&catalog, "missing_column", "")
      .err()
      .expect("err");
    assert!(matches!(err, ApiError::ColumnNotFound(_)));
  }
}
