use cda_schema::Catalog;

use crate::errors::ApiError;
use crate::sql::{Expr, Select, TableExpr};

/// Row-to-JSON dump of the `release_metadata` table.
pub fn build_release_metadata(catalog: &Catalog) -> Result<Select, ApiError> {
  let table = catalog.table_by_name("release_metadata")?;

  let inner = Select {
    items: table
      .columns
      .iter()
      .map(|id| {
        let column = catalog.column_info(*id);
        return Expr::column(&table.name, &column.column_name).aliased(&column.column_name);
      })
      .collect(),
    from: vec![TableExpr::table(&table.name)],
    ..Default::default()
  };

  return Ok(Select {
    items: vec![
      Expr::func("row_to_json", vec![Expr::TableRef("subquery".to_string())]).unaliased(),
    ],
    from: vec![TableExpr::subquery(inner, "subquery")],
    ..Default::default()
  });
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sql::render_for_log;
  use cda_schema::testing::test_catalog;

  #[test]
  fn test_release_metadata_dump() {
    let catalog = test_catalog();
    let sql = render_for_log(&build_release_metadata(&catalog).unwrap());

    assert!(sql.contains("row_to_json(\"subquery\")"), "{sql}");
    assert!(sql.contains("FROM \"release_metadata\""), "{sql}");
    assert!(
      sql.contains("\"release_metadata\".\"cda_table\" AS \"cda_table\""),
      "{sql}"
    );
  }
}
