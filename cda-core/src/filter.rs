use log::*;

use cda_filter::{FilterValue, Op, Scalar, parse_filter};
use cda_schema::{Catalog, ColumnId};

use crate::errors::ApiError;
use crate::sql::{BinaryOp, Expr, Literal};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterKind {
  MatchAll,
  MatchSome,
}

/// Columns whose `is null` form retargets to a sentinel existence check in
/// the parallel `*_nulls` table instead of a null twin.
const SENTINEL_NULL_COLUMNS: [&str; 2] = ["tumor_vs_normal", "anatomic_site"];

/// A parsed filter resolved against the catalog, with the exclusive-null
/// rewrite already applied.
#[derive(Clone, Debug)]
pub struct FilterSpec {
  pub raw: String,
  pub kind: FilterKind,
  /// Predicate target; may differ from `selectable_column` after rewriting.
  pub column: ColumnId,
  /// The column the client addressed, used for projection.
  pub selectable_column: ColumnId,
  pub op: Op,
  pub value: FilterValue,
  pub exclusive_null: bool,
  /// Set when the filter reduces to bare row existence in the target table.
  sentinel_exists: bool,
}

impl FilterSpec {
  pub fn resolve(catalog: &Catalog, raw: &str, kind: FilterKind) -> Result<FilterSpec, ApiError> {
    let parsed = parse_filter(raw)?;
    let column_info = catalog.column_by_unique_name(&parsed.column)?;

    let mut spec = FilterSpec {
      raw: parsed.raw,
      kind,
      column: column_info.id,
      selectable_column: column_info.id,
      op: parsed.op,
      value: parsed.value,
      exclusive_null: false,
      sentinel_exists: false,
    };

    // `column is null` is ambiguous for mapped and aggregated columns;
    // rewrite it onto catalog-level null companions where possible.
    if spec.op == Op::Is && spec.value.is_null() {
      spec.exclusive_null = true;
      let parent = catalog.table_info(column_info.table);

      if parent.name == "project" {
        return Err(ApiError::RelationshipError(format!(
          "Cannot properly filter \"project\" columns as being null: \"{} =/is/== null\" is not valid",
          column_info.unique_name
        )));
      }

      if SENTINEL_NULL_COLUMNS.contains(&column_info.unique_name.as_str()) {
        let nulls_table = format!("{}_nulls", parent.name);
        spec.column = catalog.table_column(&nulls_table, "file_alias")?.id;
        spec.sentinel_exists = true;
      } else if let Some(twin) = column_info.null_twin {
        spec.column = twin;
        spec.op = Op::Is;
        spec.value = FilterValue::Scalar(Scalar::Bool(true));
      } else {
        warn!(
          "Could not build exclusive null filter for {}; keeping literal null test",
          column_info.unique_name
        );
        spec.exclusive_null = false;
      }
    }

    return Ok(spec);
  }

  /// The predicate rooted at the (rewritten) target column. `None` when the
  /// filter reduces to a bare existence check.
  pub fn predicate(&self, catalog: &Catalog) -> Option<Expr> {
    if self.sentinel_exists {
      return None;
    }

    let column_info = catalog.column_info(self.column);
    let table_name = &catalog.table_info(column_info.table).name;
    let column = Expr::column(table_name, &column_info.column_name);

    return Some(lower_predicate(column, self.op, &self.value));
  }
}

/// `upper(coalesce(x, ''))`-style wrap for case-insensitive, null-safe
/// string comparison.
fn case_insensitive(column: Expr) -> Expr {
  return Expr::func(
    "coalesce",
    vec![Expr::func("upper", vec![column]), Expr::string("")],
  );
}

fn scalar_literal(scalar: &Scalar) -> Expr {
  return Expr::Literal(match scalar {
    Scalar::Null => Literal::Null,
    Scalar::Bool(b) => Literal::Bool(*b),
    Scalar::Integer(i) => Literal::Integer(*i),
    Scalar::Double(d) => Literal::Double(*d),
    Scalar::String(s) => Literal::String(s.clone()),
  });
}

fn lower_predicate(column: Expr, op: Op, value: &FilterValue) -> Expr {
  let scalar = match value {
    FilterValue::Scalar(scalar) => scalar,
    FilterValue::List(list) => {
      return lower_list_predicate(column, op == Op::NotIn, list);
    }
  };

  return match op {
    Op::Like | Op::NotLike => Expr::Like {
      expr: Box::new(case_insensitive(column)),
      negated: op == Op::NotLike,
      pattern: Box::new(Expr::func("upper", vec![scalar_literal(scalar)])),
    },
    Op::Equal | Op::NotEqual => {
      let negated = op == Op::NotEqual;
      match scalar {
        // A literal `= null` compiles to a null test rather than an
        // always-null comparison.
        Scalar::Null => Expr::Is {
          expr: Box::new(column),
          negated,
          test: Literal::Null,
        },
        Scalar::String(s) => Expr::binary(
          case_insensitive(column),
          if negated { BinaryOp::NotEq } else { BinaryOp::Eq },
          Expr::func("upper", vec![Expr::string(s)]),
        ),
        other => Expr::binary(
          column,
          if negated { BinaryOp::NotEq } else { BinaryOp::Eq },
          scalar_literal(other),
        ),
      }
    }
    Op::LessThan => Expr::binary(column, BinaryOp::Lt, scalar_literal(scalar)),
    Op::LessThanEqual => Expr::binary(column, BinaryOp::LtEq, scalar_literal(scalar)),
    Op::GreaterThan => Expr::binary(column, BinaryOp::Gt, scalar_literal(scalar)),
    Op::GreaterThanEqual => Expr::binary(column, BinaryOp::GtEq, scalar_literal(scalar)),
    Op::Is | Op::IsNot => Expr::Is {
      expr: Box::new(column),
      negated: op == Op::IsNot,
      test: match scalar {
        Scalar::Bool(b) => Literal::Bool(*b),
        _ => Literal::Null,
      },
    },
    // List pairing is enforced at parse time.
    Op::In | Op::NotIn => Expr::Raw("FALSE"),
  };
}

fn lower_list_predicate(column: Expr, negated: bool, list: &[Scalar]) -> Expr {
  if list.is_empty() {
    // `IN ()` is not valid SQL; an empty list matches nothing.
    return Expr::Raw(if negated { "TRUE" } else { "FALSE" });
  }

  if list[0].is_string() {
    let elements = list
      .iter()
      .map(|scalar| match scalar {
        Scalar::String(s) => Expr::string(&s.to_uppercase()),
        other => scalar_literal(other),
      })
      .collect();
    return Expr::InList {
      expr: Box::new(case_insensitive(column)),
      negated,
      list: elements,
    };
  }

  return Expr::InList {
    expr: Box::new(column),
    negated,
    list: list.iter().map(scalar_literal).collect(),
  };
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sql::{Select, TableExpr, render_for_log};
  use cda_schema::testing::test_catalog;

  fn predicate_sql(catalog: &Catalog, raw: &str) -> String {
    let spec = FilterSpec::resolve(catalog, raw, FilterKind::MatchAll).unwrap();
    let select = Select {
      items: vec![Expr::CountStar.unaliased()],
      from: vec![TableExpr::table("t")],
      where_clause: spec.predicate(catalog),
      ..Default::default()
    };
    return render_for_log(&select);
  }

  #[test]
  fn test_case_insensitive_string_equality() {
    let catalog = test_catalog();
    let sql = predicate_sql(&catalog, "sex = male");
    assert!(
      sql.contains("coalesce(upper(\"observation\".\"sex\"), '') = upper('male')"),
      "{sql}"
    );
  }

  #[test]
  fn test_exact_integer_comparison() {
    let catalog = test_catalog();
    let sql = predicate_sql(&catalog, "subject_id_alias < 100");
    assert!(sql.contains("\"subject\".\"id_alias\" < 100"), "{sql}");
    assert!(!sql.contains("upper"), "{sql}");
  }

  #[test]
  fn test_like_wildcard() {
    let catalog = test_catalog();
    let sql = predicate_sql(&catalog, "sex like m*");
    assert!(
      sql.contains("coalesce(upper(\"observation\".\"sex\"), '') LIKE upper('m%')"),
      "{sql}"
    );
  }

  #[test]
  fn test_string_list_uppercased() {
    let catalog = test_catalog();
    let sql = predicate_sql(&catalog, "sex in ['male', 'female']");
    assert!(sql.contains("IN ('MALE', 'FEMALE')"), "{sql}");
  }

  #[test]
  fn test_integer_list_exact() {
    let catalog = test_catalog();
    let sql = predicate_sql(&catalog, "subject_id_alias in [1, 2]");
    assert!(sql.contains("\"subject\".\"id_alias\" IN (1, 2)"), "{sql}");
  }

  #[test]
  fn test_equals_null_becomes_null_test() {
    let catalog = test_catalog();
    let sql = predicate_sql(&catalog, "species = null");
    assert!(sql.contains("\"subject\".\"species\" IS NULL"), "{sql}");
  }

  #[test]
  fn test_exclusive_null_twin_rewrite() {
    let catalog = test_catalog();
    let spec = FilterSpec::resolve(&catalog, "sex is null", FilterKind::MatchAll).unwrap();

    assert!(spec.exclusive_null);
    let target = catalog.column_info(spec.column);
    assert_eq!(target.column_name, "sex_null");

    // The user-facing column is unchanged.
    let selectable = catalog.column_info(spec.selectable_column);
    assert_eq!(selectable.unique_name, "sex");

    let sql = predicate_sql(&catalog, "sex is null");
    assert!(
      sql.contains("\"observation_nulls\".\"sex_null\" IS TRUE"),
      "{sql}"
    );
  }

  #[test]
  fn test_exclusive_null_sentinel_rewrite() {
    let catalog = test_catalog();
    let spec =
      FilterSpec::resolve(&catalog, "tumor_vs_normal is null", FilterKind::MatchAll).unwrap();

    assert!(spec.exclusive_null);
    assert!(spec.predicate(&catalog).is_none());
    let target = catalog.column_info(spec.column);
    assert_eq!(
      catalog.table_info(target.table).name,
      "file_tumor_vs_normal_nulls"
    );
    assert_eq!(target.column_name, "file_alias");
  }

  #[test]
  fn test_exclusive_null_project_rejected() {
    let catalog = test_catalog();
    let err = FilterSpec::resolve(&catalog, "project_id is null", FilterKind::MatchAll)
      .err()
      .expect("err");
    assert!(matches!(err, ApiError::RelationshipError(_)));
  }

  #[test]
  fn test_exclusive_null_without_twin_keeps_literal() {
    let catalog = test_catalog();
    let spec = FilterSpec::resolve(&catalog, "species is null", FilterKind::MatchAll).unwrap();
    assert!(!spec.exclusive_null);
    let sql = predicate_sql(&catalog, "species is null");
    assert!(sql.contains("\"subject\".\"species\" IS NULL"), "{sql}");
  }

  #[test]
  fn test_unknown_column() {
    let catalog = test_catalog();
    let err = FilterSpec::resolve(&catalog, "nope = 1", FilterKind::MatchAll)
      .err()
      .expect("err");
    assert!(matches!(err, ApiError::ColumnNotFound(_)));
    assert!(err.to_string().contains("nope"));
  }
}
