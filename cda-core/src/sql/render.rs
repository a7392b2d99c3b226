//! Single renderer for the query tree. Emits either a parameterized
//! statement (`$1, $2, ...` plus the bound values) for execution or a
//! literal-bound string for logging.

use crate::sql::ast::{Cte, Expr, Join, JoinKind, Literal, Select, SelectItem, TableExpr};

#[derive(Clone, Debug, PartialEq)]
pub struct RenderedQuery {
  pub sql: String,
  pub params: Vec<Literal>,
}

/// Renders with `$n` placeholders and a bound-parameter list.
pub fn render(select: &Select) -> RenderedQuery {
  let mut renderer = Renderer {
    sql: String::new(),
    params: Some(vec![]),
    failed: false,
  };
  renderer.select(select);
  return RenderedQuery {
    sql: renderer.sql,
    params: renderer.params.unwrap_or_default(),
  };
}

/// Renders with parameters bound as SQL literals, for logging. Falls back to
/// the placeholder form when a value has no literal rendering.
pub fn render_for_log(select: &Select) -> String {
  let mut renderer = Renderer {
    sql: String::new(),
    params: None,
    failed: false,
  };
  renderer.select(select);
  if renderer.failed {
    return render(select).sql;
  }
  return renderer.sql;
}

fn quote_ident(name: &str) -> String {
  return format!("\"{}\"", name.replace('"', "\"\""));
}

struct Renderer {
  sql: String,
  /// Some: collect bound parameters; None: inline literals.
  params: Option<Vec<Literal>>,
  failed: bool,
}

impl Renderer {
  fn push(&mut self, s: &str) {
    self.sql.push_str(s);
  }

  fn select(&mut self, select: &Select) {
    if !select.ctes.is_empty() {
      self.push("WITH ");
      for (i, Cte { name, query }) in select.ctes.iter().enumerate() {
        if i > 0 {
          self.push(", ");
        }
        self.push(&quote_ident(name));
        self.push(" AS (");
        self.select(query);
        self.push(")");
      }
      self.push(" ");
    }

    self.push("SELECT ");
    for (i, item) in select.items.iter().enumerate() {
      if i > 0 {
        self.push(", ");
      }
      self.item(item);
    }

    if !select.from.is_empty() {
      self.push(" FROM ");
      for (i, table) in select.from.iter().enumerate() {
        if i > 0 {
          self.push(", ");
        }
        self.table_expr(table);
      }
    }

    for Join { kind, table, on } in &select.joins {
      self.push(match kind {
        JoinKind::Inner => " JOIN ",
        JoinKind::Left => " LEFT OUTER JOIN ",
      });
      self.table_expr(table);
      self.push(" ON ");
      self.expr(on);
    }

    if let Some(ref clause) = select.where_clause {
      self.push(" WHERE ");
      self.expr(clause);
    }

    if !select.group_by.is_empty() {
      self.push(" GROUP BY ");
      for (i, expr) in select.group_by.iter().enumerate() {
        if i > 0 {
          self.push(", ");
        }
        self.expr(expr);
      }
    }

    for other in &select.union_all {
      self.push(" UNION ALL ");
      self.select(other);
    }

    if !select.order_by.is_empty() {
      self.push(" ORDER BY ");
      for (i, expr) in select.order_by.iter().enumerate() {
        if i > 0 {
          self.push(", ");
        }
        self.expr(expr);
      }
    }

    if let Some(limit) = select.limit {
      self.push(&format!(" LIMIT {limit}"));
    }
    if let Some(offset) = select.offset {
      self.push(&format!(" OFFSET {offset}"));
    }
  }

  fn item(&mut self, item: &SelectItem) {
    self.expr(&item.expr);
    if let Some(ref alias) = item.alias {
      self.push(" AS ");
      self.push(&quote_ident(alias));
    }
  }

  fn table_expr(&mut self, table: &TableExpr) {
    match table {
      TableExpr::Table { name, alias } => {
        self.push(&quote_ident(name));
        if let Some(alias) = alias {
          self.push(" AS ");
          self.push(&quote_ident(alias));
        }
      }
      TableExpr::Subquery { query, alias } => {
        self.push("(");
        self.select(query);
        self.push(") AS ");
        self.push(&quote_ident(alias));
      }
    }
  }

  fn expr(&mut self, expr: &Expr) {
    match expr {
      Expr::Column { table, column } => {
        if table.is_empty() {
          self.push(&quote_ident(column));
        } else {
          self.push(&format!("{}.{}", quote_ident(table), quote_ident(column)));
        }
      }
      Expr::TableRef(name) => self.push(&quote_ident(name)),
      Expr::Literal(literal) => self.literal(literal),
      Expr::Raw(sql) => self.push(sql),
      Expr::Binary { left, op, right } => {
        self.expr(left);
        self.push(&format!(" {} ", op.as_sql()));
        self.expr(right);
      }
      Expr::And(parts) => self.composite(parts, " AND "),
      Expr::Or(parts) => self.composite(parts, " OR "),
      Expr::Func { name, args } => {
        self.push(name);
        self.push("(");
        for (i, arg) in args.iter().enumerate() {
          if i > 0 {
            self.push(", ");
          }
          self.expr(arg);
        }
        self.push(")");
      }
      Expr::WithinGroup { func, order_by } => {
        self.expr(func);
        self.push(" WITHIN GROUP (ORDER BY ");
        self.expr(order_by);
        self.push(")");
      }
      Expr::Distinct(inner) => {
        self.push("DISTINCT ");
        self.expr(inner);
      }
      Expr::CountStar => self.push("count(*)"),
      Expr::Is {
        expr,
        negated,
        test,
      } => {
        self.expr(expr);
        self.push(if *negated { " IS NOT " } else { " IS " });
        // The test operand is structural, never a bind parameter.
        self.push(match test {
          Literal::Bool(true) => "TRUE",
          Literal::Bool(false) => "FALSE",
          _ => "NULL",
        });
      }
      Expr::Like {
        expr,
        negated,
        pattern,
      } => {
        self.expr(expr);
        self.push(if *negated { " NOT LIKE " } else { " LIKE " });
        self.expr(pattern);
      }
      Expr::InList {
        expr,
        negated,
        list,
      } => {
        self.expr(expr);
        self.push(if *negated { " NOT IN (" } else { " IN (" });
        for (i, element) in list.iter().enumerate() {
          if i > 0 {
            self.push(", ");
          }
          self.expr(element);
        }
        self.push(")");
      }
      Expr::InSubquery {
        expr,
        negated,
        query,
      } => {
        self.expr(expr);
        self.push(if *negated { " NOT IN (" } else { " IN (" });
        self.select(query);
        self.push(")");
      }
      Expr::Exists(query) => {
        self.push("EXISTS (");
        self.select(query);
        self.push(")");
      }
      Expr::ScalarSubquery(query) => {
        self.push("(");
        self.select(query);
        self.push(")");
      }
    }
  }

  fn composite(&mut self, parts: &[Expr], separator: &str) {
    self.push("(");
    for (i, part) in parts.iter().enumerate() {
      if i > 0 {
        self.push(separator);
      }
      self.expr(part);
    }
    self.push(")");
  }

  fn literal(&mut self, literal: &Literal) {
    if let Some(ref mut params) = self.params {
      params.push(literal.clone());
      let n = params.len();
      self.push(&format!("${n}"));
      return;
    }

    match literal {
      Literal::Null => self.push("NULL"),
      Literal::Bool(true) => self.push("TRUE"),
      Literal::Bool(false) => self.push("FALSE"),
      Literal::Integer(i) => self.push(&i.to_string()),
      Literal::Double(d) => {
        if d.is_finite() {
          self.push(&format!("{d:?}"));
        } else {
          // No literal rendering; the caller falls back to placeholders.
          self.failed = true;
          self.push("$?");
        }
      }
      Literal::String(s) => self.push(&format!("'{}'", s.replace('\'', "''"))),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sql::ast::BinaryOp;

  fn simple_select() -> Select {
    return Select {
      items: vec![
        Expr::column("subject", "id_alias").aliased("subject_id_alias"),
        Expr::column("subject", "species").unaliased(),
      ],
      from: vec![TableExpr::table("subject")],
      where_clause: Some(Expr::binary(
        Expr::column("subject", "id_alias"),
        BinaryOp::Lt,
        Expr::integer(100),
      )),
      ..Default::default()
    };
  }

  #[test]
  fn test_parameterized_rendering() {
    let rendered = render(&simple_select());
    assert_eq!(
      rendered.sql,
      "SELECT \"subject\".\"id_alias\" AS \"subject_id_alias\", \"subject\".\"species\" \
       FROM \"subject\" WHERE \"subject\".\"id_alias\" < $1"
    );
    assert_eq!(rendered.params, vec![Literal::Integer(100)]);
  }

  #[test]
  fn test_literal_rendering() {
    let sql = render_for_log(&simple_select());
    assert!(sql.ends_with("WHERE \"subject\".\"id_alias\" < 100"), "{sql}");
  }

  #[test]
  fn test_string_literal_escaping() {
    let mut select = simple_select();
    select.where_clause = Some(Expr::eq(
      Expr::column("subject", "species"),
      Expr::string("homo 'sapiens'"),
    ));
    let sql = render_for_log(&select);
    assert!(sql.contains("'homo ''sapiens'''"), "{sql}");
  }

  #[test]
  fn test_non_finite_double_falls_back_to_placeholders() {
    let mut select = simple_select();
    select.where_clause = Some(Expr::eq(
      Expr::column("subject", "id_alias"),
      Expr::Literal(Literal::Double(f64::INFINITY)),
    ));
    let sql = render_for_log(&select);
    assert!(sql.contains("$1"), "{sql}");
    assert!(!sql.contains("$?"), "{sql}");
  }

  #[test]
  fn test_cte_and_subquery() {
    let cte = Cte {
      name: "filtered_preselect".to_string(),
      query: Select {
        items: vec![Expr::column("subject", "id_alias").aliased("subject_id_alias")],
        from: vec![TableExpr::table("subject")],
        ..Default::default()
      },
    };
    let inner = Select {
      ctes: vec![cte],
      items: vec![Expr::column("subject", "species").unaliased()],
      from: vec![TableExpr::table("subject")],
      where_clause: Some(Expr::InSubquery {
        expr: Box::new(Expr::column("subject", "id_alias")),
        negated: false,
        query: Box::new(Select {
          items: vec![Expr::column("filtered_preselect", "subject_id_alias").unaliased()],
          from: vec![TableExpr::table("filtered_preselect")],
          ..Default::default()
        }),
      }),
      ..Default::default()
    };
    let outer = Select {
      items: vec![
        Expr::func("row_to_json", vec![Expr::TableRef("json_result".to_string())]).unaliased(),
      ],
      from: vec![TableExpr::subquery(inner, "json_result")],
      ..Default::default()
    };

    let sql = render_for_log(&outer);
    assert!(sql.contains("row_to_json(\"json_result\")"), "{sql}");
    assert!(sql.contains("WITH \"filtered_preselect\" AS ("), "{sql}");
    assert!(
      sql.contains("\"subject\".\"id_alias\" IN (SELECT \"filtered_preselect\".\"subject_id_alias\" FROM \"filtered_preselect\")"),
      "{sql}"
    );
  }

  #[test]
  fn test_aggregates() {
    let select = Select {
      items: vec![
        Expr::func(
          "array_remove",
          vec![
            Expr::func(
              "array_agg",
              vec![Expr::Distinct(Box::new(Expr::column("observation", "sex")))],
            ),
            Expr::Literal(Literal::Null),
          ],
        )
        .aliased("sex"),
        Expr::WithinGroup {
          func: Box::new(Expr::func(
            "percentile_disc",
            vec![Expr::Literal(Literal::Double(0.5))],
          )),
          order_by: Box::new(Expr::column("observation", "days_to_birth")),
        }
        .aliased("median"),
        Expr::CountStar.aliased("count_result"),
      ],
      from: vec![TableExpr::table("observation")],
      group_by: vec![Expr::column("observation", "sex")],
      ..Default::default()
    };

    let sql = render_for_log(&select);
    assert!(
      sql.contains("array_remove(array_agg(DISTINCT \"observation\".\"sex\"), NULL)"),
      "{sql}"
    );
    assert!(
      sql.contains("percentile_disc(0.5) WITHIN GROUP (ORDER BY \"observation\".\"days_to_birth\")"),
      "{sql}"
    );
    assert!(sql.contains("count(*) AS \"count_result\""), "{sql}");
    assert!(sql.ends_with("GROUP BY \"observation\".\"sex\""), "{sql}");
  }

  #[test]
  fn test_union_all() {
    let first = Select {
      items: vec![Expr::column("a", "x").unaliased()],
      from: vec![TableExpr::table("a")],
      ..Default::default()
    };
    let second = Select {
      items: vec![Expr::column("b", "x").unaliased()],
      from: vec![TableExpr::table("b")],
      ..Default::default()
    };
    let union = Select {
      union_all: vec![second],
      ..first
    };
    let sql = render_for_log(&union);
    assert_eq!(
      sql,
      "SELECT \"a\".\"x\" FROM \"a\" UNION ALL SELECT \"b\".\"x\" FROM \"b\""
    );
  }

  #[test]
  fn test_is_tests_are_structural() {
    let select = Select {
      items: vec![Expr::CountStar.unaliased()],
      from: vec![TableExpr::table("t")],
      where_clause: Some(Expr::And(vec![
        Expr::Is {
          expr: Box::new(Expr::column("t", "a")),
          negated: false,
          test: Literal::Null,
        },
        Expr::Is {
          expr: Box::new(Expr::column("t", "b")),
          negated: true,
          test: Literal::Bool(true),
        },
      ])),
      ..Default::default()
    };
    let rendered = render(&select);
    assert!(rendered.params.is_empty());
    assert!(rendered.sql.contains("\"t\".\"a\" IS NULL"), "{}", rendered.sql);
    assert!(
      rendered.sql.contains("\"t\".\"b\" IS NOT TRUE"),
      "{}",
      rendered.sql
    );
  }
}
