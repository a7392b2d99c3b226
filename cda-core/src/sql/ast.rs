//! Algebraic SQL query tree. Queries are assembled as plain values and
//! rendered exactly once, keeping the compiler pure.

#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
  Null,
  Bool(bool),
  Integer(i64),
  Double(f64),
  String(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
  Eq,
  NotEq,
  Lt,
  LtEq,
  Gt,
  GtEq,
}

impl BinaryOp {
  pub fn as_sql(&self) -> &'static str {
    return match self {
      Self::Eq => "=",
      Self::NotEq => "!=",
      Self::Lt => "<",
      Self::LtEq => "<=",
      Self::Gt => ">",
      Self::GtEq => ">=",
    };
  }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
  /// `"table"."column"`; an empty table renders a bare column reference.
  Column { table: String, column: String },
  /// A bare identifier, e.g. the relation argument of `row_to_json(alias)`.
  TableRef(String),
  Literal(Literal),
  /// Verbatim fragment for the few constructs with no parameter form, e.g.
  /// the empty-array literal.
  Raw(&'static str),
  Binary {
    left: Box<Expr>,
    op: BinaryOp,
    right: Box<Expr>,
  },
  And(Vec<Expr>),
  Or(Vec<Expr>),
  Func {
    name: &'static str,
    args: Vec<Expr>,
  },
  /// `func(...) WITHIN GROUP (ORDER BY expr)`.
  WithinGroup {
    func: Box<Expr>,
    order_by: Box<Expr>,
  },
  /// `DISTINCT expr`, inside aggregate calls.
  Distinct(Box<Expr>),
  CountStar,
  /// `expr IS [NOT] NULL/TRUE/FALSE`.
  Is {
    expr: Box<Expr>,
    negated: bool,
    test: Literal,
  },
  Like {
    expr: Box<Expr>,
    negated: bool,
    pattern: Box<Expr>,
  },
  InList {
    expr: Box<Expr>,
    negated: bool,
    list: Vec<Expr>,
  },
  InSubquery {
    expr: Box<Expr>,
    negated: bool,
    query: Box<Select>,
  },
  Exists(Box<Select>),
  ScalarSubquery(Box<Select>),
}

impl Expr {
  pub fn column(table: &str, column: &str) -> Self {
    return Self::Column {
      table: table.to_string(),
      column: column.to_string(),
    };
  }

  pub fn string(value: &str) -> Self {
    return Self::Literal(Literal::String(value.to_string()));
  }

  pub fn integer(value: i64) -> Self {
    return Self::Literal(Literal::Integer(value));
  }

  pub fn func(name: &'static str, args: Vec<Expr>) -> Self {
    return Self::Func { name, args };
  }

  pub fn binary(left: Expr, op: BinaryOp, right: Expr) -> Self {
    return Self::Binary {
      left: Box::new(left),
      op,
      right: Box::new(right),
    };
  }

  pub fn eq(left: Expr, right: Expr) -> Self {
    return Self::binary(left, BinaryOp::Eq, right);
  }

  /// Collapses the one-element case instead of wrapping it.
  pub fn and(mut exprs: Vec<Expr>) -> Self {
    if exprs.len() == 1 {
      return exprs.remove(0);
    }
    return Self::And(exprs);
  }

  pub fn or(mut exprs: Vec<Expr>) -> Self {
    if exprs.len() == 1 {
      return exprs.remove(0);
    }
    return Self::Or(exprs);
  }

  pub fn aliased(self, alias: &str) -> SelectItem {
    return SelectItem {
      expr: self,
      alias: Some(alias.to_string()),
    };
  }

  pub fn unaliased(self) -> SelectItem {
    return SelectItem {
      expr: self,
      alias: None,
    };
  }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SelectItem {
  pub expr: Expr,
  pub alias: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TableExpr {
  Table {
    name: String,
    alias: Option<String>,
  },
  Subquery {
    query: Box<Select>,
    alias: String,
  },
}

impl TableExpr {
  pub fn table(name: &str) -> Self {
    return Self::Table {
      name: name.to_string(),
      alias: None,
    };
  }

  pub fn subquery(query: Select, alias: &str) -> Self {
    return Self::Subquery {
      query: Box::new(query),
      alias: alias.to_string(),
    };
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinKind {
  Inner,
  Left,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Join {
  pub kind: JoinKind,
  pub table: TableExpr,
  pub on: Expr,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Cte {
  pub name: String,
  pub query: Select,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Select {
  pub ctes: Vec<Cte>,
  pub items: Vec<SelectItem>,
  pub from: Vec<TableExpr>,
  pub joins: Vec<Join>,
  pub where_clause: Option<Expr>,
  pub group_by: Vec<Expr>,
  pub order_by: Vec<Expr>,
  pub union_all: Vec<Select>,
  pub limit: Option<i64>,
  pub offset: Option<i64>,
}

impl Select {
  /// ANDs another predicate onto the WHERE clause.
  pub fn and_where(&mut self, expr: Expr) {
    self.where_clause = Some(match self.where_clause.take() {
      None => expr,
      Some(Expr::And(mut parts)) => {
        parts.push(expr);
        Expr::And(parts)
      }
      Some(existing) => Expr::And(vec![existing, expr]),
    });
  }
}
