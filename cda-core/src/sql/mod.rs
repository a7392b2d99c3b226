mod ast;
mod render;

pub use ast::{
  BinaryOp, Cte, Expr, Join, JoinKind, Literal, Select, SelectItem, TableExpr,
};
pub use render::{RenderedQuery, render, render_for_log};
