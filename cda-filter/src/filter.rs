use thiserror::Error;

use crate::op::Op;
use crate::value::{FilterValue, Scalar, ValueError};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ParseError {
  #[error("Unable to parse out operator in filter: \"{0}\"")]
  MissingOperator(String),
  #[error("Parsed operator: \"{0}\" is not a valid operator")]
  InvalidOperator(String),
  #[error("Dictionary filters are not accepted: {0}")]
  DictValue(String),
  #[error(
    "Operator must be \"in\" or \"not in\" when using a list value -> filter: {0}"
  )]
  ListWithoutInOperator(String),
  #[error(
    "Value must be a list (ex. [1,2,3] or [\"a\",\"b\",\"c\"]) when using \"in\" or \"not in\" operators -> filter: \"{0}\""
  )]
  InOperatorWithoutList(String),
  #[error(
    "Operator '{0}' not compatible with value '{1}'. Must use 'NULL', 'TRUE', or 'FALSE' for this operator."
  )]
  InvalidIdentityValue(String, String),
}

/// A single parsed `COLUMN OP VALUE` filter expression. Column resolution
/// against the schema happens downstream.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFilter {
  pub raw: String,
  pub column: String,
  pub op: Op,
  pub value: FilterValue,
}

impl ParsedFilter {
  /// Renders the filter back into its canonical textual form.
  pub fn unparse(&self) -> String {
    return format!("{} {} {}", self.column, self.op.as_str(), self.value.unparse());
  }
}

/// Parses a whitespace-separated `COLUMN OP VALUE...` filter string.
pub fn parse_filter(filter_string: &str) -> Result<ParsedFilter, ParseError> {
  let raw = filter_string.trim().to_string();
  let tokens: Vec<&str> = raw.split_whitespace().collect();
  if tokens.len() < 3 {
    return Err(ParseError::MissingOperator(raw));
  }

  let column = tokens[0].to_lowercase();
  let mut op_token = tokens[1].to_lowercase();
  let mut value_tokens = &tokens[2..];

  // Two-token operators: "is not", "not in", "not like".
  if tokens.len() > 3 {
    let second = tokens[2].to_lowercase();
    if matches!(second.as_str(), "in" | "like" | "not") {
      op_token = format!("{op_token} {second}");
      value_tokens = &tokens[3..];
    }
  }

  let Some(op) = Op::parse(&op_token) else {
    return Err(ParseError::InvalidOperator(op_token));
  };

  let value_string = value_tokens.join(" ");
  let value = FilterValue::parse(&value_string).map_err(|err| match err {
    ValueError::Dict => ParseError::DictValue(raw.clone()),
  })?;

  // Lists pair exclusively with the "in" operators.
  if value.is_list() && !op.takes_list() {
    return Err(ParseError::ListWithoutInOperator(raw));
  }
  if !value.is_list() && op.takes_list() {
    return Err(ParseError::InOperatorWithoutList(raw));
  }

  if op.is_identity_test() {
    match value {
      FilterValue::Scalar(Scalar::Null) | FilterValue::Scalar(Scalar::Bool(_)) => {}
      ref other => {
        return Err(ParseError::InvalidIdentityValue(
          op.as_str().to_string(),
          other.unparse(),
        ));
      }
    }
  }

  return Ok(ParsedFilter {
    raw,
    column,
    op,
    value,
  });
}
