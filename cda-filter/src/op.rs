#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
  Equal,
  NotEqual,
  GreaterThanEqual,
  GreaterThan,
  LessThanEqual,
  LessThan,
  Is,
  IsNot,
  In,
  NotIn,
  Like,
  NotLike,
}

impl Op {
  /// Matches a (lower-cased) operator token, including the two-token forms
  /// assembled by the parser ("is not", "not in", "not like").
  pub fn parse(token: &str) -> Option<Self> {
    return match token {
      "!=" | "<>" => Some(Self::NotEqual),
      "<=" => Some(Self::LessThanEqual),
      ">=" => Some(Self::GreaterThanEqual),
      "=" => Some(Self::Equal),
      "<" => Some(Self::LessThan),
      ">" => Some(Self::GreaterThan),
      "is" => Some(Self::Is),
      "is not" => Some(Self::IsNot),
      "in" => Some(Self::In),
      "not in" => Some(Self::NotIn),
      "like" => Some(Self::Like),
      "not like" => Some(Self::NotLike),
      _ => None,
    };
  }

  pub fn as_str(&self) -> &'static str {
    return match self {
      Self::Equal => "=",
      Self::NotEqual => "!=",
      Self::GreaterThanEqual => ">=",
      Self::GreaterThan => ">",
      Self::LessThanEqual => "<=",
      Self::LessThan => "<",
      Self::Is => "is",
      Self::IsNot => "is not",
      Self::In => "in",
      Self::NotIn => "not in",
      Self::Like => "like",
      Self::NotLike => "not like",
    };
  }

  /// `in` and `not in` are the only operators taking a list value.
  pub fn takes_list(&self) -> bool {
    return matches!(self, Self::In | Self::NotIn);
  }

  /// `is` and `is not` only accept null/true/false.
  pub fn is_identity_test(&self) -> bool {
    return matches!(self, Self::Is | Self::IsNot);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_op_parsing() {
    assert_eq!(Op::parse("="), Some(Op::Equal));
    assert_eq!(Op::parse("!="), Some(Op::NotEqual));
    assert_eq!(Op::parse("<>"), Some(Op::NotEqual));
    assert_eq!(Op::parse("is not"), Some(Op::IsNot));
    assert_eq!(Op::parse("not like"), Some(Op::NotLike));
    assert_eq!(Op::parse("=="), None);
    assert_eq!(Op::parse("between"), None);
  }

  #[test]
  fn test_list_ops() {
    assert!(Op::In.takes_list());
    assert!(Op::NotIn.takes_list());
    assert!(!Op::Equal.takes_list());
    assert!(Op::Is.is_identity_test());
    assert!(Op::IsNot.is_identity_test());
  }
}
