use std::str::FromStr;

#[derive(Clone, Debug, PartialEq)]
pub enum Scalar {
  Null,
  Bool(bool),
  Integer(i64),
  Double(f64),
  String(String),
}

impl Scalar {
  pub fn is_string(&self) -> bool {
    return matches!(self, Self::String(_));
  }
}

impl std::fmt::Display for Scalar {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    return match self {
      Self::Null => write!(f, "null"),
      Self::Bool(b) => b.fmt(f),
      Self::Integer(i) => i.fmt(f),
      Self::Double(d) => d.fmt(f),
      Self::String(s) => s.fmt(f),
    };
  }
}

#[derive(Clone, Debug, PartialEq)]
pub enum FilterValue {
  Scalar(Scalar),
  List(Vec<Scalar>),
}

#[derive(Clone, Debug, PartialEq)]
pub enum ValueError {
  /// Map-shaped literals such as `{"a": 1}` are not valid filter values.
  Dict,
}

impl FilterValue {
  /// Evaluates the value part of a filter expression.
  ///
  /// Accepts integers, floats, quoted strings, and bracketed lists, tuples
  /// or sets thereof. Anything that fails to evaluate is kept as a bare
  /// string. `null`, `true` and `false` match case-insensitively and `*` in
  /// strings is rewritten to the SQL wildcard `%`.
  pub fn parse(input: &str) -> Result<Self, ValueError> {
    let trimmed = input.trim();

    if let Some(inner) = strip_bracket_pair(trimmed, '[', ']')
      .or_else(|| strip_bracket_pair(trimmed, '(', ')'))
    {
      return Ok(Self::List(parse_elements(inner)));
    }

    if let Some(inner) = strip_bracket_pair(trimmed, '{', '}') {
      if contains_top_level(inner, ':') {
        return Err(ValueError::Dict);
      }
      return Ok(Self::List(parse_elements(inner)));
    }

    return Ok(Self::Scalar(parse_scalar(trimmed)));
  }

  pub fn is_list(&self) -> bool {
    return matches!(self, Self::List(_));
  }

  pub fn is_null(&self) -> bool {
    return matches!(self, Self::Scalar(Scalar::Null));
  }

  /// Round-trips back to the textual form understood by [`Self::parse`].
  pub fn unparse(&self) -> String {
    fn quote(scalar: &Scalar) -> String {
      return match scalar {
        Scalar::String(s) => format!("\"{s}\""),
        other => other.to_string(),
      };
    }

    return match self {
      Self::Scalar(Scalar::String(s)) => s.clone(),
      Self::Scalar(other) => other.to_string(),
      Self::List(items) => {
        let inner: Vec<String> = items.iter().map(quote).collect();
        format!("[{}]", inner.join(", "))
      }
    };
  }
}

fn strip_bracket_pair(s: &str, open: char, close: char) -> Option<&str> {
  if s.len() >= 2 && s.starts_with(open) && s.ends_with(close) {
    return Some(&s[open.len_utf8()..s.len() - close.len_utf8()]);
  }
  return None;
}

fn contains_top_level(s: &str, needle: char) -> bool {
  let mut quote: Option<char> = None;
  let mut escaped = false;
  for c in s.chars() {
    if escaped {
      escaped = false;
      continue;
    }
    match (c, quote) {
      ('\\', Some(_)) => escaped = true,
      (c, Some(q)) if c == q => quote = None,
      ('\'' | '"', None) => quote = Some(c),
      (c, None) if c == needle => return true,
      _ => {}
    }
  }
  return false;
}

/// Splits on top-level commas, respecting quotes.
fn split_elements(s: &str) -> Vec<String> {
  let mut elements: Vec<String> = vec![];
  let mut current = String::new();
  let mut quote: Option<char> = None;
  let mut escaped = false;

  for c in s.chars() {
    if escaped {
      current.push(c);
      escaped = false;
      continue;
    }
    match (c, quote) {
      ('\\', Some(_)) => {
        current.push(c);
        escaped = true;
      }
      (c, Some(q)) if c == q => {
        current.push(c);
        quote = None;
      }
      ('\'' | '"', None) => {
        current.push(c);
        quote = Some(c);
      }
      (',', None) => {
        elements.push(std::mem::take(&mut current));
      }
      _ => current.push(c),
    }
  }
  elements.push(current);

  return elements
    .into_iter()
    .map(|e| e.trim().to_string())
    .filter(|e| !e.is_empty())
    .collect();
}

fn parse_elements(inner: &str) -> Vec<Scalar> {
  return split_elements(inner)
    .iter()
    .map(|element| parse_scalar(element))
    .collect();
}

fn unquote(s: &str) -> Option<String> {
  let stripped = strip_bracket_pair(s, '\'', '\'').or_else(|| strip_bracket_pair(s, '"', '"'))?;

  let mut out = String::with_capacity(stripped.len());
  let mut escaped = false;
  for c in stripped.chars() {
    if escaped {
      out.push(c);
      escaped = false;
    } else if c == '\\' {
      escaped = true;
    } else {
      out.push(c);
    }
  }
  return Some(out);
}

fn parse_scalar(s: &str) -> Scalar {
  let text = match unquote(s) {
    Some(unquoted) => unquoted,
    None => {
      if let Ok(i) = i64::from_str(s) {
        return Scalar::Integer(i);
      }
      // Guard against "inf"/"nan" being swallowed as doubles.
      if s.chars().any(|c| c.is_ascii_digit()) {
        if let Ok(d) = f64::from_str(s) {
          if d.is_finite() {
            return Scalar::Double(d);
          }
        }
      }
      s.to_string()
    }
  };

  return match text.to_lowercase().as_str() {
    "null" => Scalar::Null,
    "true" => Scalar::Bool(true),
    "false" => Scalar::Bool(false),
    _ => Scalar::String(text.replace('*', "%")),
  };
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_scalar_values() {
    assert_eq!(
      FilterValue::parse("42").unwrap(),
      FilterValue::Scalar(Scalar::Integer(42))
    );
    assert_eq!(
      FilterValue::parse("-1.5").unwrap(),
      FilterValue::Scalar(Scalar::Double(-1.5))
    );
    assert_eq!(
      FilterValue::parse("NULL").unwrap(),
      FilterValue::Scalar(Scalar::Null)
    );
    assert_eq!(
      FilterValue::parse("True").unwrap(),
      FilterValue::Scalar(Scalar::Bool(true))
    );
    assert_eq!(
      FilterValue::parse("false").unwrap(),
      FilterValue::Scalar(Scalar::Bool(false))
    );
    assert_eq!(
      FilterValue::parse("lung").unwrap(),
      FilterValue::Scalar(Scalar::String("lung".to_string()))
    );
  }

  #[test]
  fn test_quoted_strings() {
    assert_eq!(
      FilterValue::parse("'Lung Cancer'").unwrap(),
      FilterValue::Scalar(Scalar::String("Lung Cancer".to_string()))
    );
    assert_eq!(
      FilterValue::parse("\"male\"").unwrap(),
      FilterValue::Scalar(Scalar::String("male".to_string()))
    );
    // Quoting does not shield the null sentinel.
    assert_eq!(
      FilterValue::parse("'null'").unwrap(),
      FilterValue::Scalar(Scalar::Null)
    );
  }

  #[test]
  fn test_wildcard_rewrite() {
    assert_eq!(
      FilterValue::parse("m*").unwrap(),
      FilterValue::Scalar(Scalar::String("m%".to_string()))
    );
    assert_eq!(
      FilterValue::parse("'*oma*'").unwrap(),
      FilterValue::Scalar(Scalar::String("%oma%".to_string()))
    );
  }

  #[test]
  fn test_lists() {
    assert_eq!(
      FilterValue::parse("[1, 2, 3]").unwrap(),
      FilterValue::List(vec![
        Scalar::Integer(1),
        Scalar::Integer(2),
        Scalar::Integer(3)
      ])
    );
    assert_eq!(
      FilterValue::parse("['a', \"b, c\"]").unwrap(),
      FilterValue::List(vec![
        Scalar::String("a".to_string()),
        Scalar::String("b, c".to_string()),
      ])
    );
    // Tuples and sets collapse to lists.
    assert_eq!(
      FilterValue::parse("(1, 2)").unwrap(),
      FilterValue::List(vec![Scalar::Integer(1), Scalar::Integer(2)])
    );
    assert_eq!(
      FilterValue::parse("{1, 2}").unwrap(),
      FilterValue::List(vec![Scalar::Integer(1), Scalar::Integer(2)])
    );
  }

  #[test]
  fn test_dict_rejected() {
    assert_eq!(
      FilterValue::parse("{\"a\": 1}").err(),
      Some(ValueError::Dict)
    );
    // A colon inside quotes is not a dict.
    assert!(FilterValue::parse("{'a:b'}").is_ok());
  }

  #[test]
  fn test_unparse_round_trip() {
    for raw in ["42", "-1.5", "null", "true", "m%"] {
      let value = FilterValue::parse(raw).unwrap();
      assert_eq!(FilterValue::parse(&value.unparse()).unwrap(), value);
    }

    let list = FilterValue::parse("[\"a\", \"b\"]").unwrap();
    assert_eq!(FilterValue::parse(&list.unparse()).unwrap(), list);
  }
}
