pub mod column_values;
pub mod columns;
pub mod data;
pub mod release_metadata;
pub mod summary;

use axum::http::Uri;
use serde::Deserialize;

#[derive(Clone, Copy, Debug, Deserialize)]
pub struct PagingParams {
  #[serde(default = "default_limit")]
  pub limit: i64,
  #[serde(default)]
  pub offset: i64,
}

fn default_limit() -> i64 {
  return 100;
}

impl Default for PagingParams {
  fn default() -> Self {
    return PagingParams {
      limit: default_limit(),
      offset: 0,
    };
  }
}

/// Short id correlating all log lines of one request.
pub(crate) fn query_id() -> String {
  return uuid::Uuid::new_v4().to_string();
}

/// The request URL with `offset` advanced by one page, when more rows exist.
pub(crate) fn next_url(uri: &Uri, limit: i64, offset: i64, total_row_count: i64) -> Option<String> {
  let next_offset = offset + limit;
  if next_offset >= total_row_count {
    return None;
  }

  let mut pairs: Vec<(String, String)> =
    form_urlencoded::parse(uri.query().unwrap_or_default().as_bytes())
      .into_owned()
      .filter(|(key, _)| key != "offset")
      .collect();
  pairs.push(("offset".to_string(), next_offset.to_string()));

  let query = form_urlencoded::Serializer::new(String::new())
    .extend_pairs(pairs)
    .finish();
  return Some(format!("{}?{query}", uri.path()));
}
