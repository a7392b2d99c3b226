use log::*;
use sqlx::PgPool;
use std::time::Duration;

use crate::errors::ApiError;
use crate::sql::{Literal, RenderedQuery};

macro_rules! bind_params {
  ($query:expr, $params:expr) => {{
    let mut query = $query;
    for param in $params {
      query = match param {
        Literal::Null => query.bind(None::<String>),
        Literal::Bool(b) => query.bind(*b),
        Literal::Integer(i) => query.bind(*i),
        Literal::Double(d) => query.bind(*d),
        Literal::String(s) => query.bind(s.as_str()),
      };
    }
    query
  }};
}

async fn with_deadline<T>(
  deadline: Duration,
  future: impl Future<Output = Result<T, sqlx::Error>>,
) -> Result<T, ApiError> {
  let Ok(result) = tokio::time::timeout(deadline, future).await else {
    return Err(ApiError::InternalError(
      "Database query deadline exceeded".to_string(),
    ));
  };
  return result.map_err(ApiError::from_db);
}

/// Fetches the single JSON column of every result row.
pub async fn fetch_json_rows(
  pool: &PgPool,
  deadline: Duration,
  rendered: &RenderedQuery,
) -> Result<Vec<serde_json::Value>, ApiError> {
  debug!("Executing query: {}", rendered.sql);
  let query = bind_params!(
    sqlx::query_scalar::<_, serde_json::Value>(&rendered.sql),
    &rendered.params
  );
  return with_deadline(deadline, query.fetch_all(pool)).await;
}

/// Fetches a single integer scalar, e.g. a row count.
pub async fn fetch_scalar_i64(
  pool: &PgPool,
  deadline: Duration,
  rendered: &RenderedQuery,
) -> Result<i64, ApiError> {
  debug!("Executing count query: {}", rendered.sql);
  let query = bind_params!(
    sqlx::query_scalar::<_, i64>(&rendered.sql),
    &rendered.params
  );
  return with_deadline(deadline, query.fetch_one(pool)).await;
}
