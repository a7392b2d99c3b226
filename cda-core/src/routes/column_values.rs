use axum::Json;
use axum::extract::{OriginalUri, Path, Query, State};
use log::*;
use serde::Deserialize;

use crate::app_state::AppState;
use crate::errors::ApiError;
use crate::execute::{fetch_json_rows, fetch_scalar_i64};
use crate::models::PagedResponse;
use crate::query::column_values::build_column_values;
use crate::routes::{next_url, query_id};
use crate::sql::{render, render_for_log};

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ColumnValuesParams {
  #[serde(default)]
  pub data_source: String,
  pub limit: Option<i64>,
  pub offset: Option<i64>,
}

pub async fn column_values_handler(
  State(state): State<AppState>,
  Path(column): Path<String>,
  OriginalUri(uri): OriginalUri,
  Query(params): Query<ColumnValuesParams>,
) -> Result<Json<PagedResponse>, ApiError> {
  let qid = query_id();
  info!("[{qid}] column_values/{column}: {uri}");

  let mut plan = build_column_values(state.catalog(), &column, &params.data_source)?;
  plan.query.limit = params.limit;
  plan.query.offset = params.offset;

  let query_sql = render_for_log(&plan.query);
  debug!("[{qid}] Query: {query_sql}");

  let rendered = render(&plan.query);
  let rendered_count = render(&plan.count_query);
  let deadline = state.request_deadline();
  let (result, total_row_count) = tokio::try_join!(
    fetch_json_rows(state.pool(), deadline, &rendered),
    fetch_scalar_i64(state.pool(), deadline, &rendered_count),
  )?;

  info!(
    "[{qid}] Returning {} rows out of {total_row_count} results",
    result.len()
  );

  // Paging links only make sense when the caller paged explicitly.
  let next_url = match (params.limit, params.offset) {
    (Some(limit), Some(offset)) => next_url(&uri, limit, offset, total_row_count),
    _ => None,
  };

  return Ok(Json(PagedResponse {
    result,
    query_sql,
    total_row_count,
    next_url,
  }));
}
