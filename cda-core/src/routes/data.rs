use axum::Json;
use axum::extract::{OriginalUri, Query, State};
use log::*;

use crate::app_state::AppState;
use crate::errors::ApiError;
use crate::execute::{fetch_json_rows, fetch_scalar_i64};
use crate::models::{DataRequestBody, PagedResponse};
use crate::query::data::build_data_query;
use crate::query::normalize::{QueryMode, normalize};
use crate::query::preselect::build_preselect;
use crate::routes::{PagingParams, next_url, query_id};
use crate::sql::{render, render_for_log};

pub async fn subject_data_handler(
  State(state): State<AppState>,
  OriginalUri(uri): OriginalUri,
  Query(paging): Query<PagingParams>,
  Json(body): Json<DataRequestBody>,
) -> Result<Json<PagedResponse>, ApiError> {
  return data_endpoint(state, "subject", uri, paging, body).await;
}

pub async fn file_data_handler(
  State(state): State<AppState>,
  OriginalUri(uri): OriginalUri,
  Query(paging): Query<PagingParams>,
  Json(body): Json<DataRequestBody>,
) -> Result<Json<PagedResponse>, ApiError> {
  return data_endpoint(state, "file", uri, paging, body).await;
}

/// Compiles and runs the paged row query for one endpoint table. The row
/// and count queries execute concurrently under the request deadline.
async fn data_endpoint(
  state: AppState,
  endpoint_name: &str,
  uri: axum::http::Uri,
  paging: PagingParams,
  body: DataRequestBody,
) -> Result<Json<PagedResponse>, ApiError> {
  let qid = query_id();
  info!("[{qid}] data/{endpoint_name}: {uri}");

  let spec = body.to_spec();
  let catalog = state.catalog();
  let endpoint = catalog.table_by_name(endpoint_name)?.id;

  let normalized = normalize(catalog, endpoint, &spec, QueryMode::Data)?;
  let preselect = build_preselect(catalog, state.resolver(), &normalized)?;
  let mut plan = build_data_query(
    catalog,
    state.resolver(),
    &normalized,
    &preselect,
    spec.collate_results,
  )?;
  plan.query.limit = Some(paging.limit.max(0));
  plan.query.offset = Some(paging.offset.max(0));

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
    "[{qid}] Returning {} rows out of {total_row_count} results | limit={} & offset={}",
    result.len(),
    paging.limit,
    paging.offset
  );

  let next_url = next_url(&uri, paging.limit, paging.offset, total_row_count);
  return Ok(Json(PagedResponse {
    result,
    query_sql,
    total_row_count,
    next_url,
  }));
}
