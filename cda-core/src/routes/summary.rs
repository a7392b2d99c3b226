use axum::Json;
use axum::extract::State;
use log::*;

use crate::app_state::AppState;
use crate::errors::ApiError;
use crate::execute::fetch_json_rows;
use crate::models::{SummaryRequestBody, SummaryResponse};
use crate::query::normalize::{QueryMode, normalize};
use crate::query::preselect::build_preselect;
use crate::query::summary::build_summary_query;
use crate::routes::query_id;
use crate::sql::{render, render_for_log};

pub async fn subject_summary_handler(
  State(state): State<AppState>,
  Json(body): Json<SummaryRequestBody>,
) -> Result<Json<SummaryResponse>, ApiError> {
  return summary_endpoint(state, "subject", body).await;
}

pub async fn file_summary_handler(
  State(state): State<AppState>,
  Json(body): Json<SummaryRequestBody>,
) -> Result<Json<SummaryResponse>, ApiError> {
  return summary_endpoint(state, "file", body).await;
}

async fn summary_endpoint(
  state: AppState,
  endpoint_name: &str,
  body: SummaryRequestBody,
) -> Result<Json<SummaryResponse>, ApiError> {
  let qid = query_id();
  info!("[{qid}] summary/{endpoint_name} endpoint hit");

  let spec = body.to_spec();
  if !spec.has_filters() {
    return Err(ApiError::EmptyQueryError(
      "Must provide either/both of 'MATCH_ALL' or 'MATCH_SOME' within the request body".to_string(),
    ));
  }

  let catalog = state.catalog();
  let endpoint = catalog.table_by_name(endpoint_name)?.id;

  let normalized = normalize(catalog, endpoint, &spec, QueryMode::Summary)?;
  let preselect = build_preselect(catalog, state.resolver(), &normalized)?;
  let query = build_summary_query(catalog, state.resolver(), &normalized, &preselect)?;

  let query_sql = render_for_log(&query);
  debug!("[{qid}] Query: {query_sql}");

  let rendered = render(&query);
  let result = fetch_json_rows(state.pool(), state.request_deadline(), &rendered).await?;

  info!("[{qid}] Summary complete");
  return Ok(Json(SummaryResponse { result, query_sql }));
}
