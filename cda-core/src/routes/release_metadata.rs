use axum::Json;
use axum::extract::State;
use log::*;

use crate::app_state::AppState;
use crate::errors::ApiError;
use crate::execute::fetch_json_rows;
use crate::models::ReleaseMetadataResponse;
use crate::query::release_metadata::build_release_metadata;
use crate::routes::query_id;
use crate::sql::render;

pub async fn release_metadata_handler(
  State(state): State<AppState>,
) -> Result<Json<ReleaseMetadataResponse>, ApiError> {
  let qid = query_id();
  info!("[{qid}] release_metadata endpoint hit");

  let query = build_release_metadata(state.catalog())?;
  let rendered = render(&query);
  let result = fetch_json_rows(state.pool(), state.request_deadline(), &rendered).await?;

  info!("[{qid}] Returning {} results", result.len());
  return Ok(Json(ReleaseMetadataResponse { result }));
}
