use axum::Json;
use axum::extract::State;
use log::*;

use crate::app_state::AppState;
use crate::errors::ApiError;
use crate::models::ColumnsResponse;
use crate::query::columns::build_columns_listing;
use crate::routes::query_id;

pub async fn columns_handler(
  State(state): State<AppState>,
) -> Result<Json<ColumnsResponse>, ApiError> {
  let qid = query_id();
  info!("[{qid}] columns endpoint hit");

  return Ok(Json(ColumnsResponse {
    result: build_columns_listing(state.catalog()),
  }));
}
