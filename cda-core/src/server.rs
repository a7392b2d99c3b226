use axum::Router;
use axum::routing::{get, post};
use log::*;
use tokio::signal;

use crate::app_state::AppState;
use crate::routes;

pub fn api_router(state: AppState) -> Router {
  return Router::new()
    .route("/data/subject", post(routes::data::subject_data_handler))
    .route("/data/file", post(routes::data::file_data_handler))
    .route(
      "/summary/subject",
      post(routes::summary::subject_summary_handler),
    )
    .route("/summary/file", post(routes::summary::file_summary_handler))
    .route(
      "/column_values/{column}",
      post(routes::column_values::column_values_handler),
    )
    .route("/columns", get(routes::columns::columns_handler))
    .route(
      "/release_metadata",
      get(routes::release_metadata::release_metadata_handler),
    )
    .with_state(state);
}

/// Serves the API until ctrl-c or SIGTERM.
pub async fn serve(state: AppState, address: &str) -> std::io::Result<()> {
  let listener = tokio::net::TcpListener::bind(address).await?;
  info!("Listening on {address}");

  return axum::serve(listener, api_router(state))
    .with_graceful_shutdown(shutdown_signal())
    .await;
}

async fn shutdown_signal() {
  let ctrl_c = async {
    if let Err(err) = signal::ctrl_c().await {
      error!("Failed to install ctrl-c handler: {err}");
    }
  };

  #[cfg(unix)]
  let terminate = async {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
      Ok(mut stream) => {
        stream.recv().await;
      }
      Err(err) => error!("Failed to install SIGTERM handler: {err}"),
    }
  };

  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
    _ = ctrl_c => {},
    _ = terminate => {},
  }
  info!("Shutting down");
}
