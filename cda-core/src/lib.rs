#![forbid(unsafe_code)]
#![allow(clippy::needless_return)]
#![warn(clippy::await_holding_lock, clippy::inefficient_to_string)]

mod app_state;
mod config;
mod errors;
mod execute;
mod filter;
mod models;
mod query;
mod routes;
mod server;
mod sql;

pub use app_state::AppState;
pub use config::{Config, ConfigError};
pub use errors::ApiError;
pub use models::{
  ColumnListing, ColumnsResponse, DataRequestBody, PagedResponse, ReleaseMetadataResponse,
  RequestSpec, SummaryRequestBody, SummaryResponse,
};
pub use server::{api_router, serve};
