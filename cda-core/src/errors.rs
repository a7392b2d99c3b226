use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::*;
use serde::Serialize;
use thiserror::Error;

use cda_schema::SchemaError;

/// Publicly visible errors of the analytics API.
///
/// The HTTP status is bound to the kind, not to the call site, and responses
/// carry a stable `{error_type, message}` body.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("{0}")]
  ColumnNotFound(String),
  #[error("{0}")]
  TableNotFound(String),
  #[error("{0}")]
  SystemNotFound(String),
  #[error("{0}")]
  ParsingError(String),
  #[error("{0}")]
  InvalidFilterError(String),
  #[error("{0}")]
  EmptyQueryError(String),
  #[error("{0}")]
  RelationshipNotFound(String),
  #[error("{0}")]
  RelationshipError(String),
  #[error("{0}")]
  MappingError(String),
  #[error("{0}")]
  DatabaseConnectionDrop(String),
  #[error("{0}")]
  InternalError(String),
}

const INVALID_FILTER_MESSAGE: &str = "Invalid match filter provided. Please verify that you are \
   using the correct operators and values for the column used in the filter";

const CONNECTION_DROP_MESSAGE: &str = "A drop in the database connection was detected, please \
   attempt your query again.";

impl ApiError {
  pub fn status(&self) -> StatusCode {
    return match self {
      Self::ColumnNotFound(_)
      | Self::TableNotFound(_)
      | Self::SystemNotFound(_)
      | Self::ParsingError(_)
      | Self::InvalidFilterError(_)
      | Self::EmptyQueryError(_) => StatusCode::BAD_REQUEST,
      Self::RelationshipNotFound(_)
      | Self::RelationshipError(_)
      | Self::MappingError(_)
      | Self::DatabaseConnectionDrop(_)
      | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
  }

  pub fn error_type(&self) -> &'static str {
    return match self {
      Self::ColumnNotFound(_) => "ColumnNotFound",
      Self::TableNotFound(_) => "TableNotFound",
      Self::SystemNotFound(_) => "SystemNotFound",
      Self::ParsingError(_) => "ParsingError",
      Self::InvalidFilterError(_) => "InvalidFilterError",
      Self::EmptyQueryError(_) => "EmptyQueryError",
      Self::RelationshipNotFound(_) => "RelationshipNotFound",
      Self::RelationshipError(_) => "RelationshipError",
      Self::MappingError(_) => "MappingError",
      Self::DatabaseConnectionDrop(_) => "DatabaseConnectionDrop",
      Self::InternalError(_) => "InternalError",
    };
  }

  /// Translates database driver errors at the route boundary. Operator and
  /// type mismatches the parser could not catch surface as user errors; a
  /// lost connection is flagged as retryable.
  pub fn from_db(err: sqlx::Error) -> Self {
    match &err {
      sqlx::Error::Database(db_err) => {
        let message = db_err.message();
        let invalid_filter = message.contains("operator does not exist")
          || (message.contains("function upper(") && message.contains("does not exist"))
          || message.contains("must be type boolean")
          || message.contains("invalid input syntax for type");
        if invalid_filter {
          debug!("Invalid filter detected in database error: {message}");
          return Self::InvalidFilterError(INVALID_FILTER_MESSAGE.to_string());
        }
        return Self::InternalError(message.to_string());
      }
      sqlx::Error::Io(_)
      | sqlx::Error::PoolTimedOut
      | sqlx::Error::PoolClosed
      | sqlx::Error::WorkerCrashed => {
        error!("Database connection drop detected: {err}");
        return Self::DatabaseConnectionDrop(CONNECTION_DROP_MESSAGE.to_string());
      }
      _ => {
        return Self::InternalError(err.to_string());
      }
    }
  }
}

impl From<SchemaError> for ApiError {
  fn from(err: SchemaError) -> Self {
    return match err {
      SchemaError::TableNotFound(message) => Self::TableNotFound(message),
      SchemaError::ColumnNotFound(message) => Self::ColumnNotFound(message),
      SchemaError::RelationshipNotFound(message) => Self::RelationshipNotFound(message),
      SchemaError::Relationship(message) => Self::RelationshipError(message),
      SchemaError::Mapping(message) => Self::MappingError(message),
      SchemaError::Database(err) => Self::InternalError(err.to_string()),
    };
  }
}

impl From<cda_filter::ParseError> for ApiError {
  fn from(err: cda_filter::ParseError) -> Self {
    return Self::ParsingError(err.to_string());
  }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
  error_type: &'static str,
  message: String,
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = self.status();
    if status.is_server_error() {
      error!("{}: {self}", self.error_type());
    } else {
      info!("{}: {self}", self.error_type());
    }

    let body = ErrorBody {
      error_type: self.error_type(),
      message: self.to_string(),
    };
    return (status, Json(body)).into_response();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_status_by_kind() {
    assert_eq!(
      ApiError::ColumnNotFound("x".to_string()).status(),
      StatusCode::BAD_REQUEST
    );
    assert_eq!(
      ApiError::ParsingError("x".to_string()).status(),
      StatusCode::BAD_REQUEST
    );
    assert_eq!(
      ApiError::InvalidFilterError("x".to_string()).status(),
      StatusCode::BAD_REQUEST
    );
    assert_eq!(
      ApiError::EmptyQueryError("x".to_string()).status(),
      StatusCode::BAD_REQUEST
    );
    assert_eq!(
      ApiError::RelationshipNotFound("x".to_string()).status(),
      StatusCode::INTERNAL_SERVER_ERROR
    );
    assert_eq!(
      ApiError::DatabaseConnectionDrop("x".to_string()).status(),
      StatusCode::INTERNAL_SERVER_ERROR
    );
  }

  #[test]
  fn test_connection_errors_are_retryable() {
    let err = ApiError::from_db(sqlx::Error::PoolTimedOut);
    assert!(matches!(err, ApiError::DatabaseConnectionDrop(_)));
  }

  #[test]
  fn test_other_errors_are_internal() {
    let err = ApiError::from_db(sqlx::Error::RowNotFound);
    assert!(matches!(err, ApiError::InternalError(_)));
  }
}
