use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum SchemaError {
  #[error("{0}")]
  TableNotFound(String),
  #[error("{0}")]
  ColumnNotFound(String),
  #[error("{0}")]
  RelationshipNotFound(String),
  #[error("{0}")]
  Relationship(String),
  #[error("{0}")]
  Mapping(String),
  #[error("Database error: {0}")]
  Database(Arc<sqlx::Error>),
}

impl From<sqlx::Error> for SchemaError {
  fn from(err: sqlx::Error) -> Self {
    return Self::Database(Arc::new(err));
  }
}
