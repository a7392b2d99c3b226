use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

use cda_schema::{Catalog, RelationshipResolver};

use crate::config::Config;

/// The app's internal state. AppState needs to be clonable, so arc once
/// rather than per field.
struct InternalState {
  catalog: Catalog,
  resolver: RelationshipResolver,
  pool: PgPool,
  config: Config,
}

#[derive(Clone)]
pub struct AppState {
  state: Arc<InternalState>,
}

impl AppState {
  pub fn new(catalog: Catalog, pool: PgPool, config: Config) -> Self {
    return AppState {
      state: Arc::new(InternalState {
        catalog,
        resolver: RelationshipResolver::new(),
        pool,
        config,
      }),
    };
  }

  #[inline]
  pub fn catalog(&self) -> &Catalog {
    return &self.state.catalog;
  }

  #[inline]
  pub fn resolver(&self) -> &RelationshipResolver {
    return &self.state.resolver;
  }

  #[inline]
  pub fn pool(&self) -> &PgPool {
    return &self.state.pool;
  }

  /// Deadline inherited by every database call of a request.
  #[inline]
  pub fn request_deadline(&self) -> Duration {
    return self.state.config.request_deadline;
  }
}
