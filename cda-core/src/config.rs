use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("Missing required environment variable: {0}")]
  MissingVariable(&'static str),
}

/// Server configuration, read from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
  pub database_url: String,
  pub request_deadline: Duration,
  pub docker_deployed: bool,
}

const DEFAULT_REQUEST_DEADLINE_SECS: u64 = 30;

impl Config {
  pub fn from_env() -> Result<Config, ConfigError> {
    fn require(name: &'static str) -> Result<String, ConfigError> {
      return std::env::var(name).map_err(|_| ConfigError::MissingVariable(name));
    }

    let username = require("DB_USERNAME")?;
    let password = require("DB_PASSWORD")?;
    let hostname = require("DB_HOSTNAME")?;
    let port = std::env::var("DB_PORT").unwrap_or_else(|_| "5432".to_string());
    let database = require("DB_DATABASE")?;

    let request_deadline = std::env::var("REQUEST_DEADLINE_SECS")
      .ok()
      .and_then(|v| v.parse::<u64>().ok())
      .unwrap_or(DEFAULT_REQUEST_DEADLINE_SECS);

    return Ok(Config {
      database_url: format!("postgresql://{username}:{password}@{hostname}:{port}/{database}"),
      request_deadline: Duration::from_secs(request_deadline),
      docker_deployed: std::env::var("DOCKER_DEPLOYED").is_ok(),
    });
  }
}
