#![allow(clippy::needless_return)]

use clap::Parser;
use log::*;
use sqlx::postgres::PgPoolOptions;

use cda_core::{AppState, Config, serve};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Parser)]
#[command(name = "cda-api", about = "Read-only analytics API over a data-commons schema")]
struct Args {
  /// Address the HTTP server binds to.
  #[arg(long, default_value = "0.0.0.0:8000")]
  address: String,

  /// Maximum number of pooled database connections.
  #[arg(long, default_value_t = 10)]
  max_connections: u32,
}

fn init_logger(docker_deployed: bool) {
  let env = env_logger::Env::new().default_filter_or("info");
  if docker_deployed {
    // Container logs get timestamps from the runtime; keep lines plain.
    env_logger::Builder::from_env(env)
      .format_timestamp(None)
      .write_style(env_logger::WriteStyle::Never)
      .init();
  } else {
    env_logger::Builder::from_env(env).init();
  }
}

async fn async_main() -> Result<(), BoxError> {
  let args = Args::parse();
  let config = Config::from_env()?;
  init_logger(config.docker_deployed);

  info!("Connecting to the database");
  let pool = PgPoolOptions::new()
    .max_connections(args.max_connections)
    .connect(&config.database_url)
    .await?;

  // The catalog is built once; a failure here aborts startup.
  let catalog = cda_schema::build_catalog(&pool).await?;

  let state = AppState::new(catalog, pool, config);
  serve(state, &args.address).await?;
  return Ok(());
}

#[tokio::main]
async fn main() {
  if let Err(err) = async_main().await {
    eprintln!("Startup failed: {err}");
    std::process::exit(1);
  }
}
