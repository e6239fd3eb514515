//! Connection pool setup and migration runner.

use sqlx::sqlite::{SqlitePoolOptions, SqliteConnectOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

use cx_domain::error::{Error, Result};

/// Open (creating if necessary) the sqlite database at `url` and run all
/// pending migrations. `url` is a full `sqlx` connection string, e.g.
/// `sqlite://./data/gateway.db?mode=rwc`.
pub async fn connect(url: &str, max_connections: u32) -> Result<SqlitePool> {
    let opts = SqliteConnectOptions::from_str(url)
        .map_err(|e| Error::Database(format!("invalid database url {url}: {e}")))?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(opts)
        .await
        .map_err(|e| Error::Database(format!("connecting to {url}: {e}")))?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| Error::Database(format!("running migrations: {e}")))?;

    tracing::info!(url = %url, "database ready");
    Ok(pool)
}
