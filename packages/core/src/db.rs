//! SQLite pool construction.
//!
//! The schema lives in `migrations/` and is embedded at compile time, so
//! every pool handed out by [`create_pool`] is ready to use.
//!
//! Every connection also carries the [`NAME_COLLATION`] collation, which the
//! schema and the repository use for case-insensitive text matching. SQLite's
//! built-in `NOCASE` only folds ASCII, so "Åland Islands" and
//! "åland islands" would otherwise be two different countries.

use std::cmp::Ordering;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

/// Collation name referenced by `migrations/` and the repository SQL.
pub const NAME_COLLATION: &str = "UNICODE_NOCASE";

/// Compare two strings ignoring case, using full Unicode lowercasing.
pub fn unicode_nocase(a: &str, b: &str) -> Ordering {
    a.chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase))
}

/// Open a pool for `database_url` and bring the schema up to date.
///
/// In-memory databases live and die with their connection, so those get a
/// single connection that is never recycled.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .collation(NAME_COLLATION, unicode_nocase);

    let pool = if is_in_memory(database_url) {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?
    } else {
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?
    };

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::debug!("Database schema ready");

    Ok(pool)
}

fn is_in_memory(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}
