//! Database repository for country records.
//!
//! All SQLite read/write logic lives here. The refresh pipeline hands a
//! whole batch to [`CountryRepository::upsert_batch`], which applies it in
//! one transaction together with the refresh marker, so readers either see
//! the previous state or the complete new batch.
//!
//! Name matching is case-insensitive everywhere, including non-ASCII letters
//! (`COLLATE UNICODE_NOCASE`, registered in [`crate::db`]). The UNIQUE
//! constraint on `countries.name` uses the same collation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::query::SortField;

/// One persisted country row, serialised as-is by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CountryRecord {
    pub id: i64,
    pub name: String,
    pub capital: Option<String>,
    pub region: Option<String>,
    pub population: i64,
    pub currency_code: Option<String>,
    pub flag_url: Option<String>,
    pub exchange_rate: Option<f64>,
    pub estimated_gdp: Option<f64>,
}

/// A normalized record ready to be inserted or written over an existing row.
#[derive(Debug, Clone, PartialEq)]
pub struct CountryDraft {
    pub name: String,
    pub capital: String,
    pub region: String,
    pub population: i64,
    pub currency_code: Option<String>,
    pub exchange_rate: Option<f64>,
    pub estimated_gdp: Option<f64>,
    pub flag_url: String,
}

/// Row counts from a committed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertCounts {
    pub inserted: usize,
    pub updated: usize,
}

const COUNTRY_COLUMNS: &str =
    "id, name, capital, region, population, currency_code, flag_url, exchange_rate, estimated_gdp";

/// Repository for reading and writing country data to SQLite.
pub struct CountryRepository {
    pool: SqlitePool,
}

impl CountryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Upsert every draft and stamp the refresh marker, all in one transaction.
    ///
    /// An existing row is matched by case-insensitive name and has every
    /// mutable field overwritten, including the stored spelling of the name.
    /// The marker is only touched when the batch is non-empty.
    pub async fn upsert_batch(
        &self,
        drafts: &[CountryDraft],
        refreshed_at: DateTime<Utc>,
    ) -> Result<UpsertCounts, sqlx::Error> {
        let mut counts = UpsertCounts::default();
        if drafts.is_empty() {
            return Ok(counts);
        }

        let mut tx = self.pool.begin().await?;

        for draft in drafts {
            let existing: Option<(i64,)> =
                sqlx::query_as("SELECT id FROM countries WHERE name = ? COLLATE UNICODE_NOCASE LIMIT 1")
                    .bind(&draft.name)
                    .fetch_optional(&mut *tx)
                    .await?;

            match existing {
                Some((id,)) => {
                    sqlx::query(
                        "UPDATE countries
                         SET name = ?, capital = ?, region = ?, population = ?,
                             currency_code = ?, exchange_rate = ?, estimated_gdp = ?, flag_url = ?
                         WHERE id = ?",
                    )
                    .bind(&draft.name)
                    .bind(&draft.capital)
                    .bind(&draft.region)
                    .bind(draft.population)
                    .bind(&draft.currency_code)
                    .bind(draft.exchange_rate)
                    .bind(draft.estimated_gdp)
                    .bind(&draft.flag_url)
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                    counts.updated += 1;
                }
                None => {
                    sqlx::query(
                        "INSERT INTO countries
                         (name, capital, region, population, currency_code, exchange_rate, estimated_gdp, flag_url)
                         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                    )
                    .bind(&draft.name)
                    .bind(&draft.capital)
                    .bind(&draft.region)
                    .bind(draft.population)
                    .bind(&draft.currency_code)
                    .bind(draft.exchange_rate)
                    .bind(draft.estimated_gdp)
                    .bind(&draft.flag_url)
                    .execute(&mut *tx)
                    .await?;
                    counts.inserted += 1;
                }
            }
        }

        sqlx::query(
            "INSERT INTO refresh_marker (id, last_refreshed_at) VALUES (1, ?)
             ON CONFLICT(id) DO UPDATE SET last_refreshed_at = excluded.last_refreshed_at",
        )
        .bind(refreshed_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(counts)
    }

    /// List countries, optionally filtered by region and/or currency code
    /// (case-insensitive equality), always in descending `sort` order.
    /// NULLs sort last; ties fall back to insertion order.
    pub async fn list_countries(
        &self,
        region: Option<&str>,
        currency: Option<&str>,
        sort: SortField,
    ) -> Result<Vec<CountryRecord>, sqlx::Error> {
        let mut conditions = vec!["1=1"];
        if region.is_some() {
            conditions.push("region = ? COLLATE UNICODE_NOCASE");
        }
        if currency.is_some() {
            conditions.push("currency_code = ? COLLATE UNICODE_NOCASE");
        }

        let sql = format!(
            "SELECT {} FROM countries WHERE {} ORDER BY {} DESC, id ASC",
            COUNTRY_COLUMNS,
            conditions.join(" AND "),
            sort.order_expression()
        );

        let mut q = sqlx::query_as::<_, CountryRecord>(&sql);
        if let Some(region) = region {
            q = q.bind(region);
        }
        if let Some(currency) = currency {
            q = q.bind(currency);
        }
        q.fetch_all(&self.pool).await
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Option<CountryRecord>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM countries WHERE name = ? COLLATE UNICODE_NOCASE LIMIT 1",
            COUNTRY_COLUMNS
        );
        sqlx::query_as::<_, CountryRecord>(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
    }

    /// Delete by case-insensitive name. Returns `true` if a row was removed.
    pub async fn delete_by_name(&self, name: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM countries WHERE name = ? COLLATE UNICODE_NOCASE")
            .bind(name)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn count_countries(&self) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM countries")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Highest estimated GDPs first. Rows without a GDP are left out.
    pub async fn top_by_gdp(&self, limit: i64) -> Result<Vec<CountryRecord>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM countries
             WHERE estimated_gdp IS NOT NULL
             ORDER BY estimated_gdp DESC, id ASC
             LIMIT ?",
            COUNTRY_COLUMNS
        );
        sqlx::query_as::<_, CountryRecord>(&sql)
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .await
    }

    /// Timestamp of the last committed refresh, `None` before the first one.
    pub async fn last_refreshed_at(&self) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT last_refreshed_at FROM refresh_marker WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(raw,)| {
            DateTime::parse_from_rfc3339(&raw)
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(|err| sqlx::Error::Decode(Box::new(err)))
        })
        .transpose()
    }
}
