//! Read and delete operations over stored country records.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::repository::{CountryRecord, CountryRepository};

/// Column a listing is ordered by. Ordering is always descending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortField {
    Name,
    Population,
    #[default]
    EstimatedGdp,
    Region,
    Currency,
}

impl SortField {
    /// Map the `sort` query value onto a column.
    ///
    /// Unknown values (including the legacy `sort=true`) and a missing
    /// value both fall back to estimated GDP.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|value| value.trim().to_ascii_lowercase()).as_deref() {
            Some("name") => SortField::Name,
            Some("population") => SortField::Population,
            Some("gdp") => SortField::EstimatedGdp,
            Some("region") => SortField::Region,
            Some("currency") => SortField::Currency,
            _ => SortField::EstimatedGdp,
        }
    }

    pub(crate) fn order_expression(&self) -> &'static str {
        match self {
            SortField::Name => "name",
            SortField::Population => "population",
            SortField::EstimatedGdp => "estimated_gdp",
            SortField::Region => "region COLLATE UNICODE_NOCASE",
            SortField::Currency => "currency_code COLLATE UNICODE_NOCASE",
        }
    }
}

/// Query-string parameters accepted by `GET /countries`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CountryListQuery {
    pub region: Option<String>,
    pub currency: Option<String>,
    pub sort: Option<String>,
}

impl CountryListQuery {
    fn region(&self) -> Option<&str> {
        non_blank(self.region.as_deref())
    }

    fn currency(&self) -> Option<&str> {
        non_blank(self.currency.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Body of `GET /status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    #[serde(rename = "Total_countries")]
    pub total_countries: i64,
    pub last_refreshed_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct QueryService {
    repository: Arc<CountryRepository>,
}

impl QueryService {
    pub fn new(repository: Arc<CountryRepository>) -> Self {
        Self { repository }
    }

    pub async fn list(&self, query: &CountryListQuery) -> Result<Vec<CountryRecord>, AppError> {
        let sort = SortField::parse(query.sort.as_deref());
        let rows = self
            .repository
            .list_countries(query.region(), query.currency(), sort)
            .await?;
        Ok(rows)
    }

    pub async fn get_by_name(&self, name: &str) -> Result<CountryRecord, AppError> {
        self.repository
            .find_by_name(name)
            .await?
            .ok_or_else(|| AppError::NotFound(name.to_string()))
    }

    pub async fn delete_by_name(&self, name: &str) -> Result<(), AppError> {
        if self.repository.delete_by_name(name).await? {
            tracing::info!(name, "Country deleted");
            Ok(())
        } else {
            Err(AppError::NotFound(name.to_string()))
        }
    }

    /// Record count plus the last refresh time, `None` before the first refresh.
    pub async fn status(&self) -> Result<StatusReport, AppError> {
        let total_countries = self.repository.count_countries().await?;
        let last_refreshed_at = self.repository.last_refreshed_at().await?;
        Ok(StatusReport {
            total_countries,
            last_refreshed_at,
        })
    }
}
