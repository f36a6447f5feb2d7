//! Search criteria and history rows

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of one completed search.
///
/// Empty optional fields are stored as `None`, so two criteria compare equal
/// exactly when their non-empty field sets are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchCriteria {
    pub city: String,
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub admin: Option<String>,
    pub forecast_days: u8,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl SearchCriteria {
    #[must_use]
    pub fn new(
        city: impl Into<String>,
        country: Option<String>,
        country_code: Option<String>,
        admin: Option<String>,
        forecast_days: u8,
    ) -> Self {
        Self {
            city: city.into(),
            country: non_empty(country),
            country_code: non_empty(country_code),
            admin: non_empty(admin),
            forecast_days,
        }
    }

    /// Query string that re-runs this search through the history path
    #[must_use]
    pub fn replay_query(&self) -> String {
        let forecast_days = self.forecast_days.to_string();
        let mut pairs: Vec<(&str, &str)> = Vec::with_capacity(6);
        if !self.city.is_empty() {
            pairs.push(("city", &self.city));
        }
        for (key, value) in [
            ("country", &self.country),
            ("country_code", &self.country_code),
            ("admin", &self.admin),
        ] {
            if let Some(value) = value {
                pairs.push((key, value));
            }
        }
        pairs.push(("forecast_days", &forecast_days));
        pairs.push(("history", "true"));

        pairs
            .into_iter()
            .map(|(key, value)| format!("{key}={}", urlencoding::encode(value)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

/// Durable history row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub criteria: SearchCriteria,
    /// Authenticated user id, `None` for statistics-only rows
    pub owner: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    #[must_use]
    pub fn new(criteria: SearchCriteria, owner: Option<String>) -> Self {
        Self {
            criteria,
            owner,
            timestamp: Utc::now(),
        }
    }
}

/// Number of searches recorded for one city
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CityCount {
    pub city: String,
    pub count: u64,
}
