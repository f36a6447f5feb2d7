//! Data models for the Meteo service
//!
//! This module contains the core domain models organized by concern:
//! - Location: geocoding matches
//! - Search: search criteria and history rows
//! - Forecast: channel tables, hourly series and day buckets

pub mod forecast;
pub mod location;
pub mod search;

// Re-export all public types for convenient access
pub use forecast::{ChannelSpec, DayBucket, ForecastSeries, HourlyRecord, SeriesChannel, safe_round};
pub use location::GeoMatch;
pub use search::{CityCount, HistoryEntry, SearchCriteria};
