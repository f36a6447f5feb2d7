//! Meteo - city weather search service
//!
//! Resolves free-text city names through the Open-Meteo geocoder, fetches
//! current and hourly forecasts, groups the hourly series into local days and
//! keeps per-viewer search history plus global search statistics.

pub mod api;
pub mod bucketing;
pub mod config;
pub mod error;
pub mod geocoding;
pub mod history;
pub mod logging;
pub mod models;
pub mod search;
pub mod session;
pub mod store;
pub mod weather;
pub mod web;

// Re-export core types for public API
pub use api::AppState;
pub use config::MeteoConfig;
pub use error::MeteoError;
pub use geocoding::GeoResolver;
pub use history::{HistoryLedger, HistoryStore, SessionHandle, Viewer};
pub use models::{CityCount, DayBucket, GeoMatch, SearchCriteria};
pub use search::{SearchContext, SearchParams, SearchService};
pub use session::SessionStore;
pub use store::FjallHistoryStore;
pub use weather::ForecastClient;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Core result type used throughout the library
pub type Result<T> = std::result::Result<T, MeteoError>;
