//! The search request state machine.
//!
//! A request moves through parameter extraction, location resolution,
//! forecast day validation, history bookkeeping, the forecast fetch and
//! finally day bucketing. User errors stop the machine early and end up in
//! [`SearchContext::error`]; everything else aborts the request.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, instrument};

use crate::bucketing::bucket;
use crate::geocoding::GeoResolver;
use crate::history::{HistoryLedger, HistoryStore, Viewer};
use crate::models::{DayBucket, SearchCriteria};
use crate::weather::{CURRENT_CHANNELS, ForecastClient, HOURLY_CHANNELS, resolve_timezone};
use crate::{MeteoError, Result};

pub const DEFAULT_FORECAST_DAYS: u8 = 3;
pub const MAX_FORECAST_DAYS: u8 = 16;

/// Query parameters of a search request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchParams {
    pub city: Option<String>,
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub admin: Option<String>,
    pub forecast_days: Option<String>,
    /// JSON object produced by the autocomplete widget
    pub selection: Option<String>,
    /// Set when the search is replayed from the history list
    pub history: Option<String>,
    /// Anything else the client sent
    pub extras: BTreeMap<String, String>,
}

impl SearchParams {
    /// Split raw query pairs into recognised fields and extras
    pub fn extract<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut params = Self::default();
        for (key, value) in pairs {
            let key = key.into();
            let value = value.into();
            let slot = match key.as_str() {
                "city" => &mut params.city,
                "country" => &mut params.country,
                "country_code" => &mut params.country_code,
                "admin" => &mut params.admin,
                "forecast_days" => &mut params.forecast_days,
                "selection" => &mut params.selection,
                "history" => &mut params.history,
                _ => {
                    params.extras.insert(key, value);
                    continue;
                }
            };
            *slot = Some(value);
        }
        params
    }

    /// No parameter was sent at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.city.is_none()
            && self.country.is_none()
            && self.country_code.is_none()
            && self.admin.is_none()
            && self.forecast_days.is_none()
            && self.selection.is_none()
            && self.history.is_none()
            && self.extras.is_empty()
    }

    #[must_use]
    pub fn from_history(&self) -> bool {
        self.history.as_deref().is_some_and(|h| !h.is_empty())
    }
}

/// Location picked in the autocomplete list
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    pub city: Option<String>,
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub admin: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

fn text_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn coordinate_field(map: &Map<String, Value>, key: &str) -> Option<f64> {
    match map.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl Selection {
    fn from_object(map: &Map<String, Value>) -> Self {
        Self {
            city: text_field(map, "city"),
            country: text_field(map, "country"),
            country_code: text_field(map, "country_code"),
            admin: text_field(map, "admin"),
            latitude: coordinate_field(map, "lat"),
            longitude: coordinate_field(map, "lon"),
        }
    }
}

/// How the location of a search is determined, decided once per request
#[derive(Debug, Clone, PartialEq)]
pub enum SearchInput {
    Selection(Selection),
    RawQuery {
        city: String,
        /// Only set when replaying a history entry
        admin: Option<String>,
    },
}

impl SearchInput {
    /// A `selection` that parses as a non-empty JSON object wins over the raw
    /// city text. Unparseable selections are ignored.
    #[must_use]
    pub fn from_params(params: &SearchParams, raw_city: &str) -> Self {
        let selection = params
            .selection
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .and_then(|s| serde_json::from_str::<Map<String, Value>>(s).ok())
            .filter(|map| !map.is_empty());

        if let Some(map) = selection {
            return SearchInput::Selection(Selection::from_object(&map));
        }

        let admin = if params.from_history() {
            params.admin.clone().filter(|a| !a.is_empty())
        } else {
            None
        };
        SearchInput::RawQuery {
            city: raw_city.to_string(),
            admin,
        }
    }
}

/// Empty input falls back to three days; anything else must be an integer in [1, 16].
pub fn validate_forecast_days(raw: Option<&str>) -> Result<u8> {
    let raw = raw.map(str::trim).unwrap_or_default();
    if raw.is_empty() {
        return Ok(DEFAULT_FORECAST_DAYS);
    }
    let days: i64 = raw.parse().map_err(|_| MeteoError::InvalidForecastDays)?;
    if !(1..=i64::from(MAX_FORECAST_DAYS)).contains(&days) {
        return Err(MeteoError::InvalidForecastDays);
    }
    u8::try_from(days).map_err(|_| MeteoError::InvalidForecastDays)
}

/// Recent search together with the query that repeats it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryItem {
    #[serde(flatten)]
    pub criteria: SearchCriteria,
    pub replay_query: String,
}

impl From<SearchCriteria> for HistoryItem {
    fn from(criteria: SearchCriteria) -> Self {
        let replay_query = criteria.replay_query();
        Self {
            criteria,
            replay_query,
        }
    }
}

/// Everything the front end needs to render a search page
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forecast_days: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_weather: Option<BTreeMap<&'static str, Value>>,
    pub hourly_by_day: Vec<DayBucket>,
    pub city_history: Vec<HistoryItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Resolved identity and coordinates of the searched place
#[derive(Debug)]
struct Place {
    city: String,
    country: Option<String>,
    country_code: Option<String>,
    admin: Option<String>,
    latitude: f64,
    longitude: f64,
}

impl Place {
    fn write_into(&self, context: &mut SearchContext) {
        context.city_name = Some(self.city.clone());
        context.latitude = Some(self.latitude);
        context.longitude = Some(self.longitude);
        context.country = self.country.clone();
        context.admin = self.admin.clone();
        context.country_code = self.country_code.clone();
    }

    fn criteria(&self, forecast_days: u8) -> SearchCriteria {
        SearchCriteria::new(
            self.city.clone(),
            self.country.clone(),
            self.country_code.clone(),
            self.admin.clone(),
            forecast_days,
        )
    }
}

/// Runs searches against the geocoder, the forecast source and the history ledger
pub struct SearchService<S> {
    geo: GeoResolver,
    forecast: ForecastClient,
    ledger: HistoryLedger<S>,
}

impl<S: HistoryStore> SearchService<S> {
    pub fn new(geo: GeoResolver, forecast: ForecastClient, ledger: HistoryLedger<S>) -> Self {
        Self {
            geo,
            forecast,
            ledger,
        }
    }

    #[must_use]
    pub fn geo(&self) -> &GeoResolver {
        &self.geo
    }

    #[must_use]
    pub fn ledger(&self) -> &HistoryLedger<S> {
        &self.ledger
    }

    /// Run one search. `now` is the viewer's current instant.
    ///
    /// User errors are reported through the returned context. The viewer's
    /// recent searches are attached on every path.
    #[instrument(skip_all)]
    pub async fn search(
        &self,
        params: &SearchParams,
        viewer: &mut Viewer<'_>,
        now: DateTime<Utc>,
    ) -> Result<SearchContext> {
        let mut context = SearchContext::default();

        match self.run(params, viewer, now, &mut context).await {
            Ok(()) => {}
            Err(err) if err.is_user_facing() => {
                info!("Search ended with user error: {}", err);
                context.error = Some(err.to_string());
            }
            Err(err) => return Err(err),
        }

        context.city_history = self
            .ledger
            .attach_history(viewer)
            .await?
            .into_iter()
            .map(HistoryItem::from)
            .collect();

        Ok(context)
    }

    async fn run(
        &self,
        params: &SearchParams,
        viewer: &mut Viewer<'_>,
        now: DateTime<Utc>,
        context: &mut SearchContext,
    ) -> Result<()> {
        if params.is_empty() {
            return Ok(());
        }

        let raw_city = params.city.as_deref().map(str::trim).unwrap_or_default();
        if raw_city.is_empty() {
            return Err(MeteoError::MissingCityInput);
        }

        let input = SearchInput::from_params(params, raw_city);
        let place = self.locate(input, raw_city).await?;
        place.write_into(context);

        let forecast_days = validate_forecast_days(params.forecast_days.as_deref())?;
        context.forecast_days = Some(forecast_days);

        self.ledger
            .record(&place.criteria(forecast_days), viewer)
            .await?;

        let forecast = self
            .forecast
            .fetch(place.latitude, place.longitude, forecast_days)
            .await?;
        let timezone = resolve_timezone(&forecast.timezone)?;

        context.current_weather = Some(forecast.current_weather(&CURRENT_CHANNELS));
        context.hourly_by_day = bucket(&forecast.hourly_series(&HOURLY_CHANNELS, timezone), now);

        debug!(
            "Built {} forecast days for {}",
            context.hourly_by_day.len(),
            place.city
        );
        Ok(())
    }

    async fn locate(&self, input: SearchInput, raw_city: &str) -> Result<Place> {
        match input {
            SearchInput::Selection(selection) => {
                let city = selection.city.unwrap_or_else(|| raw_city.to_string());
                let (latitude, longitude) = match (selection.latitude, selection.longitude) {
                    (Some(lat), Some(lon)) => (lat, lon),
                    _ => {
                        let geo = self
                            .geo
                            .resolve(&city, selection.country_code.as_deref(), None)
                            .await?;
                        (geo.latitude, geo.longitude)
                    }
                };
                Ok(Place {
                    city,
                    country: selection.country,
                    country_code: selection.country_code,
                    admin: selection.admin,
                    latitude,
                    longitude,
                })
            }
            SearchInput::RawQuery { city, admin } => {
                let geo = self.geo.resolve(&city, None, admin.as_deref()).await?;
                Ok(Place {
                    city: geo.name,
                    country: geo.country,
                    country_code: geo.country_code,
                    admin: geo.admin_region,
                    latitude: geo.latitude,
                    longitude: geo.longitude,
                })
            }
        }
    }
}
