//! Open-Meteo forecast client and channel extraction tables.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use anyhow::{Context, anyhow};
use chrono_tz::Tz;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::config::WeatherConfig;
use crate::models::{ChannelSpec, ForecastSeries, SeriesChannel};
use crate::{MeteoError, Result};

/// Variables requested in the `current` block, in index order
pub const CURRENT_VARIABLES: [&str; 5] = [
    "temperature_2m",
    "apparent_temperature",
    "relative_humidity_2m",
    "rain",
    "is_day",
];

/// Variables requested in the `hourly` block, in index order
pub const HOURLY_VARIABLES: [&str; 6] = [
    "temperature_2m",
    "apparent_temperature",
    "relative_humidity_2m",
    "rain",
    "is_day",
    "wind_speed_10m",
];

pub const CURRENT_CHANNELS: [ChannelSpec; 5] = [
    ChannelSpec::rounded("temperature", 0),
    ChannelSpec::rounded("apparent_temperature", 1),
    ChannelSpec::raw("humidity", 2),
    ChannelSpec::rounded("rain", 3),
    ChannelSpec::raw("is_day", 4),
];

pub const HOURLY_CHANNELS: [ChannelSpec; 6] = [
    ChannelSpec::rounded("temperature", 0),
    ChannelSpec::rounded("apparent_temperature", 1),
    ChannelSpec::raw("humidity", 2),
    ChannelSpec::rounded("rain", 3),
    ChannelSpec::raw("is_day", 4),
    ChannelSpec::rounded("wind_speed", 5),
];

const DEFAULT_INTERVAL_SECONDS: i64 = 3600;

/// Raw payload of the forecast endpoint with `timeformat=unixtime`
#[derive(Debug, Deserialize)]
struct RawForecast {
    timezone: String,
    current: Map<String, Value>,
    hourly: Map<String, Value>,
}

/// Current conditions, addressed by variable index
#[derive(Debug, Clone)]
pub struct CurrentBundle {
    values: Vec<Value>,
}

impl CurrentBundle {
    #[must_use]
    pub fn variable(&self, index: usize) -> Value {
        self.values.get(index).cloned().unwrap_or(Value::Null)
    }
}

/// Hourly series, addressed by variable index
#[derive(Debug, Clone)]
pub struct HourlyBundle {
    pub start: i64,
    pub interval: i64,
    pub len: usize,
    variables: Vec<Vec<Value>>,
}

impl HourlyBundle {
    #[must_use]
    pub fn variable(&self, index: usize) -> &[Value] {
        self.variables.get(index).map_or(&[], Vec::as_slice)
    }
}

/// Decoded forecast response
#[derive(Debug, Clone)]
pub struct ForecastResponse {
    /// IANA timezone identifier of the forecast location
    pub timezone: String,
    pub current: CurrentBundle,
    pub hourly: HourlyBundle,
}

impl ForecastResponse {
    /// Current conditions keyed by channel name
    #[must_use]
    pub fn current_weather(&self, table: &[ChannelSpec]) -> BTreeMap<&'static str, Value> {
        table
            .iter()
            .map(|spec| (spec.name, spec.apply(self.current.variable(spec.source_index))))
            .collect()
    }

    /// Hourly series for the bucketer; transforms are applied there
    #[must_use]
    pub fn hourly_series(&self, table: &[ChannelSpec], timezone: Tz) -> ForecastSeries {
        ForecastSeries {
            start: self.hourly.start,
            interval: self.hourly.interval,
            len: self.hourly.len,
            timezone,
            channels: table
                .iter()
                .map(|spec| SeriesChannel {
                    spec: *spec,
                    values: self.hourly.variable(spec.source_index).to_vec(),
                })
                .collect(),
        }
    }
}

/// Parse a timezone identifier delivered as text or raw bytes
pub fn resolve_timezone(raw: impl AsRef<[u8]>) -> Result<Tz> {
    let name = String::from_utf8_lossy(raw.as_ref()).trim().to_string();
    name.parse::<Tz>()
        .map_err(|_| MeteoError::UnknownTimezone { name: name.clone() })
}

/// Client for the Open-Meteo forecast endpoint
pub struct ForecastClient {
    client: Client,
    base_url: String,
}

impl ForecastClient {
    pub fn new(config: &WeatherConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds.into()))
            .user_agent(concat!("meteo/", env!("CARGO_PKG_VERSION")))
            .build()
            .with_context(|| "Failed to create forecast HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Current and hourly forecast for the given coordinates
    #[instrument(skip(self))]
    pub async fn fetch(
        &self,
        latitude: f64,
        longitude: f64,
        forecast_days: u8,
    ) -> Result<ForecastResponse> {
        let url = format!(
            "{}/forecast?latitude={}&longitude={}&current={}&hourly={}&timezone=auto&forecast_days={}&timeformat=unixtime",
            self.base_url,
            latitude,
            longitude,
            CURRENT_VARIABLES.join(","),
            HOURLY_VARIABLES.join(","),
            forecast_days
        );
        debug!("Open-Meteo forecast request URL: {}", url);
        let start_time = Instant::now();

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .with_context(|| "Forecast request failed")
            .map_err(|e| MeteoError::forecast(format!("{e:#}")))?;

        let raw: RawForecast = response
            .json()
            .await
            .with_context(|| "Failed to parse Open-Meteo forecast response")
            .map_err(|e| MeteoError::forecast(format!("{e:#}")))?;

        let forecast = decode(raw).map_err(|e| MeteoError::forecast(format!("{e:#}")))?;

        let total_duration = start_time.elapsed();
        info!(
            "Retrieved {} hourly points for {} in {:.3}s",
            forecast.hourly.len,
            forecast.timezone,
            total_duration.as_secs_f64()
        );
        if total_duration.as_secs() > 5 {
            warn!(
                "Slow API response detected: {:.3}s",
                total_duration.as_secs_f64()
            );
        }

        Ok(forecast)
    }
}

fn decode(raw: RawForecast) -> anyhow::Result<ForecastResponse> {
    let current = CurrentBundle {
        values: CURRENT_VARIABLES
            .iter()
            .map(|name| {
                raw.current
                    .get(*name)
                    .cloned()
                    .ok_or_else(|| anyhow!("current block is missing '{name}'"))
            })
            .collect::<anyhow::Result<_>>()?,
    };

    let times: Vec<i64> = raw
        .hourly
        .get("time")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("hourly block is missing 'time'"))?
        .iter()
        .map(|t| t.as_i64().ok_or_else(|| anyhow!("hourly time is not a unix timestamp")))
        .collect::<anyhow::Result<_>>()?;

    let start = *times.first().ok_or_else(|| anyhow!("hourly block is empty"))?;
    let interval = times
        .get(1)
        .and_then(|next| next.checked_sub(start))
        .filter(|step| *step > 0)
        .unwrap_or(DEFAULT_INTERVAL_SECONDS);

    let variables = HOURLY_VARIABLES
        .iter()
        .map(|name| {
            raw.hourly
                .get(*name)
                .and_then(Value::as_array)
                .cloned()
                .ok_or_else(|| anyhow!("hourly block is missing '{name}'"))
        })
        .collect::<anyhow::Result<_>>()?;

    Ok(ForecastResponse {
        timezone: raw.timezone,
        current,
        hourly: HourlyBundle {
            start,
            interval,
            len: times.len(),
            variables,
        },
    })
}
