//! Forecast channel tables, hourly series and day buckets

use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::Serialize;
use serde_json::{Number, Value};
use std::collections::BTreeMap;

/// Post-processing applied to a raw channel value
pub type Transform = fn(Value) -> Value;

/// One row of a channel extraction table
#[derive(Debug, Clone, Copy)]
pub struct ChannelSpec {
    /// Name exposed in the search context
    pub name: &'static str,
    /// Position of the variable in the request's variable list
    pub source_index: usize,
    pub transform: Option<Transform>,
}

impl ChannelSpec {
    /// Channel passed through untouched
    #[must_use]
    pub const fn raw(name: &'static str, source_index: usize) -> Self {
        Self {
            name,
            source_index,
            transform: None,
        }
    }

    /// Channel rounded to two decimals
    #[must_use]
    pub const fn rounded(name: &'static str, source_index: usize) -> Self {
        Self {
            name,
            source_index,
            transform: Some(safe_round),
        }
    }

    #[must_use]
    pub fn apply(&self, value: Value) -> Value {
        match self.transform {
            Some(transform) => transform(value),
            None => value,
        }
    }
}

/// Round floats to two decimals, leaving anything else unchanged
#[must_use]
pub fn safe_round(value: Value) -> Value {
    let Value::Number(number) = &value else {
        return value;
    };
    if number.is_i64() || number.is_u64() {
        return value;
    }
    number
        .as_f64()
        .map(|x| (x * 100.0).round() / 100.0)
        .and_then(Number::from_f64)
        .map_or(value, Value::Number)
}

/// Values of one channel aligned by hour index
#[derive(Debug, Clone)]
pub struct SeriesChannel {
    pub spec: ChannelSpec,
    pub values: Vec<Value>,
}

/// Hourly series as delivered by the forecast source
#[derive(Debug, Clone)]
pub struct ForecastSeries {
    /// Unix timestamp of hour 0
    pub start: i64,
    /// Seconds between two points
    pub interval: i64,
    pub len: usize,
    pub timezone: Tz,
    pub channels: Vec<SeriesChannel>,
}

/// One hour row of a day table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourlyRecord {
    /// `YYYY-MM-DD HH:MM` in the city's local time
    pub time: String,
    #[serde(flatten)]
    pub values: BTreeMap<&'static str, Value>,
}

/// Hours of one local calendar date
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayBucket {
    pub date: NaiveDate,
    pub hours: Vec<HourlyRecord>,
}
