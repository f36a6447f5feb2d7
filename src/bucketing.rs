//! Groups an hourly forecast series into local calendar days.

use chrono::{DateTime, TimeDelta, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

use crate::models::{DayBucket, ForecastSeries, HourlyRecord};

/// Label format of an hourly record
pub const TIME_LABEL_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Start of the local hour containing `time`
fn truncate_to_hour(time: DateTime<Tz>) -> DateTime<Tz> {
    let into_hour = TimeDelta::minutes(i64::from(time.minute()))
        + TimeDelta::seconds(i64::from(time.second()))
        + TimeDelta::nanoseconds(i64::from(time.nanosecond()));
    time - into_hour
}

/// Splits `series` into per-day tables, skipping hours that already passed
/// for a viewer at `viewer_time`.
#[must_use]
pub fn bucket(series: &ForecastSeries, viewer_time: DateTime<Utc>) -> Vec<DayBucket> {
    let tz = series.timezone;
    let cutoff = truncate_to_hour(viewer_time.with_timezone(&tz));

    let mut days: Vec<DayBucket> = Vec::new();
    for i in 0..series.len {
        let Some(offset) = i64::try_from(i)
            .ok()
            .and_then(|i| i.checked_mul(series.interval))
        else {
            break;
        };
        let Some(timestamp) = series.start.checked_add(offset) else {
            break;
        };
        let Some(hour) = tz.timestamp_opt(timestamp, 0).single() else {
            continue;
        };
        if hour < cutoff {
            continue;
        }

        let values: BTreeMap<&'static str, Value> = series
            .channels
            .iter()
            .map(|channel| {
                let raw = channel.values.get(i).cloned().unwrap_or(Value::Null);
                (channel.spec.name, channel.spec.apply(raw))
            })
            .collect();
        let record = HourlyRecord {
            time: hour.format(TIME_LABEL_FORMAT).to_string(),
            values,
        };

        let date = hour.date_naive();
        match days.last_mut() {
            Some(day) if day.date == date => day.hours.push(record),
            _ => days.push(DayBucket {
                date,
                hours: vec![record],
            }),
        }
    }

    debug!(
        "Bucketed {} hourly points into {} days (cutoff {})",
        series.len,
        days.len(),
        cutoff
    );
    days
}
