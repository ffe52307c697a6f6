use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDateTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::IngestError;
use crate::parse::ParsedRow;

pub const SOURCE_ATTRIBUTE: &str = "source";
pub const SOURCE_NAME: &str = "euc_logs";
pub const UNIT_ATTRIBUTE: &str = "unit_of_measurement";

pub const DEFAULT_DEBOUNCE_SECONDS: i64 = 300;

// Columns EUC World writes that we don't forward: gps_alt, gps_heading, gps_distance,
// distance, tilt, roll and the wh/ah energy counters.
const SELECTED_METRICS: &[&str] = &[
    "latitude",
    "longitude",
    "gps_speed",
    "speed",
    "voltage",
    "current",
    "power",
    "battery_level",
    "total_distance",
    "cpu_temp",
    "system_temp",
    "mode",
    "alert",
];

// `%#z` takes `Z`, `+02`, `+0200` and `+02:00`, with or without a space before it
const OFFSET_TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%#z",
    "%Y-%m-%d %H:%M:%S%.f%#z",
    "%Y-%m-%dT%H:%M%#z",
    "%Y-%m-%d %H:%M%#z",
];

const NAIVE_TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

pub fn is_selected(metric: &str) -> bool {
    SELECTED_METRICS.contains(&metric)
}

pub fn unit_for(metric: &str) -> Option<&'static str> {
    match metric {
        "distance" | "total_distance" => Some("m"),
        "gps_speed" | "speed" => Some("km/h"),
        "voltage" => Some("V"),
        "current" => Some("A"),
        "power" => Some("W"),
        "battery_level" => Some("%"),
        "system_temp" | "cpu_temp" => Some("\u{b0}C"),
        _ => None,
    }
}

/// One metric's new observed value, ready to hand to an `EventSink`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub entity_key: String,
    pub value: String,
    pub attributes: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

pub fn entity_key(device_name: &str, metric: &str) -> String {
    format!("sensor.{device_name}_{metric}")
}

/// Last emitted `(value, timestamp)` per metric. Scoped to a single file: a fresh
/// state is created for every file, so the first row of each file always emits.
#[derive(Debug, Default)]
pub struct MetricState {
    last_emitted: HashMap<String, (String, DateTime<Utc>)>,
}

impl MetricState {
    pub fn last(&self, metric: &str) -> Option<(&str, DateTime<Utc>)> {
        self.last_emitted
            .get(metric)
            .map(|(value, ts)| (value.as_str(), *ts))
    }

    pub fn len(&self) -> usize {
        self.last_emitted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_emitted.is_empty()
    }

    /// Record a reading, returning whether it should be emitted. A repeat of the last
    /// emitted value inside the debounce window is noise: nothing is emitted and the
    /// state keeps the older timestamp, so a static reading still heartbeats once per
    /// window.
    fn observe(
        &mut self,
        metric: &str,
        value: &str,
        timestamp: DateTime<Utc>,
        debounce: TimeDelta,
    ) -> bool {
        if let Some((last_value, last_ts)) = self.last_emitted.get(metric) {
            if last_value == value && timestamp - *last_ts < debounce {
                return false;
            }
        }

        self.last_emitted
            .insert(metric.to_owned(), (value.to_owned(), timestamp));
        true
    }
}

/// Turns CSV rows into change events, dropping unchanged readings that arrive inside
/// the debounce window.
#[derive(Debug, Clone)]
pub struct MetricEventBuilder {
    device_name: String,
    timezone: Tz,
    debounce: TimeDelta,
}

impl MetricEventBuilder {
    pub fn new(device_name: &str) -> Self {
        Self {
            device_name: device_name.to_owned(),
            timezone: chrono_tz::UTC,
            debounce: TimeDelta::seconds(DEFAULT_DEBOUNCE_SECONDS),
        }
    }

    /// Zone used for timestamps written without an offset.
    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn with_debounce(mut self, debounce: TimeDelta) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn parse_timestamp(&self, raw: &str) -> Option<DateTime<Utc>> {
        let raw = raw.trim();

        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Utc));
        }
        if let Some(ts) = OFFSET_TIMESTAMP_FORMATS
            .iter()
            .find_map(|format| DateTime::parse_from_str(raw, format).ok())
        {
            return Some(ts.with_timezone(&Utc));
        }

        NAIVE_TIMESTAMP_FORMATS
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
            // earliest() picks the first occurrence of a repeated hour at a DST fall-back,
            // wall clock times skipped by a spring-forward don't exist and are rejected
            .and_then(|naive| self.timezone.from_local_datetime(&naive).earliest())
            .map(|ts| ts.with_timezone(&Utc))
    }

    /// Build the change events for one row.
    ///
    /// The first field must be the row's timestamp. Remaining fields are paired with
    /// `header` by position; fields without a header (or header names without a field)
    /// are ignored, as are metrics outside the selected set. The returned iterator is
    /// lazy and updates `state` as it is consumed.
    pub fn build<'a>(
        &'a self,
        state: &'a mut MetricState,
        header: &'a [String],
        row: &'a [String],
    ) -> Result<impl Iterator<Item = ChangeEvent> + 'a, IngestError> {
        let raw = row.first().map(String::as_str).unwrap_or_default();
        let timestamp = self
            .parse_timestamp(raw)
            .ok_or_else(|| IngestError::InvalidTimestamp(raw.to_owned()))?;

        Ok(header
            .iter()
            .zip(row.iter())
            .skip(1)
            .filter(|(name, _)| is_selected(name))
            .filter_map(move |(name, value)| {
                state
                    .observe(name, value, timestamp, self.debounce)
                    .then(|| self.event(name, value, timestamp))
            }))
    }

    /// `build` over a parsed row and the header of its file.
    pub fn build_row<'a>(
        &'a self,
        state: &'a mut MetricState,
        row: &'a ParsedRow,
    ) -> Result<impl Iterator<Item = ChangeEvent> + 'a, IngestError> {
        self.build(state, &row.header, &row.fields)
    }

    fn event(&self, metric: &str, value: &str, timestamp: DateTime<Utc>) -> ChangeEvent {
        let mut attributes = BTreeMap::new();
        attributes.insert(SOURCE_ATTRIBUTE.to_owned(), SOURCE_NAME.to_owned());
        if let Some(unit) = unit_for(metric) {
            attributes.insert(UNIT_ATTRIBUTE.to_owned(), unit.to_owned());
        }

        ChangeEvent {
            entity_key: entity_key(&self.device_name, metric),
            value: value.to_owned(),
            attributes,
            timestamp,
        }
    }
}
