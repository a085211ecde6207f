use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// metric name the api uses for temperature readings (celsius)
pub const TEMPERATURE: &str = "temperature";

/// date format used by the tag api, e.g. "1/2/2006"
pub const API_DATE_FORMAT: &str = "%-m/%-d/%Y";

/// a physical sensor tag
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// stable identifier used for storage and watermarks
    #[serde(alias = "UUID")]
    pub uuid: String,

    /// numeric id assigned by the api; only valid for one directory fetch
    #[serde(rename = "slaveId", alias = "SlaveId")]
    pub slave_id: i64,

    /// display name
    #[serde(alias = "Name", default)]
    pub name: String,
}

/// the tags attached to one tag manager
#[derive(Clone, Debug, Deserialize)]
pub struct TagGroup {
    #[serde(alias = "Mac")]
    pub mac: String,
    #[serde(alias = "Tags", default)]
    pub tags: Vec<Device>,
}

/// one calendar day of columnar samples for a batch of tags and one metric
///
/// `values[i]` and `time_of_day_seconds[i]` belong to `slave_ids[i]`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RawDayBlock {
    #[serde(alias = "Date")]
    pub date: String,

    #[serde(rename = "ids", alias = "Ids", default)]
    pub slave_ids: Vec<i64>,

    #[serde(alias = "Values", default)]
    pub values: Vec<Vec<f64>>,

    #[serde(rename = "tods", alias = "Tods", default)]
    pub time_of_day_seconds: Vec<Vec<i64>>,
}

/// a single timestamped sample
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// normalized readings for one tag and one metric
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceReadingBatch {
    pub slave_id: i64,
    pub readings: Vec<Reading>,
}

/// inclusive range of calendar days to fetch
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FetchWindow {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl FetchWindow {
    pub fn single_day(date: NaiveDate) -> Self {
        Self { from: date, to: date }
    }
}

/// celsius to fahrenheit
pub fn c_to_f(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}

/// fahrenheit to celsius
pub fn f_to_c(fahrenheit: f64) -> f64 {
    (fahrenheit - 32.0) * 5.0 / 9.0
}
