//! Route types
//!
//! A route is one scheduled entry (to-school) or exit (from-school) trip
//! with a fixed start/end time. Times are same-day; overnight wraparound is
//! not modeled.

use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

/// Geographic coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl From<[f64; 2]> for Coordinates {
    /// Locations on the wire are `[lat, lon]` pairs.
    fn from(pair: [f64; 2]) -> Self {
        Self { lat: pair[0], lng: pair[1] }
    }
}

/// Direction of a trip relative to the school
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteType {
    Entry,
    Exit,
}

impl RouteType {
    pub const fn as_str(self) -> &'static str {
        match self {
            RouteType::Entry => "entry",
            RouteType::Exit => "exit",
        }
    }
}

/// A stop along a route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RouteStop {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    /// Minutes from route start to this stop
    #[serde(default)]
    pub time_from_start: i32,
    #[serde(default)]
    pub passengers: u32,
    #[serde(default)]
    pub is_school: bool,
    #[serde(default)]
    pub order: i32,
}

/// Canonical route record
///
/// `positioning_minutes` is derived state: the drive time required from the
/// end of the previous route on the same bus. It is recomputed by the
/// positioning refresh whenever the bus's route order or a neighboring
/// route's timing changes; 0 means first on bus or unknown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub id: String,
    /// Display label; defaults to the id.
    pub code: String,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    #[serde(default)]
    pub origin: String,
    #[serde(default)]
    pub destination: String,
    #[serde(rename = "type")]
    pub route_type: RouteType,
    #[serde(default)]
    pub stops: Vec<RouteStop>,
    #[serde(default)]
    pub school: String,
    #[serde(default)]
    pub positioning_minutes: u32,
    #[serde(default)]
    pub capacity_needed: u32,
    #[serde(default)]
    pub vehicle_capacity_min: Option<u32>,
    #[serde(default)]
    pub vehicle_capacity_max: Option<u32>,
    #[serde(default)]
    pub vehicle_capacity_range: Option<String>,
    /// `[lat, lon]` of the first stop, if known.
    #[serde(default)]
    pub start_location: Option<[f64; 2]>,
    /// `[lat, lon]` of the last stop, if known.
    #[serde(default)]
    pub end_location: Option<[f64; 2]>,
    #[serde(default)]
    pub contract_id: Option<String>,
}

impl Route {
    /// Start time as minutes since midnight.
    pub fn start_minutes(&self) -> i32 {
        (self.start_time.num_seconds_from_midnight() / 60) as i32
    }

    /// End time as minutes since midnight.
    pub fn end_minutes(&self) -> i32 {
        (self.end_time.num_seconds_from_midnight() / 60) as i32
    }

    pub fn duration_minutes(&self) -> i32 {
        self.end_minutes() - self.start_minutes()
    }

    /// Half-open `[start, end)` interval in minutes since midnight.
    pub fn interval(&self) -> (i32, i32) {
        (self.start_minutes(), self.end_minutes())
    }
}

/// Serde adapter for "HH:MM" time-of-day strings ("HH:MM:SS" accepted on input).
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&raw, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(&raw, "%H:%M:%S"))
            .map_err(serde::de::Error::custom)
    }
}
