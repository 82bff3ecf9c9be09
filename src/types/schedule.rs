//! Bus and schedule types
//!
//! `Bus` is the in-memory aggregate the assignment engine mutates.
//! `ScheduleData` is the persistence/export shape, and `DayPayload` the
//! request shape for whole-schedule validation.

use serde::{Deserialize, Serialize};

use super::route::{Route, RouteStop, RouteType};

fn default_bus_type() -> String {
    "standard".to_string()
}

/// An ordered sequence of non-overlapping routes assigned to one vehicle
/// for one day. Route order is always chronological by start time, ties
/// broken by end time then by code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bus {
    pub id: String,
    #[serde(default)]
    pub routes: Vec<Route>,
    #[serde(rename = "type", default = "default_bus_type")]
    pub bus_type: String,
}

impl Bus {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            routes: Vec::new(),
            bus_type: default_bus_type(),
        }
    }

    pub fn with_routes(id: impl Into<String>, routes: Vec<Route>) -> Self {
        Self {
            id: id.into(),
            routes,
            bus_type: default_bus_type(),
        }
    }

    pub fn has_route(&self, route_id: &str) -> bool {
        self.routes.iter().any(|r| r.id == route_id)
    }

    pub fn find_route(&self, route_id: &str) -> Option<&Route> {
        self.routes.iter().find(|r| r.id == route_id)
    }
}

// ---------------------------------------------------------------------------
// Persistence shape
// ---------------------------------------------------------------------------

/// One route as stored in a schedule snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleItem {
    pub route_id: String,
    pub route_code: String,
    pub start_time: String,
    pub end_time: String,
    #[serde(default)]
    pub origin: String,
    #[serde(default)]
    pub destination: String,
    #[serde(rename = "type")]
    pub route_type: RouteType,
    pub order: i32,
    #[serde(default)]
    pub school_name: String,
    #[serde(default)]
    pub stops: Vec<RouteStop>,
    #[serde(default)]
    pub start_location: Option<[f64; 2]>,
    #[serde(default)]
    pub end_location: Option<[f64; 2]>,
    #[serde(default)]
    pub deadhead_minutes: u32,
    #[serde(default)]
    pub capacity_needed: u32,
    #[serde(default)]
    pub vehicle_capacity_min: Option<u32>,
    #[serde(default)]
    pub vehicle_capacity_max: Option<u32>,
    #[serde(default)]
    pub vehicle_capacity_range: Option<String>,
    #[serde(default)]
    pub contract_id: Option<String>,
    #[serde(default)]
    pub is_locked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleBusData {
    pub bus_id: String,
    pub items: Vec<ScheduleItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleStats {
    pub total_buses: usize,
    pub total_routes: usize,
}

/// Serialized schedule snapshot, keyed by day and mode in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleData {
    pub day: String,
    pub mode: String,
    pub buses: Vec<ScheduleBusData>,
    pub stats: ScheduleStats,
}

impl ScheduleData {
    /// Build a snapshot from live buses.
    pub fn from_buses(day: impl Into<String>, mode: impl Into<String>, buses: &[Bus]) -> Self {
        let bus_data: Vec<ScheduleBusData> = buses
            .iter()
            .map(|bus| ScheduleBusData {
                bus_id: bus.id.clone(),
                items: bus
                    .routes
                    .iter()
                    .enumerate()
                    .map(|(order, r)| ScheduleItem {
                        route_id: r.id.clone(),
                        route_code: r.code.clone(),
                        start_time: r.start_time.format("%H:%M").to_string(),
                        end_time: r.end_time.format("%H:%M").to_string(),
                        origin: r.origin.clone(),
                        destination: r.destination.clone(),
                        route_type: r.route_type,
                        order: order as i32,
                        school_name: r.school.clone(),
                        stops: r.stops.clone(),
                        start_location: r.start_location,
                        end_location: r.end_location,
                        deadhead_minutes: r.positioning_minutes,
                        capacity_needed: r.capacity_needed,
                        vehicle_capacity_min: r.vehicle_capacity_min,
                        vehicle_capacity_max: r.vehicle_capacity_max,
                        vehicle_capacity_range: r.vehicle_capacity_range.clone(),
                        contract_id: r.contract_id.clone(),
                        is_locked: false,
                    })
                    .collect(),
            })
            .collect();

        let total_routes = bus_data.iter().map(|b| b.items.len()).sum();
        Self {
            day: day.into(),
            mode: mode.into(),
            stats: ScheduleStats {
                total_buses: bus_data.len(),
                total_routes,
            },
            buses: bus_data,
        }
    }
}

// ---------------------------------------------------------------------------
// Whole-schedule validation request shape
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayPayloadRoute {
    pub id: String,
    pub route_id: String,
    pub start_time: String,
    pub end_time: String,
    #[serde(rename = "type")]
    pub route_type: RouteType,
    #[serde(default)]
    pub school_name: String,
    #[serde(default)]
    pub start_location: Option<[f64; 2]>,
    #[serde(default)]
    pub end_location: Option<[f64; 2]>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayPayloadBus {
    pub bus_id: String,
    pub routes: Vec<DayPayloadRoute>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayPayload {
    pub day: String,
    pub buses: Vec<DayPayloadBus>,
}

impl DayPayload {
    pub fn from_buses(day: impl Into<String>, buses: &[Bus]) -> Self {
        Self {
            day: day.into(),
            buses: buses
                .iter()
                .map(|bus| DayPayloadBus {
                    bus_id: bus.id.clone(),
                    routes: bus
                        .routes
                        .iter()
                        .map(|r| DayPayloadRoute {
                            id: r.id.clone(),
                            route_id: r.id.clone(),
                            start_time: r.start_time.format("%H:%M").to_string(),
                            end_time: r.end_time.format("%H:%M").to_string(),
                            route_type: r.route_type,
                            school_name: r.school.clone(),
                            start_location: r.start_location,
                            end_location: r.end_location,
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}
