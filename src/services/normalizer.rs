//! Schedule normalizer
//!
//! Converts the heterogeneous route/bus shapes produced by the optimizer
//! backend, saved drafts and file imports into the canonical internal
//! records. Buses sharing a normalized id are merged, their route lists
//! deduplicated, and ids kept collision-free.

use std::collections::HashMap;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;

use crate::services::timeutil::{
    next_bus_id, normalize_bus_id, parse_hhmm, sort_and_dedupe_routes,
};
use crate::types::{Bus, Route, RouteStop, RouteType, ScheduleData};

/// Route shape as found in the wild: optimizer output uses camelCase,
/// snapshots and imports use snake_case with `route_id`/`deadhead_minutes`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawRoute {
    #[serde(alias = "route_id", alias = "routeId")]
    pub id: String,
    #[serde(default, alias = "route_code", alias = "routeCode")]
    pub code: Option<String>,
    #[serde(alias = "startTime")]
    pub start_time: String,
    #[serde(alias = "endTime")]
    pub end_time: String,
    #[serde(default)]
    pub origin: String,
    #[serde(default)]
    pub destination: String,
    #[serde(rename = "type", alias = "route_type")]
    pub route_type: String,
    #[serde(default)]
    pub stops: Vec<RouteStop>,
    #[serde(default, alias = "school_name", alias = "schoolName")]
    pub school: String,
    #[serde(
        default,
        alias = "positioningMinutes",
        alias = "deadhead_minutes",
        alias = "deadheadMinutes"
    )]
    pub positioning_minutes: u32,
    #[serde(default, alias = "capacityNeeded")]
    pub capacity_needed: u32,
    #[serde(default, alias = "vehicleCapacityMin")]
    pub vehicle_capacity_min: Option<u32>,
    #[serde(default, alias = "vehicleCapacityMax")]
    pub vehicle_capacity_max: Option<u32>,
    #[serde(default, alias = "vehicleCapacityRange")]
    pub vehicle_capacity_range: Option<String>,
    #[serde(default, alias = "startLocation")]
    pub start_location: Option<[f64; 2]>,
    #[serde(default, alias = "endLocation")]
    pub end_location: Option<[f64; 2]>,
    #[serde(default, alias = "contractId")]
    pub contract_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawBus {
    #[serde(alias = "bus_id", alias = "busId")]
    pub id: String,
    #[serde(default, alias = "items")]
    pub routes: Vec<RawRoute>,
}

/// Top-level schedule document: either a bare bus array or a wrapper with
/// optional unassigned routes.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RawScheduleDoc {
    Wrapped {
        buses: Vec<RawBus>,
        #[serde(default, alias = "availableRoutes")]
        available_routes: Vec<RawRoute>,
    },
    Bare(Vec<RawBus>),
}

#[derive(Debug, Default)]
pub struct NormalizedSchedule {
    pub buses: Vec<Bus>,
    pub available_routes: Vec<Route>,
    /// Routes dropped because they could not be normalized.
    pub skipped: usize,
}

fn parse_route_type(raw: &str) -> Result<RouteType> {
    match raw.trim().to_lowercase().as_str() {
        "entry" | "entrada" => Ok(RouteType::Entry),
        "exit" | "salida" => Ok(RouteType::Exit),
        other => anyhow::bail!("Unknown route type: '{other}'"),
    }
}

/// Convert one raw route into the canonical record.
///
/// Rejects routes whose end does not come strictly after their start —
/// overnight trips are not modeled.
pub fn normalize_route(raw: RawRoute) -> Result<Route> {
    let start_time = parse_hhmm(&raw.start_time)
        .with_context(|| format!("Route '{}': bad start time", raw.id))?;
    let end_time = parse_hhmm(&raw.end_time)
        .with_context(|| format!("Route '{}': bad end time", raw.id))?;
    if end_time <= start_time {
        anyhow::bail!(
            "Route '{}': end time {} is not after start time {}",
            raw.id,
            raw.end_time,
            raw.start_time
        );
    }

    Ok(Route {
        code: raw.code.filter(|c| !c.is_empty()).unwrap_or_else(|| raw.id.clone()),
        id: raw.id,
        start_time,
        end_time,
        origin: raw.origin,
        destination: raw.destination,
        route_type: parse_route_type(&raw.route_type)?,
        stops: raw.stops,
        school: raw.school,
        positioning_minutes: raw.positioning_minutes,
        capacity_needed: raw.capacity_needed,
        vehicle_capacity_min: raw.vehicle_capacity_min,
        vehicle_capacity_max: raw.vehicle_capacity_max,
        vehicle_capacity_range: raw.vehicle_capacity_range,
        start_location: raw.start_location,
        end_location: raw.end_location,
        contract_id: raw.contract_id,
    })
}

/// Renumber buses whose id collides with an earlier bus in the list.
/// Replacement ids continue from the highest numeric suffix present.
pub fn ensure_unique_bus_ids(buses: &mut Vec<Bus>) {
    let mut seen: Vec<String> = Vec::with_capacity(buses.len());
    for bus in buses.iter_mut() {
        if seen.iter().any(|id| *id == bus.id) {
            let replacement = next_bus_id(seen.iter().map(String::as_str));
            warn!("Duplicate bus id '{}' renumbered to '{}'", bus.id, replacement);
            bus.id = replacement;
        }
        seen.push(bus.id.clone());
    }
}

/// Normalize a full schedule document: canonicalize every route, merge
/// buses sharing a normalized id, dedupe and sort route lists, and order
/// buses by id.
pub fn normalize_schedule(doc: RawScheduleDoc) -> NormalizedSchedule {
    let (raw_buses, raw_available) = match doc {
        RawScheduleDoc::Wrapped { buses, available_routes } => (buses, available_routes),
        RawScheduleDoc::Bare(buses) => (buses, Vec::new()),
    };

    let mut skipped = 0usize;
    let mut merged: HashMap<String, Vec<Route>> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for raw_bus in raw_buses {
        let bus_id = normalize_bus_id(&raw_bus.id);
        if !merged.contains_key(&bus_id) {
            order.push(bus_id.clone());
        }
        let routes = merged.entry(bus_id).or_default();
        for raw_route in raw_bus.routes {
            match normalize_route(raw_route) {
                Ok(route) => routes.push(route),
                Err(e) => {
                    warn!("Skipping route during normalization: {e:#}");
                    skipped += 1;
                }
            }
        }
    }

    let mut buses: Vec<Bus> = order
        .into_iter()
        .map(|id| {
            let routes = merged.remove(&id).unwrap_or_default();
            Bus::with_routes(id, sort_and_dedupe_routes(routes))
        })
        .collect();
    ensure_unique_bus_ids(&mut buses);
    buses.sort_by(|a, b| a.id.cmp(&b.id));

    let mut available_routes = Vec::new();
    for raw in raw_available {
        match normalize_route(raw) {
            Ok(route) => available_routes.push(route),
            Err(e) => {
                warn!("Skipping unassigned route during normalization: {e:#}");
                skipped += 1;
            }
        }
    }
    available_routes = sort_and_dedupe_routes(available_routes);

    NormalizedSchedule { buses, available_routes, skipped }
}

/// Rebuild live buses from a persisted snapshot.
pub fn from_schedule_data(data: &ScheduleData) -> Result<Vec<Bus>> {
    let mut buses = Vec::with_capacity(data.buses.len());
    for bus_data in &data.buses {
        let mut routes = Vec::with_capacity(bus_data.items.len());
        for item in &bus_data.items {
            routes.push(Route {
                id: item.route_id.clone(),
                code: item.route_code.clone(),
                start_time: parse_hhmm(&item.start_time)
                    .with_context(|| format!("Snapshot route '{}'", item.route_id))?,
                end_time: parse_hhmm(&item.end_time)
                    .with_context(|| format!("Snapshot route '{}'", item.route_id))?,
                origin: item.origin.clone(),
                destination: item.destination.clone(),
                route_type: item.route_type,
                stops: item.stops.clone(),
                school: item.school_name.clone(),
                positioning_minutes: item.deadhead_minutes,
                capacity_needed: item.capacity_needed,
                vehicle_capacity_min: item.vehicle_capacity_min,
                vehicle_capacity_max: item.vehicle_capacity_max,
                vehicle_capacity_range: item.vehicle_capacity_range.clone(),
                start_location: item.start_location,
                end_location: item.end_location,
                contract_id: item.contract_id.clone(),
            });
        }
        buses.push(Bus::with_routes(
            normalize_bus_id(&bus_data.bus_id),
            sort_and_dedupe_routes(routes),
        ));
    }
    ensure_unique_bus_ids(&mut buses);
    buses.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(buses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw_route(id: &str, start: &str, end: &str) -> serde_json::Value {
        json!({
            "id": id,
            "startTime": start,
            "endTime": end,
            "type": "entry",
        })
    }

    #[test]
    fn test_normalize_route_camel_case_shape() {
        let raw: RawRoute = serde_json::from_value(json!({
            "id": "R1",
            "startTime": "07:30",
            "endTime": "08:15",
            "type": "entry",
            "positioningMinutes": 12,
            "capacityNeeded": 40,
            "school": "CEIP Goya",
        }))
        .unwrap();
        let route = normalize_route(raw).unwrap();
        assert_eq!(route.code, "R1");
        assert_eq!(route.positioning_minutes, 12);
        assert_eq!(route.school, "CEIP Goya");
        assert_eq!(route.start_minutes(), 450);
    }

    #[test]
    fn test_normalize_route_snapshot_shape() {
        let raw: RawRoute = serde_json::from_value(json!({
            "route_id": "R2",
            "route_code": "R2-bis",
            "start_time": "14:00:00",
            "end_time": "14:45:00",
            "type": "salida",
            "school_name": "IES Lorca",
            "deadhead_minutes": 8,
        }))
        .unwrap();
        let route = normalize_route(raw).unwrap();
        assert_eq!(route.id, "R2");
        assert_eq!(route.code, "R2-bis");
        assert_eq!(route.route_type, RouteType::Exit);
        assert_eq!(route.positioning_minutes, 8);
    }

    #[test]
    fn test_normalize_route_rejects_inverted_times() {
        let raw: RawRoute =
            serde_json::from_value(raw_route("R3", "10:00", "09:00")).unwrap();
        assert!(normalize_route(raw).is_err());
    }

    #[test]
    fn test_normalize_route_rejects_unknown_type() {
        let raw: RawRoute = serde_json::from_value(json!({
            "id": "R4",
            "startTime": "07:00",
            "endTime": "08:00",
            "type": "circular",
        }))
        .unwrap();
        assert!(normalize_route(raw).is_err());
    }

    #[test]
    fn test_merge_buses_with_same_normalized_id() {
        let doc: RawScheduleDoc = serde_json::from_value(json!([
            { "id": "b1", "routes": [raw_route("R1", "08:00", "08:30")] },
            { "id": "B001", "routes": [raw_route("R2", "07:00", "07:30"), raw_route("R1", "08:00", "08:30")] },
        ]))
        .unwrap();
        let normalized = normalize_schedule(doc);

        assert_eq!(normalized.buses.len(), 1);
        assert_eq!(normalized.buses[0].id, "B001");
        let ids: Vec<&str> = normalized.buses[0].routes.iter().map(|r| r.id.as_str()).collect();
        // Merged, deduped, chronological.
        assert_eq!(ids, vec!["R2", "R1"]);
    }

    #[test]
    fn test_bad_routes_are_skipped_not_fatal() {
        let doc: RawScheduleDoc = serde_json::from_value(json!([
            { "id": "B001", "routes": [
                raw_route("R1", "08:00", "08:30"),
                raw_route("R2", "nope", "08:30"),
            ]},
        ]))
        .unwrap();
        let normalized = normalize_schedule(doc);
        assert_eq!(normalized.skipped, 1);
        assert_eq!(normalized.buses[0].routes.len(), 1);
    }

    #[test]
    fn test_wrapped_doc_with_available_routes() {
        let doc: RawScheduleDoc = serde_json::from_value(json!({
            "buses": [{ "bus_id": "B002", "items": [] }],
            "available_routes": [raw_route("R9", "12:00", "12:40")],
        }))
        .unwrap();
        let normalized = normalize_schedule(doc);
        assert_eq!(normalized.buses.len(), 1);
        assert_eq!(normalized.available_routes.len(), 1);
        assert_eq!(normalized.available_routes[0].id, "R9");
    }

    #[test]
    fn test_ensure_unique_bus_ids_renumbers_from_max() {
        let mut buses = vec![
            Bus::new("B001"),
            Bus::new("B005"),
            Bus::new("B001"),
            Bus::new("B001"),
        ];
        ensure_unique_bus_ids(&mut buses);
        let ids: Vec<&str> = buses.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["B001", "B005", "B006", "B007"]);
    }

    #[test]
    fn test_snapshot_roundtrip() {
        use crate::types::ScheduleData;
        use chrono::NaiveTime;

        let route = Route {
            id: "R1".into(),
            code: "R1".into(),
            start_time: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(8, 40, 0).unwrap(),
            origin: "Norte".into(),
            destination: "CEIP Goya".into(),
            route_type: RouteType::Entry,
            stops: vec![],
            school: "CEIP Goya".into(),
            positioning_minutes: 7,
            capacity_needed: 25,
            vehicle_capacity_min: Some(20),
            vehicle_capacity_max: Some(55),
            vehicle_capacity_range: Some("20-55".into()),
            start_location: Some([40.1, -3.2]),
            end_location: Some([40.2, -3.3]),
            contract_id: Some("C-7".into()),
        };
        let buses = vec![Bus::with_routes("B001", vec![route.clone()])];
        let data = ScheduleData::from_buses("monday", "draft", &buses);
        let rebuilt = from_schedule_data(&data).unwrap();

        assert_eq!(rebuilt, buses);
    }
}
