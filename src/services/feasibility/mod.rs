//! Feasibility service boundary
//!
//! Async boundary to the external validation service: single-assignment
//! feasibility checks, single-bus and whole-schedule validation, and
//! point-to-point travel-time lookup. Uses OSRM in production, mock
//! estimates for tests and offline use.

mod osrm;

pub use osrm::{OsrmClient, OsrmConfig};

use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::defaults::FALLBACK_POSITIONING_MINUTES;
use crate::services::geo;
use crate::services::timeutil::{intervals_overlap, parse_hhmm, time_to_minutes};
use crate::types::{
    Bus, Coordinates, DayPayload, GlobalValidationReport, Incident, IncidentSeverity,
    IncidentType, Route,
};

/// Connection state of the validation channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connected,
    Connecting,
    Reconnecting,
    Disconnected,
}

impl ConnectionState {
    pub const fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Connected => "connected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Disconnected => "disconnected",
        }
    }
}

/// Answer to "can this route be added to this bus?"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeasibilityCheck {
    pub feasible: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

impl FeasibilityCheck {
    pub fn ok() -> Self {
        Self { feasible: true, reason: None }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self { feasible: false, reason: Some(reason.into()) }
    }
}

/// Single-bus validation result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusFeasibility {
    pub feasible: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub issues: Vec<Incident>,
    pub issues_count: usize,
}

/// Travel-time estimate between two routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionEstimate {
    /// Drive time in minutes from the end of the first route to the start
    /// of the second.
    pub travel_time: u32,
}

/// External validation service boundary.
#[async_trait]
pub trait FeasibilityService: Send + Sync {
    /// Check whether `route` can join a bus already running `existing`.
    async fn can_assign_route(&self, route: &Route, existing: &[Route]) -> Result<FeasibilityCheck>;

    /// Validate one bus's route sequence.
    async fn validate_bus(&self, bus: &Bus) -> Result<BusFeasibility>;

    /// Validate the whole schedule (all days, all buses).
    async fn validate_all_buses(
        &self,
        days: &[DayPayload],
        persist: bool,
    ) -> Result<GlobalValidationReport>;

    /// Travel time from the end of `from` to the start of `to`.
    async fn validate_connection(&self, from: &Route, to: &Route) -> Result<ConnectionEstimate>;

    /// Current state of the validation channel.
    fn connection_state(&self) -> ConnectionState;

    /// Service name for logging.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Mock service
// ---------------------------------------------------------------------------

/// Mock feasibility service for tests and offline runs.
/// Travel times come from Haversine distance × road coefficient at an
/// average speed; pairs without coordinates use a fixed fallback.
pub struct MockFeasibilityService {
    state: ConnectionState,
    fixed_travel_minutes: Option<u32>,
    reject_reason: Option<String>,
    fail_connections: bool,
    connection_calls: AtomicUsize,
}

impl Default for MockFeasibilityService {
    fn default() -> Self {
        Self {
            state: ConnectionState::Connected,
            fixed_travel_minutes: None,
            reject_reason: None,
            fail_connections: false,
            connection_calls: AtomicUsize::new(0),
        }
    }
}

impl MockFeasibilityService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report a fixed connection state instead of `connected`.
    pub fn with_state(mut self, state: ConnectionState) -> Self {
        self.state = state;
        self
    }

    /// Answer every travel-time lookup with a fixed value.
    pub fn with_fixed_travel_minutes(mut self, minutes: u32) -> Self {
        self.fixed_travel_minutes = Some(minutes);
        self
    }

    /// Reject every assignment with the given reason.
    pub fn rejecting(mut self, reason: impl Into<String>) -> Self {
        self.reject_reason = Some(reason.into());
        self
    }

    /// Make every travel-time lookup fail, as a broken routing backend would.
    pub fn with_connection_failures(mut self) -> Self {
        self.fail_connections = true;
        self
    }

    /// Number of travel-time lookups served so far.
    pub fn connection_call_count(&self) -> usize {
        self.connection_calls.load(Ordering::SeqCst)
    }

    fn estimate(&self, from: Option<[f64; 2]>, to: Option<[f64; 2]>) -> u32 {
        if let Some(fixed) = self.fixed_travel_minutes {
            return fixed;
        }
        match (from, to) {
            (Some(a), Some(b)) => {
                let minutes =
                    geo::travel_time_minutes(&Coordinates::from(a), &Coordinates::from(b));
                minutes.ceil() as u32
            }
            _ => FALLBACK_POSITIONING_MINUTES,
        }
    }

    fn estimate_between(&self, from: &Route, to: &Route) -> u32 {
        self.estimate(from.end_location, to.start_location)
    }
}

#[async_trait]
impl FeasibilityService for MockFeasibilityService {
    async fn can_assign_route(&self, route: &Route, existing: &[Route]) -> Result<FeasibilityCheck> {
        if let Some(reason) = &self.reject_reason {
            return Ok(FeasibilityCheck::rejected(reason.clone()));
        }

        let (start, end) = route.interval();
        for other in existing {
            let (o_start, o_end) = other.interval();
            if intervals_overlap(start, end, o_start, o_end) {
                return Ok(FeasibilityCheck::rejected(format!(
                    "Solapamiento de horario con {}",
                    other.code
                )));
            }
        }

        // Simulate the chronological insertion and check both connections.
        let mut sorted: Vec<&Route> = existing.iter().collect();
        sorted.sort_by_key(|r| (r.start_minutes(), r.end_minutes()));
        let prev = sorted.iter().rev().find(|r| r.end_minutes() <= start);
        let next = sorted.iter().find(|r| r.start_minutes() >= end);

        if let Some(prev) = prev {
            let needed = self.estimate_between(prev, route) as i32;
            let available = start - prev.end_minutes();
            if needed > available {
                return Ok(FeasibilityCheck::rejected(format!(
                    "Tiempo de posicionamiento insuficiente entre {} y {} ({} min necesarios, {} disponibles)",
                    prev.code, route.code, needed, available
                )));
            }
        }
        if let Some(next) = next {
            let needed = self.estimate_between(route, next) as i32;
            let available = next.start_minutes() - end;
            if needed > available {
                return Ok(FeasibilityCheck::rejected(format!(
                    "Tiempo de posicionamiento insuficiente entre {} y {} ({} min necesarios, {} disponibles)",
                    route.code, next.code, needed, available
                )));
            }
        }

        Ok(FeasibilityCheck::ok())
    }

    async fn validate_bus(&self, bus: &Bus) -> Result<BusFeasibility> {
        let incidents = incidents_from_routes("", &bus.id, &bus.routes, |from, to| {
            Some(self.estimate_between(from, to))
        });
        let feasible = incidents
            .iter()
            .all(|i| i.severity != IncidentSeverity::Error);
        Ok(BusFeasibility {
            feasible,
            message: (!feasible).then(|| "El bus tiene incidencias críticas".to_string()),
            issues_count: incidents.len(),
            issues: incidents,
        })
    }

    async fn validate_all_buses(
        &self,
        days: &[DayPayload],
        persist: bool,
    ) -> Result<GlobalValidationReport> {
        let mut incidents = Vec::new();
        let mut total_buses = 0usize;

        for day in days {
            for bus in &day.buses {
                total_buses += 1;
                incidents.extend(incidents_from_payload(&day.day, bus, |from, to| {
                    Some(self.estimate(from, to))
                }));
            }
        }

        Ok(GlobalValidationReport::new(incidents, total_buses, persist))
    }

    async fn validate_connection(&self, from: &Route, to: &Route) -> Result<ConnectionEstimate> {
        self.connection_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_connections {
            anyhow::bail!("Simulated routing backend failure");
        }
        Ok(ConnectionEstimate {
            travel_time: self.estimate_between(from, to),
        })
    }

    fn connection_state(&self) -> ConnectionState {
        self.state
    }

    fn name(&self) -> &str {
        "MockFeasibility"
    }
}

/// Walk a bus's routes pairwise and produce incidents. `estimate` returns
/// drive minutes, or `None` when the pair cannot be assessed (no
/// coordinates, unroutable) — such pairs are skipped, never flagged.
fn incidents_from_routes(
    day: &str,
    bus_id: &str,
    routes: &[Route],
    estimate: impl Fn(&Route, &Route) -> Option<u32>,
) -> Vec<Incident> {
    let mut sorted: Vec<&Route> = routes.iter().collect();
    sorted.sort_by_key(|r| (r.start_minutes(), r.end_minutes()));

    let mut incidents = Vec::new();
    for pair in sorted.windows(2) {
        let (prev, curr) = (pair[0], pair[1]);
        let buffer = curr.start_minutes() - prev.end_minutes();
        if buffer < 0 {
            incidents.push(Incident {
                day: day.to_string(),
                bus_id: bus_id.to_string(),
                route_a: Some(prev.id.clone()),
                route_b: Some(curr.id.clone()),
                issue_type: IncidentType::OverlappingRoutes,
                severity: IncidentSeverity::Error,
                message: format!("Las rutas {} y {} se solapan", prev.code, curr.code),
                suggestion: Some("Reasignar una de las rutas a otro bus".into()),
                time_available: Some(buffer),
                travel_time: None,
                buffer_minutes: Some(buffer),
            });
            continue;
        }
        let Some(travel) = estimate(prev, curr).map(|t| t as i32) else {
            continue;
        };
        if travel > buffer {
            incidents.push(Incident {
                day: day.to_string(),
                bus_id: bus_id.to_string(),
                route_a: Some(prev.id.clone()),
                route_b: Some(curr.id.clone()),
                issue_type: IncidentType::InsufficientTime,
                severity: IncidentSeverity::Error,
                message: format!(
                    "Tiempo insuficiente entre {} y {}: {} min de viaje, {} min disponibles",
                    prev.code, curr.code, travel, buffer
                ),
                suggestion: Some("Reasignar la ruta a un bus con más holgura".into()),
                time_available: Some(buffer),
                travel_time: Some(travel),
                buffer_minutes: Some(buffer - travel),
            });
        }
    }
    incidents
}

/// Incident scan over the wire payload of one bus.
fn incidents_from_payload(
    day: &str,
    bus: &crate::types::DayPayloadBus,
    estimate: impl Fn(Option<[f64; 2]>, Option<[f64; 2]>) -> Option<u32>,
) -> Vec<Incident> {
    struct Parsed {
        id: String,
        start: i32,
        end: i32,
        end_location: Option<[f64; 2]>,
        start_location: Option<[f64; 2]>,
    }

    let mut incidents = Vec::new();
    let mut parsed: Vec<Parsed> = Vec::with_capacity(bus.routes.len());

    for route in &bus.routes {
        let times = parse_hhmm(&route.start_time)
            .and_then(|s| parse_hhmm(&route.end_time).map(|e| (s, e)));
        match times {
            Ok((s, e)) if e > s => parsed.push(Parsed {
                id: route.route_id.clone(),
                start: time_to_minutes(s),
                end: time_to_minutes(e),
                end_location: route.end_location,
                start_location: route.start_location,
            }),
            _ => incidents.push(Incident {
                day: day.to_string(),
                bus_id: bus.bus_id.clone(),
                route_a: Some(route.route_id.clone()),
                route_b: None,
                issue_type: IncidentType::InvalidTimeRange,
                severity: IncidentSeverity::Error,
                message: format!(
                    "Rango horario inválido en la ruta {} ({} – {})",
                    route.route_id, route.start_time, route.end_time
                ),
                suggestion: Some("Corregir los horarios de la ruta".into()),
                time_available: None,
                travel_time: None,
                buffer_minutes: None,
            }),
        }
    }

    parsed.sort_by_key(|r| (r.start, r.end));
    for pair in parsed.windows(2) {
        let (prev, curr) = (&pair[0], &pair[1]);
        let buffer = curr.start - prev.end;
        if buffer < 0 {
            incidents.push(Incident {
                day: day.to_string(),
                bus_id: bus.bus_id.clone(),
                route_a: Some(prev.id.clone()),
                route_b: Some(curr.id.clone()),
                issue_type: IncidentType::OverlappingRoutes,
                severity: IncidentSeverity::Error,
                message: format!("Las rutas {} y {} se solapan", prev.id, curr.id),
                suggestion: Some("Reasignar una de las rutas a otro bus".into()),
                time_available: Some(buffer),
                travel_time: None,
                buffer_minutes: Some(buffer),
            });
            continue;
        }
        let Some(travel) = estimate(prev.end_location, curr.start_location).map(|t| t as i32)
        else {
            continue;
        };
        if travel > buffer {
            incidents.push(Incident {
                day: day.to_string(),
                bus_id: bus.bus_id.clone(),
                route_a: Some(prev.id.clone()),
                route_b: Some(curr.id.clone()),
                issue_type: IncidentType::InsufficientTime,
                severity: IncidentSeverity::Error,
                message: format!(
                    "Tiempo insuficiente entre {} y {}: {} min de viaje, {} min disponibles",
                    prev.id, curr.id, travel, buffer
                ),
                suggestion: Some("Reasignar la ruta a un bus con más holgura".into()),
                time_available: Some(buffer),
                travel_time: Some(travel),
                buffer_minutes: Some(buffer - travel),
            });
        }
    }

    incidents
}

/// Create the feasibility service with automatic OSRM detection.
///
/// Tries OSRM if a URL is provided; falls back to the mock service when
/// OSRM is unreachable or unconfigured.
pub async fn create_feasibility_service_with_fallback(
    osrm_url: Option<String>,
) -> Box<dyn FeasibilityService> {
    use tracing::{info, warn};

    if let Some(url) = osrm_url {
        let client = OsrmClient::new(OsrmConfig::new(&url));
        match client.check_health().await {
            Ok(()) => {
                info!("OSRM feasibility service available at {}", url);
                return Box::new(client);
            }
            Err(e) => {
                warn!("OSRM not available at {}: {}. Falling back to mock estimates.", url, e);
            }
        }
    }

    info!("Using mock feasibility service (OSRM not configured or unavailable)");
    Box::new(MockFeasibilityService::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RouteType;
    use chrono::NaiveTime;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn route(id: &str, start: NaiveTime, end: NaiveTime) -> Route {
        Route {
            id: id.into(),
            code: id.into(),
            start_time: start,
            end_time: end,
            origin: String::new(),
            destination: String::new(),
            route_type: RouteType::Entry,
            stops: vec![],
            school: String::new(),
            positioning_minutes: 0,
            capacity_needed: 0,
            vehicle_capacity_min: None,
            vehicle_capacity_max: None,
            vehicle_capacity_range: None,
            start_location: None,
            end_location: None,
            contract_id: None,
        }
    }

    #[tokio::test]
    async fn test_mock_rejects_overlapping_assignment() {
        let service = MockFeasibilityService::new();
        let existing = vec![route("R1", hm(8, 0), hm(8, 30))];
        let incoming = route("R3", hm(8, 20), hm(8, 50));

        let check = service.can_assign_route(&incoming, &existing).await.unwrap();
        assert!(!check.feasible);
        assert!(check.reason.unwrap().contains("Solapamiento"));
    }

    #[tokio::test]
    async fn test_mock_rejects_when_positioning_does_not_fit() {
        // 30 min buffer, fixed 40 min travel.
        let service = MockFeasibilityService::new().with_fixed_travel_minutes(40);
        let existing = vec![route("R1", hm(7, 0), hm(7, 30))];
        let incoming = route("R2", hm(8, 0), hm(8, 30));

        let check = service.can_assign_route(&incoming, &existing).await.unwrap();
        assert!(!check.feasible);
        assert!(check.reason.unwrap().contains("posicionamiento"));
    }

    #[tokio::test]
    async fn test_mock_accepts_when_positioning_fits() {
        let service = MockFeasibilityService::new().with_fixed_travel_minutes(20);
        let existing = vec![route("R1", hm(7, 0), hm(7, 30))];
        let incoming = route("R2", hm(8, 0), hm(8, 30));

        let check = service.can_assign_route(&incoming, &existing).await.unwrap();
        assert!(check.feasible);
        assert!(check.reason.is_none());
    }

    #[tokio::test]
    async fn test_mock_checks_the_next_neighbor_too() {
        // Inserting before an existing route with only 5 min to spare.
        let service = MockFeasibilityService::new().with_fixed_travel_minutes(20);
        let existing = vec![route("R2", hm(9, 0), hm(9, 30))];
        let incoming = route("R1", hm(8, 0), hm(8, 55));

        let check = service.can_assign_route(&incoming, &existing).await.unwrap();
        assert!(!check.feasible);
    }

    #[tokio::test]
    async fn test_mock_empty_bus_always_feasible() {
        let service = MockFeasibilityService::new().with_fixed_travel_minutes(120);
        let incoming = route("R1", hm(8, 0), hm(8, 30));
        let check = service.can_assign_route(&incoming, &[]).await.unwrap();
        assert!(check.feasible);
    }

    #[tokio::test]
    async fn test_mock_connection_uses_fallback_without_coordinates() {
        let service = MockFeasibilityService::new();
        let estimate = service
            .validate_connection(&route("R1", hm(7, 0), hm(7, 30)), &route("R2", hm(8, 0), hm(8, 30)))
            .await
            .unwrap();
        assert_eq!(estimate.travel_time, FALLBACK_POSITIONING_MINUTES);
        assert_eq!(service.connection_call_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_validate_all_buses_reports_incidents() {
        let buses = vec![Bus::with_routes(
            "B001",
            vec![route("R1", hm(8, 0), hm(8, 30)), route("R2", hm(8, 20), hm(8, 50))],
        )];
        let days = vec![DayPayload::from_buses("monday", &buses)];
        let service = MockFeasibilityService::new();

        let report = service.validate_all_buses(&days, false).await.unwrap();
        assert_eq!(report.summary.total_buses, 1);
        assert_eq!(report.summary.incidents_error, 1);
        assert_eq!(report.incidents[0].issue_type, IncidentType::OverlappingRoutes);
        assert_eq!(report.incidents[0].day, "monday");
    }

    #[tokio::test]
    async fn test_mock_validate_all_buses_flags_insufficient_time() {
        let mut r1 = route("R1", hm(7, 0), hm(7, 30));
        let mut r2 = route("R2", hm(7, 40), hm(8, 10));
        // Madrid → Toledo in a 10 minute window is not drivable.
        r1.end_location = Some([40.4168, -3.7038]);
        r2.start_location = Some([39.8628, -4.0273]);
        let buses = vec![Bus::with_routes("B001", vec![r1, r2])];
        let days = vec![DayPayload::from_buses("monday", &buses)];

        let report = MockFeasibilityService::new()
            .validate_all_buses(&days, false)
            .await
            .unwrap();
        assert_eq!(report.incidents.len(), 1);
        let incident = &report.incidents[0];
        assert_eq!(incident.issue_type, IncidentType::InsufficientTime);
        assert_eq!(incident.time_available, Some(10));
        assert!(incident.travel_time.unwrap() > 10);
    }

    #[tokio::test]
    async fn test_mock_validate_bus_feasible_flag() {
        let service = MockFeasibilityService::new().with_fixed_travel_minutes(5);
        let bus = Bus::with_routes(
            "B001",
            vec![route("R1", hm(7, 0), hm(7, 30)), route("R2", hm(8, 0), hm(8, 30))],
        );
        let result = service.validate_bus(&bus).await.unwrap();
        assert!(result.feasible);
        assert_eq!(result.issues_count, 0);
    }

    #[tokio::test]
    async fn test_fallback_factory_returns_mock_without_url() {
        let service = create_feasibility_service_with_fallback(None).await;
        assert_eq!(service.name(), "MockFeasibility");
        assert_eq!(service.connection_state(), ConnectionState::Connected);
    }
}
