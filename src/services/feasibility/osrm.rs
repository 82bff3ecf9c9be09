//! OSRM routing engine client
//!
//! OSRM API documentation:
//! https://project-osrm.org/docs/v5.24.0/api/

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{
    incidents_from_payload, incidents_from_routes, BusFeasibility, ConnectionEstimate,
    ConnectionState, FeasibilityCheck, FeasibilityService,
};
use crate::services::timeutil::intervals_overlap;
use crate::types::{Bus, DayPayload, GlobalValidationReport, IncidentSeverity, Route};

/// OSRM client configuration
#[derive(Debug, Clone)]
pub struct OsrmConfig {
    /// Base URL of the OSRM server (e.g., "http://localhost:5000")
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
}

impl Default for OsrmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            timeout_seconds: 30,
        }
    }
}

impl OsrmConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }
}

/// OSRM-backed feasibility client.
///
/// Connection state transitions: starts `connecting`; a successful call
/// moves to `connected`; a failed call moves to `reconnecting` if the
/// channel was previously connected, `disconnected` otherwise.
pub struct OsrmClient {
    client: Client,
    config: OsrmConfig,
    state: Mutex<ConnectionState>,
}

impl OsrmClient {
    pub fn new(config: OsrmConfig) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            config,
            state: Mutex::new(ConnectionState::Connecting),
        }
    }

    fn mark_success(&self) {
        *self.state.lock() = ConnectionState::Connected;
    }

    fn mark_failure(&self) {
        let mut state = self.state.lock();
        *state = match *state {
            ConnectionState::Connected | ConnectionState::Reconnecting => {
                ConnectionState::Reconnecting
            }
            _ => ConnectionState::Disconnected,
        };
    }

    /// Probe the server with a `/nearest` request.
    pub async fn check_health(&self) -> Result<()> {
        let url = format!(
            "{}/nearest/v1/driving/-3.703800,40.416800?number=1",
            self.config.base_url
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to reach OSRM")?;

        if response.status().is_success() {
            self.mark_success();
            Ok(())
        } else {
            self.mark_failure();
            anyhow::bail!("OSRM returned status {}", response.status())
        }
    }

    /// OSRM wants "lon,lat"; locations on the wire are `[lat, lon]`.
    fn coord(loc: [f64; 2]) -> String {
        format!("{:.6},{:.6}", loc[1], loc[0])
    }

    /// Drive time in seconds between two `[lat, lon]` points via `/route`.
    async fn pair_duration_seconds(&self, from: [f64; 2], to: [f64; 2]) -> Result<f64> {
        let url = format!(
            "{}/route/v1/driving/{};{}?overview=false",
            self.config.base_url,
            Self::coord(from),
            Self::coord(to)
        );

        debug!("Requesting route duration from OSRM");
        let response = self.client.get(&url).send().await.map_err(|e| {
            self.mark_failure();
            anyhow::anyhow!(e).context("Failed to send route request to OSRM")
        })?;

        if !response.status().is_success() {
            self.mark_failure();
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("OSRM route returned error {}: {}", status, body);
        }

        let parsed: RouteResponse = response
            .json()
            .await
            .context("Failed to parse OSRM route response")?;
        if parsed.code != "Ok" {
            self.mark_failure();
            anyhow::bail!("OSRM route returned code {}", parsed.code);
        }
        let route = parsed
            .routes
            .first()
            .context("OSRM route response contained no routes")?;

        self.mark_success();
        Ok(route.duration)
    }

    /// Duration matrix in seconds between `[lat, lon]` points via `/table`.
    /// Unroutable cells come back as `None`.
    async fn table_durations(&self, locations: &[[f64; 2]]) -> Result<Vec<Vec<Option<f64>>>> {
        if locations.len() < 2 {
            return Ok(vec![vec![Some(0.0); locations.len()]; locations.len()]);
        }

        let coords: Vec<String> = locations.iter().map(|l| Self::coord(*l)).collect();
        let url = format!(
            "{}/table/v1/driving/{}?annotations=duration",
            self.config.base_url,
            coords.join(";")
        );

        debug!("Requesting {}x{} duration table from OSRM", locations.len(), locations.len());
        let response = self.client.get(&url).send().await.map_err(|e| {
            self.mark_failure();
            anyhow::anyhow!(e).context("Failed to send table request to OSRM")
        })?;

        if !response.status().is_success() {
            self.mark_failure();
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("OSRM table returned error {}: {}", status, body);
        }

        let parsed: TableResponse = response
            .json()
            .await
            .context("Failed to parse OSRM table response")?;
        if parsed.code != "Ok" {
            self.mark_failure();
            anyhow::bail!("OSRM table returned code {}", parsed.code);
        }

        self.mark_success();
        Ok(parsed.durations)
    }

    /// Travel minutes between two optional locations from a prefetched
    /// table. `None` when either location is missing or unroutable.
    fn lookup_minutes(
        table: &[Vec<Option<f64>>],
        index: &HashMap<(u64, u64), usize>,
        from: Option<[f64; 2]>,
        to: Option<[f64; 2]>,
    ) -> Option<u32> {
        let from_idx = *index.get(&loc_key(from?))?;
        let to_idx = *index.get(&loc_key(to?))?;
        let seconds = (*table.get(from_idx)?.get(to_idx)?)?;
        Some((seconds / 60.0).ceil() as u32)
    }

    /// Collect the distinct connection endpoints of a route sequence and
    /// fetch one duration table for them.
    async fn prefetch_table(
        &self,
        endpoints: impl Iterator<Item = Option<[f64; 2]>>,
    ) -> Result<(Vec<Vec<Option<f64>>>, HashMap<(u64, u64), usize>)> {
        let mut index: HashMap<(u64, u64), usize> = HashMap::new();
        let mut locations: Vec<[f64; 2]> = Vec::new();
        for loc in endpoints.flatten() {
            index.entry(loc_key(loc)).or_insert_with(|| {
                locations.push(loc);
                locations.len() - 1
            });
        }
        let table = self.table_durations(&locations).await?;
        Ok((table, index))
    }
}

fn loc_key(loc: [f64; 2]) -> (u64, u64) {
    (loc[0].to_bits(), loc[1].to_bits())
}

#[async_trait]
impl FeasibilityService for OsrmClient {
    async fn can_assign_route(&self, route: &Route, existing: &[Route]) -> Result<FeasibilityCheck> {
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

        let mut sorted: Vec<&Route> = existing.iter().collect();
        sorted.sort_by_key(|r| (r.start_minutes(), r.end_minutes()));
        let prev = sorted.iter().rev().find(|r| r.end_minutes() <= start).copied();
        let next = sorted.iter().find(|r| r.start_minutes() >= end).copied();

        if let Some(prev) = prev {
            if let (Some(from), Some(to)) = (prev.end_location, route.start_location) {
                let needed = (self.pair_duration_seconds(from, to).await? / 60.0).ceil() as i32;
                let available = start - prev.end_minutes();
                if needed > available {
                    return Ok(FeasibilityCheck::rejected(format!(
                        "Tiempo de posicionamiento insuficiente entre {} y {} ({} min necesarios, {} disponibles)",
                        prev.code, route.code, needed, available
                    )));
                }
            }
        }
        if let Some(next) = next {
            if let (Some(from), Some(to)) = (route.end_location, next.start_location) {
                let needed = (self.pair_duration_seconds(from, to).await? / 60.0).ceil() as i32;
                let available = next.start_minutes() - end;
                if needed > available {
                    return Ok(FeasibilityCheck::rejected(format!(
                        "Tiempo de posicionamiento insuficiente entre {} y {} ({} min necesarios, {} disponibles)",
                        route.code, next.code, needed, available
                    )));
                }
            }
        }

        Ok(FeasibilityCheck::ok())
    }

    async fn validate_bus(&self, bus: &Bus) -> Result<BusFeasibility> {
        let endpoints = bus
            .routes
            .iter()
            .flat_map(|r| [r.end_location, r.start_location]);
        let (table, index) = self.prefetch_table(endpoints).await?;

        let incidents = incidents_from_routes("", &bus.id, &bus.routes, |from, to| {
            Self::lookup_minutes(&table, &index, from.end_location, to.start_location)
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
            // One duration table per bus, fetched concurrently.
            let tables = futures::future::join_all(day.buses.iter().map(|bus| {
                self.prefetch_table(
                    bus.routes
                        .iter()
                        .flat_map(|r| [r.end_location, r.start_location]),
                )
            }))
            .await;

            for (bus, table) in day.buses.iter().zip(tables) {
                total_buses += 1;
                match table {
                    Ok((table, index)) => {
                        incidents.extend(incidents_from_payload(&day.day, bus, |from, to| {
                            Self::lookup_minutes(&table, &index, from, to)
                        }));
                    }
                    Err(e) => {
                        // One unreachable bus must not abort the report.
                        warn!("Skipping drive-time checks for bus {}: {e:#}", bus.bus_id);
                        incidents.extend(incidents_from_payload(&day.day, bus, |_, _| None));
                    }
                }
            }
        }

        Ok(GlobalValidationReport::new(incidents, total_buses, persist))
    }

    async fn validate_connection(&self, from: &Route, to: &Route) -> Result<ConnectionEstimate> {
        let (a, b) = match (from.end_location, to.start_location) {
            (Some(a), Some(b)) => (a, b),
            _ => anyhow::bail!(
                "Routes {} → {} have no coordinates for a connection lookup",
                from.id,
                to.id
            ),
        };
        let seconds = self.pair_duration_seconds(a, b).await?;
        Ok(ConnectionEstimate {
            travel_time: (seconds / 60.0).ceil() as u32,
        })
    }

    fn connection_state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn name(&self) -> &str {
        "OSRM"
    }
}

// OSRM API types

#[derive(Debug, Deserialize)]
struct RouteResponse {
    code: String,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    /// Duration in seconds
    duration: f64,
}

#[derive(Debug, Deserialize)]
struct TableResponse {
    code: String,
    #[serde(default)]
    durations: Vec<Vec<Option<f64>>>,
}
