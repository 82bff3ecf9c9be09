//! Assignment engine state
//!
//! `ScheduleBoard` is the single owned aggregate behind the workspace: the
//! bus→routes assignment for one day plus the transfer zone (neutral
//! holding area) and the pool of unassigned routes. Every mutation goes
//! through a method that performs its pre-checks first and leaves the
//! board untouched on failure.
//!
//! Conservation invariant: a route known to the board lives in exactly one
//! of available / transfer / some bus — never two, never none.

use serde::Serialize;
use thiserror::Error;

use crate::defaults::COMPRESSION_GAP_MINUTES;
use crate::services::normalizer::ensure_unique_bus_ids;
use crate::services::timeutil::{intervals_overlap, next_bus_id, sort_routes_chronological};
use crate::types::{Bus, DayPayload, Route, ScheduleData};

/// Expected failure modes of board operations. Messages are user-facing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssignError {
    #[error("Bus no encontrado")]
    BusNotFound,
    #[error("Ruta duplicada")]
    DuplicateRoute,
    #[error("Solapamiento de horario")]
    ScheduleOverlap,
    #[error("Ruta no encontrada")]
    RouteNotFound,
    #[error("Confirmación requerida para eliminar el bus")]
    ConfirmationRequired,
    #[error("{0}")]
    Infeasible(String),
    #[error("No se pudo validar la asignación")]
    ValidationUnavailable,
    #[error("Servicio de validación desconectado")]
    ServiceDisconnected,
    #[error("No se puede publicar: el horario tiene errores de validación")]
    PublishBlocked,
}

/// Where a route currently lives on the board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteLocation {
    Bus(String),
    Transfer,
    Available,
}

/// Idle gap between two consecutive routes on a bus.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GapInfo {
    pub prev_route_id: String,
    pub next_route_id: String,
    pub minutes: i32,
    /// Long enough for the timeline view to collapse.
    pub compressible: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleBoard {
    day: String,
    buses: Vec<Bus>,
    transfer_routes: Vec<Route>,
    available_routes: Vec<Route>,
}

impl ScheduleBoard {
    /// Empty single-bus default, used when no initial schedule is supplied.
    pub fn default_day(day: impl Into<String>) -> Self {
        Self {
            day: day.into(),
            buses: vec![Bus::new("B001")],
            transfer_routes: Vec::new(),
            available_routes: Vec::new(),
        }
    }

    /// Board from an externally supplied schedule (optimizer output or a
    /// persisted draft). Bus ids are made collision-free and ordered.
    pub fn new(day: impl Into<String>, mut buses: Vec<Bus>, available_routes: Vec<Route>) -> Self {
        for bus in &mut buses {
            sort_routes_chronological(&mut bus.routes);
        }
        ensure_unique_bus_ids(&mut buses);
        buses.sort_by(|a, b| a.id.cmp(&b.id));
        if buses.is_empty() {
            buses.push(Bus::new("B001"));
        }
        Self {
            day: day.into(),
            buses,
            transfer_routes: Vec::new(),
            available_routes,
        }
    }

    pub fn day(&self) -> &str {
        &self.day
    }

    pub fn buses(&self) -> &[Bus] {
        &self.buses
    }

    pub fn bus(&self, bus_id: &str) -> Option<&Bus> {
        self.buses.iter().find(|b| b.id == bus_id)
    }

    pub fn transfer_routes(&self) -> &[Route] {
        &self.transfer_routes
    }

    pub fn available_routes(&self) -> &[Route] {
        &self.available_routes
    }

    pub fn transfer_route(&self, route_id: &str) -> Option<&Route> {
        self.transfer_routes.iter().find(|r| r.id == route_id)
    }

    /// Every place a route id currently appears (conservation check).
    pub fn locations_of(&self, route_id: &str) -> Vec<RouteLocation> {
        let mut found = Vec::new();
        for bus in &self.buses {
            if bus.has_route(route_id) {
                found.push(RouteLocation::Bus(bus.id.clone()));
            }
        }
        if self.transfer_routes.iter().any(|r| r.id == route_id) {
            found.push(RouteLocation::Transfer);
        }
        if self.available_routes.iter().any(|r| r.id == route_id) {
            found.push(RouteLocation::Available);
        }
        found
    }

    /// Register a route as unassigned. Rejects ids already known anywhere.
    pub fn add_available_route(&mut self, route: Route) -> Result<(), AssignError> {
        if !self.locations_of(&route.id).is_empty() {
            return Err(AssignError::DuplicateRoute);
        }
        self.available_routes.push(route);
        sort_routes_chronological(&mut self.available_routes);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Drop
    // -----------------------------------------------------------------------

    /// First position whose existing route starts later than the incoming
    /// route; append otherwise.
    pub fn insertion_index(routes: &[Route], route: &Route) -> usize {
        routes
            .iter()
            .position(|r| r.start_minutes() > route.start_minutes())
            .unwrap_or(routes.len())
    }

    /// Synchronous pre-checks for dropping `route` onto a bus, before any
    /// service call. Returns the chronological insertion index.
    pub fn precheck_drop(&self, route: &Route, target_bus_id: &str) -> Result<usize, AssignError> {
        let target = self.bus(target_bus_id).ok_or(AssignError::BusNotFound)?;

        if target.has_route(&route.id) {
            return Err(AssignError::DuplicateRoute);
        }

        let (start, end) = route.interval();
        for existing in &target.routes {
            let (o_start, o_end) = existing.interval();
            if intervals_overlap(start, end, o_start, o_end) {
                return Err(AssignError::ScheduleOverlap);
            }
        }

        Ok(Self::insertion_index(&target.routes, route))
    }

    /// Commit a confirmed drop: splice into the destination, then remove
    /// the route from whichever source held it (destination first, so the
    /// route is never absent from every collection).
    pub fn commit_drop(
        &mut self,
        route: Route,
        target_bus_id: &str,
        index: usize,
    ) -> Result<(), AssignError> {
        let route_id = route.id.clone();
        let target = self
            .buses
            .iter_mut()
            .find(|b| b.id == target_bus_id)
            .ok_or(AssignError::BusNotFound)?;
        if target.has_route(&route_id) {
            return Err(AssignError::DuplicateRoute);
        }
        let index = index.min(target.routes.len());
        target.routes.insert(index, route);

        self.remove_from_sources(&route_id, target_bus_id);
        Ok(())
    }

    /// Remove a route id from every collection except `keep_bus_id`.
    fn remove_from_sources(&mut self, route_id: &str, keep_bus_id: &str) {
        self.available_routes.retain(|r| r.id != route_id);
        self.transfer_routes.retain(|r| r.id != route_id);
        for bus in &mut self.buses {
            if bus.id != keep_bus_id {
                bus.routes.retain(|r| r.id != route_id);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Transfer zone
    // -----------------------------------------------------------------------

    /// Stage a route in the transfer zone. The copy lands in transfer
    /// before the source copy is dropped.
    pub fn move_to_transfer(&mut self, route_id: &str) -> Result<(), AssignError> {
        if self.transfer_routes.iter().any(|r| r.id == route_id) {
            return Err(AssignError::DuplicateRoute);
        }

        let route = self
            .available_routes
            .iter()
            .find(|r| r.id == route_id)
            .or_else(|| self.buses.iter().flat_map(|b| &b.routes).find(|r| r.id == route_id))
            .cloned()
            .ok_or(AssignError::RouteNotFound)?;

        self.transfer_routes.push(route);
        self.available_routes.retain(|r| r.id != route_id);
        for bus in &mut self.buses {
            bus.routes.retain(|r| r.id != route_id);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Buses
    // -----------------------------------------------------------------------

    /// New bus containing exactly `route`, under the next free id.
    pub fn create_bus_with_route(&mut self, mut route: Route) -> String {
        route.positioning_minutes = 0;
        let bus_id = next_bus_id(self.buses.iter().map(|b| b.id.as_str()));
        let route_id = route.id.clone();
        self.buses.push(Bus::with_routes(bus_id.clone(), vec![route]));
        self.remove_from_sources(&route_id, &bus_id);
        self.buses.sort_by(|a, b| a.id.cmp(&b.id));
        bus_id
    }

    /// New empty bus under the next free id.
    pub fn add_bus(&mut self) -> String {
        let bus_id = next_bus_id(self.buses.iter().map(|b| b.id.as_str()));
        self.buses.push(Bus::new(bus_id.clone()));
        self.buses.sort_by(|a, b| a.id.cmp(&b.id));
        bus_id
    }

    /// Unconditional removal; the route returns to the unassigned pool.
    pub fn remove_route(&mut self, bus_id: &str, route_id: &str) -> Result<Route, AssignError> {
        let bus = self
            .buses
            .iter_mut()
            .find(|b| b.id == bus_id)
            .ok_or(AssignError::BusNotFound)?;
        let position = bus
            .routes
            .iter()
            .position(|r| r.id == route_id)
            .ok_or(AssignError::RouteNotFound)?;
        let route = bus.routes.remove(position);
        self.available_routes.push(route.clone());
        sort_routes_chronological(&mut self.available_routes);
        Ok(route)
    }

    /// Delete a bus. The caller must have obtained interactive
    /// confirmation; its routes become unassigned, never auto-transferred.
    pub fn remove_bus(&mut self, bus_id: &str, confirmed: bool) -> Result<Vec<Route>, AssignError> {
        if !confirmed {
            return Err(AssignError::ConfirmationRequired);
        }
        let position = self
            .buses
            .iter()
            .position(|b| b.id == bus_id)
            .ok_or(AssignError::BusNotFound)?;
        let bus = self.buses.remove(position);
        self.available_routes.extend(bus.routes.iter().cloned());
        sort_routes_chronological(&mut self.available_routes);
        Ok(bus.routes)
    }

    /// Replace the whole bus collection (reassignment commit). Ids are
    /// re-normalized and everything re-sorted.
    pub fn replace_buses(&mut self, mut buses: Vec<Bus>) {
        for bus in &mut buses {
            sort_routes_chronological(&mut bus.routes);
        }
        ensure_unique_bus_ids(&mut buses);
        buses.sort_by(|a, b| a.id.cmp(&b.id));
        self.buses = buses;
    }

    /// Swap in recomputed routes for one bus (positioning refresh commit).
    /// Returns false if the bus no longer exists.
    pub fn set_bus_routes(&mut self, bus_id: &str, routes: Vec<Route>) -> bool {
        match self.buses.iter_mut().find(|b| b.id == bus_id) {
            Some(bus) => {
                bus.routes = routes;
                true
            }
            None => false,
        }
    }

    /// Idle gaps on one bus, flagged when the timeline may collapse them.
    pub fn bus_gaps(&self, bus_id: &str) -> Result<Vec<GapInfo>, AssignError> {
        let bus = self.bus(bus_id).ok_or(AssignError::BusNotFound)?;
        Ok(bus
            .routes
            .windows(2)
            .map(|pair| {
                let minutes = pair[1].start_minutes() - pair[0].end_minutes();
                GapInfo {
                    prev_route_id: pair[0].id.clone(),
                    next_route_id: pair[1].id.clone(),
                    minutes,
                    compressible: minutes >= COMPRESSION_GAP_MINUTES,
                }
            })
            .collect())
    }

    // -----------------------------------------------------------------------
    // Projections
    // -----------------------------------------------------------------------

    pub fn to_schedule_data(&self, mode: &str) -> ScheduleData {
        ScheduleData::from_buses(self.day.clone(), mode, &self.buses)
    }

    pub fn day_payload(&self) -> DayPayload {
        DayPayload::from_buses(self.day.clone(), &self.buses)
    }
}
