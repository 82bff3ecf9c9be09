//! Scheduling workspace
//!
//! Orchestration facade over the assignment board: every operation the
//! planning UI issues lands here. Drops follow propose → confirm → commit:
//! synchronous pre-checks first, then the feasibility service, then a
//! single commit under the write lock — the board never shows a route on
//! two buses or on none. The lock is never held across an await.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use crate::services::assignment::{AssignError, ScheduleBoard};
use crate::services::feasibility::{BusFeasibility, ConnectionState, FeasibilityService};
use crate::services::local_validator;
use crate::services::positioning::PositioningScheduler;
use crate::services::reassignment::{
    extract_targets, run_critical_reassignment, ReassignmentSummary, ReassignmentTrigger,
};
use crate::types::{Bus, BusValidation, GlobalValidationReport, Route, ScheduleData};

/// Save/Publish collaborator supplied by the embedding application.
#[async_trait]
pub trait ScheduleSink: Send + Sync {
    async fn save(&self, data: &ScheduleData) -> Result<()>;
    async fn publish(&self, data: &ScheduleData) -> Result<()>;
}

/// Result of a whole-schedule validation, with the automatic reassignment
/// pass when one ran.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub report: GlobalValidationReport,
    pub reassignment: Option<ReassignmentSummary>,
}

struct CachedReport {
    report: GlobalValidationReport,
    /// Set the instant any bus mutates; a stale report must be
    /// re-requested before it is trusted.
    stale: bool,
}

pub struct Workspace {
    board: Arc<RwLock<ScheduleBoard>>,
    service: Arc<dyn FeasibilityService>,
    scheduler: PositioningScheduler,
    last_report: Mutex<Option<CachedReport>>,
    auto_reassign: bool,
    mode: String,
}

impl Workspace {
    /// Build a workspace for one day. `buses` comes from the optimizer or
    /// a persisted draft; an empty list yields the single-bus default.
    pub fn new(
        day: impl Into<String>,
        buses: Vec<Bus>,
        available_routes: Vec<Route>,
        service: Arc<dyn FeasibilityService>,
        debounce: Duration,
        auto_reassign: bool,
    ) -> Self {
        let board = Arc::new(RwLock::new(ScheduleBoard::new(day, buses, available_routes)));
        let scheduler =
            PositioningScheduler::new(Arc::clone(&board), Arc::clone(&service), debounce);
        Self {
            board,
            service,
            scheduler,
            last_report: Mutex::new(None),
            auto_reassign,
            mode: "draft".to_string(),
        }
    }

    pub fn day(&self) -> String {
        self.board.read().day().to_string()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.service.connection_state()
    }

    pub fn positioning(&self) -> &PositioningScheduler {
        &self.scheduler
    }

    /// Current board state (cloned snapshot).
    pub fn snapshot(&self) -> ScheduleBoard {
        self.board.read().clone()
    }

    /// Replace the whole schedule (day switch or a new initial schedule).
    /// The cached report dies with the old board.
    pub fn replace_schedule(
        &self,
        day: impl Into<String>,
        buses: Vec<Bus>,
        available_routes: Vec<Route>,
    ) {
        *self.board.write() = ScheduleBoard::new(day, buses, available_routes);
        *self.last_report.lock() = None;
    }

    fn mark_stale(&self) {
        if let Some(cached) = self.last_report.lock().as_mut() {
            cached.stale = true;
        }
    }

    /// Last whole-schedule report and whether it is stale.
    pub fn last_report(&self) -> Option<(GlobalValidationReport, bool)> {
        self.last_report
            .lock()
            .as_ref()
            .map(|c| (c.report.clone(), c.stale))
    }

    // -----------------------------------------------------------------------
    // Assignment operations
    // -----------------------------------------------------------------------

    /// Drop a route onto a bus: pre-checks, feasibility confirmation,
    /// chronological insertion, commit. On any failure the board is
    /// untouched and the route stays wherever it was.
    pub async fn drop_route(&self, route: Route, target_bus_id: &str) -> Result<(), AssignError> {
        let target_routes = {
            let board = self.board.read();
            board.precheck_drop(&route, target_bus_id)?;
            board.bus(target_bus_id).map(|b| b.routes.clone()).unwrap_or_default()
        };

        let check = self
            .service
            .can_assign_route(&route, &target_routes)
            .await
            .map_err(|e| {
                warn!("Feasibility check unavailable: {e:#}");
                AssignError::ValidationUnavailable
            })?;
        if !check.feasible {
            return Err(AssignError::Infeasible(
                check
                    .reason
                    .unwrap_or_else(|| "La asignación no es factible".to_string()),
            ));
        }

        {
            // State may have shifted during the await: re-check, then commit.
            let mut board = self.board.write();
            let index = board.precheck_drop(&route, target_bus_id)?;
            board.commit_drop(route, target_bus_id, index)?;
        }
        self.mark_stale();
        self.scheduler.request_refresh(Some(&[target_bus_id.to_string()]));
        Ok(())
    }

    /// Stage a route in the transfer zone.
    pub fn move_to_transfer(&self, route_id: &str) -> Result<(), AssignError> {
        self.board.write().move_to_transfer(route_id)?;
        self.mark_stale();
        Ok(())
    }

    /// Move a staged route from the transfer zone onto a bus. The route
    /// leaves the transfer zone only when the destination accepts it.
    pub async fn move_from_transfer(
        &self,
        route_id: &str,
        target_bus_id: &str,
    ) -> Result<(), AssignError> {
        let route = self
            .board
            .read()
            .transfer_route(route_id)
            .cloned()
            .ok_or(AssignError::RouteNotFound)?;
        self.drop_route(route, target_bus_id).await
    }

    /// New bus containing exactly `route`.
    pub fn create_bus_with_route(&self, route: Route) -> String {
        let bus_id = self.board.write().create_bus_with_route(route);
        self.mark_stale();
        self.scheduler.request_refresh(Some(&[bus_id.clone()]));
        bus_id
    }

    pub fn add_bus(&self) -> String {
        let bus_id = self.board.write().add_bus();
        self.mark_stale();
        bus_id
    }

    /// Remove a route from a bus; downstream positioning is recomputed
    /// since the neighbors changed.
    pub fn remove_route(&self, bus_id: &str, route_id: &str) -> Result<Route, AssignError> {
        let route = self.board.write().remove_route(bus_id, route_id)?;
        self.mark_stale();
        self.scheduler.request_refresh(Some(&[bus_id.to_string()]));
        Ok(route)
    }

    /// Delete a bus; `confirmed` carries the interactive confirmation.
    pub fn remove_bus(&self, bus_id: &str, confirmed: bool) -> Result<Vec<Route>, AssignError> {
        let routes = self.board.write().remove_bus(bus_id, confirmed)?;
        self.mark_stale();
        Ok(routes)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Local validator pass over the current assignment.
    pub fn local_validation(&self) -> HashMap<String, BusValidation> {
        local_validator::validate(self.board.read().buses())
    }

    /// Single-bus validation through the feasibility service.
    pub async fn validate_bus(&self, bus_id: &str) -> Result<BusFeasibility, AssignError> {
        let bus = self
            .board
            .read()
            .bus(bus_id)
            .cloned()
            .ok_or(AssignError::BusNotFound)?;
        self.service.validate_bus(&bus).await.map_err(|e| {
            warn!("Bus validation unavailable: {e:#}");
            AssignError::ValidationUnavailable
        })
    }

    /// Whole-schedule validation through the feasibility service. When the
    /// auto-reassign flag is set and the report carries error incidents,
    /// a reassignment pass follows immediately.
    pub async fn validate_schedule(&self, persist: bool) -> Result<ValidationOutcome> {
        let payload = self.board.read().day_payload();
        let report = self.service.validate_all_buses(&[payload], persist).await?;
        *self.last_report.lock() = Some(CachedReport { report: report.clone(), stale: false });
        info!(
            "Whole-schedule validation: {} incidents ({} errors)",
            report.summary.incidents_total, report.summary.incidents_error
        );

        let reassignment = if self.auto_reassign && report.summary.incidents_error > 0 {
            match self
                .reassign_with_report(Some(&report), false, ReassignmentTrigger::AutoValidation)
                .await
            {
                Ok(summary) => Some(summary),
                Err(e) => {
                    warn!("Automatic reassignment skipped: {e}");
                    None
                }
            }
        } else {
            None
        };

        Ok(ValidationOutcome { report, reassignment })
    }

    /// Manual reassignment pass using the cached report and, optionally,
    /// the local validator's own errors.
    pub async fn reassign_critical(
        &self,
        include_local: bool,
    ) -> Result<ReassignmentSummary, AssignError> {
        let cached = self.last_report.lock().as_ref().map(|c| c.report.clone());
        self.reassign_with_report(cached.as_ref(), include_local, ReassignmentTrigger::Manual)
            .await
    }

    async fn reassign_with_report(
        &self,
        report: Option<&GlobalValidationReport>,
        include_local: bool,
        trigger: ReassignmentTrigger,
    ) -> Result<ReassignmentSummary, AssignError> {
        let day = self.day();
        let local = include_local.then(|| self.local_validation());
        let targets = extract_targets(report, &day, local.as_ref());

        let mut summary =
            run_critical_reassignment(&self.board, self.service.as_ref(), &targets, trigger)
                .await?;

        if summary.moved > 0 {
            self.mark_stale();
            let affected = summary.affected_buses();
            self.scheduler.request_refresh(Some(&affected));
        }

        // Post-pass re-validation; a failure here leaves the count unknown.
        let payload = self.board.read().day_payload();
        match self.service.validate_all_buses(&[payload], false).await {
            Ok(fresh) => {
                summary.post_incidents_total = Some(fresh.summary.incidents_total);
                *self.last_report.lock() =
                    Some(CachedReport { report: fresh, stale: false });
            }
            Err(e) => warn!("Post-reassignment validation failed: {e:#}"),
        }

        Ok(summary)
    }

    // -----------------------------------------------------------------------
    // Save / publish
    // -----------------------------------------------------------------------

    pub fn schedule_data(&self) -> ScheduleData {
        self.board.read().to_schedule_data(&self.mode)
    }

    pub async fn save(&self, sink: &dyn ScheduleSink) -> Result<()> {
        sink.save(&self.schedule_data()).await
    }

    /// Publish the schedule. Refused while any bus has validator errors.
    pub async fn publish(&self, sink: &dyn ScheduleSink) -> Result<()> {
        let blocked = self.local_validation().values().any(BusValidation::has_errors);
        if blocked {
            return Err(AssignError::PublishBlocked.into());
        }
        sink.publish(&self.schedule_data()).await
    }
}
