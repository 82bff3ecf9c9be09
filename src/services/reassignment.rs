//! Critical reassignment heuristic
//!
//! Relocates routes implicated in critical validation incidents to the
//! best scoring compatible bus, or to a newly created bus when no existing
//! one qualifies. Greedy, single pass, no backtracking: each route moves
//! at most once per run, and the whole pass commits atomically at the end.
//! Runtime is proportional to targets × buses.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};

use crate::defaults::ROUTE_LOAD_PENALTY;
use crate::services::assignment::{AssignError, ScheduleBoard};
use crate::services::feasibility::{ConnectionState, FeasibilityService};
use crate::services::timeutil::{intervals_overlap, next_bus_id, sort_routes_chronological};
use crate::types::{
    Bus, BusValidation, GlobalValidationReport, IncidentSeverity, IncidentType, IssueKind, Route,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReassignmentTrigger {
    Manual,
    AutoValidation,
}

impl ReassignmentTrigger {
    pub const fn as_str(self) -> &'static str {
        match self {
            ReassignmentTrigger::Manual => "manual",
            ReassignmentTrigger::AutoValidation => "auto_validation",
        }
    }
}

/// One route flagged for relocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CriticalTarget {
    pub bus_id: String,
    pub route_id: String,
    /// Tried when `route_id` is no longer on the bus.
    pub fallback_route_id: Option<String>,
    pub prev_route_id: Option<String>,
    pub issue_type: IncidentType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MovedItem {
    pub route_id: String,
    pub from_bus: String,
    pub to_bus: String,
    pub issue_type: IncidentType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnresolvedItem {
    pub route_id: String,
    pub bus_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReassignmentSummary {
    pub moved: usize,
    pub created: usize,
    pub unresolved: usize,
    pub skipped: usize,
    pub trigger: ReassignmentTrigger,
    /// Incident count after re-validation; filled in by the workspace.
    pub post_incidents_total: Option<usize>,
    pub moved_items: Vec<MovedItem>,
    pub unresolved_items: Vec<UnresolvedItem>,
}

impl ReassignmentSummary {
    fn new(trigger: ReassignmentTrigger) -> Self {
        Self {
            moved: 0,
            created: 0,
            unresolved: 0,
            skipped: 0,
            trigger,
            post_incidents_total: None,
            moved_items: Vec::new(),
            unresolved_items: Vec::new(),
        }
    }

    /// Buses touched by the pass, for the follow-up positioning refresh.
    pub fn affected_buses(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for item in &self.moved_items {
            for bus in [&item.from_bus, &item.to_bus] {
                if seen.insert(bus.clone()) {
                    out.push(bus.clone());
                }
            }
        }
        out
    }
}

/// Collect critical targets from the whole-schedule report (error-severity
/// critical incidents for the active day) and optionally from the local
/// validator's own errors. Deduplicated by (bus, route).
pub fn extract_targets(
    report: Option<&GlobalValidationReport>,
    active_day: &str,
    local: Option<&HashMap<String, BusValidation>>,
) -> Vec<CriticalTarget> {
    let mut targets = Vec::new();

    if let Some(report) = report {
        for incident in &report.incidents {
            if incident.severity != IncidentSeverity::Error
                || !incident.issue_type.is_critical()
                || incident.day != active_day
            {
                continue;
            }
            // The later route of the pair moves; the earlier one is the
            // fallback match and the anchor that stays put.
            let (route_id, fallback) = match (&incident.route_b, &incident.route_a) {
                (Some(b), a) => (b.clone(), a.clone()),
                (None, Some(a)) => (a.clone(), None),
                (None, None) => continue,
            };
            targets.push(CriticalTarget {
                bus_id: incident.bus_id.clone(),
                route_id,
                fallback_route_id: fallback,
                prev_route_id: incident.route_a.clone(),
                issue_type: incident.issue_type,
            });
        }
    }

    if let Some(local) = local {
        let mut bus_ids: Vec<&String> = local.keys().collect();
        bus_ids.sort();
        for bus_id in bus_ids {
            for issue in &local[bus_id].errors {
                let issue_type = match issue.kind {
                    IssueKind::Overlap => IncidentType::OverlappingRoutes,
                    IssueKind::PositioningInfeasible => IncidentType::InsufficientTime,
                    _ => continue,
                };
                targets.push(CriticalTarget {
                    bus_id: bus_id.clone(),
                    route_id: issue.route_id.clone(),
                    fallback_route_id: None,
                    prev_route_id: issue.prev_route_id.clone(),
                    issue_type,
                });
            }
        }
    }

    let mut seen = HashSet::new();
    targets.retain(|t| seen.insert((t.bus_id.clone(), t.route_id.clone())));
    targets
}

/// Placement score for inserting `route` into `candidate`: reward the
/// tighter of the two neighboring gaps, penalize buses already loaded.
fn placement_score(candidate: &Bus, route: &Route) -> f64 {
    let index = ScheduleBoard::insertion_index(&candidate.routes, route);
    let gap_before = if index == 0 {
        f64::INFINITY
    } else {
        (route.start_minutes() - candidate.routes[index - 1].end_minutes()) as f64
    };
    let gap_after = if index >= candidate.routes.len() {
        f64::INFINITY
    } else {
        (candidate.routes[index].start_minutes() - route.end_minutes()) as f64
    };
    gap_before.min(gap_after) - ROUTE_LOAD_PENALTY * candidate.routes.len() as f64
}

fn overlaps_any(candidate: &Bus, route: &Route) -> bool {
    let (start, end) = route.interval();
    candidate.routes.iter().any(|r| {
        let (o_start, o_end) = r.interval();
        intervals_overlap(start, end, o_start, o_end)
    })
}

/// Run one reassignment pass over an in-memory working copy of the buses
/// and commit it atomically at the end. Refuses to run while the
/// feasibility service is disconnected.
pub async fn run_critical_reassignment(
    board: &RwLock<ScheduleBoard>,
    service: &dyn FeasibilityService,
    targets: &[CriticalTarget],
    trigger: ReassignmentTrigger,
) -> Result<ReassignmentSummary, AssignError> {
    if service.connection_state() == ConnectionState::Disconnected {
        return Err(AssignError::ServiceDisconnected);
    }

    let mut working: Vec<Bus> = board.read().buses().to_vec();
    let mut summary = ReassignmentSummary::new(trigger);
    let mut relocated: HashSet<String> = HashSet::new();

    for target in targets {
        // A route moves at most once per run.
        if relocated.contains(&target.route_id)
            || target
                .fallback_route_id
                .as_ref()
                .is_some_and(|id| relocated.contains(id))
        {
            summary.skipped += 1;
            continue;
        }

        let Some(source_index) = working.iter().position(|b| b.id == target.bus_id) else {
            summary.unresolved += 1;
            summary.unresolved_items.push(UnresolvedItem {
                route_id: target.route_id.clone(),
                bus_id: target.bus_id.clone(),
                reason: "Bus no encontrado".into(),
            });
            continue;
        };

        let route_position = working[source_index].routes.iter().position(|r| {
            r.id == target.route_id
                || target.fallback_route_id.as_deref() == Some(r.id.as_str())
        });
        let Some(route_position) = route_position else {
            summary.unresolved += 1;
            summary.unresolved_items.push(UnresolvedItem {
                route_id: target.route_id.clone(),
                bus_id: target.bus_id.clone(),
                reason: "Ruta no encontrada en el bus".into(),
            });
            continue;
        };

        let route = working[source_index].routes[route_position].clone();

        // Score every other bus as a placement candidate.
        let mut best: Option<(usize, f64)> = None;
        for (index, candidate) in working.iter().enumerate() {
            if index == source_index || overlaps_any(candidate, &route) {
                continue;
            }
            let check = match service.can_assign_route(&route, &candidate.routes).await {
                Ok(check) => check,
                Err(e) => {
                    warn!("Feasibility check failed for bus {}: {e:#}", candidate.id);
                    continue;
                }
            };
            if !check.feasible {
                continue;
            }
            let score = placement_score(candidate, &route);
            if best.map_or(true, |(_, best_score)| score > best_score) {
                best = Some((index, score));
            }
        }

        working[source_index].routes.remove(route_position);
        let destination = match best {
            Some((index, _)) => {
                working[index].routes.push(route.clone());
                sort_routes_chronological(&mut working[index].routes);
                working[index].id.clone()
            }
            None => {
                // Guaranteed progress: a brand-new bus takes the route.
                let bus_id = next_bus_id(working.iter().map(|b| b.id.as_str()));
                working.push(Bus::with_routes(bus_id.clone(), vec![route.clone()]));
                summary.created += 1;
                bus_id
            }
        };

        relocated.insert(route.id.clone());
        summary.moved += 1;
        summary.moved_items.push(MovedItem {
            route_id: route.id,
            from_bus: target.bus_id.clone(),
            to_bus: destination,
            issue_type: target.issue_type,
        });
    }

    if summary.moved > 0 {
        board.write().replace_buses(working);
    }

    info!(
        "Reassignment pass ({}): {} moved, {} created, {} unresolved, {} skipped",
        summary.trigger.as_str(),
        summary.moved,
        summary.created,
        summary.unresolved,
        summary.skipped
    );
    Ok(summary)
}
