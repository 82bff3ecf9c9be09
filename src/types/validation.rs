//! Validation types
//!
//! Local validator output (`BusValidation`) is a pure projection of the
//! current assignment, recomputed in full after every mutation. The
//! whole-schedule report (`GlobalValidationReport`) comes from the external
//! validation service and is cached until any bus mutates.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Classification of a locally detected adjacent-pair issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    Overlap,
    PositioningInfeasible,
    PositioningTight,
    ShortBuffer,
}

impl IssueKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            IssueKind::Overlap => "overlap",
            IssueKind::PositioningInfeasible => "positioning_infeasible",
            IssueKind::PositioningTight => "positioning_tight",
            IssueKind::ShortBuffer => "short_buffer",
        }
    }

    pub const fn is_error(self) -> bool {
        matches!(self, IssueKind::Overlap | IssueKind::PositioningInfeasible)
    }
}

/// A single locally detected issue on a consecutive route pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub kind: IssueKind,
    pub message: String,
    pub route_index: usize,
    pub route_id: String,
    #[serde(default)]
    pub prev_route_id: Option<String>,
    /// Wall-clock buffer between the pair, in minutes.
    #[serde(default)]
    pub window_minutes: Option<i32>,
    #[serde(default)]
    pub positioning_minutes: Option<u32>,
    /// `buffer - positioning` for positioning issues.
    #[serde(default)]
    pub margin_minutes: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteIssues {
    pub errors: Vec<Issue>,
    pub warnings: Vec<Issue>,
}

/// Validation result for one bus.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BusValidation {
    pub errors: Vec<Issue>,
    pub warnings: Vec<Issue>,
    /// Per-route issue lists, keyed by route id.
    pub routes: HashMap<String, RouteIssues>,
}

impl BusValidation {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn push(&mut self, issue: Issue) {
        let entry = self.routes.entry(issue.route_id.clone()).or_default();
        if issue.kind.is_error() {
            entry.errors.push(issue.clone());
            self.errors.push(issue);
        } else {
            entry.warnings.push(issue.clone());
            self.warnings.push(issue);
        }
    }
}

// ---------------------------------------------------------------------------
// External whole-schedule report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentSeverity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentType {
    InsufficientTime,
    OverlappingRoutes,
    InvalidTimeRange,
    ShortBuffer,
    #[serde(other)]
    Other,
}

impl IncidentType {
    pub const fn as_str(self) -> &'static str {
        match self {
            IncidentType::InsufficientTime => "INSUFFICIENT_TIME",
            IncidentType::OverlappingRoutes => "OVERLAPPING_ROUTES",
            IncidentType::InvalidTimeRange => "INVALID_TIME_RANGE",
            IncidentType::ShortBuffer => "SHORT_BUFFER",
            IncidentType::Other => "OTHER",
        }
    }

    /// Incident types severe enough to trigger automatic reassignment.
    pub const fn is_critical(self) -> bool {
        matches!(
            self,
            IncidentType::InsufficientTime
                | IncidentType::OverlappingRoutes
                | IncidentType::InvalidTimeRange
        )
    }
}

/// One finding from the whole-schedule validation service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub day: String,
    pub bus_id: String,
    #[serde(default)]
    pub route_a: Option<String>,
    #[serde(default)]
    pub route_b: Option<String>,
    pub issue_type: IncidentType,
    pub severity: IncidentSeverity,
    pub message: String,
    #[serde(default)]
    pub suggestion: Option<String>,
    #[serde(default)]
    pub time_available: Option<i32>,
    #[serde(default)]
    pub travel_time: Option<i32>,
    #[serde(default)]
    pub buffer_minutes: Option<i32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub incidents_total: usize,
    pub incidents_error: usize,
    pub total_buses: usize,
}

/// Whole-schedule validation report. Stale the instant any bus mutates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalValidationReport {
    pub report_id: Uuid,
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub persisted: bool,
    pub summary: ReportSummary,
    pub incidents: Vec<Incident>,
}

impl GlobalValidationReport {
    pub fn new(incidents: Vec<Incident>, total_buses: usize, persisted: bool) -> Self {
        let incidents_error = incidents
            .iter()
            .filter(|i| i.severity == IncidentSeverity::Error)
            .count();
        Self {
            report_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            persisted,
            summary: ReportSummary {
                incidents_total: incidents.len(),
                incidents_error,
                total_buses,
            },
            incidents,
        }
    }

    /// Error-severity incidents for one day.
    pub fn error_incidents_for_day<'a>(&'a self, day: &'a str) -> impl Iterator<Item = &'a Incident> {
        self.incidents
            .iter()
            .filter(move |i| i.severity == IncidentSeverity::Error && i.day == day)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(kind: IssueKind, route_id: &str) -> Issue {
        Issue {
            kind,
            message: "x".into(),
            route_index: 1,
            route_id: route_id.into(),
            prev_route_id: None,
            window_minutes: None,
            positioning_minutes: None,
            margin_minutes: None,
        }
    }

    #[test]
    fn test_issue_kind_severity_split() {
        assert!(IssueKind::Overlap.is_error());
        assert!(IssueKind::PositioningInfeasible.is_error());
        assert!(!IssueKind::PositioningTight.is_error());
        assert!(!IssueKind::ShortBuffer.is_error());
    }

    #[test]
    fn test_bus_validation_push_routes_by_severity() {
        let mut v = BusValidation::default();
        v.push(issue(IssueKind::Overlap, "R2"));
        v.push(issue(IssueKind::ShortBuffer, "R3"));

        assert!(v.has_errors());
        assert_eq!(v.errors.len(), 1);
        assert_eq!(v.warnings.len(), 1);
        assert_eq!(v.routes["R2"].errors.len(), 1);
        assert_eq!(v.routes["R3"].warnings.len(), 1);
    }

    #[test]
    fn test_incident_type_wire_names() {
        let json = serde_json::to_string(&IncidentType::InsufficientTime).unwrap();
        assert_eq!(json, "\"INSUFFICIENT_TIME\"");
        let parsed: IncidentType = serde_json::from_str("\"SOMETHING_NEW\"").unwrap();
        assert_eq!(parsed, IncidentType::Other);
    }

    #[test]
    fn test_incident_type_criticality() {
        assert!(IncidentType::OverlappingRoutes.is_critical());
        assert!(IncidentType::InvalidTimeRange.is_critical());
        assert!(!IncidentType::ShortBuffer.is_critical());
        assert!(!IncidentType::Other.is_critical());
    }

    #[test]
    fn test_report_summary_counts_errors() {
        let incident = |sev| Incident {
            day: "monday".into(),
            bus_id: "B001".into(),
            route_a: Some("R1".into()),
            route_b: Some("R2".into()),
            issue_type: IncidentType::InsufficientTime,
            severity: sev,
            message: "x".into(),
            suggestion: None,
            time_available: None,
            travel_time: None,
            buffer_minutes: None,
        };
        let report = GlobalValidationReport::new(
            vec![incident(IncidentSeverity::Error), incident(IncidentSeverity::Warning)],
            3,
            false,
        );

        assert_eq!(report.summary.incidents_total, 2);
        assert_eq!(report.summary.incidents_error, 1);
        assert_eq!(report.summary.total_buses, 3);
        assert_eq!(report.error_incidents_for_day("monday").count(), 1);
        assert_eq!(report.error_incidents_for_day("friday").count(), 0);
    }
}
