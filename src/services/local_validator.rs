//! Local schedule validator
//!
//! Synchronous, pure projection of the bus→routes assignment. Walks each
//! bus's routes in chronological order and classifies every adjacent pair
//! into at most one issue. Recomputed in full after every mutation; holds
//! no state.

use std::collections::HashMap;

use crate::defaults::{SHORT_BUFFER_MINUTES, TIGHT_POSITIONING_MARGIN_MINUTES};
use crate::types::{Bus, BusValidation, Issue, IssueKind};

/// Classify adjacent-pair issues for every bus.
///
/// Route lists are assumed already chronological (the assignment engine
/// maintains that invariant). The first matching branch wins:
/// overlap → positioning infeasible → positioning tight → short buffer.
pub fn validate(buses: &[Bus]) -> HashMap<String, BusValidation> {
    buses
        .iter()
        .map(|bus| (bus.id.clone(), validate_bus(bus)))
        .collect()
}

fn validate_bus(bus: &Bus) -> BusValidation {
    let mut result = BusValidation::default();

    for index in 1..bus.routes.len() {
        let prev = &bus.routes[index - 1];
        let curr = &bus.routes[index];

        let buffer = curr.start_minutes() - prev.end_minutes();
        let positioning = curr.positioning_minutes as i32;
        let margin = buffer - positioning;

        let issue = if buffer < 0 {
            Some(Issue {
                kind: IssueKind::Overlap,
                message: format!(
                    "Solapamiento de horario entre {} y {} ({} min)",
                    prev.code,
                    curr.code,
                    -buffer
                ),
                route_index: index,
                route_id: curr.id.clone(),
                prev_route_id: Some(prev.id.clone()),
                window_minutes: Some(buffer),
                positioning_minutes: None,
                margin_minutes: None,
            })
        } else if positioning > 0 && margin < 0 {
            Some(Issue {
                kind: IssueKind::PositioningInfeasible,
                message: format!(
                    "Posicionamiento inviable hacia {}: se necesitan {} min y solo hay {} min",
                    curr.code, positioning, buffer
                ),
                route_index: index,
                route_id: curr.id.clone(),
                prev_route_id: Some(prev.id.clone()),
                window_minutes: Some(buffer),
                positioning_minutes: Some(curr.positioning_minutes),
                margin_minutes: Some(margin),
            })
        } else if positioning > 0 && margin <= TIGHT_POSITIONING_MARGIN_MINUTES {
            Some(Issue {
                kind: IssueKind::PositioningTight,
                message: format!(
                    "Margen de posicionamiento ajustado hacia {} ({} min)",
                    curr.code, margin
                ),
                route_index: index,
                route_id: curr.id.clone(),
                prev_route_id: Some(prev.id.clone()),
                window_minutes: Some(buffer),
                positioning_minutes: Some(curr.positioning_minutes),
                margin_minutes: Some(margin),
            })
        } else if buffer < SHORT_BUFFER_MINUTES {
            Some(Issue {
                kind: IssueKind::ShortBuffer,
                message: format!(
                    "Intervalo corto entre {} y {} ({} min)",
                    prev.code, curr.code, buffer
                ),
                route_index: index,
                route_id: curr.id.clone(),
                prev_route_id: Some(prev.id.clone()),
                window_minutes: Some(buffer),
                positioning_minutes: None,
                margin_minutes: None,
            })
        } else {
            None
        };

        if let Some(issue) = issue {
            result.push(issue);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Route, RouteType};
    use chrono::NaiveTime;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn route(id: &str, start: NaiveTime, end: NaiveTime, positioning: u32) -> Route {
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
            positioning_minutes: positioning,
            capacity_needed: 0,
            vehicle_capacity_min: None,
            vehicle_capacity_max: None,
            vehicle_capacity_range: None,
            start_location: None,
            end_location: None,
            contract_id: None,
        }
    }

    fn single_bus(routes: Vec<Route>) -> Vec<Bus> {
        vec![Bus::with_routes("B001", routes)]
    }

    #[test]
    fn test_empty_and_single_route_are_clean() {
        let results = validate(&single_bus(vec![]));
        assert!(!results["B001"].has_errors());

        let results = validate(&single_bus(vec![route("R1", hm(8, 0), hm(8, 30), 0)]));
        let v = &results["B001"];
        assert!(v.errors.is_empty() && v.warnings.is_empty());
    }

    #[test]
    fn test_overlap_is_error() {
        let results = validate(&single_bus(vec![
            route("R1", hm(8, 0), hm(8, 30), 0),
            route("R2", hm(8, 20), hm(8, 50), 0),
        ]));
        let v = &results["B001"];
        assert_eq!(v.errors.len(), 1);
        assert_eq!(v.errors[0].kind, IssueKind::Overlap);
        assert_eq!(v.errors[0].route_id, "R2");
        assert_eq!(v.errors[0].prev_route_id.as_deref(), Some("R1"));
        assert_eq!(v.errors[0].window_minutes, Some(-10));
        assert_eq!(v.routes["R2"].errors.len(), 1);
    }

    #[test]
    fn test_positioning_infeasible_is_error() {
        // Buffer 30, positioning 40 → cannot reach the start in time.
        let results = validate(&single_bus(vec![
            route("R1", hm(7, 0), hm(7, 30), 0),
            route("R2", hm(8, 0), hm(8, 30), 40),
        ]));
        let v = &results["B001"];
        assert_eq!(v.errors.len(), 1);
        assert_eq!(v.errors[0].kind, IssueKind::PositioningInfeasible);
        assert_eq!(v.errors[0].margin_minutes, Some(-10));
        assert_eq!(v.errors[0].positioning_minutes, Some(40));
    }

    #[test]
    fn test_positioning_tight_is_warning() {
        // Buffer 30, positioning 25 → margin 5 → tight.
        let results = validate(&single_bus(vec![
            route("R1", hm(7, 0), hm(7, 30), 0),
            route("R2", hm(8, 0), hm(8, 30), 25),
        ]));
        let v = &results["B001"];
        assert!(v.errors.is_empty());
        assert_eq!(v.warnings.len(), 1);
        assert_eq!(v.warnings[0].kind, IssueKind::PositioningTight);
        assert_eq!(v.warnings[0].margin_minutes, Some(5));
    }

    #[test]
    fn test_short_buffer_is_warning() {
        // Buffer 8, no positioning.
        let results = validate(&single_bus(vec![
            route("R1", hm(7, 0), hm(7, 30), 0),
            route("R2", hm(7, 38), hm(8, 10), 0),
        ]));
        let v = &results["B001"];
        assert!(v.errors.is_empty());
        assert_eq!(v.warnings.len(), 1);
        assert_eq!(v.warnings[0].kind, IssueKind::ShortBuffer);
        assert_eq!(v.warnings[0].window_minutes, Some(8));
    }

    #[test]
    fn test_only_first_matching_branch_applies() {
        // Overlap AND positioning set: overlap wins, positioning ignored.
        let results = validate(&single_bus(vec![
            route("R1", hm(8, 0), hm(8, 30), 0),
            route("R2", hm(8, 20), hm(8, 50), 60),
        ]));
        let v = &results["B001"];
        assert_eq!(v.errors.len(), 1);
        assert_eq!(v.errors[0].kind, IssueKind::Overlap);
        assert!(v.warnings.is_empty());
    }

    #[test]
    fn test_comfortable_buffer_with_positioning_is_clean() {
        // Buffer 30, positioning 20 → margin 10 > 5 and buffer ≥ 10.
        let results = validate(&single_bus(vec![
            route("R1", hm(7, 0), hm(7, 30), 0),
            route("R2", hm(8, 0), hm(8, 30), 20),
        ]));
        let v = &results["B001"];
        assert!(v.errors.is_empty() && v.warnings.is_empty());
    }

    #[test]
    fn test_zero_positioning_falls_through_to_short_buffer() {
        // Buffer 5, positioning 0 → short buffer, not positioning tight.
        let results = validate(&single_bus(vec![
            route("R1", hm(7, 0), hm(7, 30), 0),
            route("R2", hm(7, 35), hm(8, 10), 0),
        ]));
        let v = &results["B001"];
        assert_eq!(v.warnings.len(), 1);
        assert_eq!(v.warnings[0].kind, IssueKind::ShortBuffer);
    }

    #[test]
    fn test_multiple_buses_validated_independently() {
        let buses = vec![
            Bus::with_routes(
                "B001",
                vec![route("R1", hm(8, 0), hm(8, 30), 0), route("R2", hm(8, 20), hm(8, 50), 0)],
            ),
            Bus::with_routes("B002", vec![route("R3", hm(9, 0), hm(9, 30), 0)]),
        ];
        let results = validate(&buses);
        assert!(results["B001"].has_errors());
        assert!(!results["B002"].has_errors());
    }
}
