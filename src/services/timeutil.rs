//! Time and identifier utilities
//!
//! Pure helpers shared by the normalizer, validator and assignment engine:
//! "HH:MM" ↔ minutes conversion, the half-open interval overlap test, and
//! bus-id normalization/generation.

use anyhow::{Context, Result};
use chrono::{NaiveTime, Timelike};

use crate::defaults::BUS_ID_PAD_WIDTH;
use crate::types::Route;

/// Parse a "HH:MM" time-of-day string ("HH:MM:SS" accepted).
pub fn parse_hhmm(raw: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw.trim(), "%H:%M:%S"))
        .with_context(|| format!("Invalid time of day: '{raw}'"))
}

pub fn time_to_minutes(t: NaiveTime) -> i32 {
    (t.num_seconds_from_midnight() / 60) as i32
}

pub fn minutes_to_hhmm(minutes: i32) -> String {
    let clamped = minutes.clamp(0, 24 * 60 - 1);
    format!("{:02}:{:02}", clamped / 60, clamped % 60)
}

/// Half-open interval intersection: touching endpoints do not overlap.
pub fn intervals_overlap(a_start: i32, a_end: i32, b_start: i32, b_end: i32) -> bool {
    a_start < b_end && a_end > b_start
}

// ---------------------------------------------------------------------------
// Bus ids
// ---------------------------------------------------------------------------

/// Numeric suffix of a bus id, tolerant of prefixes and padding
/// ("B001" → 1, "bus-12" → 12).
pub fn bus_numeric_suffix(id: &str) -> Option<u32> {
    let digits: String = id.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Canonical "B" + zero-padded id. Ids with no numeric part are
/// uppercased and trimmed as-is.
pub fn normalize_bus_id(raw: &str) -> String {
    match bus_numeric_suffix(raw) {
        Some(n) => format!("B{:0width$}", n, width = BUS_ID_PAD_WIDTH),
        None => raw.trim().to_uppercase(),
    }
}

/// Next free bus id: highest existing numeric suffix plus one.
pub fn next_bus_id<'a>(existing: impl IntoIterator<Item = &'a str>) -> String {
    let max = existing
        .into_iter()
        .filter_map(bus_numeric_suffix)
        .max()
        .unwrap_or(0);
    format!("B{:0width$}", max + 1, width = BUS_ID_PAD_WIDTH)
}

// ---------------------------------------------------------------------------
// Route lists
// ---------------------------------------------------------------------------

/// Chronological order: start time, then end time, then code.
pub fn sort_routes_chronological(routes: &mut [Route]) {
    routes.sort_by(|a, b| {
        a.start_minutes()
            .cmp(&b.start_minutes())
            .then(a.end_minutes().cmp(&b.end_minutes()))
            .then_with(|| a.code.cmp(&b.code))
    });
}

/// Sort chronologically and drop later duplicates of the same route id.
pub fn sort_and_dedupe_routes(mut routes: Vec<Route>) -> Vec<Route> {
    sort_routes_chronological(&mut routes);
    let mut seen = std::collections::HashSet::new();
    routes.retain(|r| seen.insert(r.id.clone()));
    routes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RouteType;

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

    // ── parsing ──

    #[test]
    fn test_parse_hhmm() {
        assert_eq!(parse_hhmm("08:30").unwrap(), hm(8, 30));
        assert_eq!(parse_hhmm(" 08:30:00 ").unwrap(), hm(8, 30));
        assert!(parse_hhmm("25:00").is_err());
        assert!(parse_hhmm("bus").is_err());
    }

    #[test]
    fn test_minutes_roundtrip() {
        assert_eq!(time_to_minutes(hm(8, 30)), 510);
        assert_eq!(minutes_to_hhmm(510), "08:30");
        assert_eq!(minutes_to_hhmm(0), "00:00");
        assert_eq!(minutes_to_hhmm(24 * 60 + 5), "23:59");
    }

    // ── overlap ──

    #[test]
    fn test_overlap_partial() {
        // [480,510) vs [500,540)
        assert!(intervals_overlap(480, 510, 500, 540));
    }

    #[test]
    fn test_overlap_contained() {
        assert!(intervals_overlap(480, 540, 490, 500));
    }

    #[test]
    fn test_touching_endpoints_do_not_overlap() {
        assert!(!intervals_overlap(480, 510, 510, 540));
        assert!(!intervals_overlap(510, 540, 480, 510));
    }

    #[test]
    fn test_disjoint_do_not_overlap() {
        assert!(!intervals_overlap(480, 510, 520, 540));
    }

    // ── bus ids ──

    #[test]
    fn test_bus_numeric_suffix() {
        assert_eq!(bus_numeric_suffix("B001"), Some(1));
        assert_eq!(bus_numeric_suffix("bus-12"), Some(12));
        assert_eq!(bus_numeric_suffix("B"), None);
    }

    #[test]
    fn test_normalize_bus_id() {
        assert_eq!(normalize_bus_id("b1"), "B001");
        assert_eq!(normalize_bus_id("B012"), "B012");
        assert_eq!(normalize_bus_id("bus 7"), "B007");
        assert_eq!(normalize_bus_id(" reserva "), "RESERVA");
    }

    #[test]
    fn test_next_bus_id() {
        assert_eq!(next_bus_id(["B001", "B003"]), "B004");
        assert_eq!(next_bus_id([]), "B001");
        assert_eq!(next_bus_id(["RESERVA"]), "B001");
    }

    // ── route lists ──

    #[test]
    fn test_sort_chronological_with_ties() {
        let mut routes = vec![
            route("C", hm(8, 0), hm(9, 0)),
            route("A", hm(8, 0), hm(8, 30)),
            route("B", hm(7, 0), hm(7, 30)),
            route("D", hm(8, 0), hm(9, 0)),
        ];
        sort_routes_chronological(&mut routes);
        let ids: Vec<&str> = routes.iter().map(|r| r.id.as_str()).collect();
        // Same start: shorter end first; same start+end: code order.
        assert_eq!(ids, vec!["B", "A", "C", "D"]);
    }

    #[test]
    fn test_sort_and_dedupe_keeps_one_per_id() {
        let routes = vec![
            route("R1", hm(9, 0), hm(9, 30)),
            route("R2", hm(7, 0), hm(7, 30)),
            route("R1", hm(8, 0), hm(8, 30)),
        ];
        let out = sort_and_dedupe_routes(routes);
        let ids: Vec<&str> = out.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["R2", "R1"]);
    }
}
