//! Named scheduling thresholds and defaults.
//!
//! The minute thresholds mirror the planner configuration; they are
//! presentation-adjacent tuning values, not business rules.

/// Minimum buffer between consecutive routes before a warning is raised.
pub const SHORT_BUFFER_MINUTES: i32 = 10;

/// Positioning margin at or below which the pair is flagged as tight.
pub const TIGHT_POSITIONING_MARGIN_MINUTES: i32 = 5;

/// Idle gaps at or above this length are collapsible in the timeline view.
pub const COMPRESSION_GAP_MINUTES: i32 = 15;

/// Reassignment score penalty per route already on a candidate bus.
pub const ROUTE_LOAD_PENALTY: f64 = 0.35;

/// Quiescence window for coalescing positioning refresh requests.
pub const POSITIONING_DEBOUNCE_MS: u64 = 600;

/// Width of the zero-padded numeric suffix in bus ids ("B001").
pub const BUS_ID_PAD_WIDTH: usize = 3;

/// Fallback positioning estimate when a route pair has no coordinates.
pub const FALLBACK_POSITIONING_MINUTES: u32 = 10;
