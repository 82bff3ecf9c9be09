//! Positioning refresh scheduler
//!
//! Debounced, cancellable background recomputation of positioning minutes
//! (deadhead drive time) between consecutive routes. Rapid-fire triggers
//! within the debounce window coalesce into one batch; a newer run
//! supersedes an in-flight one ("latest wins", enforced by generation ids,
//! never by timer identity).

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::services::assignment::ScheduleBoard;
use crate::services::feasibility::FeasibilityService;
use crate::services::timeutil::sort_routes_chronological;
use crate::types::Route;

/// Result of one refresh batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshOutcome {
    /// Buses processed.
    pub refreshed: usize,
    /// Buses whose positioning values or order actually changed.
    pub updated: usize,
    /// True when a newer run superseded this one mid-batch. Buses already
    /// processed stay applied; the rest were skipped.
    pub cancelled: bool,
}

/// Progress of the running batch, for UI feedback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshProgress {
    pub done: usize,
    pub total: usize,
}

#[derive(Default)]
struct PendingBatch {
    armed: bool,
    /// `None` = refresh all buses (a full-refresh request drops any
    /// partial accumulation); `Some` = accumulated target ids.
    targets: Option<HashSet<String>>,
    /// Debounce epoch; only the waiter holding the latest epoch fires.
    epoch: u64,
}

#[derive(Clone)]
pub struct PositioningScheduler {
    board: Arc<RwLock<ScheduleBoard>>,
    service: Arc<dyn FeasibilityService>,
    debounce: Duration,
    generation: Arc<AtomicU64>,
    pending: Arc<Mutex<PendingBatch>>,
    progress: Arc<Mutex<RefreshProgress>>,
    shutdown: CancellationToken,
}

impl PositioningScheduler {
    pub fn new(
        board: Arc<RwLock<ScheduleBoard>>,
        service: Arc<dyn FeasibilityService>,
        debounce: Duration,
    ) -> Self {
        Self {
            board,
            service,
            debounce,
            generation: Arc::new(AtomicU64::new(0)),
            pending: Arc::new(Mutex::new(PendingBatch::default())),
            progress: Arc::new(Mutex::new(RefreshProgress::default())),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn progress(&self) -> RefreshProgress {
        *self.progress.lock()
    }

    /// Stop any pending debounce waiters (process shutdown).
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Request a debounced refresh. `None` means all buses and escalates
    /// the whole pending batch; target ids otherwise accumulate until the
    /// window goes quiet.
    pub fn request_refresh(&self, targets: Option<&[String]>) {
        let epoch = {
            let mut pending = self.pending.lock();
            if !pending.armed {
                pending.armed = true;
                pending.targets = Some(HashSet::new());
            }
            match targets {
                None => pending.targets = None,
                Some(ids) => {
                    if let Some(set) = pending.targets.as_mut() {
                        set.extend(ids.iter().cloned());
                    }
                }
            }
            pending.epoch += 1;
            pending.epoch
        };

        let scheduler = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = scheduler.shutdown.cancelled() => return,
                _ = tokio::time::sleep(scheduler.debounce) => {}
            }

            let batch = {
                let mut pending = scheduler.pending.lock();
                if !pending.armed || pending.epoch != epoch {
                    // A later request re-armed the window; its waiter fires.
                    return;
                }
                pending.armed = false;
                pending.targets.take()
            };

            let ids: Option<Vec<String>> = batch.map(|set| set.into_iter().collect());
            scheduler.refresh_positioning_minutes(ids.as_deref()).await;
        });
    }

    /// Run a refresh batch now. `None` refreshes every bus.
    pub async fn refresh_positioning_minutes(&self, targets: Option<&[String]>) -> RefreshOutcome {
        let run_id = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.run_batch(targets, run_id).await
    }

    async fn run_batch(&self, targets: Option<&[String]>, run_id: u64) -> RefreshOutcome {
        let target_ids: Vec<String> = {
            let board = self.board.read();
            match targets {
                Some(ids) => ids.to_vec(),
                None => board.buses().iter().map(|b| b.id.clone()).collect(),
            }
        };

        *self.progress.lock() = RefreshProgress { done: 0, total: target_ids.len() };
        let mut outcome = RefreshOutcome::default();

        for bus_id in target_ids {
            // Cooperative checkpoint, once per bus.
            if self.generation.load(Ordering::SeqCst) != run_id {
                debug!("Positioning refresh superseded before bus {}", bus_id);
                outcome.cancelled = true;
                break;
            }

            let original: Option<Vec<Route>> = self
                .board
                .read()
                .bus(&bus_id)
                .map(|b| b.routes.clone());
            let Some(original) = original else {
                // Bus deleted while the batch was pending.
                self.progress.lock().done += 1;
                continue;
            };

            let mut routes = original.clone();
            sort_routes_chronological(&mut routes);
            if let Some(first) = routes.first_mut() {
                first.positioning_minutes = 0;
            }
            for i in 1..routes.len() {
                let prev = routes[i - 1].clone();
                match self.service.validate_connection(&prev, &routes[i]).await {
                    Ok(estimate) => routes[i].positioning_minutes = estimate.travel_time,
                    Err(e) => {
                        // One failed edge keeps its previous value; the
                        // rest of the bus still refreshes.
                        warn!(
                            "Connection lookup {} → {} failed: {e:#}",
                            prev.id, routes[i].id
                        );
                    }
                }
            }

            if routes != original {
                let mut board = self.board.write();
                if self.generation.load(Ordering::SeqCst) != run_id {
                    outcome.cancelled = true;
                    break;
                }
                if board.set_bus_routes(&bus_id, routes) {
                    outcome.updated += 1;
                }
            }

            outcome.refreshed += 1;
            self.progress.lock().done += 1;
        }

        debug!(
            "Positioning refresh done: {} refreshed, {} updated, cancelled={}",
            outcome.refreshed, outcome.updated, outcome.cancelled
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::feasibility::MockFeasibilityService;
    use crate::types::{Bus, RouteType};
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

    fn setup(
        buses: Vec<Bus>,
        mock: MockFeasibilityService,
    ) -> (Arc<RwLock<ScheduleBoard>>, Arc<MockFeasibilityService>, PositioningScheduler) {
        let board = Arc::new(RwLock::new(ScheduleBoard::new("monday", buses, vec![])));
        let service = Arc::new(mock);
        let scheduler = PositioningScheduler::new(
            Arc::clone(&board),
            Arc::clone(&service) as Arc<dyn FeasibilityService>,
            Duration::from_millis(600),
        );
        (board, service, scheduler)
    }

    fn two_route_bus() -> Vec<Bus> {
        vec![Bus::with_routes(
            "B001",
            vec![route("R1", hm(7, 0), hm(7, 30), 0), route("R2", hm(8, 0), hm(8, 30), 0)],
        )]
    }

    #[tokio::test]
    async fn test_refresh_sets_first_route_to_zero_and_updates_pairs() {
        let mut bus = two_route_bus();
        bus[0].routes[0].positioning_minutes = 99;
        let (board, _, scheduler) =
            setup(bus, MockFeasibilityService::new().with_fixed_travel_minutes(25));

        let outcome = scheduler.refresh_positioning_minutes(Some(&["B001".into()])).await;

        assert_eq!(outcome.refreshed, 1);
        assert_eq!(outcome.updated, 1);
        assert!(!outcome.cancelled);
        let guard = board.read();
        let routes = &guard.bus("B001").unwrap().routes;
        assert_eq!(routes[0].positioning_minutes, 0);
        assert_eq!(routes[1].positioning_minutes, 25);
    }

    #[tokio::test]
    async fn test_refresh_counts_only_changed_buses_as_updated() {
        let buses = vec![
            Bus::with_routes(
                "B001",
                vec![route("R1", hm(7, 0), hm(7, 30), 0), route("R2", hm(8, 0), hm(8, 30), 25)],
            ),
            Bus::with_routes(
                "B002",
                vec![route("R3", hm(7, 0), hm(7, 30), 0), route("R4", hm(8, 0), hm(8, 30), 0)],
            ),
        ];
        let (_, _, scheduler) =
            setup(buses, MockFeasibilityService::new().with_fixed_travel_minutes(25));

        let outcome = scheduler.refresh_positioning_minutes(None).await;

        // B001 already had the right values; only B002 changed.
        assert_eq!(outcome.refreshed, 2);
        assert_eq!(outcome.updated, 1);
        assert_eq!(scheduler.progress(), RefreshProgress { done: 2, total: 2 });
    }

    #[tokio::test]
    async fn test_failed_edge_keeps_previous_value() {
        let mut bus = two_route_bus();
        bus[0].routes[1].positioning_minutes = 17;
        let (board, service, scheduler) =
            setup(bus, MockFeasibilityService::new().with_connection_failures());

        let outcome = scheduler.refresh_positioning_minutes(Some(&["B001".into()])).await;

        // The lookup failed: the edge keeps 17 and nothing else changed.
        assert_eq!(outcome.refreshed, 1);
        assert_eq!(outcome.updated, 0);
        assert_eq!(service.connection_call_count(), 1);
        assert_eq!(board.read().bus("B001").unwrap().routes[1].positioning_minutes, 17);
    }

    #[tokio::test]
    async fn test_superseded_run_aborts_without_processing() {
        let (_, service, scheduler) =
            setup(two_route_bus(), MockFeasibilityService::new().with_fixed_travel_minutes(25));

        // Stamp the run, then let a newer generation supersede it.
        scheduler.generation.store(7, Ordering::SeqCst);
        let outcome = scheduler.run_batch(Some(&["B001".into()]), 3).await;

        assert!(outcome.cancelled);
        assert_eq!(outcome.refreshed, 0);
        assert_eq!(service.connection_call_count(), 0);
    }

    #[tokio::test]
    async fn test_deleted_bus_is_skipped() {
        let (_, _, scheduler) =
            setup(two_route_bus(), MockFeasibilityService::new().with_fixed_travel_minutes(25));

        let outcome = scheduler
            .refresh_positioning_minutes(Some(&["B001".into(), "B099".into()]))
            .await;

        assert_eq!(outcome.refreshed, 1);
        assert!(!outcome.cancelled);
        assert_eq!(scheduler.progress(), RefreshProgress { done: 2, total: 2 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_coalesces_rapid_requests_into_one_batch() {
        let (_, service, scheduler) =
            setup(two_route_bus(), MockFeasibilityService::new().with_fixed_travel_minutes(25));

        // N calls inside the window → exactly one execution.
        scheduler.request_refresh(Some(&["B001".into()]));
        tokio::time::advance(Duration::from_millis(100)).await;
        scheduler.request_refresh(Some(&["B001".into()]));
        tokio::time::advance(Duration::from_millis(100)).await;
        scheduler.request_refresh(Some(&["B001".into()]));

        tokio::time::advance(Duration::from_millis(700)).await;
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }

        // One bus with one pair → one lookup, once.
        assert_eq!(service.connection_call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_all_escalates_pending_batch() {
        let buses = vec![
            Bus::with_routes(
                "B001",
                vec![route("R1", hm(7, 0), hm(7, 30), 0), route("R2", hm(8, 0), hm(8, 30), 0)],
            ),
            Bus::with_routes(
                "B002",
                vec![route("R3", hm(7, 0), hm(7, 30), 0), route("R4", hm(8, 0), hm(8, 30), 0)],
            ),
        ];
        let (board, service, scheduler) =
            setup(buses, MockFeasibilityService::new().with_fixed_travel_minutes(25));

        scheduler.request_refresh(Some(&["B001".into()]));
        scheduler.request_refresh(None); // escalate to all buses

        tokio::time::advance(Duration::from_millis(700)).await;
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }

        // Both buses refreshed: two pairs looked up.
        assert_eq!(service.connection_call_count(), 2);
        let guard = board.read();
        assert_eq!(guard.bus("B001").unwrap().routes[1].positioning_minutes, 25);
        assert_eq!(guard.bus("B002").unwrap().routes[1].positioning_minutes, 25);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_in_separate_windows_run_separately() {
        let (_, service, scheduler) =
            setup(two_route_bus(), MockFeasibilityService::new().with_fixed_travel_minutes(25));

        scheduler.request_refresh(Some(&["B001".into()]));
        tokio::time::advance(Duration::from_millis(700)).await;
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        assert_eq!(service.connection_call_count(), 1);

        scheduler.request_refresh(Some(&["B001".into()]));
        tokio::time::advance(Duration::from_millis(700)).await;
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        assert_eq!(service.connection_call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_pending_waiters() {
        let (_, service, scheduler) =
            setup(two_route_bus(), MockFeasibilityService::new().with_fixed_travel_minutes(25));

        scheduler.request_refresh(Some(&["B001".into()]));
        scheduler.shutdown();

        tokio::time::advance(Duration::from_millis(700)).await;
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        assert_eq!(service.connection_call_count(), 0);
    }
}
