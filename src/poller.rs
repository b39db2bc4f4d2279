//! ==============================================================================
//! poller.rs - initial load + freshness poller
//! ==============================================================================
//!
//! purpose:
//!     keeps the store's sensor readings current without churning it.
//!
//! ```text
//!     Idle ──tick──▶ Fetching ──ok, new head──▶ Updated ───┐
//!                       │     ──ok, same head─▶ Unchanged ─┼──▶ Idle
//!                       └─────err────────────▶ Failed ────┘
//! ```
//!
//! rules:
//!     - one fetch in flight at a time; a cycle requested meanwhile is skipped
//!     - a failed cycle records the error and keeps the held data
//!     - cancel() stops new cycles immediately; a fetch already in flight
//!       finishes but its result is thrown away, even once it is queued on
//!       the store's write lock
//!     - polling refreshes sensors only; weather comes from the initial load,
//!       which is retried on the poll interval until it succeeds
//!
//! relationships:
//!     - uses: gateway.rs (SensorSource / WeatherSource)
//!     - writes: store.rs (the only writer besides the initial load)
//!     - started by: main.rs
//!
//! ==============================================================================

use anyhow::Context;
use serde::Serialize;
use std::cmp::Reverse;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::SensorReading;
use crate::gateway::{GatewayError, SensorSource, WeatherSource};
use crate::store::{FarmStore, Freshness};

/// user-facing message stored when the initial load fails
pub const LOAD_FAILED_MESSAGE: &str = "Failed to fetch data. Please try again later.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PollPhase {
    Idle,
    Fetching,
    Updated,
    Unchanged,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Updated,
    Unchanged,
    Failed(String),
    /// another cycle was in flight, or the poller is cancelled
    Skipped,
    /// fetch completed after cancellation; result dropped
    Discarded,
}

/// newest first by normalized capture time; equal instants keep feed order
pub fn sort_newest_first(readings: &mut [SensorReading]) {
    readings.sort_by_cached_key(|r| Reverse(r.captured_instant()));
}

// ==============================================================================
// initial load
// ==============================================================================

/// fetch sensors and weather together; both must succeed to populate the store
pub async fn initial_load(
    sensors: &dyn SensorSource,
    weather: &dyn WeatherSource,
    store: &FarmStore,
) -> Result<(), GatewayError> {
    store.begin_initial_load().await;

    match tokio::try_join!(sensors.fetch_readings(), weather.fetch_weather()) {
        Ok((mut readings, snapshot)) => {
            sort_newest_first(&mut readings);
            info!(
                readings = readings.len(),
                weather = %snapshot.description,
                "[LOAD] initial data loaded"
            );
            store.complete_initial_load(readings, snapshot).await;
            Ok(())
        }
        Err(e) => {
            error!("[LOAD] initial load failed: {}", e);
            store.fail_initial_load(LOAD_FAILED_MESSAGE).await;
            Err(e)
        }
    }
}

/// repeat [`initial_load`] every `retry` until it succeeds or `cancel` fires
///
/// returns whether the store was populated.
pub async fn load_until_ready(
    sensors: &dyn SensorSource,
    weather: &dyn WeatherSource,
    store: &FarmStore,
    retry: Duration,
    cancel: &CancellationToken,
) -> bool {
    loop {
        if initial_load(sensors, weather, store).await.is_ok() {
            return true;
        }
        info!("[LOAD] retrying initial load in {}s", retry.as_secs());

        tokio::select! {
            _ = cancel.cancelled() => return false,
            _ = tokio::time::sleep(retry) => {}
        }
    }
}

// ==============================================================================
// freshness poller
// ==============================================================================

pub struct Poller {
    source: Arc<dyn SensorSource>,
    store: FarmStore,
    cancel: CancellationToken,
    in_flight: AtomicBool,
    phase_tx: watch::Sender<PollPhase>,
    show_sensor_data: bool,
}

/// clears the in-flight flag however the cycle ends
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Poller {
    pub fn new(source: Arc<dyn SensorSource>, store: FarmStore, cancel: CancellationToken) -> Self {
        let (phase_tx, _) = watch::channel(PollPhase::Idle);
        Self {
            source,
            store,
            cancel,
            in_flight: AtomicBool::new(false),
            phase_tx,
            show_sensor_data: false,
        }
    }

    /// log the newest reading whenever a cycle replaces the data
    pub fn with_sensor_logging(mut self, enabled: bool) -> Self {
        self.show_sensor_data = enabled;
        self
    }

    pub fn phase(&self) -> watch::Receiver<PollPhase> {
        self.phase_tx.subscribe()
    }

    pub fn current_phase(&self) -> PollPhase {
        *self.phase_tx.borrow()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// one freshness cycle: fetch, sort, compare, replace or discard
    pub async fn run_cycle(&self) -> CycleOutcome {
        if self.cancel.is_cancelled() {
            return CycleOutcome::Skipped;
        }
        if self.in_flight.swap(true, Ordering::AcqRel) {
            debug!("[POLL] previous cycle still in flight - skipping");
            return CycleOutcome::Skipped;
        }
        let _guard = InFlight(&self.in_flight);

        let outcome = self.fetch_and_apply().await;
        self.phase_tx.send_replace(PollPhase::Idle);
        outcome
    }

    async fn fetch_and_apply(&self) -> CycleOutcome {
        self.phase_tx.send_replace(PollPhase::Fetching);
        let fetched = self.source.fetch_readings().await;

        if self.cancel.is_cancelled() {
            debug!("[POLL] cancelled during fetch - discarding result");
            return CycleOutcome::Discarded;
        }

        match fetched {
            Ok(mut readings) => {
                sort_newest_first(&mut readings);
                let newest = readings.first().cloned();

                match self.store.apply_poll_unless_cancelled(readings, &self.cancel).await {
                    None => {
                        debug!("[POLL] cancelled before apply - discarding result");
                        CycleOutcome::Discarded
                    }
                    Some(Freshness::Updated) => {
                        self.phase_tx.send_replace(PollPhase::Updated);
                        if let (true, Some(r)) = (self.show_sensor_data, newest) {
                            info!(
                                "[SOIL] Moisture: {:.1}% | Temp: {:.1}°C | pH: {:.2} | N/P/K: {}/{}/{} @ {}",
                                r.moisture, r.temperature, r.ph, r.nitrogen, r.phosphorus, r.potassium, r.captured_at
                            );
                        }
                        CycleOutcome::Updated
                    }
                    Some(Freshness::Unchanged) => {
                        self.phase_tx.send_replace(PollPhase::Unchanged);
                        debug!("[POLL] no newer reading");
                        CycleOutcome::Unchanged
                    }
                }
            }
            Err(e) => {
                warn!("[POLL] ⚠ sensor poll failed: {}", e);
                self.store.record_poll_failure(e.to_string()).await;
                self.phase_tx.send_replace(PollPhase::Failed);
                CycleOutcome::Failed(e.to_string())
            }
        }
    }

    /// spawn the interval loop; the first cycle runs one period after start
    pub fn start(self: Arc<Self>, period: Duration) -> PollerHandle {
        let task = tokio::spawn(Arc::clone(&self).run(period));
        PollerHandle { poller: self, task }
    }

    async fn run(self: Arc<Self>, period: Duration) {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("[POLL] polling sensor feed every {}s", period.as_secs());

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("[POLL] poller shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
            }
        }
    }
}

/// handle to a running poller task
pub struct PollerHandle {
    poller: Arc<Poller>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    pub fn poller(&self) -> &Arc<Poller> {
        &self.poller
    }

    /// stop scheduling cycles; returns immediately
    pub fn cancel(&self) {
        self.poller.cancel();
    }

    /// cancel and wait for the loop (and any in-flight fetch) to finish
    pub async fn shutdown(self) -> anyhow::Result<()> {
        self.cancel();
        self.task.await.context("poller task failed to join")
    }
}
