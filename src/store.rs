//! ==============================================================================
//! store.rs - shared farm data store
//! ==============================================================================
//!
//! holds the newest sensor readings and weather snapshot shared between:
//! - the initial load and the freshness poller (the only writers)
//! - the insight coordinator and the web server (readers)
//!
//! readings and weather sit behind `Arc` so readers take cheap snapshots and
//! an unchanged poll leaves the very same allocation in place. every data
//! replacement bumps a revision published on a watch channel.
//!
//! ==============================================================================

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;

use crate::domain::{SensorReading, WeatherSnapshot};

/// outcome of offering a freshly fetched (sorted) sequence to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// newest capture time differs (or nothing was held): sequence replaced
    Updated,
    /// newest capture time identical, or fetch empty: prior state kept
    Unchanged,
}

struct StoreState {
    readings: Arc<Vec<SensorReading>>,
    weather: Option<Arc<WeatherSnapshot>>,
    loading: bool,
    load_error: Option<String>,
    poll_error: Option<String>,
    /// unix timestamp (ms) of last data replacement
    last_update_ms: i64,
    revision: u64,
}

/// read-only view handed to consumers
#[derive(Clone, Debug)]
pub struct FarmSnapshot {
    /// newest first
    pub readings: Arc<Vec<SensorReading>>,
    pub weather: Option<Arc<WeatherSnapshot>>,
    pub loading: bool,
    pub load_error: Option<String>,
    pub poll_error: Option<String>,
    pub last_update_ms: i64,
    pub revision: u64,
}

impl FarmSnapshot {
    pub fn latest(&self) -> Option<&SensorReading> {
        self.readings.first()
    }

    /// readings and weather present and no load in progress
    pub fn is_ready(&self) -> bool {
        !self.loading && !self.readings.is_empty() && self.weather.is_some()
    }
}

#[derive(Clone)]
pub struct FarmStore {
    inner: Arc<RwLock<StoreState>>,
    revision_tx: Arc<watch::Sender<u64>>,
}

impl Default for FarmStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FarmStore {
    /// empty store, in the loading state until the initial load settles
    pub fn new() -> Self {
        let (revision_tx, _) = watch::channel(0);
        Self {
            inner: Arc::new(RwLock::new(StoreState {
                readings: Arc::new(Vec::new()),
                weather: None,
                loading: true,
                load_error: None,
                poll_error: None,
                last_update_ms: 0,
                revision: 0,
            })),
            revision_tx: Arc::new(revision_tx),
        }
    }

    pub async fn snapshot(&self) -> FarmSnapshot {
        let state = self.inner.read().await;
        FarmSnapshot {
            readings: Arc::clone(&state.readings),
            weather: state.weather.clone(),
            loading: state.loading,
            load_error: state.load_error.clone(),
            poll_error: state.poll_error.clone(),
            last_update_ms: state.last_update_ms,
            revision: state.revision,
        }
    }

    /// receiver that observes a new value on every data replacement
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision_tx.subscribe()
    }

    pub async fn begin_initial_load(&self) {
        let mut state = self.inner.write().await;
        state.loading = true;
        state.load_error = None;
    }

    /// install both halves of a successful initial load
    pub async fn complete_initial_load(&self, readings: Vec<SensorReading>, weather: WeatherSnapshot) {
        let mut state = self.inner.write().await;
        state.readings = Arc::new(readings);
        state.weather = Some(Arc::new(weather));
        state.loading = false;
        state.load_error = None;
        self.bump(&mut state);
    }

    pub async fn fail_initial_load(&self, message: impl Into<String>) {
        let mut state = self.inner.write().await;
        state.loading = false;
        state.load_error = Some(message.into());
    }

    /// compare-and-replace for one freshness cycle
    ///
    /// `sorted` must already be newest first. the comparison looks only at the
    /// raw capture string of the head record.
    pub async fn apply_poll(&self, sorted: Vec<SensorReading>) -> Freshness {
        let mut state = self.inner.write().await;
        self.apply_locked(&mut state, sorted)
    }

    /// [`apply_poll`](Self::apply_poll) for a poller that may be cancelled
    ///
    /// cancellation is checked once the write lock is held; `None` means the
    /// sequence was dropped and the store left untouched.
    pub async fn apply_poll_unless_cancelled(
        &self,
        sorted: Vec<SensorReading>,
        cancel: &CancellationToken,
    ) -> Option<Freshness> {
        let mut state = self.inner.write().await;
        if cancel.is_cancelled() {
            return None;
        }
        Some(self.apply_locked(&mut state, sorted))
    }

    fn apply_locked(&self, state: &mut StoreState, sorted: Vec<SensorReading>) -> Freshness {
        state.poll_error = None;

        let changed = match (sorted.first(), state.readings.first()) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(fetched), Some(held)) => fetched.captured_at != held.captured_at,
        };

        if !changed {
            return Freshness::Unchanged;
        }

        state.readings = Arc::new(sorted);
        self.bump(state);
        Freshness::Updated
    }

    pub async fn record_poll_failure(&self, message: impl Into<String>) {
        self.inner.write().await.poll_error = Some(message.into());
    }

    fn bump(&self, state: &mut StoreState) {
        state.revision += 1;
        state.last_update_ms = Utc::now().timestamp_millis();
        self.revision_tx.send_replace(state.revision);
    }
}
