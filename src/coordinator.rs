//! ==============================================================================
//! coordinator.rs - insight prefetch and regeneration
//! ==============================================================================
//!
//! purpose:
//!     keeps the current recommendation batch and daily actionable insight,
//!     requesting each automatically once farm data is ready and again only
//!     when asked to regenerate.
//!
//! relationships:
//!     - reads: store.rs (snapshots + revision channel)
//!     - uses: insight.rs (the actual requests)
//!     - used by: server.rs (view + regenerate endpoints), main.rs (watcher)
//!
//! per kind, a request is made only when no result exists and none is in
//! flight. a failed request stores the fallback content, which counts as an
//! existing result, so data refreshes never re-trigger requests.
//!
//! ==============================================================================

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain::{Priority, Recommendation, SensorReading, WeatherSnapshot};
use crate::insight::InsightRequester;
use crate::store::{FarmSnapshot, FarmStore};

pub const ANALYSIS_FAILED_TITLE: &str = "AI Analysis Failed";
pub const FALLBACK_ACTIONABLE: &str =
    "Could not generate AI insight at this time. Please check your connection and API key.";

/// single-entry batch shown when recommendations could not be generated
pub fn analysis_failed() -> Vec<Recommendation> {
    vec![Recommendation {
        title: ANALYSIS_FAILED_TITLE.to_string(),
        description: "Could not generate AI recommendations at this time. Please check your connection and API key configuration.".to_string(),
        priority: Priority::High,
    }]
}

pub fn is_degraded(batch: &[Recommendation]) -> bool {
    matches!(batch, [only] if only.title == ANALYSIS_FAILED_TITLE)
}

#[derive(Default)]
struct InsightState {
    recommendations: Option<Vec<Recommendation>>,
    actionable: Option<String>,
}

/// holds one kind's pending flag; released however the request ends,
/// including when the awaiting handler is dropped
struct Pending<'a>(&'a AtomicBool);

impl<'a> Pending<'a> {
    fn claim(flag: &'a AtomicBool) -> Option<Self> {
        if flag.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(Self(flag))
    }
}

impl Drop for Pending<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// what the dashboard shows for the insight panels
#[derive(Debug, Clone, Serialize)]
pub struct InsightView {
    pub actionable: Option<String>,
    pub actionable_loading: bool,
    pub recommendations: Vec<Recommendation>,
    pub recommendations_loading: bool,
    pub degraded: bool,
}

pub struct InsightCoordinator {
    requester: InsightRequester,
    store: FarmStore,
    state: RwLock<InsightState>,
    recommendations_pending: AtomicBool,
    actionable_pending: AtomicBool,
}

/// farm data an insight request needs, taken from one snapshot
fn inputs(snapshot: &FarmSnapshot) -> Option<(&[SensorReading], &WeatherSnapshot)> {
    let weather = snapshot.weather.as_deref()?;
    if snapshot.readings.is_empty() {
        return None;
    }
    Some((snapshot.readings.as_slice(), weather))
}

impl InsightCoordinator {
    pub fn new(requester: InsightRequester, store: FarmStore) -> Self {
        Self {
            requester,
            store,
            state: RwLock::new(InsightState::default()),
            recommendations_pending: AtomicBool::new(false),
            actionable_pending: AtomicBool::new(false),
        }
    }

    pub fn requester(&self) -> &InsightRequester {
        &self.requester
    }

    pub async fn view(&self) -> InsightView {
        let state = self.state.read().await;
        let recommendations = state.recommendations.clone().unwrap_or_default();
        InsightView {
            actionable: state.actionable.clone(),
            actionable_loading: self.actionable_pending.load(Ordering::Acquire),
            degraded: is_degraded(&recommendations),
            recommendations,
            recommendations_loading: self.recommendations_pending.load(Ordering::Acquire),
        }
    }

    /// request whichever insight kinds are still missing, once data is ready
    pub async fn prefetch(&self) {
        let snapshot = self.store.snapshot().await;
        if !snapshot.is_ready() {
            return;
        }
        let Some((readings, weather)) = inputs(&snapshot) else {
            return;
        };

        // claim first: a finished fill writes its result before releasing
        let mut batch_claim = Pending::claim(&self.recommendations_pending);
        let mut actionable_claim = Pending::claim(&self.actionable_pending);
        {
            let state = self.state.read().await;
            if state.recommendations.is_some() {
                batch_claim = None;
            }
            if state.actionable.is_some() {
                actionable_claim = None;
            }
        }

        let (want_batch, want_actionable) = (batch_claim.is_some(), actionable_claim.is_some());
        if want_batch || want_actionable {
            info!(want_batch, want_actionable, "[INSIGHT] prefetching");
        }

        tokio::join!(
            async {
                if let Some(_claim) = batch_claim {
                    self.fill_recommendations(readings, weather).await;
                }
            },
            async {
                if let (Some(_claim), Some(latest)) = (actionable_claim, readings.first()) {
                    self.fill_actionable(latest, weather).await;
                }
            },
        );
    }

    /// replace the batch unconditionally; `None` when data is missing or a
    /// request is already running
    pub async fn regenerate_recommendations(&self) -> Option<Vec<Recommendation>> {
        let snapshot = self.store.snapshot().await;
        let (readings, weather) = inputs(&snapshot)?;
        let _claim = Pending::claim(&self.recommendations_pending)?;
        Some(self.fill_recommendations(readings, weather).await)
    }

    pub async fn regenerate_actionable(&self) -> Option<String> {
        let snapshot = self.store.snapshot().await;
        let (readings, weather) = inputs(&snapshot)?;
        let latest = readings.first()?;
        let _claim = Pending::claim(&self.actionable_pending)?;
        Some(self.fill_actionable(latest, weather).await)
    }

    /// caller must hold the `recommendations_pending` claim
    async fn fill_recommendations(&self, readings: &[SensorReading], weather: &WeatherSnapshot) -> Vec<Recommendation> {
        let batch = match self.requester.recommendation_batch(readings, weather).await {
            Ok(batch) => batch,
            Err(e) => {
                warn!(error = %e, "[INSIGHT] recommendation request failed");
                analysis_failed()
            }
        };

        let mut state = self.state.write().await;
        state.recommendations = Some(batch.clone());
        batch
    }

    /// caller must hold the `actionable_pending` claim
    async fn fill_actionable(&self, latest: &SensorReading, weather: &WeatherSnapshot) -> String {
        let text = match self.requester.daily_actionable(latest, weather).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "[INSIGHT] actionable insight request failed");
                FALLBACK_ACTIONABLE.to_string()
            }
        };

        let mut state = self.state.write().await;
        state.actionable = Some(text.clone());
        text
    }

    /// prefetch now and after every store revision until cancelled
    pub async fn watch_store(self: Arc<Self>, cancel: CancellationToken) {
        let mut revisions = self.store.subscribe();
        self.prefetch().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = revisions.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.prefetch().await;
                }
            }
        }
    }
}
