//! ==============================================================================
//! server.rs - json api for the farm dashboard
//! ==============================================================================
//!
//! purpose:
//!     exposes the store, the insight coordinator and chat sessions over http
//!     so a dashboard front end can render them.
//!
//! relationships:
//!     - reads: store.rs (snapshots), poller.rs (phase channel)
//!     - uses: coordinator.rs (insights), chat.rs (sessions), history.rs
//!     - spawned by: main.rs
//!
//! endpoints:
//!     GET  /api/status                    load / poll state
//!     GET  /api/soil?from=&to=            ascending readings (optional day range)
//!     GET  /api/soil/latest               newest reading + header label
//!     GET  /api/weather                   weather snapshot
//!     GET  /api/insights                  actionable + recommendations
//!     POST /api/insights/recommendations  regenerate the batch
//!     POST /api/insights/actionable       regenerate the daily insight
//!     POST /api/chat                      ask in a session
//!     GET  /api/chat/:session             session turns
//!
//! ==============================================================================

use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::chat::{ChatSessions, DEFAULT_SESSION_LIMIT};
use crate::coordinator::{InsightCoordinator, InsightView};
use crate::domain::{ChatTurn, Recommendation, SensorReading, WeatherSnapshot};
use crate::history::{self, Nutrients};
use crate::poller::PollPhase;
use crate::store::FarmStore;
use crate::timestamp;

const DEFAULT_SESSION: &str = "default";

// ==============================================================================
// shared state
// ==============================================================================
// everything here is cheap to clone: handles to the store, the coordinator
// and the in-memory chat sessions.

#[derive(Clone)]
pub struct ApiState {
    pub store: FarmStore,
    pub insights: Arc<InsightCoordinator>,
    pub chats: Arc<ChatSessions>,
    pub poll_phase: watch::Receiver<PollPhase>,
}

impl ApiState {
    pub fn new(store: FarmStore, insights: Arc<InsightCoordinator>, poll_phase: watch::Receiver<PollPhase>) -> Self {
        Self {
            store,
            insights,
            chats: Arc::new(ChatSessions::new(DEFAULT_SESSION_LIMIT)),
            poll_phase,
        }
    }

    /// cap the number of chat sessions held at once
    pub fn with_session_limit(mut self, limit: usize) -> Self {
        self.chats = Arc::new(ChatSessions::new(limit));
        self
    }
}

/// error body: {"status": "error", "message": ...}
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    fn not_ready() -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "farm data has not loaded yet")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "status": "error", "message": self.message });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

// ==============================================================================
// web server
// ==============================================================================

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/status", get(status_handler))
        .route("/api/soil", get(soil_handler))
        .route("/api/soil/latest", get(latest_handler))
        .route("/api/weather", get(weather_handler))
        .route("/api/insights", get(insights_handler))
        .route("/api/insights/recommendations", post(recommendations_handler))
        .route("/api/insights/actionable", post(actionable_handler))
        .route("/api/chat", post(chat_handler))
        .route("/api/chat/:session", get(chat_history_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// serve until `shutdown` is cancelled
pub async fn run_server(bind: &str, state: ApiState, shutdown: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {}", bind))?;

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

#[derive(Serialize)]
struct StatusResponse {
    loading: bool,
    load_error: Option<String>,
    poll_error: Option<String>,
    poll_phase: PollPhase,
    last_update_ms: i64,
    revision: u64,
    reading_count: usize,
    last_reading: String,
}

async fn status_handler(State(state): State<ApiState>) -> Json<StatusResponse> {
    let snapshot = state.store.snapshot().await;
    let poll_phase = *state.poll_phase.borrow();
    Json(StatusResponse {
        last_reading: timestamp::last_reading_label(snapshot.latest().map(|r| r.captured_at.as_str())),
        loading: snapshot.loading,
        load_error: snapshot.load_error,
        poll_error: snapshot.poll_error,
        poll_phase,
        last_update_ms: snapshot.last_update_ms,
        revision: snapshot.revision,
        reading_count: snapshot.readings.len(),
    })
}

/// both or neither; YYYY-MM-DD
#[derive(Deserialize)]
struct RangeParams {
    from: Option<String>,
    to: Option<String>,
}

#[derive(Serialize)]
struct SoilResponse {
    readings: Vec<SensorReading>,
    labels: Vec<String>,
    nutrients: Option<Nutrients>,
}

fn parse_day(raw: &str) -> std::result::Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| ApiError::new(StatusCode::BAD_REQUEST, format!("invalid date '{}', expected YYYY-MM-DD", raw)))
}

async fn soil_handler(
    State(state): State<ApiState>,
    Query(params): Query<RangeParams>,
) -> ApiResult<SoilResponse> {
    let snapshot = state.store.snapshot().await;
    let readings = match (params.from.as_deref(), params.to.as_deref()) {
        (Some(from), Some(to)) => history::filter_by_date_range(&snapshot.readings, parse_day(from)?, parse_day(to)?),
        (None, None) => history::chart_series(&snapshot.readings),
        _ => {
            return Err(ApiError::new(
                StatusCode::BAD_REQUEST,
                "both 'from' and 'to' are required for a date range",
            ))
        }
    };

    Ok(Json(SoilResponse {
        labels: readings.iter().map(|r| timestamp::chart_label(&r.captured_at)).collect(),
        nutrients: history::latest_nutrients(&readings),
        readings,
    }))
}

#[derive(Serialize)]
struct LatestResponse {
    reading: Option<SensorReading>,
    label: String,
}

async fn latest_handler(State(state): State<ApiState>) -> Json<LatestResponse> {
    let snapshot = state.store.snapshot().await;
    let reading = snapshot.latest().cloned();
    Json(LatestResponse {
        label: timestamp::last_reading_label(reading.as_ref().map(|r| r.captured_at.as_str())),
        reading,
    })
}

async fn weather_handler(State(state): State<ApiState>) -> ApiResult<WeatherSnapshot> {
    let snapshot = state.store.snapshot().await;
    let weather = snapshot.weather.ok_or_else(ApiError::not_ready)?;
    Ok(Json(WeatherSnapshot::clone(&weather)))
}

async fn insights_handler(State(state): State<ApiState>) -> Json<InsightView> {
    Json(state.insights.view().await)
}

/// data must be present before a regenerate is worth attempting
async fn require_data(state: &ApiState) -> std::result::Result<(), ApiError> {
    let snapshot = state.store.snapshot().await;
    if snapshot.readings.is_empty() || snapshot.weather.is_none() {
        return Err(ApiError::not_ready());
    }
    Ok(())
}

fn already_running() -> ApiError {
    ApiError::new(StatusCode::CONFLICT, "a request of this kind is already in progress")
}

async fn recommendations_handler(State(state): State<ApiState>) -> ApiResult<Vec<Recommendation>> {
    require_data(&state).await?;
    let batch = state
        .insights
        .regenerate_recommendations()
        .await
        .ok_or_else(already_running)?;
    Ok(Json(batch))
}

async fn actionable_handler(State(state): State<ApiState>) -> ApiResult<serde_json::Value> {
    require_data(&state).await?;
    let text = state.insights.regenerate_actionable().await.ok_or_else(already_running)?;
    Ok(Json(serde_json::json!({ "actionable": text })))
}

fn default_session() -> String {
    DEFAULT_SESSION.to_string()
}

#[derive(Deserialize)]
struct ChatRequest {
    #[serde(default = "default_session")]
    session: String,
    message: String,
}

#[derive(Serialize)]
struct ChatResponse {
    session: String,
    reply: ChatTurn,
    turns: Vec<ChatTurn>,
}

async fn chat_handler(State(state): State<ApiState>, Json(request): Json<ChatRequest>) -> ApiResult<ChatResponse> {
    if request.message.trim().is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "message must not be blank"));
    }

    let snapshot = state.store.snapshot().await;
    let weather = snapshot.weather.as_deref().ok_or_else(ApiError::not_ready)?;

    let session = state.chats.open(&request.session).await;
    let mut session = session.lock().await;
    let reply = session
        .ask(state.insights.requester(), &snapshot.readings, weather, &request.message)
        .await
        .cloned()
        .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "message must not be blank"))?;

    Ok(Json(ChatResponse {
        session: request.session,
        reply,
        turns: session.turns().to_vec(),
    }))
}

async fn chat_history_handler(State(state): State<ApiState>, Path(name): Path<String>) -> Json<Vec<ChatTurn>> {
    // the map lock is released before waiting on a session mid-reply
    let turns = match state.chats.find(&name).await {
        Some(session) => session.lock().await.turns().to_vec(),
        None => Vec::new(),
    };
    Json(turns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insight::{GenerationRequest, InsightError, InsightRequester, TextGenerator};
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    struct Scripted;

    #[async_trait]
    impl TextGenerator for Scripted {
        async fn generate(&self, request: GenerationRequest) -> std::result::Result<String, InsightError> {
            if request.response_schema.is_some() {
                return Ok(r#"[
                    {"title": "Irrigate", "description": "Dry.", "priority": "High"},
                    {"title": "Test pH", "description": "Drift.", "priority": "Medium"},
                    {"title": "Mulch", "description": "Heat.", "priority": "Low"}
                ]"#
                .to_string());
            }
            Ok("Irrigate this evening.".to_string())
        }
    }

    fn reading(at: &str, moisture: f64) -> SensorReading {
        SensorReading {
            group_id: 7,
            moisture,
            temperature: 18.0,
            electrical_conductivity: 300.0,
            ph: 6.5,
            nitrogen: 20.0,
            phosphorus: 10.0,
            potassium: 100.0,
            validity_flag: "Y".to_string(),
            captured_at: at.to_string(),
        }
    }

    fn weather() -> WeatherSnapshot {
        WeatherSnapshot {
            temperature: 22,
            humidity: 55.0,
            rainfall_mm: 0.0,
            wind_speed_kmh: 11,
            description: "Partly cloudy".to_string(),
            icon: "partly_cloudy_day".to_string(),
            forecast: Vec::new(),
        }
    }

    fn state_for(store: FarmStore) -> ApiState {
        let requester = InsightRequester::new(Arc::new(Scripted), "Franschhoek");
        let insights = Arc::new(InsightCoordinator::new(requester, store.clone()));
        let (_tx, rx) = watch::channel(PollPhase::Idle);
        ApiState::new(store, insights, rx)
    }

    async fn loaded_state() -> ApiState {
        let store = FarmStore::new();
        store
            .complete_initial_load(
                vec![
                    reading("27-OCT-2025 14:49:04", 30.0),
                    reading("26-OCT-2025 09:00:00", 33.0),
                    reading("24-OCT-2025 18:30:00", 35.0),
                ],
                weather(),
            )
            .await;
        state_for(store)
    }

    async fn call(state: ApiState, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = router(state).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn status_reports_loading_before_data() {
        let (status, body) = call(state_for(FarmStore::new()), get_req("/api/status")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["loading"], true);
        assert_eq!(body["poll_phase"], "idle");
        assert_eq!(body["last_reading"], "No date available");
    }

    #[tokio::test]
    async fn weather_is_unavailable_until_loaded() {
        let (status, body) = call(state_for(FarmStore::new()), get_req("/api/weather")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "error");

        let (status, body) = call(loaded_state().await, get_req("/api/weather")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["description"], "Partly cloudy");
    }

    #[tokio::test]
    async fn soil_series_is_ascending_with_labels() {
        let (status, body) = call(loaded_state().await, get_req("/api/soil")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["readings"][0]["moisture"], 35.0);
        assert_eq!(body["labels"], serde_json::json!(["Oct 24", "Oct 26", "Oct 27"]));
        assert_eq!(body["nutrients"]["nitrogen"], 20.0);
    }

    #[tokio::test]
    async fn soil_range_filters_and_validates() {
        let state = loaded_state().await;
        let (status, body) = call(state.clone(), get_req("/api/soil?from=2025-10-25&to=2025-10-26")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["readings"].as_array().unwrap().len(), 1);

        let (status, _) = call(state.clone(), get_req("/api/soil?from=2025-10-25")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(state, get_req("/api/soil?from=25-10-2025&to=2025-10-26")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn latest_carries_header_label() {
        let (_, body) = call(loaded_state().await, get_req("/api/soil/latest")).await;
        assert_eq!(body["reading"]["corrected_created_at"], "27-OCT-2025 14:49:04");
        assert_eq!(body["label"], "Last reading: October 27, 2025 at 2:49 PM");
    }

    #[tokio::test]
    async fn regenerate_requires_data() {
        let (status, _) = call(
            state_for(FarmStore::new()),
            post_json("/api/insights/recommendations", serde_json::json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let state = loaded_state().await;
        let (status, body) = call(state.clone(), post_json("/api/insights/recommendations", serde_json::json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 3);

        let (_, body) = call(state, get_req("/api/insights")).await;
        assert_eq!(body["recommendations"][0]["title"], "Irrigate");
        assert_eq!(body["degraded"], false);
    }

    #[tokio::test]
    async fn chat_round_trip_keeps_session_history() {
        let state = loaded_state().await;
        let (status, body) = call(
            state.clone(),
            post_json("/api/chat", serde_json::json!({ "session": "north", "message": "Irrigate?" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["reply"]["text"], "Irrigate this evening.");
        assert_eq!(body["turns"].as_array().unwrap().len(), 2);

        let (_, turns) = call(state.clone(), get_req("/api/chat/north")).await;
        assert_eq!(turns[0]["role"], "user");
        assert_eq!(turns[1]["role"], "assistant");

        let (_, empty) = call(state, get_req("/api/chat/default")).await;
        assert_eq!(empty, serde_json::json!([]));
    }

    #[tokio::test]
    async fn blank_chat_message_is_rejected() {
        let (status, _) = call(
            loaded_state().await,
            post_json("/api/chat", serde_json::json!({ "message": "   " })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn history_of_a_busy_session_does_not_block_others() {
        let state = loaded_state().await;
        let north = state.chats.open("north").await;
        let replying = north.lock().await;

        let history = tokio::spawn(call(state.clone(), get_req("/api/chat/north")));
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!history.is_finished());

        let opened = tokio::time::timeout(std::time::Duration::from_secs(1), state.chats.open("south")).await;
        assert!(opened.is_ok());

        drop(replying);
        let (status, turns) = history.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(turns, serde_json::json!([]));
    }

    #[tokio::test]
    async fn session_limit_evicts_old_conversations() {
        let state = loaded_state().await.with_session_limit(1);
        for session in ["north", "south"] {
            let (status, _) = call(
                state.clone(),
                post_json("/api/chat", serde_json::json!({ "session": session, "message": "Irrigate?" })),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }

        assert_eq!(state.chats.len().await, 1);
        let (_, north) = call(state.clone(), get_req("/api/chat/north")).await;
        assert_eq!(north, serde_json::json!([]));
        let (_, south) = call(state, get_req("/api/chat/south")).await;
        assert_eq!(south.as_array().unwrap().len(), 2);
    }
}
