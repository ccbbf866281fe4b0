//! HTTP route definitions

use axum::{
    extract::{Path, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{MatchId, MatchState, MatchSummary, QuickJoinError};
use crate::util::time::{started_at, uptime_secs};

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_handler))
        .route("/matches", get(list_matches_handler).post(create_match_handler))
        .route("/matches/join", post(join_handler))
        .route("/matches/leave", post(leave_handler))
        .route("/matches/:id", get(get_match_handler))
        .route("/matches/:id/start", post(force_start_handler))
        .route("/matches/:id/end", post(force_end_handler))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    started_at: Option<DateTime<Utc>>,
    server_time: DateTime<Utc>,
    active_matches: usize,
    active_players: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        started_at: started_at(),
        server_time: Utc::now(),
        active_matches: state.registry.active_matches(),
        active_players: state.registry.total_players(),
    })
}

// ============================================================================
// Match directory
// ============================================================================

async fn list_matches_handler(State(state): State<AppState>) -> Json<Vec<MatchSummary>> {
    Json(state.registry.summaries())
}

async fn get_match_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MatchSummary>, AppError> {
    let game = state
        .registry
        .get(&MatchId::from(id.clone()))
        .ok_or_else(|| AppError::NotFound(format!("No match {}", id)))?;
    Ok(Json(game.summary()))
}

async fn create_match_handler(State(state): State<AppState>) -> Json<MatchSummary> {
    let game = state.registry.create_match(state.config.match_defaults.clone());
    Json(game.summary())
}

// ============================================================================
// Membership endpoints
// ============================================================================

#[derive(Deserialize)]
struct JoinRequest {
    player_id: Uuid,
    display_name: String,
    /// Join this match; otherwise any open match
    #[serde(default)]
    match_id: Option<String>,
}

#[derive(Serialize)]
struct JoinResponse {
    match_id: MatchId,
    state: MatchState,
    player_count: usize,
}

async fn join_handler(
    State(state): State<AppState>,
    Json(req): Json<JoinRequest>,
) -> Result<Json<JoinResponse>, AppError> {
    if state.join_limiter.check().is_err()
        || state.player_join_limiter.check_key(&req.player_id).is_err()
    {
        return Err(AppError::RateLimited);
    }

    let display_name = req.display_name.trim();
    if display_name.is_empty() {
        return Err(AppError::BadRequest("display_name must not be empty".to_string()));
    }

    let game = match req.match_id {
        Some(id) => {
            let game = state
                .registry
                .get(&MatchId::from(id.clone()))
                .ok_or_else(|| AppError::NotFound(format!("No match {}", id)))?;
            if !state.registry.join_match(req.player_id, display_name, &game) {
                return Err(AppError::Conflict("Join rejected".to_string()));
            }
            game
        }
        None => state.registry.quick_join(req.player_id, display_name)?,
    };

    info!(player_id = %req.player_id, match_id = %game.id(), "Join via HTTP");

    Ok(Json(JoinResponse {
        match_id: game.id().clone(),
        state: game.state(),
        player_count: game.player_count(),
    }))
}

#[derive(Deserialize)]
struct LeaveRequest {
    player_id: Uuid,
}

#[derive(Serialize)]
struct LeaveResponse {
    left: bool,
}

async fn leave_handler(
    State(state): State<AppState>,
    Json(req): Json<LeaveRequest>,
) -> Json<LeaveResponse> {
    Json(LeaveResponse {
        left: state.registry.leave_match(&req.player_id),
    })
}

// ============================================================================
// Admin endpoints
// ============================================================================

#[derive(Serialize)]
struct AdminResponse {
    applied: bool,
    state: MatchState,
}

async fn force_start_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AdminResponse>, AppError> {
    let game = state
        .registry
        .get(&MatchId::from(id.clone()))
        .ok_or_else(|| AppError::NotFound(format!("No match {}", id)))?;
    let applied = game.force_start();
    Ok(Json(AdminResponse {
        applied,
        state: game.state(),
    }))
}

async fn force_end_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AdminResponse>, AppError> {
    let game = state
        .registry
        .get(&MatchId::from(id.clone()))
        .ok_or_else(|| AppError::NotFound(format!("No match {}", id)))?;
    let applied = game.force_end();
    Ok(Json(AdminResponse {
        applied,
        state: game.state(),
    }))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Too many requests")]
    RateLimited,

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl From<QuickJoinError> for AppError {
    fn from(err: QuickJoinError) -> Self {
        match err {
            QuickJoinError::AlreadyInMatch(_) => AppError::Conflict(err.to_string()),
            QuickJoinError::NoOpenSlot(_) => AppError::Unavailable(err.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many requests".to_string(),
            ),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
