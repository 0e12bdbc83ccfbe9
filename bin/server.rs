// Occupancy Monitor - Web Server
// REST API with Axum over the shared monitor

use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use occupancy_monitor::{
    display::people_label, entity_age, status_label, EntityStatus, FloorSummary, Monitor,
    MonitorConfig, OccupancySummary, ReconciledEntity, ReconciliationReport, RefreshOutcome,
    RoomFilter, SqliteSource,
};
use serde::Serialize;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_ADDR: &str = "0.0.0.0:3000";
const ADDR_ENV: &str = "OCCUPANCY_ADDR";

/// Shared application state
#[derive(Clone)]
struct AppState {
    monitor: Arc<Monitor>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

fn reply<T: Serialize>(status: StatusCode, body: ApiResponse<T>) -> Response {
    (status, Json(body)).into_response()
}

/// Room card (simplified for API)
#[derive(Serialize)]
struct RoomResponse {
    #[serde(flatten)]
    room: ReconciledEntity,
    status: EntityStatus,
    label: String,
    people: String,
    age: String,
}

impl RoomResponse {
    fn from_entity(room: &ReconciledEntity, now: chrono::DateTime<Utc>) -> Self {
        Self {
            status: room.status(),
            label: status_label(room.status()),
            people: people_label(room.count),
            age: entity_age(room, now),
            room: room.clone(),
        }
    }
}

#[derive(Serialize)]
struct SummaryResponse {
    cycle_id: String,
    reconciled_at: String,
    #[serde(flatten)]
    summary: OccupancySummary,
    unmatched_refs: Vec<String>,
}

fn rooms(rooms: &[ReconciledEntity]) -> Vec<RoomResponse> {
    let now = Utc::now();
    rooms.iter().map(|r| RoomResponse::from_entity(r, now)).collect()
}

/// Report or a 503 explaining why there is none yet
fn current_report(state: &AppState) -> Result<Arc<ReconciliationReport>, Response> {
    state.monitor.current().ok_or_else(|| {
        let message = match state.monitor.last_failure() {
            Some(failure) => match failure.hint {
                Some(hint) => format!("{} ({})", failure.message, hint),
                None => failure.message,
            },
            None => "No data yet, first refresh pending".to_string(),
        };
        reply(StatusCode::SERVICE_UNAVAILABLE, ApiResponse::<()>::err(message))
    })
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/rooms - Every registered room, registry order
async fn get_rooms(State(state): State<AppState>) -> Response {
    match current_report(&state) {
        Ok(report) => reply(StatusCode::OK, ApiResponse::ok(rooms(&report.entities))),
        Err(response) => response,
    }
}

/// GET /api/rooms/:id - One room by id (case-insensitive)
async fn get_room(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let report = match current_report(&state) {
        Ok(report) => report,
        Err(response) => return response,
    };

    // Decode URL-encoded room id ("Home%20Economics%20Room")
    let decoded = urlencoding::decode(&id)
        .unwrap_or_else(|_| id.clone().into())
        .into_owned();

    match report.get(&decoded) {
        Some(room) => reply(StatusCode::OK, ApiResponse::ok(RoomResponse::from_entity(room, Utc::now()))),
        None => reply(
            StatusCode::NOT_FOUND,
            ApiResponse::<()>::err(format!("Unknown room: {}", decoded)),
        ),
    }
}

/// GET /api/filters/:filter - all | occupied | empty
async fn filter_rooms(State(state): State<AppState>, Path(filter): Path<String>) -> Response {
    let Some(filter) = RoomFilter::parse(&filter) else {
        return reply(
            StatusCode::BAD_REQUEST,
            ApiResponse::<()>::err(format!("Unknown filter: {} (all, occupied, empty)", filter)),
        );
    };

    match current_report(&state) {
        Ok(report) => reply(StatusCode::OK, ApiResponse::ok(rooms(&filter.apply(&report.entities)))),
        Err(response) => response,
    }
}

/// GET /api/summary - Building totals
async fn get_summary(State(state): State<AppState>) -> Response {
    match current_report(&state) {
        Ok(report) => reply(
            StatusCode::OK,
            ApiResponse::ok(SummaryResponse {
                cycle_id: report.cycle_id.to_string(),
                reconciled_at: report.reconciled_at.to_rfc3339(),
                summary: report.summary.clone(),
                unmatched_refs: report.unmatched_refs.clone(),
            }),
        ),
        Err(response) => response,
    }
}

/// GET /api/floors - Per-floor overview
async fn get_floors(State(state): State<AppState>) -> Response {
    match current_report(&state) {
        Ok(report) => reply(StatusCode::OK, ApiResponse::ok(FloorSummary::from_entities(&report.entities))),
        Err(response) => response,
    }
}

/// GET /api/cameras - Latest reading per camera number
async fn get_cameras(State(state): State<AppState>) -> Response {
    match current_report(&state) {
        Ok(report) => reply(StatusCode::OK, ApiResponse::ok(report.cameras.clone())),
        Err(response) => response,
    }
}

/// GET /api/status - Monitor state, last failure included
async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::ok(state.monitor.status()))
}

/// POST /api/refresh - Run a cycle now
async fn trigger_refresh(State(state): State<AppState>) -> Response {
    let monitor = Arc::clone(&state.monitor);
    let outcome = match tokio::task::spawn_blocking(move || monitor.refresh(Utc::now())).await {
        Ok(outcome) => outcome,
        Err(e) => {
            return reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiResponse::<()>::err(format!("refresh task failed: {}", e)),
            )
        }
    };

    match outcome {
        RefreshOutcome::Updated(report) => reply(
            StatusCode::OK,
            ApiResponse::ok(serde_json::json!({
                "cycle_id": report.cycle_id,
                "reporting": report.summary.reporting,
            })),
        ),
        RefreshOutcome::Skipped => reply(
            StatusCode::CONFLICT,
            ApiResponse::<()>::err("Refresh already in progress"),
        ),
        RefreshOutcome::Failed(failure) => {
            let message = failure.message.clone();
            reply(
                StatusCode::BAD_GATEWAY,
                ApiResponse {
                    success: false,
                    data: Some(failure),
                    error: Some(message),
                },
            )
        }
    }
}

// ============================================================================
// Background refresh
// ============================================================================

async fn refresh_loop(monitor: Arc<Monitor>, period: std::time::Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        let monitor = Arc::clone(&monitor);
        if let Err(e) = tokio::task::spawn_blocking(move || monitor.refresh(Utc::now())).await {
            warn!(error = %e, "background refresh task panicked");
        }
    }
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("occupancy_monitor=info,tower_http=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    println!("🌐 Occupancy Monitor - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config = MonitorConfig::load()?;
    let source = SqliteSource::open(&config)?;
    let monitor = Arc::new(Monitor::from_config(&config, Box::new(source))?);
    info!(
        source = monitor.source_name(),
        rooms = monitor.registry().len(),
        refresh_seconds = config.refresh_interval_seconds,
        "monitor ready"
    );

    tokio::spawn(refresh_loop(Arc::clone(&monitor), config.refresh_interval()));

    let state = AppState { monitor };

    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/rooms", get(get_rooms))
        .route("/rooms/:id", get(get_room))
        .route("/filters/:filter", get(filter_rooms))
        .route("/summary", get(get_summary))
        .route("/floors", get(get_floors))
        .route("/cameras", get(get_cameras))
        .route("/status", get(get_status))
        .route("/refresh", post(trigger_refresh))
        .with_state(state);

    // Build main router
    let app = Router::new()
        .nest("/api", api_routes)
        .fallback_service(ServeDir::new("web"))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        );

    let addr = std::env::var(ADDR_ENV).unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    println!("\n🚀 Server running on http://{}", addr);
    println!("   API: http://{}/api/rooms", addr);
    println!("   UI:  http://{}", addr);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
