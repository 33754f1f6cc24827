//! HTTP façade over the recall service
//!
//! Thin axum layer: every handler validates its payload, delegates to the
//! shared [`RecallService`] handle, and serializes the service result
//! untouched. The service handle is injected as router state; there is no
//! process-global instance.

mod dto;

pub use dto::{
    PeopleAssociationDto, RecallRequestDto, SearchRequestDto, TimeAssociationDto,
    TimeRangeDto, TopicAssociationDto,
};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::MnemoError;
use crate::recall::{RecallRequest, RecallService};
use crate::types::RecallKind;

impl IntoResponse for MnemoError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = Json(serde_json::json!({
            "error": status.canonical_reason().unwrap_or("error"),
            "message": self.to_string(),
            "retryable": self.is_retryable(),
        }));
        (status, body).into_response()
    }
}

/// Shared per-process state injected into handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<RecallService>,
    pub started: Instant,
}

impl AppState {
    pub fn new(service: Arc<RecallService>) -> Self {
        Self { service, started: Instant::now() }
    }
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/recall", post(recall))
        .route("/associate/topic", post(associate_topic))
        .route("/associate/people", post(associate_people))
        .route("/associate/time", post(associate_time))
        .route("/search", post(search))
        .route("/stats", get(stats))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until shutdown
pub async fn serve(state: AppState, addr: SocketAddr) -> std::io::Result<()> {
    let app = router(state);
    tracing::info!("recall api listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

async fn recall(
    State(state): State<AppState>,
    Json(dto): Json<RecallRequestDto>,
) -> Result<impl IntoResponse, MnemoError> {
    let req = RecallRequest {
        context: dto.context,
        kind: dto.recall_type.parse::<RecallKind>()?,
        top_k: dto.top_k,
        min_relevance: dto.min_relevance,
        time_range: dto.time_range.map(|r| (r.start, r.end)),
    };
    let response = state.service.recall(&req).await?;
    Ok(Json(response))
}

async fn associate_topic(
    State(state): State<AppState>,
    Json(dto): Json<TopicAssociationDto>,
) -> Result<impl IntoResponse, MnemoError> {
    let response = state
        .service
        .recall_by_topic(&dto.topic, dto.top_k, dto.min_relevance)
        .await?;
    Ok(Json(response))
}

async fn associate_people(
    State(state): State<AppState>,
    Json(dto): Json<PeopleAssociationDto>,
) -> Result<impl IntoResponse, MnemoError> {
    let response = state
        .service
        .recall_by_people(&dto.person, dto.top_k, dto.include_mentions)
        .await?;
    Ok(Json(response))
}

async fn associate_time(
    State(state): State<AppState>,
    Json(dto): Json<TimeAssociationDto>,
) -> Result<impl IntoResponse, MnemoError> {
    let response = state
        .service
        .recall_by_time(dto.reference_time, dto.direction.parse()?, dto.time_window, dto.top_k)
        .await?;
    Ok(Json(response))
}

async fn search(
    State(state): State<AppState>,
    Json(dto): Json<SearchRequestDto>,
) -> Result<impl IntoResponse, MnemoError> {
    let response = state.service.search(&dto.query, dto.top_k, &dto.filters).await?;
    Ok(Json(response))
}

async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.stats())
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": crate::VERSION,
        "store_loaded": !state.service.index().store().is_empty(),
        "uptime_seconds": state.started.elapsed().as_secs_f64(),
    }))
}
