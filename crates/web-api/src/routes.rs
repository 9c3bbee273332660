use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use domain::status::truncate_to_second;
use tower_http::trace::TraceLayer;

use crate::{error::ApiError, sse, state::AppState};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api", api_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/status", get(status))
        .route("/events", get(sse::events))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

/// 当前时刻的服务状态快照
async fn status(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state
        .status
        .populated(truncate_to_second(state.clock.now()));
    let body = serde_json::to_string_pretty(&snapshot).map_err(|err| {
        tracing::error!(error = %err, "服务状态序列化失败");
        ApiError::internal_server_error("cannot serialize status")
    })?;

    Ok(([(header::CONTENT_TYPE, "application/json")], body))
}
