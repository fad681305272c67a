//! HTTP command channel.

pub mod sessions;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use orchid_domain::Error;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/sessions", post(sessions::create).get(sessions::list))
        .route("/sessions/:id", get(sessions::show))
        .route("/sessions/:id/events", get(sessions::events))
        .route("/sessions/:id/state", get(sessions::state_snapshot))
        .route("/sessions/:id/input", post(sessions::input))
        .route("/sessions/:id/pause", post(sessions::pause))
        .route("/sessions/:id/resume", post(sessions::resume))
        .route("/sessions/:id/fork", post(sessions::fork))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Map kernel errors onto HTTP status codes.
pub fn error_response(error: Error) -> Response {
    let status = match &error {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Conflict(_) => StatusCode::CONFLICT,
        Error::Usage(_) | Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(serde_json::json!({ "error": error.to_string() })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_mapping() {
        let cases = [
            (Error::NotFound("x".into()), StatusCode::NOT_FOUND),
            (Error::Conflict("x".into()), StatusCode::CONFLICT),
            (Error::Usage("x".into()), StatusCode::BAD_REQUEST),
            (Error::Validation("x".into()), StatusCode::BAD_REQUEST),
            (Error::Timeout("x".into()), StatusCode::REQUEST_TIMEOUT),
            (
                Error::Internal("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, expected) in cases {
            assert_eq!(error_response(error).status(), expected);
        }
    }
}
