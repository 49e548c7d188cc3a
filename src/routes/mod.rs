//! Router assembly: HTTP endpoints, exam WebSocket, CORS, and HTTP tracing.

use std::sync::Arc;

use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{warn, Level};

use crate::config::AllowedOrigins;
use crate::state::AppState;

pub mod http;
pub mod ws;

/// Build the application router with:
/// - liveness at `/` and `/api/test`, health at `/api/health`
/// - question generation and explanations under `/api/...`
/// - disabled payment stubs (501)
/// - exam WebSocket at `/ws/exam`
/// - CORS restricted to the configured frontend origins
/// - HTTP trace layer (per-request spans w/ method, path, status, latency)
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.origins);

    Router::new()
        .route("/", get(http::http_root))
        .route("/api/test", get(http::http_test))
        .route("/api/health", get(http::http_health))
        .route("/api/questions", post(http::http_post_questions))
        .route("/api/explain", post(http::http_post_explain))
        .route("/api/payment/create-order", post(http::http_payment_create_order))
        .route("/api/payment/verify", post(http::http_payment_verify))
        .route("/ws/exam", get(ws::ws_upgrade))
        .with_state(state)
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}

fn cors_layer(origins: &AllowedOrigins) -> CorsLayer {
    let allow_origin = match origins {
        AllowedOrigins::Any => AllowOrigin::from(Any),
        wildcard if wildcard.has_wildcards() => {
            let origins = wildcard.clone();
            AllowOrigin::predicate(move |origin: &HeaderValue, _parts| {
                origin.to_str().map(|o| origins.allows(o)).unwrap_or(false)
            })
        }
        AllowedOrigins::List(list) => {
            let values: Vec<HeaderValue> = list
                .iter()
                .filter_map(|o| match HeaderValue::from_str(o) {
                    Ok(v) => Some(v),
                    Err(e) => {
                        warn!(target: "edutest", origin = %o, error = %e, "Ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            AllowOrigin::list(values)
        }
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}
