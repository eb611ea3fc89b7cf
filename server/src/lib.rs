pub mod config;
pub mod enrich;
pub mod error;
pub mod metrics;
pub mod routes;
pub mod state;
pub mod validation;

use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response, Router};

pub use crate::config::ServerConfig;
pub use crate::state::AppState;

/// Request ID middleware for tracing
pub async fn add_request_id(mut request: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    // a hyphenated UUID is always a valid header value
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        request.headers_mut().insert("x-request-id", value.clone());
        let mut response = next.run(request).await;
        response.headers_mut().insert("x-request-id", value);
        return response;
    }
    next.run(request).await
}

/// Application routes with request IDs attached; the transport middleware
/// (tracing, rate limiting, timeouts, CORS) is added by the binary.
pub fn build_router(state: AppState) -> Router {
    let api = routes::api_routes();

    Router::new()
        .merge(api.clone()) // root paths
        .nest("/api", api) // /api prefix
        .layer(axum::middleware::from_fn(add_request_id))
        .with_state(state)
}
