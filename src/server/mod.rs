//! HTTP surface: health probe and plate generation.

mod error;
mod routes;
mod state;

pub use error::ApiError;
pub use routes::generate::GenerateForm;
pub use routes::health::HealthResponse;
pub use state::{spawn_model_load, AppState, ModelSlot, SharedState};

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Default cap on the request body, in bytes.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// Build the application router.
pub fn router(state: SharedState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(routes::health::health_check))
        .route("/generate", post(routes::generate::generate))
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}
