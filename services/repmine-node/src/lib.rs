//! HTTP surface of the reputation miner node.

use axum::{routing::get, Router};
use std::sync::Arc;
use tower::ServiceBuilder;

pub mod handlers;
pub mod state;

pub use state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/:root/:organization/:skill/:participant",
            get(handlers::get_proof),
        )
        .with_state(state)
        .layer(ServiceBuilder::new().into_inner())
}
