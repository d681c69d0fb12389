//! # api-adapters
//!
//! HTTP surface of the fleet. The axum implementation sits behind the
//! `web-axum` feature; metrics rendering is always available.

pub mod metrics;

#[cfg(feature = "web-axum")]
pub mod actor;
#[cfg(feature = "web-axum")]
pub mod error;
#[cfg(feature = "web-axum")]
pub mod handlers;
#[cfg(feature = "web-axum")]
pub mod middleware;

#[cfg(feature = "web-axum")]
pub use web::{router, AppState};

#[cfg(feature = "web-axum")]
mod web {
    use std::sync::Arc;

    use axum::routing::{get, post, put};
    use axum::Router;
    use services::FleetServices;

    use crate::handlers;
    use crate::metrics::Metrics;
    use crate::middleware;

    /// State shared by every handler.
    #[derive(Clone)]
    pub struct AppState {
        pub services: FleetServices,
        pub metrics: Arc<Metrics>,
    }

    impl AppState {
        pub fn new(services: FleetServices) -> Self {
            let metrics = Arc::new(Metrics::new(services.gateway.counters()));
            Self { services, metrics }
        }
    }

    /// Mounts the API under `/api` next to `/metrics` and `/healthz`.
    pub fn router(state: AppState) -> Router {
        let api = Router::new()
            .route("/ads/{id}/decision", post(handlers::decide_ad))
            .route("/ads/{id}/assignments", post(handlers::assign_ad).delete(handlers::detach_ad))
            .route("/ads/{id}/artifact", put(handlers::replace_artifact))
            .route("/ads/{id}/resubmission", post(handlers::resubmit_ad))
            .route("/ad-requests/{id}/ads", post(handlers::submit_ad))
            .route("/health-reports", post(handlers::ingest_health))
            .route("/monitors/{id}/box", put(handlers::bind_box))
            .route("/monitors/{id}/displayed-ads", get(handlers::displayed_ads))
            .route("/monitors/{id}/rotation", put(handlers::reorder_rotation))
            .route("/subscriptions/{id}/expire", post(handlers::expire_subscription));

        Router::new()
            .nest("/api", api)
            .route("/metrics", get(handlers::metrics))
            .route("/healthz", get(handlers::healthz))
            .layer(middleware::propagate_request_id())
            .layer(middleware::trace_layer())
            .layer(middleware::set_request_id())
            .layer(middleware::cors_policy())
            .with_state(state)
    }
}
