use std::sync::Arc;

use axum::{
    routing::{get, patch, post},
    Router,
};
use herald_core::config::HeraldConfig;
use herald_lock::LeaseBackend;
use herald_store::CampaignStore;
use herald_users::UserStore;
use herald_worker::WorkerMetrics;

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: HeraldConfig,
    pub campaigns: CampaignStore,
    pub users: UserStore,
    pub metrics: Arc<WorkerMetrics>,
    pub lease: Arc<dyn LeaseBackend>,
}

impl AppState {
    pub fn new(
        config: HeraldConfig,
        campaigns: CampaignStore,
        users: UserStore,
        metrics: Arc<WorkerMetrics>,
        lease: Arc<dyn LeaseBackend>,
    ) -> Self {
        Self {
            config,
            campaigns,
            users,
            metrics,
            lease,
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route(
            "/campaigns",
            get(crate::http::campaigns::list_campaigns).post(crate::http::campaigns::create_campaign),
        )
        .route(
            "/campaigns/{id}",
            patch(crate::http::campaigns::update_campaign),
        )
        .route(
            "/campaigns/{id}/queue",
            post(crate::http::campaigns::queue_campaign),
        )
        .route(
            "/campaigns/{id}/pause",
            post(crate::http::campaigns::pause_campaign),
        )
        .route(
            "/campaigns/{id}/resume",
            post(crate::http::campaigns::resume_campaign),
        )
        .route(
            "/campaigns/{id}/cancel",
            post(crate::http::campaigns::cancel_campaign),
        )
        .route(
            "/campaigns/{id}/messages",
            get(crate::http::campaigns::list_messages),
        )
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
