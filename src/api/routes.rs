//! Route Definitions

use super::handlers::*;
use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;

/// Build the API router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    let mut router = Router::new().route("/health", get(health_handler));
    if state.services.config().monitoring.enable_metrics {
        router = router.route("/metrics", get(metrics_handler));
    }

    router
        // Ingestion
        .route(
            "/api/communities/:community/subjects",
            post(track_subject_handler).get(list_subjects_handler),
        )
        .route(
            "/api/communities/:community/subjects/:subject_id",
            delete(untrack_subject_handler),
        )
        .route(
            "/api/communities/:community/subjects/:subject_id/active-match",
            get(active_match_handler),
        )
        .route("/api/communities/:community/matches", post(record_match_handler))
        .route("/api/matches/:match_id/finish", post(finish_match_handler))
        // Presentation
        .route("/api/communities/:community/wagers", post(place_wager_handler))
        .route("/api/communities/:community/members/:member", get(account_handler))
        .route(
            "/api/communities/:community/members/:member/progress",
            get(progress_handler),
        )
        .with_state(state)
}
