//! Axum router configuration with middleware.
//!
//! All routes are under `/api/v1/`.
//! Middleware: CORS, HTTP tracing.

use axum::Router;
use axum::extract::State;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/workflows", get(handlers::instance::list_workflow_types))
        // Instance lifecycle
        .route("/instances", post(handlers::instance::start_instance))
        .route("/instances/{id}", get(handlers::instance::get_instance))
        .route(
            "/instances/{id}/resume",
            post(handlers::instance::resume_instance),
        )
        .route(
            "/instances/{id}/reconcile",
            post(handlers::instance::reconcile_instance),
        )
        // Decisions
        .route(
            "/instances/{id}/central-decision",
            post(handlers::instance::central_decision),
        )
        .route(
            "/instances/{id}/department-decisions/{branch}",
            post(handlers::instance::department_decision),
        )
        .route(
            "/instances/{id}/level-decision",
            post(handlers::instance::level_decision),
        )
        // Projection and history
        .route("/instances/{id}/record", get(handlers::instance::get_record))
        .route(
            "/instances/{id}/transitions",
            get(handlers::instance::list_transitions),
        )
        .route(
            "/instances/{id}/checkpoints",
            get(handlers::instance::list_checkpoints),
        )
        .route(
            "/instances/{id}/checkpoints/{sequence}",
            get(handlers::instance::get_checkpoint),
        );

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - Liveness plus a database round trip.
async fn health_check(State(state): State<AppState>) -> axum::Json<serde_json::Value> {
    let database = match ping_database(&state).await {
        Ok(()) => "ok".to_string(),
        Err(e) => {
            tracing::warn!("health check database ping failed: {e}");
            format!("error: {e}")
        }
    };
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "database": database,
        "workflows": state.engine.workflow_types(),
    }))
}

async fn ping_database(state: &AppState) -> Result<(), String> {
    state.db_pool.ping().await.map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::test_state;

    #[tokio::test]
    async fn router_builds_with_state() {
        let state = test_state().await;
        let _router = build_router(state);
    }

    #[tokio::test]
    async fn health_reports_version() {
        let state = test_state().await;
        let axum::Json(body) = health_check(State(state)).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["database"], "ok");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }
}
