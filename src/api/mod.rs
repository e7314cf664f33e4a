//! HTTP API
//!
//! JSON routes over the verifier and the content store. Verification failures of
//! the learner's code are 200 responses with `success: false`; only requests that
//! cannot be checked at all get an error status.

pub mod error;
pub mod handlers;

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::verify::Verifier;

pub use error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub verifier: Verifier,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/courses", get(handlers::list_courses))
        .route("/api/courses/{course_id}", get(handlers::get_course))
        .route("/api/courses/{course_id}/lessons", get(handlers::list_lessons))
        .route(
            "/api/courses/{course_id}/lessons/{lesson_id}",
            get(handlers::get_lesson),
        )
        .route(
            "/api/courses/{course_id}/exercises",
            get(handlers::list_exercises),
        )
        .route(
            "/api/courses/{course_id}/exercises/{exercise_id}",
            get(handlers::get_exercise),
        )
        .route("/api/courses/{course_id}/audit", get(handlers::audit_course))
        .route("/api/execute-code", post(handlers::execute_code))
        .route("/api/check-exercise", post(handlers::check_exercise))
        .route(
            "/submit_exercise/{course_id}/{exercise_id}",
            post(handlers::submit_exercise),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

pub async fn serve(addr: &str, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Course judge API listening on {}", addr);
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
