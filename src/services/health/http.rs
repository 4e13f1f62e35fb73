//! HTTP handlers for this service.

use axum::extract::State;
use axum::{routing, Json, Router};

use super::{HealthService, HealthStatus};

impl From<HealthService> for Router {
	fn from(svc: HealthService) -> Self {
		Router::new()
			.route("/health", routing::get(get))
			.with_state(svc)
	}
}

/// Report whether the API is healthy.
#[tracing::instrument]
async fn get(State(svc): State<HealthService>) -> Json<HealthStatus> {
	Json(svc.status().await)
}
