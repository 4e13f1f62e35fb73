#![doc = include_str!("../README.md")]

use anyhow::Context;
use axum::{routing, Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;

mod error;

#[doc(inline)]
pub use error::{Error, Result};

mod config;

#[doc(inline)]
pub use config::Config;

pub mod logging;

pub mod crypto;
pub mod authorization;
pub mod store;
pub mod users;
pub mod services;
pub mod middleware;
pub mod grpc;

#[cfg(test)]
pub(crate) mod testing;

use services::auth::OAuthClient;
use services::{AuthService, HealthService, SessionService};
use store::RedisStore;
use users::PostgresUserRepository;

/// Runs the API until it receives a shutdown signal.
pub async fn run(config: Config) -> anyhow::Result<()> {
	let tcp_listener = TcpListener::bind(config.socket_addr())
		.await
		.context("bind tcp listener")?;

	let router = server(config).await?;

	tracing::info!("listening on {}", tcp_listener.local_addr()?);

	axum::serve(tcp_listener, router)
		.with_graceful_shutdown(shutdown_signal())
		.await
		.context("run http server")
}

/// Connects to the backing stores and builds the API's router.
///
/// Failing to reach either store is a startup error; we would rather die
/// loudly than accept requests we cannot serve.
pub async fn server(config: Config) -> anyhow::Result<Router> {
	let store = RedisStore::connect(&config.redis_url)
		.await
		.context("connect to session store")?;

	let users = PostgresUserRepository::connect(&config.database_url)
		.await
		.context("connect to user database")?;

	users.migrate().await.context("run database migrations")?;

	let sessions = SessionService::new(
		store,
		config.session_manager_secret,
		config.session_timeout,
	);

	let oauth = OAuthClient::new(&config);
	let cookie_key = config.cookie_key();
	let auth_svc = AuthService::new(users, sessions, oauth, cookie_key);

	Ok(router(auth_svc))
}

/// Assembles the API's router around the given auth service.
fn router<S, R>(auth_svc: AuthService<S, R>) -> Router
where
	S: store::StoreWriter,
	R: users::UserRepository,
{
	Router::new()
		.route(
			"/",
			routing::get(|| async { Json(json!({ "message": "Hello World" })) }),
		)
		.merge(Router::from(auth_svc))
		.merge(Router::from(HealthService::new()))
		.layer(TraceLayer::new_for_http())
}

/// Resolves when the process receives a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
	let sigint = async {
		match signal::ctrl_c().await {
			Ok(()) => tracing::warn!("received SIGINT, shutting down"),
			Err(error) => tracing::error!(%error, "failed to listen for SIGINT"),
		}
	};

	let sigterm = async {
		match signal::unix::signal(signal::unix::SignalKind::terminate()) {
			Ok(mut signals) => {
				signals.recv().await;
				tracing::warn!("received SIGTERM, shutting down");
			}
			Err(error) => {
				tracing::error!(%error, "failed to listen for SIGTERM");
				std::future::pending::<()>().await;
			}
		}
	};

	tokio::select! {
		() = sigint => {}
		() = sigterm => {}
	}
}
