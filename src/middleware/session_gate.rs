//! The HTTP session gate.
//!
//! [`SessionGate`] is a [`tower::Service`] that wraps a handler and only lets
//! requests through whose bearer token resolves to a live, untampered session
//! with an allowed role. Everything else (missing header, wrong scheme,
//! unknown token, corrupted payload, wrong role) produces the same
//! `401 Unauthorized` response, so a caller learns nothing about *why* they
//! were rejected.
//!
//! The gate authenticates and authorizes only; it never refreshes the
//! session. Extending a session's lifetime is an explicit API call.

use std::fmt;
use std::sync::Arc;
use std::task::{self, Poll};

use axum::extract::Request;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::future::BoxFuture;
use thiserror::Error;

use crate::authorization::Role;
use crate::crypto::Secret;
use crate::services::session::{SessionId, SessionPayload};
use crate::store::{Namespace, StoreReader};

/// A session that passed the gate.
///
/// Inserted into the request's extensions so handlers behind the gate can see
/// who is calling without re-doing the lookup.
#[derive(Debug, Clone)]
pub struct AuthenticatedSession {
	/// The session's ID, i.e. the bearer token the request carried.
	pub session_id: SessionId,

	/// The session's decrypted payload.
	pub payload: SessionPayload,
}

/// A layer producing the [`SessionGate`] middleware.
#[derive(Clone)]
pub struct SessionGateLayer<S> {
	/// For session lookups.
	store: S,

	/// The secret used for unsealing session payloads.
	secret: Secret,

	/// The roles allowed through this gate.
	allowed: Arc<[Role]>,
}

impl<S> fmt::Debug for SessionGateLayer<S> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SessionGateLayer")
			.field("allowed", &self.allowed)
			.finish_non_exhaustive()
	}
}

impl<S> SessionGateLayer<S> {
	/// Creates a new [`SessionGateLayer`].
	pub fn new(store: S, secret: Secret, allowed: impl Into<Arc<[Role]>>) -> Self {
		Self {
			store,
			secret,
			allowed: allowed.into(),
		}
	}
}

impl<S, I> tower::Layer<I> for SessionGateLayer<S>
where
	S: Clone,
{
	type Service = SessionGate<S, I>;

	fn layer(&self, inner: I) -> Self::Service {
		SessionGate {
			store: self.store.clone(),
			secret: self.secret,
			allowed: Arc::clone(&self.allowed),
			inner,
		}
	}
}

/// The middleware created by [`SessionGateLayer`].
#[derive(Clone)]
pub struct SessionGate<S, I> {
	/// For session lookups.
	store: S,

	/// The secret used for unsealing session payloads.
	secret: Secret,

	/// The roles allowed through this gate.
	allowed: Arc<[Role]>,

	/// The wrapped handler.
	inner: I,
}

impl<S, I> fmt::Debug for SessionGate<S, I> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SessionGate")
			.field("allowed", &self.allowed)
			.finish_non_exhaustive()
	}
}

/// The ways a request can fail to pass the gate.
///
/// These exist for logs only; on the wire they are all the same 401.
#[derive(Debug, Error)]
enum GateRejection {
	/// The `Authorization` header is missing or not valid UTF-8.
	#[error("missing authorization header")]
	MissingToken,

	/// The header value is not a `Bearer` token, or the token is not a
	/// well-formed session ID.
	#[error("malformed authorization header")]
	MalformedToken,

	/// The token does not resolve to a live, untampered session.
	#[error("invalid session token")]
	InvalidToken,

	/// The session is valid, but its role is not allowed through this gate.
	#[error("role is not allowed here")]
	InsufficientRole,
}

impl IntoResponse for GateRejection {
	fn into_response(self) -> Response {
		(StatusCode::UNAUTHORIZED, "Unauthorized\n").into_response()
	}
}

impl<S, I> tower::Service<Request> for SessionGate<S, I>
where
	S: StoreReader,
	I: tower::Service<Request, Response = Response> + Clone + Send + 'static,
	I::Future: Send,
{
	type Response = Response;
	type Error = I::Error;
	type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

	fn poll_ready(&mut self, cx: &mut task::Context<'_>) -> Poll<Result<(), Self::Error>> {
		self.inner.poll_ready(cx)
	}

	fn call(&mut self, req: Request) -> Self::Future {
		let store = self.store.clone();
		let secret = self.secret;
		let allowed = Arc::clone(&self.allowed);
		let inner = self.inner.clone();

		Box::pin(svc_impl(store, secret, allowed, inner, req))
	}
}

/// The relevant implementation of `<SessionGate as tower::Service>::call()`.
#[tracing::instrument(level = "debug", skip_all, fields(path = %req.uri().path()))]
async fn svc_impl<S, I>(
	store: S,
	secret: Secret,
	allowed: Arc<[Role]>,
	mut inner: I,
	mut req: Request,
) -> Result<Response, I::Error>
where
	S: StoreReader,
	I: tower::Service<Request, Response = Response> + Clone + Send + 'static,
	I::Future: Send,
{
	let auth_header = req
		.headers()
		.get(header::AUTHORIZATION)
		.and_then(|value| value.to_str().ok())
		.map(ToOwned::to_owned);

	let session = match authenticate(&store, &secret, &allowed, auth_header.as_deref()).await {
		Ok(session) => session,
		Err(rejection) => {
			tracing::debug!(%rejection, "rejecting request");
			return Ok(rejection.into_response());
		}
	};

	tracing::debug! {
		session.id = %session.session_id,
		session.user.id = %session.payload.user_id,
		"authenticated and authorized session, calling inner service",
	};

	req.extensions_mut().insert(session);

	inner.call(req).await
}

/// Authenticates and authorizes the session carried by `req`.
async fn authenticate<S>(
	store: &S,
	secret: &Secret,
	allowed: &[Role],
	auth_header: Option<&str>,
) -> Result<AuthenticatedSession, GateRejection>
where
	S: StoreReader,
{
	let header = auth_header.ok_or(GateRejection::MissingToken)?;

	let token = header
		.strip_prefix("Bearer ")
		.ok_or(GateRejection::MalformedToken)?;

	let session_id = token
		.parse::<SessionId>()
		.map_err(|_| GateRejection::MalformedToken)?;

	let payload: SessionPayload = store
		.hash_get_encrypted(&Namespace::Session, token, secret)
		.await
		.map_err(|_| GateRejection::InvalidToken)?;

	if !allowed.contains(&payload.role) {
		return Err(GateRejection::InsufficientRole);
	}

	Ok(AuthenticatedSession { session_id, payload })
}
