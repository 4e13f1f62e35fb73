//! The stream RPC session gate.
//!
//! Chat traffic flows over long-lived streaming RPCs served by the chat
//! backend; this module provides the interceptor that backend attaches to
//! every RPC. It is a [`tower::Layer`] over the HTTP/2 requests a [`tonic`]
//! server is built from, which gives it both the call metadata (the
//! `authorization` entry) and the full method name (the request path, e.g.
//! `/chat.Chat/Subscribe`) to use as the permission key.
//!
//! A stream is only handed to the wrapped service if the token resolves to a
//! live session whose role is registered for the called method. Rejections
//! are trailers-only gRPC responses with [`Code::PermissionDenied`] and one
//! of three messages: `missing token`, `invalid token`, `invalid role`.
//!
//! Accepted streams get their request and response bodies wrapped in a
//! [`TracedStream`], which logs every message frame at debug level without
//! touching the payload bytes.
//!
//! [`Code::PermissionDenied`]: tonic::Code::PermissionDenied

use std::fmt;
use std::task::{self, Poll};

use axum::body::Body;
use axum::http::{header, HeaderValue, Request, Response};
use futures::future::BoxFuture;
use tonic::metadata::MetadataMap;
use tonic::Status;

use crate::authorization::RouteRoles;
use crate::crypto::Secret;
use crate::services::session::SessionPayload;
use crate::store::{Namespace, StoreReader};

mod stream;

#[doc(inline)]
pub use stream::TracedStream;

/// A layer producing the [`RpcGate`] middleware.
#[derive(Clone)]
pub struct RpcGateLayer<S> {
	/// For session lookups.
	store: S,

	/// The secret used for unsealing session payloads.
	secret: Secret,

	/// The per-method role registry.
	roles: RouteRoles,
}

impl<S> fmt::Debug for RpcGateLayer<S> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RpcGateLayer").finish_non_exhaustive()
	}
}

impl<S> RpcGateLayer<S> {
	/// Creates a new [`RpcGateLayer`].
	pub fn new(store: S, secret: Secret, roles: RouteRoles) -> Self {
		Self { store, secret, roles }
	}
}

impl<S, I> tower::Layer<I> for RpcGateLayer<S>
where
	S: Clone,
{
	type Service = RpcGate<S, I>;

	fn layer(&self, inner: I) -> Self::Service {
		RpcGate {
			store: self.store.clone(),
			secret: self.secret,
			roles: self.roles.clone(),
			inner,
		}
	}
}

/// The middleware created by [`RpcGateLayer`].
#[derive(Clone)]
pub struct RpcGate<S, I> {
	/// For session lookups.
	store: S,

	/// The secret used for unsealing session payloads.
	secret: Secret,

	/// The per-method role registry.
	roles: RouteRoles,

	/// The wrapped RPC service.
	inner: I,
}

impl<S, I> fmt::Debug for RpcGate<S, I> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RpcGate").finish_non_exhaustive()
	}
}

impl<S, I> tower::Service<Request<Body>> for RpcGate<S, I>
where
	S: StoreReader,
	I: tower::Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
	I::Future: Send,
{
	type Response = Response<Body>;
	type Error = I::Error;
	type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

	fn poll_ready(&mut self, cx: &mut task::Context<'_>) -> Poll<Result<(), Self::Error>> {
		self.inner.poll_ready(cx)
	}

	fn call(&mut self, req: Request<Body>) -> Self::Future {
		let store = self.store.clone();
		let secret = self.secret;
		let roles = self.roles.clone();
		let inner = self.inner.clone();

		Box::pin(svc_impl(store, secret, roles, inner, req))
	}
}

/// The relevant implementation of `<RpcGate as tower::Service>::call()`.
#[tracing::instrument(
	level = "debug",
	skip_all,
	fields(rpc.method = %req.uri().path()),
)]
async fn svc_impl<S, I>(
	store: S,
	secret: Secret,
	roles: RouteRoles,
	mut inner: I,
	req: Request<Body>,
) -> Result<Response<Body>, I::Error>
where
	S: StoreReader,
	I: tower::Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
	I::Future: Send,
{
	let metadata = MetadataMap::from_headers(req.headers().clone());

	let Some(token) = metadata
		.get("authorization")
		.and_then(|value| value.to_str().ok())
		.map(ToOwned::to_owned)
	else {
		return Ok(deny(Status::permission_denied("missing token")));
	};

	let payload: SessionPayload = match store
		.hash_get_encrypted(&Namespace::Session, &token, &secret)
		.await {
		Ok(payload) => payload,
		Err(error) => {
			tracing::debug!(%error, "session lookup failed");
			return Ok(deny(Status::permission_denied("invalid token")));
		}
	};

	if !roles.allows(req.uri().path(), payload.role) {
		return Ok(deny(Status::permission_denied("invalid role")));
	}

	tracing::debug! {
		session.user.id = %payload.user_id,
		session.user.role = %payload.role,
		"authorized stream",
	};

	let req = req.map(|body| Body::new(TracedStream::inbound(body)));
	let response = inner.call(req).await?;

	Ok(response.map(|body| Body::new(TracedStream::outbound(body))))
}

/// Builds a trailers-only gRPC response for a rejected stream.
fn deny(status: Status) -> Response<Body> {
	let mut response = Response::new(Body::empty());
	let headers = response.headers_mut();

	headers.insert(
		header::CONTENT_TYPE,
		HeaderValue::from_static("application/grpc"),
	);
	headers.insert("grpc-status", HeaderValue::from(status.code() as i32));

	if let Ok(message) = HeaderValue::from_str(status.message()) {
		headers.insert("grpc-message", message);
	}

	response
}

#[cfg(test)]
mod tests {
	use std::convert::Infallible;
	use std::time::Duration;

	use tower::{Layer, ServiceExt};

	use super::*;
	use crate::authorization::Role;
	use crate::crypto::SECRET_LEN;
	use crate::services::session::{NewSession, SessionService};
	use crate::store::MemoryStore;
	use crate::users::{AuthType, UserId, UserStatus};

	const SUBSCRIBE: &str = "/chat.Chat/Subscribe";
	const MODERATE: &str = "/chat.Chat/Moderate";

	fn service() -> SessionService<MemoryStore> {
		SessionService::new(
			MemoryStore::new(),
			Secret::new([7; SECRET_LEN]),
			Duration::from_secs(60),
		)
	}

	async fn create(svc: &SessionService<MemoryStore>, role: Role) -> String {
		svc.create_session(UserId::new(), NewSession {
			role,
			status: UserStatus::Active,
			auth_type: AuthType::Google,
		})
		.await
		.unwrap()
		.to_string()
	}

	async fn call(
		svc: &SessionService<MemoryStore>,
		method: &str,
		token: Option<&str>,
	) -> Response<Body> {
		let gate = svc.rpc_gate().layer(tower::service_fn(
			|_req: Request<Body>| async move {
				Ok::<_, Infallible>(Response::new(Body::from("stream")))
			},
		));

		let mut builder = Request::post(method);

		if let Some(token) = token {
			builder = builder.header("authorization", token);
		}

		gate.oneshot(builder.body(Body::empty()).unwrap())
			.await
			.unwrap()
	}

	fn grpc_status(response: &Response<Body>) -> Option<&str> {
		response
			.headers()
			.get("grpc-status")
			.map(|value| value.to_str().unwrap())
	}

	fn grpc_message(response: &Response<Body>) -> Option<&str> {
		response
			.headers()
			.get("grpc-message")
			.map(|value| value.to_str().unwrap())
	}

	#[tokio::test]
	async fn authorized_streams_reach_the_handler() {
		let svc = service();
		svc.set_roles(SUBSCRIBE, [Role::Admin, Role::User]);

		let token = create(&svc, Role::User).await;
		let response = call(&svc, SUBSCRIBE, Some(&token)).await;

		assert_eq!(grpc_status(&response), None);

		let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
		assert_eq!(body, "stream".as_bytes());
	}

	#[tokio::test]
	async fn missing_token_is_permission_denied() {
		let svc = service();
		svc.set_roles(SUBSCRIBE, [Role::User]);

		let response = call(&svc, SUBSCRIBE, None).await;

		assert_eq!(
			grpc_status(&response),
			Some((tonic::Code::PermissionDenied as i32).to_string()).as_deref(),
		);
		assert_eq!(grpc_message(&response), Some("missing token"));
	}

	#[tokio::test]
	async fn unknown_token_is_permission_denied() {
		let svc = service();
		svc.set_roles(SUBSCRIBE, [Role::User]);

		let response = call(
			&svc,
			SUBSCRIBE,
			Some("00000000-0000-0000-0000-000000000000"),
		)
		.await;

		assert_eq!(grpc_message(&response), Some("invalid token"));
	}

	#[tokio::test]
	async fn wrong_role_is_permission_denied() {
		let svc = service();
		svc.set_roles(MODERATE, [Role::Admin]);

		let token = create(&svc, Role::User).await;
		let response = call(&svc, MODERATE, Some(&token)).await;

		assert_eq!(grpc_message(&response), Some("invalid role"));
	}

	#[tokio::test]
	async fn unregistered_methods_are_permission_denied() {
		let svc = service();

		let token = create(&svc, Role::Admin).await;
		let response = call(&svc, "/chat.Chat/Unregistered", Some(&token)).await;

		assert_eq!(grpc_message(&response), Some("invalid role"));
	}
}
