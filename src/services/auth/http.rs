//! HTTP handlers for this service.
//!
//! The login flow spans three handlers. `GET /login/{provider}` stashes the
//! chosen username and an anti-forgery state in signed cookies and redirects
//! to the provider. The provider sends the user back to
//! `GET /login/{provider}/callback`, which exchanges the code for the user's
//! email address and either logs them in (known username) or parks the
//! signup data in another signed cookie and redirects to `/signUp`, where
//! `POST /signUp` completes account creation.
//!
//! `/refresh`, `/logout`, and the example gated resource sit behind the
//! bearer session gate; `DELETE /user` additionally requires the admin role.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::{routing, Extension, Json, Router};
use axum_extra::extract::cookie::{Cookie, Key, SignedCookieJar};
use axum::extract::FromRef;
use rand::distributions::Alphanumeric;
use rand::Rng;

use super::models::{CallbackQuery, DeleteUserRequest, LoginQuery, SignUpData, TokenResponse};
use super::{AuthService, Provider};
use crate::authorization::Role;
use crate::middleware::AuthenticatedSession;
use crate::store::StoreWriter;
use crate::users::UserRepository;
use crate::{Error, Result};

/// The cookie holding the anti-forgery state while the user is at the
/// provider.
const STATE_COOKIE: &str = "oauth-state";

/// The cookie holding the username chosen when the flow began.
const USERNAME_COOKIE: &str = "login-username";

/// The cookie carrying signup data from the callback to `POST /signUp`.
const SIGNUP_COOKIE: &str = "signup";

impl<S, R> FromRef<AuthService<S, R>> for Key {
	fn from_ref(svc: &AuthService<S, R>) -> Self {
		svc.cookie_key.clone()
	}
}

impl<S, R> From<AuthService<S, R>> for Router
where
	S: StoreWriter,
	R: UserRepository,
{
	fn from(svc: AuthService<S, R>) -> Self {
		let bearer = Router::new()
			.route("/refresh", routing::post(refresh))
			.route("/logout", routing::post(logout))
			.route("/session_id", routing::get(session_id))
			.route_layer(svc.sessions().http_gate([Role::Admin, Role::User]));

		let admin = Router::new()
			.route("/user", routing::delete(delete_user))
			.route_layer(svc.sessions().http_gate([Role::Admin]));

		Router::new()
			.route("/login/:provider", routing::get(login))
			.route("/login/:provider/callback", routing::get(callback))
			.route("/signUp", routing::post(sign_up))
			.merge(bearer)
			.merge(admin)
			.with_state(svc)
	}
}

/// Builds a short-lived, HTTP-only cookie for the OAuth flow.
fn flow_cookie(name: &'static str, value: String) -> Cookie<'static> {
	Cookie::build((name, value))
		.path("/")
		.secure(cfg!(feature = "production"))
		.http_only(true)
		.build()
}

/// Begin the OAuth login flow with the given provider.
#[tracing::instrument(level = "debug", skip(svc, jar))]
async fn login<S, R>(
	State(svc): State<AuthService<S, R>>,
	Path(provider): Path<Provider>,
	Query(LoginQuery { username }): Query<LoginQuery>,
	jar: SignedCookieJar,
) -> (SignedCookieJar, Redirect)
where
	S: StoreWriter,
	R: UserRepository,
{
	let state = rand::thread_rng()
		.sample_iter(&Alphanumeric)
		.take(32)
		.map(char::from)
		.collect::<String>();

	let redirect = Redirect::to(svc.oauth.authorize_url(provider, &state).as_str());
	let jar = jar
		.add(flow_cookie(STATE_COOKIE, state))
		.add(flow_cookie(USERNAME_COOKIE, username));

	(jar, redirect)
}

/// Hit by the provider after the user consented.
#[tracing::instrument(level = "debug", skip(svc, query, jar), err(Debug, level = "debug"))]
async fn callback<S, R>(
	State(svc): State<AuthService<S, R>>,
	Path(provider): Path<Provider>,
	Query(query): Query<CallbackQuery>,
	jar: SignedCookieJar,
) -> Result<Response>
where
	S: StoreWriter,
	R: UserRepository,
{
	let state_matches = jar
		.get(STATE_COOKIE)
		.is_some_and(|cookie| cookie.value() == query.state);

	if !state_matches {
		return Err(Error::NotAuthorized);
	}

	let username = jar
		.get(USERNAME_COOKIE)
		.map(|cookie| cookie.value().to_owned())
		.ok_or_else(|| Error::bad_request("login flow was not started"))?;

	let email = svc.oauth.fetch_email(provider, &query.code).await?;
	let jar = jar.remove(STATE_COOKIE).remove(USERNAME_COOKIE);

	let user = match svc.user_by_username(&username).await {
		Ok(user) => user,

		// Unknown username: send them to signup, carrying everything the
		// signup handler needs in a signed cookie.
		Err(error) if error.is_not_found() => {
			let data = SignUpData {
				username,
				email,
				auth_type: provider.auth_type(),
				role: Role::User,
			};

			let jar = jar.add(flow_cookie(SIGNUP_COOKIE, serde_json::to_string(&data)?));

			return Ok((jar, Redirect::to("/signUp")).into_response());
		}

		Err(error) => return Err(error),
	};

	let token = svc.login(&user.username, &email).await?;

	Ok((jar, Json(TokenResponse { token })).into_response())
}

/// Complete a signup started by the OAuth callback.
#[tracing::instrument(level = "debug", skip(svc, jar), err(Debug, level = "debug"))]
async fn sign_up<S, R>(
	State(svc): State<AuthService<S, R>>,
	jar: SignedCookieJar,
) -> Result<(StatusCode, SignedCookieJar, Json<TokenResponse>)>
where
	S: StoreWriter,
	R: UserRepository,
{
	let data = jar
		.get(SIGNUP_COOKIE)
		.ok_or_else(|| Error::bad_request("missing signup data"))
		.and_then(|cookie| {
			serde_json::from_str::<SignUpData>(cookie.value())
				.map_err(|_| Error::bad_request("malformed signup data"))
		})?;

	let token = svc
		.sign_up(&data.username, &data.email, data.auth_type, data.role)
		.await?;

	Ok((
		StatusCode::CREATED,
		jar.remove(SIGNUP_COOKIE),
		Json(TokenResponse { token }),
	))
}

/// Extend the current session's lifetime.
#[tracing::instrument(level = "debug", skip(svc), err(Debug, level = "debug"))]
async fn refresh<S, R>(
	State(svc): State<AuthService<S, R>>,
	Extension(session): Extension<AuthenticatedSession>,
) -> Result<Json<TokenResponse>>
where
	S: StoreWriter,
	R: UserRepository,
{
	svc.refresh(&session.session_id.to_string()).await?;

	Ok(Json(TokenResponse { token: session.session_id }))
}

/// Terminate the current session.
#[tracing::instrument(level = "debug", skip(svc), err(Debug, level = "debug"))]
async fn logout<S, R>(
	State(svc): State<AuthService<S, R>>,
	Extension(session): Extension<AuthenticatedSession>,
) -> Result<StatusCode>
where
	S: StoreWriter,
	R: UserRepository,
{
	svc.logout(&session.session_id.to_string()).await?;

	Ok(StatusCode::OK)
}

/// An example gated resource.
#[tracing::instrument(level = "debug")]
async fn session_id() -> &'static str {
	"Hello world"
}

/// Delete a user account and terminate all of its sessions.
#[tracing::instrument(level = "debug", skip(svc), err(Debug, level = "debug"))]
async fn delete_user<S, R>(
	State(svc): State<AuthService<S, R>>,
	Json(DeleteUserRequest { username }): Json<DeleteUserRequest>,
) -> Result<StatusCode>
where
	S: StoreWriter,
	R: UserRepository,
{
	svc.delete_account(&username).await?;

	Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
	use std::collections::HashMap;
	use std::time::Duration;

	use axum::body::Body;
	use axum::http::{header, Request};
	use tower::ServiceExt;

	use super::*;
	use crate::store::MemoryStore;
	use crate::testing;
	use crate::users::AuthType;

	fn router(svc: AuthService<MemoryStore, testing::MemoryUserRepository>) -> Router {
		Router::from(svc)
	}

	async fn body_json(response: Response) -> HashMap<String, String> {
		let bytes = axum::body::to_bytes(response.into_body(), 1024)
			.await
			.unwrap();

		serde_json::from_slice(&bytes).unwrap()
	}

	#[tokio::test]
	async fn refresh_returns_the_token() -> color_eyre::Result<()> {
		let svc = testing::auth_service(MemoryStore::new(), Duration::from_secs(60));
		let token = svc
			.sign_up("john", "john@doe.com", AuthType::Google, Role::User)
			.await?
			.to_string();

		let response = router(svc)
			.oneshot(
				Request::post("/refresh")
					.header(header::AUTHORIZATION, format!("Bearer {token}"))
					.body(Body::empty())?,
			)
			.await?;

		assert_eq!(response.status(), StatusCode::OK);

		let body = body_json(response).await;
		assert_eq!(body.get("token"), Some(&token));

		Ok(())
	}

	#[tokio::test]
	async fn logout_invalidates_the_token() -> color_eyre::Result<()> {
		let svc = testing::auth_service(MemoryStore::new(), Duration::from_secs(60));
		let token = svc
			.sign_up("john", "john@doe.com", AuthType::Google, Role::User)
			.await?
			.to_string();

		let app = router(svc.clone());

		let logout = app
			.clone()
			.oneshot(
				Request::post("/logout")
					.header(header::AUTHORIZATION, format!("Bearer {token}"))
					.body(Body::empty())?,
			)
			.await?;

		assert_eq!(logout.status(), StatusCode::OK);

		// The token is dead now.
		let gated = app
			.oneshot(
				Request::get("/session_id")
					.header(header::AUTHORIZATION, format!("Bearer {token}"))
					.body(Body::empty())?,
			)
			.await?;

		assert_eq!(gated.status(), StatusCode::UNAUTHORIZED);

		Ok(())
	}

	#[tokio::test]
	async fn gated_routes_reject_anonymous_requests() -> color_eyre::Result<()> {
		let svc = testing::auth_service(MemoryStore::new(), Duration::from_secs(60));

		let response = router(svc)
			.oneshot(Request::get("/session_id").body(Body::empty())?)
			.await?;

		assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

		Ok(())
	}

	#[tokio::test]
	async fn deleting_users_requires_the_admin_role() -> color_eyre::Result<()> {
		let svc = testing::auth_service(MemoryStore::new(), Duration::from_secs(60));

		let user_token = svc
			.sign_up("john", "john@doe.com", AuthType::Google, Role::User)
			.await?
			.to_string();
		let admin_token = svc
			.sign_up("root", "root@doe.com", AuthType::Github, Role::Admin)
			.await?
			.to_string();

		let app = router(svc.clone());

		let as_user = app
			.clone()
			.oneshot(
				Request::delete("/user")
					.header(header::AUTHORIZATION, format!("Bearer {user_token}"))
					.header(header::CONTENT_TYPE, "application/json")
					.body(Body::from(r#"{"username":"john"}"#))?,
			)
			.await?;

		assert_eq!(as_user.status(), StatusCode::UNAUTHORIZED);

		let as_admin = app
			.oneshot(
				Request::delete("/user")
					.header(header::AUTHORIZATION, format!("Bearer {admin_token}"))
					.header(header::CONTENT_TYPE, "application/json")
					.body(Body::from(r#"{"username":"john"}"#))?,
			)
			.await?;

		assert_eq!(as_admin.status(), StatusCode::OK);
		assert!(svc.user_by_username("john").await.is_err());
		assert!(svc.sessions().get_session(&user_token).await.is_err());

		Ok(())
	}

	#[tokio::test]
	async fn login_redirects_to_the_provider() -> color_eyre::Result<()> {
		let svc = testing::auth_service(MemoryStore::new(), Duration::from_secs(60));

		let response = router(svc)
			.oneshot(
				Request::get("/login/github?username=john").body(Body::empty())?,
			)
			.await?;

		assert_eq!(response.status(), StatusCode::SEE_OTHER);

		let location = response
			.headers()
			.get(header::LOCATION)
			.and_then(|value| value.to_str().ok())
			.unwrap();

		assert!(location.starts_with("https://github.com/login/oauth/authorize"));

		Ok(())
	}

	#[tokio::test]
	async fn unknown_providers_are_rejected() -> color_eyre::Result<()> {
		let svc = testing::auth_service(MemoryStore::new(), Duration::from_secs(60));

		let response = router(svc)
			.oneshot(
				Request::get("/login/steam?username=john").body(Body::empty())?,
			)
			.await?;

		assert_eq!(response.status(), StatusCode::BAD_REQUEST);

		Ok(())
	}

	#[tokio::test]
	async fn sign_up_without_the_cookie_is_a_bad_request() -> color_eyre::Result<()> {
		let svc = testing::auth_service(MemoryStore::new(), Duration::from_secs(60));

		let response = router(svc)
			.oneshot(Request::post("/signUp").body(Body::empty())?)
			.await?;

		assert_eq!(response.status(), StatusCode::BAD_REQUEST);

		Ok(())
	}
}
