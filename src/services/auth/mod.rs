//! The [`AuthService`] is responsible for turning federated identity into
//! sessions.
//!
//! Users authenticate with a third-party OAuth provider (see the [`oauth`]
//! module); once the provider vouches for an email address, this service
//! either creates an account and a session in one go ([`AuthService::sign_up()`])
//! or checks the address against the stored account and creates a session
//! ([`AuthService::login()`]). Session upkeep (`refresh`/`logout`) passes
//! through to the [`SessionService`], and deleting a user fans out into
//! terminating every session they own.

use std::fmt;

use axum_extra::extract::cookie::Key;

use crate::authorization::Role;
use crate::services::session::{NewSession, SessionId, SessionService};
use crate::store::StoreWriter;
use crate::users::{AuthType, NewUser, User, UserId, UserRepository, UserStatus};
use crate::{Error, Result};

pub(crate) mod http;

pub(crate) mod models;
pub use models::{DeleteUserRequest, TokenResponse};

pub mod oauth;
pub use oauth::{OAuthClient, Provider};

/// A service for managing user authentication.
#[derive(Clone)]
pub struct AuthService<S, R> {
	/// The user repository.
	users: R,

	/// The session service.
	sessions: SessionService<S>,

	/// The OAuth client.
	oauth: OAuthClient,

	/// The key the OAuth flow's cookies are signed with.
	cookie_key: Key,
}

impl<S, R> fmt::Debug for AuthService<S, R> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("AuthService").finish_non_exhaustive()
	}
}

impl<S, R> AuthService<S, R> {
	/// Creates a new [`AuthService`].
	pub fn new(users: R, sessions: SessionService<S>, oauth: OAuthClient, cookie_key: Key) -> Self {
		Self {
			users,
			sessions,
			oauth,
			cookie_key,
		}
	}

	/// Returns the session service this service creates sessions through.
	pub fn sessions(&self) -> &SessionService<S> {
		&self.sessions
	}
}

impl<S, R> AuthService<S, R>
where
	S: StoreWriter,
	R: UserRepository,
{
	/// Creates a new user account and an initial session for it.
	///
	/// User creation and session creation are scoped in one user-repository
	/// transaction; if anything fails the transaction is dropped, which rolls
	/// the account back. A session created before a failed commit is not
	/// rolled back; it ages out with its TTL, pointing at a user that never
	/// materialized.
	#[tracing::instrument(level = "debug", skip(self), err(Debug, level = "debug"))]
	pub async fn sign_up(
		&self,
		username: &str,
		email: &str,
		auth_type: AuthType,
		role: Role,
	) -> Result<SessionId> {
		let mut tx = self.users.begin().await?;

		let user = self
			.users
			.create_user(&mut tx, NewUser {
				username: username.to_owned(),
				email: email.to_owned(),
				auth_type,
				role,
				status: UserStatus::Active,
			})
			.await?;

		let session_id = self
			.sessions
			.create_session(user.id, NewSession {
				role: user.role,
				status: user.status,
				auth_type: user.auth_type,
			})
			.await?;

		self.users.commit(tx).await?;

		tracing::debug!(user.id = %user.id, "signed up new user");

		Ok(session_id)
	}

	/// Logs an existing user in.
	///
	/// The provider-reported `email` must match the one stored for
	/// `username`; a mismatch is indistinguishable from any other
	/// authorization failure.
	#[tracing::instrument(level = "debug", skip(self, email), err(Debug, level = "debug"))]
	pub async fn login(&self, username: &str, email: &str) -> Result<SessionId> {
		let user = self.users.user_by_username(username).await?;

		if user.email != email {
			return Err(Error::NotAuthorized);
		}

		self.sessions
			.create_session(user.id, NewSession {
				role: user.role,
				status: user.status,
				auth_type: user.auth_type,
			})
			.await
	}

	/// Extends the given session's lifetime.
	#[tracing::instrument(level = "debug", skip(self), err(Debug, level = "debug"))]
	pub async fn refresh(&self, session_id: &str) -> Result<()> {
		self.sessions.refresh_session(session_id).await
	}

	/// Terminates the given session.
	///
	/// Logging out of a session that is already gone counts as success.
	#[tracing::instrument(level = "debug", skip(self), err(Debug, level = "debug"))]
	pub async fn logout(&self, session_id: &str) -> Result<()> {
		match self.sessions.finish_session(session_id).await {
			Err(error) if error.is_not_found() => Ok(()),
			result => result,
		}
	}

	/// Terminates every session belonging to `user`.
	///
	/// The user record itself is left to the caller.
	#[tracing::instrument(
		level = "debug",
		skip(self, user),
		fields(user.id = %user.id),
		err(Debug, level = "debug"),
	)]
	pub async fn delete_user(&self, user: &User) -> Result<()> {
		self.sessions.finish_user_sessions(user.id).await
	}

	/// Deletes the account with the given username: the user record is
	/// soft-deleted and every session the user owns is terminated.
	#[tracing::instrument(level = "debug", skip(self), err(Debug, level = "debug"))]
	pub async fn delete_account(&self, username: &str) -> Result<()> {
		let user = self.users.user_by_username(username).await?;

		let mut tx = self.users.begin().await?;

		self.users.delete_user(&mut tx, user.id).await?;
		self.delete_user(&user).await?;

		self.users.commit(tx).await?;

		tracing::debug!(user.id = %user.id, "deleted account");

		Ok(())
	}
}

impl<S, R> AuthService<S, R>
where
	R: crate::users::UserReader,
{
	/// Fetches a user by their username.
	pub async fn user_by_username(&self, username: &str) -> Result<User> {
		self.users.user_by_username(username).await
	}

	/// Fetches a user by their ID.
	pub async fn user_by_id(&self, user_id: UserId) -> Result<User> {
		self.users.user_by_id(user_id).await
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use super::*;
	use crate::store::MemoryStore;
	use crate::testing::{self, MemoryUserRepository};

	fn service() -> AuthService<MemoryStore, MemoryUserRepository> {
		testing::auth_service(MemoryStore::new(), Duration::from_secs(60))
	}

	#[tokio::test]
	async fn sign_up_creates_user_and_session() -> color_eyre::Result<()> {
		let svc = service();

		let session_id = svc
			.sign_up("john", "john@doe.com", AuthType::Google, Role::User)
			.await?;

		let user = svc.user_by_username("john").await?;
		assert_eq!(user.email, "john@doe.com");
		assert_eq!(user.status, UserStatus::Active);

		let payload = svc.sessions().get_session(&session_id.to_string()).await?;
		assert_eq!(payload.user_id, user.id);
		assert_eq!(payload.role, Role::User);

		Ok(())
	}

	#[tokio::test]
	async fn duplicate_usernames_conflict() -> color_eyre::Result<()> {
		let svc = service();

		svc.sign_up("john", "john@doe.com", AuthType::Google, Role::User)
			.await?;

		let result = svc
			.sign_up("john", "other@doe.com", AuthType::Github, Role::User)
			.await;

		assert!(matches!(result, Err(Error::Conflict { .. })));

		Ok(())
	}

	#[tokio::test]
	async fn login_checks_the_email() -> color_eyre::Result<()> {
		let svc = service();

		svc.sign_up("john", "john@doe.com", AuthType::Google, Role::User)
			.await?;

		assert!(svc.login("john", "john@doe.com").await.is_ok());

		let mismatch = svc.login("john", "mallory@doe.com").await;
		assert!(matches!(mismatch, Err(Error::NotAuthorized)));

		let unknown = svc.login("jane", "jane@doe.com").await;
		assert!(matches!(unknown, Err(Error::NotFound { .. })));

		Ok(())
	}

	#[tokio::test]
	async fn logout_tolerates_repeats() -> color_eyre::Result<()> {
		let svc = service();

		let session_id = svc
			.sign_up("john", "john@doe.com", AuthType::Google, Role::User)
			.await?
			.to_string();

		svc.logout(&session_id).await?;
		svc.logout(&session_id).await?;

		Ok(())
	}

	#[tokio::test]
	async fn deleting_an_account_terminates_every_session() -> color_eyre::Result<()> {
		let svc = service();

		let first = svc
			.sign_up("john", "john@doe.com", AuthType::Google, Role::User)
			.await?;
		let second = svc.login("john", "john@doe.com").await?;

		svc.delete_account("john").await?;

		assert!(svc.user_by_username("john").await.is_err());
		assert!(svc.sessions().get_session(&first.to_string()).await.is_err());
		assert!(svc.sessions().get_session(&second.to_string()).await.is_err());

		Ok(())
	}
}
