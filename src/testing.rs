//! This module contains helpers for unit/integration tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use time::OffsetDateTime;
use url::Url;

use crate::crypto::{Secret, SECRET_LEN};
use crate::services::session::SessionService;
use crate::services::auth::{AuthService, OAuthClient};
use crate::store::MemoryStore;
use crate::users::{
	ListUsersQuery,
	NewUser,
	User,
	UserId,
	UserReader,
	UserRepository,
};
use crate::{Config, Error, Result};

/// A [`Config`] with plausible values for tests.
///
/// None of the external systems it points at are expected to exist.
pub(crate) fn config() -> Config {
	Config {
		ip: [127, 0, 0, 1].into(),
		port: 8080,
		session_timeout: Duration::from_secs(60),
		session_manager_secret: Secret::new([7; SECRET_LEN]),
		session_secret: "a-cookie-secret-of-sufficient-length".to_owned(),
		database_url: Url::parse("postgres://localhost:5432/chat").unwrap(),
		redis_url: Url::parse("redis://localhost:6379").unwrap(),
		public_url: Url::parse("http://localhost:8080").unwrap(),
		google_application_key: "google-key".to_owned(),
		google_application_secret: "google-secret".to_owned(),
		github_application_key: "github-key".to_owned(),
		github_application_secret: "github-secret".to_owned(),
	}
}

/// Builds a fully wired [`AuthService`] over the given store and an empty
/// in-memory user repository.
pub(crate) fn auth_service(
	store: MemoryStore,
	timeout: Duration,
) -> AuthService<MemoryStore, MemoryUserRepository> {
	let config = config();
	let sessions = SessionService::new(store, config.session_manager_secret, timeout);

	AuthService::new(
		MemoryUserRepository::default(),
		sessions,
		OAuthClient::new(&config),
		config.cookie_key(),
	)
}

/// An in-memory [`UserRepository`] with the same observable behavior as the
/// Postgres one.
#[derive(Debug, Clone, Default)]
pub(crate) struct MemoryUserRepository {
	/// All user rows, soft-deleted ones included.
	users: Arc<Mutex<HashMap<UserId, User>>>,
}

/// A buffered write against a [`MemoryUserRepository`].
#[derive(Debug)]
enum UserOp {
	/// Insert a new row.
	Insert(User),

	/// Set `deleted_at` on an existing row.
	SoftDelete(UserId),
}

/// A transaction against a [`MemoryUserRepository`].
#[derive(Debug, Default)]
pub(crate) struct MemoryUserTx {
	/// The buffered writes, in submission order.
	ops: Vec<UserOp>,
}

impl MemoryUserRepository {
	/// Locks the user table.
	fn lock(&self) -> MutexGuard<'_, HashMap<UserId, User>> {
		self.users.lock().expect("user table lock is never poisoned")
	}

	/// Whether a live user with the given username exists.
	fn username_taken(&self, username: &str, pending: &[UserOp]) -> bool {
		let in_table = self
			.lock()
			.values()
			.any(|user| user.deleted_at.is_none() && user.username == username);

		in_table
			|| pending.iter().any(|op| {
				matches!(op, UserOp::Insert(user) if user.username == username)
			})
	}
}

impl UserReader for MemoryUserRepository {
	async fn user_by_id(&self, user_id: UserId) -> Result<User> {
		self.lock()
			.get(&user_id)
			.filter(|user| user.deleted_at.is_none())
			.cloned()
			.ok_or(Error::NotFound { what: "user" })
	}

	async fn user_by_username(&self, username: &str) -> Result<User> {
		self.lock()
			.values()
			.find(|user| user.deleted_at.is_none() && user.username == username)
			.cloned()
			.ok_or(Error::NotFound { what: "user" })
	}

	async fn list_users(&self, query: ListUsersQuery) -> Result<Vec<User>> {
		let mut users = self
			.lock()
			.values()
			.filter(|user| user.deleted_at.is_none())
			.filter(|user| query.role.map_or(true, |role| user.role == role))
			.filter(|user| query.status.map_or(true, |status| user.status == status))
			.filter(|user| {
				query
					.auth_type
					.map_or(true, |auth_type| user.auth_type == auth_type)
			})
			.cloned()
			.collect::<Vec<_>>();

		users.sort_by_key(|user| std::cmp::Reverse(user.created_at));

		Ok(users
			.into_iter()
			.skip(usize::try_from(query.offset.max(0)).unwrap_or(0))
			.take(usize::try_from(query.limit.clamp(1, 100)).unwrap_or(100))
			.collect())
	}
}

impl UserRepository for MemoryUserRepository {
	type Tx = MemoryUserTx;

	async fn begin(&self) -> Result<Self::Tx> {
		Ok(MemoryUserTx::default())
	}

	async fn commit(&self, tx: Self::Tx) -> Result<()> {
		let mut users = self.lock();

		for op in tx.ops {
			match op {
				UserOp::Insert(user) => {
					users.insert(user.id, user);
				}

				UserOp::SoftDelete(user_id) => {
					if let Some(user) = users.get_mut(&user_id) {
						user.deleted_at = Some(OffsetDateTime::now_utc());
					}
				}
			}
		}

		Ok(())
	}

	async fn create_user(&self, tx: &mut Self::Tx, user: NewUser) -> Result<User> {
		if self.username_taken(&user.username, &tx.ops) {
			return Err(Error::Conflict { what: "user" });
		}

		let now = OffsetDateTime::now_utc();
		let user = User {
			id: UserId::new(),
			username: user.username,
			email: user.email,
			auth_type: user.auth_type,
			role: user.role,
			status: user.status,
			created_at: now,
			updated_at: now,
			deleted_at: None,
		};

		tx.ops.push(UserOp::Insert(user.clone()));

		Ok(user)
	}

	async fn delete_user(&self, tx: &mut Self::Tx, user_id: UserId) -> Result<()> {
		self.user_by_id(user_id).await?;
		tx.ops.push(UserOp::SoftDelete(user_id));

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::authorization::Role;
	use crate::users::{AuthType, UserStatus};

	async fn seed(repo: &MemoryUserRepository, username: &str, role: Role) -> User {
		let mut tx = repo.begin().await.unwrap();
		let user = repo
			.create_user(&mut tx, NewUser {
				username: username.to_owned(),
				email: format!("{username}@doe.com"),
				auth_type: AuthType::Google,
				role,
				status: UserStatus::Active,
			})
			.await
			.unwrap();

		repo.commit(tx).await.unwrap();

		user
	}

	#[tokio::test]
	async fn listing_filters_by_role() {
		let repo = MemoryUserRepository::default();

		seed(&repo, "john", Role::User).await;
		seed(&repo, "jane", Role::User).await;
		seed(&repo, "root", Role::Admin).await;

		let admins = repo
			.list_users(ListUsersQuery {
				role: Some(Role::Admin),
				..Default::default()
			})
			.await
			.unwrap();

		assert_eq!(admins.len(), 1);
		assert_eq!(admins[0].username, "root");

		let everyone = repo.list_users(ListUsersQuery::default()).await.unwrap();
		assert_eq!(everyone.len(), 3);
	}

	#[tokio::test]
	async fn soft_deleted_users_are_invisible() {
		let repo = MemoryUserRepository::default();
		let user = seed(&repo, "john", Role::User).await;

		let mut tx = repo.begin().await.unwrap();
		repo.delete_user(&mut tx, user.id).await.unwrap();
		repo.commit(tx).await.unwrap();

		assert!(repo.user_by_id(user.id).await.is_err());
		assert!(repo.user_by_username("john").await.is_err());
		assert!(repo.list_users(ListUsersQuery::default()).await.unwrap().is_empty());

		// The username is free again.
		seed(&repo, "john", Role::User).await;
	}
}
