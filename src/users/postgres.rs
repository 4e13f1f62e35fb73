//! The Postgres implementation of the user repository.

use std::fmt;

use sqlx::pool::PoolOptions;
use sqlx::{Postgres, QueryBuilder, Transaction};
use url::Url;

use super::{ListUsersQuery, NewUser, User, UserId, UserReader, UserRepository};
use crate::{Error, Result};

/// The columns fetched for every [`User`] query.
const USER_COLUMNS: &str = "id, username, email, auth_type, role, status, \
	created_at, updated_at, deleted_at";

/// A [`UserRepository`] backed by Postgres.
#[derive(Clone)]
pub struct PostgresUserRepository {
	/// The connection pool.
	pool: sqlx::Pool<Postgres>,
}

impl fmt::Debug for PostgresUserRepository {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("PostgresUserRepository").finish_non_exhaustive()
	}
}

impl PostgresUserRepository {
	/// Connects to the database at `url`.
	#[tracing::instrument(skip(url), err(Debug))]
	pub async fn connect(url: &Url) -> Result<Self> {
		let pool = PoolOptions::new()
			.min_connections(1)
			.max_connections(10)
			.connect(url.as_str())
			.await?;

		Ok(Self { pool })
	}

	/// Runs any pending database migrations.
	#[tracing::instrument(skip(self), err(Debug))]
	pub async fn migrate(&self) -> Result<()> {
		sqlx::migrate!("./migrations")
			.run(&self.pool)
			.await
			.map_err(|source| Error::Internal { source: source.into() })
	}
}

impl UserReader for PostgresUserRepository {
	#[tracing::instrument(level = "debug", skip(self), err(Debug, level = "debug"))]
	async fn user_by_id(&self, user_id: UserId) -> Result<User> {
		sqlx::query_as::<_, User>(&format!(
			"SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND deleted_at IS NULL",
		))
		.bind(user_id)
		.fetch_optional(&self.pool)
		.await?
		.ok_or(Error::NotFound { what: "user" })
	}

	#[tracing::instrument(level = "debug", skip(self), err(Debug, level = "debug"))]
	async fn user_by_username(&self, username: &str) -> Result<User> {
		sqlx::query_as::<_, User>(&format!(
			"SELECT {USER_COLUMNS} FROM users WHERE username = $1 AND deleted_at IS NULL",
		))
		.bind(username)
		.fetch_optional(&self.pool)
		.await?
		.ok_or(Error::NotFound { what: "user" })
	}

	#[tracing::instrument(level = "debug", skip(self), err(Debug, level = "debug"))]
	async fn list_users(&self, query: ListUsersQuery) -> Result<Vec<User>> {
		let mut sql = QueryBuilder::<Postgres>::new(format!(
			"SELECT {USER_COLUMNS} FROM users WHERE deleted_at IS NULL",
		));

		if let Some(role) = query.role {
			sql.push(" AND role = ").push_bind(role);
		}

		if let Some(status) = query.status {
			sql.push(" AND status = ").push_bind(status);
		}

		if let Some(auth_type) = query.auth_type {
			sql.push(" AND auth_type = ").push_bind(auth_type);
		}

		sql.push(" ORDER BY created_at DESC LIMIT ")
			.push_bind(query.limit.clamp(1, 100))
			.push(" OFFSET ")
			.push_bind(query.offset.max(0));

		let users = sql
			.build_query_as::<User>()
			.fetch_all(&self.pool)
			.await?;

		Ok(users)
	}
}

impl UserRepository for PostgresUserRepository {
	type Tx = Transaction<'static, Postgres>;

	#[tracing::instrument(level = "debug", skip(self), err(Debug, level = "debug"))]
	async fn begin(&self) -> Result<Self::Tx> {
		self.pool.begin().await.map_err(Error::from)
	}

	#[tracing::instrument(level = "debug", skip_all, err(Debug, level = "debug"))]
	async fn commit(&self, tx: Self::Tx) -> Result<()> {
		tx.commit().await.map_err(Error::from)
	}

	#[tracing::instrument(
		level = "debug",
		skip(self, tx),
		fields(user.name = %user.username),
		err(Debug, level = "debug"),
	)]
	async fn create_user(&self, tx: &mut Self::Tx, user: NewUser) -> Result<User> {
		sqlx::query_as::<_, User>(&format!(
			"INSERT INTO users (id, username, email, auth_type, role, status) \
			 VALUES ($1, $2, $3, $4, $5, $6) \
			 RETURNING {USER_COLUMNS}",
		))
		.bind(UserId::new())
		.bind(&user.username)
		.bind(&user.email)
		.bind(user.auth_type)
		.bind(user.role)
		.bind(user.status)
		.fetch_one(tx.as_mut())
		.await
		.map_err(|source| {
			if is_unique_violation(&source) {
				Error::Conflict { what: "user" }
			} else {
				Error::from(source)
			}
		})
	}

	#[tracing::instrument(level = "debug", skip(self, tx), err(Debug, level = "debug"))]
	async fn delete_user(&self, tx: &mut Self::Tx, user_id: UserId) -> Result<()> {
		let result = sqlx::query(
			"UPDATE users SET deleted_at = now(), updated_at = now() \
			 WHERE id = $1 AND deleted_at IS NULL",
		)
		.bind(user_id)
		.execute(tx.as_mut())
		.await?;

		if result.rows_affected() == 0 {
			return Err(Error::NotFound { what: "user" });
		}

		Ok(())
	}
}

/// Whether `error` is a unique-constraint violation.
fn is_unique_violation(error: &sqlx::Error) -> bool {
	matches!(
		error,
		sqlx::Error::Database(db_error)
			if matches!(db_error.kind(), sqlx::error::ErrorKind::UniqueViolation)
	)
}
