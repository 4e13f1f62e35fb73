//! The user repository.
//!
//! Users are created during signup and live in the relational database; the
//! session manager only ever sees their IDs. The repository is split into a
//! read-only capability ([`UserReader`]) and a full read-write capability
//! ([`UserRepository`]) so code paths that only look users up (the OAuth
//! callback, for example) can take the narrower one.
//!
//! [`UserRepository`] is parameterized over its transaction type. The auth
//! service scopes user creation and session creation in one such transaction;
//! dropping an uncommitted handle rolls it back, so every early return is a
//! rollback.

use std::fmt;
use std::future::Future;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::authorization::Role;
use crate::Result;

mod postgres;

#[doc(inline)]
pub use postgres::PostgresUserRepository;

/// A user ID.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct UserId(Uuid);

impl UserId {
	/// Generates a new random ID.
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl fmt::Display for UserId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Display::fmt(self.0.as_hyphenated(), f)
	}
}

impl fmt::Debug for UserId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("UserId").field(self.0.as_hyphenated()).finish()
	}
}

impl FromStr for UserId {
	type Err = uuid::Error;

	fn from_str(value: &str) -> Result<Self, Self::Err> {
		value.parse::<Uuid>().map(Self)
	}
}

/// The error returned when converting an unknown integer or string into an
/// [`AuthType`] or [`UserStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid {what}")]
pub struct InvalidDiscriminant {
	/// Which enumeration rejected the value.
	what: &'static str,
}

/// Which third-party provider a user authenticated with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[repr(i16)]
pub enum AuthType {
	/// Google OAuth.
	Google = 1,

	/// GitHub OAuth.
	Github = 2,
}

impl AuthType {
	/// Returns the provider's name.
	pub const fn name(&self) -> &'static str {
		match self {
			Self::Google => "google",
			Self::Github => "github",
		}
	}
}

impl fmt::Display for AuthType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.name())
	}
}

impl TryFrom<i16> for AuthType {
	type Error = InvalidDiscriminant;

	fn try_from(value: i16) -> Result<Self, Self::Error> {
		match value {
			1 => Ok(Self::Google),
			2 => Ok(Self::Github),
			_ => Err(InvalidDiscriminant { what: "auth type" }),
		}
	}
}

impl FromStr for AuthType {
	type Err = InvalidDiscriminant;

	fn from_str(value: &str) -> Result<Self, Self::Err> {
		match value {
			"google" => Ok(Self::Google),
			"github" => Ok(Self::Github),
			_ => Err(InvalidDiscriminant { what: "auth type" }),
		}
	}
}

impl Serialize for AuthType {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_i16(*self as i16)
	}
}

impl<'de> Deserialize<'de> for AuthType {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		Self::try_from(i16::deserialize(deserializer)?).map_err(serde::de::Error::custom)
	}
}

/// Whether a user account is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[repr(i16)]
pub enum UserStatus {
	/// The account is active.
	Active = 1,

	/// The account has been deactivated.
	Inactive = 2,
}

impl TryFrom<i16> for UserStatus {
	type Error = InvalidDiscriminant;

	fn try_from(value: i16) -> Result<Self, Self::Error> {
		match value {
			1 => Ok(Self::Active),
			2 => Ok(Self::Inactive),
			_ => Err(InvalidDiscriminant { what: "user status" }),
		}
	}
}

impl Serialize for UserStatus {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_i16(*self as i16)
	}
}

impl<'de> Deserialize<'de> for UserStatus {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		Self::try_from(i16::deserialize(deserializer)?).map_err(serde::de::Error::custom)
	}
}

/// A user account.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct User {
	/// The user's ID.
	pub id: UserId,

	/// The user's name.
	pub username: String,

	/// The user's email address, as reported by the OAuth provider.
	pub email: String,

	/// Which provider the user authenticated with.
	pub auth_type: AuthType,

	/// The user's role.
	pub role: Role,

	/// Whether the account is active.
	pub status: UserStatus,

	/// When the account was created.
	pub created_at: OffsetDateTime,

	/// When the account was last updated.
	pub updated_at: OffsetDateTime,

	/// When the account was soft-deleted, if ever.
	pub deleted_at: Option<OffsetDateTime>,
}

/// The data required to create a new [`User`].
#[derive(Debug, Clone)]
pub struct NewUser {
	/// The user's name.
	pub username: String,

	/// The user's email address.
	pub email: String,

	/// Which provider the user authenticated with.
	pub auth_type: AuthType,

	/// The user's role.
	pub role: Role,

	/// Whether the account is active.
	pub status: UserStatus,
}

/// Filters and pagination for [`UserReader::list_users()`].
#[derive(Debug, Clone, Deserialize)]
pub struct ListUsersQuery {
	/// Only return users with this role.
	#[serde(default)]
	pub role: Option<Role>,

	/// Only return users with this status.
	#[serde(default)]
	pub status: Option<UserStatus>,

	/// Only return users that authenticated with this provider.
	#[serde(default)]
	pub auth_type: Option<AuthType>,

	/// Maximum amount of users to return.
	#[serde(default = "ListUsersQuery::default_limit")]
	pub limit: i64,

	/// Amount of users to skip.
	#[serde(default)]
	pub offset: i64,
}

impl ListUsersQuery {
	/// The default `limit` value.
	const fn default_limit() -> i64 {
		100
	}
}

impl Default for ListUsersQuery {
	fn default() -> Self {
		Self {
			role: None,
			status: None,
			auth_type: None,
			limit: Self::default_limit(),
			offset: 0,
		}
	}
}

/// Read-only access to user accounts.
pub trait UserReader: Clone + Send + Sync + 'static {
	/// Fetches a user by their ID.
	///
	/// Soft-deleted users are not returned.
	fn user_by_id(&self, user_id: UserId) -> impl Future<Output = Result<User>> + Send;

	/// Fetches a user by their username.
	fn user_by_username(&self, username: &str) -> impl Future<Output = Result<User>> + Send;

	/// Lists users matching `query`.
	fn list_users(&self, query: ListUsersQuery) -> impl Future<Output = Result<Vec<User>>> + Send;
}

/// Full read-write access to user accounts.
pub trait UserRepository: UserReader {
	/// The repository's transaction handle.
	///
	/// Dropping an uncommitted handle rolls the transaction back.
	type Tx: Send;

	/// Begins a new transaction.
	fn begin(&self) -> impl Future<Output = Result<Self::Tx>> + Send;

	/// Commits a transaction.
	fn commit(&self, tx: Self::Tx) -> impl Future<Output = Result<()>> + Send;

	/// Creates a new user.
	///
	/// # Errors
	///
	/// Returns [`Error::Conflict`] if a live user with the same username
	/// already exists.
	///
	/// [`Error::Conflict`]: crate::Error::Conflict
	fn create_user(&self, tx: &mut Self::Tx, user: NewUser)
	-> impl Future<Output = Result<User>> + Send;

	/// Soft-deletes a user.
	fn delete_user(&self, tx: &mut Self::Tx, user_id: UserId)
	-> impl Future<Output = Result<()>> + Send;
}
