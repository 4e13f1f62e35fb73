//! Types used by the session service.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::authorization::Role;
use crate::users::{AuthType, UserId, UserStatus};

/// A session ID.
///
/// Opaque to callers; 128 bits of randomness rendered in the hyphenated
/// (URL-safe) form. This is the bearer token gated requests carry.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
	/// Generates a new random ID.
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl fmt::Display for SessionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Display::fmt(self.0.as_hyphenated(), f)
	}
}

impl fmt::Debug for SessionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("SessionId")
			.field(self.0.as_hyphenated())
			.finish()
	}
}

impl FromStr for SessionId {
	type Err = uuid::Error;

	fn from_str(value: &str) -> Result<Self, Self::Err> {
		value.parse::<Uuid>().map(Self)
	}
}

/// The encrypted contents of a session.
///
/// This is a closed set of fields with a dedicated serializer; the roles and
/// statuses go over the wire as stable small integers, so what ends up sealed
/// in the store is e.g. `{"user_id":"…","role":2,"status":1,"auth_type":1}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPayload {
	/// The user this session belongs to.
	pub user_id: UserId,

	/// The user's role at login time.
	pub role: Role,

	/// The account status at login time.
	pub status: UserStatus,

	/// Which provider the user authenticated with.
	pub auth_type: AuthType,
}

/// The caller-supplied part of a new session's payload.
///
/// The session service injects the `user_id` itself, which is what keeps a
/// session's payload and its index entry pointing at the same user.
#[derive(Debug, Clone, Copy)]
pub struct NewSession {
	/// The user's role.
	pub role: Role,

	/// The account status.
	pub status: UserStatus,

	/// Which provider the user authenticated with.
	pub auth_type: AuthType,
}

impl NewSession {
	/// Completes this into a full [`SessionPayload`] for `user_id`.
	pub(super) fn into_payload(self, user_id: UserId) -> SessionPayload {
		SessionPayload {
			user_id,
			role: self.role,
			status: self.status,
			auth_type: self.auth_type,
		}
	}
}
