//! User roles.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// A user's role.
///
/// Roles are represented by stable small integers both in the database and in
/// encrypted session payloads; the discriminants below are part of the wire
/// format and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[repr(i16)]
pub enum Role {
	/// An administrator.
	Admin = 1,

	/// A regular user.
	User = 2,
}

/// The error returned when converting an unknown integer or string into a
/// [`Role`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid role")]
pub struct InvalidRole;

impl Role {
	/// Returns the role's name.
	pub const fn name(&self) -> &'static str {
		match self {
			Self::Admin => "admin",
			Self::User => "user",
		}
	}
}

impl fmt::Display for Role {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.name())
	}
}

impl TryFrom<i16> for Role {
	type Error = InvalidRole;

	fn try_from(value: i16) -> Result<Self, Self::Error> {
		match value {
			1 => Ok(Self::Admin),
			2 => Ok(Self::User),
			_ => Err(InvalidRole),
		}
	}
}

impl FromStr for Role {
	type Err = InvalidRole;

	fn from_str(value: &str) -> Result<Self, Self::Err> {
		match value {
			"admin" => Ok(Self::Admin),
			"user" => Ok(Self::User),
			_ => Err(InvalidRole),
		}
	}
}

impl Serialize for Role {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_i16(*self as i16)
	}
}

impl<'de> Deserialize<'de> for Role {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		Self::try_from(i16::deserialize(deserializer)?).map_err(serde::de::Error::custom)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn wire_format_is_stable() {
		assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "1");
		assert_eq!(serde_json::to_string(&Role::User).unwrap(), "2");
		assert_eq!(serde_json::from_str::<Role>("2").unwrap(), Role::User);
		assert!(serde_json::from_str::<Role>("3").is_err());
	}
}
