//! The per-method role registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use super::Role;
use crate::{Error, Result};

/// Maps method identifiers (gRPC full methods such as
/// `/chat.Chat/Subscribe`) to the roles allowed to call them.
///
/// The routing layer registers every method before the accept loop starts;
/// afterwards the map is read on every gated request. Mutation after startup
/// is possible but not expected, which is why a plain read-write lock is
/// enough here.
#[derive(Clone, Default)]
pub struct RouteRoles {
	/// The method → roles map.
	inner: Arc<RwLock<HashMap<String, Vec<Role>>>>,
}

impl fmt::Debug for RouteRoles {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RouteRoles").finish_non_exhaustive()
	}
}

impl RouteRoles {
	/// Creates a new, empty [`RouteRoles`] registry.
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers the roles allowed to call `method`.
	///
	/// Replaces any previous registration for the same method.
	#[tracing::instrument(level = "debug", skip(self))]
	pub fn set(
		&self,
		method: impl Into<String> + fmt::Debug,
		roles: impl Into<Vec<Role>> + fmt::Debug,
	) {
		self.inner
			.write()
			.expect("role registry lock is never poisoned")
			.insert(method.into(), roles.into());
	}

	/// Returns the roles allowed to call `method`.
	///
	/// # Errors
	///
	/// Returns [`Error::NotFound`] if the method was never registered.
	pub fn get(&self, method: &str) -> Result<Vec<Role>> {
		self.inner
			.read()
			.expect("role registry lock is never poisoned")
			.get(method)
			.cloned()
			.ok_or(Error::NotFound { what: "method" })
	}

	/// Whether `role` is allowed to call `method`.
	///
	/// An unregistered method allows nobody.
	pub fn allows(&self, method: &str, role: Role) -> bool {
		self.get(method)
			.map(|roles| roles.contains(&role))
			.unwrap_or(false)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn unregistered_methods_allow_nobody() {
		let registry = RouteRoles::new();

		assert!(registry.get("/chat.Chat/Subscribe").is_err());
		assert!(!registry.allows("/chat.Chat/Subscribe", Role::Admin));
	}

	#[test]
	fn registration_is_read_back() {
		let registry = RouteRoles::new();

		registry.set("/chat.Chat/Subscribe", [Role::Admin, Role::User]);
		registry.set("/chat.Chat/Moderate", [Role::Admin]);

		assert_eq!(
			registry.get("/chat.Chat/Subscribe").unwrap(),
			vec![Role::Admin, Role::User],
		);
		assert!(registry.allows("/chat.Chat/Moderate", Role::Admin));
		assert!(!registry.allows("/chat.Chat/Moderate", Role::User));
	}

	#[test]
	fn re_registration_replaces() {
		let registry = RouteRoles::new();

		registry.set("/chat.Chat/Subscribe", [Role::Admin, Role::User]);
		registry.set("/chat.Chat/Subscribe", [Role::Admin]);

		assert!(!registry.allows("/chat.Chat/Subscribe", Role::User));
	}
}
