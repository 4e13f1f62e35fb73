//! The session store.
//!
//! Sessions physically live in an external expiring key-value store. This
//! module hides which one: the canonical backend is Redis (see
//! [`RedisStore`]), and an in-process [`MemoryStore`] with the same semantics
//! backs the test suite. Both are driven through the [`StoreReader`] /
//! [`StoreWriter`] capability pair, so code paths that only ever read (the
//! request gates) can take the narrower capability.
//!
//! # Keys
//!
//! Every key is `<namespace>:<suffix>` (see [`Namespace`]):
//!
//! - `session:<sessionId>` is a hash with the single field
//!   `encrypted_value`, holding the sealed session payload. TTL set.
//! - `user_session:<userId>:<sessionId>` is an empty string acting as a
//!   presence marker in the per-user index. TTL matches the session.
//!
//! # Transactions
//!
//! Writes are buffered on a [`StoreWriter::Tx`] handle and applied atomically
//! by [`StoreWriter::commit()`]. Reads are not transactional and see committed
//! state. Dropping an uncommitted handle discards the buffered writes, which
//! means every exit path that does not commit is a rollback; there is no
//! separate cleanup to forget.
//!
//! # Failure mapping
//!
//! Connectivity, serialization, and encryption failures surface as
//! [`Error::Internal`]; absent keys as [`Error::NotFound`]. The one deliberate
//! exception is [`StoreReader::hash_get_encrypted()`]: a value that fails to
//! decrypt or parse surfaces as [`Error::NotAuthorized`], so that a tampered
//! session is indistinguishable from a missing one.
//!
//! [`Error::Internal`]: crate::Error::Internal
//! [`Error::NotFound`]: crate::Error::NotFound
//! [`Error::NotAuthorized`]: crate::Error::NotAuthorized

use std::collections::HashMap;
use std::fmt;
use std::future::Future;

use serde::de::DeserializeOwned;
use serde::Serialize;
use time::OffsetDateTime;

use crate::crypto::Secret;
use crate::users::UserId;
use crate::Result;

mod redis;

#[doc(inline)]
pub use self::redis::RedisStore;

mod memory;

#[doc(inline)]
pub use memory::MemoryStore;

/// The hash field that holds a sealed session payload.
pub const ENCRYPTED_VALUE_FIELD: &str = "encrypted_value";

/// A logical key namespace within the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
	/// Sessions, keyed by session ID.
	Session,

	/// The per-user session index, keyed by session ID.
	UserSessions(UserId),
}

impl Namespace {
	/// Builds the fully-qualified key for `suffix` in this namespace.
	pub fn key(&self, suffix: &str) -> String {
		format!("{self}:{suffix}")
	}
}

impl fmt::Display for Namespace {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Session => f.write_str("session"),
			Self::UserSessions(user_id) => write!(f, "user_session:{user_id}"),
		}
	}
}

/// Read-only access to the session store.
pub trait StoreReader: Clone + Send + Sync + 'static {
	/// Reads raw hash fields of `<ns>:<key>`.
	///
	/// Passing no `fields` reads the whole hash.
	///
	/// # Errors
	///
	/// Returns [`Error::NotFound`] if the key does not exist.
	///
	/// [`Error::NotFound`]: crate::Error::NotFound
	fn hash_get(
		&self,
		ns: &Namespace,
		key: &str,
		fields: &[&str],
	) -> impl Future<Output = Result<HashMap<String, String>>> + Send;

	/// Reads and unseals the encrypted value stored at `<ns>:<key>`.
	///
	/// # Errors
	///
	/// Returns [`Error::NotFound`] if the key does not exist, and
	/// [`Error::NotAuthorized`] if the stored value fails to decrypt or
	/// parse.
	///
	/// [`Error::NotFound`]: crate::Error::NotFound
	/// [`Error::NotAuthorized`]: crate::Error::NotAuthorized
	fn hash_get_encrypted<T>(
		&self,
		ns: &Namespace,
		key: &str,
		secret: &Secret,
	) -> impl Future<Output = Result<T>> + Send
	where
		T: DeserializeOwned;

	/// Reads the string value stored at `<ns>:<key>`.
	fn string_get(&self, ns: &Namespace, key: &str)
	-> impl Future<Output = Result<String>> + Send;

	/// Returns the absolute instant at which `<ns>:<key>` expires.
	fn expire_time(
		&self,
		ns: &Namespace,
		key: &str,
	) -> impl Future<Output = Result<OffsetDateTime>> + Send;

	/// Returns all fully-qualified keys matching `pattern`.
	///
	/// Only prefix patterns anchored at a namespace (such as
	/// `user_session:<userId>:*`) are supported by every backend.
	fn keys(&self, pattern: &str) -> impl Future<Output = Result<Vec<String>>> + Send;
}

/// Full read-write access to the session store.
pub trait StoreWriter: StoreReader {
	/// The store's transaction handle.
	///
	/// Writes below buffer into the handle; nothing hits the backend before
	/// [`StoreWriter::commit()`]. Dropping an uncommitted handle discards the
	/// buffered writes.
	type Tx: Send;

	/// Begins a new transaction.
	fn begin(&self) -> Self::Tx;

	/// Atomically applies all writes buffered in `tx`.
	fn commit(&self, tx: Self::Tx) -> impl Future<Output = Result<()>> + Send;

	/// Discards `tx` without applying it.
	///
	/// Equivalent to dropping the handle; provided for call sites that want
	/// to make the rollback explicit.
	fn rollback(&self, tx: Self::Tx) {
		drop(tx);
	}

	/// Buffers raw hash writes to `<ns>:<key>`.
	fn hash_set(
		&self,
		tx: &mut Self::Tx,
		ns: &Namespace,
		key: &str,
		values: &HashMap<String, String>,
	);

	/// Seals `value` and buffers it as the encrypted value of `<ns>:<key>`.
	///
	/// # Errors
	///
	/// Serialization and encryption failures surface as [`Error::Internal`]
	/// without anything having been buffered.
	///
	/// [`Error::Internal`]: crate::Error::Internal
	fn hash_set_encrypted<T>(
		&self,
		tx: &mut Self::Tx,
		ns: &Namespace,
		key: &str,
		secret: &Secret,
		value: &T,
	) -> Result<()>
	where
		T: Serialize;

	/// Buffers a string write to `<ns>:<key>`.
	fn string_set(&self, tx: &mut Self::Tx, ns: &Namespace, key: &str, value: &str);

	/// Buffers an absolute-expiry update for `<ns>:<key>`.
	///
	/// Expiring a key that does not exist at commit time is a no-op, not an
	/// error; refresh relies on this.
	fn expire_at(&self, tx: &mut Self::Tx, ns: &Namespace, key: &str, at: OffsetDateTime);

	/// Buffers a deletion of `<ns>:<key>`.
	fn delete(&self, tx: &mut Self::Tx, ns: &Namespace, key: &str);
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn keys_are_namespaced() {
		let user_id = "63a4a09d-8d9c-4b56-9eb9-8ec9fe3b0b59"
			.parse::<UserId>()
			.unwrap();

		assert_eq!(Namespace::Session.key("abc"), "session:abc");
		assert_eq!(
			Namespace::UserSessions(user_id).key("abc"),
			format!("user_session:{user_id}:abc"),
		);
	}
}
