//! An in-process implementation of the session store.
//!
//! Mirrors the Redis backend's observable semantics without the network: keys
//! expire at absolute instants (checked lazily on access), transactions
//! buffer writes and apply them under a single lock, and `SET` clears any
//! existing expiry while `HSET` keeps it. The test suite runs entirely
//! against this backend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::de::DeserializeOwned;
use serde::Serialize;
use time::OffsetDateTime;

use super::{Namespace, StoreReader, StoreWriter, ENCRYPTED_VALUE_FIELD};
use crate::crypto::{Encryptor, Secret};
use crate::{Error, Result};

/// A session store that lives entirely in process memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
	/// The key space.
	entries: Arc<Mutex<HashMap<String, Entry>>>,

	/// Seals and opens encrypted values.
	encryptor: Encryptor,
}

/// A stored value plus its expiry.
#[derive(Debug, Clone)]
struct Entry {
	/// The value.
	value: Value,

	/// When this entry expires, if ever.
	expires_at: Option<OffsetDateTime>,
}

impl Entry {
	/// Whether this entry is past its expiry.
	fn is_expired(&self) -> bool {
		self.expires_at
			.is_some_and(|at| at <= OffsetDateTime::now_utc())
	}
}

/// The two value shapes the store deals in.
#[derive(Debug, Clone)]
enum Value {
	/// A plain string.
	String(String),

	/// A field → value hash.
	Hash(HashMap<String, String>),
}

/// A buffered write.
#[derive(Debug)]
enum Op {
	/// Merge fields into the hash at `key`, keeping any expiry.
	HashSet {
		key: String,
		values: HashMap<String, String>,
	},

	/// Replace the value at `key` with a string, clearing any expiry.
	StringSet {
		key: String,
		value: String,
	},

	/// Set the expiry of `key`, if it exists.
	ExpireAt {
		key: String,
		at: OffsetDateTime,
	},

	/// Remove `key`.
	Delete {
		key: String,
	},
}

/// A transaction against a [`MemoryStore`].
///
/// Holds buffered writes only; dropping it discards them.
#[derive(Debug, Default)]
pub struct MemoryTx {
	/// The buffered writes, in submission order.
	ops: Vec<Op>,
}

impl MemoryStore {
	/// Creates a new, empty [`MemoryStore`].
	pub fn new() -> Self {
		Self::default()
	}

	/// Locks the key space.
	fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
		self.entries.lock().expect("store lock is never poisoned")
	}

	/// Returns a clone of the live entry at `key`, sweeping it if it has
	/// expired.
	fn live_entry(&self, key: &str) -> Option<Entry> {
		let mut entries = self.lock();

		match entries.get(key) {
			Some(entry) if entry.is_expired() => {
				entries.remove(key);
				None
			}
			entry => entry.cloned(),
		}
	}
}

impl StoreReader for MemoryStore {
	async fn hash_get(
		&self,
		ns: &Namespace,
		key: &str,
		fields: &[&str],
	) -> Result<HashMap<String, String>> {
		let entry = self
			.live_entry(&ns.key(key))
			.ok_or(Error::NotFound { what: "key" })?;

		let Value::Hash(hash) = entry.value else {
			return Err(Error::internal("value is not a hash"));
		};

		let values: HashMap<String, String> = if fields.is_empty() {
			hash
		} else {
			fields
				.iter()
				.filter_map(|field| {
					let value = hash.get(*field)?;
					Some(((*field).to_owned(), value.clone()))
				})
				.collect()
		};

		if values.is_empty() {
			return Err(Error::NotFound { what: "key" });
		}

		Ok(values)
	}

	async fn hash_get_encrypted<T>(&self, ns: &Namespace, key: &str, secret: &Secret) -> Result<T>
	where
		T: DeserializeOwned,
	{
		let values = self.hash_get(ns, key, &[ENCRYPTED_VALUE_FIELD]).await?;
		let sealed = values
			.get(ENCRYPTED_VALUE_FIELD)
			.ok_or(Error::NotFound { what: "key" })?;

		let plaintext = self
			.encryptor
			.decrypt(sealed, secret)
			.map_err(|_| Error::NotAuthorized)?;

		serde_json::from_slice(&plaintext).map_err(|_| Error::NotAuthorized)
	}

	async fn string_get(&self, ns: &Namespace, key: &str) -> Result<String> {
		let entry = self
			.live_entry(&ns.key(key))
			.ok_or(Error::NotFound { what: "key" })?;

		match entry.value {
			Value::String(value) => Ok(value),
			Value::Hash(_) => Err(Error::internal("value is not a string")),
		}
	}

	async fn expire_time(&self, ns: &Namespace, key: &str) -> Result<OffsetDateTime> {
		let entry = self
			.live_entry(&ns.key(key))
			.ok_or(Error::NotFound { what: "key" })?;

		entry
			.expires_at
			.ok_or_else(|| Error::internal("key exists but has no expiration"))
	}

	async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
		let mut entries = self.lock();

		entries.retain(|_, entry| !entry.is_expired());

		let matches = |key: &str| match pattern.strip_suffix('*') {
			Some(prefix) => key.starts_with(prefix),
			None => key == pattern,
		};

		Ok(entries.keys().filter(|key| matches(key)).cloned().collect())
	}
}

impl StoreWriter for MemoryStore {
	type Tx = MemoryTx;

	fn begin(&self) -> Self::Tx {
		MemoryTx::default()
	}

	async fn commit(&self, tx: Self::Tx) -> Result<()> {
		let mut entries = self.lock();

		for op in tx.ops {
			match op {
				Op::HashSet { key, values } => {
					let entry = entries.entry(key).or_insert_with(|| Entry {
						value: Value::Hash(HashMap::new()),
						expires_at: None,
					});

					if let Value::Hash(hash) = &mut entry.value {
						hash.extend(values);
					} else {
						entry.value = Value::Hash(values);
					}
				}

				Op::StringSet { key, value } => {
					entries.insert(key, Entry {
						value: Value::String(value),
						expires_at: None,
					});
				}

				Op::ExpireAt { key, at } => {
					if let Some(entry) = entries.get_mut(&key) {
						entry.expires_at = Some(at);
					}
				}

				Op::Delete { key } => {
					entries.remove(&key);
				}
			}
		}

		Ok(())
	}

	fn hash_set(
		&self,
		tx: &mut Self::Tx,
		ns: &Namespace,
		key: &str,
		values: &HashMap<String, String>,
	) {
		tx.ops.push(Op::HashSet {
			key: ns.key(key),
			values: values.clone(),
		});
	}

	fn hash_set_encrypted<T>(
		&self,
		tx: &mut Self::Tx,
		ns: &Namespace,
		key: &str,
		secret: &Secret,
		value: &T,
	) -> Result<()>
	where
		T: Serialize,
	{
		let plaintext = serde_json::to_vec(value)?;
		let sealed = self
			.encryptor
			.encrypt(&plaintext, secret)
			.map_err(|source| Error::Internal { source: source.into() })?;

		tx.ops.push(Op::HashSet {
			key: ns.key(key),
			values: HashMap::from([(ENCRYPTED_VALUE_FIELD.to_owned(), sealed)]),
		});

		Ok(())
	}

	fn string_set(&self, tx: &mut Self::Tx, ns: &Namespace, key: &str, value: &str) {
		tx.ops.push(Op::StringSet {
			key: ns.key(key),
			value: value.to_owned(),
		});
	}

	fn expire_at(&self, tx: &mut Self::Tx, ns: &Namespace, key: &str, at: OffsetDateTime) {
		tx.ops.push(Op::ExpireAt { key: ns.key(key), at });
	}

	fn delete(&self, tx: &mut Self::Tx, ns: &Namespace, key: &str) {
		tx.ops.push(Op::Delete { key: ns.key(key) });
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use super::*;
	use crate::crypto::SECRET_LEN;

	fn secret() -> Secret {
		Secret::new([7; SECRET_LEN])
	}

	#[tokio::test]
	async fn writes_are_invisible_until_commit() {
		let store = MemoryStore::new();
		let ns = Namespace::Session;

		let mut tx = store.begin();
		store.string_set(&mut tx, &ns, "abc", "");

		assert!(store.string_get(&ns, "abc").await.is_err());

		store.commit(tx).await.unwrap();

		assert_eq!(store.string_get(&ns, "abc").await.unwrap(), "");
	}

	#[tokio::test]
	async fn dropping_a_transaction_rolls_back() {
		let store = MemoryStore::new();
		let ns = Namespace::Session;

		let mut tx = store.begin();
		store.string_set(&mut tx, &ns, "abc", "");
		store.rollback(tx);

		assert!(store.string_get(&ns, "abc").await.is_err());
	}

	#[tokio::test]
	async fn expired_keys_are_absent() {
		let store = MemoryStore::new();
		let ns = Namespace::Session;

		let mut tx = store.begin();
		store.string_set(&mut tx, &ns, "abc", "");
		store.expire_at(&mut tx, &ns, "abc", OffsetDateTime::now_utc() + Duration::from_millis(40));
		store.commit(tx).await.unwrap();

		assert!(store.string_get(&ns, "abc").await.is_ok());

		tokio::time::sleep(Duration::from_millis(60)).await;

		assert!(matches!(
			store.string_get(&ns, "abc").await,
			Err(Error::NotFound { .. }),
		));
	}

	#[tokio::test]
	async fn expiring_an_absent_key_is_a_no_op() {
		let store = MemoryStore::new();
		let ns = Namespace::Session;

		let mut tx = store.begin();
		store.expire_at(&mut tx, &ns, "ghost", OffsetDateTime::now_utc() + Duration::from_secs(60));

		store.commit(tx).await.unwrap();

		assert!(store.expire_time(&ns, "ghost").await.is_err());
	}

	#[tokio::test]
	async fn encrypted_round_trip() {
		let store = MemoryStore::new();
		let ns = Namespace::Session;
		let value = HashMap::from([(String::from("role"), String::from("2"))]);

		let mut tx = store.begin();
		store
			.hash_set_encrypted(&mut tx, &ns, "abc", &secret(), &value)
			.unwrap();
		store.commit(tx).await.unwrap();

		let read: HashMap<String, String> = store
			.hash_get_encrypted(&ns, "abc", &secret())
			.await
			.unwrap();

		assert_eq!(read, value);
	}

	#[tokio::test]
	async fn corrupted_values_read_as_unauthorized() {
		let store = MemoryStore::new();
		let ns = Namespace::Session;

		let mut tx = store.begin();
		store.hash_set(
			&mut tx,
			&ns,
			"abc",
			&HashMap::from([(ENCRYPTED_VALUE_FIELD.to_owned(), String::from("corrupted"))]),
		);
		store.commit(tx).await.unwrap();

		let result = store
			.hash_get_encrypted::<HashMap<String, String>>(&ns, "abc", &secret())
			.await;

		assert!(matches!(result, Err(Error::NotAuthorized)));
	}

	#[tokio::test]
	async fn keys_matches_prefix_patterns() {
		let store = MemoryStore::new();
		let ns = Namespace::Session;

		let mut tx = store.begin();
		store.string_set(&mut tx, &ns, "one", "");
		store.string_set(&mut tx, &ns, "two", "");
		store.commit(tx).await.unwrap();

		let mut keys = store.keys("session:*").await.unwrap();
		keys.sort();

		assert_eq!(keys, ["session:one", "session:two"]);
		assert_eq!(store.keys("user_session:*").await.unwrap(), Vec::<String>::new());
	}
}
