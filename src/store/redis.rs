//! The Redis implementation of the session store.
//!
//! Transactions are [`redis::Pipeline`]s in atomic (`MULTI`/`EXEC`) mode:
//! building one buffers commands locally, committing sends the whole batch in
//! one round trip, and Redis applies it atomically. Dropping an uncommitted
//! pipeline never reaches the server at all.

use std::collections::HashMap;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use time::OffsetDateTime;
use url::Url;

use super::{Namespace, StoreReader, StoreWriter, ENCRYPTED_VALUE_FIELD};
use crate::crypto::{Encryptor, Secret};
use crate::{Error, Result};

/// A session store backed by Redis.
#[derive(Clone)]
pub struct RedisStore {
	/// The shared multiplexed connection.
	conn: ConnectionManager,

	/// Seals and opens encrypted values.
	encryptor: Encryptor,
}

impl std::fmt::Debug for RedisStore {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RedisStore").finish_non_exhaustive()
	}
}

impl RedisStore {
	/// Connects to the Redis instance at `url`.
	#[tracing::instrument(skip(url), err(Debug))]
	pub async fn connect(url: &Url) -> Result<Self> {
		let client = redis::Client::open(url.as_str())?;
		let conn = ConnectionManager::new(client).await?;

		Ok(Self { conn, encryptor: Encryptor })
	}
}

impl StoreReader for RedisStore {
	#[tracing::instrument(level = "trace", skip(self), err(Debug, level = "debug"))]
	async fn hash_get(
		&self,
		ns: &Namespace,
		key: &str,
		fields: &[&str],
	) -> Result<HashMap<String, String>> {
		let mut conn = self.conn.clone();
		let key = ns.key(key);

		let values = if fields.is_empty() {
			conn.hgetall::<_, HashMap<String, String>>(&key).await?
		} else {
			let values: Vec<Option<String>> = redis::cmd("HMGET")
				.arg(&key)
				.arg(fields)
				.query_async(&mut conn)
				.await?;

			fields
				.iter()
				.zip(values)
				.filter_map(|(field, value)| Some(((*field).to_owned(), value?)))
				.collect()
		};

		if values.is_empty() {
			return Err(Error::NotFound { what: "key" });
		}

		Ok(values)
	}

	#[tracing::instrument(level = "trace", skip(self, secret), err(Debug, level = "debug"))]
	async fn hash_get_encrypted<T>(&self, ns: &Namespace, key: &str, secret: &Secret) -> Result<T>
	where
		T: DeserializeOwned,
	{
		let mut conn = self.conn.clone();
		let key = ns.key(key);

		let sealed: Option<String> = conn.hget(&key, ENCRYPTED_VALUE_FIELD).await?;
		let sealed = sealed.ok_or(Error::NotFound { what: "key" })?;

		let plaintext = self.encryptor.decrypt(&sealed, secret).map_err(|error| {
			tracing::debug!(%key, %error, "stored value failed to decrypt");
			Error::NotAuthorized
		})?;

		serde_json::from_slice(&plaintext).map_err(|error| {
			tracing::debug!(%key, %error, "stored value failed to parse");
			Error::NotAuthorized
		})
	}

	#[tracing::instrument(level = "trace", skip(self), err(Debug, level = "debug"))]
	async fn string_get(&self, ns: &Namespace, key: &str) -> Result<String> {
		let mut conn = self.conn.clone();
		let value: Option<String> = conn.get(ns.key(key)).await?;

		value.ok_or(Error::NotFound { what: "key" })
	}

	#[tracing::instrument(level = "trace", skip(self), err(Debug, level = "debug"))]
	async fn expire_time(&self, ns: &Namespace, key: &str) -> Result<OffsetDateTime> {
		let mut conn = self.conn.clone();
		let timestamp: i64 = redis::cmd("EXPIRETIME")
			.arg(ns.key(key))
			.query_async(&mut conn)
			.await?;

		match timestamp {
			-2 => Err(Error::NotFound { what: "key" }),
			-1 => Err(Error::internal("key exists but has no expiration")),
			timestamp => OffsetDateTime::from_unix_timestamp(timestamp)
				.map_err(|source| Error::Internal { source: source.into() }),
		}
	}

	#[tracing::instrument(level = "trace", skip(self), err(Debug, level = "debug"))]
	async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
		let mut conn = self.conn.clone();
		let keys: Vec<String> = conn.keys(pattern).await?;

		Ok(keys)
	}
}

impl StoreWriter for RedisStore {
	type Tx = redis::Pipeline;

	fn begin(&self) -> Self::Tx {
		let mut pipe = redis::pipe();
		pipe.atomic();
		pipe
	}

	#[tracing::instrument(level = "trace", skip_all, err(Debug, level = "debug"))]
	async fn commit(&self, tx: Self::Tx) -> Result<()> {
		let mut conn = self.conn.clone();
		let () = tx.query_async(&mut conn).await?;

		Ok(())
	}

	fn hash_set(
		&self,
		tx: &mut Self::Tx,
		ns: &Namespace,
		key: &str,
		values: &HashMap<String, String>,
	) {
		let key = ns.key(key);

		for (field, value) in values {
			tx.hset(&key, field, value).ignore();
		}
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

		tx.hset(ns.key(key), ENCRYPTED_VALUE_FIELD, sealed).ignore();

		Ok(())
	}

	fn string_set(&self, tx: &mut Self::Tx, ns: &Namespace, key: &str, value: &str) {
		tx.set(ns.key(key), value).ignore();
	}

	fn expire_at(&self, tx: &mut Self::Tx, ns: &Namespace, key: &str, at: OffsetDateTime) {
		tx.expire_at(ns.key(key), at.unix_timestamp()).ignore();
	}

	fn delete(&self, tx: &mut Self::Tx, ns: &Namespace, key: &str) {
		tx.del(ns.key(key)).ignore();
	}
}
