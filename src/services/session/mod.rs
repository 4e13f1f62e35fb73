//! The session service.
//!
//! Sessions are the server-side state behind every bearer token: an opaque
//! random ID mapped to an encrypted payload and an expiry instant. This
//! service owns their lifecycle (create, read, refresh, finish one, finish
//! all) and the per-method role registry the RPC gate consults.
//!
//! # Consistency
//!
//! Every session exists in two places: the `session` namespace (ID →
//! encrypted payload) and the owning user's `user_session` index (presence
//! markers used for fanout termination). Both entries are always written,
//! expired, and deleted inside one store transaction, so they share an expiry
//! and appear or disappear together. Concurrent refresh and finish on the
//! same ID may interleave arbitrarily; finish wins, and the refresh becomes a
//! no-op against keys that no longer exist.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;

use crate::authorization::{Role, RouteRoles};
use crate::crypto::{Encryptor, Secret};
use crate::grpc::RpcGateLayer;
use crate::middleware::session_gate::SessionGateLayer;
use crate::store::{Namespace, StoreReader, StoreWriter, ENCRYPTED_VALUE_FIELD};
use crate::users::UserId;
use crate::{Error, Result};

pub(crate) mod models;
pub use models::{NewSession, SessionId, SessionPayload};

/// A service for managing sessions.
#[derive(Clone)]
pub struct SessionService<S> {
	/// The backing store.
	store: S,

	/// The secret used for sealing session payloads.
	secret: Secret,

	/// Opens sealed payloads where the store's uniform error mapping is too
	/// coarse (see [`SessionService::refresh_session()`]).
	encryptor: Encryptor,

	/// How long a session lives without being refreshed.
	timeout: Duration,

	/// The per-method role registry.
	roles: RouteRoles,
}

impl<S> fmt::Debug for SessionService<S> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SessionService")
			.field("timeout", &self.timeout)
			.finish_non_exhaustive()
	}
}

impl<S> SessionService<S> {
	/// Creates a new [`SessionService`].
	pub fn new(store: S, secret: Secret, timeout: Duration) -> Self {
		Self {
			store,
			secret,
			encryptor: Encryptor,
			timeout,
			roles: RouteRoles::new(),
		}
	}

	/// Generates a new expiration date for any given session.
	fn expires_on(&self) -> OffsetDateTime {
		OffsetDateTime::now_utc() + self.timeout
	}

	/// Registers the roles allowed to call `method`.
	///
	/// The routing layer is expected to do this before the accept loop
	/// starts.
	pub fn set_roles(
		&self,
		method: impl Into<String> + fmt::Debug,
		roles: impl Into<Vec<Role>> + fmt::Debug,
	) {
		self.roles.set(method, roles);
	}

	/// Returns the roles allowed to call `method`.
	pub fn get_roles(&self, method: &str) -> Result<Vec<Role>> {
		self.roles.get(method)
	}
}

impl<S> SessionService<S>
where
	S: StoreReader,
{
	/// Reads and unseals the payload of the given session.
	///
	/// # Errors
	///
	/// Returns [`Error::NotFound`] if the session does not exist (anymore),
	/// and [`Error::NotAuthorized`] if its stored payload fails integrity
	/// checks.
	#[tracing::instrument(level = "debug", skip(self), err(Debug, level = "debug"))]
	pub async fn get_session(&self, session_id: &str) -> Result<SessionPayload> {
		self.store
			.hash_get_encrypted(&Namespace::Session, session_id, &self.secret)
			.await
	}

	/// Creates an HTTP middleware that only lets requests through whose
	/// bearer token resolves to a session with one of the `allowed` roles.
	pub fn http_gate(&self, allowed: impl Into<Arc<[Role]>>) -> SessionGateLayer<S> {
		SessionGateLayer::new(self.store.clone(), self.secret, allowed)
	}

	/// Creates the stream-RPC middleware that gates every RPC on session
	/// validity and on the roles registered for the called method.
	pub fn rpc_gate(&self) -> RpcGateLayer<S> {
		RpcGateLayer::new(self.store.clone(), self.secret, self.roles.clone())
	}
}

impl<S> SessionService<S>
where
	S: StoreWriter,
{
	/// Creates a new session for `user_id` and returns its ID.
	///
	/// The payload is sealed and stored under the fresh session ID, a marker
	/// is appended to the user's session index, and both keys get the same
	/// expiry, all in one transaction.
	#[tracing::instrument(
		level = "debug",
		skip(self, session),
		fields(session.id = tracing::field::Empty, session.expires_on = tracing::field::Empty),
		err(Debug, level = "debug"),
	)]
	pub async fn create_session(&self, user_id: UserId, session: NewSession) -> Result<SessionId> {
		let session_id = SessionId::new();
		let expires_on = self.expires_on();

		tracing::Span::current()
			.record("session.id", format_args!("{session_id}"))
			.record("session.expires_on", format_args!("{expires_on}"));

		let key = session_id.to_string();

		// The chance of a UUID collision is negligible, but an ID silently
		// taking over another user's session must stay impossible.
		match self.store.hash_get(&Namespace::Session, &key, &[]).await {
			Err(error) if error.is_not_found() => {}
			Err(error) => return Err(error),
			Ok(_) => return Err(Error::internal("session id collision")),
		}

		let payload = session.into_payload(user_id);
		let user_ns = Namespace::UserSessions(user_id);

		let mut tx = self.store.begin();

		self.store
			.hash_set_encrypted(&mut tx, &Namespace::Session, &key, &self.secret, &payload)?;
		self.store.string_set(&mut tx, &user_ns, &key, "");
		self.store.expire_at(&mut tx, &Namespace::Session, &key, expires_on);
		self.store.expire_at(&mut tx, &user_ns, &key, expires_on);

		self.store.commit(tx).await?;

		tracing::debug!("created session");

		Ok(session_id)
	}

	/// Pushes the expiry of the given session out to `now + timeout`.
	///
	/// Refresh is advisory, not a resurrection primitive: if the session
	/// expires between our read and the write, the expiry updates land on
	/// absent keys and change nothing. The next authorization check fails
	/// either way.
	///
	/// # Errors
	///
	/// Returns [`Error::NotFound`] for a session that no longer exists.
	/// Unlike the gates, a stored value that fails to decrypt or parse is
	/// reported as [`Error::Internal`] here; nothing secret is revealed by
	/// telling the session's own holder that its server-side state is
	/// corrupt.
	#[tracing::instrument(level = "debug", skip(self), err(Debug, level = "debug"))]
	pub async fn refresh_session(&self, session_id: &str) -> Result<()> {
		let values = self
			.store
			.hash_get(&Namespace::Session, session_id, &[ENCRYPTED_VALUE_FIELD])
			.await?;

		let sealed = values
			.get(ENCRYPTED_VALUE_FIELD)
			.ok_or_else(|| Error::internal("session is missing its encrypted value"))?;

		let plaintext = self
			.encryptor
			.decrypt(sealed, &self.secret)
			.map_err(|source| Error::Internal { source: source.into() })?;

		let payload: SessionPayload = serde_json::from_slice(&plaintext)
			.map_err(|source| Error::Internal { source: source.into() })?;

		let expires_on = self.expires_on();
		let user_ns = Namespace::UserSessions(payload.user_id);

		let mut tx = self.store.begin();

		self.store
			.expire_at(&mut tx, &Namespace::Session, session_id, expires_on);
		self.store.expire_at(&mut tx, &user_ns, session_id, expires_on);

		self.store.commit(tx).await?;

		tracing::debug!(until = %expires_on, "refreshed session");

		Ok(())
	}

	/// Terminates the given session.
	///
	/// Idempotent in effect: finishing an already-finished session returns
	/// [`Error::NotFound`] and changes nothing. Callers that treat repeated
	/// logout as success can ignore that error.
	#[tracing::instrument(level = "debug", skip(self), err(Debug, level = "debug"))]
	pub async fn finish_session(&self, session_id: &str) -> Result<()> {
		let payload: SessionPayload = self
			.store
			.hash_get_encrypted(&Namespace::Session, session_id, &self.secret)
			.await?;

		let user_ns = Namespace::UserSessions(payload.user_id);
		let mut tx = self.store.begin();

		self.store.delete(&mut tx, &Namespace::Session, session_id);
		self.store.delete(&mut tx, &user_ns, session_id);

		self.store.commit(tx).await?;

		tracing::debug!(user.id = %payload.user_id, "finished session");

		Ok(())
	}

	/// Terminates every session belonging to `user_id`.
	///
	/// Enumeration is best-effort: sessions created after the index scan are
	/// not terminated by this call.
	#[tracing::instrument(level = "debug", skip(self), err(Debug, level = "debug"))]
	pub async fn finish_user_sessions(&self, user_id: UserId) -> Result<()> {
		let user_ns = Namespace::UserSessions(user_id);
		let keys = self.store.keys(&user_ns.key("*")).await?;

		if keys.is_empty() {
			tracing::debug!("user has no sessions to finish");
			return Ok(());
		}

		let prefix = user_ns.key("");
		let mut tx = self.store.begin();

		for key in &keys {
			let Some(session_id) = key.strip_prefix(&prefix) else {
				continue;
			};

			self.store.delete(&mut tx, &Namespace::Session, session_id);
			self.store.delete(&mut tx, &user_ns, session_id);
		}

		self.store.commit(tx).await?;

		tracing::debug!(count = keys.len(), "finished all sessions for user");

		Ok(())
	}
}
