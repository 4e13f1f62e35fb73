//! Runtime errors.
//!
//! This module exposes the [`Error`] type that is used across the code base
//! for bubbling up errors. Every error that can reach a caller falls into one
//! of five kinds: bad request, not authorized, not found, conflict, and
//! internal. The kind decides the HTTP status code and the (deliberately
//! terse) response body.
//!
//! This module also exposes a [`Result`] type alias, which sets [`Error`] as
//! the default `E` type parameter.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Type alias with a default `Err` type of [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The API's core error type.
///
/// Authorization failures carry no detail on purpose; a caller must not be
/// able to distinguish a missing session from a tampered one.
#[derive(Debug, Error)]
pub enum Error {
	/// The caller sent something we could not work with.
	#[error("{message}")]
	BadRequest {
		/// What exactly was wrong with the request.
		message: String,
	},

	/// Credentials were missing, invalid, expired, or had the wrong role.
	#[error("unauthorized")]
	NotAuthorized,

	/// The requested entity does not exist.
	#[error("could not find {what}")]
	NotFound {
		/// The kind of entity we could not find.
		what: &'static str,
	},

	/// A unique constraint was violated.
	#[error("{what} already exists")]
	Conflict {
		/// The kind of entity that already exists.
		what: &'static str,
	},

	/// Any unclassified backend failure.
	///
	/// The source chain is logged but never sent to the caller.
	#[error("something went wrong")]
	Internal {
		/// The original error.
		#[from]
		source: anyhow::Error,
	},
}

impl Error {
	/// Creates a [`Error::BadRequest`] with the given message.
	pub fn bad_request(message: impl Into<String>) -> Self {
		Self::BadRequest { message: message.into() }
	}

	/// Creates a [`Error::Internal`] from a plain message.
	pub fn internal(message: impl Into<String>) -> Self {
		Self::Internal { source: anyhow::Error::msg(message.into()) }
	}

	/// Whether this error is a [`Error::NotFound`].
	pub fn is_not_found(&self) -> bool {
		matches!(self, Self::NotFound { .. })
	}

	/// The HTTP status code this error maps to.
	pub fn status(&self) -> StatusCode {
		match self {
			Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
			Self::NotAuthorized => StatusCode::UNAUTHORIZED,
			Self::NotFound { .. } => StatusCode::NOT_FOUND,
			Self::Conflict { .. } => StatusCode::CONFLICT,
			Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}
}

impl IntoResponse for Error {
	fn into_response(self) -> Response {
		if let Self::Internal { ref source } = self {
			tracing::error!(error = ?source, "internal error while handling request");
		}

		// Gated endpoints promise exactly this body on 401.
		let body = match self {
			Self::NotAuthorized => String::from("Unauthorized\n"),
			ref error => format!("{error}\n"),
		};

		(self.status(), body).into_response()
	}
}

impl From<redis::RedisError> for Error {
	fn from(source: redis::RedisError) -> Self {
		Self::Internal { source: source.into() }
	}
}

impl From<serde_json::Error> for Error {
	fn from(source: serde_json::Error) -> Self {
		Self::Internal { source: source.into() }
	}
}

impl From<sqlx::Error> for Error {
	fn from(source: sqlx::Error) -> Self {
		match source {
			sqlx::Error::RowNotFound => Self::NotFound { what: "row" },
			source => Self::Internal { source: source.into() },
		}
	}
}
