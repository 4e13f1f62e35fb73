//! Request / Response types for this service.

use serde::{Deserialize, Serialize};

use crate::authorization::Role;
use crate::services::session::SessionId;
use crate::users::AuthType;

/// The response body of every endpoint that hands out a session token.
#[derive(Debug, Serialize)]
pub struct TokenResponse {
	/// The session token.
	pub token: SessionId,
}

/// Query parameters for the login handler.
#[derive(Debug, Deserialize)]
pub struct LoginQuery {
	/// The username to log in as.
	pub username: String,
}

/// Query parameters the provider sends to the callback handler.
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
	/// The authorization code to exchange.
	pub code: String,

	/// The anti-forgery state we sent when the flow began.
	pub state: String,
}

/// The signup data carried between the OAuth callback and `POST /signUp` in a
/// signed cookie.
#[derive(Debug, Serialize, Deserialize)]
pub struct SignUpData {
	/// The username chosen when the flow began.
	pub username: String,

	/// The email address reported by the provider.
	pub email: String,

	/// Which provider vouched for the user.
	pub auth_type: AuthType,

	/// The role the new account gets.
	pub role: Role,
}

/// Request body for deleting a user.
#[derive(Debug, Deserialize)]
pub struct DeleteUserRequest {
	/// The username of the account to delete.
	pub username: String,
}
