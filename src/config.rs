//! Configuration that is loaded at startup and then used throughout the application.
//!
//! Every value comes from the environment (a `.env` file is loaded first if
//! present). Parsing is strict: a missing variable, a timeout that isn't a
//! duration, or a session-manager secret that isn't exactly 32 bytes all
//! fail [`Config::new()`], and the process exits non-zero before binding the
//! listen socket.

use std::fmt::{self, Debug};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use axum_extra::extract::cookie::Key;
use serde::{Deserialize, Deserializer};
use url::Url;

use crate::crypto::Secret;

/// This struct is initialized once when the API starts up, and its values are
/// read from the environment.
#[derive(Clone, Deserialize)]
pub struct Config {
	/// The IP address the HTTP server should listen on.
	#[serde(default = "default_ip_addr")]
	pub ip: IpAddr,

	/// The port the HTTP server should listen on.
	pub port: u16,

	/// How long a session lives without being refreshed, e.g. `30m`.
	#[serde(deserialize_with = "deserialize_duration")]
	pub session_timeout: Duration,

	/// The 32-byte secret used for sealing session payloads.
	pub session_manager_secret: Secret,

	/// The secret the OAuth flow's cookies are signed with.
	#[serde(deserialize_with = "deserialize_cookie_secret")]
	pub session_secret: String,

	/// URL of the user database.
	pub database_url: Url,

	/// URL of the session store.
	pub redis_url: Url,

	/// The URL under which this service is reachable from the outside.
	///
	/// OAuth callback URLs are derived from this.
	#[serde(default = "default_public_url")]
	pub public_url: Url,

	/// Google OAuth client ID.
	pub google_application_key: String,

	/// Google OAuth client secret.
	pub google_application_secret: String,

	/// GitHub OAuth client ID.
	pub github_application_key: String,

	/// GitHub OAuth client secret.
	pub github_application_secret: String,
}

impl Config {
	/// Parses a [`Config`] instance from the environment.
	pub fn new() -> envy::Result<Self> {
		envy::from_env()
	}

	/// Returns a full [`SocketAddr`] for where the HTTP server should listen
	/// on.
	pub fn socket_addr(&self) -> SocketAddr {
		SocketAddr::new(self.ip, self.port)
	}

	/// Returns the key the OAuth flow's cookies are signed with.
	pub fn cookie_key(&self) -> Key {
		Key::derive_from(self.session_secret.as_bytes())
	}
}

impl Debug for Config {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Config")
			.field("address", &self.socket_addr())
			.field("session_timeout", &self.session_timeout)
			.field("session_manager_secret", &"*****")
			.field("session_secret", &"*****")
			.field("database_url", &"*****")
			.field("redis_url", &"*****")
			.field("public_url", &self.public_url.as_str())
			.finish_non_exhaustive()
	}
}

/// The default listen address.
fn default_ip_addr() -> IpAddr {
	IpAddr::V4(Ipv4Addr::LOCALHOST)
}

/// The default public URL.
fn default_public_url() -> Url {
	"http://localhost:8080"
		.parse()
		.expect("hardcoded URL is valid")
}

/// Deserializes a Go-style duration string such as `30m` or `1h30m`.
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
	D: Deserializer<'de>,
{
	let raw = String::deserialize(deserializer)?;

	humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}

/// Deserializes the cookie signing secret, rejecting anything shorter than
/// 32 bytes.
fn deserialize_cookie_secret<'de, D>(deserializer: D) -> Result<String, D::Error>
where
	D: Deserializer<'de>,
{
	let secret = String::deserialize(deserializer)?;

	if secret.len() < 32 {
		return Err(serde::de::Error::custom(
			"cookie secret must be at least 32 bytes",
		));
	}

	Ok(secret)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn durations_parse_like_the_environment_writes_them() {
		assert_eq!(
			humantime::parse_duration("30m").unwrap(),
			Duration::from_secs(30 * 60),
		);
		assert_eq!(
			humantime::parse_duration("3s").unwrap(),
			Duration::from_secs(3),
		);
	}
}
