//! A very basic service that acts as a healthcheck.
//!
//! This doesn't really need to be a service, but it's the simplest example of
//! one, and can be used as a reference for writing new services.

use std::fmt;

use serde::Serialize;

pub(crate) mod http;

/// A service that simply responds if the API is healthy.
#[derive(Clone, Copy)]
pub struct HealthService {}

impl fmt::Debug for HealthService {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("HealthService").finish_non_exhaustive()
	}
}

/// The response of a healthcheck.
#[derive(Debug, Serialize)]
pub struct HealthStatus {
	/// Always `"ok"` while the process is serving requests.
	status: &'static str,
}

impl HealthService {
	/// Create a new [`HealthService`].
	pub fn new() -> Self {
		Self {}
	}

	/// Reports whether the API is healthy.
	#[tracing::instrument(level = "debug")]
	pub async fn status(&self) -> HealthStatus {
		HealthStatus { status: "ok" }
	}
}
