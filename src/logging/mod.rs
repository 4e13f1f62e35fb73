//! Everything related to logging.

use tracing_subscriber::EnvFilter;

/// Initializes the global tracing subscriber.
///
/// The filter is taken from `RUST_LOG` if set; the default enables info-level
/// output globally and debug-level output for this crate.
pub fn init() {
	let filter = EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| EnvFilter::new("info,chat_auth_api=debug"));

	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_target(true)
		.init();
}
