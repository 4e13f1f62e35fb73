//! The main server entrypoint for the API.

use std::process::ExitCode;

use chat_auth_api::Config;

fn main() -> ExitCode {
	if let Err(error) = color_eyre::install() {
		eprintln!("failed to install error handler: {error}");
		return ExitCode::FAILURE;
	}

	// Missing file is fine; production supplies real environment variables.
	let _ = dotenvy::dotenv();

	let config = match Config::new() {
		Ok(config) => config,
		Err(error) => {
			eprintln!("invalid configuration: {error}");
			return ExitCode::FAILURE;
		}
	};

	match serve(config) {
		Ok(()) => ExitCode::SUCCESS,
		Err(error) => {
			eprintln!("{error:?}");
			ExitCode::FAILURE
		}
	}
}

#[tokio::main]
async fn serve(config: Config) -> anyhow::Result<()> {
	chat_auth_api::logging::init();

	tracing::info!(?config, "starting up");

	chat_auth_api::run(config).await
}
