//! The OAuth client for third-party identity providers.
//!
//! Identity is federated through Google and GitHub. This module owns the
//! provider endpoints and credentials; it is constructed explicitly from the
//! [`Config`] during startup rather than through module-init side effects, so
//! nothing OAuth-related exists before `main` decides it should.
//!
//! The flow is the standard authorization-code dance: [`authorize_url()`]
//! produces the URL the user is redirected to, and [`fetch_email()`] turns
//! the code from the provider's callback into the user's email address.
//!
//! [`authorize_url()`]: OAuthClient::authorize_url
//! [`fetch_email()`]: OAuthClient::fetch_email

use std::fmt;
use std::str::FromStr;

use http::header;
use serde::{Deserialize, Deserializer};
use url::Url;

use crate::users::{AuthType, InvalidDiscriminant};
use crate::{Config, Error, Result};

/// A supported OAuth provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
	/// Google.
	Google,

	/// GitHub.
	Github,
}

impl Provider {
	/// The [`AuthType`] recorded for users who log in through this provider.
	pub const fn auth_type(&self) -> AuthType {
		match self {
			Self::Google => AuthType::Google,
			Self::Github => AuthType::Github,
		}
	}

	/// The provider's name, as it appears in URL paths.
	pub const fn name(&self) -> &'static str {
		self.auth_type().name()
	}

	/// The URL users are sent to for the consent screen.
	const fn authorize_endpoint(&self) -> &'static str {
		match self {
			Self::Google => "https://accounts.google.com/o/oauth2/v2/auth",
			Self::Github => "https://github.com/login/oauth/authorize",
		}
	}

	/// The URL authorization codes are exchanged at.
	const fn token_endpoint(&self) -> &'static str {
		match self {
			Self::Google => "https://oauth2.googleapis.com/token",
			Self::Github => "https://github.com/login/oauth/access_token",
		}
	}

	/// The OAuth scopes we request.
	const fn scope(&self) -> &'static str {
		match self {
			Self::Google => "openid email",
			Self::Github => "user:email",
		}
	}
}

impl fmt::Display for Provider {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.name())
	}
}

impl FromStr for Provider {
	type Err = InvalidDiscriminant;

	fn from_str(value: &str) -> Result<Self, Self::Err> {
		value.parse::<AuthType>().map(|auth_type| match auth_type {
			AuthType::Google => Self::Google,
			AuthType::Github => Self::Github,
		})
	}
}

impl<'de> Deserialize<'de> for Provider {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		String::deserialize(deserializer)?
			.parse::<Self>()
			.map_err(serde::de::Error::custom)
	}
}

/// Client credentials for one provider.
#[derive(Clone)]
struct ProviderKeys {
	/// The OAuth client ID.
	client_id: String,

	/// The OAuth client secret.
	client_secret: String,
}

/// A client for the supported OAuth providers.
#[derive(Clone)]
pub struct OAuthClient {
	/// For token exchange and profile lookups.
	http_client: reqwest::Client,

	/// Google credentials.
	google: ProviderKeys,

	/// GitHub credentials.
	github: ProviderKeys,

	/// Base URL the callback URLs are derived from.
	public_url: Url,
}

impl fmt::Debug for OAuthClient {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("OAuthClient")
			.field("public_url", &self.public_url.as_str())
			.finish_non_exhaustive()
	}
}

/// The response of a token-exchange request.
#[derive(Deserialize)]
struct TokenExchangeResponse {
	/// The access token.
	access_token: String,
}

/// One entry of GitHub's `/user/emails` response.
#[derive(Deserialize)]
struct GithubEmail {
	/// The address.
	email: String,

	/// Whether this is the account's primary address.
	primary: bool,
}

/// The relevant part of Google's `userinfo` response.
#[derive(Deserialize)]
struct GoogleUserInfo {
	/// The address.
	email: Option<String>,
}

impl OAuthClient {
	/// Creates a new [`OAuthClient`] from the application config.
	pub fn new(config: &Config) -> Self {
		Self {
			http_client: reqwest::Client::new(),
			google: ProviderKeys {
				client_id: config.google_application_key.clone(),
				client_secret: config.google_application_secret.clone(),
			},
			github: ProviderKeys {
				client_id: config.github_application_key.clone(),
				client_secret: config.github_application_secret.clone(),
			},
			public_url: config.public_url.clone(),
		}
	}

	/// The credentials for `provider`.
	fn keys(&self, provider: Provider) -> &ProviderKeys {
		match provider {
			Provider::Google => &self.google,
			Provider::Github => &self.github,
		}
	}

	/// The callback URL registered with `provider`.
	fn redirect_uri(&self, provider: Provider) -> Url {
		self.public_url
			.join(&format!("/login/{provider}/callback"))
			.expect("public url joined with a fixed path is valid")
	}

	/// Builds the URL the user is redirected to for the consent screen.
	#[tracing::instrument(level = "debug", skip(self, state))]
	pub fn authorize_url(&self, provider: Provider, state: &str) -> Url {
		let mut url = Url::parse(provider.authorize_endpoint())
			.expect("hardcoded endpoint is valid");

		url.query_pairs_mut()
			.append_pair("client_id", &self.keys(provider).client_id)
			.append_pair("redirect_uri", self.redirect_uri(provider).as_str())
			.append_pair("response_type", "code")
			.append_pair("scope", provider.scope())
			.append_pair("state", state);

		url
	}

	/// Exchanges the authorization `code` from the provider's callback for the
	/// user's email address.
	#[tracing::instrument(level = "debug", skip(self, code), err(Debug, level = "debug"))]
	pub async fn fetch_email(&self, provider: Provider, code: &str) -> Result<String> {
		let access_token = self.exchange_code(provider, code).await?;

		let email = match provider {
			Provider::Google => self.google_email(&access_token).await?,
			Provider::Github => self.github_email(&access_token).await?,
		};

		email.ok_or_else(|| {
			Error::internal(format!("email not found in {provider} response"))
		})
	}

	/// Exchanges the authorization `code` for an access token.
	async fn exchange_code(&self, provider: Provider, code: &str) -> Result<String> {
		let keys = self.keys(provider);
		let redirect_uri = self.redirect_uri(provider);

		let response = self
			.http_client
			.post(provider.token_endpoint())
			.header(header::ACCEPT, "application/json")
			.form(&[
				("client_id", keys.client_id.as_str()),
				("client_secret", keys.client_secret.as_str()),
				("code", code),
				("grant_type", "authorization_code"),
				("redirect_uri", redirect_uri.as_str()),
			])
			.send()
			.await
			.and_then(reqwest::Response::error_for_status)
			.map_err(|source| Error::Internal { source: source.into() })?;

		let token = response
			.json::<TokenExchangeResponse>()
			.await
			.map_err(|source| Error::Internal { source: source.into() })?;

		Ok(token.access_token)
	}

	/// Fetches the user's email address from Google.
	async fn google_email(&self, access_token: &str) -> Result<Option<String>> {
		let user = self
			.http_client
			.get("https://www.googleapis.com/oauth2/v2/userinfo")
			.bearer_auth(access_token)
			.send()
			.await
			.and_then(reqwest::Response::error_for_status)
			.map_err(|source| Error::Internal { source: source.into() })?
			.json::<GoogleUserInfo>()
			.await
			.map_err(|source| Error::Internal { source: source.into() })?;

		Ok(user.email.filter(|email| !email.is_empty()))
	}

	/// Fetches the user's primary email address from GitHub.
	async fn github_email(&self, access_token: &str) -> Result<Option<String>> {
		let emails = self
			.http_client
			.get("https://api.github.com/user/emails")
			.header(header::USER_AGENT, "chat-auth-api")
			.bearer_auth(access_token)
			.send()
			.await
			.and_then(reqwest::Response::error_for_status)
			.map_err(|source| Error::Internal { source: source.into() })?
			.json::<Vec<GithubEmail>>()
			.await
			.map_err(|source| Error::Internal { source: source.into() })?;

		Ok(emails
			.into_iter()
			.find(|email| email.primary)
			.map(|email| email.email))
	}
}
