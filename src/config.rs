//! Gateway configuration: API base URL, refresh endpoint, and durable storage key names.

// self
use crate::{_prelude::*, error::ConfigError};

/// Durable storage key names for the three session entries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageKeys {
	/// Key holding the access token.
	pub access_token: String,
	/// Key holding the refresh token.
	pub refresh_token: String,
	/// Key holding the JSON-encoded user profile.
	pub user_data: String,
}
impl StorageKeys {
	/// Returns the keys in `[access, refresh, user]` order.
	pub fn all(&self) -> [&str; 3] {
		[&self.access_token, &self.refresh_token, &self.user_data]
	}

	fn validate(&self) -> Result<(), ConfigError> {
		let keys = self.all();

		for (idx, key) in keys.iter().enumerate() {
			if key.trim().is_empty() || keys[..idx].contains(key) {
				return Err(ConfigError::InvalidStorageKey { key: (*key).to_owned() });
			}
		}

		Ok(())
	}
}
impl Default for StorageKeys {
	fn default() -> Self {
		Self {
			access_token: "accessToken".into(),
			refresh_token: "refreshToken".into(),
			user_data: "userData".into(),
		}
	}
}

/// Validated configuration consumed by [`RequestGateway`](crate::gateway::RequestGateway).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
	/// Base URL that relative request paths are joined onto.
	pub base_url: Url,
	/// Absolute URL of the refresh-token endpoint.
	pub refresh_endpoint: Url,
	/// Storage key names.
	pub storage_keys: StorageKeys,
}
impl GatewayConfig {
	const DEFAULT_REFRESH_PATH: &'static str = "auth/refresh-token";

	/// Creates a new builder.
	pub fn builder() -> GatewayConfigBuilder {
		GatewayConfigBuilder::default()
	}

	/// Joins a relative path onto the base URL.
	pub fn resolve(&self, path: &str) -> Result<Url, ConfigError> {
		join_path(&self.base_url, path)
			.map_err(|source| ConfigError::InvalidUrl { field: "request", source })
	}

	/// Returns `true` when `url` addresses the refresh-token endpoint (query strings ignored).
	pub fn is_refresh_endpoint(&self, url: &Url) -> bool {
		url.scheme() == self.refresh_endpoint.scheme()
			&& url.host_str() == self.refresh_endpoint.host_str()
			&& url.port_or_known_default() == self.refresh_endpoint.port_or_known_default()
			&& url.path().trim_end_matches('/')
				== self.refresh_endpoint.path().trim_end_matches('/')
	}
}

/// Builder for [`GatewayConfig`] values.
#[derive(Debug, Default)]
pub struct GatewayConfigBuilder {
	/// Base URL for API requests.
	pub base_url: Option<Url>,
	/// Refresh endpoint path relative to the base URL.
	pub refresh_path: Option<String>,
	/// Absolute refresh endpoint, overriding `refresh_path`.
	pub refresh_endpoint: Option<Url>,
	/// Storage key overrides.
	pub storage_keys: StorageKeys,
}
impl GatewayConfigBuilder {
	/// Sets the base URL.
	pub fn base_url(mut self, url: Url) -> Self {
		self.base_url = Some(url);

		self
	}

	/// Sets the refresh endpoint as a path relative to the base URL.
	pub fn refresh_path(mut self, path: impl Into<String>) -> Self {
		self.refresh_path = Some(path.into());

		self
	}

	/// Sets an absolute refresh endpoint.
	pub fn refresh_endpoint(mut self, url: Url) -> Self {
		self.refresh_endpoint = Some(url);

		self
	}

	/// Overrides the storage key names.
	pub fn storage_keys(mut self, keys: StorageKeys) -> Self {
		self.storage_keys = keys;

		self
	}

	/// Consumes the builder and validates the resulting configuration.
	pub fn build(self) -> Result<GatewayConfig, ConfigError> {
		let base_url = self.base_url.ok_or(ConfigError::MissingBaseUrl)?;

		if base_url.cannot_be_a_base() {
			return Err(ConfigError::CannotBeABase { url: base_url.to_string() });
		}

		let refresh_endpoint = match self.refresh_endpoint {
			Some(url) => url,
			None => join_path(
				&base_url,
				self.refresh_path.as_deref().unwrap_or(GatewayConfig::DEFAULT_REFRESH_PATH),
			)
			.map_err(|source| ConfigError::InvalidUrl { field: "refresh_endpoint", source })?,
		};

		self.storage_keys.validate()?;

		Ok(GatewayConfig { base_url, refresh_endpoint, storage_keys: self.storage_keys })
	}
}

// `Url::join` drops the last base segment unless it ends with `/`, so normalize both sides.
fn join_path(base: &Url, path: &str) -> Result<Url, url::ParseError> {
	if path.starts_with("http://") || path.starts_with("https://") {
		return Url::parse(path);
	}

	let mut base = base.clone();

	if !base.path().ends_with('/') {
		let with_slash = format!("{}/", base.path());

		base.set_path(&with_slash);
	}

	base.join(path.trim_start_matches('/'))
}
