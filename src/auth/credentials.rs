//! Credential pairs issued at login and grants returned by the refresh endpoint.

// self
use crate::{_prelude::*, auth::TokenSecret};

/// Access + refresh token pair persisted after a successful login.
///
/// Both halves are always stored together; a session never holds one without the other.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialPair {
	/// Short-lived bearer credential attached to every request.
	#[serde(alias = "access_token")]
	pub access_token: TokenSecret,
	/// Longer-lived credential used solely to mint new access tokens.
	#[serde(alias = "refresh_token")]
	pub refresh_token: TokenSecret,
}
impl CredentialPair {
	/// Creates a new pair.
	pub fn new(
		access_token: impl Into<TokenSecret>,
		refresh_token: impl Into<TokenSecret>,
	) -> Self {
		Self { access_token: access_token.into(), refresh_token: refresh_token.into() }
	}
}

/// Token material returned by a refresh exchange.
///
/// Both fields are optional on the wire; a grant without a usable access token is treated as a
/// failed refresh.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshGrant {
	/// Newly minted access token.
	#[serde(default, alias = "access_token")]
	pub access_token: Option<TokenSecret>,
	/// Rotated refresh token, if the server issued one.
	#[serde(default, alias = "refresh_token")]
	pub refresh_token: Option<TokenSecret>,
}
impl RefreshGrant {
	/// Builds a grant carrying a new access token and optionally a rotated refresh token.
	pub fn new(access_token: impl Into<TokenSecret>, refresh_token: Option<TokenSecret>) -> Self {
		Self { access_token: Some(access_token.into()), refresh_token }
	}

	/// Parses a refresh response body, accepting both bare and `{"data": {...}}` envelopes.
	pub fn from_json_slice(body: &[u8]) -> Result<Self> {
		let mut de = serde_json::Deserializer::from_slice(body);
		let envelope: RefreshEnvelope = serde_path_to_error::deserialize(&mut de)?;

		Ok(envelope.data.unwrap_or(envelope.grant))
	}

	/// Returns the access token when it is present and non-blank.
	pub fn usable_access_token(&self) -> Option<&TokenSecret> {
		self.access_token.as_ref().filter(|token| !token.is_blank())
	}

	/// Returns the rotated refresh token when it is present and non-blank.
	pub fn usable_refresh_token(&self) -> Option<&TokenSecret> {
		self.refresh_token.as_ref().filter(|token| !token.is_blank())
	}
}

#[derive(Deserialize)]
struct RefreshEnvelope {
	#[serde(default)]
	data: Option<RefreshGrant>,
	#[serde(flatten)]
	grant: RefreshGrant,
}
