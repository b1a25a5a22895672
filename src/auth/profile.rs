//! Cached user profile persisted alongside credentials for optimistic session restoration.

// crates.io
use serde_json::{Map, Value};
// self
use crate::_prelude::*;

/// User-data blob cached next to the credential pair.
///
/// Only the fields the session layer inspects are typed; everything else the server sent is
/// preserved verbatim in [`extra`](Self::extra) so a round trip loses nothing.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedUserProfile {
	/// Server-side user identifier.
	#[serde(default, alias = "_id")]
	pub id: Option<String>,
	/// Login email address.
	#[serde(default)]
	pub email: Option<String>,
	/// Whether the account has administrative rights.
	#[serde(default)]
	pub is_admin: bool,
	/// Whether the account has completed verification.
	#[serde(default, alias = "verified")]
	pub is_verified: bool,
	/// Remaining fields, kept opaque.
	#[serde(flatten)]
	pub extra: Map<String, Value>,
}
impl CachedUserProfile {
	/// Creates a profile for the given identifier and email.
	pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
		Self { id: Some(id.into()), email: Some(email.into()), ..Default::default() }
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn unknown_fields_survive_round_trip() {
		let raw = r#"{"_id":"u-1","email":"a@b.c","isAdmin":true,"verified":true,"bids":3}"#;
		let profile: CachedUserProfile =
			serde_json::from_str(raw).expect("Profile fixture should deserialize.");

		assert_eq!(profile.id.as_deref(), Some("u-1"));
		assert!(profile.is_admin);
		assert!(profile.is_verified);
		assert_eq!(profile.extra.get("bids"), Some(&Value::from(3)));

		let encoded = serde_json::to_string(&profile).expect("Profile should serialize.");
		let decoded: CachedUserProfile =
			serde_json::from_str(&encoded).expect("Encoded profile should deserialize.");

		assert_eq!(decoded, profile);
	}
}
