//! Demonstrates a gateway recovering from an expired access token: the first call is rejected,
//! the refresh token is exchanged once, and the call is replayed with the rotated credential.

// std
use std::sync::Arc;
// crates.io
use color_eyre::Result;
use httpmock::prelude::*;
use url::Url;
// self
use authgate::{
	auth::{CachedUserProfile, CredentialPair},
	config::GatewayConfig,
	gateway::ReqwestGateway,
	notify::{AuthEvent, AuthFailureNotifier},
	storage::MemoryStorage,
	store::TokenStore,
};

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let server = MockServer::start_async().await;
	let expired = server
		.mock_async(|when, then| {
			when.method(GET).path("/profile").header("authorization", "Bearer demo-access");
			then.status(401).body("{\"message\":\"jwt expired\"}");
		})
		.await;
	let rotated = server
		.mock_async(|when, then| {
			when.method(GET).path("/profile").header("authorization", "Bearer demo-access-2");
			then.status(200)
				.header("content-type", "application/json")
				.body("{\"id\":\"u-1\",\"email\":\"bidder@example.com\"}");
		})
		.await;
	let refresh = server
		.mock_async(|when, then| {
			when.method(POST).path("/auth/refresh-token");
			then.status(200).header("content-type", "application/json").body(
				"{\"accessToken\":\"demo-access-2\",\"refreshToken\":\"demo-refresh-2\"}",
			);
		})
		.await;
	let config = GatewayConfig::builder().base_url(Url::parse(&server.base_url())?).build()?;
	let store = Arc::new(TokenStore::new(
		Arc::new(MemoryStorage::default()),
		config.storage_keys.clone(),
	));
	let notifier = Arc::new(AuthFailureNotifier::default());
	let _on_failure = notifier.subscribe(AuthEvent::AuthFailure, |event| {
		println!("Session lost ({event}); returning to the login screen.");
	});
	let gateway = ReqwestGateway::new(config, store, notifier);

	gateway
		.complete_login(
			&CredentialPair::new("demo-access", "demo-refresh"),
			Some(&CachedUserProfile::new("u-1", "bidder@example.com")),
		)
		.await?;

	let profile: CachedUserProfile = gateway.get("/profile").await?.json()?;

	println!("Loaded profile for {:?} after one refresh.", profile.email);

	expired.assert_async().await;
	rotated.assert_async().await;
	refresh.assert_async().await;

	Ok(())
}
