//! Credential-attaching request gateway with transparent refresh-and-retry.
//!
//! Every request sent through [`RequestGateway::send`] carries the current access token. When
//! the server answers 401 the gateway asks the [`RefreshCoordinator`] for a new token (joining
//! any refresh already in flight), replaces the credential, and resends the request exactly
//! once. Requests to the refresh endpoint itself and requests that were already retried are never
//! refreshed again. When no new token can be obtained the session is cleared and
//! [`AuthEvent::AuthFailure`] is emitted once per failure episode; the episode ends with the
//! next [`RequestGateway::complete_login`].

// std
use std::sync::atomic::{AtomicBool, Ordering};
// crates.io
use http::StatusCode;
// self
use crate::{
	_prelude::*,
	auth::{CachedUserProfile, CredentialPair, RefreshGrant, TokenSecret},
	config::GatewayConfig,
	http::{ApiRequest, ApiResponse, HttpTransport},
	notify::{AuthEvent, AuthFailureNotifier},
	obs::{self, FlowKind, FlowSpan},
	refresh::{RefreshCoordinator, RefreshOutcome},
	store::TokenStore,
};
#[cfg(feature = "reqwest")] use crate::http::ReqwestTransport;

#[cfg(feature = "reqwest")]
/// Gateway specialized for the crate's default reqwest transport.
pub type ReqwestGateway = RequestGateway<ReqwestTransport>;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequestBody<'a> {
	refresh_token: &'a str,
}

/// Wraps outbound requests with credential handling and single-retry recovery.
pub struct RequestGateway<T>
where
	T: ?Sized + HttpTransport,
{
	/// Validated endpoint and storage configuration.
	pub config: GatewayConfig,
	/// Transport used for every outbound request, including refresh exchanges.
	pub transport: Arc<T>,
	/// Channel receiving session events.
	pub notifier: Arc<AuthFailureNotifier>,
	coordinator: RefreshCoordinator,
	auth_failure_handled: Arc<AtomicBool>,
}
impl<T> RequestGateway<T>
where
	T: ?Sized + HttpTransport,
{
	/// Creates a gateway that reuses the caller-provided transport.
	pub fn with_transport(
		config: GatewayConfig,
		store: Arc<TokenStore>,
		transport: impl Into<Arc<T>>,
		notifier: Arc<AuthFailureNotifier>,
	) -> Self {
		Self {
			config,
			transport: transport.into(),
			notifier,
			coordinator: RefreshCoordinator::new(store),
			auth_failure_handled: Default::default(),
		}
	}

	/// Token store backing this gateway.
	pub fn store(&self) -> &Arc<TokenStore> {
		self.coordinator.store()
	}

	/// Refresh coordinator shared by every request sent through this gateway.
	pub fn coordinator(&self) -> &RefreshCoordinator {
		&self.coordinator
	}

	/// Returns `true` once [`AuthEvent::AuthFailure`] was emitted for the current episode.
	pub fn auth_failure_handled(&self) -> bool {
		self.auth_failure_handled.load(Ordering::SeqCst)
	}

	/// Presence check for an access token; see [`TokenStore::is_authenticated`].
	pub async fn is_authenticated(&self) -> bool {
		self.store().is_authenticated().await
	}

	/// Sends a `GET` request to `path`, resolved against the base URL.
	pub async fn get(&self, path: &str) -> Result<ApiResponse> {
		let url = self.config.resolve(path)?;

		self.send(ApiRequest::get(url)).await
	}

	/// Sends a JSON `POST` request to `path`, resolved against the base URL.
	pub async fn post_json<B>(&self, path: &str, body: &B) -> Result<ApiResponse>
	where
		B: ?Sized + Serialize,
	{
		let url = self.config.resolve(path)?;

		self.send(ApiRequest::post(url).with_json(body)?).await
	}

	/// Sends `request` with the current credentials, recovering once from an expired token.
	///
	/// Returns the response for any 2xx status. Other statuses become [`Error::Status`], except
	/// an unrecoverable 401 which becomes [`Error::Unauthorized`]. Transport failures pass
	/// through as [`Error::Transport`].
	pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
		let span = FlowSpan::new(FlowKind::Request, "send");
		let result = span.instrument(self.send_with_recovery(request)).await;

		span.settle(result)
	}

	/// Stores a fresh login session and re-arms the auth-failure notification.
	pub async fn complete_login(
		&self,
		credentials: &CredentialPair,
		profile: Option<&CachedUserProfile>,
	) -> Result<()> {
		self.store().store_session(credentials, profile).await?;
		self.auth_failure_handled.store(false, Ordering::SeqCst);
		self.notifier.emit(AuthEvent::Login);

		Ok(())
	}

	/// Clears the session on request and emits [`AuthEvent::Logout`].
	pub async fn logout(&self) -> Result<()> {
		let result = self.store().clear_all().await;

		self.notifier.emit(AuthEvent::Logout);

		result
	}

	/// Runs (or joins) a refresh using this gateway's refresh endpoint.
	pub async fn refresh_now(&self) -> Result<RefreshOutcome> {
		self.coordinator
			.refresh_access_token(|refresh_token| self.exchange_refresh_token(refresh_token))
			.await
	}

	/// Exchanges `refresh_token` for a new grant at the configured refresh endpoint.
	///
	/// The request carries no access token. Any non-2xx answer is an error.
	pub async fn exchange_refresh_token(&self, refresh_token: TokenSecret) -> Result<RefreshGrant> {
		let request = ApiRequest::post(self.config.refresh_endpoint.clone())
			.with_json(&RefreshRequestBody { refresh_token: refresh_token.expose() })?;
		let response = self.transport.send(request).await?;

		if !response.status.is_success() {
			return Err(Error::Status { status: response.status.as_u16(), body: response.text() });
		}

		RefreshGrant::from_json_slice(&response.body)
	}

	async fn send_with_recovery(&self, mut request: ApiRequest) -> Result<ApiResponse> {
		let store = self.store();

		store.initialize_cache().await;

		let attached = store.get_access_token().await;

		if let Some(token) = &attached {
			request.attach_token(token)?;
		}

		let response = self.transport.send(request.clone()).await?;

		if !is_auth_failure(&response) {
			return into_result(response);
		}
		if request.is_retry() || self.config.is_refresh_endpoint(&request.url) {
			return Err(unauthorized(response));
		}

		request.mark_retried();

		let generation = store.generation();
		let Some(token) = self.replacement_token(attached.as_ref()).await else {
			self.handle_unrecoverable(generation).await;

			return Err(unauthorized(response));
		};

		request.attach_token(&token)?;

		let retried = self.transport.send(request).await?;

		if is_auth_failure(&retried) {
			return Err(unauthorized(retried));
		}

		into_result(retried)
	}

	async fn replacement_token(&self, attached: Option<&TokenSecret>) -> Option<TokenSecret> {
		// Another request may have rotated the token while this one was in flight.
		let current = self.store().get_access_token().await;

		if current.is_some() && current.as_ref() != attached {
			return current;
		}

		match self.refresh_now().await {
			Ok(outcome) => outcome.into_access_token(),
			Err(e) => {
				obs::record_degraded(FlowKind::Request, "refresh", &e);

				None
			},
		}
	}

	// `generation` is the session this request failed with, observed before refreshing.
	async fn handle_unrecoverable(&self, generation: u64) {
		let store = self.store();

		if store.generation() == generation {
			// Refresh was cancelled or never cleared; the session is still the failed one.
			if let Err(e) = store.clear_if_current(generation).await {
				obs::record_degraded(FlowKind::Request, "clear_all", &e);
			}
		} else if store.is_authenticated().await {
			// A newer login owns the session; this failure belongs to the old one.
			return;
		}

		if self
			.auth_failure_handled
			.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
			.is_ok()
		{
			self.notifier.emit(AuthEvent::AuthFailure);
		}
	}
}
#[cfg(feature = "reqwest")]
impl RequestGateway<ReqwestTransport> {
	/// Creates a gateway backed by a default reqwest client.
	///
	/// Use [`RequestGateway::with_transport`] to supply a client with custom timeouts or TLS.
	pub fn new(
		config: GatewayConfig,
		store: Arc<TokenStore>,
		notifier: Arc<AuthFailureNotifier>,
	) -> Self {
		Self::with_transport(config, store, ReqwestTransport::default(), notifier)
	}
}
impl<T> Clone for RequestGateway<T>
where
	T: ?Sized + HttpTransport,
{
	fn clone(&self) -> Self {
		Self {
			config: self.config.clone(),
			transport: self.transport.clone(),
			notifier: self.notifier.clone(),
			coordinator: self.coordinator.clone(),
			auth_failure_handled: self.auth_failure_handled.clone(),
		}
	}
}
impl<T> Debug for RequestGateway<T>
where
	T: ?Sized + HttpTransport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RequestGateway")
			.field("config", &self.config)
			.field("coordinator", &self.coordinator)
			.field("auth_failure_handled", &self.auth_failure_handled())
			.finish()
	}
}

fn is_auth_failure(response: &ApiResponse) -> bool {
	response.status == StatusCode::UNAUTHORIZED
}

fn unauthorized(response: ApiResponse) -> Error {
	Error::Unauthorized { status: response.status.as_u16(), body: response.text() }
}

fn into_result(response: ApiResponse) -> Result<ApiResponse> {
	if response.status.is_success() {
		Ok(response)
	} else {
		Err(Error::Status { status: response.status.as_u16(), body: response.text() })
	}
}
