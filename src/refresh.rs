//! Single-flight refresh coordination.
//!
//! [`RefreshCoordinator::refresh_access_token`] guarantees that at most one refresh exchange is
//! outstanding per [`TokenStore`]. The first caller becomes the leader: it reads the refresh
//! token, runs the exchange, persists the new pair, and publishes a [`RefreshOutcome`] through a
//! shared once-cell. Every caller arriving while the leader is in flight awaits that same cell
//! instead of starting another exchange. Tokens are written to the store before the outcome is
//! published, so a waiter that wakes up with [`RefreshOutcome::Refreshed`] already sees the new
//! token in the store.
//!
//! Any failure (no refresh token, exchange error, empty grant, persistence failure) clears the
//! session, unless a login or logout replaced it while the exchange was in flight. Only the
//! leader sees an exchange error, as [`Error::RefreshExchange`]; waiters get
//! [`RefreshOutcome::Failed`].

mod metrics;

pub use metrics::RefreshMetrics;

// crates.io
use futures_util::FutureExt;
// self
use crate::{
	_prelude::*,
	auth::{RefreshGrant, TokenSecret},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	store::TokenStore,
};

type InFlight = Arc<AsyncOnceCell<RefreshOutcome>>;

/// Result of a refresh attempt, shared by the leader and every waiter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
	/// A new access token was minted and stored.
	Refreshed(TokenSecret),
	/// No refresh token was stored, so nothing could be refreshed.
	NoRefreshToken,
	/// The exchange failed, returned an unusable grant, or could not be persisted.
	Failed,
}
impl RefreshOutcome {
	/// Returns the new access token, if the refresh succeeded.
	pub fn access_token(&self) -> Option<&TokenSecret> {
		match self {
			Self::Refreshed(token) => Some(token),
			Self::NoRefreshToken | Self::Failed => None,
		}
	}

	/// Consumes the outcome and returns the new access token, if any.
	pub fn into_access_token(self) -> Option<TokenSecret> {
		match self {
			Self::Refreshed(token) => Some(token),
			Self::NoRefreshToken | Self::Failed => None,
		}
	}

	/// Returns `true` if a new access token was obtained.
	pub fn is_refreshed(&self) -> bool {
		matches!(self, Self::Refreshed(_))
	}
}

/// In-flight refresh bookkeeping owned by a [`TokenStore`].
///
/// Holds the shared outcome cell of the exchange currently in flight, if any.
#[derive(Debug, Default)]
pub struct RefreshState {
	in_flight: Mutex<Option<InFlight>>,
}
impl RefreshState {
	/// Returns `true` while a refresh exchange is outstanding.
	pub fn is_refreshing(&self) -> bool {
		self.in_flight.lock().is_some()
	}

	/// Forgets the in-flight exchange so the next refresh starts from a clean slate.
	///
	/// Callers already waiting keep their handle and still receive the outcome.
	pub(crate) fn reset(&self) {
		self.in_flight.lock().take();
	}

	fn join_or_lead(&self) -> Role {
		let mut slot = self.in_flight.lock();

		match slot.as_ref() {
			Some(cell) => Role::Waiter(cell.clone()),
			None => {
				let cell = Arc::new(AsyncOnceCell::new());

				*slot = Some(cell.clone());

				Role::Leader(cell)
			},
		}
	}

	fn release(&self, cell: &InFlight) {
		let mut slot = self.in_flight.lock();

		if slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, cell)) {
			*slot = None;
		}
	}
}

enum Role {
	Leader(InFlight),
	Waiter(InFlight),
}

// Publishes `Failed` if the leader future is dropped before settling, so waiters never hang on
// a cancelled exchange.
struct Leader<'a> {
	state: &'a RefreshState,
	cell: InFlight,
	settled: bool,
}
impl Leader<'_> {
	async fn settle(mut self, outcome: RefreshOutcome) {
		self.settled = true;
		self.state.release(&self.cell);

		let _ = self.cell.set(outcome).await;
	}
}
impl Drop for Leader<'_> {
	fn drop(&mut self) {
		if self.settled {
			return;
		}

		self.state.release(&self.cell);

		let _ = self.cell.set(RefreshOutcome::Failed).now_or_never();
	}
}

/// Collapses concurrent refresh requests into a single exchange.
#[derive(Clone)]
pub struct RefreshCoordinator {
	store: Arc<TokenStore>,
	metrics: Arc<RefreshMetrics>,
}
impl RefreshCoordinator {
	/// Creates a coordinator for the provided store.
	pub fn new(store: Arc<TokenStore>) -> Self {
		Self { store, metrics: Default::default() }
	}

	/// Token store the coordinator reads from and writes to.
	pub fn store(&self) -> &Arc<TokenStore> {
		&self.store
	}

	/// Shared counters describing refresh activity.
	pub fn metrics(&self) -> &RefreshMetrics {
		&self.metrics
	}

	/// Returns `true` while a refresh exchange is outstanding.
	pub fn is_refreshing(&self) -> bool {
		self.store.refresh_state().is_refreshing()
	}

	/// Mints a new access token, or joins the refresh already in flight.
	///
	/// `exchange` receives the stored refresh token and performs the network call. It is only
	/// invoked by the caller that starts a refresh; callers arriving while one is in flight
	/// receive that refresh's outcome without invoking their own `exchange`.
	///
	/// Returns [`Error::RefreshExchange`] to the starting caller when `exchange` itself fails,
	/// after the session has been cleared. Every other failure is reported as an outcome.
	pub async fn refresh_access_token<F, Fut, E>(&self, exchange: F) -> Result<RefreshOutcome>
	where
		F: FnOnce(TokenSecret) -> Fut,
		Fut: Future<Output = Result<RefreshGrant, E>>,
		E: Into<BoxError>,
	{
		const KIND: FlowKind = FlowKind::Refresh;

		let state = self.store.refresh_state();
		let cell = match state.join_or_lead() {
			Role::Waiter(cell) => {
				self.metrics.record_joined();

				return Ok(cell.wait().await.clone());
			},
			Role::Leader(cell) => cell,
		};
		let leader = Leader { state, cell, settled: false };
		let span = FlowSpan::new(KIND, "refresh_access_token");
		let (outcome, exchange_error) = span.instrument(self.run_exchange(exchange)).await;

		if outcome.is_refreshed() {
			self.metrics.record_success();
			span.record_outcome(FlowOutcome::Success);
		} else {
			self.metrics.record_failure();
			span.record_outcome(FlowOutcome::Failure);
		}

		leader.settle(outcome.clone()).await;

		match exchange_error {
			Some(source) => Err(Error::RefreshExchange { source }),
			None => Ok(outcome),
		}
	}

	async fn run_exchange<F, Fut, E>(&self, exchange: F) -> (RefreshOutcome, Option<BoxError>)
	where
		F: FnOnce(TokenSecret) -> Fut,
		Fut: Future<Output = Result<RefreshGrant, E>>,
		E: Into<BoxError>,
	{
		let generation = self.store.generation();
		let Some(refresh_token) = self.store.get_refresh_token().await else {
			self.clear_session(generation).await;

			return (RefreshOutcome::NoRefreshToken, None);
		};

		self.metrics.record_exchange();

		let grant = match exchange(refresh_token).await {
			Ok(grant) => grant,
			Err(e) => {
				let e: BoxError = e.into();

				obs::record_degraded(FlowKind::Refresh, "exchange", &e);
				self.clear_session(generation).await;

				return (RefreshOutcome::Failed, Some(e));
			},
		};
		let Some(access_token) = grant.usable_access_token().cloned() else {
			obs::record_degraded(FlowKind::Refresh, "grant", &"response carried no access token");
			self.clear_session(generation).await;

			return (RefreshOutcome::Failed, None);
		};
		let refresh_token = grant.usable_refresh_token().cloned();
		let stored = self
			.store
			.store_refreshed_tokens(generation, access_token.clone(), refresh_token)
			.await;

		match stored {
			Ok(true) => (RefreshOutcome::Refreshed(access_token), None),
			// A login or logout landed while the exchange was in flight; leave that session alone.
			Ok(false) => (RefreshOutcome::Failed, None),
			Err(e) => {
				obs::record_degraded(FlowKind::Refresh, "store_tokens", &e);
				self.clear_session(generation).await;

				(RefreshOutcome::Failed, None)
			},
		}
	}

	async fn clear_session(&self, generation: u64) {
		if let Err(e) = self.store.clear_if_current(generation).await {
			obs::record_degraded(FlowKind::Refresh, "clear_all", &e);
		}
	}
}
impl Debug for RefreshCoordinator {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RefreshCoordinator")
			.field("refreshing", &self.is_refreshing())
			.field("metrics", &self.metrics)
			.finish()
	}
}
