//! Cached token store layered over a durable [`KeyValueStorage`].
//!
//! [`TokenStore`] is the single source of truth for the access token, the refresh token, and
//! the cached user profile. Tokens are mirrored in memory so the request path does not hit
//! durable storage on every call. Reads never fail: a storage error degrades to "absent", which
//! is the logged-out state. Writes propagate their errors and roll the cache back so it never
//! claims a token is stored when persistence failed.
//!
//! Every session change (login, logout, refresh persistence) is serialized through one async
//! lock and tagged with a generation. A lazy read that overlaps a change never writes its result
//! into the cache, so a token removed by [`TokenStore::clear_all`] cannot reappear.

// std
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
// crates.io
use futures_util::future;
// self
use crate::{
	_prelude::*,
	auth::{CachedUserProfile, CredentialPair, TokenSecret},
	config::StorageKeys,
	obs::{self, FlowKind},
	refresh::RefreshState,
	storage::{KeyValueStorage, StorageError},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TokenSlot {
	Access,
	Refresh,
}

#[derive(Debug, Default)]
struct TokenCache {
	access: Option<TokenSecret>,
	refresh: Option<TokenSecret>,
}
impl TokenCache {
	fn slot(&self, slot: TokenSlot) -> &Option<TokenSecret> {
		match slot {
			TokenSlot::Access => &self.access,
			TokenSlot::Refresh => &self.refresh,
		}
	}

	fn slot_mut(&mut self, slot: TokenSlot) -> &mut Option<TokenSecret> {
		match slot {
			TokenSlot::Access => &mut self.access,
			TokenSlot::Refresh => &mut self.refresh,
		}
	}
}

/// Credential and profile persistence with an in-memory token cache.
pub struct TokenStore {
	storage: Arc<dyn KeyValueStorage>,
	keys: StorageKeys,
	cache: RwLock<TokenCache>,
	initialized: AsyncOnceCell<()>,
	session: AsyncMutex<()>,
	generation: AtomicU64,
	clearing: AtomicBool,
	refresh_state: RefreshState,
}
impl TokenStore {
	/// Creates a store over the provided durable backend.
	pub fn new(storage: Arc<dyn KeyValueStorage>, keys: StorageKeys) -> Self {
		Self {
			storage,
			keys,
			cache: Default::default(),
			initialized: AsyncOnceCell::new(),
			session: AsyncMutex::new(()),
			generation: AtomicU64::new(0),
			clearing: AtomicBool::new(false),
			refresh_state: RefreshState::default(),
		}
	}

	/// Storage key names used by this store.
	pub fn keys(&self) -> &StorageKeys {
		&self.keys
	}

	/// Loads both tokens from durable storage into the cache on the first call.
	///
	/// Later calls return immediately, including after a failed first load; concurrent first
	/// calls share a single load.
	pub async fn initialize_cache(&self) {
		self.initialized
			.get_or_init(|| async {
				let generation = self.generation();
				let (access, refresh) = future::join(
					self.read_token(TokenSlot::Access),
					self.read_token(TokenSlot::Refresh),
				)
				.await;
				let mut cache = self.cache.write();

				if !self.is_current(generation) {
					return;
				}
				if cache.access.is_none() {
					cache.access = access;
				}
				if cache.refresh.is_none() {
					cache.refresh = refresh;
				}
			})
			.await;
	}

	/// Returns `true` once [`initialize_cache`](Self::initialize_cache) has completed.
	pub fn is_cache_initialized(&self) -> bool {
		self.initialized.is_initialized()
	}

	/// Returns the access token, loading it from durable storage on a cache miss.
	pub async fn get_access_token(&self) -> Option<TokenSecret> {
		self.token(TokenSlot::Access).await
	}

	/// Returns the refresh token, loading it from durable storage on a cache miss.
	pub async fn get_refresh_token(&self) -> Option<TokenSecret> {
		self.token(TokenSlot::Refresh).await
	}

	/// Stores a new access token and, when provided, a new refresh token.
	///
	/// The cache is updated before this method returns, so reads issued while the returned
	/// future is still pending already observe the new values. The future performs the durable
	/// writes concurrently; entries whose write fails are rolled back in the cache and the first
	/// error is returned. The future must be awaited for the tokens to persist.
	pub fn store_tokens(
		&self,
		access_token: TokenSecret,
		refresh_token: Option<TokenSecret>,
	) -> impl Future<Output = Result<()>> + Send + '_ {
		{
			let mut cache = self.cache.write();

			cache.access = Some(access_token.clone());

			if let Some(refresh) = &refresh_token {
				cache.refresh = Some(refresh.clone());
			}
		}

		async move {
			let refresh_write = async {
				match &refresh_token {
					Some(token) => self.write_token(TokenSlot::Refresh, token).await,
					None => Ok(()),
				}
			};
			let (access_result, refresh_result) =
				future::join(self.write_token(TokenSlot::Access, &access_token), refresh_write)
					.await;

			if access_result.is_err() {
				self.rollback(TokenSlot::Access, &access_token);
			}
			if let (Err(_), Some(token)) = (&refresh_result, &refresh_token) {
				self.rollback(TokenSlot::Refresh, token);
			}

			access_result.and(refresh_result).map_err(Error::from)
		}
	}

	/// Persists a full login session: both tokens and, optionally, the user profile.
	///
	/// Starts a new session generation, so a refresh or lazy read still running for the previous
	/// session cannot overwrite it.
	pub async fn store_session(
		&self,
		credentials: &CredentialPair,
		profile: Option<&CachedUserProfile>,
	) -> Result<()> {
		let _session = self.session.lock().await;

		{
			let _cache = self.cache.write();

			self.generation.fetch_add(1, Ordering::SeqCst);
		}

		self.store_tokens(
			credentials.access_token.clone(),
			Some(credentials.refresh_token.clone()),
		)
		.await?;

		if let Some(profile) = profile {
			self.store_user_data(profile).await?;
		}

		Ok(())
	}

	/// Serializes `profile` as JSON into durable storage.
	pub async fn store_user_data<T>(&self, profile: &T) -> Result<()>
	where
		T: ?Sized + Serialize,
	{
		let mut buf = Vec::new();

		serde_path_to_error::serialize(profile, &mut serde_json::Serializer::new(&mut buf))?;

		let encoded = String::from_utf8(buf)
			.map_err(|e| StorageError::Serialization { message: e.to_string() })?;

		self.storage.set(&self.keys.user_data, encoded).await?;

		Ok(())
	}

	/// Loads and deserializes the cached user profile; any failure reads as absent.
	pub async fn get_user_data<T>(&self) -> Option<T>
	where
		T: DeserializeOwned,
	{
		let raw = match self.storage.get(&self.keys.user_data).await {
			Ok(raw) => raw?,
			Err(e) => {
				obs::record_degraded(FlowKind::Session, "get_user_data", &e);

				return None;
			},
		};
		let mut de = serde_json::Deserializer::from_str(&raw);

		match serde_path_to_error::deserialize(&mut de) {
			Ok(profile) => Some(profile),
			Err(e) => {
				obs::record_degraded(FlowKind::Session, "get_user_data", &e);

				None
			},
		}
	}

	/// Clears the cache, every durable key, and any in-flight refresh bookkeeping.
	///
	/// All three removals are attempted even if one fails; the first failure is returned. Reads
	/// overlapping the removals report absent values and leave the cache empty. The in-flight
	/// refresh slot is released only after the removals settle.
	pub async fn clear_all(&self) -> Result<()> {
		let _session = self.session.lock().await;

		self.clear_locked().await
	}

	/// Returns `true` when an access token is present. Validity is not checked.
	pub async fn is_authenticated(&self) -> bool {
		self.get_access_token().await.is_some()
	}

	/// Monotonic counter bumped by every login and every [`clear_all`](Self::clear_all).
	pub(crate) fn generation(&self) -> u64 {
		self.generation.load(Ordering::SeqCst)
	}

	/// Persists refreshed tokens unless the session changed since `generation` was observed.
	///
	/// Returns `Ok(false)` without touching anything when a login or logout intervened.
	pub(crate) async fn store_refreshed_tokens(
		&self,
		generation: u64,
		access_token: TokenSecret,
		refresh_token: Option<TokenSecret>,
	) -> Result<bool> {
		let _session = self.session.lock().await;

		if self.generation() != generation {
			return Ok(false);
		}

		self.store_tokens(access_token, refresh_token).await?;

		Ok(true)
	}

	/// Clears everything unless the session changed since `generation` was observed.
	pub(crate) async fn clear_if_current(&self, generation: u64) -> Result<bool> {
		let _session = self.session.lock().await;

		if self.generation() != generation {
			return Ok(false);
		}

		self.clear_locked().await?;

		Ok(true)
	}

	pub(crate) fn refresh_state(&self) -> &RefreshState {
		&self.refresh_state
	}

	async fn token(&self, slot: TokenSlot) -> Option<TokenSecret> {
		let cached = self.cache.read().slot(slot).clone();

		if cached.is_some() {
			return cached;
		}

		let generation = self.generation();
		let loaded = self.read_token(slot).await;
		let mut cache = self.cache.write();
		let entry = cache.slot_mut(slot);

		// A login or logout overlapped the read; whatever the cache holds now wins.
		if entry.is_none() && self.is_current(generation) {
			*entry = loaded;
		}

		entry.clone()
	}

	// Must be called with the cache lock held so it cannot interleave with a clear window.
	fn is_current(&self, generation: u64) -> bool {
		!self.clearing.load(Ordering::SeqCst) && self.generation() == generation
	}

	// Caller holds the session lock.
	async fn clear_locked(&self) -> Result<()> {
		let window = ClearWindow::open(self);
		let [access, refresh, user] = self.keys.all();
		let (access_result, refresh_result, user_result) = future::join3(
			self.storage.remove(access),
			self.storage.remove(refresh),
			self.storage.remove(user),
		)
		.await;

		drop(window);

		access_result.and(refresh_result).and(user_result).map_err(Error::from)
	}

	async fn read_token(&self, slot: TokenSlot) -> Option<TokenSecret> {
		match self.storage.get(self.key(slot)).await {
			Ok(value) => value.filter(|v| !v.is_empty()).map(TokenSecret::new),
			Err(e) => {
				obs::record_degraded(FlowKind::Session, "read_token", &e);

				None
			},
		}
	}

	async fn write_token(
		&self,
		slot: TokenSlot,
		token: &TokenSecret,
	) -> Result<(), StorageError> {
		self.storage.set(self.key(slot), token.expose().to_owned()).await
	}

	fn rollback(&self, slot: TokenSlot, written: &TokenSecret) {
		let mut cache = self.cache.write();
		let entry = cache.slot_mut(slot);

		if entry.as_ref() == Some(written) {
			*entry = None;
		}
	}

	fn key(&self, slot: TokenSlot) -> &str {
		match slot {
			TokenSlot::Access => &self.keys.access_token,
			TokenSlot::Refresh => &self.keys.refresh_token,
		}
	}
}
impl Debug for TokenStore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let cache = self.cache.read();

		f.debug_struct("TokenStore")
			.field("keys", &self.keys)
			.field("access_cached", &cache.access.is_some())
			.field("refresh_cached", &cache.refresh.is_some())
			.field("initialized", &self.is_cache_initialized())
			.finish()
	}
}

// Marks a clear in progress from cache wipe until durable removal settles, including when the
// clearing future is dropped midway.
struct ClearWindow<'a> {
	store: &'a TokenStore,
}
impl<'a> ClearWindow<'a> {
	fn open(store: &'a TokenStore) -> Self {
		let mut cache = store.cache.write();

		store.clearing.store(true, Ordering::SeqCst);
		store.generation.fetch_add(1, Ordering::SeqCst);
		*cache = TokenCache::default();

		Self { store }
	}
}
impl Drop for ClearWindow<'_> {
	fn drop(&mut self) {
		{
			let _cache = self.store.cache.write();

			self.store.generation.fetch_add(1, Ordering::SeqCst);
			self.store.clearing.store(false, Ordering::SeqCst);
		}

		self.store.refresh_state.reset();
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::time::Duration;
	// self
	use super::*;
	use crate::storage::{MemoryStorage, StorageError, StorageFuture};

	/// Memory storage whose reads and writes can be switched to fail.
	#[derive(Default)]
	struct FlakyStorage {
		inner: MemoryStorage,
		fail_reads: AtomicBool,
		slow_removes: AtomicBool,
		fail_writes_for: Mutex<Vec<String>>,
		reads: AtomicU64,
	}
	impl FlakyStorage {
		fn fail_writes_to(&self, key: &str) {
			self.fail_writes_for.lock().push(key.to_owned());
		}
	}
	impl KeyValueStorage for FlakyStorage {
		fn get<'a>(&'a self, key: &'a str) -> StorageFuture<'a, Option<String>> {
			self.reads.fetch_add(1, Ordering::SeqCst);

			if self.fail_reads.load(Ordering::SeqCst) {
				return Box::pin(async {
					Err(StorageError::Backend { message: "read offline".into() })
				});
			}

			self.inner.get(key)
		}

		fn set<'a>(&'a self, key: &'a str, value: String) -> StorageFuture<'a, ()> {
			if self.fail_writes_for.lock().iter().any(|k| k == key) {
				return Box::pin(async {
					Err(StorageError::Backend { message: "write offline".into() })
				});
			}

			self.inner.set(key, value)
		}

		fn remove<'a>(&'a self, key: &'a str) -> StorageFuture<'a, ()> {
			let slow = self.slow_removes.load(Ordering::SeqCst);

			Box::pin(async move {
				if slow {
					tokio::time::sleep(Duration::from_millis(20)).await;
				}

				self.inner.remove(key).await
			})
		}
	}

	fn store_over(storage: Arc<FlakyStorage>) -> TokenStore {
		TokenStore::new(storage, StorageKeys::default())
	}

	#[tokio::test]
	async fn cache_observes_tokens_before_durable_write_settles() {
		let storage = Arc::new(FlakyStorage::default());
		let store = store_over(storage.clone());
		let pending = store.store_tokens("a1".into(), Some(TokenSecret::new("r1")));

		assert_eq!(store.get_access_token().await, Some(TokenSecret::new("a1")));
		assert_eq!(store.get_refresh_token().await, Some(TokenSecret::new("r1")));
		assert!(storage.inner.peek("accessToken").is_none());

		pending.await.expect("Durable write should succeed.");

		assert_eq!(storage.inner.peek("accessToken").as_deref(), Some("a1"));
		assert_eq!(storage.inner.peek("refreshToken").as_deref(), Some("r1"));
	}

	#[tokio::test]
	async fn failed_write_rolls_back_only_the_failed_entry() {
		let storage = Arc::new(FlakyStorage::default());

		storage.fail_writes_to("refreshToken");

		let store = store_over(storage.clone());
		let err = store
			.store_tokens("a1".into(), Some(TokenSecret::new("r1")))
			.await
			.expect_err("Refresh token write should fail.");

		assert!(matches!(err, Error::Storage(StorageError::Backend { .. })));
		assert_eq!(store.get_access_token().await, Some(TokenSecret::new("a1")));
		assert_eq!(store.get_refresh_token().await, None);
	}

	#[tokio::test]
	async fn lazy_load_populates_cache_once() {
		let storage = Arc::new(FlakyStorage::default());

		storage.inner.set("accessToken", "a-disk".into()).await.expect("Seeding should succeed.");

		let store = store_over(storage.clone());

		assert_eq!(store.get_access_token().await, Some(TokenSecret::new("a-disk")));

		let reads = storage.reads.load(Ordering::SeqCst);

		assert_eq!(store.get_access_token().await, Some(TokenSecret::new("a-disk")));
		assert_eq!(storage.reads.load(Ordering::SeqCst), reads);
	}

	#[tokio::test]
	async fn read_failures_degrade_to_absent_and_init_is_not_retried() {
		let storage = Arc::new(FlakyStorage::default());

		storage.fail_reads.store(true, Ordering::SeqCst);

		let store = store_over(storage.clone());

		store.initialize_cache().await;

		assert!(store.is_cache_initialized());

		let reads = storage.reads.load(Ordering::SeqCst);

		store.initialize_cache().await;

		assert_eq!(storage.reads.load(Ordering::SeqCst), reads);
		assert!(!store.is_authenticated().await);
		assert!(store.get_user_data::<CachedUserProfile>().await.is_none());
	}

	#[tokio::test]
	async fn initialize_cache_loads_both_tokens() {
		let storage = Arc::new(FlakyStorage::default());

		storage.inner.set("accessToken", "a1".into()).await.expect("Seeding should succeed.");
		storage.inner.set("refreshToken", "r1".into()).await.expect("Seeding should succeed.");

		let store = store_over(storage.clone());

		store.initialize_cache().await;

		let reads = storage.reads.load(Ordering::SeqCst);

		assert_eq!(store.get_access_token().await, Some(TokenSecret::new("a1")));
		assert_eq!(store.get_refresh_token().await, Some(TokenSecret::new("r1")));
		assert_eq!(storage.reads.load(Ordering::SeqCst), reads);
	}

	#[tokio::test]
	async fn concurrent_initialization_shares_one_load() {
		let storage = Arc::new(FlakyStorage::default());

		storage.inner.set("accessToken", "a1".into()).await.expect("Seeding should succeed.");
		storage.inner.set("refreshToken", "r1".into()).await.expect("Seeding should succeed.");

		let store = store_over(storage.clone());

		future::join_all((0..5).map(|_| store.initialize_cache())).await;

		assert_eq!(storage.reads.load(Ordering::SeqCst), 2);
		assert_eq!(store.get_access_token().await, Some(TokenSecret::new("a1")));
		assert_eq!(store.get_refresh_token().await, Some(TokenSecret::new("r1")));
		assert_eq!(storage.reads.load(Ordering::SeqCst), 2);
	}

	#[tokio::test]
	async fn reads_overlapping_clear_do_not_restore_tokens() {
		let storage = Arc::new(FlakyStorage::default());
		let store = store_over(storage.clone());

		store
			.store_session(&CredentialPair::new("a1", "r1"), None)
			.await
			.expect("Storing a session should succeed.");
		storage.slow_removes.store(true, Ordering::SeqCst);

		let read_during_clear = async {
			tokio::time::sleep(Duration::from_millis(5)).await;

			store.get_access_token().await
		};
		let (cleared, during) = tokio::join!(store.clear_all(), read_during_clear);

		cleared.expect("Clearing should succeed.");

		assert!(during.is_none());
		assert!(!store.is_authenticated().await);
		assert!(store.get_refresh_token().await.is_none());
		assert!(storage.inner.is_empty());
	}

	#[tokio::test]
	async fn login_starts_a_new_generation() {
		let store = store_over(Arc::new(FlakyStorage::default()));
		let before = store.generation();

		store
			.store_session(&CredentialPair::new("a1", "r1"), None)
			.await
			.expect("Storing a session should succeed.");

		let after_login = store.generation();

		assert_ne!(before, after_login);

		let stored = store
			.store_refreshed_tokens(before, "stale".into(), None)
			.await
			.expect("Skipping a stale refresh is not an error.");

		assert!(!stored);
		assert_eq!(store.get_access_token().await, Some(TokenSecret::new("a1")));
		assert!(!store.clear_if_current(before).await.expect("Stale clear should be skipped."));
		assert!(store.is_authenticated().await);
		assert!(store.clear_if_current(after_login).await.expect("Current clear should run."));
		assert!(!store.is_authenticated().await);
	}

	#[tokio::test]
	async fn clear_all_is_idempotent() {
		let storage = Arc::new(FlakyStorage::default());
		let store = store_over(storage.clone());

		store.clear_all().await.expect("Clearing an empty store should succeed.");

		assert!(!store.is_authenticated().await);

		let profile = CachedUserProfile::new("u-1", "buyer@example.com");

		store
			.store_session(&CredentialPair::new("a1", "r1"), Some(&profile))
			.await
			.expect("Storing a session should succeed.");

		assert!(store.is_authenticated().await);

		store.clear_all().await.expect("Clearing a populated store should succeed.");
		store.clear_all().await.expect("Clearing twice should succeed.");

		assert!(!store.is_authenticated().await);
		assert!(store.get_refresh_token().await.is_none());
		assert!(store.get_user_data::<CachedUserProfile>().await.is_none());
		assert!(storage.inner.is_empty());
	}

	#[tokio::test]
	async fn user_data_round_trips() {
		let store = store_over(Arc::new(FlakyStorage::default()));
		let mut profile = CachedUserProfile::new("u-7", "seller@example.com");

		profile.is_verified = true;
		profile.extra.insert("storeName".into(), serde_json::Value::from("Vintage Finds"));

		store.store_user_data(&profile).await.expect("Storing the profile should succeed.");

		let loaded: CachedUserProfile =
			store.get_user_data().await.expect("Stored profile should load.");

		assert_eq!(loaded, profile);
	}

	#[tokio::test]
	async fn corrupt_user_data_reads_as_absent() {
		let storage = Arc::new(FlakyStorage::default());

		storage.inner.set("userData", "{not json".into()).await.expect("Seeding should succeed.");

		let store = store_over(storage);

		assert!(store.get_user_data::<CachedUserProfile>().await.is_none());
	}
}
