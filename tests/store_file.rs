// std
use std::{
	path::{Path, PathBuf},
	sync::Arc,
	time::{SystemTime, UNIX_EPOCH},
};
// self
use authgate::{
	auth::{CachedUserProfile, CredentialPair, TokenSecret},
	config::StorageKeys,
	storage::FileStorage,
	store::TokenStore,
};

fn temp_path(label: &str) -> PathBuf {
	let nanos = SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.expect("System clock should be after the epoch.")
		.as_nanos();
	let dir = std::env::temp_dir().join(format!("authgate-{label}-{}-{nanos}", std::process::id()));

	dir.join("session.json")
}

fn open_store(path: &Path) -> TokenStore {
	let storage = FileStorage::open(path).expect("File storage should open.");

	TokenStore::new(Arc::new(storage), StorageKeys::default())
}

#[tokio::test]
async fn session_survives_reopen() {
	let path = temp_path("reopen");
	let profile = CachedUserProfile::new("u-1", "bidder@example.com");

	open_store(&path)
		.store_session(&CredentialPair::new("a1", "r1"), Some(&profile))
		.await
		.expect("Session should persist.");

	let restored = open_store(&path);

	assert!(!restored.is_cache_initialized());

	restored.initialize_cache().await;

	assert!(restored.is_cache_initialized());
	assert!(restored.is_authenticated().await);
	assert_eq!(restored.get_access_token().await, Some(TokenSecret::new("a1")));
	assert_eq!(restored.get_refresh_token().await, Some(TokenSecret::new("r1")));
	assert_eq!(restored.get_user_data::<CachedUserProfile>().await, Some(profile));

	let _ = std::fs::remove_dir_all(path.parent().expect("Temp path should have a parent."));
}

#[tokio::test]
async fn rotation_and_logout_reach_disk() {
	let path = temp_path("rotate");
	let store = open_store(&path);

	store
		.store_session(&CredentialPair::new("a1", "r1"), None)
		.await
		.expect("Session should persist.");
	store.store_tokens("a2".into(), None).await.expect("Rotation should persist.");

	let reopened = open_store(&path);

	assert_eq!(reopened.get_access_token().await, Some(TokenSecret::new("a2")));
	assert_eq!(reopened.get_refresh_token().await, Some(TokenSecret::new("r1")));

	store.clear_all().await.expect("Logout should clear every key.");

	let reopened = open_store(&path);

	assert!(!reopened.is_authenticated().await);
	assert!(reopened.get_refresh_token().await.is_none());
	assert!(reopened.get_user_data::<CachedUserProfile>().await.is_none());

	let _ = std::fs::remove_dir_all(path.parent().expect("Temp path should have a parent."));
}
