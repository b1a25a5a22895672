//! Session event publication, decoupling request plumbing from application-level teardown.
//!
//! The gateway never navigates, shows toasts, or touches UI state. When a session becomes
//! unrecoverable it emits [`AuthEvent::AuthFailure`] and lets whoever subscribed decide what the
//! user sees.

// std
use std::{
	panic::{self, AssertUnwindSafe},
	sync::{
		Weak,
		atomic::{AtomicU64, Ordering},
	},
};
// self
use crate::{
	_prelude::*,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
};

type Listener = Arc<dyn Fn(AuthEvent) + Send + Sync>;
type ListenerMap = HashMap<AuthEvent, Vec<(u64, Listener)>>;

/// Events published by the gateway.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AuthEvent {
	/// The session could not be recovered by a refresh; credentials have been cleared.
	AuthFailure,
	/// A login completed and credentials were stored.
	Login,
	/// Credentials were cleared on request.
	Logout,
}
impl AuthEvent {
	/// Returns a stable label suitable for logs.
	pub const fn as_str(self) -> &'static str {
		match self {
			AuthEvent::AuthFailure => "AUTH_FAILURE",
			AuthEvent::Login => "LOGIN",
			AuthEvent::Logout => "LOGOUT",
		}
	}
}
impl Display for AuthEvent {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Publish/subscribe channel for [`AuthEvent`]s.
///
/// Share it behind an [`Arc`] between the gateway and the application code that reacts to
/// session loss.
#[derive(Default)]
pub struct AuthFailureNotifier {
	listeners: Arc<RwLock<ListenerMap>>,
	next_id: AtomicU64,
}
impl AuthFailureNotifier {
	/// Registers `callback` for `event`; the returned handle removes it again.
	pub fn subscribe<F>(&self, event: AuthEvent, callback: F) -> Subscription
	where
		F: 'static + Fn(AuthEvent) + Send + Sync,
	{
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);

		self.listeners.write().entry(event).or_default().push((id, Arc::new(callback)));

		Subscription { listeners: Arc::downgrade(&self.listeners), event, id }
	}

	/// Synchronously invokes every callback registered for `event` and returns how many ran.
	///
	/// Callbacks run outside the registry lock, so they may subscribe or unsubscribe. A
	/// panicking callback is logged and skipped; the remaining callbacks still run.
	pub fn emit(&self, event: AuthEvent) -> usize {
		let span = FlowSpan::new(FlowKind::Session, "emit");
		let _guard = span.clone().entered();
		let snapshot = self
			.listeners
			.read()
			.get(&event)
			.map(|entries| {
				entries.iter().map(|(_, listener)| listener.clone()).collect::<Vec<_>>()
			})
			.unwrap_or_default();

		for listener in &snapshot {
			if panic::catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
				obs::record_degraded(
					FlowKind::Session,
					"emit",
					&format_args!("{event} listener panicked"),
				);
			}
		}

		obs::record_session_event(event.as_str(), snapshot.len());
		span.record_outcome(FlowOutcome::Success);

		snapshot.len()
	}

	/// Returns the number of callbacks currently registered for `event`.
	pub fn subscriber_count(&self, event: AuthEvent) -> usize {
		self.listeners.read().get(&event).map_or(0, Vec::len)
	}
}
impl Debug for AuthFailureNotifier {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let listeners = self.listeners.read();
		let counts: HashMap<_, _> =
			listeners.iter().map(|(event, entries)| (event.as_str(), entries.len())).collect();

		f.debug_struct("AuthFailureNotifier").field("subscribers", &counts).finish()
	}
}

/// Handle returned by [`AuthFailureNotifier::subscribe`].
///
/// Dropping the handle keeps the callback registered; call [`unsubscribe`](Self::unsubscribe)
/// to remove it.
#[derive(Debug)]
pub struct Subscription {
	listeners: Weak<RwLock<ListenerMap>>,
	event: AuthEvent,
	id: u64,
}
impl Subscription {
	/// Event this subscription listens to.
	pub fn event(&self) -> AuthEvent {
		self.event
	}

	/// Removes the callback. Returns `false` if it was already gone.
	pub fn unsubscribe(self) -> bool {
		let Some(listeners) = self.listeners.upgrade() else {
			return false;
		};
		let mut listeners = listeners.write();
		let Some(entries) = listeners.get_mut(&self.event) else {
			return false;
		};
		let before = entries.len();

		entries.retain(|(id, _)| *id != self.id);

		let removed = entries.len() != before;

		if entries.is_empty() {
			listeners.remove(&self.event);
		}

		removed
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::AtomicUsize;
	// self
	use super::*;

	#[test]
	fn emit_reaches_only_matching_subscribers() {
		let notifier = AuthFailureNotifier::default();
		let failures = Arc::new(AtomicUsize::new(0));
		let logins = Arc::new(AtomicUsize::new(0));
		let failures_seen = failures.clone();
		let logins_seen = logins.clone();
		let _failure = notifier.subscribe(AuthEvent::AuthFailure, move |_| {
			failures_seen.fetch_add(1, Ordering::SeqCst);
		});
		let _login = notifier.subscribe(AuthEvent::Login, move |_| {
			logins_seen.fetch_add(1, Ordering::SeqCst);
		});

		assert_eq!(notifier.emit(AuthEvent::AuthFailure), 1);
		assert_eq!(notifier.emit(AuthEvent::Logout), 0);
		assert_eq!(failures.load(Ordering::SeqCst), 1);
		assert_eq!(logins.load(Ordering::SeqCst), 0);
	}

	#[test]
	fn unsubscribe_removes_callback() {
		let notifier = AuthFailureNotifier::default();
		let hits = Arc::new(AtomicUsize::new(0));
		let hits_seen = hits.clone();
		let subscription = notifier.subscribe(AuthEvent::AuthFailure, move |_| {
			hits_seen.fetch_add(1, Ordering::SeqCst);
		});

		assert_eq!(subscription.event(), AuthEvent::AuthFailure);
		assert!(subscription.unsubscribe());
		assert_eq!(notifier.emit(AuthEvent::AuthFailure), 0);
		assert_eq!(notifier.subscriber_count(AuthEvent::AuthFailure), 0);
		assert_eq!(hits.load(Ordering::SeqCst), 0);
	}

	#[test]
	fn panicking_listener_does_not_block_others() {
		let notifier = AuthFailureNotifier::default();
		let hits = Arc::new(AtomicUsize::new(0));
		let hits_seen = hits.clone();
		let _bad = notifier.subscribe(AuthEvent::AuthFailure, |_| panic!("listener exploded"));
		let _good = notifier.subscribe(AuthEvent::AuthFailure, move |_| {
			hits_seen.fetch_add(1, Ordering::SeqCst);
		});

		assert_eq!(notifier.emit(AuthEvent::AuthFailure), 2);
		assert_eq!(hits.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn listener_may_unsubscribe_itself_during_emit() {
		let notifier = Arc::new(AuthFailureNotifier::default());
		let slot: Arc<Mutex<Option<Subscription>>> = Default::default();
		let slot_seen = slot.clone();
		let subscription = notifier.subscribe(AuthEvent::Logout, move |_| {
			if let Some(subscription) = slot_seen.lock().take() {
				subscription.unsubscribe();
			}
		});

		*slot.lock() = Some(subscription);

		assert_eq!(notifier.emit(AuthEvent::Logout), 1);
		assert_eq!(notifier.subscriber_count(AuthEvent::Logout), 0);
	}
}
