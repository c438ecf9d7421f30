//! Idle-session pool keyed by normalized endpoint.
//!
//! The cache owns two collections under one mutex: idle sessions per endpoint,
//! and every session currently embedded in a live connection. A session is in
//! at most one of them at any instant.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rdflink_protocol::Endpoint;

use crate::session::Session;

/// Identity of a session instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey(usize);

impl SessionKey {
	pub fn of(session: &Arc<dyn Session>) -> Self {
		Self(Arc::as_ptr(session) as *const () as usize)
	}
}

struct IdleSession {
	session: Arc<dyn Session>,
	since: Instant,
}

#[derive(Default)]
struct CacheState {
	idle: HashMap<Endpoint, HashMap<SessionKey, IdleSession>>,
	in_use: HashMap<SessionKey, Arc<dyn Session>>,
}

/// Thread-safe session pool.
#[derive(Default)]
pub struct SessionCache {
	state: Mutex<CacheState>,
}

impl SessionCache {
	pub fn new() -> Self {
		Self::default()
	}

	/// Removes and returns an arbitrary idle session for `endpoint`.
	pub fn take_idle(&self, endpoint: &Endpoint) -> Option<Arc<dyn Session>> {
		let mut state = self.state.lock();
		let bucket = state.idle.get_mut(endpoint)?;
		let key = *bucket.keys().next()?;
		let taken = bucket.remove(&key).map(|idle| idle.session);
		if bucket.is_empty() {
			state.idle.remove(endpoint);
		}
		taken
	}

	/// Records `session` as embedded in a live connection.
	pub fn mark_in_use(&self, session: &Arc<dyn Session>) {
		self.state.lock().in_use.insert(SessionKey::of(session), Arc::clone(session));
	}

	/// Moves `session` from the in-use set to the idle set of `endpoint`.
	pub fn release(&self, endpoint: &Endpoint, session: Arc<dyn Session>) {
		let key = SessionKey::of(&session);
		let mut state = self.state.lock();
		state.in_use.remove(&key);
		state.idle.entry(endpoint.clone()).or_default().insert(
			key,
			IdleSession {
				session,
				since: Instant::now(),
			},
		);
	}

	/// Drops the in-use reference to a session that its connection has closed.
	pub fn forget(&self, session: &Arc<dyn Session>) {
		self.state.lock().in_use.remove(&SessionKey::of(session));
	}

	/// Removes an idle session if it is still idle.
	pub fn remove_idle(&self, endpoint: &Endpoint, key: SessionKey) -> Option<Arc<dyn Session>> {
		let mut state = self.state.lock();
		let bucket = state.idle.get_mut(endpoint)?;
		let removed = bucket.remove(&key).map(|idle| idle.session);
		if bucket.is_empty() {
			state.idle.remove(endpoint);
		}
		removed
	}

	/// Removes every idle session that has been idle for at least `max_idle`.
	pub fn take_expired(&self, max_idle: Duration) -> Vec<(Endpoint, Arc<dyn Session>)> {
		let now = Instant::now();
		let mut state = self.state.lock();
		let mut expired = Vec::new();
		for (endpoint, bucket) in state.idle.iter_mut() {
			let stale: Vec<SessionKey> = bucket
				.iter()
				.filter(|(_, idle)| now.duration_since(idle.since) >= max_idle)
				.map(|(key, _)| *key)
				.collect();
			for key in stale {
				if let Some(idle) = bucket.remove(&key) {
					expired.push((endpoint.clone(), idle.session));
				}
			}
		}
		state.idle.retain(|_, bucket| !bucket.is_empty());
		expired
	}

	/// Snapshot of the idle sessions, left in place.
	pub fn idle_snapshot(&self) -> Vec<(Endpoint, Arc<dyn Session>)> {
		let state = self.state.lock();
		state
			.idle
			.iter()
			.flat_map(|(endpoint, bucket)| bucket.values().map(move |idle| (endpoint.clone(), Arc::clone(&idle.session))))
			.collect()
	}

	/// Snapshot of the in-use sessions, left in place.
	pub fn in_use_snapshot(&self) -> Vec<Arc<dyn Session>> {
		self.state.lock().in_use.values().cloned().collect()
	}

	/// Empties both collections and returns every session they held.
	pub fn drain(&self) -> Vec<Arc<dyn Session>> {
		let mut state = self.state.lock();
		let mut sessions: Vec<Arc<dyn Session>> = state
			.idle
			.drain()
			.flat_map(|(_, bucket)| bucket.into_values().map(|idle| idle.session))
			.collect();
		sessions.extend(state.in_use.drain().map(|(_, session)| session));
		sessions
	}

	pub fn idle_count(&self, endpoint: &Endpoint) -> usize {
		self.state.lock().idle.get(endpoint).map_or(0, HashMap::len)
	}

	pub fn idle_len(&self) -> usize {
		self.state.lock().idle.values().map(HashMap::len).sum()
	}

	pub fn in_use_len(&self) -> usize {
		self.state.lock().in_use.len()
	}

	pub fn is_in_use(&self, session: &Arc<dyn Session>) -> bool {
		self.state.lock().in_use.contains_key(&SessionKey::of(session))
	}

	pub fn is_empty(&self) -> bool {
		let state = self.state.lock();
		state.idle.is_empty() && state.in_use.is_empty()
	}
}
