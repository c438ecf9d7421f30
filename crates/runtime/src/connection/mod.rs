//! Client-facing connection over exactly one backend session.
//!
//! A connection serializes every operation on its session, tracks the
//! autocommit flag and its own lifecycle, and lets another task cancel the
//! operation currently in flight.
//!
//! # Execution
//!
//! 1. [`Connection::execute`] checks the connection is still open
//! 2. The serialization lock is taken for the whole operation
//! 3. An operation that queued behind `close` or `dispose` fails with [`Error::Closed`]
//! 4. A fresh [`CancelToken`] is registered in the in-flight slot
//! 5. The operation runs with the session and the token
//! 6. The in-flight slot is cleared, whatever the outcome
//!
//! With a proxy runtime configured, steps 2-6 run on a spawned task and the
//! caller awaits its delivery. Dropping the caller's future never aborts a
//! proxied operation; it runs to completion and releases the lock.

mod in_flight;

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use rdflink_protocol::{Credentials, Endpoint};
use tokio::runtime::Handle;
use tracing::debug;

use self::in_flight::{Delivery, InFlightSlot};
use crate::cache::SessionCache;
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
	Open,
	Closed,
	Disposed,
}

struct State {
	lifecycle: Lifecycle,
	auto_commit: bool,
	security_domain: Option<Endpoint>,
}

/// Shared between the connection and any proxy task running on its behalf.
struct Executor {
	session: Arc<dyn Session>,
	serial: tokio::sync::Mutex<()>,
	in_flight: InFlightSlot,
	reclaim: Mutex<Option<Pool>>,
	/// Set under the serial lock once the session is handed back or closed.
	retired: AtomicBool,
}

impl Drop for Executor {
	fn drop(&mut self) {
		if let Some(pool) = self.reclaim.get_mut().take() {
			pool.cache.release(&pool.endpoint, Arc::clone(&self.session));
		}
	}
}

impl Executor {
	async fn run<T, E, F, Fut>(&self, op: F) -> std::result::Result<T, E>
	where
		F: FnOnce(Arc<dyn Session>, CancelToken) -> Fut,
		Fut: Future<Output = std::result::Result<T, E>>,
		E: From<Error>,
	{
		let _serial = self.serial.lock().await;
		// Operations queued behind close or dispose must not reach the session.
		if self.retired.load(Ordering::Acquire) {
			return Err(Error::Closed.into());
		}
		let token = CancelToken::new();
		let _registration = self.in_flight.register(token.clone());
		op(Arc::clone(&self.session), token).await
	}
}

/// Recycling target for a pooled connection.
struct Pool {
	cache: Arc<SessionCache>,
	endpoint: Endpoint,
}

/// A connection to one store server.
///
/// Obtain pooled connections from
/// [`ConnectionFactory`](crate::factory::ConnectionFactory); wrap a session
/// you manage yourself with [`Connection::with_session`].
///
/// Dropping an open pooled connection returns its session to the cache, the
/// same as [`close`](Self::close).
pub struct Connection {
	exec: Arc<Executor>,
	state: Mutex<State>,
	pool: Option<Pool>,
	endpoint: Option<Endpoint>,
	proxy: Option<Handle>,
}

impl Connection {
	/// Wraps a caller-owned session. The session is never recycled.
	pub fn with_session(session: Arc<dyn Session>) -> Self {
		Self::build(session, None, None, None)
	}

	pub(crate) fn pooled(
		session: Arc<dyn Session>,
		endpoint: Endpoint,
		security_domain: Option<Endpoint>,
		cache: Arc<SessionCache>,
	) -> Self {
		Self::build(
			session,
			Some(endpoint.clone()),
			security_domain,
			Some(Pool { cache, endpoint }),
		)
	}

	fn build(
		session: Arc<dyn Session>,
		endpoint: Option<Endpoint>,
		security_domain: Option<Endpoint>,
		pool: Option<Pool>,
	) -> Self {
		debug!(target = "rdflink.connection", endpoint = ?endpoint.as_ref().map(Endpoint::as_str), "connection created");
		Self {
			exec: Arc::new(Executor {
				session,
				serial: tokio::sync::Mutex::new(()),
				in_flight: InFlightSlot::default(),
				reclaim: Mutex::new(None),
				retired: AtomicBool::new(false),
			}),
			state: Mutex::new(State {
				lifecycle: Lifecycle::Open,
				auto_commit: true,
				security_domain,
			}),
			pool,
			endpoint,
			proxy: None,
		}
	}

	/// Runs every operation on a task spawned on `runtime`.
	pub fn with_proxy(mut self, runtime: Handle) -> Self {
		self.proxy = Some(runtime);
		self
	}

	pub fn with_security_domain(self, domain: Endpoint) -> Self {
		self.state.lock().security_domain = Some(domain);
		self
	}

	/// Runs `op` against the session, one operation at a time.
	///
	/// `op` receives the session and a token that [`cancel`](Self::cancel)
	/// fires. Its error is returned unchanged; a panic inside `op` is resumed in
	/// the caller.
	pub async fn execute<T, E, F, Fut>(&self, op: F) -> std::result::Result<T, E>
	where
		F: FnOnce(Arc<dyn Session>, CancelToken) -> Fut + Send + 'static,
		Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
		T: Send + 'static,
		E: From<Error> + Send + 'static,
	{
		self.check_open()?;
		match &self.proxy {
			Some(runtime) => {
				let exec = Arc::clone(&self.exec);
				debug!(target = "rdflink.connection", "dispatching operation to proxy task");
				let task = runtime.spawn(async move { exec.run(op).await });
				Delivery::from(task.await).into_result()
			}
			None => self.exec.run(op).await,
		}
	}

	/// Cancels the operation in flight, if any. Returns whether one was signalled.
	pub fn cancel(&self) -> bool {
		let cancelled = self.exec.in_flight.cancel();
		if cancelled {
			debug!(target = "rdflink.connection", "cancellation signalled");
		}
		cancelled
	}

	/// Switches autocommit on the session. No-op if already at `auto_commit`.
	///
	/// Local state changes only once the session accepted the change.
	pub async fn set_auto_commit(&self, auto_commit: bool) -> Result<()> {
		if self.auto_commit()? == auto_commit {
			return Ok(());
		}
		self.execute(move |session, _| async move { session.set_auto_commit(auto_commit).await })
			.await?;
		self.state.lock().auto_commit = auto_commit;
		Ok(())
	}

	pub fn auto_commit(&self) -> Result<bool> {
		let state = self.state.lock();
		Self::ensure_open(&state)?;
		Ok(state.auto_commit)
	}

	/// Logs in against `security_domain`, which becomes this connection's domain.
	pub async fn set_credentials(&self, security_domain: Endpoint, credentials: Credentials) -> Result<()> {
		{
			let mut state = self.state.lock();
			Self::ensure_open(&state)?;
			state.security_domain = Some(security_domain);
		}
		self.set_default_credentials(credentials).await
	}

	/// Logs in against the security domain reported for the session.
	pub async fn set_default_credentials(&self, credentials: Credentials) -> Result<()> {
		let domain = self.security_domain()?.ok_or(Error::NoSecurityDomain)?;
		self.execute(move |session, _| async move { session.login(&domain, &credentials).await })
			.await
	}

	pub fn security_domain(&self) -> Result<Option<Endpoint>> {
		let state = self.state.lock();
		Self::ensure_open(&state)?;
		Ok(state.security_domain.clone())
	}

	/// The session backing this connection.
	pub fn session(&self) -> Result<Arc<dyn Session>> {
		self.check_open()?;
		Ok(Arc::clone(&self.exec.session))
	}

	/// Endpoint this connection was obtained for, if it came from a factory.
	pub fn endpoint(&self) -> Option<&Endpoint> {
		self.endpoint.as_ref()
	}

	/// True if the connection is open and its session goes over the network.
	pub fn is_remote(&self) -> bool {
		self.is_open() && !self.exec.session.is_local()
	}

	pub fn is_proxied(&self) -> bool {
		self.proxy.is_some()
	}

	pub fn is_open(&self) -> bool {
		self.state.lock().lifecycle == Lifecycle::Open
	}

	/// Closes the connection, returning its session to the factory's cache.
	///
	/// Waits for any operation in flight before handing the session back.
	/// The connection stays open until then, so dropping this future early
	/// leaves the session to be recycled when the connection is dropped.
	pub async fn close(&self) -> Result<()> {
		self.check_open()?;
		let _serial = self.exec.serial.lock().await;
		self.transition(Lifecycle::Closed)?;
		self.exec.retired.store(true, Ordering::Release);
		if let Some(pool) = &self.pool {
			debug!(target = "rdflink.connection", endpoint = %pool.endpoint, "releasing session to cache");
			pool.cache.release(&pool.endpoint, Arc::clone(&self.exec.session));
		}
		Ok(())
	}

	/// Closes the connection and permanently closes its session.
	pub async fn dispose(&self) -> Result<()> {
		self.check_open()?;
		let _serial = self.exec.serial.lock().await;
		self.transition(Lifecycle::Disposed)?;
		self.exec.retired.store(true, Ordering::Release);
		if let Some(pool) = &self.pool {
			pool.cache.forget(&self.exec.session);
		}
		self.exec.session.close().await
	}

	fn transition(&self, to: Lifecycle) -> Result<()> {
		let mut state = self.state.lock();
		Self::ensure_open(&state)?;
		state.lifecycle = to;
		Ok(())
	}

	fn check_open(&self) -> Result<()> {
		Self::ensure_open(&self.state.lock())
	}

	fn ensure_open(state: &State) -> Result<()> {
		match state.lifecycle {
			Lifecycle::Open => Ok(()),
			Lifecycle::Closed | Lifecycle::Disposed => Err(Error::Closed),
		}
	}
}

impl Drop for Connection {
	fn drop(&mut self) {
		if self.state.get_mut().lifecycle != Lifecycle::Open {
			return;
		}
		if let Some(pool) = self.pool.take() {
			debug!(target = "rdflink.connection", endpoint = %pool.endpoint, "connection dropped while open, session will be recycled");
			// A detached proxy task may still hold the executor; recycling waits for it.
			*self.exec.reclaim.lock() = Some(pool);
		}
	}
}

#[cfg(test)]
mod tests;
