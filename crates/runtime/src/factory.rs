//! The sole path to pooled connections.
//!
//! A [`ConnectionFactory`] normalizes endpoints, hands out cached sessions
//! after a liveness probe, opens new sessions through the
//! [`SessionFactoryFinder`], and reclaims sessions when connections close.

use std::sync::{Arc, Weak};
use std::time::Duration;

use rdflink_protocol::Endpoint;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{SessionCache, SessionKey};
use crate::config::ConnectionConfig;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::locality::Locality;
use crate::session::{Session, SessionFactoryFinder};

/// Sessions closed by one [`ConnectionFactory::reap`] pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReapReport {
	/// Idle longer than the configured maximum.
	pub expired: usize,
	/// Failed their liveness probe.
	pub dead: usize,
}

pub struct ConnectionFactory {
	config: ConnectionConfig,
	locality: Locality,
	finder: SessionFactoryFinder,
	cache: Arc<SessionCache>,
}

impl ConnectionFactory {
	pub fn new(config: ConnectionConfig, finder: SessionFactoryFinder) -> Self {
		Self::with_cache(config, finder, Arc::new(SessionCache::new()))
	}

	/// Builds a factory over an existing cache, shared with other factories.
	pub fn with_cache(config: ConnectionConfig, finder: SessionFactoryFinder, cache: Arc<SessionCache>) -> Self {
		Self {
			locality: Locality::from_config(&config),
			config,
			finder,
			cache,
		}
	}

	pub fn config(&self) -> &ConnectionConfig {
		&self.config
	}

	pub fn cache(&self) -> &Arc<SessionCache> {
		&self.cache
	}

	/// Returns a connection to `endpoint`, or to the default server if `None`.
	///
	/// An idle cached session for the normalized endpoint is reused if it
	/// answers a liveness probe; otherwise a new session is opened.
	pub async fn new_connection(&self, endpoint: Option<&Endpoint>) -> Result<Connection> {
		let requested = match endpoint {
			Some(endpoint) => endpoint.clone(),
			None => self.default_server()?,
		};
		let endpoint = self.normalize_local_uri(&requested);

		let (session, security_domain) = match self.cached_session(&endpoint).await {
			Some(session) => {
				debug!(target = "rdflink.factory", %endpoint, "reusing cached session");
				let domain = self.finder.resolve(&endpoint).ok().and_then(|f| f.security_domain(&endpoint));
				(session, domain)
			}
			None => {
				let is_remote = !self.is_local_server(&endpoint);
				debug!(target = "rdflink.factory", %endpoint, is_remote, "no cached session, opening new one");
				let opened = self
					.finder
					.open(&endpoint, is_remote)
					.await
					.map_err(|e| Error::connectivity(&endpoint, e))?;
				(opened.session, opened.security_domain)
			}
		};

		self.cache.mark_in_use(&session);
		let connection = Connection::pooled(Arc::clone(&session), endpoint, security_domain, Arc::clone(&self.cache));
		Ok(self.attach_proxy(connection, session.as_ref()))
	}

	/// Wraps a caller-owned session. The cache is never consulted or updated.
	pub fn connection_for_session(&self, session: Arc<dyn Session>) -> Connection {
		let connection = Connection::with_session(Arc::clone(&session));
		self.attach_proxy(connection, session.as_ref())
	}

	/// Closes every cached and in-use session. Failures are logged only.
	pub async fn close_all(&self) {
		let sessions = self.cache.drain();
		debug!(target = "rdflink.factory", count = sessions.len(), "closing all sessions");
		for session in sessions {
			if let Err(e) = session.close().await {
				warn!(target = "rdflink.factory", session = ?SessionKey::of(&session), error = %e, "error closing session");
			}
		}
	}

	/// Folds local-host aliases of the RPC scheme onto the canonical host.
	pub fn normalize_local_uri(&self, endpoint: &Endpoint) -> Endpoint {
		self.locality.normalize(endpoint)
	}

	pub fn is_local_server(&self, endpoint: &Endpoint) -> bool {
		self.locality.is_local_server(endpoint)
	}

	/// Closes idle sessions that outlived `max_idle` or fail a liveness probe.
	///
	/// Sessions held by live connections are never probed.
	pub async fn reap(&self, max_idle: Option<Duration>) -> ReapReport {
		let mut report = ReapReport::default();

		if let Some(max_idle) = max_idle {
			for (endpoint, session) in self.cache.take_expired(max_idle) {
				debug!(target = "rdflink.reaper", %endpoint, session = ?SessionKey::of(&session), "closing expired idle session");
				Self::close_quietly(&session).await;
				report.expired += 1;
			}
		}

		for (endpoint, session) in self.cache.idle_snapshot() {
			if Self::is_alive(&session).await {
				continue;
			}
			// Skip sessions a connection picked up while we were probing.
			let Some(session) = self.cache.remove_idle(&endpoint, SessionKey::of(&session)) else {
				continue;
			};
			info!(target = "rdflink.reaper", %endpoint, session = ?SessionKey::of(&session), "discarding dead idle session");
			Self::close_quietly(&session).await;
			report.dead += 1;
		}

		if report != ReapReport::default() {
			debug!(target = "rdflink.reaper", expired = report.expired, dead = report.dead, "reap pass finished");
		}
		report
	}

	/// Runs [`reap`](Self::reap) on the configured interval until the factory
	/// is dropped. Returns `None` if no reaper is configured.
	pub fn spawn_reaper(self: &Arc<Self>) -> Option<JoinHandle<()>> {
		let reaper = self.config.reaper?;
		let factory: Weak<Self> = Arc::downgrade(self);
		debug!(target = "rdflink.reaper", interval = ?reaper.interval(), max_idle = ?reaper.max_idle(), "starting reaper");

		Some(tokio::spawn(async move {
			let mut ticks = tokio::time::interval(reaper.interval());
			ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
			// The first tick completes immediately.
			ticks.tick().await;
			loop {
				ticks.tick().await;
				let Some(factory) = factory.upgrade() else {
					debug!(target = "rdflink.reaper", "factory dropped, stopping reaper");
					break;
				};
				factory.reap(Some(reaper.max_idle())).await;
			}
		}))
	}

	/// The configured default server, before normalization.
	pub fn default_server(&self) -> Result<Endpoint> {
		let server = self.config.default_server.as_deref().ok_or(Error::NoDefaultServer)?;
		Ok(Endpoint::parse(server)?)
	}

	/// Takes one idle session for `endpoint` and checks it is still alive.
	async fn cached_session(&self, endpoint: &Endpoint) -> Option<Arc<dyn Session>> {
		let candidate = self.cache.take_idle(endpoint)?;
		if Self::is_alive(&candidate).await {
			return Some(candidate);
		}
		info!(target = "rdflink.factory", %endpoint, session = ?SessionKey::of(&candidate), "cached session failed liveness check, discarding");
		Self::close_quietly(&candidate).await;
		None
	}

	async fn is_alive(session: &Arc<dyn Session>) -> bool {
		match session.ping().await {
			Ok(alive) => alive,
			Err(e) => {
				info!(target = "rdflink.factory", session = ?SessionKey::of(session), error = %e, "liveness probe failed");
				false
			}
		}
	}

	async fn close_quietly(session: &Arc<dyn Session>) {
		if let Err(e) = session.close().await {
			debug!(target = "rdflink.factory", session = ?SessionKey::of(session), error = %e, "ignoring error closing discarded session");
		}
	}

	fn attach_proxy(&self, connection: Connection, session: &dyn Session) -> Connection {
		if !self.config.interruptible || session.is_local() {
			return connection;
		}
		match Handle::try_current() {
			Ok(runtime) => connection.with_proxy(runtime),
			Err(_) => {
				warn!(target = "rdflink.factory", "interruptible connections need a tokio runtime; running operations inline");
				connection
			}
		}
	}
}
