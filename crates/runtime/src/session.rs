//! Backend session contract and session-factory lookup.
//!
//! A [`Session`] is the live handle to one store server. Sessions are produced
//! by a [`SessionFactory`] registered for the endpoint's URI scheme in a
//! [`SessionFactoryFinder`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use downcast_rs::{DowncastSync, impl_downcast};
use rdflink_protocol::{Answer, Credentials, Endpoint, Query};
use tracing::debug;

use crate::cancel::CancelToken;
use crate::config::ConnectionConfig;
use crate::error::{Error, Result};

/// Live backend handle capable of running queries and admin operations
/// against one server.
///
/// Long-running calls receive a [`CancelToken`] and should return
/// [`Error::Cancelled`] once it fires.
#[async_trait]
pub trait Session: DowncastSync {
	/// Runs a query and returns its answer.
	async fn query(&self, query: &Query, cancel: &CancelToken) -> Result<Answer>;

	/// Runs an update (insert, delete, load) and returns the affected statement count.
	async fn update(&self, statement: &str, cancel: &CancelToken) -> Result<u64>;

	async fn set_auto_commit(&self, auto_commit: bool) -> Result<()>;

	async fn commit(&self) -> Result<()>;

	async fn rollback(&self) -> Result<()>;

	async fn login(&self, security_domain: &Endpoint, credentials: &Credentials) -> Result<()>;

	/// Liveness probe. `Ok(false)` and `Err(_)` both mean the session is unusable.
	async fn ping(&self) -> Result<bool>;

	/// True if the session runs in-process, without a network hop.
	fn is_local(&self) -> bool;

	async fn close(&self) -> Result<()>;

	async fn create_graph(&self, graph: &str, graph_type: Option<&str>) -> Result<()>;

	async fn remove_graph(&self, graph: &str) -> Result<()>;

	async fn graph_exists(&self, graph: &str) -> Result<bool>;
}

impl_downcast!(sync Session);

/// Backend-specific producer of sessions.
#[async_trait]
pub trait SessionFactory: Send + Sync {
	/// Security domain that authenticates sessions for `endpoint`, if any.
	fn security_domain(&self, endpoint: &Endpoint) -> Option<Endpoint>;

	async fn new_session(&self, endpoint: &Endpoint) -> Result<Arc<dyn Session>>;
}

/// A freshly opened session together with the security domain reported for it.
pub struct OpenedSession {
	pub session: Arc<dyn Session>,
	pub security_domain: Option<Endpoint>,
}

/// Registry of session factories keyed by URI scheme.
pub struct SessionFactoryFinder {
	factories: HashMap<String, Arc<dyn SessionFactory>>,
	rpc_scheme: String,
	local_scheme: String,
}

impl SessionFactoryFinder {
	pub fn new(config: &ConnectionConfig) -> Self {
		Self {
			factories: HashMap::new(),
			rpc_scheme: config.rpc_scheme.clone(),
			local_scheme: config.local_scheme.clone(),
		}
	}

	/// Registers `factory` for `scheme`, replacing any previous registration.
	pub fn register(&mut self, scheme: impl Into<String>, factory: Arc<dyn SessionFactory>) {
		self.factories.insert(scheme.into(), factory);
	}

	pub fn with(mut self, scheme: impl Into<String>, factory: Arc<dyn SessionFactory>) -> Self {
		self.register(scheme, factory);
		self
	}

	pub fn resolve(&self, endpoint: &Endpoint) -> Result<Arc<dyn SessionFactory>> {
		self.factories
			.get(endpoint.scheme())
			.cloned()
			.ok_or_else(|| Error::UnsupportedScheme {
				endpoint: endpoint.to_string(),
				scheme: endpoint.scheme().to_string(),
			})
	}

	/// Opens a session for `endpoint`.
	///
	/// When the RPC server cannot be reached and `is_remote` is false, the
	/// session is opened through the local factory instead.
	pub async fn open(&self, endpoint: &Endpoint, is_remote: bool) -> Result<OpenedSession> {
		let factory = self.resolve(endpoint)?;
		debug!(target = "rdflink.factory", %endpoint, "obtaining session");

		match factory.new_session(endpoint).await {
			Ok(session) => Ok(OpenedSession {
				session,
				security_domain: factory.security_domain(endpoint),
			}),
			Err(e) if e.is_unreachable() && !is_remote && endpoint.scheme() == self.rpc_scheme => {
				let Some(local) = self.factories.get(&self.local_scheme) else {
					return Err(e);
				};
				debug!(target = "rdflink.factory", %endpoint, error = %e, "rpc lookup failed; falling back to local");
				let session = local.new_session(endpoint).await?;
				Ok(OpenedSession {
					session,
					security_domain: local.security_domain(endpoint),
				})
			}
			Err(e) => Err(e),
		}
	}
}
