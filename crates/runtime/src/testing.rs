//! In-memory backend for exercising the connection layer without a server.
//!
//! [`MemoryBackend`] is a [`SessionFactory`] whose sessions record every call
//! they receive, honour cancellation, and refuse all work once closed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rdflink_protocol::{Answer, Credentials, Endpoint, Query, QueryForm, Tuples};

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::session::{Session, SessionFactory};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Installs a test-friendly tracing subscriber. Safe to call repeatedly.
pub fn init_tracing() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.with_test_writer()
		.try_init();
}

/// A call observed by a [`MemorySession`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCall {
	Query(String),
	Update(String),
	SetAutoCommit(bool),
	Commit,
	Rollback,
	Login(String),
	Ping,
	Close,
	CreateGraph(String),
	RemoveGraph(String),
	GraphExists(String),
}

/// Recording session double.
#[derive(Debug)]
pub struct MemorySession {
	id: u64,
	local: bool,
	closed: AtomicBool,
	auto_commit: AtomicBool,
	fail_commit: AtomicBool,
	fail_rollback: AtomicBool,
	fail_ping: AtomicBool,
	query_delay: Mutex<Option<Duration>>,
	calls: Mutex<Vec<SessionCall>>,
	graphs: Mutex<Vec<String>>,
}

impl MemorySession {
	pub fn new(local: bool) -> Self {
		Self {
			id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
			local,
			closed: AtomicBool::new(false),
			auto_commit: AtomicBool::new(true),
			fail_commit: AtomicBool::new(false),
			fail_rollback: AtomicBool::new(false),
			fail_ping: AtomicBool::new(false),
			query_delay: Mutex::new(None),
			calls: Mutex::new(Vec::new()),
			graphs: Mutex::new(Vec::new()),
		}
	}

	/// Process-unique identifier, handy in assertion messages.
	pub fn id(&self) -> u64 {
		self.id
	}

	pub fn calls(&self) -> Vec<SessionCall> {
		self.calls.lock().clone()
	}

	pub fn count(&self, call: &SessionCall) -> usize {
		self.calls.lock().iter().filter(|c| *c == call).count()
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	pub fn auto_commit(&self) -> bool {
		self.auto_commit.load(Ordering::SeqCst)
	}

	pub fn fail_commit(&self, fail: bool) {
		self.fail_commit.store(fail, Ordering::SeqCst);
	}

	pub fn fail_rollback(&self, fail: bool) {
		self.fail_rollback.store(fail, Ordering::SeqCst);
	}

	pub fn fail_ping(&self, fail: bool) {
		self.fail_ping.store(fail, Ordering::SeqCst);
	}

	/// Makes every query take `delay` unless cancelled first.
	pub fn set_query_delay(&self, delay: Option<Duration>) {
		*self.query_delay.lock() = delay;
	}

	/// Closes the session behind its owner's back.
	pub fn kill(&self) {
		self.closed.store(true, Ordering::SeqCst);
	}

	fn record(&self, call: SessionCall) -> Result<()> {
		self.calls.lock().push(call);
		if self.is_closed() {
			return Err(Error::SessionClosed);
		}
		Ok(())
	}
}

#[async_trait]
impl Session for MemorySession {
	async fn query(&self, query: &Query, cancel: &CancelToken) -> Result<Answer> {
		self.record(SessionCall::Query(query.text.clone()))?;
		let delay = *self.query_delay.lock();
		if let Some(delay) = delay {
			tokio::select! {
				_ = cancel.cancelled() => return Err(Error::Cancelled),
				_ = tokio::time::sleep(delay) => {}
			}
		}
		if cancel.is_cancelled() {
			return Err(Error::Cancelled);
		}
		Ok(match query.form {
			QueryForm::Select => Answer::Tuples(Tuples {
				variables: vec!["subject".into(), "predicate".into(), "object".into()],
				rows: Vec::new(),
			}),
			QueryForm::Ask => Answer::Boolean(true),
			QueryForm::Construct => Answer::Graph(Vec::new()),
		})
	}

	async fn update(&self, statement: &str, cancel: &CancelToken) -> Result<u64> {
		self.record(SessionCall::Update(statement.to_string()))?;
		if cancel.is_cancelled() {
			return Err(Error::Cancelled);
		}
		Ok(statement.lines().filter(|line| !line.trim().is_empty()).count() as u64)
	}

	async fn set_auto_commit(&self, auto_commit: bool) -> Result<()> {
		self.record(SessionCall::SetAutoCommit(auto_commit))?;
		self.auto_commit.store(auto_commit, Ordering::SeqCst);
		Ok(())
	}

	async fn commit(&self) -> Result<()> {
		self.record(SessionCall::Commit)?;
		if self.fail_commit.load(Ordering::SeqCst) {
			return Err(Error::Query(format!("commit failed on session {}", self.id)));
		}
		Ok(())
	}

	async fn rollback(&self) -> Result<()> {
		self.record(SessionCall::Rollback)?;
		if self.fail_rollback.load(Ordering::SeqCst) {
			return Err(Error::Query(format!("rollback failed on session {}", self.id)));
		}
		Ok(())
	}

	async fn login(&self, security_domain: &Endpoint, credentials: &Credentials) -> Result<()> {
		self.record(SessionCall::Login(format!("{}@{}", credentials.user, security_domain)))
	}

	async fn ping(&self) -> Result<bool> {
		self.record(SessionCall::Ping)?;
		Ok(!self.fail_ping.load(Ordering::SeqCst))
	}

	fn is_local(&self) -> bool {
		self.local
	}

	async fn close(&self) -> Result<()> {
		self.record(SessionCall::Close)?;
		self.closed.store(true, Ordering::SeqCst);
		Ok(())
	}

	async fn create_graph(&self, graph: &str, _graph_type: Option<&str>) -> Result<()> {
		self.record(SessionCall::CreateGraph(graph.to_string()))?;
		let mut graphs = self.graphs.lock();
		if !graphs.iter().any(|g| g == graph) {
			graphs.push(graph.to_string());
		}
		Ok(())
	}

	async fn remove_graph(&self, graph: &str) -> Result<()> {
		self.record(SessionCall::RemoveGraph(graph.to_string()))?;
		self.graphs.lock().retain(|g| g != graph);
		Ok(())
	}

	async fn graph_exists(&self, graph: &str) -> Result<bool> {
		self.record(SessionCall::GraphExists(graph.to_string()))?;
		Ok(self.graphs.lock().iter().any(|g| g == graph))
	}
}

/// Session factory producing [`MemorySession`]s.
pub struct MemoryBackend {
	local: bool,
	unreachable: AtomicBool,
	created: AtomicUsize,
	security_domain: Option<Endpoint>,
	sessions: Mutex<Vec<Arc<MemorySession>>>,
}

impl MemoryBackend {
	pub fn remote() -> Self {
		Self::new(false)
	}

	pub fn local() -> Self {
		Self::new(true)
	}

	fn new(local: bool) -> Self {
		Self {
			local,
			unreachable: AtomicBool::new(false),
			created: AtomicUsize::new(0),
			security_domain: None,
			sessions: Mutex::new(Vec::new()),
		}
	}

	/// Reports `domain` as the security domain of every endpoint.
	///
	/// # Panics
	///
	/// Panics if `domain` is not a valid URI.
	pub fn with_security_domain(mut self, domain: &str) -> Self {
		self.security_domain = Some(Endpoint::parse(domain).expect("valid security domain"));
		self
	}

	pub fn set_unreachable(&self, unreachable: bool) {
		self.unreachable.store(unreachable, Ordering::SeqCst);
	}

	/// Number of sessions created so far.
	pub fn created(&self) -> usize {
		self.created.load(Ordering::SeqCst)
	}

	/// Every session created so far, oldest first.
	pub fn sessions(&self) -> Vec<Arc<MemorySession>> {
		self.sessions.lock().clone()
	}
}

#[async_trait]
impl SessionFactory for MemoryBackend {
	fn security_domain(&self, _endpoint: &Endpoint) -> Option<Endpoint> {
		self.security_domain.clone()
	}

	async fn new_session(&self, endpoint: &Endpoint) -> Result<Arc<dyn Session>> {
		if self.unreachable.load(Ordering::SeqCst) {
			return Err(Error::Unreachable(endpoint.to_string()));
		}
		let session = Arc::new(MemorySession::new(self.local));
		self.created.fetch_add(1, Ordering::SeqCst);
		self.sessions.lock().push(Arc::clone(&session));
		Ok(session as Arc<dyn Session>)
	}
}

/// Downcasts a session handle to the in-memory implementation.
///
/// # Panics
///
/// Panics if `session` is not a [`MemorySession`].
pub fn memory(session: &Arc<dyn Session>) -> Arc<MemorySession> {
	Arc::clone(session)
		.downcast_arc::<MemorySession>()
		.unwrap_or_else(|_| panic!("session is not a MemorySession"))
}
