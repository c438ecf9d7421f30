//! Best-effort transactions across every server a command stream touches.
//!
//! The coordinator keeps one connection per normalized endpoint. While a
//! transaction is open, each connection it touches is switched to manual
//! commit and enlisted; commit, rollback and autocommit changes are then
//! broadcast to every enlisted connection. There is no two-phase commit: a
//! broadcast that fails part-way leaves the servers that succeeded committed.

use std::collections::HashMap;
use std::sync::Arc;

use rdflink_protocol::{Answer, Endpoint, Outcome};
use rdflink_runtime::{Connection, ConnectionFactory, Session};
use tracing::{debug, error, info, warn};

use crate::command::{Command, Commit, Rollback, TxControl};
use crate::error::{Error, Result};

/// Drives a stream of commands and the transaction that spans them.
///
/// Not reentrant: one caller at a time. Everything beneath it (factory,
/// cache, connections) may be shared between coordinators.
///
/// When a transaction ends, a connection that cannot be switched back to
/// autocommit is disposed and its session closed, so a pooled session is
/// never handed to the next caller still in manual commit. The cost is a
/// fresh session for that server on its next use; a caller-owned
/// connection is closed instead and stays with its owner.
pub struct TxCoordinator {
	factory: Arc<ConnectionFactory>,
	connections: HashMap<Endpoint, Connection>,
	/// Enlisted endpoints, in enlistment order.
	enlisted: Vec<Endpoint>,
	in_transaction: bool,
	last_message: Option<String>,
	last_answer: Option<Answer>,
	last_error: Option<Error>,
}

impl TxCoordinator {
	pub fn new(factory: Arc<ConnectionFactory>) -> Self {
		Self {
			factory,
			connections: HashMap::new(),
			enlisted: Vec::new(),
			in_transaction: false,
			last_message: None,
			last_answer: None,
			last_error: None,
		}
	}

	pub fn factory(&self) -> &Arc<ConnectionFactory> {
		&self.factory
	}

	/// Runs one command and records its message, answer or error.
	///
	/// Returns `false` if the command asks the client to quit.
	pub async fn execute_command(&mut self, command: &dyn Command) -> bool {
		self.reset_state();
		debug!(target = "rdflink.tx", command = command.name(), "executing command");

		match self.run(command).await {
			Ok(outcome) => {
				self.last_message = Some(command.result_message(&outcome));
				if let Outcome::Answer(answer) = outcome {
					self.last_answer = Some(answer);
				}
			}
			Err(e) => {
				debug!(target = "rdflink.tx", command = command.name(), error = %e, "command failed");
				self.last_message = Some(format!("Error: {e}"));
				self.last_error = Some(e);
			}
		}

		!(command.is_local_operation() && command.is_quit())
	}

	/// Returns the connection for `server`, or for the default server if `None`.
	///
	/// Connections are cached per normalized endpoint. While a transaction is
	/// open, a connection still on autocommit is switched to manual commit and
	/// enlisted.
	pub async fn establish_connection(&mut self, server: Option<&Endpoint>) -> Result<&Connection> {
		let endpoint = self.resolve(server)?;
		self.connect(&endpoint).await?;
		self.connections
			.get(&endpoint)
			.ok_or_else(|| Error::Runtime(rdflink_runtime::Error::Closed))
	}

	/// Commits every enlisted connection and leaves the transaction.
	pub async fn commit_all(&mut self) -> Result<()> {
		self.broadcast(TxControl::Commit).await
	}

	/// Rolls back every enlisted connection and leaves the transaction.
	pub async fn rollback_all(&mut self) -> Result<()> {
		self.broadcast(TxControl::Rollback).await
	}

	/// Routes commands for `server` through a caller-owned session.
	///
	/// The session bypasses the factory's cache; closing the coordinator
	/// leaves it open.
	pub async fn pre_seed_session(&mut self, server: &Endpoint, session: Arc<dyn Session>) {
		let endpoint = self.factory.normalize_local_uri(server);
		let connection = self.factory.connection_for_session(session);
		debug!(target = "rdflink.tx", %endpoint, "seeding caller-owned session");
		if let Some(previous) = self.connections.insert(endpoint.clone(), connection) {
			if self.enlisted.contains(&endpoint) {
				warn!(target = "rdflink.tx", %endpoint, "replacing an enlisted connection; its transaction is abandoned");
				self.enlisted.retain(|e| e != &endpoint);
			}
			Self::release(&endpoint, previous).await;
		}
	}

	/// Ends any open transaction by switching autocommit back on, then
	/// releases every cached connection to the factory.
	pub async fn close(&mut self) {
		if self.in_transaction {
			info!(target = "rdflink.tx", "closing a current transaction, rolling back");
			if let Err(e) = self.broadcast(TxControl::SetAutoCommit(true)).await {
				error!(target = "rdflink.tx", error = %e, "error while cleaning up a transaction");
			}
		}
		for (endpoint, connection) in self.connections.drain() {
			Self::release(&endpoint, connection).await;
		}
		self.enlisted.clear();
		self.in_transaction = false;
	}

	pub fn in_transaction(&self) -> bool {
		self.in_transaction
	}

	pub fn enlisted_endpoints(&self) -> &[Endpoint] {
		&self.enlisted
	}

	/// Connection cached for `server`, without creating one.
	pub fn connection(&self, server: &Endpoint) -> Option<&Connection> {
		self.connections.get(&self.factory.normalize_local_uri(server))
	}

	pub fn last_message(&self) -> Option<&str> {
		self.last_message.as_deref()
	}

	pub fn last_answer(&self) -> Option<&Answer> {
		self.last_answer.as_ref()
	}

	pub fn last_error(&self) -> Option<&Error> {
		self.last_error.as_ref()
	}

	pub fn take_last_error(&mut self) -> Option<Error> {
		self.last_error.take()
	}

	pub fn clear_last_error(&mut self) {
		self.last_error = None;
	}

	fn reset_state(&mut self) {
		self.last_message = None;
		self.last_answer = None;
		self.last_error = None;
	}

	async fn run(&mut self, command: &dyn Command) -> Result<Outcome> {
		if command.is_local_operation() {
			return command.execute_local().await;
		}

		let endpoint = self.resolve(command.server())?;
		self.connect(&endpoint).await?;
		let enlisted = self.enlisted.contains(&endpoint);
		let control = command.tx_control();

		// Commit and rollback on an enlisted connection are covered by the broadcast.
		let result = match control {
			Some(control) if enlisted && control.is_commit_or_rollback() => {
				Ok(Outcome::Message(control.success_message().to_string()))
			}
			_ => command.execute(self.cached(&endpoint)?).await,
		};
		let outcome = match result {
			Ok(outcome) => outcome,
			Err(e) => {
				if !enlisted && e.runtime().is_closed() {
					self.evict(&endpoint).await;
				}
				return Err(e);
			}
		};

		let auto_commit = self.cached(&endpoint)?.auto_commit()?;
		match control {
			Some(control) => self.reconcile(&endpoint, control).await?,
			// A command switched autocommit without declaring it.
			None if self.in_transaction == auto_commit => {
				self.reconcile(&endpoint, TxControl::SetAutoCommit(auto_commit)).await?
			}
			None => {}
		}
		Ok(outcome)
	}

	/// Updates transaction state after `control` ran on the connection for `endpoint`.
	async fn reconcile(&mut self, endpoint: &Endpoint, control: TxControl) -> Result<()> {
		if !self.in_transaction && control == TxControl::SetAutoCommit(false) && !self.enlisted.contains(endpoint) {
			debug!(target = "rdflink.tx", %endpoint, "transaction opened");
			self.enlisted.push(endpoint.clone());
		}
		self.broadcast(control).await
	}

	/// Applies `control` to every enlisted connection, continuing past failures.
	///
	/// The first failure is returned once all connections have been tried.
	async fn broadcast(&mut self, control: TxControl) -> Result<()> {
		let mut first: Option<(rdflink_runtime::Error, &'static str)> = None;

		for endpoint in &self.enlisted {
			let Some(connection) = self.connections.get(endpoint) else {
				continue;
			};
			debug!(target = "rdflink.tx", %endpoint, %control, "broadcasting");
			if let Err(e) = control.apply(connection).await {
				if first.is_some() {
					error!(target = "rdflink.tx", %endpoint, %control, error = %e, "discarding subsequent exception during operation");
				} else {
					first = Some((e, control.failure_message()));
				}
			}
		}

		self.in_transaction = control.stay_in_tx();
		if !self.in_transaction {
			let enlisted = std::mem::take(&mut self.enlisted);
			if !enlisted.is_empty() {
				debug!(target = "rdflink.tx", %control, count = enlisted.len(), "transaction closed");
			}
			// A connection that failed to leave manual commit would silently
			// reopen a transaction on its next command.
			for endpoint in enlisted {
				let stuck = self
					.connections
					.get(&endpoint)
					.is_some_and(|connection| !connection.auto_commit().unwrap_or(false));
				if stuck {
					warn!(target = "rdflink.tx", %endpoint, "connection still in manual commit after {control}");
					self.evict(&endpoint).await;
				}
			}
		}

		match first {
			Some((source, message)) => Err(Error::PartialTransaction {
				message: message.to_string(),
				source,
			}),
			None => Ok(()),
		}
	}

	fn resolve(&self, server: Option<&Endpoint>) -> Result<Endpoint> {
		let endpoint = match server {
			Some(server) => server.clone(),
			None => self.factory.default_server()?,
		};
		Ok(self.factory.normalize_local_uri(&endpoint))
	}

	/// Ensures a connection is cached for `endpoint` and enlisted if a
	/// transaction is open.
	async fn connect(&mut self, endpoint: &Endpoint) -> Result<()> {
		if !self.connections.contains_key(endpoint) {
			let connection = self.factory.new_connection(Some(endpoint)).await?;
			self.connections.insert(endpoint.clone(), connection);
		}

		if self.in_transaction && !self.enlisted.contains(endpoint) {
			let connection = self.cached(endpoint)?;
			if connection.auto_commit()? {
				connection.set_auto_commit(false).await?;
				debug!(target = "rdflink.tx", %endpoint, "enlisted connection in transaction");
				self.enlisted.push(endpoint.clone());
			}
		}
		Ok(())
	}

	fn cached(&self, endpoint: &Endpoint) -> Result<&Connection> {
		self.connections
			.get(endpoint)
			.ok_or(Error::Runtime(rdflink_runtime::Error::Closed))
	}

	/// Drops a connection and closes its session.
	async fn evict(&mut self, endpoint: &Endpoint) {
		if let Some(connection) = self.connections.remove(endpoint) {
			info!(target = "rdflink.tx", %endpoint, "discarding connection");
			// Caller-owned sessions are left for their owner to close.
			let result = match connection.endpoint() {
				Some(_) => connection.dispose().await,
				None => connection.close().await,
			};
			if let Err(e) = result {
				debug!(target = "rdflink.tx", %endpoint, error = %e, "error disposing connection");
			}
		}
	}

	async fn release(endpoint: &Endpoint, connection: Connection) {
		if let Err(e) = connection.close().await {
			warn!(target = "rdflink.tx", %endpoint, error = %e, "error releasing connection");
		}
	}
}

/// Convenience wrappers mirroring the built-in commands.
impl TxCoordinator {
	pub async fn commit(&mut self) -> bool {
		self.execute_command(&Commit::default()).await
	}

	pub async fn rollback(&mut self) -> bool {
		self.execute_command(&Rollback::default()).await
	}
}
