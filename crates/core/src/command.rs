//! Command contract consumed from the parser layer, plus the built-in
//! commands the coordinator understands.
//!
//! A command names the server it targets (or none), runs against a
//! [`Connection`], and describes its result in a human-readable message.
//! Transaction-control commands additionally expose a [`TxControl`] so the
//! coordinator can broadcast them.

use std::fmt;

use async_trait::async_trait;
use rdflink_protocol::{Answer, Endpoint, Outcome, Query};
use rdflink_runtime::Connection;

use crate::error::Result;

#[async_trait]
pub trait Command: fmt::Debug + Send + Sync {
	/// Short name used in logs.
	fn name(&self) -> &'static str;

	/// Server this command runs against. `None` means the default server,
	/// unless the command is a local operation.
	fn server(&self) -> Option<&Endpoint> {
		None
	}

	/// Local operations never touch a server.
	fn is_local_operation(&self) -> bool {
		false
	}

	/// Commit, rollback or autocommit change carried by this command.
	fn tx_control(&self) -> Option<TxControl> {
		None
	}

	/// True if the client should stop issuing commands after this one.
	fn is_quit(&self) -> bool {
		false
	}

	async fn execute(&self, connection: &Connection) -> Result<Outcome>;

	/// Runs a local operation. Only called when [`is_local_operation`](Self::is_local_operation) is true.
	async fn execute_local(&self) -> Result<Outcome> {
		Ok(Outcome::Message(String::new()))
	}

	/// Message describing a successful `outcome`.
	fn result_message(&self, outcome: &Outcome) -> String;
}

/// Transaction-control operation, applied to every enlisted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxControl {
	SetAutoCommit(bool),
	Commit,
	Rollback,
}

impl TxControl {
	/// Whether the coordinator remains in a transaction after this operation.
	pub fn stay_in_tx(self) -> bool {
		match self {
			TxControl::SetAutoCommit(on) => !on,
			TxControl::Commit | TxControl::Rollback => false,
		}
	}

	/// Ends a transaction, as opposed to switching autocommit.
	pub fn is_commit_or_rollback(self) -> bool {
		matches!(self, TxControl::Commit | TxControl::Rollback)
	}

	/// Applies the operation to one connection.
	///
	/// Commit and rollback return the connection to autocommit afterwards.
	pub async fn apply(self, connection: &Connection) -> rdflink_runtime::Result<()> {
		match self {
			TxControl::SetAutoCommit(on) => connection.set_auto_commit(on).await,
			TxControl::Commit => {
				connection
					.execute(|session, _| async move { session.commit().await })
					.await?;
				connection.set_auto_commit(true).await
			}
			TxControl::Rollback => {
				connection
					.execute(|session, _| async move { session.rollback().await })
					.await?;
				connection.set_auto_commit(true).await
			}
		}
	}

	pub fn success_message(self) -> &'static str {
		match self {
			TxControl::SetAutoCommit(true) => "Auto commit is on",
			TxControl::SetAutoCommit(false) => "Auto commit is off",
			TxControl::Commit => "Successfully committed transaction",
			TxControl::Rollback => "Successfully rolled back changes",
		}
	}

	pub fn failure_message(self) -> &'static str {
		match self {
			TxControl::SetAutoCommit(true) => "Could not set auto commit on",
			TxControl::SetAutoCommit(false) => "Could not set auto commit off",
			TxControl::Commit => "Could not commit transaction",
			TxControl::Rollback => "Could not roll back transaction",
		}
	}
}

impl fmt::Display for TxControl {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			TxControl::SetAutoCommit(on) => write!(f, "set autocommit {}", if *on { "on" } else { "off" }),
			TxControl::Commit => f.write_str("commit"),
			TxControl::Rollback => f.write_str("rollback"),
		}
	}
}

/// Runs a query and yields its answer.
#[derive(Debug, Clone)]
pub struct QueryCommand {
	pub server: Option<Endpoint>,
	pub query: Query,
}

impl QueryCommand {
	pub fn new(server: Option<Endpoint>, query: Query) -> Self {
		Self { server, query }
	}
}

#[async_trait]
impl Command for QueryCommand {
	fn name(&self) -> &'static str {
		"query"
	}

	fn server(&self) -> Option<&Endpoint> {
		self.server.as_ref()
	}

	async fn execute(&self, connection: &Connection) -> Result<Outcome> {
		let query = self.query.clone();
		let answer = connection
			.execute(move |session, cancel| async move { session.query(&query, &cancel).await })
			.await?;
		Ok(Outcome::Answer(answer))
	}

	fn result_message(&self, outcome: &Outcome) -> String {
		match outcome.as_answer() {
			Some(Answer::Tuples(tuples)) => format!("Query returned {} rows", tuples.len()),
			Some(Answer::Boolean(value)) => format!("Query returned {value}"),
			Some(Answer::Graph(triples)) => format!("Query returned {} statements", triples.len()),
			None => "Successfully executed query".to_string(),
		}
	}
}

/// Runs an update statement (insert, delete, load) and yields its count.
#[derive(Debug, Clone)]
pub struct UpdateCommand {
	pub server: Option<Endpoint>,
	pub statement: String,
}

impl UpdateCommand {
	pub fn new(server: Option<Endpoint>, statement: impl Into<String>) -> Self {
		Self {
			server,
			statement: statement.into(),
		}
	}
}

#[async_trait]
impl Command for UpdateCommand {
	fn name(&self) -> &'static str {
		"update"
	}

	fn server(&self) -> Option<&Endpoint> {
		self.server.as_ref()
	}

	async fn execute(&self, connection: &Connection) -> Result<Outcome> {
		let statement = self.statement.clone();
		let count = connection
			.execute(move |session, cancel| async move { session.update(&statement, &cancel).await })
			.await?;
		Ok(Outcome::Count(count))
	}

	fn result_message(&self, outcome: &Outcome) -> String {
		format!("Successfully updated {} statements", outcome.as_count().unwrap_or(0))
	}
}

/// Creates a graph, optionally of a backend-specific type.
#[derive(Debug, Clone)]
pub struct CreateGraph {
	pub server: Option<Endpoint>,
	pub graph: String,
	pub graph_type: Option<String>,
}

#[async_trait]
impl Command for CreateGraph {
	fn name(&self) -> &'static str {
		"create-graph"
	}

	fn server(&self) -> Option<&Endpoint> {
		self.server.as_ref()
	}

	async fn execute(&self, connection: &Connection) -> Result<Outcome> {
		let graph = self.graph.clone();
		let graph_type = self.graph_type.clone();
		connection
			.execute(move |session, _| async move { session.create_graph(&graph, graph_type.as_deref()).await })
			.await?;
		Ok(Outcome::Message(format!("Successfully created graph {}", self.graph)))
	}

	fn result_message(&self, outcome: &Outcome) -> String {
		outcome.as_message().unwrap_or_default().to_string()
	}
}

/// Removes a graph and its statements.
#[derive(Debug, Clone)]
pub struct DropGraph {
	pub server: Option<Endpoint>,
	pub graph: String,
}

#[async_trait]
impl Command for DropGraph {
	fn name(&self) -> &'static str {
		"drop-graph"
	}

	fn server(&self) -> Option<&Endpoint> {
		self.server.as_ref()
	}

	async fn execute(&self, connection: &Connection) -> Result<Outcome> {
		let graph = self.graph.clone();
		connection
			.execute(move |session, _| async move { session.remove_graph(&graph).await })
			.await?;
		Ok(Outcome::Message(format!("Successfully dropped graph {}", self.graph)))
	}

	fn result_message(&self, outcome: &Outcome) -> String {
		outcome.as_message().unwrap_or_default().to_string()
	}
}

/// Asks whether a graph exists; answers with a boolean.
#[derive(Debug, Clone)]
pub struct GraphExists {
	pub server: Option<Endpoint>,
	pub graph: String,
}

#[async_trait]
impl Command for GraphExists {
	fn name(&self) -> &'static str {
		"graph-exists"
	}

	fn server(&self) -> Option<&Endpoint> {
		self.server.as_ref()
	}

	async fn execute(&self, connection: &Connection) -> Result<Outcome> {
		let graph = self.graph.clone();
		let exists = connection
			.execute(move |session, _| async move { session.graph_exists(&graph).await })
			.await?;
		Ok(Outcome::Answer(Answer::Boolean(exists)))
	}

	fn result_message(&self, outcome: &Outcome) -> String {
		match outcome.as_answer() {
			Some(Answer::Boolean(true)) => format!("Graph {} exists", self.graph),
			_ => format!("Graph {} does not exist", self.graph),
		}
	}
}

/// Switches autocommit; turning it off opens a transaction.
#[derive(Debug, Clone)]
pub struct SetAutoCommit {
	pub server: Option<Endpoint>,
	pub on: bool,
}

impl SetAutoCommit {
	pub fn new(on: bool) -> Self {
		Self { server: None, on }
	}
}

/// Commits the open transaction on every enlisted connection.
#[derive(Debug, Clone, Default)]
pub struct Commit {
	pub server: Option<Endpoint>,
}

/// Rolls back the open transaction on every enlisted connection.
#[derive(Debug, Clone, Default)]
pub struct Rollback {
	pub server: Option<Endpoint>,
}

macro_rules! tx_command {
	($ty:ty, $name:literal, |$cmd:ident| $control:expr) => {
		#[async_trait]
		impl Command for $ty {
			fn name(&self) -> &'static str {
				$name
			}

			fn server(&self) -> Option<&Endpoint> {
				self.server.as_ref()
			}

			fn tx_control(&self) -> Option<TxControl> {
				let $cmd = self;
				Some($control)
			}

			async fn execute(&self, connection: &Connection) -> Result<Outcome> {
				let control = TxControl::from(self);
				control.apply(connection).await?;
				Ok(Outcome::Message(control.success_message().to_string()))
			}

			fn result_message(&self, _outcome: &Outcome) -> String {
				TxControl::from(self).success_message().to_string()
			}
		}

		impl From<&$ty> for TxControl {
			fn from($cmd: &$ty) -> Self {
				$control
			}
		}
	};
}

tx_command!(SetAutoCommit, "set-autocommit", |cmd| TxControl::SetAutoCommit(cmd.on));
tx_command!(Commit, "commit", |_cmd| TxControl::Commit);
tx_command!(Rollback, "rollback", |_cmd| TxControl::Rollback);

/// Asks the client to stop. Runs locally.
#[derive(Debug, Clone, Copy, Default)]
pub struct Quit;

#[async_trait]
impl Command for Quit {
	fn name(&self) -> &'static str {
		"quit"
	}

	fn is_local_operation(&self) -> bool {
		true
	}

	fn is_quit(&self) -> bool {
		true
	}

	async fn execute(&self, _connection: &Connection) -> Result<Outcome> {
		self.execute_local().await
	}

	async fn execute_local(&self) -> Result<Outcome> {
		Ok(Outcome::Message("Quitting".to_string()))
	}

	fn result_message(&self, outcome: &Outcome) -> String {
		outcome.as_message().unwrap_or_default().to_string()
	}
}
