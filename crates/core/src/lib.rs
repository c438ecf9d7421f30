//! rdflink - connection management and best-effort multi-server transactions
//! for RDF store clients.
//!
//! Commands produced by a query-language front end are handed to a
//! [`TxCoordinator`], which obtains one pooled [`Connection`] per server they
//! touch and fans commit/rollback out to every server enlisted in the open
//! transaction.
//!
//! ```text
//! caller ─► TxCoordinator::execute_command ─► ConnectionFactory::new_connection
//!                                                   │ cache hit / new session
//!           Command::execute(&Connection) ◄─────────┘
//! ```

pub mod command;
pub mod coordinator;
pub mod error;

pub use command::{
	Command, Commit, CreateGraph, DropGraph, GraphExists, QueryCommand, Quit, Rollback, SetAutoCommit, TxControl,
	UpdateCommand,
};
pub use coordinator::TxCoordinator;
pub use error::{Error, Result};
pub use rdflink_protocol::{Answer, Credentials, Endpoint, Outcome, Query, QueryForm, Triple, Tuples};
pub use rdflink_runtime::{
	CancelToken, Connection, ConnectionConfig, ConnectionFactory, ReaperConfig, Session, SessionFactory,
	SessionFactoryFinder,
};
