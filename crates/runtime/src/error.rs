//! Error types for the connection runtime.

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while obtaining or using a connection.
#[derive(Debug, Error)]
pub enum Error {
	/// The connection was already closed or disposed.
	#[error("Attempt to access a closed connection")]
	Closed,

	/// No session could be created for an endpoint.
	#[error("Unable to connect to {endpoint}: {source}")]
	Connectivity {
		endpoint: String,
		#[source]
		source: Box<Error>,
	},

	/// No session backend is registered for the endpoint's scheme.
	#[error("{endpoint} has unsupported scheme ({scheme})")]
	UnsupportedScheme { endpoint: String, scheme: String },

	/// The backend could not reach the server.
	#[error("Cannot find server {0}")]
	Unreachable(String),

	/// A command without an endpoint was issued and no default server is configured.
	#[error("No default server configured")]
	NoDefaultServer,

	/// Credentials were supplied but no security domain is known for the session.
	#[error("Must have a security domain to use credentials")]
	NoSecurityDomain,

	/// The backend rejected or failed a session operation.
	#[error("Query error: {0}")]
	Query(String),

	/// The operation observed a cancellation request.
	#[error("Operation cancelled")]
	Cancelled,

	/// The session was used after it had been closed.
	#[error("Session is closed")]
	SessionClosed,

	/// A proxied operation finished without delivering any result.
	#[error("Unexpected fault in proxy task: {0}")]
	ProxyFault(String),

	/// Endpoint text could not be parsed.
	#[error("Invalid endpoint: {0}")]
	InvalidEndpoint(#[from] url::ParseError),

	/// Configuration could not be decoded.
	#[error("Invalid configuration: {0}")]
	Config(#[from] serde_json::Error),

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}

impl Error {
	/// Wraps a session-creation failure with the endpoint it was for.
	pub fn connectivity(endpoint: impl ToString, source: Error) -> Self {
		Error::Connectivity {
			endpoint: endpoint.to_string(),
			source: Box::new(source),
		}
	}

	/// Returns true if this error, or the error it wraps, is a cancellation.
	pub fn is_cancelled(&self) -> bool {
		match self {
			Error::Cancelled => true,
			Error::Connectivity { source, .. } => source.is_cancelled(),
			_ => false,
		}
	}

	/// Returns true if this is a use-after-close error on a connection or session.
	pub fn is_closed(&self) -> bool {
		matches!(self, Error::Closed | Error::SessionClosed)
	}

	/// Returns true if the server could not be reached.
	pub fn is_unreachable(&self) -> bool {
		match self {
			Error::Unreachable(_) => true,
			Error::Connectivity { source, .. } => source.is_unreachable(),
			_ => false,
		}
	}
}
