use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
	#[error(transparent)]
	Runtime(#[from] rdflink_runtime::Error),

	/// At least one enlisted connection failed a broadcast commit, rollback or
	/// autocommit change. Carries the first failure only; later ones are logged.
	#[error("{message}: {source}")]
	PartialTransaction {
		message: String,
		#[source]
		source: rdflink_runtime::Error,
	},
}

impl Error {
	/// The underlying connection-layer error.
	pub fn runtime(&self) -> &rdflink_runtime::Error {
		match self {
			Error::Runtime(e) => e,
			Error::PartialTransaction { source, .. } => source,
		}
	}
}
