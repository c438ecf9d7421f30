//! Server endpoint identity.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

/// Identity of a backend store server, e.g. `rmi://localhost/server1`.
///
/// Equality is exact over the parsed URI. Two spellings of the same machine
/// only compare equal after local-host normalization in the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Endpoint(Url);

impl Endpoint {
	/// Parses an endpoint from its URI form.
	pub fn parse(input: &str) -> Result<Self, url::ParseError> {
		Url::parse(input).map(Self)
	}

	pub fn from_url(url: Url) -> Self {
		Self(url)
	}

	pub fn as_url(&self) -> &Url {
		&self.0
	}

	pub fn as_str(&self) -> &str {
		self.0.as_str()
	}

	pub fn scheme(&self) -> &str {
		self.0.scheme()
	}

	/// Host component without IPv6 brackets.
	pub fn host(&self) -> Option<&str> {
		self.0
			.host_str()
			.map(|h| h.strip_prefix('[').and_then(|h| h.strip_suffix(']')).unwrap_or(h))
	}

	pub fn port(&self) -> Option<u16> {
		self.0.port()
	}

	pub fn path(&self) -> &str {
		self.0.path()
	}

	/// Returns a copy of this endpoint with the host replaced.
	///
	/// Scheme, port, path, query and fragment are preserved.
	pub fn with_host(&self, host: &str) -> Result<Self, url::ParseError> {
		let mut url = self.0.clone();
		url.set_host(Some(host))?;
		Ok(Self(url))
	}
}

impl fmt::Display for Endpoint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.0.as_str())
	}
}

impl FromStr for Endpoint {
	type Err = url::ParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse(s)
	}
}

impl From<Url> for Endpoint {
	fn from(url: Url) -> Self {
		Self(url)
	}
}
