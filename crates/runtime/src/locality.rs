//! Local-host aliasing for server endpoints.
//!
//! Distinct spellings of "this machine" (`localhost`, `127.0.0.1`, the host
//! name, ...) are folded onto one canonical host so they share a cache bucket
//! and a session pool.

use rdflink_protocol::Endpoint;
use tracing::info;

use crate::config::ConnectionConfig;

/// Scheme allow-list and local-host alias set.
#[derive(Debug, Clone)]
pub struct Locality {
	rpc_scheme: String,
	local_scheme: String,
	known_schemes: Vec<String>,
	aliases: Vec<String>,
	canonical_host: String,
}

impl Locality {
	pub fn from_config(config: &ConnectionConfig) -> Self {
		let mut aliases: Vec<String> = config.local_hosts.iter().map(|h| h.to_ascii_lowercase()).collect();
		let canonical = config.canonical_host.to_ascii_lowercase();
		if !aliases.contains(&canonical) {
			aliases.push(canonical);
		}
		Self {
			rpc_scheme: config.rpc_scheme.clone(),
			local_scheme: config.local_scheme.clone(),
			known_schemes: config.known_schemes.clone(),
			aliases,
			canonical_host: config.canonical_host.clone(),
		}
	}

	pub fn canonical_host(&self) -> &str {
		&self.canonical_host
	}

	/// True if `host` names this machine.
	pub fn is_local_host(&self, host: &str) -> bool {
		self.aliases.iter().any(|alias| alias.eq_ignore_ascii_case(host))
	}

	/// Rewrites RPC endpoints on a local-host alias to the canonical host.
	///
	/// Any other endpoint is returned unchanged.
	pub fn normalize(&self, endpoint: &Endpoint) -> Endpoint {
		if endpoint.scheme() != self.rpc_scheme {
			return endpoint.clone();
		}
		match endpoint.host() {
			Some(host) if self.is_local_host(host) => match endpoint.with_host(&self.canonical_host) {
				Ok(normalized) => normalized,
				Err(e) => {
					info!(target = "rdflink.factory", %endpoint, error = %e, "error normalizing server URI to local host");
					endpoint.clone()
				}
			},
			_ => endpoint.clone(),
		}
	}

	/// True for the no-network scheme, or for an allow-listed scheme whose
	/// host is a local-host alias.
	pub fn is_local_server(&self, endpoint: &Endpoint) -> bool {
		let scheme = endpoint.scheme();
		if scheme == self.local_scheme {
			return true;
		}
		if !self.known_schemes.iter().any(|known| known == scheme) {
			return false;
		}
		endpoint.host().is_some_and(|host| self.is_local_host(host))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn locality() -> Locality {
		let config = ConnectionConfig {
			local_hosts: vec!["localhost".into(), "127.0.0.1".into(), "::1".into(), "Workstation".into()],
			canonical_host: "workstation".into(),
			..ConnectionConfig::default()
		};
		Locality::from_config(&config)
	}

	fn endpoint(s: &str) -> Endpoint {
		Endpoint::parse(s).unwrap()
	}

	#[test]
	fn local_aliases_normalize_to_one_endpoint() {
		let locality = locality();
		let canonical = endpoint("rmi://workstation/server1");
		for alias in [
			"rmi://localhost/server1",
			"rmi://127.0.0.1/server1",
			"rmi://LOCALHOST/server1",
			"rmi://WorkStation/server1",
			"rmi://[::1]/server1",
		] {
			assert_eq!(locality.normalize(&endpoint(alias)), canonical, "alias {alias}");
		}
	}

	#[test]
	fn normalization_keeps_port_and_fragment() {
		let locality = locality();
		let normalized = locality.normalize(&endpoint("rmi://127.0.0.1:1099/server1#g"));
		assert_eq!(normalized.as_str(), "rmi://workstation:1099/server1#g");
	}

	#[test]
	fn remote_hosts_and_other_schemes_are_untouched() {
		let locality = locality();
		let remote = endpoint("rmi://db.example.org/server1");
		assert_eq!(locality.normalize(&remote), remote);
		let beep = endpoint("beep://localhost/server1");
		assert_eq!(locality.normalize(&beep), beep);
	}

	#[test]
	fn local_server_detection() {
		let locality = locality();
		assert!(locality.is_local_server(&endpoint("local://server1")));
		assert!(locality.is_local_server(&endpoint("rmi://localhost/server1")));
		assert!(locality.is_local_server(&endpoint("beep://127.0.0.1/server1")));
		assert!(!locality.is_local_server(&endpoint("rmi://db.example.org/server1")));
		assert!(!locality.is_local_server(&endpoint("http://localhost/server1")));
	}
}
