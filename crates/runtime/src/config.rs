//! Connection-layer configuration.
//!
//! Every field has a default, so an empty JSON object (or no file at all) is a
//! valid configuration.

use std::net::ToSocketAddrs;
use std::path::Path;
use std::time::Duration;

use serde::de::Error as _;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_RPC_SCHEME: &str = "rmi";
pub const DEFAULT_LOCAL_SCHEME: &str = "local";
pub const LOCALHOST_NAME: &str = "localhost";
pub const DEFAULT_SERVER: &str = "rmi://localhost/server1";

/// Configuration consumed by the connection factory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectionConfig {
	/// Remote-procedure scheme whose local-host aliases are normalized.
	pub rpc_scheme: String,
	/// No-network scheme; always local.
	pub local_scheme: String,
	/// Schemes whose host may name this machine.
	pub known_schemes: Vec<String>,
	/// Host names and addresses that refer to this machine.
	pub local_hosts: Vec<String>,
	/// Host every local alias is rewritten to.
	pub canonical_host: String,
	/// Server used by commands that name no endpoint.
	pub default_server: Option<String>,
	/// Run operations on non-local sessions through a proxy task.
	pub interruptible: bool,
	/// Periodic probing of idle cached sessions.
	pub reaper: Option<ReaperConfig>,
}

/// Schedule for the idle-session reaper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReaperConfig {
	pub interval_ms: u64,
	pub max_idle_ms: u64,
}

impl ReaperConfig {
	/// Period between reap passes, never shorter than one millisecond.
	pub fn interval(&self) -> Duration {
		Duration::from_millis(self.interval_ms.max(1))
	}

	pub fn max_idle(&self) -> Duration {
		Duration::from_millis(self.max_idle_ms)
	}
}

impl Default for ConnectionConfig {
	fn default() -> Self {
		let detected = detect_host_name();
		let mut local_hosts = vec![LOCALHOST_NAME.to_string(), "127.0.0.1".to_string(), "::1".to_string()];
		if let Some(name) = &detected {
			for alias in std::iter::once(name.clone()).chain(resolve_addresses(name)) {
				if !local_hosts.contains(&alias) {
					local_hosts.push(alias);
				}
			}
		}
		Self {
			rpc_scheme: DEFAULT_RPC_SCHEME.to_string(),
			local_scheme: DEFAULT_LOCAL_SCHEME.to_string(),
			known_schemes: vec![DEFAULT_RPC_SCHEME.to_string(), "beep".to_string(), DEFAULT_LOCAL_SCHEME.to_string()],
			local_hosts,
			canonical_host: detected.unwrap_or_else(|| LOCALHOST_NAME.to_string()),
			default_server: Some(DEFAULT_SERVER.to_string()),
			interruptible: false,
			reaper: None,
		}
	}
}

impl ConnectionConfig {
	/// Parses a configuration from JSON text.
	pub fn from_json(text: &str) -> Result<Self> {
		let config: Self = serde_json::from_str(text)?;
		config.validate()?;
		Ok(config)
	}

	/// Reads a JSON configuration file.
	pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
		let text = std::fs::read_to_string(path.as_ref())?;
		Self::from_json(&text)
	}

	pub fn with_interruptible(mut self, interruptible: bool) -> Self {
		self.interruptible = interruptible;
		self
	}

	pub fn with_default_server(mut self, server: Option<&str>) -> Self {
		self.default_server = server.map(str::to_string);
		self
	}

	pub fn with_reaper(mut self, reaper: Option<ReaperConfig>) -> Self {
		self.reaper = reaper;
		self
	}

	fn validate(&self) -> Result<()> {
		if matches!(self.reaper, Some(ReaperConfig { interval_ms: 0, .. })) {
			return Err(Error::Config(serde_json::Error::custom("reaper intervalMs must be greater than zero")));
		}
		Ok(())
	}
}

fn detect_host_name() -> Option<String> {
	whoami::fallible::hostname()
		.ok()
		.map(|name| name.trim().to_string())
		.filter(|name| !name.is_empty())
}

/// Addresses the host name resolves to; empty when resolution fails.
fn resolve_addresses(host: &str) -> Vec<String> {
	match (host, 0).to_socket_addrs() {
		Ok(addrs) => addrs.map(|addr| addr.ip().to_string()).collect(),
		Err(_) => Vec::new(),
	}
}
