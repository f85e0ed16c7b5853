use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;

use glorious_core::protocol::{DEFAULT_HOST, DEFAULT_PORT};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::provider::ProviderSpec;

pub const DEFAULT_CONFIG_FILE: &str = "glorious.toml";

/// Resolver `type` marking the fallback slot.
pub const RESOLVER_DEFAULT: &str = "default";
/// Resolver `type` activating a slot when a store key holds a given value.
pub const RESOLVER_KEYWORD_VALUE: &str = "keyword/value";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Document {
	#[serde(default)]
	pub daemon: DaemonSettings,
	#[serde(rename = "unit", default)]
	pub units: Vec<UnitDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DaemonSettings {
	#[serde(default = "default_host")]
	pub host: String,
	#[serde(default = "default_port")]
	pub port: u16,
}

impl Default for DaemonSettings {
	fn default() -> Self {
		Self {
			host: default_host(),
			port: default_port(),
		}
	}
}

fn default_host() -> String {
	DEFAULT_HOST.to_string()
}
fn default_port() -> u16 {
	DEFAULT_PORT
}

impl DaemonSettings {
	pub fn addr(&self) -> Result<SocketAddr, ConfigError> {
		let addr = format!("{}:{}", self.host, self.port);
		addr.parse().map_err(|_| ConfigError::Address(addr))
	}
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct UnitDef {
	pub name: String,
	#[serde(default)]
	pub description: String,
	#[serde(default)]
	pub groups: Vec<String>,
	#[serde(default)]
	pub depends_on: Vec<String>,
	#[serde(rename = "slot", default)]
	pub slots: Vec<SlotDef>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SlotDef {
	pub name: String,
	#[serde(default)]
	pub provider: ProviderSpec,
	#[serde(default)]
	pub resolver: BTreeMap<String, String>,
}

impl Document {
	pub fn parse(contents: &str) -> Result<Self, ConfigError> {
		Ok(toml::from_str(contents)?)
	}

	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
			path: path.to_path_buf(),
			source,
		})?;
		Self::parse(&contents)
	}
}
