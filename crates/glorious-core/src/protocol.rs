use crate::types::{UnitConfig, UnitReport};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// First four bytes of a connection that wants to speak RPC.
pub const RPC_COOKIE: [u8; 4] = *b"GLR1";
/// First four bytes of a connection that wants to stream unit output.
pub const TAIL_COOKIE: [u8; 4] = *b"GLT1";
/// Tail tokens are hyphenated UUIDs.
pub const TAIL_TOKEN_LEN: usize = 36;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 4000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "method", content = "params")]
pub enum Request {
	Greet { names: Vec<String> },
	Config,
	Status,
	Reload,
	StartUnit { name: String },
	StopUnit { name: String },
	RestartUnit { name: String },
	StorePutValue { key: String, value: String },
	StoreGetValues { keys: Vec<String> },
	TailProcesses { names: Vec<String> },
}

impl Request {
	pub fn method(&self) -> &'static str {
		match self {
			Request::Greet { .. } => "Greet",
			Request::Config => "Config",
			Request::Status => "Status",
			Request::Reload => "Reload",
			Request::StartUnit { .. } => "StartUnit",
			Request::StopUnit { .. } => "StopUnit",
			Request::RestartUnit { .. } => "RestartUnit",
			Request::StorePutValue { .. } => "StorePutValue",
			Request::StoreGetValues { .. } => "StoreGetValues",
			Request::TailProcesses { .. } => "TailProcesses",
		}
	}
}

/// Replies never use transport-level faults: failures travel as strings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
	Greeting { message: String },
	Config { units: Vec<UnitConfig> },
	Status { units: Vec<UnitReport> },
	Done { error: Option<String> },
	Values { values: BTreeMap<String, String> },
	TailToken { token: Option<String>, error: Option<String> },
	Error { message: String },
}

impl Response {
	pub fn done(result: Result<(), String>) -> Self {
		Response::Done { error: result.err() }
	}
}
