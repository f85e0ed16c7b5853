use serde::{Deserialize, Serialize};

pub const NOT_STARTED: &str = "not started";
pub const RUNNING: &str = "running";
pub const STOPPED: &str = "stopped";
pub const CRASHED: &str = "crashed";

/// Sentinel returned for store keys that have no value.
pub const NOT_FOUND: &str = "(not found)";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnitConfig {
	pub name: String,
	#[serde(rename = "numSlots")]
	pub num_slots: usize,
	pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnitReport {
	pub name: String,
	#[serde(default)]
	pub groups: Vec<String>,
	pub status: String,
}

impl UnitReport {
	pub fn is_running(&self) -> bool {
		self.status == RUNNING
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn unit_config_uses_camel_case_slot_count() {
		let cfg = UnitConfig {
			name: "db".into(),
			num_slots: 2,
			description: "database".into(),
		};
		let json = serde_json::to_string(&cfg).unwrap();
		assert_eq!(json, r#"{"name":"db","numSlots":2,"description":"database"}"#);
	}

	#[test]
	fn report_running() {
		let r = UnitReport {
			name: "app".into(),
			groups: vec![],
			status: RUNNING.into(),
		};
		assert!(r.is_running());
		let r = UnitReport { status: CRASHED.into(), ..r };
		assert!(!r.is_running());
	}
}
