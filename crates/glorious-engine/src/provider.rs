use std::collections::BTreeMap;
use std::fmt;

use regex::Regex;
use serde::Deserialize;

use crate::error::ProviderError;

pub const BASH_LOCAL: &str = "bash/local";
pub const BASH_REMOTE: &str = "bash/remote";
pub const DOCKER_LOCAL: &str = "docker/local";
pub const DOCKER_REMOTE: &str = "docker/remote";

pub const RSYNC_REMOTE: &str = "rsync/remote";
pub const EXECUTE_REMOTE: &str = "execute/remote";

/// Key in `extra` naming the registry auth provider used for pulls.
pub const AUTH_PROVIDER: &str = "authProvider";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
	BashLocal,
	BashRemote,
	DockerLocal,
	DockerRemote,
}

impl ProviderKind {
	pub fn parse(kind: &str) -> Option<Self> {
		match kind {
			BASH_LOCAL => Some(ProviderKind::BashLocal),
			BASH_REMOTE => Some(ProviderKind::BashRemote),
			DOCKER_LOCAL => Some(ProviderKind::DockerLocal),
			DOCKER_REMOTE => Some(ProviderKind::DockerRemote),
			_ => None,
		}
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			ProviderKind::BashLocal => BASH_LOCAL,
			ProviderKind::BashRemote => BASH_REMOTE,
			ProviderKind::DockerLocal => DOCKER_LOCAL,
			ProviderKind::DockerRemote => DOCKER_REMOTE,
		}
	}

	pub fn is_docker(&self) -> bool {
		matches!(self, ProviderKind::DockerLocal | ProviderKind::DockerRemote)
	}
}

impl fmt::Display for ProviderKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteInfo {
	#[serde(default)]
	pub host: String,
	#[serde(default)]
	pub user: String,
	#[serde(default)]
	pub identity_file: String,
	#[serde(default)]
	pub working_dir: String,
}

impl RemoteInfo {
	pub fn destination(&self) -> String {
		format!("{}@{}", self.user, self.host)
	}
}

/// File-watch rule of a remote bash slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct HandlerInfo {
	#[serde(rename = "type", default)]
	pub kind: String,
	#[serde(rename = "match", default)]
	pub matches: String,
	#[serde(default)]
	pub exclude: String,
	#[serde(default)]
	pub cmd: String,
}

impl HandlerInfo {
	/// The configured regex and whether a hit selects (`match`) or rejects
	/// (`exclude`) the path. `match` wins when both are set.
	pub fn pattern(&self) -> Option<(&str, bool)> {
		if !self.matches.is_empty() {
			Some((&self.matches, true))
		} else if !self.exclude.is_empty() {
			Some((&self.exclude, false))
		} else {
			None
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSpec {
	#[serde(rename = "type", default)]
	pub kind: String,
	#[serde(default)]
	pub working_dir: String,
	#[serde(default)]
	pub cmd: String,
	#[serde(default)]
	pub image: String,
	#[serde(default)]
	pub ports: Vec<String>,
	#[serde(default)]
	pub volumes: Vec<String>,
	#[serde(default)]
	pub environment: Vec<String>,
	#[serde(default)]
	pub remote: RemoteInfo,
	#[serde(rename = "handler", default)]
	pub handlers: Vec<HandlerInfo>,
	#[serde(default)]
	pub extra: BTreeMap<String, String>,
}

impl ProviderSpec {
	pub fn kind(&self) -> Option<ProviderKind> {
		ProviderKind::parse(&self.kind)
	}

	pub fn auth_provider(&self) -> Option<&str> {
		self.extra.get(AUTH_PROVIDER).map(String::as_str)
	}

	/// All problems with this definition; empty when it is valid.
	pub fn validate(&self) -> Vec<ProviderError> {
		let mut errs = Vec::new();
		match self.kind() {
			Some(ProviderKind::BashRemote) => {
				if self.remote.host.is_empty() || self.remote.user.is_empty() {
					errs.push(ProviderError::BashRemoteMissingRemote);
				}
				self.validate_bash(&mut errs);
				self.validate_handlers(&mut errs);
			}
			Some(ProviderKind::BashLocal) => self.validate_bash(&mut errs),
			Some(ProviderKind::DockerRemote) => {
				if self.remote.host.is_empty() {
					errs.push(ProviderError::DockerRemoteMissingRemote);
				}
				self.validate_docker(&mut errs);
			}
			Some(ProviderKind::DockerLocal) => self.validate_docker(&mut errs),
			None => errs.push(ProviderError::UnknownProvider),
		}
		errs
	}

	fn validate_bash(&self, errs: &mut Vec<ProviderError>) {
		if self.cmd.is_empty() {
			errs.push(ProviderError::BashMissingCommand);
		}
		if !self.image.is_empty()
			|| !self.ports.is_empty()
			|| !self.volumes.is_empty()
			|| !self.environment.is_empty()
		{
			errs.push(ProviderError::BashExtraneousFields);
		}
	}

	fn validate_docker(&self, errs: &mut Vec<ProviderError>) {
		if self.image.is_empty() {
			errs.push(ProviderError::DockerMissingImage);
		}
		if !self.cmd.is_empty() || !self.working_dir.is_empty() {
			errs.push(ProviderError::DockerExtraneousFields);
		}
	}

	fn validate_handlers(&self, errs: &mut Vec<ProviderError>) {
		for handler in &self.handlers {
			if handler.kind != RSYNC_REMOTE && handler.kind != EXECUTE_REMOTE {
				errs.push(ProviderError::UnknownHandler(handler.kind.clone()));
			}
			if let Some((pattern, _)) = handler.pattern() {
				if let Err(e) = Regex::new(pattern) {
					errs.push(ProviderError::InvalidHandlerPattern {
						pattern: pattern.to_string(),
						message: e.to_string(),
					});
				}
			}
		}
	}
}
