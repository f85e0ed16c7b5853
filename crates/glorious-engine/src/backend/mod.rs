//! External collaborators the slots dispatch to. Containers, directory sync
//! and registry auth sit behind traits so the engine can run against fakes;
//! local processes are spawned directly by [`process`].

pub mod docker;
pub mod ecr;
pub mod process;
pub mod rsync;

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::BackendError;
use crate::provider::RemoteInfo;

pub use docker::DockerCli;
pub use ecr::EcrAuth;
pub use process::{CommandLine, ExitWatcher};
pub use rsync::SshRsync;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryCredentials {
	pub username: String,
	pub password: String,
	pub server: String,
}

/// A published port: `[ip:][host_port:]container_port[/proto]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortBinding {
	pub host_ip: Option<String>,
	pub host_port: Option<String>,
	pub container_port: String,
	pub protocol: Option<String>,
}

impl PortBinding {
	pub fn parse(spec: &str) -> Result<Self, BackendError> {
		let bad = || BackendError::PortSpec(spec.to_string());

		let (ports, protocol) = match spec.rsplit_once('/') {
			Some((ports, proto)) if !proto.is_empty() => (ports, Some(proto.to_string())),
			Some(_) => return Err(bad()),
			None => (spec, None),
		};

		let parts: Vec<&str> = ports.split(':').collect();
		let (host_ip, host_port, container_port) = match parts.as_slice() {
			[container] => (None, None, *container),
			[host, container] => (None, Some(*host), *container),
			[ip, host, container] => (Some(*ip), Some(*host), *container),
			_ => return Err(bad()),
		};

		if container_port.is_empty() || !container_port.chars().all(|c| c.is_ascii_digit() || c == '-') {
			return Err(bad());
		}
		if let Some(host) = host_port.filter(|h| !h.is_empty()) {
			if !host.chars().all(|c| c.is_ascii_digit() || c == '-') {
				return Err(bad());
			}
		}

		Ok(Self {
			host_ip: host_ip.filter(|s| !s.is_empty()).map(str::to_string),
			host_port: host_port.filter(|s| !s.is_empty()).map(str::to_string),
			container_port: container_port.to_string(),
			protocol,
		})
	}

	pub fn to_arg(&self) -> String {
		let mut arg = String::new();
		if let Some(ip) = &self.host_ip {
			arg.push_str(ip);
			arg.push(':');
		}
		if let Some(port) = &self.host_port {
			arg.push_str(port);
			arg.push(':');
		} else if self.host_ip.is_some() {
			arg.push(':');
		}
		arg.push_str(&self.container_port);
		if let Some(proto) = &self.protocol {
			arg.push('/');
			arg.push_str(proto);
		}
		arg
	}
}

/// A bind mount declared as `source:target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
	pub source: String,
	pub target: String,
}

impl Mount {
	pub fn parse(spec: &str) -> Result<Self, BackendError> {
		match spec.split_once(':') {
			Some((source, target)) if !source.is_empty() && !target.is_empty() && !target.contains(':') => {
				Ok(Self {
					source: source.to_string(),
					target: target.to_string(),
				})
			}
			_ => Err(BackendError::VolumeSpec(spec.to_string())),
		}
	}

	pub fn to_arg(&self) -> String {
		format!("type=bind,source={},target={}", self.source, self.target)
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
	pub name: String,
	pub image: String,
	pub ports: Vec<PortBinding>,
	pub mounts: Vec<Mount>,
	pub environment: Vec<String>,
}

/// Container engine, local or reached through `host`.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
	async fn image_exists(&self, host: Option<&str>, image: &str) -> Result<bool, BackendError>;

	async fn pull_image(
		&self,
		host: Option<&str>,
		image: &str,
		credentials: Option<&RegistryCredentials>,
	) -> Result<(), BackendError>;

	/// Returns the container id.
	async fn create_container(&self, host: Option<&str>, spec: &ContainerSpec) -> Result<String, BackendError>;

	async fn start_container(&self, host: Option<&str>, name: &str) -> Result<(), BackendError>;

	async fn stop_container(&self, host: Option<&str>, name: &str) -> Result<(), BackendError>;

	async fn remove_container(&self, host: Option<&str>, name: &str) -> Result<(), BackendError>;

	async fn container_exists(&self, host: Option<&str>, name: &str) -> Result<bool, BackendError>;
}

/// Pushes a local tree to a remote host and runs one-shot commands there.
#[async_trait]
pub trait RemoteSync: Send + Sync {
	async fn sync(
		&self,
		local: &Path,
		remote: &RemoteInfo,
		remote_dir: &str,
		output: &File,
	) -> Result<(), BackendError>;

	async fn execute(&self, remote: &RemoteInfo, command: &CommandLine, output: &File) -> Result<(), BackendError>;
}

/// Pull-time registry support, selected by a slot's `authProvider`.
#[async_trait]
pub trait RegistryAuth: Send + Sync {
	fn name(&self) -> &str;

	/// Whether `image` lives in a registry this provider serves.
	fn handles(&self, image: &str) -> bool;

	async fn latest_tag(&self, image: &str) -> Result<Option<String>, BackendError>;

	async fn credentials(&self, image: &str) -> Result<RegistryCredentials, BackendError>;
}

#[derive(Clone)]
pub struct Backends {
	pub containers: Arc<dyn ContainerRuntime>,
	pub remote: Arc<dyn RemoteSync>,
	pub auth: Vec<Arc<dyn RegistryAuth>>,
}

impl Backends {
	/// Docker CLI, ssh/rsync and the `aws/ecr` auth provider.
	pub fn system() -> Self {
		Self {
			containers: Arc::new(DockerCli::default()),
			remote: Arc::new(SshRsync::default()),
			auth: vec![Arc::new(EcrAuth::default())],
		}
	}

	pub fn auth_provider(&self, name: &str) -> Option<&Arc<dyn RegistryAuth>> {
		self.auth.iter().find(|a| a.name() == name)
	}
}

impl Default for Backends {
	fn default() -> Self {
		Self::system()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn port_specs() {
		let p = PortBinding::parse("0.0.0.0:8080:80").unwrap();
		assert_eq!(p.host_ip.as_deref(), Some("0.0.0.0"));
		assert_eq!(p.host_port.as_deref(), Some("8080"));
		assert_eq!(p.container_port, "80");
		assert_eq!(p.to_arg(), "0.0.0.0:8080:80");

		let p = PortBinding::parse("5432:5432/tcp").unwrap();
		assert_eq!(p.protocol.as_deref(), Some("tcp"));
		assert_eq!(p.to_arg(), "5432:5432/tcp");

		let p = PortBinding::parse("127.0.0.1::80").unwrap();
		assert_eq!(p.host_port, None);
		assert_eq!(p.to_arg(), "127.0.0.1::80");

		assert_eq!(PortBinding::parse("6379").unwrap().to_arg(), "6379");
	}

	#[test]
	fn bad_port_specs() {
		for spec in ["", "a:b", "1:2:3:4", "80/", "http:80"] {
			assert!(
				matches!(PortBinding::parse(spec), Err(BackendError::PortSpec(_))),
				"{spec} should be rejected"
			);
		}
	}

	#[test]
	fn volume_specs() {
		let m = Mount::parse("/src:/app").unwrap();
		assert_eq!(m.source, "/src");
		assert_eq!(m.target, "/app");
		assert_eq!(m.to_arg(), "type=bind,source=/src,target=/app");

		assert!(Mount::parse("/src").is_err());
		assert!(Mount::parse(":/app").is_err());
		assert!(Mount::parse("/a:/b:/c").is_err());
	}
}
