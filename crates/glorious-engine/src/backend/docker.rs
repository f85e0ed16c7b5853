use std::process::{Output, Stdio};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{ContainerRuntime, ContainerSpec, RegistryCredentials};
use crate::error::BackendError;

/// [`ContainerRuntime`] backed by the `docker` command line client. A remote
/// engine is addressed with `-H <host>`.
#[derive(Debug, Clone)]
pub struct DockerCli {
	program: String,
}

impl Default for DockerCli {
	fn default() -> Self {
		Self::new("docker")
	}
}

impl DockerCli {
	pub fn new(program: impl Into<String>) -> Self {
		Self {
			program: program.into(),
		}
	}

	fn command(&self, host: Option<&str>) -> Command {
		let mut cmd = Command::new(&self.program);
		if let Some(host) = host {
			cmd.arg("-H").arg(host);
		}
		cmd.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped());
		cmd
	}

	async fn output(&self, host: Option<&str>, args: &[String]) -> Result<Output, BackendError> {
		tracing::debug!("running {} {}", self.program, args.join(" "));
		self.command(host)
			.args(args)
			.output()
			.await
			.map_err(|source| BackendError::Spawn {
				program: self.program.clone(),
				source,
			})
	}

	async fn run(&self, host: Option<&str>, args: &[String]) -> Result<String, BackendError> {
		let output = self.output(host, args).await?;
		self.check(output)
	}

	/// `Ok(false)` when docker reports the object does not exist.
	async fn exists(&self, host: Option<&str>, args: &[String]) -> Result<bool, BackendError> {
		let output = self.output(host, args).await?;
		if output.status.success() {
			return Ok(true);
		}
		let stderr = String::from_utf8_lossy(&output.stderr);
		if stderr.contains("No such") {
			return Ok(false);
		}
		Err(self.failure(&output))
	}

	async fn login(&self, host: Option<&str>, credentials: &RegistryCredentials) -> Result<(), BackendError> {
		let mut child = self
			.command(host)
			.args([
				"login",
				"--username",
				credentials.username.as_str(),
				"--password-stdin",
				credentials.server.as_str(),
			])
			.stdin(Stdio::piped())
			.spawn()
			.map_err(|source| BackendError::Spawn {
				program: self.program.clone(),
				source,
			})?;

		if let Some(mut stdin) = child.stdin.take() {
			stdin.write_all(credentials.password.as_bytes()).await?;
		}
		let output = child.wait_with_output().await?;
		self.check(output).map(|_| ())
	}

	fn check(&self, output: Output) -> Result<String, BackendError> {
		if output.status.success() {
			Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
		} else {
			Err(self.failure(&output))
		}
	}

	fn failure(&self, output: &Output) -> BackendError {
		BackendError::Command {
			program: self.program.clone(),
			status: output.status.to_string(),
			stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
		}
	}
}

fn args<const N: usize>(items: [&str; N]) -> Vec<String> {
	items.iter().map(|s| s.to_string()).collect()
}

/// Arguments of `docker create` for `spec`.
pub fn create_args(spec: &ContainerSpec) -> Vec<String> {
	let mut out = args(["create", "--name", spec.name.as_str()]);
	for port in &spec.ports {
		out.push("-p".to_string());
		out.push(port.to_arg());
	}
	for mount in &spec.mounts {
		out.push("--mount".to_string());
		out.push(mount.to_arg());
	}
	for env in &spec.environment {
		out.push("-e".to_string());
		out.push(env.clone());
	}
	out.push(spec.image.clone());
	out
}

#[async_trait]
impl ContainerRuntime for DockerCli {
	async fn image_exists(&self, host: Option<&str>, image: &str) -> Result<bool, BackendError> {
		self.exists(host, &args(["image", "inspect", "--format", "{{.Id}}", image]))
			.await
	}

	async fn pull_image(
		&self,
		host: Option<&str>,
		image: &str,
		credentials: Option<&RegistryCredentials>,
	) -> Result<(), BackendError> {
		if let Some(credentials) = credentials {
			self.login(host, credentials).await?;
		}
		self.run(host, &args(["pull", "--quiet", image])).await.map(|_| ())
	}

	async fn create_container(&self, host: Option<&str>, spec: &ContainerSpec) -> Result<String, BackendError> {
		self.run(host, &create_args(spec)).await
	}

	async fn start_container(&self, host: Option<&str>, name: &str) -> Result<(), BackendError> {
		self.run(host, &args(["start", name])).await.map(|_| ())
	}

	async fn stop_container(&self, host: Option<&str>, name: &str) -> Result<(), BackendError> {
		self.run(host, &args(["stop", name])).await.map(|_| ())
	}

	async fn remove_container(&self, host: Option<&str>, name: &str) -> Result<(), BackendError> {
		self.run(host, &args(["rm", name])).await.map(|_| ())
	}

	async fn container_exists(&self, host: Option<&str>, name: &str) -> Result<bool, BackendError> {
		self.exists(host, &args(["container", "inspect", "--format", "{{.Id}}", name]))
			.await
	}
}
