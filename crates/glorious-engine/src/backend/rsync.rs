use std::fs::File;
use std::path::Path;

use async_trait::async_trait;

use super::process::{self, CommandLine};
use super::RemoteSync;
use crate::error::BackendError;
use crate::provider::RemoteInfo;

/// [`RemoteSync`] over `rsync` and `ssh`.
#[derive(Debug, Clone, Default)]
pub struct SshRsync;

/// `rsync -avuzq --exclude **/node_modules/* <local> <user>@<host>:<remote dir>`.
pub fn rsync_command(local: &Path, remote: &RemoteInfo, remote_dir: &str) -> CommandLine {
	CommandLine {
		program: "rsync".to_string(),
		args: vec![
			"-avuzq".to_string(),
			"--exclude".to_string(),
			"**/node_modules/*".to_string(),
			local.to_string_lossy().into_owned(),
			format!("{}:{}", remote.destination(), remote_dir),
		],
		dir: None,
	}
}

/// Remote counterpart of `changed`: its path relative to `local_root`,
/// placed under `remote_root`.
pub fn remote_path(changed: &Path, local_root: &Path, remote_root: &str) -> String {
	match changed.strip_prefix(local_root) {
		Ok(rel) if rel.as_os_str().is_empty() => remote_root.to_string(),
		Ok(rel) => format!("{}/{}", remote_root.trim_end_matches('/'), rel.to_string_lossy()),
		Err(_) => remote_root.to_string(),
	}
}

#[async_trait]
impl RemoteSync for SshRsync {
	async fn sync(
		&self,
		local: &Path,
		remote: &RemoteInfo,
		remote_dir: &str,
		output: &File,
	) -> Result<(), BackendError> {
		let line = rsync_command(local, remote, remote_dir);
		tracing::debug!("syncing {} to {}", local.display(), remote_dir);
		process::run(&line, output).await
	}

	async fn execute(&self, remote: &RemoteInfo, command: &CommandLine, output: &File) -> Result<(), BackendError> {
		tracing::debug!("executing on {}: {}", remote.host, command.args.join(" "));
		process::run(command, output).await
	}
}
