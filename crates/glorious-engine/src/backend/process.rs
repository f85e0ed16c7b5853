use std::fs::File;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::BackendError;
use crate::provider::RemoteInfo;
use crate::status::{ExitOutcome, ProcessHandle, StatusCell};

const TERMINATE_GRACE: Duration = Duration::from_secs(3);

/// A program with its arguments, ready to launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
	pub program: String,
	pub args: Vec<String>,
	pub dir: Option<PathBuf>,
}

impl CommandLine {
	/// Split `cmd` on whitespace and resolve its executable through `PATH`.
	pub fn local(cmd: &str, working_dir: &str) -> Result<Self, BackendError> {
		let mut pieces = cmd.split_whitespace();
		let program = pieces.next().ok_or(BackendError::NoCommand)?;
		Ok(Self {
			program: resolve_program(program),
			args: pieces.map(str::to_string).collect(),
			dir: (!working_dir.is_empty()).then(|| PathBuf::from(working_dir)),
		})
	}

	/// `ssh [-i identity] user@host "cd <remote dir>; <cmd>"`.
	pub fn remote(cmd: &str, remote: &RemoteInfo) -> Result<Self, BackendError> {
		let mut pieces: Vec<String> = cmd.split_whitespace().map(str::to_string).collect();
		let first = pieces.first_mut().ok_or(BackendError::NoCommand)?;
		*first = resolve_program(first);

		let mut args = Vec::new();
		if !remote.identity_file.is_empty() {
			args.push("-i".to_string());
			args.push(expand_home(&remote.identity_file));
		}
		args.push(remote.destination());
		args.push(format!("cd {}; {}", remote.working_dir, pieces.join(" ")));

		Ok(Self {
			program: "ssh".to_string(),
			args,
			dir: None,
		})
	}

	pub fn command(&self) -> Command {
		let mut cmd = Command::new(&self.program);
		cmd.args(&self.args);
		if let Some(dir) = &self.dir {
			cmd.current_dir(dir);
		}
		cmd
	}

	fn spawn_error(&self, source: std::io::Error) -> BackendError {
		BackendError::Spawn {
			program: self.program.clone(),
			source,
		}
	}
}

/// Absolute path of `program` found on `PATH`. Path-like names are not looked up.
pub fn which(program: &str) -> Option<PathBuf> {
	if program.contains('/') {
		return None;
	}
	let path = std::env::var_os("PATH")?;
	std::env::split_paths(&path)
		.map(|dir| dir.join(program))
		.find(|candidate| candidate.is_file())
}

fn resolve_program(program: &str) -> String {
	match which(program) {
		Some(path) => {
			tracing::debug!("resolved {:?} to {:?}", program, path);
			path.to_string_lossy().into_owned()
		}
		None => {
			tracing::debug!("failed to lookup {:?}, leaving as typed", program);
			program.to_string()
		}
	}
}

fn expand_home(path: &str) -> String {
	match (path.strip_prefix("~/"), std::env::var("HOME")) {
		(Some(rest), Ok(home)) if !home.is_empty() => format!("{}/{}", home, rest),
		_ => path.to_string(),
	}
}

/// Launch in its own process group with stdout and stderr appended to `output`.
pub fn spawn(line: &CommandLine, output: &File) -> Result<Child, BackendError> {
	let mut cmd = line.command();
	cmd.stdin(Stdio::null())
		.stdout(Stdio::from(output.try_clone()?))
		.stderr(Stdio::from(output.try_clone()?))
		.process_group(0);
	cmd.spawn().map_err(|e| line.spawn_error(e))
}

/// Run to completion with output appended to `output`.
pub async fn run(line: &CommandLine, output: &File) -> Result<(), BackendError> {
	let mut cmd = line.command();
	cmd.stdin(Stdio::null())
		.stdout(Stdio::from(output.try_clone()?))
		.stderr(Stdio::from(output.try_clone()?));
	let status = cmd.status().await.map_err(|e| line.spawn_error(e))?;
	if status.success() {
		Ok(())
	} else {
		Err(BackendError::Command {
			program: line.program.clone(),
			status: status.to_string(),
			stderr: "see unit output".to_string(),
		})
	}
}

/// Background side of a supervised process: owns the child until it is reaped.
pub struct ExitWatcher {
	child: Child,
	kill: oneshot::Receiver<()>,
	exited: oneshot::Sender<ExitOutcome>,
}

/// Split a spawned child into the handle kept in the unit's status and the
/// watcher that waits on it.
pub fn supervise(child: Child) -> (ProcessHandle, ExitWatcher) {
	let pid = child.id().unwrap_or(0);
	let (kill_tx, kill_rx) = oneshot::channel();
	let (exit_tx, exit_rx) = oneshot::channel();
	(
		ProcessHandle::new(pid, kill_tx, exit_rx),
		ExitWatcher {
			child,
			kill: kill_rx,
			exited: exit_tx,
		},
	)
}

impl ExitWatcher {
	/// Wait for the process, then apply the exit to run `status_id` of `cell`.
	/// The outcome is handed to a waiting stopper before the unit lock is taken.
	pub fn spawn(self, unit: String, cell: Arc<StatusCell>, status_id: u64) -> JoinHandle<()> {
		let ExitWatcher {
			mut child,
			kill,
			exited,
		} = self;

		tokio::spawn(async move {
			let pid = child.id();
			let outcome = tokio::select! {
				status = child.wait() => match status {
					Ok(status) if status.success() => ExitOutcome::Success,
					Ok(status) => ExitOutcome::Failed(status.code()),
					Err(e) => {
						tracing::warn!(unit = %unit, "failed waiting on process: {}", e);
						ExitOutcome::Failed(None)
					}
				},
				_ = kill => {
					if let Some(pid) = pid {
						terminate_process_group(pid, &mut child).await;
					}
					ExitOutcome::Killed
				}
			};

			let _ = exited.send(outcome);

			match outcome {
				ExitOutcome::Success => tracing::info!(unit = %unit, "process exited cleanly"),
				ExitOutcome::Failed(code) => {
					tracing::warn!(unit = %unit, ?code, "process exited abnormally")
				}
				ExitOutcome::Killed => tracing::debug!(unit = %unit, "process killed"),
			}

			cell.record_exit(status_id, outcome).await;
		})
	}
}

async fn terminate_process_group(pid: u32, child: &mut Child) {
	use nix::sys::signal::{killpg, Signal};
	use nix::unistd::Pid;

	let pgid = Pid::from_raw(pid as i32);
	let _ = killpg(pgid, Signal::SIGTERM);
	if tokio::time::timeout(TERMINATE_GRACE, child.wait()).await.is_err() {
		let _ = killpg(pgid, Signal::SIGKILL);
		let _ = child.wait().await;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn local_command_resolves_program() {
		let line = CommandLine::local("sh -c true", "/tmp").unwrap();
		assert!(line.program.ends_with("/sh"), "got {}", line.program);
		assert_eq!(line.args, vec!["-c", "true"]);
		assert_eq!(line.dir, Some(PathBuf::from("/tmp")));

		let line = CommandLine::local("no-such-binary-glorious --flag", "").unwrap();
		assert_eq!(line.program, "no-such-binary-glorious");
		assert_eq!(line.dir, None);

		assert!(matches!(CommandLine::local("   ", ""), Err(BackendError::NoCommand)));
	}

	#[test]
	fn remote_command_wraps_in_ssh() {
		let remote = RemoteInfo {
			host: "box".into(),
			user: "me".into(),
			identity_file: "/keys/id".into(),
			working_dir: "/srv/app".into(),
		};
		let line = CommandLine::remote("./run.sh  --port 80", &remote).unwrap();
		assert_eq!(line.program, "ssh");
		assert_eq!(
			line.args,
			vec!["-i", "/keys/id", "me@box", "cd /srv/app; ./run.sh --port 80"]
		);
	}

	#[test]
	fn which_skips_paths() {
		assert_eq!(which("./local-script"), None);
		assert!(which("sh").is_some());
	}

	#[tokio::test]
	async fn run_reports_failure() {
		let dir = std::env::temp_dir().join(format!("glorious-run-{}", std::process::id()));
		let _ = std::fs::create_dir_all(&dir);
		let output = File::create(dir.join("out")).unwrap();

		run(&CommandLine::local("true", "").unwrap(), &output).await.unwrap();
		let err = run(&CommandLine::local("false", "").unwrap(), &output).await.unwrap_err();
		assert!(matches!(err, BackendError::Command { .. }));
		let _ = std::fs::remove_dir_all(&dir);
	}
}
