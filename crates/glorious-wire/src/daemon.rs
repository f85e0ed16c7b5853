use std::net::SocketAddr;
use std::path::PathBuf;

use glorious_core::GloriousPaths;
use serde::{de::DeserializeOwned, Serialize};

use crate::client::{self, ClientError, RpcClient};

pub struct Daemon {
	pub paths: GloriousPaths,
	pub addr: SocketAddr,
}

impl Daemon {
	pub fn new(paths: GloriousPaths, addr: SocketAddr) -> Self {
		Self { paths, addr }
	}

	/// Record this process as the running daemon.
	pub fn write_pid_file(&self) -> std::io::Result<()> {
		std::fs::create_dir_all(self.paths.state_dir())?;
		std::fs::write(self.paths.daemon_pid_path(), std::process::id().to_string())
	}

	pub fn cleanup(&self) {
		let _ = std::fs::remove_file(self.paths.daemon_pid_path());
	}

	pub fn is_running(&self) -> bool {
		client::is_running(self.addr)
	}

	pub fn start_background_with_args(&self, args: &[&str]) -> Result<(), String> {
		if self.is_running() {
			return Err("daemon already running".to_string());
		}

		spawn_detached(args).map_err(|e| format!("failed to start daemon: {}", e))
	}

	pub fn stop(&self) -> Result<(), String> {
		if let Some(pid) = client::read_pid(&self.paths.daemon_pid_path()) {
			use nix::sys::signal::{kill, Signal};
			use nix::unistd::Pid;
			let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
			self.cleanup();
			Ok(())
		} else {
			Err("daemon not running".to_string())
		}
	}
}

/// Connect to the daemon at `addr`, starting it with `args` if nothing answers.
pub fn ensure_daemon<Req, Resp>(
	addr: SocketAddr,
	args: &[&str],
) -> Result<RpcClient<Req, Resp>, ClientError>
where
	Req: Serialize,
	Resp: DeserializeOwned,
{
	if let Ok(client) = RpcClient::connect(addr) {
		return Ok(client);
	}

	spawn_detached(args)?;

	for _ in 0..50 {
		std::thread::sleep(std::time::Duration::from_millis(100));
		if let Ok(client) = RpcClient::connect(addr) {
			return Ok(client);
		}
	}

	Err(ClientError::NotRunning)
}

fn spawn_detached(args: &[&str]) -> std::io::Result<()> {
	let binary = find_current_binary();
	std::process::Command::new(&binary)
		.args(args)
		.stdout(std::process::Stdio::null())
		.stderr(std::process::Stdio::null())
		.spawn()
		.map(|_| ())
}

fn find_current_binary() -> PathBuf {
	std::env::current_exe().unwrap_or_else(|_| PathBuf::from("glorious"))
}
