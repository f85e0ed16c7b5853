pub mod agent;
pub mod tailer;

use std::path::Path;
use std::sync::Arc;

use glorious_core::{GloriousPaths, Request, Response};
use glorious_engine::{Backends, Registry, Services, Store};
use glorious_wire::Daemon;
use tokio::signal::unix::{signal, SignalKind};

use agent::Agent;

/// Run the daemon in the foreground until Ctrl-C or SIGTERM.
pub async fn run(config_path: &Path) -> Result<(), String> {
	let paths = GloriousPaths::from_env().ok_or("cannot determine home directory")?;
	let store = Store::open_file(paths.store_file()).map_err(|e| format!("failed to open store: {}", e))?;
	let services = Services::new(Arc::new(store), Backends::system(), paths.clone());

	let registry = Registry::load(config_path, services)
		.map_err(|e| format!("failed to load {}: {}", config_path.display(), e))?;
	let addr = registry.daemon().addr().map_err(|e| e.to_string())?;

	let daemon = Daemon::new(paths, addr);
	if daemon.is_running() {
		return Err(format!("a daemon is already listening on {}", addr));
	}
	daemon
		.write_pid_file()
		.map_err(|e| format!("failed to write pid file: {}", e))?;

	registry.init().await;
	tokio::spawn(Arc::clone(registry.tokens()).run_sweeper());

	let agent = Arc::new(Agent::new(registry));
	let rpc_agent = Arc::clone(&agent);
	let tail_agent = Arc::clone(&agent);
	let server = tokio::spawn(async move {
		glorious_wire::run_tcp_server(
			addr,
			move |req: Request| {
				let agent = Arc::clone(&rpc_agent);
				async move { agent.handle(req).await }
			},
			|message: String| Response::Error { message },
			move |stream| {
				let agent = Arc::clone(&tail_agent);
				async move { tailer::serve(stream, agent.registry().await).await }
			},
		)
		.await;
	});

	tracing::info!("daemon started (pid {})", std::process::id());

	let mut terminate = signal(SignalKind::terminate()).map_err(|e| e.to_string())?;
	tokio::select! {
		_ = server => {},
		_ = tokio::signal::ctrl_c() => tracing::info!("shutting down"),
		_ = terminate.recv() => tracing::info!("terminated, shutting down"),
	}

	daemon.cleanup();
	Ok(())
}
