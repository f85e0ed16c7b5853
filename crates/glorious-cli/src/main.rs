mod daemon;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use glorious_core::{GloriousPaths, Request, Response, UnitReport};
use glorious_engine::config::{DaemonSettings, Document, DEFAULT_CONFIG_FILE};
use glorious_wire::{ensure_daemon, Daemon, RpcClient, TailStream};
use owo_colors::OwoColorize;

#[derive(Parser)]
#[command(name = "glorious", version, about = "Unit supervisor with slot resolution and dependency ordering")]
struct Cli {
	/// Configuration file
	#[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
	config: PathBuf,

	/// Log at debug level
	#[arg(long, global = true)]
	debug: bool,

	/// Run the daemon in the foreground
	#[arg(long)]
	daemon: bool,

	#[command(subcommand)]
	command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
	/// Say hello to the daemon
	Greet { names: Vec<String> },
	/// List configured units
	Config,
	/// Show the status of every unit
	#[command(alias = "st")]
	Status,
	/// Reload the configuration file
	Reload,
	/// Start units or groups, dependencies first
	Start {
		#[arg(required = true)]
		names: Vec<String>,
	},
	/// Stop units or groups
	Stop {
		#[arg(required = true)]
		names: Vec<String>,
	},
	/// Stop, then start units or groups
	Restart {
		#[arg(required = true)]
		names: Vec<String>,
	},
	/// Stream unit output until one of the units stops
	Tail {
		#[arg(required = true)]
		names: Vec<String>,
	},
	/// Read or write the internal store
	Store {
		#[command(subcommand)]
		action: StoreAction,
	},
	/// Manage the background daemon
	Daemon {
		#[command(subcommand)]
		action: DaemonAction,
	},
}

#[derive(Subcommand)]
enum StoreAction {
	/// Print the values of the given keys
	Get {
		#[arg(required = true)]
		keys: Vec<String>,
	},
	/// Set a key, restarting units whose slots depend on it
	Set { key: String, value: String },
}

#[derive(Subcommand)]
enum DaemonAction {
	Start,
	Stop,
	Status,
}

type Client = RpcClient<Request, Response>;

fn main() {
	let cli = Cli::parse();

	tracing_subscriber::fmt()
		.with_max_level(if cli.debug {
			tracing::Level::DEBUG
		} else {
			tracing::Level::INFO
		})
		.with_writer(std::io::stderr)
		.init();

	if cli.daemon {
		run_daemon(&cli.config);
		return;
	}

	let Some(command) = cli.command.as_ref() else {
		cmd_status(&cli);
		return;
	};

	match command {
		Command::Greet { names } => cmd_greet(&cli, names),
		Command::Config => cmd_config(&cli),
		Command::Status => cmd_status(&cli),
		Command::Reload => cmd_reload(&cli),
		Command::Start { names } => cmd_lifecycle(&cli, names, "starting", |name| Request::StartUnit { name }),
		Command::Stop { names } => cmd_lifecycle(&cli, names, "stopping", |name| Request::StopUnit { name }),
		Command::Restart { names } => {
			cmd_lifecycle(&cli, names, "restarting", |name| Request::RestartUnit { name })
		}
		Command::Tail { names } => cmd_tail(&cli, names),
		Command::Store { action } => match action {
			StoreAction::Get { keys } => cmd_store_get(&cli, keys),
			StoreAction::Set { key, value } => cmd_store_set(&cli, key, value),
		},
		Command::Daemon { action } => cmd_daemon(&cli, action),
	}
}

fn run_daemon(config: &Path) {
	let runtime = match tokio::runtime::Runtime::new() {
		Ok(rt) => rt,
		Err(e) => fail(&format!("failed to start runtime: {}", e)),
	};
	if let Err(e) = runtime.block_on(daemon::run(config)) {
		fail(&e);
	}
}

fn fail(message: &str) -> ! {
	eprintln!("{} {}", "error:".red().bold(), message);
	std::process::exit(1);
}

/// `[daemon]` section of the config file, or the defaults when there is none.
fn daemon_addr(config: &Path) -> SocketAddr {
	let settings = if config.exists() {
		match Document::load(config) {
			Ok(doc) => doc.daemon,
			Err(e) => fail(&e.to_string()),
		}
	} else {
		DaemonSettings::default()
	};
	match settings.addr() {
		Ok(addr) => addr,
		Err(e) => fail(&e.to_string()),
	}
}

fn connect(cli: &Cli) -> Client {
	let addr = daemon_addr(&cli.config);
	let config = std::fs::canonicalize(&cli.config).unwrap_or_else(|_| cli.config.clone());
	let config = config.to_string_lossy();
	let mut args = vec!["--daemon", "--config", &*config];
	if cli.debug {
		args.push("--debug");
	}
	match ensure_daemon(addr, &args) {
		Ok(client) => client,
		Err(e) => fail(&format!("cannot reach daemon at {}: {}", addr, e)),
	}
}

fn send(client: &mut Client, request: &Request) -> Response {
	match client.send(request) {
		Ok(Response::Error { message }) => fail(&message),
		Ok(response) => response,
		Err(e) => fail(&e.to_string()),
	}
}

fn cmd_greet(cli: &Cli, names: &[String]) {
	let mut client = connect(cli);
	if let Response::Greeting { message } = send(&mut client, &Request::Greet { names: names.to_vec() }) {
		println!("{}", message);
	}
}

fn cmd_config(cli: &Cli) {
	let mut client = connect(cli);
	let Response::Config { units } = send(&mut client, &Request::Config) else {
		fail("unexpected response");
	};
	println!("{}", format!("{:<20}| {:<9}| Description", "Name", "# slots").bold());
	for unit in units {
		println!("{:<20}| {:<9}| {}", unit.name, unit.num_slots, unit.description);
	}
}

fn cmd_status(cli: &Cli) {
	let mut client = connect(cli);
	let Response::Status { units } = send(&mut client, &Request::Status) else {
		fail("unexpected response");
	};
	println!("{}", format!("  {:<20}| {:<12}| Groups", "Name", "Status").bold());
	for unit in &units {
		print_status_line(unit);
	}
}

fn print_status_line(unit: &UnitReport) {
	let circle = match unit.status.as_str() {
		glorious_core::RUNNING => "●".green().to_string(),
		glorious_core::CRASHED => "●".red().to_string(),
		_ => "○".dimmed().to_string(),
	};
	println!(
		"{} {:<20}| {:<12}| {}",
		circle,
		unit.name,
		unit.status,
		unit.groups.join(", ").dimmed()
	);
}

fn cmd_reload(cli: &Cli) {
	let mut client = connect(cli);
	if let Response::Done { error: Some(error) } = send(&mut client, &Request::Reload) {
		fail(&error);
	}
	eprintln!("configuration reloaded");
}

fn cmd_lifecycle(cli: &Cli, names: &[String], verb: &str, request: impl Fn(String) -> Request) {
	let mut client = connect(cli);
	let mut failed = false;
	for name in names {
		eprint!("{} {:?}... ", verb, name);
		match send(&mut client, &request(name.clone())) {
			Response::Done { error: None } => eprintln!("{}", "done".green()),
			Response::Done { error: Some(error) } => {
				eprintln!("{}", error.red());
				failed = true;
			}
			_ => fail("unexpected response"),
		}
	}
	if failed {
		std::process::exit(1);
	}
}

fn cmd_tail(cli: &Cli, names: &[String]) {
	let mut client = connect(cli);
	let token = match send(&mut client, &Request::TailProcesses { names: names.to_vec() }) {
		Response::TailToken { token: Some(token), .. } => token,
		Response::TailToken { error: Some(error), .. } => fail(&error),
		_ => fail("unexpected response"),
	};

	let stream = match TailStream::open(daemon_addr(&cli.config), &token) {
		Ok(stream) => stream,
		Err(e) => fail(&e.to_string()),
	};
	for line in stream.lines() {
		let Ok(line) = line else {
			break;
		};
		match line.split_once("| ") {
			Some((unit, text)) => println!("{} {}", format!("{}|", unit).cyan(), text),
			None => println!("{}", line),
		}
	}
}

fn cmd_store_get(cli: &Cli, keys: &[String]) {
	let mut client = connect(cli);
	let Response::Values { values } = send(&mut client, &Request::StoreGetValues { keys: keys.to_vec() }) else {
		fail("unexpected response");
	};
	for key in keys {
		if let Some(value) = values.get(key) {
			println!("{} = {}", key.bold(), value);
		}
	}
}

fn cmd_store_set(cli: &Cli, key: &str, value: &str) {
	let mut client = connect(cli);
	let request = Request::StorePutValue {
		key: key.to_string(),
		value: value.to_string(),
	};
	if let Response::Done { error: Some(error) } = send(&mut client, &request) {
		fail(&error);
	}
}

fn cmd_daemon(cli: &Cli, action: &DaemonAction) {
	let paths = GloriousPaths::from_env().unwrap_or_else(|| fail("cannot determine home directory"));
	let daemon = Daemon::new(paths, daemon_addr(&cli.config));

	match action {
		DaemonAction::Start => {
			let config = std::fs::canonicalize(&cli.config).unwrap_or_else(|_| cli.config.clone());
			let config = config.to_string_lossy();
			match daemon.start_background_with_args(&["--daemon", "--config", &*config]) {
				Ok(()) => eprintln!("daemon started"),
				Err(e) => fail(&e),
			}
		}
		DaemonAction::Stop => match daemon.stop() {
			Ok(()) => eprintln!("daemon stopped"),
			Err(e) => fail(&e),
		},
		DaemonAction::Status => {
			if daemon.is_running() {
				let pid = glorious_wire::client::read_pid(&daemon.paths.daemon_pid_path());
				match pid {
					Some(pid) => eprintln!("daemon running on {} (pid {})", daemon.addr, pid),
					None => eprintln!("daemon running on {}", daemon.addr),
				}
			} else {
				eprintln!("daemon not running");
			}
		}
	}
}
