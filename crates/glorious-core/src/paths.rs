use std::path::{Path, PathBuf};

/// Layout of everything glorious keeps under `~/.glorious`.
#[derive(Debug, Clone)]
pub struct GloriousPaths {
	home: PathBuf,
}

impl GloriousPaths {
	/// Resolve from `$HOME`. Returns `None` when it is unset or empty.
	pub fn from_env() -> Option<Self> {
		home_dir().map(Self::with_home)
	}

	pub fn with_home(home: impl Into<PathBuf>) -> Self {
		Self { home: home.into() }
	}

	pub fn home(&self) -> &Path {
		&self.home
	}

	pub fn root(&self) -> PathBuf {
		self.home.join(".glorious")
	}

	pub fn output_dir(&self) -> PathBuf {
		self.root().join("output")
	}

	pub fn output_file(&self, unit: &str) -> PathBuf {
		self.output_dir().join(unit)
	}

	pub fn state_dir(&self) -> PathBuf {
		self.root().join("state")
	}

	pub fn pid_dir(&self) -> PathBuf {
		self.state_dir().join("pid-files")
	}

	pub fn pid_file(&self, unit: &str) -> PathBuf {
		self.pid_dir().join(unit)
	}

	pub fn daemon_pid_path(&self) -> PathBuf {
		self.state_dir().join("daemon.pid")
	}

	pub fn store_file(&self) -> PathBuf {
		self.root().join("store.internal")
	}
}

fn home_dir() -> Option<PathBuf> {
	std::env::var("HOME")
		.ok()
		.filter(|h| !h.is_empty())
		.map(PathBuf::from)
}
