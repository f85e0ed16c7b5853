use std::fs::{self, File, OpenOptions};
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};

use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Per-unit output file, opened append-create.
pub fn open_output(path: &Path) -> io::Result<File> {
	if let Some(parent) = path.parent() {
		fs::create_dir_all(parent)?;
	}
	OpenOptions::new().create(true).append(true).open(path)
}

pub fn write_pid_file(path: &Path, pid: u32) -> io::Result<()> {
	if let Some(parent) = path.parent() {
		fs::create_dir_all(parent)?;
	}
	fs::write(path, pid.to_string())
}

/// Follows an output file from the point it was opened, yielding complete
/// lines as they are appended. A truncated file is followed from its start.
pub struct OutputFollower {
	path: PathBuf,
	position: u64,
	pending: Vec<u8>,
}

impl OutputFollower {
	pub async fn from_end(path: impl Into<PathBuf>) -> io::Result<Self> {
		let path = path.into();
		let position = match tokio::fs::metadata(&path).await {
			Ok(meta) => meta.len(),
			Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
			Err(e) => return Err(e),
		};
		Ok(Self {
			path,
			position,
			pending: Vec::new(),
		})
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Lines appended since the last call. Empty when nothing new was written.
	pub async fn poll_lines(&mut self) -> io::Result<Vec<String>> {
		let len = match tokio::fs::metadata(&self.path).await {
			Ok(meta) => meta.len(),
			Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(e),
		};

		if len < self.position {
			self.position = 0;
			self.pending.clear();
		}
		if len == self.position {
			return Ok(Vec::new());
		}

		let mut file = tokio::fs::File::open(&self.path).await?;
		file.seek(SeekFrom::Start(self.position)).await?;
		let mut buf = Vec::new();
		file.read_to_end(&mut buf).await?;
		self.position += buf.len() as u64;
		self.pending.extend_from_slice(&buf);

		let mut lines = Vec::new();
		while let Some(end) = self.pending.iter().position(|&b| b == b'\n') {
			let line: Vec<u8> = self.pending.drain(..=end).collect();
			let text = String::from_utf8_lossy(&line[..line.len() - 1]);
			lines.push(text.trim_end_matches('\r').to_string());
		}
		Ok(lines)
	}
}
