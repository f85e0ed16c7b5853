use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use glorious_core::NOT_FOUND;

use crate::error::StoreError;

/// Where the store map lives between daemon runs.
pub trait Persistence: Send + Sync {
	/// `None` when nothing has been persisted yet.
	fn load(&self) -> io::Result<Option<Vec<u8>>>;
	fn save(&self, data: &[u8]) -> io::Result<()>;
}

/// Flat JSON file, replaced by writing a sibling temp file and renaming it over.
pub struct FilePersistence {
	path: PathBuf,
}

impl FilePersistence {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn path(&self) -> &Path {
		&self.path
	}
}

impl Persistence for FilePersistence {
	fn load(&self) -> io::Result<Option<Vec<u8>>> {
		match std::fs::read(&self.path) {
			Ok(data) => Ok(Some(data)),
			Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
			Err(e) => Err(e),
		}
	}

	fn save(&self, data: &[u8]) -> io::Result<()> {
		if let Some(parent) = self.path.parent() {
			std::fs::create_dir_all(parent)?;
		}
		let mut tmp = self.path.clone().into_os_string();
		tmp.push(".tmp");
		let tmp = PathBuf::from(tmp);
		std::fs::write(&tmp, data)?;
		std::fs::rename(&tmp, &self.path)
	}
}

/// Persistent string map shared by the agent and every unit. Writers are
/// serialized: the lock is held across the mutation and the full-map write.
pub struct Store {
	values: Mutex<BTreeMap<String, String>>,
	persistence: Box<dyn Persistence>,
}

impl Store {
	pub fn open(persistence: impl Persistence + 'static) -> Result<Self, StoreError> {
		let values = match persistence.load()? {
			Some(data) if !data.iter().all(u8::is_ascii_whitespace) => serde_json::from_slice(&data)?,
			_ => BTreeMap::new(),
		};
		tracing::debug!("loaded store with {} values", values.len());

		Ok(Self {
			values: Mutex::new(values),
			persistence: Box::new(persistence),
		})
	}

	pub fn open_file(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		Self::open(FilePersistence::new(path))
	}

	/// In-memory store that never touches disk.
	pub fn ephemeral() -> Self {
		Self {
			values: Mutex::new(BTreeMap::new()),
			persistence: Box::new(NoPersistence),
		}
	}

	pub fn get(&self, key: &str) -> Option<String> {
		self.lock().get(key).cloned()
	}

	/// Value for `key`, or the `(not found)` sentinel when it is absent or empty.
	pub fn lookup(&self, key: &str) -> String {
		match self.get(key) {
			Some(value) if !value.is_empty() => value,
			_ => NOT_FOUND.to_string(),
		}
	}

	pub fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
		let mut values = self.lock();
		let previous = values.insert(key.to_string(), value.to_string());

		let result = serde_json::to_vec(&*values)
			.map_err(StoreError::from)
			.and_then(|data| self.persistence.save(&data).map_err(StoreError::from));

		if result.is_err() {
			match previous {
				Some(previous) => values.insert(key.to_string(), previous),
				None => values.remove(key),
			};
		}
		result
	}

	fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
		self.values.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}
}

struct NoPersistence;

impl Persistence for NoPersistence {
	fn load(&self) -> io::Result<Option<Vec<u8>>> {
		Ok(None)
	}

	fn save(&self, _data: &[u8]) -> io::Result<()> {
		Ok(())
	}
}
