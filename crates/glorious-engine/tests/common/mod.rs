#![allow(dead_code)]

use std::collections::BTreeSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use glorious_core::GloriousPaths;
use glorious_engine::backend::{
	Backends, CommandLine, ContainerRuntime, ContainerSpec, RegistryAuth, RegistryCredentials, RemoteSync,
};
use glorious_engine::provider::RemoteInfo;
use glorious_engine::{BackendError, Document, Registry, Services, Store, Unit, UnitStatus};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

pub fn temp_home(label: &str) -> PathBuf {
	let n = COUNTER.fetch_add(1, Ordering::SeqCst);
	let dir = std::env::temp_dir().join(format!("glorious-engine-{}-{}-{}", label, std::process::id(), n));
	let _ = std::fs::remove_dir_all(&dir);
	std::fs::create_dir_all(&dir).unwrap();
	dir
}

#[derive(Debug, Default)]
pub struct RuntimeState {
	pub images: BTreeSet<String>,
	pub containers: BTreeSet<String>,
	pub pulls: Vec<(String, Option<RegistryCredentials>)>,
	pub created: Vec<ContainerSpec>,
	pub removed: Vec<String>,
}

/// In-memory container engine.
#[derive(Default)]
pub struct FakeRuntime {
	pub state: Mutex<RuntimeState>,
}

impl FakeRuntime {
	pub fn with_images(images: &[&str]) -> Arc<Self> {
		let runtime = Self::default();
		runtime.state.lock().unwrap().images = images.iter().map(|s| s.to_string()).collect();
		Arc::new(runtime)
	}
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
	async fn image_exists(&self, _host: Option<&str>, image: &str) -> Result<bool, BackendError> {
		Ok(self.state.lock().unwrap().images.contains(image))
	}

	async fn pull_image(
		&self,
		_host: Option<&str>,
		image: &str,
		credentials: Option<&RegistryCredentials>,
	) -> Result<(), BackendError> {
		let mut state = self.state.lock().unwrap();
		state.pulls.push((image.to_string(), credentials.cloned()));
		state.images.insert(image.to_string());
		Ok(())
	}

	async fn create_container(&self, _host: Option<&str>, spec: &ContainerSpec) -> Result<String, BackendError> {
		let mut state = self.state.lock().unwrap();
		if !state.images.contains(&spec.image) {
			return Err(BackendError::Command {
				program: "docker".into(),
				status: "exit status: 1".into(),
				stderr: format!("No such image: {}", spec.image),
			});
		}
		state.created.push(spec.clone());
		Ok(format!("id-{}", spec.name))
	}

	async fn start_container(&self, _host: Option<&str>, name: &str) -> Result<(), BackendError> {
		self.state.lock().unwrap().containers.insert(name.to_string());
		Ok(())
	}

	async fn stop_container(&self, _host: Option<&str>, _name: &str) -> Result<(), BackendError> {
		Ok(())
	}

	async fn remove_container(&self, _host: Option<&str>, name: &str) -> Result<(), BackendError> {
		let mut state = self.state.lock().unwrap();
		state.containers.remove(name);
		state.removed.push(name.to_string());
		Ok(())
	}

	async fn container_exists(&self, _host: Option<&str>, name: &str) -> Result<bool, BackendError> {
		Ok(self.state.lock().unwrap().containers.contains(name))
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncCall {
	Sync { local: PathBuf, remote_dir: String },
	Execute { args: Vec<String> },
}

/// Records every sync and remote command instead of shelling out.
#[derive(Default)]
pub struct FakeSync {
	pub calls: Mutex<Vec<SyncCall>>,
}

#[async_trait]
impl RemoteSync for FakeSync {
	async fn sync(&self, local: &Path, _remote: &RemoteInfo, remote_dir: &str, _output: &File) -> Result<(), BackendError> {
		self.calls.lock().unwrap().push(SyncCall::Sync {
			local: local.to_path_buf(),
			remote_dir: remote_dir.to_string(),
		});
		Ok(())
	}

	async fn execute(&self, _remote: &RemoteInfo, command: &CommandLine, _output: &File) -> Result<(), BackendError> {
		self.calls.lock().unwrap().push(SyncCall::Execute {
			args: command.args.clone(),
		});
		Ok(())
	}
}

/// Serves `registry.test/*` with a fixed latest tag.
pub struct FakeAuth;

#[async_trait]
impl RegistryAuth for FakeAuth {
	fn name(&self) -> &str {
		"fake/registry"
	}

	fn handles(&self, image: &str) -> bool {
		image.starts_with("registry.test/")
	}

	async fn latest_tag(&self, _image: &str) -> Result<Option<String>, BackendError> {
		Ok(Some("v7".into()))
	}

	async fn credentials(&self, _image: &str) -> Result<RegistryCredentials, BackendError> {
		Ok(RegistryCredentials {
			username: "robot".into(),
			password: "hunter2".into(),
			server: "https://registry.test".into(),
		})
	}
}

pub struct Harness {
	pub home: PathBuf,
	pub services: Arc<Services>,
	pub runtime: Arc<FakeRuntime>,
	pub sync: Arc<FakeSync>,
}

impl Harness {
	pub fn new(label: &str) -> Self {
		Self::with_runtime(label, Arc::new(FakeRuntime::default()))
	}

	pub fn with_runtime(label: &str, runtime: Arc<FakeRuntime>) -> Self {
		let home = temp_home(label);
		let paths = GloriousPaths::with_home(&home);
		let store = Arc::new(Store::open_file(paths.store_file()).unwrap());
		let sync = Arc::new(FakeSync::default());
		let backends = Backends {
			containers: runtime.clone(),
			remote: sync.clone(),
			auth: vec![Arc::new(FakeAuth) as Arc<dyn RegistryAuth>],
		};
		Self {
			home,
			services: Services::new(store, backends, paths),
			runtime,
			sync,
		}
	}

	pub fn registry(&self, doc: &str) -> Registry {
		Registry::from_document(Document::parse(doc).unwrap(), Arc::clone(&self.services)).unwrap()
	}

	pub fn paths(&self) -> &GloriousPaths {
		&self.services.paths
	}
}

pub async fn wait_for(unit: &Unit, status: UnitStatus) {
	let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
	while unit.status().await != status {
		assert!(
			tokio::time::Instant::now() < deadline,
			"{} never reached {:?}, still {:?}",
			unit.name,
			status,
			unit.status().await
		);
		tokio::time::sleep(Duration::from_millis(20)).await;
	}
}
