use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use notify::{EventKind, RecursiveMode, Watcher};
use regex::Regex;
use tokio::task::JoinHandle;

use crate::backend::{
	process, rsync, Backends, CommandLine, ContainerSpec, Mount, PortBinding, RegistryAuth, RemoteSync,
};
use crate::config::{SlotDef, RESOLVER_DEFAULT, RESOLVER_KEYWORD_VALUE};
use crate::error::{BackendError, PathError, UnitError};
use crate::provider::{ProviderKind, ProviderSpec, RemoteInfo, EXECUTE_REMOTE, RSYNC_REMOTE};
use crate::status::{Status, StatusCell, UnitEvent, UnitState, UnitStatus};
use crate::store::Store;

/// What a slot needs from the unit it runs for.
pub trait UnitContext: Send + Sync {
	fn name(&self) -> &str;
	fn status_cell(&self) -> &Arc<StatusCell>;
	fn output_file(&self) -> io::Result<File>;
	fn save_pid_file(&self, pid: u32) -> io::Result<()>;
	fn store(&self) -> &Store;
	fn backends(&self) -> &Backends;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandlerKind {
	Rsync,
	Execute,
}

#[derive(Debug, Clone)]
struct Handler {
	kind: HandlerKind,
	pattern: Option<(Regex, bool)>,
	cmd: String,
}

impl Handler {
	fn matches(&self, path: &str) -> bool {
		match &self.pattern {
			Some((regex, selects)) => regex.is_match(path) == *selects,
			None => false,
		}
	}
}

/// Running file-watch of a remote bash slot; dropping it stops the watch.
struct WatchSession {
	task: JoinHandle<()>,
}

impl Drop for WatchSession {
	fn drop(&mut self) {
		self.task.abort();
	}
}

/// Everything a watch task needs after the start call has returned.
#[derive(Clone)]
pub struct WatchContext {
	pub unit: String,
	pub local_root: PathBuf,
	pub remote: RemoteInfo,
	pub sync: Arc<dyn RemoteSync>,
	pub output: Arc<File>,
}

pub struct Slot {
	pub name: String,
	pub provider: ProviderSpec,
	pub resolver: BTreeMap<String, String>,
	handlers: Vec<Handler>,
	watch: Mutex<Option<WatchSession>>,
}

impl std::fmt::Debug for Slot {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Slot")
			.field("name", &self.name)
			.field("provider", &self.provider.kind)
			.field("resolver", &self.resolver)
			.finish()
	}
}

impl Slot {
	pub fn new(def: SlotDef) -> Self {
		let handlers = compile_handlers(&def.provider);
		Self {
			name: def.name,
			provider: def.provider,
			resolver: def.resolver,
			handlers,
			watch: Mutex::new(None),
		}
	}

	fn resolver_type(&self) -> Option<&str> {
		self.resolver.get("type").map(String::as_str)
	}

	pub fn is_default(&self) -> bool {
		self.resolver_type() == Some(RESOLVER_DEFAULT)
	}

	/// Store key whose writes can change this slot's resolution.
	pub fn keyword(&self) -> Option<&str> {
		if self.resolver_type() != Some(RESOLVER_KEYWORD_VALUE) {
			return None;
		}
		self.resolver
			.get("keyword")
			.map(String::as_str)
			.filter(|k| !k.is_empty())
	}

	/// Whether the store currently selects this slot.
	pub fn resolve(&self, store: &Store) -> bool {
		let Some(keyword) = self.keyword() else {
			return false;
		};
		let expected = self.resolver.get("value").map(String::as_str).unwrap_or_default();
		store.get(keyword).as_deref() == Some(expected)
	}

	pub fn is_docker(&self) -> bool {
		self.provider.kind().is_some_and(|k| k.is_docker())
	}

	fn docker_host(&self) -> Option<&str> {
		match self.provider.kind() {
			Some(ProviderKind::DockerRemote) => Some(self.provider.remote.host.as_str()),
			_ => None,
		}
	}

	fn kind(&self) -> Result<ProviderKind, UnitError> {
		if self.provider.kind.is_empty() {
			return Err(UnitError::NoProvider);
		}
		self.provider
			.kind()
			.ok_or_else(|| UnitError::UnknownProvider(self.provider.kind.clone()))
	}

	/// Start this slot (at `index` in its unit) and record the run in `state`.
	/// The caller holds the unit's lock.
	pub async fn start(&self, index: usize, unit: &dyn UnitContext, state: &mut UnitState) -> Result<(), UnitError> {
		match self.kind()? {
			ProviderKind::BashLocal => self.start_bash(index, unit, state, false).await,
			ProviderKind::BashRemote => self.start_bash_remote(index, unit, state).await,
			ProviderKind::DockerLocal | ProviderKind::DockerRemote => {
				self.start_docker(index, unit, state).await
			}
		}
	}

	pub async fn stop(&self, unit: &dyn UnitContext, state: &mut UnitState) -> Result<(), UnitError> {
		match self.kind()? {
			ProviderKind::BashLocal => self.stop_bash(unit, state, false).await,
			ProviderKind::BashRemote => self.stop_bash(unit, state, true).await,
			ProviderKind::DockerLocal | ProviderKind::DockerRemote => self.stop_docker(unit, state).await,
		}
	}

	pub fn command_line(&self, cmd: &str, remote: bool) -> Result<CommandLine, BackendError> {
		if remote {
			CommandLine::remote(cmd, &self.provider.remote)
		} else {
			CommandLine::local(cmd, &self.provider.working_dir)
		}
	}

	async fn start_bash(
		&self,
		index: usize,
		unit: &dyn UnitContext,
		state: &mut UnitState,
		remote: bool,
	) -> Result<(), UnitError> {
		if self.provider.cmd.is_empty() {
			return Err(BackendError::NoCommand.into());
		}
		let line = self.command_line(&self.provider.cmd, remote)?;
		let output = unit.output_file().map_err(BackendError::from)?;

		let mut child = process::spawn(&line, &output)?;
		let pid = child.id().unwrap_or(0);
		if let Err(e) = unit.save_pid_file(pid) {
			let _ = child.start_kill();
			return Err(BackendError::from(e).into());
		}

		let (handle, watcher) = process::supervise(child);
		let status = Status::running(Some(handle), Some(output));
		let status_id = status.id();
		state.status = Some(status);
		state.active_slot = Some(index);

		watcher.spawn(unit.name().to_string(), Arc::clone(unit.status_cell()), status_id);
		unit.status_cell().notify(UnitEvent::Started);

		tracing::info!(unit = %unit.name(), slot = %self.name, "begun as pid {}", pid);
		Ok(())
	}

	async fn start_bash_remote(
		&self,
		index: usize,
		unit: &dyn UnitContext,
		state: &mut UnitState,
	) -> Result<(), UnitError> {
		let ctx = WatchContext {
			unit: unit.name().to_string(),
			local_root: PathBuf::from(&self.provider.working_dir),
			remote: self.provider.remote.clone(),
			sync: Arc::clone(&unit.backends().remote),
			output: Arc::new(unit.output_file().map_err(BackendError::from)?),
		};

		ctx.sync
			.sync(&ctx.local_root, &ctx.remote, &ctx.remote.working_dir, &ctx.output)
			.await?;

		let session = self.watch(ctx)?;
		self.start_bash(index, unit, state, true).await?;

		tracing::info!(unit = %unit.name(), slot = %self.name, "started watcher...");
		*self.lock_watch() = Some(session);
		Ok(())
	}

	fn watch(&self, ctx: WatchContext) -> Result<WatchSession, BackendError> {
		let (tx, mut rx) = tokio::sync::mpsc::channel(100);
		let mut watcher = notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
			let _ = tx.blocking_send(res);
		})?;
		watcher.watch(&ctx.local_root, RecursiveMode::Recursive)?;

		let handlers = self.handlers.clone();
		let task = tokio::spawn(async move {
			let _watcher = watcher;
			while let Some(res) = rx.recv().await {
				let event = match res {
					Ok(event) => event,
					Err(e) => {
						tracing::error!(unit = %ctx.unit, "watch error: {}", e);
						continue;
					}
				};
				if matches!(event.kind, EventKind::Access(_)) {
					continue;
				}
				for path in &event.paths {
					if let Err(e) = execute_handlers(&handlers, path, &ctx).await {
						tracing::error!(unit = %ctx.unit, "handler failed for {}: {}", path.display(), e);
					}
				}
			}
		});

		Ok(WatchSession { task })
	}

	/// Run this slot's file-watch handlers for one changed path.
	pub async fn execute_handlers(&self, path: &Path, ctx: &WatchContext) -> Result<(), BackendError> {
		execute_handlers(&self.handlers, path, ctx).await
	}

	pub fn is_watching(&self) -> bool {
		self.lock_watch().is_some()
	}

	/// Drop the file-watch left behind by an earlier run, if any.
	pub fn release(&self) {
		if self.lock_watch().take().is_some() {
			tracing::debug!(slot = %self.name, "stopped watcher");
		}
	}

	fn lock_watch(&self) -> std::sync::MutexGuard<'_, Option<WatchSession>> {
		self.watch.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	async fn start_docker(&self, index: usize, unit: &dyn UnitContext, state: &mut UnitState) -> Result<(), UnitError> {
		if self.provider.image.is_empty() {
			return Err(BackendError::NoImage.into());
		}
		let host = self.docker_host();
		let backends = unit.backends();
		let runtime = &backends.containers;

		let ports = self
			.provider
			.ports
			.iter()
			.map(|p| PortBinding::parse(p))
			.collect::<Result<Vec<_>, _>>()?;
		let mounts = self
			.provider
			.volumes
			.iter()
			.map(|v| Mount::parse(v))
			.collect::<Result<Vec<_>, _>>()?;

		let mut image = self.provider.image.clone();
		if !runtime.image_exists(host, &image).await? {
			let auth = match self.provider.auth_provider() {
				Some(name) => {
					let auth = backends.auth_provider(name);
					if auth.is_none() {
						tracing::warn!(unit = %unit.name(), "unknown auth provider {:?}, pulling without credentials", name);
					}
					auth
				}
				None => None,
			};

			if let Some(auth) = auth {
				image = resolve_image(&**auth, &image).await?;
			}
			tracing::info!(unit = %unit.name(), "image {:?} not found locally, trying to pull...", image);

			let credentials = match auth {
				Some(auth) if auth.handles(&image) => Some(auth.credentials(&image).await?),
				_ => None,
			};
			runtime.pull_image(host, &image, credentials.as_ref()).await?;
		}

		let spec = ContainerSpec {
			name: unit.name().to_string(),
			image,
			ports,
			mounts,
			environment: self.provider.environment.clone(),
		};
		tracing::debug!(unit = %unit.name(), "creating container for image: {}", spec.image);
		let id = runtime.create_container(host, &spec).await?;
		runtime.start_container(host, unit.name()).await?;

		state.status = Some(Status::running(None, None));
		state.active_slot = Some(index);
		unit.status_cell().notify(UnitEvent::Started);

		tracing::info!(unit = %unit.name(), slot = %self.name, "begun as container {}", id);
		Ok(())
	}

	async fn stop_bash(&self, unit: &dyn UnitContext, state: &mut UnitState, remote: bool) -> Result<(), UnitError> {
		if remote {
			self.release();
		}

		if let Some(status) = state.status.as_mut() {
			if let Some(process) = status.take_process() {
				let pid = process.pid();
				let outcome = process.terminate().await;
				tracing::debug!(unit = %unit.name(), pid, ?outcome, "process terminated");
			}
			status.close_output();
			status.stop();
		}
		state.active_slot = None;
		unit.status_cell().notify(UnitEvent::Stopped);
		Ok(())
	}

	async fn stop_docker(&self, unit: &dyn UnitContext, state: &mut UnitState) -> Result<(), UnitError> {
		let host = self.docker_host();
		let runtime = &unit.backends().containers;
		runtime.stop_container(host, unit.name()).await?;
		runtime.remove_container(host, unit.name()).await?;

		if let Some(status) = state.status.as_mut() {
			status.stop();
		}
		state.active_slot = None;
		unit.status_cell().notify(UnitEvent::Stopped);
		Ok(())
	}

	/// Re-derive the run state of a docker slot from the container runtime.
	pub async fn inspect(&self, index: usize, unit: &dyn UnitContext, state: &mut UnitState) -> Result<(), UnitError> {
		if !self.is_docker() {
			return Ok(());
		}
		let exists = unit
			.backends()
			.containers
			.container_exists(self.docker_host(), unit.name())
			.await?;

		if exists {
			if !(state.has_status(UnitStatus::Running) && state.active_slot == Some(index)) {
				state.status = Some(Status::running(None, None));
				state.active_slot = Some(index);
			}
		} else if !state.has_status(UnitStatus::Stopped) {
			state.status = None;
			state.active_slot = None;
		}
		Ok(())
	}

	/// Provider problems, each located at `unit.<unit>.slot.<slot>.provider`.
	pub fn validate(&self, unit: &str) -> Vec<PathError> {
		self.provider
			.validate()
			.into_iter()
			.map(|source| PathError {
				path: vec![
					"unit".to_string(),
					unit.to_string(),
					"slot".to_string(),
					self.name.clone(),
					"provider".to_string(),
				],
				source,
			})
			.collect()
	}
}

fn compile_handlers(provider: &ProviderSpec) -> Vec<Handler> {
	provider
		.handlers
		.iter()
		.filter_map(|h| {
			let kind = match h.kind.as_str() {
				RSYNC_REMOTE => HandlerKind::Rsync,
				EXECUTE_REMOTE => HandlerKind::Execute,
				other => {
					tracing::warn!("skipping unknown handler {:?}", other);
					return None;
				}
			};
			let pattern = match h.pattern() {
				Some((pattern, selects)) => match Regex::new(pattern) {
					Ok(regex) => Some((regex, selects)),
					Err(e) => {
						tracing::warn!("skipping handler with invalid pattern {:?}: {}", pattern, e);
						return None;
					}
				},
				None => None,
			};
			Some(Handler {
				kind,
				pattern,
				cmd: h.cmd.clone(),
			})
		})
		.collect()
}

/// Handlers run in declaration order. A matching rsync handler syncs and ends
/// the evaluation; execute handlers run and evaluation continues.
async fn execute_handlers(handlers: &[Handler], path: &Path, ctx: &WatchContext) -> Result<(), BackendError> {
	let path_str = path.to_string_lossy();
	for handler in handlers {
		if !handler.matches(&path_str) {
			continue;
		}

		match handler.kind {
			HandlerKind::Rsync => {
				let remote_dir = rsync::remote_path(path, &ctx.local_root, &ctx.remote.working_dir);
				return ctx.sync.sync(path, &ctx.remote, &remote_dir, &ctx.output).await;
			}
			HandlerKind::Execute => {
				let line = CommandLine::remote(&handler.cmd, &ctx.remote)?;
				ctx.sync.execute(&ctx.remote, &line, &ctx.output).await?;
			}
		}
	}
	Ok(())
}

/// Pin an untagged image hosted by `auth` to its most recent tag.
async fn resolve_image(auth: &dyn RegistryAuth, image: &str) -> Result<String, BackendError> {
	if !auth.handles(image) || has_tag(image) {
		return Ok(image.to_string());
	}
	match auth.latest_tag(image).await? {
		Some(tag) => Ok(format!("{}:{}", image, tag)),
		None => Ok(image.to_string()),
	}
}

fn has_tag(image: &str) -> bool {
	image
		.rsplit('/')
		.next()
		.is_some_and(|last| last.contains(':') || last.contains('@'))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::provider::HandlerInfo;

	fn slot(name: &str, resolver: &[(&str, &str)]) -> Slot {
		Slot::new(SlotDef {
			name: name.to_string(),
			provider: ProviderSpec {
				kind: "bash/local".into(),
				cmd: "sleep 10".into(),
				..Default::default()
			},
			resolver: resolver
				.iter()
				.map(|(k, v)| (k.to_string(), v.to_string()))
				.collect(),
		})
	}

	#[test]
	fn default_resolver() {
		assert!(slot("a", &[("type", "default")]).is_default());
		assert!(!slot("a", &[]).is_default());
		assert!(!slot("a", &[("type", "keyword/value")]).is_default());
	}

	#[test]
	fn keyword_resolver() {
		let store = Store::ephemeral();
		let s = slot("dev", &[("type", "keyword/value"), ("keyword", "env"), ("value", "dev")]);
		assert_eq!(s.keyword(), Some("env"));
		assert!(!s.resolve(&store));

		store.put("env", "prod").unwrap();
		assert!(!s.resolve(&store));
		store.put("env", "dev").unwrap();
		assert!(s.resolve(&store));
	}

	#[test]
	fn slots_without_keyword_never_resolve() {
		let store = Store::ephemeral();
		store.put("", "").unwrap();
		assert!(!slot("a", &[]).resolve(&store));
		assert!(!slot("a", &[("type", "default")]).resolve(&store));
		assert_eq!(slot("a", &[("type", "default"), ("keyword", "env")]).keyword(), None);
	}

	#[test]
	fn validation_errors_carry_their_path() {
		let s = Slot::new(SlotDef {
			name: "dev".into(),
			provider: ProviderSpec {
				kind: "docker/local".into(),
				..Default::default()
			},
			resolver: BTreeMap::new(),
		});
		let errs = s.validate("app");
		assert_eq!(errs.len(), 1);
		assert_eq!(
			errs[0].to_string(),
			"[unit.app.slot.dev.provider] [docker/*] must provide docker image"
		);
	}

	#[test]
	fn image_tags() {
		assert!(has_tag("redis:7"));
		assert!(has_tag("repo/app@sha256:abc"));
		assert!(!has_tag("redis"));
		assert!(!has_tag("localhost:5000/app"));
	}

	#[test]
	fn handler_matching() {
		let provider = ProviderSpec {
			handlers: vec![
				HandlerInfo {
					kind: RSYNC_REMOTE.into(),
					matches: "\\.js$".into(),
					..Default::default()
				},
				HandlerInfo {
					kind: EXECUTE_REMOTE.into(),
					exclude: "\\.md$".into(),
					cmd: "make".into(),
					..Default::default()
				},
				HandlerInfo {
					kind: "bogus".into(),
					..Default::default()
				},
			],
			..Default::default()
		};
		let handlers = compile_handlers(&provider);
		assert_eq!(handlers.len(), 2);
		assert!(handlers[0].matches("/src/a.js"));
		assert!(!handlers[0].matches("/src/a.md"));
		assert!(handlers[1].matches("/src/a.js"));
		assert!(!handlers[1].matches("/src/README.md"));
	}
}
