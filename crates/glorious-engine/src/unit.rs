use std::fs::File;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;

use crate::backend::Backends;
use crate::config::UnitDef;
use crate::error::{PathError, UnitError};
use crate::output;
use crate::registry::Services;
use crate::slot::{Slot, UnitContext};
use crate::status::{StatusCell, UnitStatus};
use crate::store::Store;

pub type StartFuture<'a> = Pin<Box<dyn Future<Output = Result<(), UnitError>> + Send + 'a>>;

/// A supervised unit: its slots, its resolved dependencies and its run state.
pub struct Unit {
	pub name: String,
	pub description: String,
	pub groups: Vec<String>,
	pub slots: Vec<Slot>,
	depends_on: Vec<Arc<Unit>>,
	cell: Arc<StatusCell>,
	services: Arc<Services>,
}

impl std::fmt::Debug for Unit {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Unit")
			.field("name", &self.name)
			.field("slots", &self.slots)
			.field(
				"depends_on",
				&self.depends_on.iter().map(|d| d.name.as_str()).collect::<Vec<_>>(),
			)
			.finish()
	}
}

impl Unit {
	pub fn new(def: UnitDef, depends_on: Vec<Arc<Unit>>, services: Arc<Services>) -> Self {
		Self {
			name: def.name,
			description: def.description,
			groups: def.groups,
			slots: def.slots.into_iter().map(Slot::new).collect(),
			depends_on,
			cell: StatusCell::new(),
			services,
		}
	}

	pub fn dependencies(&self) -> &[Arc<Unit>] {
		&self.depends_on
	}

	pub async fn status(&self) -> UnitStatus {
		self.cell.lock().await.current()
	}

	pub async fn has_status(&self, status: UnitStatus) -> bool {
		self.cell.lock().await.has_status(status)
	}

	/// Index of the slot currently running (or last run) for this unit.
	pub async fn active_slot(&self) -> Option<usize> {
		self.cell.lock().await.active_slot
	}

	/// Pick the slot to run. Resolvers are all evaluated, then the last slot
	/// whose resolver holds wins; otherwise the default slot, else the first.
	pub fn identify_slot(&self) -> Result<(usize, &Slot), UnitError> {
		match self.slots.len() {
			0 => return Err(UnitError::NoSlots),
			1 => return Ok((0, &self.slots[0])),
			_ => {}
		}

		let mut default = None;
		let mut resolved = Vec::with_capacity(self.slots.len());
		for (i, slot) in self.slots.iter().enumerate() {
			if slot.is_default() {
				if default.is_some() {
					return Err(UnitError::MultipleDefaults);
				}
				default = Some(i);
			}
			resolved.push(slot.resolve(self.store()));
		}

		let index = resolved
			.iter()
			.rposition(|&hit| hit)
			.or(default)
			.unwrap_or(0);
		Ok((index, &self.slots[index]))
	}

	/// Start every dependency that is not running, depth first, then this unit.
	pub fn start(&self) -> StartFuture<'_> {
		Box::pin(async move {
			tracing::debug!(unit = %self.name, "unit has {} dependencies", self.depends_on.len());
			for dependency in &self.depends_on {
				if dependency.has_status(UnitStatus::Running).await {
					tracing::debug!(unit = %self.name, dependency = %dependency.name, "dependency is running, no action");
					continue;
				}
				tracing::debug!(unit = %self.name, dependency = %dependency.name, "starting dependency");
				match dependency.start().await {
					Ok(()) | Err(UnitError::AlreadyRunning(_)) => {}
					Err(e) => return Err(e),
				}
			}

			self.start_slot().await
		})
	}

	async fn start_slot(&self) -> Result<(), UnitError> {
		tracing::debug!(unit = %self.name, "identifying slot");
		let (index, slot) = self.identify_slot()?;

		let mut state = self.cell.lock().await;
		match state.active_slot {
			Some(current) if state.has_status(UnitStatus::Running) => {
				if current == index {
					return Err(UnitError::AlreadyRunning(self.name.clone()));
				}
				if let Some(previous) = self.slots.get(current) {
					tracing::info!(unit = %self.name, "switching from slot {:?} to {:?}", previous.name, slot.name);
					if let Some(status) = state.status.as_ref() {
						status.mark_shutdown_requested();
					}
					previous.stop(self, &mut state).await?;
				}
			}
			Some(current) => {
				if let Some(previous) = self.slots.get(current) {
					previous.release();
				}
			}
			None => {}
		}

		tracing::debug!(unit = %self.name, "starting slot {:?}", slot.name);
		slot.start(index, self, &mut state).await
	}

	pub async fn stop(&self) -> Result<(), UnitError> {
		let mut state = self.cell.lock().await;
		match state.status.as_ref() {
			None => return Err(UnitError::StopStopped),
			Some(status) if status.is(UnitStatus::Stopped) => {
				return Err(UnitError::AlreadyStopped(self.name.clone()));
			}
			Some(status) => status.mark_shutdown_requested(),
		}

		let Some(slot) = state.active_slot.and_then(|i| self.slots.get(i)) else {
			if let Some(status) = state.status.as_mut() {
				status.stop();
			}
			return Ok(());
		};

		let result = slot.stop(self, &mut state).await;
		if result.is_err() {
			if let Some(status) = state.status.as_ref() {
				status.clear_shutdown_requested();
			}
		}
		result
	}

	/// Stop, then start. A unit that is not running is simply started.
	pub async fn restart(&self) -> Result<(), UnitError> {
		match self.stop().await {
			Ok(()) | Err(UnitError::StopStopped) | Err(UnitError::AlreadyStopped(_)) => {}
			Err(e) => return Err(e),
		}
		self.start().await
	}

	/// Status string for reports; docker slots are re-inspected first.
	pub async fn process_status(&self) -> UnitStatus {
		let mut state = self.cell.lock().await;
		let target = match state.active_slot {
			Some(index) => self.slots.get(index).map(|slot| (index, slot)),
			None => self.identify_slot().ok(),
		};

		if let Some((index, slot)) = target.filter(|(_, slot)| slot.is_docker()) {
			if let Err(e) = slot.inspect(index, self, &mut state).await {
				tracing::warn!(unit = %self.name, "failed to inspect container: {}", e);
			}
		}
		state.current()
	}

	/// Pick up containers left running by a previous daemon.
	pub async fn init(&self) -> Result<(), UnitError> {
		let (index, slot) = self.identify_slot()?;
		if !slot.is_docker() {
			return Ok(());
		}
		let mut state = self.cell.lock().await;
		slot.inspect(index, self, &mut state).await?;
		if state.has_status(UnitStatus::Running) {
			tracing::info!(unit = %self.name, "found running container");
		}
		Ok(())
	}

	pub fn validate(&self) -> Vec<PathError> {
		self.slots.iter().flat_map(|s| s.validate(&self.name)).collect()
	}
}

impl UnitContext for Unit {
	fn name(&self) -> &str {
		&self.name
	}

	fn status_cell(&self) -> &Arc<StatusCell> {
		&self.cell
	}

	fn output_file(&self) -> io::Result<File> {
		output::open_output(&self.services.paths.output_file(&self.name))
	}

	fn save_pid_file(&self, pid: u32) -> io::Result<()> {
		output::write_pid_file(&self.services.paths.pid_file(&self.name), pid)
	}

	fn store(&self) -> &Store {
		&self.services.store
	}

	fn backends(&self) -> &Backends {
		&self.services.backends
	}
}
