use std::fmt;
use std::fs::File;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, oneshot, Mutex, MutexGuard};

static NEXT_STATUS_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitStatus {
	NotStarted,
	Running,
	Stopped,
	Crashed,
}

impl UnitStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			UnitStatus::NotStarted => glorious_core::NOT_STARTED,
			UnitStatus::Running => glorious_core::RUNNING,
			UnitStatus::Stopped => glorious_core::STOPPED,
			UnitStatus::Crashed => glorious_core::CRASHED,
		}
	}
}

impl fmt::Display for UnitStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Broadcast to anyone following a unit (the tailer) when its run state changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitEvent {
	Started,
	Stopped,
	Crashed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
	Success,
	Failed(Option<i32>),
	Killed,
}

impl ExitOutcome {
	pub fn is_success(&self) -> bool {
		matches!(self, ExitOutcome::Success)
	}
}

/// Owned side of a supervised local process. The exit watcher holds the child;
/// this handle can ask it to kill the process group and wait for the reap.
/// Dropping the handle also kills the process.
#[derive(Debug)]
pub struct ProcessHandle {
	pid: u32,
	kill: Option<oneshot::Sender<()>>,
	exited: Option<oneshot::Receiver<ExitOutcome>>,
}

impl ProcessHandle {
	pub fn new(pid: u32, kill: oneshot::Sender<()>, exited: oneshot::Receiver<ExitOutcome>) -> Self {
		Self {
			pid,
			kill: Some(kill),
			exited: Some(exited),
		}
	}

	pub fn pid(&self) -> u32 {
		self.pid
	}

	pub async fn terminate(mut self) -> ExitOutcome {
		if let Some(kill) = self.kill.take() {
			let _ = kill.send(());
		}
		match self.exited.take() {
			Some(exited) => exited.await.unwrap_or(ExitOutcome::Killed),
			None => ExitOutcome::Killed,
		}
	}
}

/// Run state of one unit plus the handles backing it.
#[derive(Debug)]
pub struct Status {
	current: UnitStatus,
	id: u64,
	process: Option<ProcessHandle>,
	output: Option<File>,
	shutdown_requested: Arc<AtomicBool>,
}

impl Status {
	pub fn running(process: Option<ProcessHandle>, output: Option<File>) -> Self {
		Self {
			current: UnitStatus::Running,
			id: NEXT_STATUS_ID.fetch_add(1, Ordering::Relaxed),
			process,
			output,
			shutdown_requested: Arc::new(AtomicBool::new(false)),
		}
	}

	pub fn current(&self) -> UnitStatus {
		self.current
	}

	pub fn is(&self, status: UnitStatus) -> bool {
		self.current == status
	}

	/// Identity of this run; a watcher only touches the run it was spawned for.
	pub fn id(&self) -> u64 {
		self.id
	}

	pub fn pid(&self) -> Option<u32> {
		self.process.as_ref().map(|p| p.pid())
	}

	pub fn has_process(&self) -> bool {
		self.process.is_some()
	}

	pub fn take_process(&mut self) -> Option<ProcessHandle> {
		self.process.take()
	}

	pub fn close_output(&mut self) {
		self.output = None;
	}

	pub fn mark_shutdown_requested(&self) {
		self.shutdown_requested.store(true, Ordering::SeqCst);
	}

	pub fn clear_shutdown_requested(&self) {
		self.shutdown_requested.store(false, Ordering::SeqCst);
	}

	pub fn shutdown_requested(&self) -> bool {
		self.shutdown_requested.load(Ordering::SeqCst)
	}

	pub fn stop(&mut self) {
		self.current = UnitStatus::Stopped;
	}

	fn crash(&mut self) {
		self.current = UnitStatus::Crashed;
		self.process = None;
		self.output = None;
	}
}

impl fmt::Display for Status {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.current.fmt(f)
	}
}

#[derive(Debug, Default)]
pub struct UnitState {
	pub status: Option<Status>,
	pub active_slot: Option<usize>,
}

impl UnitState {
	pub fn has_status(&self, status: UnitStatus) -> bool {
		self.status.as_ref().is_some_and(|s| s.is(status))
	}

	pub fn current(&self) -> UnitStatus {
		self.status
			.as_ref()
			.map(Status::current)
			.unwrap_or(UnitStatus::NotStarted)
	}
}

/// Per-unit lock around [`UnitState`]. Every status mutation, including the
/// exit watcher's, goes through [`StatusCell::lock`].
#[derive(Debug)]
pub struct StatusCell {
	state: Mutex<UnitState>,
	events: broadcast::Sender<UnitEvent>,
}

impl Default for StatusCell {
	fn default() -> Self {
		let (events, _) = broadcast::channel(16);
		Self {
			state: Mutex::new(UnitState::default()),
			events,
		}
	}
}

impl StatusCell {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub async fn lock(&self) -> MutexGuard<'_, UnitState> {
		self.state.lock().await
	}

	pub fn subscribe(&self) -> broadcast::Receiver<UnitEvent> {
		self.events.subscribe()
	}

	pub fn notify(&self, event: UnitEvent) {
		let _ = self.events.send(event);
	}

	/// Transition applied by the exit watcher once the process of run
	/// `status_id` has been reaped.
	pub async fn record_exit(&self, status_id: u64, outcome: ExitOutcome) {
		let mut state = self.lock().await;
		let Some(status) = state.status.as_mut().filter(|s| s.id() == status_id) else {
			return;
		};

		if status.shutdown_requested() {
			status.clear_shutdown_requested();
			return;
		}

		let event = if outcome.is_success() {
			status.stop();
			status.take_process();
			status.close_output();
			UnitEvent::Stopped
		} else {
			status.crash();
			UnitEvent::Crashed
		};
		status.clear_shutdown_requested();
		drop(state);

		self.notify(event);
	}
}
