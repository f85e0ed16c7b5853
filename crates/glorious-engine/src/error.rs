use std::io;
use std::path::PathBuf;

/// A provider definition that fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
	#[error("unknown provider")]
	UnknownProvider,
	#[error("[bash/remote] must provide, at least, both host and user")]
	BashRemoteMissingRemote,
	#[error("[bash/*] must provide command")]
	BashMissingCommand,
	#[error("[bash/*] provider does not support fields beyond cmd, workingDir, remote and resolver")]
	BashExtraneousFields,
	#[error("[docker/remote] must provide remote docker host")]
	DockerRemoteMissingRemote,
	#[error("[docker/*] must provide docker image")]
	DockerMissingImage,
	#[error("[docker/*] provider does not support cmd or workingDir")]
	DockerExtraneousFields,
	#[error("[handler] unknown handler type {0:?}")]
	UnknownHandler(String),
	#[error("[handler] invalid pattern {pattern:?}: {message}")]
	InvalidHandlerPattern { pattern: String, message: String },
}

/// A validation error located in the config, e.g. `unit.app.slot.dev.provider`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("[{}] {source}", .path.join("."))]
pub struct PathError {
	pub path: Vec<String>,
	pub source: ProviderError,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("failed to read {path}: {source}")]
	Read {
		path: PathBuf,
		#[source]
		source: io::Error,
	},
	#[error("failed to parse config: {0}")]
	Parse(#[from] toml::de::Error),
	#[error("duplicate unit {0:?}")]
	DuplicateUnit(String),
	#[error("invalid dependency {dependency:?} for unit {unit:?}")]
	UnknownDependency { unit: String, dependency: String },
	#[error("circular dependency detected: {}", .0.join(" -> "))]
	CircularDependency(Vec<String>),
	#[error("invalid config: {}", join_errors(.0))]
	Invalid(Vec<PathError>),
	#[error("invalid daemon address {0:?}")]
	Address(String),
	#[error("configuration was not loaded from a file")]
	NoSource,
}

fn join_errors(errs: &[PathError]) -> String {
	errs.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; ")
}

/// Failure of an external collaborator (process spawn, ssh, rsync, docker).
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
	#[error("`{program}` exited with {status}: {stderr}")]
	Command {
		program: String,
		status: String,
		stderr: String,
	},
	#[error("failed to run `{program}`: {source}")]
	Spawn {
		program: String,
		#[source]
		source: io::Error,
	},
	#[error(transparent)]
	Io(#[from] io::Error),
	#[error("cannot watch files for the provider: {0}")]
	Watch(#[from] notify::Error),
	#[error("invalid port spec {0:?}")]
	PortSpec(String),
	#[error("invalid volume spec {0:?}")]
	VolumeSpec(String),
	#[error("no image provided")]
	NoImage,
	#[error("no `cmd` provided")]
	NoCommand,
	#[error("no valid authorization returned")]
	NoAuthorization,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
	#[error("store io error: {0}")]
	Io(#[from] io::Error),
	#[error("store is not valid json: {0}")]
	Json(#[from] serde_json::Error),
}

/// Operational errors, returned to callers and never fatal to the daemon.
#[derive(Debug, thiserror::Error)]
pub enum UnitError {
	#[error("unit has no slots")]
	NoSlots,
	#[error("there can only be one default slot")]
	MultipleDefaults,
	#[error("{0} is already running")]
	AlreadyRunning(String),
	#[error("{0} is already stopped")]
	AlreadyStopped(String),
	#[error("cannot stop stopped unit")]
	StopStopped,
	#[error("no provider given")]
	NoProvider,
	#[error("unknown provider {0:?}")]
	UnknownProvider(String),
	#[error("unknown unit {0:?}, aborting")]
	UnknownUnit(String),
	#[error(transparent)]
	Backend(#[from] BackendError),
	#[error(transparent)]
	Store(#[from] StoreError),
}
