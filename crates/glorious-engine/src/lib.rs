//! Supervision engine for glorious.
//!
//! A [`Registry`] is built from a TOML [`config::Document`]: units in
//! declaration order, each with one or more [`Slot`]s. Starting a unit starts
//! its dependencies first, then resolves which slot to run against the
//! [`Store`] and dispatches to the slot's provider backend.

pub mod backend;
pub mod config;
pub mod error;
pub mod graph;
pub mod output;
pub mod provider;
pub mod registry;
pub mod slot;
pub mod status;
pub mod store;
pub mod tokens;
pub mod unit;

pub use backend::Backends;
pub use config::{DaemonSettings, Document};
pub use error::{BackendError, ConfigError, PathError, ProviderError, StoreError, UnitError};
pub use registry::{Registry, Services};
pub use slot::Slot;
pub use status::{UnitEvent, UnitStatus};
pub use store::Store;
pub use tokens::TailTokens;
pub use unit::Unit;
