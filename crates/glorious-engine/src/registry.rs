use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use glorious_core::{GloriousPaths, UnitConfig, UnitReport};

use crate::backend::Backends;
use crate::config::{DaemonSettings, Document};
use crate::error::{ConfigError, StoreError, UnitError};
use crate::graph::DependencyGraph;
use crate::status::UnitStatus;
use crate::store::Store;
use crate::tokens::TailTokens;
use crate::unit::Unit;

/// Long-lived collaborators shared by every unit. Built once at daemon start
/// and carried across reloads.
pub struct Services {
	pub store: Arc<Store>,
	pub backends: Backends,
	pub paths: GloriousPaths,
}

impl Services {
	pub fn new(store: Arc<Store>, backends: Backends, paths: GloriousPaths) -> Arc<Self> {
		Arc::new(Self { store, backends, paths })
	}
}

/// The loaded configuration: units in declaration order, their groups and the
/// tail-token table.
pub struct Registry {
	units: Vec<Arc<Unit>>,
	groups: BTreeMap<String, Vec<String>>,
	daemon: DaemonSettings,
	tokens: Arc<TailTokens>,
	services: Arc<Services>,
	source: Option<PathBuf>,
}

impl Registry {
	pub fn load(path: &Path, services: Arc<Services>) -> Result<Self, ConfigError> {
		let doc = Document::load(path)?;
		let mut registry = Self::from_document(doc, services)?;
		registry.source = Some(path.to_path_buf());
		Ok(registry)
	}

	pub fn from_document(doc: Document, services: Arc<Services>) -> Result<Self, ConfigError> {
		let mut seen = HashSet::new();
		for unit in &doc.units {
			if !seen.insert(unit.name.as_str()) {
				return Err(ConfigError::DuplicateUnit(unit.name.clone()));
			}
		}

		let graph = DependencyGraph::build(&doc.units)?;
		let order = graph.topological_order()?;

		let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
		for unit in &doc.units {
			for group in &unit.groups {
				groups.entry(group.clone()).or_default().push(unit.name.clone());
			}
		}

		let mut defs: Vec<_> = doc.units.into_iter().map(Some).collect();
		let mut built: Vec<Option<Arc<Unit>>> = vec![None; defs.len()];
		for index in order {
			let Some(def) = defs[index].take() else {
				continue;
			};
			let deps = graph
				.dependencies(index)
				.iter()
				.filter_map(|&d| built[d].clone())
				.collect();
			built[index] = Some(Arc::new(Unit::new(def, deps, Arc::clone(&services))));
		}
		let units: Vec<Arc<Unit>> = built.into_iter().flatten().collect();

		let problems: Vec<_> = units.iter().flat_map(|u| u.validate()).collect();
		if !problems.is_empty() {
			return Err(ConfigError::Invalid(problems));
		}

		Ok(Self {
			units,
			groups,
			daemon: doc.daemon,
			tokens: TailTokens::new(),
			services,
			source: None,
		})
	}

	/// Re-read the source document. Outstanding tail tokens stay valid.
	pub fn reload(&self) -> Result<Self, ConfigError> {
		let Some(source) = &self.source else {
			return Err(ConfigError::NoSource);
		};
		let registry = Self::load(source, Arc::clone(&self.services))?;
		Ok(registry.with_tokens(Arc::clone(&self.tokens)))
	}

	pub fn with_tokens(mut self, tokens: Arc<TailTokens>) -> Self {
		self.tokens = tokens;
		self
	}

	pub fn units(&self) -> &[Arc<Unit>] {
		&self.units
	}

	pub fn unit(&self, name: &str) -> Option<&Arc<Unit>> {
		self.units.iter().find(|u| u.name == name)
	}

	pub fn group(&self, name: &str) -> Option<&[String]> {
		self.groups.get(name).map(Vec::as_slice)
	}

	/// A unit name, or a group name expanded to its members.
	pub fn resolve_targets(&self, name: &str) -> Result<Vec<Arc<Unit>>, UnitError> {
		if let Some(unit) = self.unit(name) {
			return Ok(vec![Arc::clone(unit)]);
		}
		match self.group(name) {
			Some(members) => Ok(members.iter().filter_map(|m| self.unit(m)).cloned().collect()),
			None => Err(UnitError::UnknownUnit(name.to_string())),
		}
	}

	pub fn store(&self) -> &Store {
		&self.services.store
	}

	pub fn put_store_value(&self, key: &str, value: &str) -> Result<(), StoreError> {
		self.services.store.put(key, value)?;
		tracing::debug!("store {} = {}", key, value);
		Ok(())
	}

	/// Restart every running unit with a `keyword/value` slot on `key`.
	/// Failures are logged per unit.
	pub async fn assert_key_change(&self, key: &str) {
		for unit in &self.units {
			if !unit.slots.iter().any(|s| s.keyword() == Some(key)) {
				continue;
			}
			if !unit.has_status(UnitStatus::Running).await {
				tracing::debug!(unit = %unit.name, "keyword {:?} changed, unit not running", key);
				continue;
			}
			tracing::info!(unit = %unit.name, "keyword {:?} changed, restarting", key);
			if let Err(e) = unit.restart().await {
				tracing::error!(unit = %unit.name, "restart failed: {}", e);
			}
		}
	}

	/// Probe docker slots for containers left behind by an earlier daemon.
	pub async fn init(&self) {
		for unit in &self.units {
			if let Err(e) = unit.init().await {
				tracing::error!(unit = %unit.name, "init failed: {}", e);
			}
		}
	}

	pub fn config(&self) -> Vec<UnitConfig> {
		self.units
			.iter()
			.map(|u| UnitConfig {
				name: u.name.clone(),
				num_slots: u.slots.len(),
				description: u.description.clone(),
			})
			.collect()
	}

	pub async fn status(&self) -> Vec<UnitReport> {
		let mut reports = Vec::with_capacity(self.units.len());
		for unit in &self.units {
			reports.push(UnitReport {
				name: unit.name.clone(),
				groups: unit.groups.clone(),
				status: unit.process_status().await.to_string(),
			});
		}
		reports
	}

	pub fn tokens(&self) -> &Arc<TailTokens> {
		&self.tokens
	}

	pub fn daemon(&self) -> &DaemonSettings {
		&self.daemon
	}

	pub fn source(&self) -> Option<&Path> {
		self.source.as_deref()
	}

	pub fn services(&self) -> &Arc<Services> {
		&self.services
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn services() -> Arc<Services> {
		Services::new(
			Arc::new(Store::ephemeral()),
			Backends::system(),
			GloriousPaths::with_home(std::env::temp_dir().join("glorious-registry-tests")),
		)
	}

	const DOC: &str = r#"
[[unit]]
name = "web"
groups = ["front"]
depends_on = ["api"]
  [[unit.slot]]
  name = "dev"
  [unit.slot.provider]
  type = "bash/local"
  cmd = "sleep 30"

[[unit]]
name = "api"
description = "backend"
groups = ["front", "back"]
depends_on = ["db"]
  [[unit.slot]]
  name = "dev"
  [unit.slot.provider]
  type = "bash/local"
  cmd = "sleep 30"

[[unit]]
name = "db"
groups = ["back"]
  [[unit.slot]]
  name = "local"
  [unit.slot.provider]
  type = "bash/local"
  cmd = "sleep 30"
"#;

	fn registry() -> Registry {
		Registry::from_document(Document::parse(DOC).unwrap(), services()).unwrap()
	}

	#[test]
	fn units_keep_declaration_order() {
		let r = registry();
		let names: Vec<&str> = r.units().iter().map(|u| u.name.as_str()).collect();
		assert_eq!(names, vec!["web", "api", "db"]);

		let web = r.unit("web").unwrap();
		assert_eq!(web.dependencies()[0].name, "api");
		assert_eq!(web.dependencies()[0].dependencies()[0].name, "db");
		assert!(Arc::ptr_eq(&web.dependencies()[0], r.unit("api").unwrap()));
	}

	#[test]
	fn groups_expand_in_declaration_order() {
		let r = registry();
		assert_eq!(r.group("front").unwrap(), &["web".to_string(), "api".to_string()]);
		let back: Vec<String> = r
			.resolve_targets("back")
			.unwrap()
			.iter()
			.map(|u| u.name.clone())
			.collect();
		assert_eq!(back, vec!["api", "db"]);
		assert_eq!(r.resolve_targets("db").unwrap().len(), 1);
		assert!(matches!(r.resolve_targets("nope"), Err(UnitError::UnknownUnit(_))));
	}

	#[test]
	fn config_snapshot() {
		let config = registry().config();
		assert_eq!(config[1].name, "api");
		assert_eq!(config[1].num_slots, 1);
		assert_eq!(config[1].description, "backend");
	}

	#[test]
	fn duplicate_names_are_rejected() {
		let doc = Document::parse("[[unit]]\nname = \"a\"\n[[unit]]\nname = \"a\"\n").unwrap();
		assert!(matches!(
			Registry::from_document(doc, services()),
			Err(ConfigError::DuplicateUnit(name)) if name == "a"
		));
	}

	#[test]
	fn reload_without_source_fails() {
		assert!(registry().reload().is_err());
	}

	#[tokio::test]
	async fn status_of_fresh_units() {
		let reports = registry().status().await;
		assert_eq!(reports.len(), 3);
		assert!(reports.iter().all(|r| r.status == glorious_core::NOT_STARTED));
		assert_eq!(reports[1].groups, vec!["front", "back"]);
	}
}
