mod common;

use std::path::Path;
use std::sync::Arc;

use common::{FakeRuntime, Harness, SyncCall};
use glorious_engine::slot::{UnitContext, WatchContext};
use glorious_engine::{ConfigError, Document, Registry, UnitStatus};

const DOCKER: &str = r#"
[[unit]]
name = "cache"
  [[unit.slot]]
  name = "docker"
  [unit.slot.provider]
  type = "docker/local"
  image = "redis:7"
  ports = ["127.0.0.1:6379:6379"]
  volumes = ["/tmp/cache:/data"]
  environment = ["MODE=test"]
"#;

#[tokio::test]
async fn docker_slot_lifecycle() {
	let h = Harness::with_runtime("docker", FakeRuntime::with_images(&["redis:7"]));
	let registry = h.registry(DOCKER);
	let cache = registry.unit("cache").unwrap().clone();

	cache.start().await.unwrap();
	assert_eq!(cache.status().await, UnitStatus::Running);
	{
		let state = h.runtime.state.lock().unwrap();
		assert!(state.pulls.is_empty());
		assert_eq!(state.created.len(), 1);
		let spec = &state.created[0];
		assert_eq!(spec.name, "cache");
		assert_eq!(spec.ports[0].host_port.as_deref(), Some("6379"));
		assert_eq!(spec.mounts[0].target, "/data");
		assert_eq!(spec.environment, vec!["MODE=test"]);
	}
	assert_eq!(cache.process_status().await, UnitStatus::Running);

	cache.stop().await.unwrap();
	assert_eq!(h.runtime.state.lock().unwrap().removed, vec!["cache"]);
	assert_eq!(cache.process_status().await, UnitStatus::Stopped);
}

#[tokio::test]
async fn container_removed_behind_our_back() {
	let h = Harness::with_runtime("vanished", FakeRuntime::with_images(&["redis:7"]));
	let registry = h.registry(DOCKER);
	let cache = registry.unit("cache").unwrap().clone();

	cache.start().await.unwrap();
	h.runtime.state.lock().unwrap().containers.clear();
	assert_eq!(cache.process_status().await, UnitStatus::NotStarted);
}

#[tokio::test]
async fn init_adopts_running_containers() {
	let h = Harness::new("adopt");
	h.runtime.state.lock().unwrap().containers.insert("cache".into());
	let registry = h.registry(DOCKER);
	registry.init().await;

	let cache = registry.unit("cache").unwrap();
	assert_eq!(cache.status().await, UnitStatus::Running);
	assert_eq!(cache.active_slot().await, Some(0));

	let reports = registry.status().await;
	assert_eq!(reports[0].status, glorious_core::RUNNING);
}

#[tokio::test]
async fn missing_image_is_pulled_with_the_latest_tag() {
	let h = Harness::new("pull");
	let registry = h.registry(
		r#"
[[unit]]
name = "app"
  [[unit.slot]]
  name = "docker"
  [unit.slot.provider]
  type = "docker/local"
  image = "registry.test/team/app"
  extra = { authProvider = "fake/registry" }
"#,
	);
	let app = registry.unit("app").unwrap().clone();
	app.start().await.unwrap();

	let state = h.runtime.state.lock().unwrap();
	assert_eq!(state.pulls.len(), 1);
	let (image, credentials) = &state.pulls[0];
	assert_eq!(image, "registry.test/team/app:v7");
	assert_eq!(credentials.as_ref().unwrap().username, "robot");
	assert_eq!(state.created[0].image, "registry.test/team/app:v7");
}

#[tokio::test]
async fn unknown_auth_provider_pulls_anonymously() {
	let h = Harness::new("anon");
	let registry = h.registry(
		r#"
[[unit]]
name = "app"
  [[unit.slot]]
  name = "docker"
  [unit.slot.provider]
  type = "docker/local"
  image = "registry.test/team/app"
  extra = { authProvider = "gcp/gcr" }
"#,
	);
	registry.unit("app").unwrap().start().await.unwrap();

	let state = h.runtime.state.lock().unwrap();
	assert_eq!(state.pulls, vec![("registry.test/team/app".to_string(), None)]);
}

#[tokio::test]
async fn failed_create_leaves_no_status() {
	let h = Harness::new("nocreate");
	let registry = h.registry(
		r#"
[[unit]]
name = "bad"
  [[unit.slot]]
  name = "docker"
  [unit.slot.provider]
  type = "docker/local"
  image = "redis:7"
  ports = ["not-a-port"]
"#,
	);
	let bad = registry.unit("bad").unwrap().clone();
	assert!(bad.start().await.is_err());
	assert_eq!(bad.status().await, UnitStatus::NotStarted);
	assert!(h.runtime.state.lock().unwrap().created.is_empty());
}

#[tokio::test]
async fn handlers_sync_or_execute() {
	let h = Harness::new("handlers");
	let registry = h.registry(
		r#"
[[unit]]
name = "remote"
  [[unit.slot]]
  name = "box"
  [unit.slot.provider]
  type = "bash/remote"
  cmd = "make run"
  workingDir = "/src/app"
  [unit.slot.provider.remote]
  host = "box.local"
  user = "dev"
  workingDir = "/srv/app"
  [[unit.slot.provider.handler]]
  type = "execute/remote"
  match = "\\.proto$"
  cmd = "make gen"
  [[unit.slot.provider.handler]]
  type = "rsync/remote"
  exclude = "\\.md$"
  [[unit.slot.provider.handler]]
  type = "execute/remote"
  match = ".*"
  cmd = "never reached"
"#,
	);
	let unit = registry.unit("remote").unwrap().clone();
	let slot = &unit.slots[0];
	let ctx = WatchContext {
		unit: unit.name.clone(),
		local_root: "/src/app".into(),
		remote: slot.provider.remote.clone(),
		sync: h.sync.clone(),
		output: Arc::new(unit.output_file().unwrap()),
	};

	slot.execute_handlers(Path::new("/src/app/api/service.proto"), &ctx)
		.await
		.unwrap();
	slot.execute_handlers(Path::new("/src/app/README.md"), &ctx).await.unwrap();

	let calls = h.sync.calls.lock().unwrap().clone();
	assert_eq!(calls.len(), 3);
	match &calls[0] {
		SyncCall::Execute { args } => {
			assert_eq!(args[0], "dev@box.local");
			assert!(args[1].starts_with("cd /srv/app; "));
			assert!(args[1].ends_with(" gen"));
		}
		other => panic!("unexpected call {:?}", other),
	}
	assert_eq!(
		calls[1],
		SyncCall::Sync {
			local: "/src/app/api/service.proto".into(),
			remote_dir: "/srv/app/api/service.proto".into(),
		}
	);
	match &calls[2] {
		SyncCall::Execute { args } => assert!(args[1].ends_with("never reached")),
		other => panic!("unexpected call {:?}", other),
	}
}

#[test]
fn cycles_are_rejected_at_load() {
	let h = Harness::new("cycle");
	let doc = Document::parse(
		r#"
[[unit]]
name = "a"
depends_on = ["b"]
[[unit]]
name = "b"
depends_on = ["a"]
"#,
	)
	.unwrap();
	let err = Registry::from_document(doc, h.services.clone()).err().unwrap();
	assert_eq!(err.to_string(), "circular dependency detected: a -> b -> a");
}

#[test]
fn unknown_dependency_is_rejected_at_load() {
	let h = Harness::new("unknown-dep");
	let doc = Document::parse("[[unit]]\nname = \"a\"\ndepends_on = [\"ghost\"]\n").unwrap();
	assert!(matches!(
		Registry::from_document(doc, h.services.clone()),
		Err(ConfigError::UnknownDependency { .. })
	));
}

#[test]
fn provider_problems_are_collected_with_paths() {
	let h = Harness::new("invalid");
	let doc = Document::parse(
		r#"
[[unit]]
name = "web"
  [[unit.slot]]
  name = "remote"
  [unit.slot.provider]
  type = "bash/remote"
  cmd = "run"
  [[unit.slot]]
  name = "pod"
  [unit.slot.provider]
  type = "k8s/pod"
"#,
	)
	.unwrap();
	let err = Registry::from_document(doc, h.services.clone()).err().unwrap();
	let ConfigError::Invalid(problems) = err else {
		panic!("expected invalid config, got {err}");
	};
	let messages: Vec<String> = problems.iter().map(|p| p.to_string()).collect();
	assert_eq!(
		messages,
		vec![
			"[unit.web.slot.remote.provider] [bash/remote] must provide, at least, both host and user",
			"[unit.web.slot.pod.provider] unknown provider",
		]
	);
}

#[test]
fn loading_from_disk_remembers_the_source() {
	let h = Harness::new("load");
	let path = h.home.join("glorious.toml");
	std::fs::write(&path, DOCKER).unwrap();

	let registry = Registry::load(&path, h.services.clone()).unwrap();
	assert_eq!(registry.source(), Some(path.as_path()));
	let token = registry.tokens().create(vec!["cache".into()]);

	std::fs::write(&path, format!("{DOCKER}\n[[unit]]\nname = \"extra\"\n  [[unit.slot]]\n  name = \"s\"\n  [unit.slot.provider]\n  type = \"bash/local\"\n  cmd = \"true\"\n")).unwrap();
	let reloaded = registry.reload().unwrap();
	assert_eq!(reloaded.units().len(), 2);
	assert_eq!(reloaded.tokens().exchange(&token), Some(vec!["cache".to_string()]));
}
