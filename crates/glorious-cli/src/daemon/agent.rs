use std::collections::BTreeMap;
use std::sync::Arc;

use glorious_core::{Request, Response};
use glorious_engine::{Registry, Unit, UnitError};
use tokio::sync::RwLock;

/// RPC façade over the loaded registry. Every failure is returned to the
/// client as a string inside the response.
pub struct Agent {
	registry: RwLock<Arc<Registry>>,
}

impl Agent {
	pub fn new(registry: Registry) -> Self {
		Self {
			registry: RwLock::new(Arc::new(registry)),
		}
	}

	/// The registry currently in service. Reloads swap it out wholesale.
	pub async fn registry(&self) -> Arc<Registry> {
		Arc::clone(&*self.registry.read().await)
	}

	pub async fn handle(&self, request: Request) -> Response {
		tracing::debug!("Agent.{} called", request.method());

		match request {
			Request::Greet { names } => Response::Greeting {
				message: format!("Hello, {}", names.join(" ")),
			},
			Request::Config => Response::Config {
				units: self.registry().await.config(),
			},
			Request::Status => Response::Status {
				units: self.registry().await.status().await,
			},
			Request::Reload => Response::done(self.reload().await),
			Request::StartUnit { name } => {
				Response::done(self.each_target(&name, |unit| async move { unit.start().await }).await)
			}
			Request::StopUnit { name } => {
				Response::done(self.each_target(&name, |unit| async move { unit.stop().await }).await)
			}
			Request::RestartUnit { name } => {
				Response::done(self.each_target(&name, |unit| async move { unit.restart().await }).await)
			}
			Request::StorePutValue { key, value } => {
				let registry = self.registry().await;
				match registry.put_store_value(&key, &value) {
					Ok(()) => {
						registry.assert_key_change(&key).await;
						Response::done(Ok(()))
					}
					Err(e) => Response::done(Err(e.to_string())),
				}
			}
			Request::StoreGetValues { keys } => {
				let registry = self.registry().await;
				let values: BTreeMap<String, String> = keys
					.into_iter()
					.map(|key| {
						let value = registry.store().lookup(&key);
						(key, value)
					})
					.collect();
				Response::Values { values }
			}
			Request::TailProcesses { names } => match self.tail_token(names).await {
				Ok(token) => Response::TailToken {
					token: Some(token),
					error: None,
				},
				Err(error) => Response::TailToken {
					token: None,
					error: Some(error),
				},
			},
		}
	}

	async fn reload(&self) -> Result<(), String> {
		let current = self.registry().await;
		let next = current.reload().map_err(|e| e.to_string())?;
		next.init().await;
		*self.registry.write().await = Arc::new(next);
		tracing::info!("configuration reloaded");
		Ok(())
	}

	/// Apply `op` to the unit named `name`, or to every member of the group.
	/// The first failure aborts the rest.
	async fn each_target<F, Fut>(&self, name: &str, op: F) -> Result<(), String>
	where
		F: Fn(Arc<Unit>) -> Fut,
		Fut: std::future::Future<Output = Result<(), UnitError>>,
	{
		let registry = self.registry().await;
		let units = registry
			.resolve_targets(name)
			.map_err(|_| "unknown unit".to_string())?;
		for unit in units {
			let unit_name = unit.name.clone();
			op(unit).await.map_err(|e| {
				tracing::warn!(unit = %unit_name, "{}", e);
				e.to_string()
			})?;
		}
		Ok(())
	}

	async fn tail_token(&self, names: Vec<String>) -> Result<String, String> {
		if names.is_empty() {
			return Err("must provide at least one unit to tail".to_string());
		}
		let registry = self.registry().await;
		let unknown: Vec<&str> = names
			.iter()
			.filter(|n| registry.unit(n).is_none())
			.map(String::as_str)
			.collect();
		if !unknown.is_empty() {
			return Err(format!("unknown units: {}", unknown.join(", ")));
		}
		Ok(registry.tokens().create(names))
	}
}
