use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// How long an unclaimed tail token stays valid.
pub const TOKEN_RETENTION: Duration = Duration::from_secs(60 * 60);
pub const TOKEN_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug)]
struct Entry {
	units: Vec<String>,
	created: Instant,
}

/// Single-use tokens handed out by `TailProcesses` and redeemed by a tail
/// connection.
#[derive(Debug, Default)]
pub struct TailTokens {
	entries: Mutex<HashMap<String, Entry>>,
}

impl TailTokens {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
		self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	/// Mint a token for `units`. Tokens are 36-character UUIDs.
	pub fn create(&self, units: Vec<String>) -> String {
		let token = uuid::Uuid::new_v4().to_string();
		self.lock().insert(
			token.clone(),
			Entry {
				units,
				created: Instant::now(),
			},
		);
		token
	}

	/// Redeem a token. A token can only be exchanged once, and not after
	/// [`TOKEN_RETENTION`] has passed.
	pub fn exchange(&self, token: &str) -> Option<Vec<String>> {
		self.lock()
			.remove(token)
			.filter(|e| e.created.elapsed() < TOKEN_RETENTION)
			.map(|e| e.units)
	}

	pub fn sweep_older_than(&self, age: Duration) -> usize {
		let mut entries = self.lock();
		let before = entries.len();
		entries.retain(|_, e| e.created.elapsed() < age);
		before - entries.len()
	}

	pub fn sweep(&self) -> usize {
		self.sweep_older_than(TOKEN_RETENTION)
	}

	pub fn len(&self) -> usize {
		self.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Drop expired tokens every [`TOKEN_SWEEP_INTERVAL`] for as long as the
	/// daemon runs.
	pub async fn run_sweeper(self: Arc<Self>) {
		let mut interval = tokio::time::interval(TOKEN_SWEEP_INTERVAL);
		interval.tick().await;
		loop {
			interval.tick().await;
			let swept = self.sweep();
			if swept > 0 {
				tracing::debug!("swept {} expired tail tokens", swept);
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn tokens_are_single_use() {
		let tokens = TailTokens::new();
		let token = tokens.create(vec!["db".into(), "web".into()]);
		assert_eq!(token.len(), glorious_core::protocol::TAIL_TOKEN_LEN);
		assert_eq!(tokens.exchange(&token), Some(vec!["db".to_string(), "web".to_string()]));
		assert_eq!(tokens.exchange(&token), None);
		assert!(tokens.is_empty());
	}

	#[test]
	fn unknown_token() {
		assert_eq!(TailTokens::new().exchange("nope"), None);
	}

	#[test]
	fn expired_token_is_refused() {
		let tokens = TailTokens::new();
		let token = tokens.create(vec!["db".into()]);
		let Some(created) = Instant::now().checked_sub(TOKEN_RETENTION + Duration::from_secs(60)) else {
			return;
		};
		tokens.lock().get_mut(&token).unwrap().created = created;

		assert_eq!(tokens.exchange(&token), None);
		assert!(tokens.is_empty());
	}

	#[test]
	fn sweep_keeps_young_tokens() {
		let tokens = TailTokens::new();
		tokens.create(vec!["db".into()]);
		assert_eq!(tokens.sweep(), 0);
		assert_eq!(tokens.len(), 1);
		assert_eq!(tokens.sweep_older_than(Duration::ZERO), 1);
		assert!(tokens.is_empty());
	}
}
