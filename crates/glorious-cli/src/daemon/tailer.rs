use std::sync::Arc;
use std::time::Duration;

use glorious_core::protocol::TAIL_TOKEN_LEN;
use glorious_engine::output::OutputFollower;
use glorious_engine::slot::UnitContext;
use glorious_engine::{Registry, UnitEvent};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Serve one tail session: redeem the token, then push every named unit's new
/// output as `<unit>| <line>` until one of them stops or the client leaves.
pub async fn serve<S>(stream: S, registry: Arc<Registry>)
where
	S: AsyncRead + AsyncWrite + Unpin,
{
	let (mut reader, mut writer) = tokio::io::split(stream);

	let mut token = [0u8; TAIL_TOKEN_LEN];
	if let Err(e) = reader.read_exact(&mut token).await {
		tracing::error!("failed to read tail token: {}", e);
		return;
	}
	let token = String::from_utf8_lossy(&token).into_owned();
	let Some(names) = registry.tokens().exchange(&token) else {
		tracing::error!("invalid tail token {:?}", token);
		return;
	};
	tracing::debug!("tailing {:?}", names);

	let (stopped_tx, mut stopped_rx) = mpsc::channel(names.len().max(1));
	let mut watchers = JoinSet::new();
	let mut followers = Vec::with_capacity(names.len());
	for name in names {
		let Some(unit) = registry.unit(&name) else {
			tracing::warn!(unit = %name, "unit disappeared before tailing began");
			continue;
		};
		let path = registry.services().paths.output_file(&name);
		match OutputFollower::from_end(path).await {
			Ok(follower) => followers.push((name.clone(), follower)),
			Err(e) => {
				tracing::error!(unit = %name, "cannot follow output: {}", e);
				return;
			}
		}
		watchers.spawn(wait_for_shutdown(name, unit.status_cell().subscribe(), stopped_tx.clone()));
	}
	drop(stopped_tx);

	let mut interval = tokio::time::interval(POLL_INTERVAL);
	let mut scratch = [0u8; 64];
	loop {
		tokio::select! {
			_ = interval.tick() => {
				if let Err(e) = flush(&mut followers, &mut writer).await {
					tracing::debug!("tail client went away: {}", e);
					break;
				}
			}
			stopped = stopped_rx.recv() => {
				if let Some(name) = stopped {
					tracing::debug!(unit = %name, "unit shut down, closing tail");
				}
				let _ = flush(&mut followers, &mut writer).await;
				break;
			}
			read = reader.read(&mut scratch) => {
				if matches!(read, Ok(0) | Err(_)) {
					break;
				}
			}
		}
	}

	let _ = writer.shutdown().await;
	watchers.abort_all();
}

async fn wait_for_shutdown(name: String, mut events: broadcast::Receiver<UnitEvent>, stopped: mpsc::Sender<String>) {
	loop {
		match events.recv().await {
			Ok(UnitEvent::Stopped | UnitEvent::Crashed) => {
				let _ = stopped.send(name).await;
				return;
			}
			Ok(UnitEvent::Started) | Err(broadcast::error::RecvError::Lagged(_)) => {}
			Err(broadcast::error::RecvError::Closed) => return,
		}
	}
}

async fn flush<W>(followers: &mut [(String, OutputFollower)], writer: &mut W) -> std::io::Result<()>
where
	W: AsyncWrite + Unpin,
{
	for (name, follower) in followers.iter_mut() {
		let lines = match follower.poll_lines().await {
			Ok(lines) => lines,
			Err(e) => {
				tracing::warn!(unit = %name, "failed reading {}: {}", follower.path().display(), e);
				continue;
			}
		};
		for line in lines {
			writer.write_all(format!("{}| {}\n", name, line).as_bytes()).await?;
		}
	}
	writer.flush().await
}

#[cfg(test)]
mod tests {
	use super::*;
	use glorious_core::GloriousPaths;
	use glorious_engine::{Backends, Document, Services, Store};
	use std::io::Write;
	use tokio::io::AsyncBufReadExt;

	const DOC: &str = r#"
[[unit]]
name = "db"
  [[unit.slot]]
  name = "local"
  [unit.slot.provider]
  type = "bash/local"
  cmd = "sleep 30"
"#;

	fn registry(label: &str) -> Arc<Registry> {
		let home = std::env::temp_dir().join(format!("glorious-tailer-{}-{}", label, std::process::id()));
		let _ = std::fs::remove_dir_all(&home);
		let services = Services::new(
			Arc::new(Store::ephemeral()),
			Backends::system(),
			GloriousPaths::with_home(home),
		);
		Arc::new(Registry::from_document(Document::parse(DOC).unwrap(), services).unwrap())
	}

	#[tokio::test]
	async fn bad_token_closes_the_session() {
		let registry = registry("bad-token");
		let (client, server) = tokio::io::duplex(1024);
		let session = tokio::spawn(serve(server, registry));

		let (mut read, mut write) = tokio::io::split(client);
		write.write_all(&[b'x'; TAIL_TOKEN_LEN]).await.unwrap();
		let mut rest = Vec::new();
		read.read_to_end(&mut rest).await.unwrap();
		assert!(rest.is_empty());
		session.await.unwrap();
	}

	#[tokio::test]
	async fn streams_until_the_unit_stops() {
		let registry = registry("stream");
		let unit = registry.unit("db").unwrap().clone();
		let output = registry.services().paths.output_file("db");
		let token = registry.tokens().create(vec!["db".into()]);

		let (client, server) = tokio::io::duplex(4096);
		let session = tokio::spawn(serve(server, Arc::clone(&registry)));
		let (read, mut write) = tokio::io::split(client);
		write.write_all(token.as_bytes()).await.unwrap();

		unit.start().await.unwrap();
		tokio::time::sleep(Duration::from_millis(300)).await;
		glorious_engine::output::open_output(&output)
			.unwrap()
			.write_all(b"ready to accept connections\n")
			.unwrap();

		let mut lines = tokio::io::BufReader::new(read).lines();
		let line = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
			.await
			.unwrap()
			.unwrap();
		assert_eq!(line.as_deref(), Some("db| ready to accept connections"));

		unit.stop().await.unwrap();
		let end = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
			.await
			.unwrap()
			.unwrap();
		assert_eq!(end, None);
		session.await.unwrap();

		assert_eq!(registry.tokens().exchange(&token), None);
	}
}
