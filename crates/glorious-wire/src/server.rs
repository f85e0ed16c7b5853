use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use glorious_core::protocol::{RPC_COOKIE, TAIL_COOKIE};
use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// Sub-protocol selected by the magic cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
	Rpc,
	Tail,
}

impl Route {
	pub fn from_cookie(cookie: &[u8; 4]) -> Option<Self> {
		if cookie == &RPC_COOKIE {
			Some(Route::Rpc)
		} else if cookie == &TAIL_COOKIE {
			Some(Route::Tail)
		} else {
			None
		}
	}
}

/// Read the 4-byte cookie off a fresh connection. A short read, a read error
/// or an unknown cookie all yield `None`, and the caller drops the connection.
pub async fn route_connection<R: AsyncRead + Unpin>(reader: &mut R) -> Option<Route> {
	let mut cookie = [0u8; 4];
	if let Err(e) = reader.read_exact(&mut cookie).await {
		tracing::error!("failed to read magic cookie from connection, closing: {}", e);
		return None;
	}

	let route = Route::from_cookie(&cookie);
	if route.is_none() {
		tracing::error!(
			"unknown magic cookie received, closing, got: {:?}",
			String::from_utf8_lossy(&cookie)
		);
	}
	route
}

pub async fn run_tcp_server<Req, Resp, F, Fut, E, T, TFut>(
	addr: SocketAddr,
	handler: F,
	on_error: E,
	tail: T,
) where
	Req: DeserializeOwned + Send + 'static,
	Resp: Serialize + Send + 'static,
	F: Fn(Req) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Resp> + Send + 'static,
	E: Fn(String) -> Resp + Send + Sync + 'static,
	T: Fn(TcpStream) -> TFut + Send + Sync + 'static,
	TFut: Future<Output = ()> + Send + 'static,
{
	let listener = match TcpListener::bind(addr).await {
		Ok(l) => l,
		Err(e) => {
			tracing::error!("failed to bind {}: {}", addr, e);
			return;
		}
	};

	serve(listener, handler, on_error, tail).await;
}

/// Accept connections forever, one task per connection. `on_error` builds the
/// reply for a request line that does not parse.
pub async fn serve<Req, Resp, F, Fut, E, T, TFut>(
	listener: TcpListener,
	handler: F,
	on_error: E,
	tail: T,
) where
	Req: DeserializeOwned + Send + 'static,
	Resp: Serialize + Send + 'static,
	F: Fn(Req) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Resp> + Send + 'static,
	E: Fn(String) -> Resp + Send + Sync + 'static,
	T: Fn(TcpStream) -> TFut + Send + Sync + 'static,
	TFut: Future<Output = ()> + Send + 'static,
{
	match listener.local_addr() {
		Ok(addr) => tracing::info!("listening on {}", addr),
		Err(e) => tracing::warn!("listening on unknown address: {}", e),
	}

	let handler = Arc::new(handler);
	let on_error = Arc::new(on_error);
	let tail = Arc::new(tail);

	loop {
		let (mut stream, peer) = match listener.accept().await {
			Ok(s) => s,
			Err(e) => {
				tracing::error!("accept error: {}", e);
				continue;
			}
		};
		tracing::info!("new connection established from {}", peer);

		let handler = Arc::clone(&handler);
		let on_error = Arc::clone(&on_error);
		let tail = Arc::clone(&tail);
		tokio::spawn(async move {
			match route_connection(&mut stream).await {
				Some(Route::Rpc) => {
					tracing::debug!("creating agent based rpc connection");
					handle_rpc_connection::<Req, Resp, _, _, _>(stream, handler, on_error).await;
				}
				Some(Route::Tail) => {
					tracing::debug!("creating stream based connection");
					tail(stream).await;
				}
				None => {}
			}
		});
	}
}

async fn handle_rpc_connection<Req, Resp, F, Fut, E>(
	stream: TcpStream,
	handler: Arc<F>,
	on_error: Arc<E>,
) where
	Req: DeserializeOwned + Send + 'static,
	Resp: Serialize + Send + 'static,
	F: Fn(Req) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Resp> + Send + 'static,
	E: Fn(String) -> Resp + Send + Sync + 'static,
{
	let (reader, mut writer) = stream.into_split();
	let mut lines = BufReader::new(reader).lines();

	while let Ok(Some(line)) = lines.next_line().await {
		let response = match serde_json::from_str::<Req>(&line) {
			Ok(request) => handler(request).await,
			Err(e) => {
				tracing::warn!("invalid request: {}", e);
				on_error(format!("invalid request: {}", e))
			}
		};

		let mut data = match serde_json::to_vec(&response) {
			Ok(d) => d,
			Err(e) => {
				tracing::error!("failed to serialize response: {}", e);
				continue;
			}
		};
		data.push(b'\n');

		if writer.write_all(&data).await.is_err() {
			break;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn cookie_routing() {
		let mut rpc: &[u8] = b"GLR1{}";
		assert_eq!(route_connection(&mut rpc).await, Some(Route::Rpc));

		let mut tail: &[u8] = b"GLT1";
		assert_eq!(route_connection(&mut tail).await, Some(Route::Tail));

		let mut bad: &[u8] = b"HTTP";
		assert_eq!(route_connection(&mut bad).await, None);

		let mut short: &[u8] = b"GL";
		assert_eq!(route_connection(&mut short).await, None);
	}
}
