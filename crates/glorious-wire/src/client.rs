use std::io::{self, BufRead, BufReader, Write};
use std::marker::PhantomData;
use std::net::{TcpStream, ToSocketAddrs};

use glorious_core::protocol::{RPC_COOKIE, TAIL_COOKIE, TAIL_TOKEN_LEN};
use serde::{de::DeserializeOwned, Serialize};

/// Errors from daemon client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
	/// Nothing is listening on the daemon address.
	#[error("daemon not running")]
	NotRunning,
	#[error("io error: {0}")]
	Io(#[from] io::Error),
	#[error("serialize error: {0}")]
	Serialize(String),
	#[error("deserialize error: {0}")]
	Deserialize(String),
	/// The daemon closed the connection before answering.
	#[error("daemon closed the connection")]
	Closed,
	#[error("tail token must be {TAIL_TOKEN_LEN} bytes, got {0}")]
	BadToken(usize),
}

/// Synchronous RPC client. Sends the RPC cookie on connect, then one JSON
/// line per request.
pub struct RpcClient<Req, Resp> {
	writer: TcpStream,
	reader: BufReader<TcpStream>,
	_phantom: PhantomData<(Req, Resp)>,
}

impl<Req, Resp> RpcClient<Req, Resp>
where
	Req: Serialize,
	Resp: DeserializeOwned,
{
	pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, ClientError> {
		let mut stream = TcpStream::connect(addr).map_err(|_| ClientError::NotRunning)?;
		stream.write_all(&RPC_COOKIE)?;
		let reader = BufReader::new(stream.try_clone()?);
		Ok(Self {
			writer: stream,
			reader,
			_phantom: PhantomData,
		})
	}

	pub fn send(&mut self, request: &Req) -> Result<Resp, ClientError> {
		let mut data =
			serde_json::to_vec(request).map_err(|e| ClientError::Serialize(e.to_string()))?;
		data.push(b'\n');
		self.writer.write_all(&data)?;

		let mut line = String::new();
		if self.reader.read_line(&mut line)? == 0 {
			return Err(ClientError::Closed);
		}

		serde_json::from_str(&line).map_err(|e| ClientError::Deserialize(e.to_string()))
	}
}

/// Output stream opened with a tail token.
pub struct TailStream {
	reader: BufReader<TcpStream>,
}

impl TailStream {
	pub fn open<A: ToSocketAddrs>(addr: A, token: &str) -> Result<Self, ClientError> {
		if token.len() != TAIL_TOKEN_LEN {
			return Err(ClientError::BadToken(token.len()));
		}
		let mut stream = TcpStream::connect(addr).map_err(|_| ClientError::NotRunning)?;
		stream.write_all(&TAIL_COOKIE)?;
		stream.write_all(token.as_bytes())?;
		Ok(Self {
			reader: BufReader::new(stream),
		})
	}

	/// Lines pushed by the daemon, until it closes the session.
	pub fn lines(self) -> impl Iterator<Item = io::Result<String>> {
		self.reader.lines()
	}
}

/// Check if a daemon is answering on `addr`.
pub fn is_running<A: ToSocketAddrs>(addr: A) -> bool {
	match TcpStream::connect(addr) {
		Ok(mut stream) => stream.write_all(&RPC_COOKIE).is_ok(),
		Err(_) => false,
	}
}

/// Read the PID of a running daemon from its PID file.
pub fn read_pid(path: &std::path::Path) -> Option<u32> {
	std::fs::read_to_string(path)
		.ok()
		.and_then(|s| s.trim().parse().ok())
}
