pub mod client;
pub mod daemon;
pub mod server;

pub use client::{ClientError, RpcClient, TailStream};
pub use daemon::{ensure_daemon, Daemon};
pub use server::{route_connection, run_tcp_server, serve, Route};
