//! Runtime settings for the server and the client.
//!
//! The binaries only expose the listen/connect address and the log directory on
//! the command line; everything else keeps its default.
use std::{
    net::{Ipv4Addr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

pub const DEFAULT_PORT: u16 = 8800;

pub fn default_address() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT))
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub address: SocketAddr,
    /// Directory receiving `chat.log` and `requests.log`.
    pub log_dir: PathBuf,
    /// Worker threads handling connections.
    pub client_pool_size: usize,
    /// Accepted connections waiting for a free worker. Past this, the acceptor
    /// handles the connection itself.
    pub client_queue_size: usize,
    /// How long a connection may sit idle between requests.
    pub idle_timeout: Duration,
    pub client_shutdown_timeout: Duration,
    pub service_shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            log_dir: PathBuf::from("."),
            client_pool_size: 8,
            client_queue_size: 8,
            idle_timeout: Duration::from_secs(15 * 60),
            client_shutdown_timeout: Duration::from_secs(1),
            service_shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    pub fn new(address: SocketAddr, log_dir: PathBuf) -> Self {
        Self {
            address,
            log_dir,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub address: SocketAddr,
    /// Bounded wait of the session loop on its inbound queue.
    pub poll_interval: Duration,
    /// How long the session waits for a network round trip.
    pub reply_timeout: Duration,
    pub connect_timeout: Duration,
    /// Socket read/write timeout. Kept below `reply_timeout` so the connector
    /// always answers before the session gives up.
    pub read_timeout: Duration,
    pub spinner_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            poll_interval: Duration::from_millis(200),
            reply_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(2),
            read_timeout: Duration::from_secs(4),
            spinner_interval: Duration::from_millis(100),
        }
    }
}

impl ClientConfig {
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            ..Self::default()
        }
    }
}
