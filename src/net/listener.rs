//! TCP listeners, one per configured port.
//!
//! # Responsibilities
//! - Resolve the bind host for each port
//! - Bind with `SO_REUSEADDR` and, on unix, `SO_REUSEPORT` so that every
//!   cluster worker can listen on the same ports
//! - Report bind failures with the address that failed

use std::net::{IpAddr, SocketAddr};

use tokio::net::{TcpListener, TcpSocket};

/// Backlog passed to `listen(2)`.
const BACKLOG: u32 = 1024;

/// Error type for listener operations.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("Invalid bind host '{host}': {source}")]
    InvalidHost {
        host: String,
        source: std::net::AddrParseError,
    },

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
}

/// Bind one listener per port on `host`.
pub fn bind_ports(host: &str, ports: &[u16]) -> Result<Vec<TcpListener>, ListenerError> {
    let ip: IpAddr = host.parse().map_err(|source| ListenerError::InvalidHost {
        host: host.to_string(),
        source,
    })?;

    ports
        .iter()
        .map(|&port| bind(SocketAddr::new(ip, port)))
        .collect()
}

/// Bind a single shareable listener.
pub fn bind(addr: SocketAddr) -> Result<TcpListener, ListenerError> {
    let wrap = |source: std::io::Error| ListenerError::Bind { addr, source };

    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4(),
        SocketAddr::V6(_) => TcpSocket::new_v6(),
    }
    .map_err(wrap)?;

    socket.set_reuseaddr(true).map_err(wrap)?;
    #[cfg(unix)]
    socket.set_reuseport(true).map_err(wrap)?;

    socket.bind(addr).map_err(wrap)?;
    let listener = socket.listen(BACKLOG).map_err(wrap)?;

    tracing::info!(
        address = %listener.local_addr().unwrap_or(addr),
        "Listener bound"
    );
    Ok(listener)
}
