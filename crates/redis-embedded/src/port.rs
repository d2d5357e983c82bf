//! Ephemeral port allocation.

use crate::error::{RedisServerError, Result};
use std::net::{Ipv4Addr, TcpListener};
use tracing::debug;

/// Ask the OS for a port that is free right now.
///
/// The listener is closed before returning, so nothing stops another process
/// from taking the port before redis-server binds it.
pub fn allocate_free_port() -> Result<u16> {
    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0))
        .map_err(|source| RedisServerError::PortAllocation { source })?;
    let port = listener
        .local_addr()
        .map_err(|source| RedisServerError::PortAllocation { source })?
        .port();
    drop(listener);

    debug!("Allocated free port {}", port);
    Ok(port)
}
