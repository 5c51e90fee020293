//! Host port allocation.
//!
//! Ports come from the kernel's ephemeral range by binding to port 0. The
//! listener is dropped before the port is handed to the engine, so another
//! process may grab the port in between; the engine then fails the start
//! and the deployment is torn down like any other failure.

use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};

use crate::error::{ContainerError, VulnlabError};

/// Ask the operating system for a currently free TCP port on the loopback
/// interface.
///
/// # Errors
///
/// Returns `ContainerError::PortAllocationFailed` when the bind fails.
pub fn allocate_port() -> Result<u16, VulnlabError> {
    let listener = TcpListener::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)).map_err(|e| {
        ContainerError::PortAllocationFailed {
            message: e.to_string(),
        }
    })?;
    let port = listener
        .local_addr()
        .map_err(|e| ContainerError::PortAllocationFailed {
            message: e.to_string(),
        })?
        .port();
    drop(listener);
    Ok(port)
}
