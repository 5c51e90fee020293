//! Lazily connected, self-healing engine handle.

use bollard::Docker;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::EngineConnector;
use crate::error::VulnlabError;

/// Owns the engine handle for the lifetime of the process.
///
/// The handle is created on first use. Each [`Self::client`] call pings the
/// cached handle and, when the ping fails, discards it and reconnects once.
/// A failed reconnect is surfaced to the caller; operations already in flight
/// are never retried.
#[derive(Debug)]
pub struct EngineGuard {
    socket: String,
    handle: Mutex<Option<Docker>>,
}

impl EngineGuard {
    /// Create a guard for the given socket endpoint without connecting.
    #[must_use]
    pub fn new(socket: impl Into<String>) -> Self {
        Self {
            socket: socket.into(),
            handle: Mutex::new(None),
        }
    }

    /// The socket endpoint this guard connects to.
    #[must_use]
    pub fn socket(&self) -> &str {
        &self.socket
    }

    /// Return a live engine handle, reconnecting once if the cached one is dead.
    ///
    /// # Errors
    ///
    /// Returns a connectivity `ContainerError` when the engine cannot be
    /// reached even after reconnecting.
    pub async fn client(&self) -> Result<Docker, VulnlabError> {
        let mut slot = self.handle.lock().await;

        if let Some(docker) = slot.as_ref() {
            match EngineConnector::health_check_async(docker).await {
                Ok(()) => return Ok(docker.clone()),
                Err(error) => {
                    warn!(
                        socket = %self.socket,
                        %error,
                        "cached engine handle failed ping, reconnecting"
                    );
                    *slot = None;
                }
            }
        }

        let docker = EngineConnector::connect_and_verify_async(&self.socket).await?;
        debug!(socket = %self.socket, "connected to container engine");
        *slot = Some(docker.clone());
        Ok(docker)
    }

    /// Whether the engine currently answers pings.
    pub async fn is_available(&self) -> bool {
        self.client().await.is_ok()
    }
}
