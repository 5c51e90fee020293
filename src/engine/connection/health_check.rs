//! Health check and connect-and-verify functionality.

use std::time::Duration;

use bollard::Docker;

use super::error_classification::classify_connection_error;
use super::{EngineConnector, HEALTH_CHECK_TIMEOUT_SECS, SocketResolver};
use crate::engine::client::EngineClient;
use crate::error::{ContainerError, VulnlabError};

impl EngineConnector {
    /// Ping with a timeout, classifying transport failures against `socket`.
    pub(crate) async fn ping_with_timeout<C: EngineClient + ?Sized>(
        client: &C,
        socket: Option<&str>,
    ) -> Result<(), VulnlabError> {
        let timeout = Duration::from_secs(HEALTH_CHECK_TIMEOUT_SECS);

        tokio::time::timeout(timeout, client.ping())
            .await
            .map_err(|_| {
                VulnlabError::from(ContainerError::HealthCheckTimeout {
                    seconds: HEALTH_CHECK_TIMEOUT_SECS,
                })
            })?
            .map_err(|e| {
                let classified = socket.map(|uri| classify_connection_error(&e, uri));
                VulnlabError::from(match classified {
                    Some(ContainerError::ConnectionFailed { .. }) | None => {
                        ContainerError::HealthCheckFailed {
                            message: e.to_string(),
                        }
                    }
                    Some(specific) => specific,
                })
            })
    }

    /// Verify the container engine is responsive.
    ///
    /// Sends a ping request to the engine and waits for a response. This
    /// confirms the engine is operational, not just that the socket is
    /// reachable.
    ///
    /// # Errors
    ///
    /// Returns `ContainerError::HealthCheckFailed` if the engine does not
    /// respond correctly.
    ///
    /// Returns `ContainerError::HealthCheckTimeout` if the check times out.
    pub async fn health_check_async<C: EngineClient + ?Sized>(
        client: &C,
    ) -> Result<(), VulnlabError> {
        Self::ping_with_timeout(client, None).await
    }

    /// Connect to the container engine and verify it responds.
    ///
    /// # Errors
    ///
    /// Returns `ContainerError::ConnectionFailed` if the connection fails,
    /// `SocketNotFound` or `PermissionDenied` when the socket path is the
    /// problem, and `HealthCheckFailed` or `HealthCheckTimeout` when the
    /// engine does not answer.
    pub async fn connect_and_verify_async(socket: &str) -> Result<Docker, VulnlabError> {
        let docker = Self::connect(socket)?;
        Self::ping_with_timeout(&docker, Some(socket)).await?;
        Ok(docker)
    }

    /// Connect using fallback resolution and verify the engine responds.
    ///
    /// # Errors
    ///
    /// See [`Self::connect_and_verify_async`].
    pub async fn connect_with_fallback_and_verify_async<E: mockable::Env>(
        config_socket: Option<&str>,
        resolver: &SocketResolver<'_, E>,
    ) -> Result<Docker, VulnlabError> {
        let socket = Self::resolve_socket(config_socket, resolver);
        Self::connect_and_verify_async(&socket).await
    }
}
