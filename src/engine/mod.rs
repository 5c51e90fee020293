//! Container engine connection and the API seam used by every other module.
//!
//! The socket endpoint is resolved through a priority-based fallback chain:
//!
//! 1. CLI argument (`--engine-socket`)
//! 2. Config file (`engine_socket` in TOML)
//! 3. `VULNLAB_ENGINE_SOCKET` environment variable
//! 4. `DOCKER_HOST` environment variable
//! 5. `CONTAINER_HOST` environment variable
//! 6. `PODMAN_HOST` environment variable
//! 7. Platform default (`/var/run/docker.sock` on Unix)
//!
//! [`EngineGuard`] keeps one live handle per process; [`EngineClient`] is the
//! trait the image pipeline, stack deployer and teardown program against.

mod client;
mod connection;
mod guard;
pub mod labels;

#[cfg(test)]
pub(crate) mod test_support;

pub use client::{
    ContainerDetails, EngineClient, EngineFuture, EngineStream, Filters, ImageDetails,
    NetworkDetails, is_conflict, is_not_found,
};
pub use connection::{EngineConnector, SocketResolver};
pub use guard::EngineGuard;
