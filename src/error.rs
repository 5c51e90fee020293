//! Semantic error types for vulnlab.
//!
//! This module defines the error hierarchy, following the principle of using
//! semantic error enums (via `thiserror`) for conditions the caller might
//! inspect, retry, or map to a user-facing status code, while reserving opaque
//! errors (`eyre::Report`) for the application boundary.
//!
//! The taxonomy mirrors how failures are handled operationally:
//! connectivity failures are recoverable on the next call, not-found is often
//! success for deletes, conflicts are surfaced and never retried, cancellation
//! is distinct from I/O failure, teardown reports partial failure, and an
//! unsatisfiable compose graph is fatal for that deployment.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be parsed.
    #[error("failed to parse configuration file: {message}")]
    ParseError {
        /// A description of the parse error.
        message: String,
    },

    /// A configuration value failed validation.
    #[error("invalid configuration value for '{field}': {reason}")]
    InvalidValue {
        /// The name of the invalid field.
        field: String,
        /// The reason the value is invalid.
        reason: String,
    },

    /// The `OrthoConfig` library returned an error during configuration loading.
    #[error("configuration loading failed: {0}")]
    OrthoConfig(Arc<ortho_config::OrthoError>),
}

/// Errors raised by container, network and volume operations on the engine.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// Failed to connect to the container engine socket.
    #[error("failed to connect to container engine: {message}")]
    ConnectionFailed {
        /// A description of the connection failure.
        message: String,
    },

    /// The container engine socket was not found.
    #[error("container engine socket not found: {path}")]
    SocketNotFound {
        /// The path where the socket was expected.
        path: PathBuf,
    },

    /// Permission denied when accessing the container engine socket.
    #[error("permission denied accessing container socket: {path}")]
    PermissionDenied {
        /// The path to the socket.
        path: PathBuf,
    },

    /// Health check failed - engine did not respond correctly.
    #[error("container engine health check failed: {message}")]
    HealthCheckFailed {
        /// A description of the health check failure.
        message: String,
    },

    /// Health check timed out.
    #[error("container engine health check timed out after {seconds} seconds")]
    HealthCheckTimeout {
        /// The timeout duration in seconds.
        seconds: u64,
    },

    /// Failed to create a container.
    #[error("failed to create container '{name}': {message}")]
    CreateFailed {
        /// The requested container name.
        name: String,
        /// A description of the creation failure.
        message: String,
    },

    /// Failed to start a container.
    #[error("failed to start container '{container_id}': {message}")]
    StartFailed {
        /// The ID of the container that failed to start.
        container_id: String,
        /// A description of the start failure.
        message: String,
    },

    /// Failed to remove a container.
    #[error("failed to remove container '{container_id}': {message}")]
    RemoveFailed {
        /// The ID of the container.
        container_id: String,
        /// A description of the removal failure.
        message: String,
    },

    /// Failed to inspect a container.
    #[error("failed to inspect container '{container_id}': {message}")]
    InspectFailed {
        /// The ID of the container.
        container_id: String,
        /// A description of the inspect failure.
        message: String,
    },

    /// Failed to list engine resources.
    #[error("failed to list {resource}: {message}")]
    ListFailed {
        /// The resource kind being listed (containers, networks, volumes).
        resource: &'static str,
        /// A description of the failure.
        message: String,
    },

    /// A network operation failed.
    #[error("network operation on '{network}' failed: {message}")]
    NetworkFailed {
        /// The network name or ID.
        network: String,
        /// A description of the failure.
        message: String,
    },

    /// A volume operation failed.
    #[error("volume operation on '{volume}' failed: {message}")]
    VolumeFailed {
        /// The volume name.
        volume: String,
        /// A description of the failure.
        message: String,
    },

    /// No free host port could be obtained from the operating system.
    #[error("failed to allocate a host port: {message}")]
    PortAllocationFailed {
        /// A description of the failure.
        message: String,
    },
}

/// Errors raised by the image pull/build/remove pipeline.
#[derive(Debug, Error)]
pub enum ImageError {
    /// The registry does not know the requested image.
    #[error("image '{image}' not found")]
    NotFound {
        /// The image reference.
        image: String,
    },

    /// The image is already present locally, so there is nothing to pull.
    #[error("image '{image}' already exists locally, skipping pull")]
    AlreadyPresent {
        /// The image reference.
        image: String,
    },

    /// Pulling failed for a reason other than the image being absent.
    #[error("failed to pull image '{image}': {message}")]
    PullFailed {
        /// The image reference.
        image: String,
        /// A description of the failure.
        message: String,
    },

    /// The build stream reported an error or could not be started.
    #[error("failed to build image '{image}': {message}")]
    BuildFailed {
        /// The target tag.
        image: String,
        /// A description of the failure.
        message: String,
    },

    /// A container still references the image.
    #[error("image '{image}' is in use by a container")]
    InUse {
        /// The image reference.
        image: String,
    },

    /// The engine refused to remove the image.
    #[error("failed to remove image '{image}': {message}")]
    RemoveFailed {
        /// The image reference.
        image: String,
        /// A description of the failure.
        message: String,
    },

    /// Inspecting or listing the image failed.
    #[error("failed to inspect image '{image}': {message}")]
    InspectFailed {
        /// The image reference.
        image: String,
        /// A description of the failure.
        message: String,
    },

    /// The operation was cancelled by the requester.
    #[error("{operation} of image '{image}' was cancelled")]
    Cancelled {
        /// The image reference.
        image: String,
        /// The operation that was cancelled (`pull` or `build`).
        operation: &'static str,
    },

    /// The build context could not be packaged.
    #[error("failed to package build context '{path}': {message}")]
    ContextArchive {
        /// The context directory.
        path: PathBuf,
        /// A description of the failure.
        message: String,
    },
}

/// Errors raised while reading and resolving compose documents.
#[derive(Debug, Error)]
pub enum ComposeError {
    /// The compose file could not be read.
    #[error("failed to read compose file '{path}': {message}")]
    Read {
        /// The compose file path.
        path: PathBuf,
        /// A description of the failure.
        message: String,
    },

    /// The compose document is not valid YAML or does not match the schema.
    #[error("failed to parse compose file '{path}': {message}")]
    Parse {
        /// The compose file path.
        path: PathBuf,
        /// A description of the failure.
        message: String,
    },

    /// A variable reference could not be interpolated.
    #[error("invalid interpolation in compose file: {message}")]
    Interpolation {
        /// A description of the failure.
        message: String,
    },

    /// A service has neither `image` nor `build`.
    #[error("service '{service}' has neither an image nor a build section")]
    MissingImage {
        /// The service name.
        service: String,
    },

    /// A service depends on a service that is not defined.
    #[error("service '{service}' depends on undefined service '{dependency}'")]
    UnknownDependency {
        /// The dependent service.
        service: String,
        /// The missing dependency.
        dependency: String,
    },

    /// A field value could not be interpreted.
    #[error("invalid value for '{field}' in service '{service}': {reason}")]
    InvalidValue {
        /// The service name.
        service: String,
        /// The offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// A volume source failed platform path validation.
    #[error("invalid volume source '{source_path}' in service '{service}': {reason}")]
    InvalidVolume {
        /// The service name.
        service: String,
        /// The resolved source path.
        source_path: String,
        /// Why the path was rejected.
        reason: &'static str,
    },
}

/// Errors raised by stack deployment and teardown.
#[derive(Debug, Error)]
pub enum StackError {
    /// Deployment stalled with services whose dependencies never became ready.
    #[error(
        "services {services:?} in stack '{stack}' could not be deployed: circular or unsatisfied dependencies"
    )]
    UnsatisfiedDependencies {
        /// The stack name.
        stack: String,
        /// The services left undeployed.
        services: Vec<String>,
    },

    /// Teardown finished with at least one failure.
    #[error("partial failure removing stack '{stack}': {last}")]
    PartialTeardown {
        /// The stack name.
        stack: String,
        /// The last error encountered.
        last: Box<VulnlabError>,
    },
}

/// Errors raised by the instance lifecycle service.
#[derive(Debug, Error)]
pub enum LabError {
    /// The requested environment does not exist.
    #[error("environment {env_id} does not exist")]
    EnvNotFound {
        /// The environment ID.
        env_id: u64,
    },

    /// Another environment already uses this name.
    #[error("environment name '{name}' already exists")]
    EnvNameTaken {
        /// The duplicate name.
        name: String,
    },

    /// A required field was empty.
    #[error("missing required field: {field}")]
    MissingField {
        /// The field name.
        field: &'static str,
    },

    /// The compose path is not a YAML file or does not exist.
    #[error("invalid compose path '{path}': {reason}")]
    InvalidComposePath {
        /// The supplied path.
        path: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The environment is not open to the requester's access level.
    #[error("environment {env_id} is not open to this user")]
    EnvNotOpen {
        /// The environment ID.
        env_id: u64,
    },

    /// The requester cannot afford the environment.
    #[error("insufficient balance: cost {cost}, balance {balance}")]
    InsufficientBalance {
        /// The environment cost.
        cost: f64,
        /// The requester's balance.
        balance: f64,
    },

    /// The requester already has a running instance of this environment.
    #[error("user {user_id} already has a running instance of environment {env_id}")]
    InstanceAlreadyRunning {
        /// The user ID.
        user_id: u64,
        /// The environment ID.
        env_id: u64,
    },

    /// Another request is provisioning the same user's instance.
    #[error("user {user_id} is already provisioning an instance of environment {env_id}")]
    InstanceProvisioning {
        /// The user ID.
        user_id: u64,
        /// The environment ID.
        env_id: u64,
    },

    /// No instance matched the lookup.
    #[error("instance not found: {key}")]
    InstanceNotFound {
        /// A description of the lookup key.
        key: String,
    },

    /// A required image is not present locally.
    #[error("image '{image}' is not present on the engine")]
    ImageMissing {
        /// The image reference.
        image: String,
    },
}

/// Errors reported by the persistence collaborator.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// The record does not exist.
    #[error("{entity} {key} not found")]
    NotFound {
        /// The record kind.
        entity: &'static str,
        /// The lookup key.
        key: String,
    },

    /// The backing store failed.
    #[error("persistence backend failed: {message}")]
    Backend {
        /// A description of the failure.
        message: String,
    },
}

/// Errors that can occur during filesystem operations.
#[derive(Debug, Error)]
pub enum FilesystemError {
    /// A file or directory was not found.
    #[error("path not found: {path}")]
    NotFound {
        /// The path that was not found.
        path: PathBuf,
    },

    /// Permission denied when accessing a path.
    #[error("permission denied: {path}")]
    PermissionDenied {
        /// The path that could not be accessed.
        path: PathBuf,
    },

    /// An I/O error occurred.
    #[error("I/O error at '{path}': {message}")]
    IoError {
        /// The path where the error occurred.
        path: PathBuf,
        /// A description of the I/O error.
        message: String,
    },

    /// An uploaded filename tried to escape the catalog directory.
    #[error("illegal file name '{name}': {reason}")]
    PathTraversal {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// An uploaded catalog file has the wrong type or shape.
    #[error("invalid catalog file '{name}': {reason}")]
    InvalidCatalogFile {
        /// The file name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Top-level error type for vulnlab.
///
/// This enum aggregates all domain-specific errors into a single type that can
/// be used throughout the library. At the application boundary (`main.rs`),
/// these errors are converted to `eyre::Report` for human-readable reporting.
#[derive(Debug, Error)]
pub enum VulnlabError {
    /// An error occurred during configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An error occurred during container operations.
    #[error(transparent)]
    Container(#[from] ContainerError),

    /// An error occurred in the image pipeline.
    #[error(transparent)]
    Image(#[from] ImageError),

    /// An error occurred resolving a compose document.
    #[error(transparent)]
    Compose(#[from] ComposeError),

    /// An error occurred deploying or removing a stack.
    #[error(transparent)]
    Stack(#[from] StackError),

    /// An error occurred in the instance lifecycle.
    #[error(transparent)]
    Lab(#[from] LabError),

    /// The persistence collaborator failed.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// An error occurred during filesystem operations.
    #[error(transparent)]
    Filesystem(#[from] FilesystemError),
}

impl VulnlabError {
    /// Whether the error is a user-initiated cancellation rather than a failure.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Image(ImageError::Cancelled { .. }))
    }

    /// Whether the error reports an absent resource.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Image(ImageError::NotFound { .. })
                | Self::Lab(LabError::EnvNotFound { .. } | LabError::InstanceNotFound { .. })
                | Self::Persistence(PersistenceError::NotFound { .. })
                | Self::Filesystem(FilesystemError::NotFound { .. })
        )
    }

    /// Whether the error is a conflict that must be surfaced, never retried.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::Image(ImageError::InUse { .. } | ImageError::AlreadyPresent { .. })
                | Self::Lab(
                    LabError::EnvNameTaken { .. }
                        | LabError::InstanceAlreadyRunning { .. }
                        | LabError::InstanceProvisioning { .. }
                )
        )
    }

    /// Whether the engine could not be reached.
    #[must_use]
    pub const fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Self::Container(
                ContainerError::ConnectionFailed { .. }
                    | ContainerError::SocketNotFound { .. }
                    | ContainerError::PermissionDenied { .. }
                    | ContainerError::HealthCheckFailed { .. }
                    | ContainerError::HealthCheckTimeout { .. }
            )
        )
    }
}

/// A specialised `Result` type for vulnlab operations.
pub type Result<T> = std::result::Result<T, VulnlabError>;
