//! The resolved, type-checked form of a compose project.

use camino::Utf8PathBuf;

use super::dockerfile::base_images_from_file;
use crate::error::ComposeError;

/// A compose project after interpolation and validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceGraph {
    /// The normalized project (stack) name resources are labelled with.
    pub project: String,
    /// Directory containing the compose file; relative bind sources resolve
    /// against it.
    pub compose_dir: Utf8PathBuf,
    /// Services in name order.
    pub services: Vec<ServiceSpec>,
    /// Top-level named volumes, unprefixed.
    pub volumes: Vec<String>,
}

impl ServiceGraph {
    /// Look up a service by name.
    #[must_use]
    pub fn service(&self, name: &str) -> Option<&ServiceSpec> {
        self.services.iter().find(|service| service.name == name)
    }

    /// Every image the project needs: prebuilt images, synthesized tags of
    /// build services and the base images their Dockerfiles pull.
    ///
    /// The result is de-duplicated, keeping the first occurrence.
    ///
    /// # Errors
    ///
    /// Returns `ComposeError::Read` when a Dockerfile exists but cannot be
    /// read.
    pub fn required_images(&self) -> Result<Vec<String>, ComposeError> {
        let mut images: Vec<String> = Vec::new();
        for service in &self.services {
            let bases = match &service.build {
                Some(build) => base_images_from_file(&build.dockerfile)?,
                None => Vec::new(),
            };
            for image in std::iter::once(service.image.clone()).chain(bases) {
                if !images.contains(&image) {
                    images.push(image);
                }
            }
        }
        Ok(images)
    }

    /// Services that are built locally rather than pulled.
    pub fn build_services(&self) -> impl Iterator<Item = (&ServiceSpec, &BuildSpec)> {
        self.services
            .iter()
            .filter_map(|service| service.build.as_ref().map(|build| (service, build)))
    }
}

/// One service of a [`ServiceGraph`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServiceSpec {
    /// Service name.
    pub name: String,
    /// Image to run: the prebuilt reference, or the synthesized tag of a
    /// build service.
    pub image: String,
    /// Build instructions when the service is built locally.
    pub build: Option<BuildSpec>,
    /// Services that must be running before this one starts.
    pub depends_on: Vec<String>,
    /// Environment entries as `KEY=value`, or bare `KEY` for null values.
    pub environment: Vec<String>,
    /// Volume mounts.
    pub volumes: Vec<VolumeSpec>,
    /// Published container ports.
    pub ports: Vec<PortSpec>,
    /// Command override.
    pub command: Option<Vec<String>>,
    /// Entrypoint override.
    pub entrypoint: Option<Vec<String>>,
    /// Working directory override.
    pub working_dir: Option<String>,
    /// User override.
    pub user: Option<String>,
    /// Healthcheck settings.
    pub healthcheck: Option<HealthcheckSpec>,
    /// Resource limits; all zero when unset.
    pub resources: ResourceSpec,
    /// Restart policy.
    pub restart: Option<RestartSpec>,
}

impl ServiceSpec {
    /// Whether the service has no dependencies.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.depends_on.is_empty()
    }
}

/// Where and how to build a service image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSpec {
    /// Absolute build context directory.
    pub context: Utf8PathBuf,
    /// Absolute path of the Dockerfile.
    pub dockerfile: Utf8PathBuf,
}

/// A service volume mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeSpec {
    /// Host path bind mount; `source` is as written in the compose file.
    Bind {
        /// Host path.
        source: String,
        /// Container path.
        target: String,
        /// Mount read-only.
        read_only: bool,
    },
    /// Named volume declared at top level.
    Named {
        /// Unprefixed volume name.
        name: String,
        /// Container path.
        target: String,
        /// Mount read-only.
        read_only: bool,
    },
    /// Anonymous volume.
    Anonymous {
        /// Container path.
        target: String,
    },
}

/// A published container port.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PortSpec {
    /// Port inside the container.
    pub container_port: u16,
    /// `tcp` or `udp`.
    pub protocol: String,
}

impl PortSpec {
    /// The engine's port key, e.g. `80/tcp`.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}/{}", self.container_port, self.protocol)
    }
}

/// Healthcheck parameters, durations in nanoseconds.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HealthcheckSpec {
    /// Test command, e.g. `["CMD-SHELL", "curl -f localhost"]`, or
    /// `["NONE"]` when disabled.
    pub test: Vec<String>,
    /// Interval between checks.
    pub interval: Option<i64>,
    /// Per-check timeout.
    pub timeout: Option<i64>,
    /// Consecutive failures before unhealthy.
    pub retries: Option<i64>,
    /// Grace period after start.
    pub start_period: Option<i64>,
}

/// Resource settings from `deploy.resources`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceSpec {
    /// CPU limit in nano-CPUs.
    pub nano_cpus: i64,
    /// Memory limit in bytes.
    pub memory: i64,
    /// Memory reservation in bytes.
    pub memory_reservation: i64,
}

impl ResourceSpec {
    /// Whether any limit is set.
    #[must_use]
    pub const fn is_limited(&self) -> bool {
        self.nano_cpus != 0 || self.memory != 0
    }
}

/// Restart behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartSpec {
    /// Engine restart policy name (`no`, `always`, `on-failure`,
    /// `unless-stopped`).
    pub policy: String,
    /// Retry cap for `on-failure`.
    pub max_attempts: Option<i64>,
}
