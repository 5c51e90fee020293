//! The container-engine API seam.
//!
//! Every engine call vulnlab makes goes through [`EngineClient`], which is
//! implemented for [`bollard::Docker`] and mocked in tests. Methods return
//! boxed futures (or boxed streams for long-running pull and build calls) so
//! the trait stays object-safe and easy to mock.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use bollard::errors::Error as BollardError;
use bollard::models::{
    BuildInfo, ContainerCreateBody, ContainerCreateResponse, ContainerSummary, CreateImageInfo,
    ImageSummary, NetworkConnectRequest, NetworkCreateRequest, VolumeCreateRequest,
};
use bollard::query_parameters::{
    BuildImageOptions, CreateContainerOptions, CreateImageOptionsBuilder, InspectContainerOptions,
    ListContainersOptions, ListImagesOptions, ListNetworksOptions, ListVolumesOptions,
    RemoveContainerOptionsBuilder, RemoveImageOptionsBuilder, RemoveVolumeOptions,
    StartContainerOptions,
};
use bollard::{Docker, body_full};
use futures_util::stream::{BoxStream, StreamExt};

/// Engine-side label filters, keyed by filter name (`label`, `reference`, ...).
pub type Filters = HashMap<String, Vec<String>>;

/// Future returned by every request/response engine call.
pub type EngineFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BollardError>> + Send + 'a>>;

/// Stream returned by progress-reporting engine calls.
pub type EngineStream<'a, T> = BoxStream<'a, Result<T, BollardError>>;

/// The subset of an image inspection the pipeline relies on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageDetails {
    /// Full image ID (`sha256:...`).
    pub id: String,
    /// Repository tags attached to the image.
    pub repo_tags: Vec<String>,
    /// Container ports the image declares, e.g. `80/tcp`.
    pub exposed_ports: Vec<String>,
}

/// The subset of a container inspection the deployer relies on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerDetails {
    /// Full container ID.
    pub id: String,
    /// Container name without the leading `/`.
    pub name: String,
    /// ID of the image the container runs.
    pub image_id: String,
    /// Whether the container's process is running.
    pub running: bool,
}

/// A network as reported by the engine's list endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkDetails {
    /// Network name.
    pub name: String,
    /// Labels attached at creation time.
    pub labels: HashMap<String, String>,
}

/// Container-engine operations used by the image pipeline, the stack
/// deployer and teardown.
pub trait EngineClient: Send + Sync {
    /// Ping the engine.
    fn ping(&self) -> EngineFuture<'_, ()>;

    /// Inspect a local image by reference or ID.
    fn inspect_image(&self, name: &str) -> EngineFuture<'_, ImageDetails>;

    /// List local images matching the filters.
    fn list_images(&self, filters: Filters) -> EngineFuture<'_, Vec<ImageSummary>>;

    /// Pull an image from its registry, streaming progress events.
    fn pull_image(&self, name: &str) -> EngineStream<'_, CreateImageInfo>;

    /// Build an image from a tarred context, streaming build output.
    fn build_image(
        &self,
        options: BuildImageOptions,
        context: Vec<u8>,
    ) -> EngineStream<'_, BuildInfo>;

    /// Remove a local image.
    fn remove_image(&self, name: &str, force: bool) -> EngineFuture<'_, ()>;

    /// Create a container.
    fn create_container(
        &self,
        options: Option<CreateContainerOptions>,
        config: ContainerCreateBody,
    ) -> EngineFuture<'_, ContainerCreateResponse>;

    /// Start a created container.
    fn start_container(&self, id: &str) -> EngineFuture<'_, ()>;

    /// Inspect a container by ID or name.
    fn inspect_container(&self, id: &str) -> EngineFuture<'_, ContainerDetails>;

    /// List containers (running or not) matching the filters.
    fn list_containers(&self, filters: Filters) -> EngineFuture<'_, Vec<ContainerSummary>>;

    /// Remove a container together with its anonymous volumes.
    fn remove_container(&self, id: &str, force: bool) -> EngineFuture<'_, ()>;

    /// Create a network.
    fn create_network(&self, request: NetworkCreateRequest) -> EngineFuture<'_, ()>;

    /// Attach a container to a network.
    fn connect_network(
        &self,
        network: &str,
        request: NetworkConnectRequest,
    ) -> EngineFuture<'_, ()>;

    /// List networks matching the filters.
    fn list_networks(&self, filters: Filters) -> EngineFuture<'_, Vec<NetworkDetails>>;

    /// Remove a network.
    fn remove_network(&self, name: &str) -> EngineFuture<'_, ()>;

    /// Create a named volume.
    fn create_volume(
        &self,
        name: &str,
        labels: HashMap<String, String>,
    ) -> EngineFuture<'_, ()>;

    /// List volume names matching the filters.
    fn list_volumes(&self, filters: Filters) -> EngineFuture<'_, Vec<String>>;

    /// Remove a volume.
    fn remove_volume(&self, name: &str) -> EngineFuture<'_, ()>;
}

impl EngineClient for Docker {
    fn ping(&self) -> EngineFuture<'_, ()> {
        Box::pin(async move { Self::ping(self).await.map(drop) })
    }

    fn inspect_image(&self, name: &str) -> EngineFuture<'_, ImageDetails> {
        let name_owned = String::from(name);
        Box::pin(async move {
            let inspect = Self::inspect_image(self, &name_owned).await?;
            let exposed_ports = inspect
                .config
                .and_then(|config| config.exposed_ports)
                .unwrap_or_default();
            Ok(ImageDetails {
                id: inspect.id.unwrap_or_default(),
                repo_tags: inspect.repo_tags.unwrap_or_default(),
                exposed_ports,
            })
        })
    }

    fn list_images(&self, filters: Filters) -> EngineFuture<'_, Vec<ImageSummary>> {
        Box::pin(async move {
            let options = ListImagesOptions {
                all: false,
                filters: Some(filters),
                ..ListImagesOptions::default()
            };
            Self::list_images(self, Some(options)).await
        })
    }

    fn pull_image(&self, name: &str) -> EngineStream<'_, CreateImageInfo> {
        let options = CreateImageOptionsBuilder::new().from_image(name).build();
        Self::create_image(self, Some(options), None, None).boxed()
    }

    fn build_image(
        &self,
        options: BuildImageOptions,
        context: Vec<u8>,
    ) -> EngineStream<'_, BuildInfo> {
        Self::build_image(self, options, None, Some(body_full(context.into()))).boxed()
    }

    fn remove_image(&self, name: &str, force: bool) -> EngineFuture<'_, ()> {
        let name_owned = String::from(name);
        Box::pin(async move {
            let options = RemoveImageOptionsBuilder::new()
                .force(force)
                .noprune(false)
                .build();
            Self::remove_image(self, &name_owned, Some(options), None)
                .await
                .map(drop)
        })
    }

    fn create_container(
        &self,
        options: Option<CreateContainerOptions>,
        config: ContainerCreateBody,
    ) -> EngineFuture<'_, ContainerCreateResponse> {
        Box::pin(async move { Self::create_container(self, options, config).await })
    }

    fn start_container(&self, id: &str) -> EngineFuture<'_, ()> {
        let id_owned = String::from(id);
        Box::pin(async move {
            Self::start_container(self, &id_owned, None::<StartContainerOptions>).await
        })
    }

    fn inspect_container(&self, id: &str) -> EngineFuture<'_, ContainerDetails> {
        let id_owned = String::from(id);
        Box::pin(async move {
            let inspect =
                Self::inspect_container(self, &id_owned, None::<InspectContainerOptions>).await?;
            Ok(ContainerDetails {
                id: inspect.id.unwrap_or_default(),
                name: inspect
                    .name
                    .map(|name| name.trim_start_matches('/').to_owned())
                    .unwrap_or_default(),
                image_id: inspect.image.unwrap_or_default(),
                running: inspect
                    .state
                    .and_then(|state| state.running)
                    .unwrap_or(false),
            })
        })
    }

    fn list_containers(&self, filters: Filters) -> EngineFuture<'_, Vec<ContainerSummary>> {
        Box::pin(async move {
            let options = ListContainersOptions {
                all: true,
                filters: Some(filters),
                ..ListContainersOptions::default()
            };
            Self::list_containers(self, Some(options)).await
        })
    }

    fn remove_container(&self, id: &str, force: bool) -> EngineFuture<'_, ()> {
        let id_owned = String::from(id);
        Box::pin(async move {
            let options = RemoveContainerOptionsBuilder::new()
                .force(force)
                .v(true)
                .build();
            Self::remove_container(self, &id_owned, Some(options)).await
        })
    }

    fn create_network(&self, request: NetworkCreateRequest) -> EngineFuture<'_, ()> {
        Box::pin(async move { Self::create_network(self, request).await.map(drop) })
    }

    fn connect_network(
        &self,
        network: &str,
        request: NetworkConnectRequest,
    ) -> EngineFuture<'_, ()> {
        let network_owned = String::from(network);
        Box::pin(async move { Self::connect_network(self, &network_owned, request).await })
    }

    fn list_networks(&self, filters: Filters) -> EngineFuture<'_, Vec<NetworkDetails>> {
        Box::pin(async move {
            let options = ListNetworksOptions {
                filters: Some(filters),
                ..ListNetworksOptions::default()
            };
            let networks = Self::list_networks(self, Some(options)).await?;
            Ok(networks
                .into_iter()
                .map(|network| NetworkDetails {
                    name: network.name.unwrap_or_default(),
                    labels: network.labels.unwrap_or_default(),
                })
                .collect())
        })
    }

    fn remove_network(&self, name: &str) -> EngineFuture<'_, ()> {
        let name_owned = String::from(name);
        Box::pin(async move { Self::remove_network(self, &name_owned).await })
    }

    fn create_volume(
        &self,
        name: &str,
        labels: HashMap<String, String>,
    ) -> EngineFuture<'_, ()> {
        let request = VolumeCreateRequest {
            name: Some(String::from(name)),
            labels: Some(labels),
            ..VolumeCreateRequest::default()
        };
        Box::pin(async move { Self::create_volume(self, request).await.map(drop) })
    }

    fn list_volumes(&self, filters: Filters) -> EngineFuture<'_, Vec<String>> {
        Box::pin(async move {
            let options = ListVolumesOptions {
                filters: Some(filters),
                ..ListVolumesOptions::default()
            };
            let response = Self::list_volumes(self, Some(options)).await?;
            Ok(response
                .volumes
                .unwrap_or_default()
                .into_iter()
                .map(|volume| volume.name)
                .collect())
        })
    }

    fn remove_volume(&self, name: &str) -> EngineFuture<'_, ()> {
        let name_owned = String::from(name);
        Box::pin(async move {
            Self::remove_volume(self, &name_owned, None::<RemoveVolumeOptions>).await
        })
    }
}

/// Whether a bollard error is the engine reporting HTTP 404.
#[must_use]
pub fn is_not_found(error: &BollardError) -> bool {
    matches!(
        error,
        BollardError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

/// Whether a bollard error is the engine reporting HTTP 409.
#[must_use]
pub fn is_conflict(error: &BollardError) -> bool {
    matches!(
        error,
        BollardError::DockerResponseServerError {
            status_code: 409,
            ..
        }
    )
}
