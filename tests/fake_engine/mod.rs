//! In-memory container engine for integration and behavioural tests.
//!
//! The fake keeps images, containers, networks and volumes in maps and
//! answers label-filtered list calls the way the engine does, so the image
//! pipeline, the stack deployer and teardown run unmodified against it.

#![allow(
    dead_code,
    reason = "each test binary exercises a different part of the fake"
)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use bollard::errors::Error as BollardError;
use bollard::models::{
    BuildInfo, ContainerCreateBody, ContainerCreateResponse, ContainerSummary, CreateImageInfo,
    ImageSummary, NetworkConnectRequest, NetworkCreateRequest,
};
use bollard::query_parameters::{BuildImageOptions, CreateContainerOptions};
use futures_util::StreamExt;
use vulnlab::engine::labels::labels_match;
use vulnlab::engine::{
    ContainerDetails, EngineClient, EngineFuture, EngineStream, Filters, ImageDetails,
    NetworkDetails,
};

#[derive(Debug, Clone)]
struct FakeContainer {
    id: String,
    name: String,
    image: String,
    labels: HashMap<String, String>,
    running: bool,
}

#[derive(Debug, Default)]
struct Inner {
    /// Local images and the ports they expose.
    images: BTreeMap<String, Vec<String>>,
    /// Images the registry can serve.
    registry: BTreeMap<String, Vec<String>>,
    containers: BTreeMap<String, FakeContainer>,
    networks: BTreeMap<String, HashMap<String, String>>,
    volumes: BTreeMap<String, HashMap<String, String>>,
    /// Images whose containers exit immediately after start.
    crashing: BTreeSet<String>,
    /// Container names whose removal the engine refuses.
    stuck: BTreeSet<String>,
    /// Container names in start order.
    started: Vec<String>,
    next_id: u64,
}

/// A container engine held entirely in memory.
#[derive(Debug, Default)]
pub struct FakeEngine {
    inner: Mutex<Inner>,
}

fn not_found(what: &str) -> BollardError {
    BollardError::DockerResponseServerError {
        status_code: 404,
        message: format!("no such {what}"),
    }
}

fn conflict(what: &str) -> BollardError {
    BollardError::DockerResponseServerError {
        status_code: 409,
        message: format!("{what} already exists"),
    }
}

fn done<T: Send + 'static>(value: Result<T, BollardError>) -> EngineFuture<'static, T> {
    Box::pin(async move { value })
}

fn ports(exposed: &[&str]) -> Vec<String> {
    exposed.iter().map(|port| String::from(*port)).collect()
}

impl FakeEngine {
    /// An engine with no images and no resources.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `image` available locally, exposing `exposed` (e.g. `80/tcp`).
    pub fn with_local_image(self, image: &str, exposed: &[&str]) -> Self {
        self.lock().images.insert(String::from(image), ports(exposed));
        self
    }

    /// Let the registry serve `image`.
    pub fn with_registry_image(self, image: &str, exposed: &[&str]) -> Self {
        self.lock()
            .registry
            .insert(String::from(image), ports(exposed));
        self
    }

    /// Containers running `image` stop right after they start.
    pub fn crashing(self, image: &str) -> Self {
        self.lock().crashing.insert(String::from(image));
        self
    }

    /// Refuse to remove the container called `name`.
    pub fn refuse_removal_of(&self, name: &str) {
        self.lock().stuck.insert(String::from(name));
    }

    /// Whether `image` is stored locally.
    pub fn has_image(&self, image: &str) -> bool {
        self.lock().images.contains_key(image)
    }

    /// Names of every container, sorted.
    pub fn container_names(&self) -> Vec<String> {
        self.lock()
            .containers
            .values()
            .map(|container| container.name.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Container names in the order they were started.
    pub fn start_order(&self) -> Vec<String> {
        self.lock().started.clone()
    }

    /// Names of every network.
    pub fn network_names(&self) -> Vec<String> {
        self.lock().networks.keys().cloned().collect()
    }

    /// Names of every volume.
    pub fn volume_names(&self) -> Vec<String> {
        self.lock().volumes.keys().cloned().collect()
    }

    fn container_id(inner: &Inner, id_or_name: &str) -> Option<String> {
        inner
            .containers
            .values()
            .find(|container| container.id == id_or_name || container.name == id_or_name)
            .map(|container| container.id.clone())
    }
}

impl EngineClient for FakeEngine {
    fn ping(&self) -> EngineFuture<'_, ()> {
        done(Ok(()))
    }

    fn inspect_image(&self, name: &str) -> EngineFuture<'_, ImageDetails> {
        let result = self
            .lock()
            .images
            .get(name)
            .map(|exposed| ImageDetails {
                id: format!("sha256:{name}"),
                repo_tags: vec![String::from(name)],
                exposed_ports: exposed.clone(),
            })
            .ok_or_else(|| not_found("image"));
        done(result)
    }

    fn list_images(&self, filters: Filters) -> EngineFuture<'_, Vec<ImageSummary>> {
        let wanted = filters.get("reference").cloned().unwrap_or_default();
        let summaries = self
            .lock()
            .images
            .keys()
            .filter(|name| wanted.is_empty() || wanted.contains(*name))
            .map(|name| ImageSummary {
                id: format!("sha256:{name}"),
                repo_tags: vec![name.clone()],
                ..ImageSummary::default()
            })
            .collect();
        done(Ok(summaries))
    }

    fn pull_image(&self, name: &str) -> EngineStream<'_, CreateImageInfo> {
        let mut inner = self.lock();
        let events = match inner.registry.get(name).cloned() {
            Some(exposed) => {
                inner.images.insert(String::from(name), exposed);
                vec![Ok(CreateImageInfo {
                    status: Some(String::from("Download complete")),
                    ..CreateImageInfo::default()
                })]
            }
            None => vec![Err(not_found("image in registry"))],
        };
        futures_util::stream::iter(events).boxed()
    }

    fn build_image(
        &self,
        _options: BuildImageOptions,
        _context: Vec<u8>,
    ) -> EngineStream<'_, BuildInfo> {
        futures_util::stream::iter(vec![Err(BollardError::DockerResponseServerError {
            status_code: 500,
            message: String::from("builds are not supported by the fake engine"),
        })])
        .boxed()
    }

    fn remove_image(&self, name: &str, _force: bool) -> EngineFuture<'_, ()> {
        let removed = self.lock().images.remove(name);
        done(removed.map(|_| ()).ok_or_else(|| not_found("image")))
    }

    fn create_container(
        &self,
        options: Option<CreateContainerOptions>,
        config: ContainerCreateBody,
    ) -> EngineFuture<'_, ContainerCreateResponse> {
        let mut inner = self.lock();
        inner.next_id = inner.next_id.saturating_add(1);
        let id = format!("container-{}", inner.next_id);
        let name = options
            .and_then(|options| options.name)
            .unwrap_or_else(|| id.clone());
        if inner.containers.values().any(|container| container.name == name) {
            return done(Err(conflict("container")));
        }
        let image = config.image.unwrap_or_default();
        if !inner.images.contains_key(&image) {
            return done(Err(not_found("image")));
        }
        inner.containers.insert(
            id.clone(),
            FakeContainer {
                id: id.clone(),
                name,
                image,
                labels: config.labels.unwrap_or_default(),
                running: false,
            },
        );
        done(Ok(ContainerCreateResponse {
            id,
            warnings: Vec::new(),
        }))
    }

    fn start_container(&self, id: &str) -> EngineFuture<'_, ()> {
        let mut inner = self.lock();
        let crashing = inner.crashing.clone();
        let Some(container) = inner.containers.get_mut(id) else {
            return done(Err(not_found("container")));
        };
        container.running = !crashing.contains(&container.image);
        let name = container.name.clone();
        inner.started.push(name);
        done(Ok(()))
    }

    fn inspect_container(&self, id: &str) -> EngineFuture<'_, ContainerDetails> {
        let inner = self.lock();
        let result = Self::container_id(&inner, id)
            .and_then(|key| inner.containers.get(&key))
            .map(|container| ContainerDetails {
                id: container.id.clone(),
                name: container.name.clone(),
                image_id: format!("sha256:{}", container.image),
                running: container.running,
            })
            .ok_or_else(|| not_found("container"));
        done(result)
    }

    fn list_containers(&self, filters: Filters) -> EngineFuture<'_, Vec<ContainerSummary>> {
        let summaries = self
            .lock()
            .containers
            .values()
            .filter(|container| labels_match(&container.labels, &filters))
            .map(|container| ContainerSummary {
                id: Some(container.id.clone()),
                names: Some(vec![format!("/{}", container.name)]),
                image: Some(container.image.clone()),
                image_id: Some(format!("sha256:{}", container.image)),
                labels: Some(container.labels.clone()),
                ..ContainerSummary::default()
            })
            .collect();
        done(Ok(summaries))
    }

    fn remove_container(&self, id: &str, _force: bool) -> EngineFuture<'_, ()> {
        let mut inner = self.lock();
        let Some(key) = Self::container_id(&inner, id) else {
            return done(Err(not_found("container")));
        };
        let stuck = inner
            .containers
            .get(&key)
            .is_some_and(|container| inner.stuck.contains(&container.name));
        if stuck {
            return done(Err(BollardError::DockerResponseServerError {
                status_code: 500,
                message: String::from("removal refused"),
            }));
        }
        inner.containers.remove(&key);
        done(Ok(()))
    }

    fn create_network(&self, request: NetworkCreateRequest) -> EngineFuture<'_, ()> {
        let mut inner = self.lock();
        if inner.networks.contains_key(&request.name) {
            return done(Err(conflict("network")));
        }
        inner
            .networks
            .insert(request.name, request.labels.unwrap_or_default());
        done(Ok(()))
    }

    fn connect_network(
        &self,
        network: &str,
        _request: NetworkConnectRequest,
    ) -> EngineFuture<'_, ()> {
        let known = self.lock().networks.contains_key(network);
        done(if known { Ok(()) } else { Err(not_found("network")) })
    }

    fn list_networks(&self, filters: Filters) -> EngineFuture<'_, Vec<NetworkDetails>> {
        let networks = self
            .lock()
            .networks
            .iter()
            .filter(|(_, labels)| labels_match(labels, &filters))
            .map(|(name, labels)| NetworkDetails {
                name: name.clone(),
                labels: labels.clone(),
            })
            .collect();
        done(Ok(networks))
    }

    fn remove_network(&self, name: &str) -> EngineFuture<'_, ()> {
        let removed = self.lock().networks.remove(name);
        done(removed.map(|_| ()).ok_or_else(|| not_found("network")))
    }

    fn create_volume(&self, name: &str, labels: HashMap<String, String>) -> EngineFuture<'_, ()> {
        let mut inner = self.lock();
        if inner.volumes.contains_key(name) {
            return done(Err(conflict("volume")));
        }
        inner.volumes.insert(String::from(name), labels);
        done(Ok(()))
    }

    fn list_volumes(&self, filters: Filters) -> EngineFuture<'_, Vec<String>> {
        let volumes = self
            .lock()
            .volumes
            .iter()
            .filter(|(_, labels)| labels_match(labels, &filters))
            .map(|(name, _)| name.clone())
            .collect();
        done(Ok(volumes))
    }

    fn remove_volume(&self, name: &str) -> EngineFuture<'_, ()> {
        let removed = self.lock().volumes.remove(name);
        done(removed.map(|_| ()).ok_or_else(|| not_found("volume")))
    }
}
