//! Dependency-ordered compose deployment and single-container deployment.

use std::collections::BTreeSet;

use bollard::models::{EndpointSettings, NetworkConnectRequest, NetworkCreateRequest};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::materialize::{
    container_body, create_options, network_name, single_container_body,
    volume_name,
};
use super::{DeployPhase, PortMap, StackDeployer};
use crate::channel::{ProgressMessage, ProgressSink};
use crate::compose::{ServiceGraph, ServiceSpec, normalize_project_name};
use crate::engine::labels::{project_labels, service_filter};
use crate::engine::{EngineClient, is_conflict};
use crate::error::{ContainerError, ImageError, StackError, VulnlabError};

const NETWORK_DRIVER: &str = "bridge";

impl<C: EngineClient> StackDeployer<C> {
    /// Deploy every service of `graph` as stack `stack_name`, returning the
    /// merged port map.
    ///
    /// Services without dependencies start first. Each further pass starts
    /// every remaining service whose dependencies the engine reports as
    /// deployed, until a pass starts nothing. Services left over (a cycle or
    /// an unsatisfiable edge) fail the deployment; nothing is rolled back
    /// here, the caller tears the stack down.
    ///
    /// # Errors
    ///
    /// Returns `StackError::UnsatisfiedDependencies` for leftover services,
    /// and network, volume, image, create, attach or start errors as they
    /// occur.
    pub async fn deploy_compose(
        &self,
        graph: &ServiceGraph,
        stack_name: &str,
        cancel: &CancellationToken,
        sink: &dyn ProgressSink,
    ) -> Result<PortMap, VulnlabError> {
        let stack = normalize_project_name(stack_name);
        debug!(
            stack = %stack,
            phase = %DeployPhase::Init,
            services = graph.services.len(),
            "deploying stack"
        );

        let result = self.deploy_passes(graph, &stack, cancel, sink).await;
        match &result {
            Ok(ports) => {
                info!(
                    stack = %stack,
                    phase = %DeployPhase::Deployed,
                    ports = ports.len(),
                    "stack deployed"
                );
                sink.send(ProgressMessage::ok(
                    format!("stack '{stack}' deployed"),
                    json!({ "stack": stack, "ports": ports }),
                ));
            }
            Err(error) => {
                warn!(
                    stack = %stack,
                    phase = %DeployPhase::Failed,
                    error = %error,
                    "stack deployment failed"
                );
            }
        }
        result
    }

    async fn deploy_passes(
        &self,
        graph: &ServiceGraph,
        stack: &str,
        cancel: &CancellationToken,
        sink: &dyn ProgressSink,
    ) -> Result<PortMap, VulnlabError> {
        self.create_stack_resources(graph, stack).await?;

        let mut deployed: BTreeSet<&str> = BTreeSet::new();
        let mut ports = PortMap::new();
        for service in graph.services.iter().filter(|service| service.is_root()) {
            ports.extend(self.deploy_service(graph, service, stack, cancel, sink).await?);
            deployed.insert(&service.name);
        }

        for pass in 1..=graph.services.len() {
            let mut progressed = false;
            for service in &graph.services {
                if deployed.contains(service.name.as_str())
                    || !self.dependencies_ready(stack, service).await?
                {
                    continue;
                }
                ports.extend(self.deploy_service(graph, service, stack, cancel, sink).await?);
                deployed.insert(&service.name);
                progressed = true;
            }
            debug!(stack, pass, deployed = deployed.len(), "dependency pass finished");
            if !progressed {
                break;
            }
        }

        let pending: Vec<String> = graph
            .services
            .iter()
            .filter(|service| !deployed.contains(service.name.as_str()))
            .map(|service| service.name.clone())
            .collect();
        if !pending.is_empty() {
            return Err(StackError::UnsatisfiedDependencies {
                stack: String::from(stack),
                services: pending,
            }
            .into());
        }
        Ok(ports)
    }

    async fn create_stack_resources(
        &self,
        graph: &ServiceGraph,
        stack: &str,
    ) -> Result<(), VulnlabError> {
        let network = network_name(stack);
        let request = NetworkCreateRequest {
            name: network.clone(),
            driver: Some(String::from(NETWORK_DRIVER)),
            labels: Some(project_labels(stack)),
            ..NetworkCreateRequest::default()
        };
        match self.client.create_network(request).await {
            Ok(()) => info!(stack, network = %network, "created stack network"),
            Err(error) if is_conflict(&error) => {
                debug!(stack, network = %network, "stack network already exists");
            }
            Err(error) => {
                return Err(ContainerError::NetworkFailed {
                    network,
                    message: error.to_string(),
                }
                .into());
            }
        }

        for declared in &graph.volumes {
            let volume = volume_name(stack, declared);
            match self.client.create_volume(&volume, project_labels(stack)).await {
                Ok(()) => info!(stack, volume = %volume, "created stack volume"),
                Err(error) if is_conflict(&error) => {
                    debug!(stack, volume = %volume, "stack volume already exists");
                }
                Err(error) => {
                    return Err(ContainerError::VolumeFailed {
                        volume,
                        message: error.to_string(),
                    }
                    .into());
                }
            }
        }
        debug!(stack, phase = %DeployPhase::NetworkCreated, "stack resources ready");
        Ok(())
    }

    /// Whether every dependency of `service` has a container in the stack.
    async fn dependencies_ready(
        &self,
        stack: &str,
        service: &ServiceSpec,
    ) -> Result<bool, VulnlabError> {
        for dependency in &service.depends_on {
            let containers = self
                .client
                .list_containers(service_filter(stack, dependency))
                .await
                .map_err(|error| ContainerError::ListFailed {
                    resource: "containers",
                    message: error.to_string(),
                })?;
            if containers.is_empty() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn deploy_service(
        &self,
        graph: &ServiceGraph,
        service: &ServiceSpec,
        stack: &str,
        cancel: &CancellationToken,
        sink: &dyn ProgressSink,
    ) -> Result<PortMap, VulnlabError> {
        let name = service.name.as_str();
        if let Some(build) = &service.build {
            if !self.images.image_exists(&service.image).await? {
                self.images
                    .build_with_context(
                        &build.context,
                        &build.dockerfile,
                        &service.image,
                        cancel,
                        sink,
                    )
                    .await?;
            }
        } else {
            self.images.ensure_image(&service.image, cancel, sink).await?;
        }
        debug!(
            stack,
            service = name,
            image = %service.image,
            phase = %DeployPhase::ImageReady,
            "service image ready"
        );

        let container = container_body(graph, service, stack)?;
        let id = self
            .create_named(&container.name, container.body)
            .await?;
        self.state.register_container(&id, &container.name);
        debug!(
            stack,
            service = name,
            container_id = %id,
            phase = %DeployPhase::ContainerCreated,
            "service container created"
        );

        let network = network_name(stack);
        let attach = NetworkConnectRequest {
            container: id.clone(),
            endpoint_config: Some(EndpointSettings {
                aliases: Some(vec![String::from(name)]),
                ..EndpointSettings::default()
            }),
        };
        self.client
            .connect_network(&network, attach)
            .await
            .map_err(|error| ContainerError::NetworkFailed {
                network: network.clone(),
                message: error.to_string(),
            })?;
        debug!(
            stack,
            service = name,
            container_id = %id,
            phase = %DeployPhase::NetworkAttached,
            "service attached"
        );

        self.start(&id).await?;
        info!(
            stack,
            service = name,
            container_id = %id,
            phase = %DeployPhase::Started,
            "service started"
        );
        sink.send(ProgressMessage::ok(
            format!("service '{name}' started"),
            json!({
                "stack": stack,
                "service": name,
                "container_id": id,
                "ports": container.ports,
            }),
        ));
        Ok(container.ports)
    }

    /// Deploy `image` as a single container named `container_name`,
    /// publishing every port the image exposes.
    ///
    /// Returns the container id and its port map. The container is recorded
    /// in the created-container registry.
    ///
    /// # Errors
    ///
    /// Returns image errors from the pull, `ContainerError::CreateFailed` or
    /// `ContainerError::StartFailed` when the container cannot be created or
    /// does not stay running.
    pub async fn deploy_single(
        &self,
        image: &str,
        container_name: &str,
        cancel: &CancellationToken,
        sink: &dyn ProgressSink,
    ) -> Result<(String, PortMap), VulnlabError> {
        self.images.ensure_image(image, cancel, sink).await?;
        let details = self
            .client
            .inspect_image(image)
            .await
            .map_err(|error| ImageError::InspectFailed {
                image: String::from(image),
                message: error.to_string(),
            })?;

        let (body, ports) = single_container_body(image, &details.exposed_ports)?;
        let id = self.create_named(container_name, body).await?;
        self.state.register_container(&id, container_name);
        if let Err(error) = self.start(&id).await {
            warn!(container_id = %id, image, error = %error, "container failed to start");
            self.discard(&id).await;
            return Err(error);
        }

        let inspected = self
            .client
            .inspect_container(&id)
            .await
            .map_err(|error| ContainerError::InspectFailed {
                container_id: id.clone(),
                message: error.to_string(),
            })?;
        if !inspected.running {
            warn!(container_id = %id, image, "container exited right after start");
            self.discard(&id).await;
            return Err(ContainerError::StartFailed {
                container_id: id,
                message: String::from("container is not running after start"),
            }
            .into());
        }

        info!(container_id = %id, image, ports = ports.len(), "container deployed");
        sink.send(ProgressMessage::ok(
            format!("container '{container_name}' started"),
            json!({ "container_id": id, "ports": ports }),
        ));
        Ok((id, ports))
    }

    /// Force-remove a container that never became usable.
    async fn discard(&self, id: &str) {
        if let Err(error) = self.remove_container(id, true).await {
            warn!(container_id = id, error = %error, "failed to remove unusable container");
        }
    }

    async fn create_named(
        &self,
        name: &str,
        body: bollard::models::ContainerCreateBody,
    ) -> Result<String, VulnlabError> {
        let response = self
            .client
            .create_container(Some(create_options(name)), body)
            .await
            .map_err(|error| ContainerError::CreateFailed {
                name: String::from(name),
                message: error.to_string(),
            })?;
        for warning in &response.warnings {
            warn!(container = name, warning = %warning, "engine warning on create");
        }
        Ok(response.id)
    }

    async fn start(&self, id: &str) -> Result<(), VulnlabError> {
        self.client
            .start_container(id)
            .await
            .map_err(|error| {
                ContainerError::StartFailed {
                    container_id: String::from(id),
                    message: error.to_string(),
                }
                .into()
            })
    }
}

