//! Translation of resolved compose services into container-create payloads.

use std::collections::HashMap;

use bollard::models::{
    ContainerCreateBody, HealthConfig, HostConfig, Mount, MountTypeEnum, PortBinding,
    RestartPolicy, RestartPolicyNameEnum,
};
use bollard::query_parameters::{CreateContainerOptions, CreateContainerOptionsBuilder};
use camino::Utf8Path;

use super::PortMap;
use crate::compose::{
    HealthcheckSpec, PortSpec, ResourceSpec, RestartSpec, ServiceGraph, ServiceSpec, VolumeSpec,
    clean_path,
};
use crate::engine::labels::service_labels;
use crate::error::{ComposeError, VulnlabError};
use crate::ports::allocate_port;

const BIND_ALL_INTERFACES: &str = "0.0.0.0";

/// A container-create payload plus the host ports it publishes.
#[derive(Debug, Clone)]
pub struct ServiceContainer {
    /// Container name, `{stack}-{service}`.
    pub name: String,
    /// Engine payload.
    pub body: ContainerCreateBody,
    /// Container port (without protocol) to allocated host port.
    pub ports: PortMap,
}

/// Container name for a stack service.
#[must_use]
pub fn container_name(stack: &str, service: &str) -> String {
    format!("{stack}-{service}")
}

/// Volume name for a stack's named volume.
#[must_use]
pub fn volume_name(stack: &str, volume: &str) -> String {
    format!("{stack}_{volume}")
}

/// Network name of a stack.
#[must_use]
pub fn network_name(stack: &str) -> String {
    format!("{stack}_default")
}

pub(super) fn create_options(name: &str) -> CreateContainerOptions {
    CreateContainerOptionsBuilder::new().name(name).build()
}

/// Build the create payload for `service`, allocating a host port for each
/// published container port.
///
/// # Errors
///
/// Returns `ComposeError::InvalidVolume` when a bind source cannot be made
/// absolute and `ContainerError::PortAllocationFailed` when no port is free.
pub fn container_body(
    graph: &ServiceGraph,
    service: &ServiceSpec,
    stack: &str,
) -> Result<ServiceContainer, VulnlabError> {
    let (port_bindings, ports) = publish_ports(&service.ports)?;
    let mut exposed_ports = port_bindings.keys().cloned().collect::<Vec<_>>();
    exposed_ports.sort();
    let mounts = service
        .volumes
        .iter()
        .map(|volume| mount(graph.compose_dir.as_path(), service, stack, volume))
        .collect::<Result<Vec<_>, _>>()?;

    let host_config = HostConfig {
        port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
        mounts: (!mounts.is_empty()).then_some(mounts),
        restart_policy: service.restart.as_ref().map(restart_policy),
        ..resource_limits(service.resources)
    };

    let body = ContainerCreateBody {
        image: Some(service.image.clone()),
        env: (!service.environment.is_empty()).then(|| service.environment.clone()),
        cmd: service.command.clone(),
        entrypoint: service.entrypoint.clone(),
        working_dir: service.working_dir.clone(),
        user: service.user.clone(),
        healthcheck: service.healthcheck.as_ref().map(health_config),
        labels: Some(service_labels(stack, &service.name)),
        exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
        host_config: Some(host_config),
        ..ContainerCreateBody::default()
    };

    Ok(ServiceContainer {
        name: container_name(stack, &service.name),
        body,
        ports,
    })
}

/// Build the payload for a single-image container exposing `exposed_ports`
/// (engine keys such as `80/tcp`).
///
/// # Errors
///
/// Returns `ContainerError::PortAllocationFailed` when no port is free.
pub fn single_container_body(
    image: &str,
    exposed_ports: &[String],
) -> Result<(ContainerCreateBody, PortMap), VulnlabError> {
    let specs: Vec<PortSpec> = exposed_ports
        .iter()
        .filter_map(|key| {
            let (port, protocol) = key.split_once('/').unwrap_or((key.as_str(), "tcp"));
            port.parse().ok().map(|container_port| PortSpec {
                container_port,
                protocol: String::from(protocol),
            })
        })
        .collect();
    let (port_bindings, ports) = publish_ports(&specs)?;

    let body = ContainerCreateBody {
        image: Some(String::from(image)),
        host_config: Some(HostConfig {
            port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
            ..HostConfig::default()
        }),
        ..ContainerCreateBody::default()
    };
    Ok((body, ports))
}

type PortBindings = HashMap<String, Option<Vec<PortBinding>>>;

fn publish_ports(specs: &[PortSpec]) -> Result<(PortBindings, PortMap), VulnlabError> {
    let mut bindings = PortBindings::new();
    let mut ports = PortMap::new();
    for spec in specs {
        let host_port = allocate_port()?;
        bindings.insert(
            spec.key(),
            Some(vec![PortBinding {
                host_ip: Some(String::from(BIND_ALL_INTERFACES)),
                host_port: Some(host_port.to_string()),
            }]),
        );
        ports.insert(spec.container_port.to_string(), host_port);
    }
    Ok((bindings, ports))
}

fn mount(
    compose_dir: &Utf8Path,
    service: &ServiceSpec,
    stack: &str,
    volume: &VolumeSpec,
) -> Result<Mount, ComposeError> {
    let mount = match volume {
        VolumeSpec::Bind {
            source,
            target,
            read_only,
        } => Mount {
            target: Some(target.clone()),
            source: Some(resolve_bind_source(compose_dir, &service.name, source)?),
            typ: Some(MountTypeEnum::BIND),
            read_only: Some(*read_only),
            ..Mount::default()
        },
        VolumeSpec::Named {
            name,
            target,
            read_only,
        } => Mount {
            target: Some(target.clone()),
            source: Some(volume_name(stack, name)),
            typ: Some(MountTypeEnum::VOLUME),
            read_only: Some(*read_only),
            ..Mount::default()
        },
        VolumeSpec::Anonymous { target } => Mount {
            target: Some(target.clone()),
            typ: Some(MountTypeEnum::VOLUME),
            ..Mount::default()
        },
    };
    Ok(mount)
}

/// Resolve a bind source against the compose directory.
///
/// Relative sources are joined to `compose_dir`; the result is cleaned and
/// uses forward slashes. On Windows the result must carry a drive letter,
/// elsewhere it must be absolute.
pub(crate) fn resolve_bind_source(
    compose_dir: &Utf8Path,
    service: &str,
    source: &str,
) -> Result<String, ComposeError> {
    let normalized = source.replace('\\', "/");
    let candidate = Utf8Path::new(&normalized);
    let joined = if candidate.is_absolute() || has_drive_letter(&normalized) {
        candidate.to_path_buf()
    } else {
        compose_dir.join(candidate)
    };
    let resolved = clean_path(&joined).as_str().replace('\\', "/");

    let invalid = |reason: &'static str| ComposeError::InvalidVolume {
        service: String::from(service),
        source_path: String::from(source),
        reason,
    };
    if cfg!(windows) {
        if !has_drive_letter(&resolved) {
            return Err(invalid("bind source must include a drive letter"));
        }
    } else if !resolved.starts_with('/') {
        return Err(invalid("bind source must be an absolute path"));
    }
    Ok(resolved)
}

fn has_drive_letter(path: &str) -> bool {
    let mut chars = path.chars();
    matches!(
        (chars.next(), chars.next()),
        (Some(letter), Some(':')) if letter.is_ascii_alphabetic()
    )
}

fn health_config(spec: &HealthcheckSpec) -> HealthConfig {
    HealthConfig {
        test: Some(spec.test.clone()),
        interval: spec.interval,
        timeout: spec.timeout,
        retries: spec.retries,
        start_period: spec.start_period,
        ..HealthConfig::default()
    }
}

fn restart_policy(spec: &RestartSpec) -> RestartPolicy {
    let name = match spec.policy.as_str() {
        "always" => RestartPolicyNameEnum::ALWAYS,
        "unless-stopped" => RestartPolicyNameEnum::UNLESS_STOPPED,
        "on-failure" => RestartPolicyNameEnum::ON_FAILURE,
        "no" => RestartPolicyNameEnum::NO,
        _ => RestartPolicyNameEnum::EMPTY,
    };
    RestartPolicy {
        name: Some(name),
        maximum_retry_count: spec.max_attempts,
    }
}

fn resource_limits(resources: ResourceSpec) -> HostConfig {
    if !resources.is_limited() {
        return HostConfig::default();
    }
    let non_zero = |value: i64| (value != 0).then_some(value);
    HostConfig {
        nano_cpus: non_zero(resources.nano_cpus),
        memory: non_zero(resources.memory),
        memory_reservation: non_zero(resources.memory_reservation),
        ..HostConfig::default()
    }
}
