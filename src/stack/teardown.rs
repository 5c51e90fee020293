//! Label-driven stack teardown and the created-container registry.

use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use super::StackDeployer;
use crate::engine::labels::{PROJECT_LABEL, any_project_filter, project_filter};
use crate::engine::{EngineClient, is_not_found};
use crate::error::{ContainerError, StackError, VulnlabError};

impl<C: EngineClient> StackDeployer<C> {
    /// Remove every container, network and volume labelled with `stack`,
    /// in that order.
    ///
    /// Failures do not stop the sweep. A stack with nothing left is removed
    /// successfully, so repeating the call is harmless.
    ///
    /// # Errors
    ///
    /// Returns `StackError::PartialTeardown` carrying the last failure when
    /// any resource could not be listed or removed.
    pub async fn remove_stack(&self, stack: &str) -> Result<(), VulnlabError> {
        let filter = project_filter(stack);
        let mut last_error: Option<VulnlabError> = None;

        match self.client.list_containers(filter.clone()).await {
            Ok(containers) => {
                for id in containers.into_iter().filter_map(|container| container.id) {
                    if let Err(error) = self.remove_container(&id, true).await {
                        warn!(
                            stack,
                            container_id = %id,
                            error = %error,
                            "failed to remove stack container"
                        );
                        last_error = Some(error);
                    }
                }
            }
            Err(error) => {
                warn!(stack, error = %error, "failed to list stack containers");
                last_error = Some(list_failed("containers", &error));
            }
        }

        match self.client.list_networks(filter.clone()).await {
            Ok(networks) => {
                for network in networks {
                    match self.client.remove_network(&network.name).await {
                        Ok(()) => info!(stack, network = %network.name, "removed stack network"),
                        Err(error) if is_not_found(&error) => {}
                        Err(error) => {
                            warn!(
                                stack,
                                network = %network.name,
                                error = %error,
                                "failed to remove stack network"
                            );
                            last_error = Some(
                                ContainerError::NetworkFailed {
                                    network: network.name,
                                    message: error.to_string(),
                                }
                                .into(),
                            );
                        }
                    }
                }
            }
            Err(error) => {
                warn!(stack, error = %error, "failed to list stack networks");
                last_error = Some(list_failed("networks", &error));
            }
        }

        match self.client.list_volumes(filter).await {
            Ok(volumes) => {
                for volume in volumes {
                    match self.client.remove_volume(&volume).await {
                        Ok(()) => info!(stack, volume = %volume, "removed stack volume"),
                        Err(error) if is_not_found(&error) => {}
                        Err(error) => {
                            warn!(
                                stack,
                                volume = %volume,
                                error = %error,
                                "failed to remove stack volume"
                            );
                            last_error = Some(
                                ContainerError::VolumeFailed {
                                    volume,
                                    message: error.to_string(),
                                }
                                .into(),
                            );
                        }
                    }
                }
            }
            Err(error) => {
                warn!(stack, error = %error, "failed to list stack volumes");
                last_error = Some(list_failed("volumes", &error));
            }
        }

        match last_error {
            None => {
                info!(stack, "stack removed");
                Ok(())
            }
            Some(last) => Err(StackError::PartialTeardown {
                stack: String::from(stack),
                last: Box::new(last),
            }
            .into()),
        }
    }

    /// Remove one container together with its anonymous volumes and forget
    /// it in the created-container registry. A missing container counts as
    /// removed.
    ///
    /// # Errors
    ///
    /// Returns `ContainerError::RemoveFailed` when the engine refuses.
    pub async fn remove_container(&self, id: &str, force: bool) -> Result<(), VulnlabError> {
        match self.client.remove_container(id, force).await {
            Ok(()) => info!(container_id = id, "container removed"),
            Err(error) if is_not_found(&error) => {
                debug!(container_id = id, "container already absent");
            }
            Err(error) => {
                return Err(ContainerError::RemoveFailed {
                    container_id: String::from(id),
                    message: error.to_string(),
                }
                .into());
            }
        }
        self.state.unregister_container(id);
        Ok(())
    }

    /// Force-remove every container this process created.
    ///
    /// # Errors
    ///
    /// Returns the last removal failure; every container is still attempted.
    pub async fn remove_all_created(&self) -> Result<(), VulnlabError> {
        let mut last_error = None;
        for (id, name) in self.state.created_containers() {
            if let Err(error) = self.remove_container(&id, true).await {
                warn!(
                    container_id = %id,
                    container = %name,
                    error = %error,
                    "failed to remove created container"
                );
                last_error = Some(error);
            }
        }
        last_error.map_or(Ok(()), Err)
    }

    /// Names of every stack with a labelled container or network.
    ///
    /// # Errors
    ///
    /// Returns `ContainerError::ListFailed` when either listing fails.
    pub async fn stack_names(&self) -> Result<Vec<String>, VulnlabError> {
        let containers = self
            .client
            .list_containers(any_project_filter())
            .await
            .map_err(|error| list_failed("containers", &error))?;
        let networks = self
            .client
            .list_networks(any_project_filter())
            .await
            .map_err(|error| list_failed("networks", &error))?;

        let names: BTreeSet<String> = containers
            .into_iter()
            .filter_map(|container| container.labels)
            .chain(networks.into_iter().map(|network| network.labels))
            .filter_map(|mut labels| labels.remove(PROJECT_LABEL))
            .collect();
        Ok(names.into_iter().collect())
    }
}

fn list_failed(resource: &'static str, error: &bollard::errors::Error) -> VulnlabError {
    ContainerError::ListFailed {
        resource,
        message: error.to_string(),
    }
    .into()
}
