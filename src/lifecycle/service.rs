//! Environment registration and per-user instance provisioning.

use std::sync::Arc;

use camino::Utf8Path;
use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::model::{
    DeploymentTarget, EnvKind, InstanceStatus, NewEnv, PortMap, Requester, VulEnv, VulInstance,
};
use super::store::LabStore;
use crate::channel::ProgressSink;
use crate::compose::{
    ComposeResolver, ServiceGraph, default_project_name, is_file, normalize_project_name,
};
use crate::engine::EngineClient;
use crate::error::{LabError, VulnlabError};
use crate::stack::StackDeployer;

/// Instance lifetime policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleSettings {
    /// Lifetime of a new instance.
    pub default_ttl: Duration,
    /// Amount added by [`LabService::extend_expiry`].
    pub extension: Duration,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            default_ttl: Duration::minutes(30),
            extension: Duration::minutes(30),
        }
    }
}

/// Name of the stack or container backing `user_id`'s copy of `env_name`.
#[must_use]
pub fn deployment_name(user_id: u64, env_name: &str) -> String {
    normalize_project_name(&format!("lab-{user_id}-{env_name}"))
}

/// Lab operations over an engine and a store.
#[derive(Debug)]
pub struct LabService<C, S, E = mockable::DefaultEnv> {
    deployer: StackDeployer<C>,
    store: Arc<S>,
    resolver: ComposeResolver<E>,
    settings: LifecycleSettings,
}

impl<C, S, E> LabService<C, S, E>
where
    C: EngineClient,
    S: LabStore,
    E: mockable::Env + Send + Sync,
{
    /// Assemble a service.
    #[must_use]
    pub const fn new(
        deployer: StackDeployer<C>,
        store: Arc<S>,
        resolver: ComposeResolver<E>,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            deployer,
            store,
            resolver,
            settings,
        }
    }

    /// The backing store.
    #[must_use]
    pub const fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The stack deployer.
    #[must_use]
    pub const fn deployer(&self) -> &StackDeployer<C> {
        &self.deployer
    }

    /// The lifetime policy.
    #[must_use]
    pub const fn settings(&self) -> LifecycleSettings {
        self.settings
    }

    /// Register an environment after making its images available locally.
    ///
    /// Every image the environment needs is pulled (or built, for compose
    /// build services) and gains one reference in the shared reference map.
    ///
    /// # Errors
    ///
    /// Returns `LabError::MissingField` when the name or the kind's source is
    /// empty, `LabError::EnvNameTaken` for a duplicate name,
    /// `LabError::InvalidComposePath` for a compose path that is not an
    /// existing `.yml`/`.yaml` file, and image or compose errors from the
    /// pre-pull.
    pub async fn create_env(
        &self,
        def: NewEnv,
        cancel: &CancellationToken,
        sink: &dyn ProgressSink,
    ) -> Result<VulEnv, VulnlabError> {
        let env_name = def.env_name.trim();
        if env_name.is_empty() {
            return Err(LabError::MissingField { field: "env_name" }.into());
        }
        if self.store.env_by_name(env_name).await?.is_some() {
            return Err(LabError::EnvNameTaken {
                name: String::from(env_name),
            }
            .into());
        }

        match def.env_kind {
            EnvKind::SingleImage => {
                let image = non_empty(def.base_image.as_deref())
                    .ok_or(LabError::MissingField { field: "base_image" })?;
                let images = self.deployer.images();
                images.ensure_image(image, cancel, sink).await?;
                let references = images.state().add_image_reference(image);
                debug!(image, references, "recorded image reference");
            }
            EnvKind::Composite => {
                let compose = def
                    .base_compose
                    .as_deref()
                    .filter(|path| !path.as_str().is_empty())
                    .ok_or(LabError::MissingField { field: "base_compose" })?;
                check_compose_path(compose)?;
                let graph = self.resolve_shared(compose)?;
                self.deployer
                    .images()
                    .prepare_compose_images(&graph, cancel, sink)
                    .await?;
            }
        }

        let now = Utc::now();
        let env = VulEnv {
            id: 0,
            env_name: String::from(env_name),
            env_desc: def.env_desc,
            env_kind: def.env_kind,
            base_image: def.base_image,
            base_compose: def.base_compose,
            degree: def.degree,
            rank: def.rank,
            source: def.source,
            open_level: def.open_level,
            cost: def.cost,
            created_at: now,
            updated_at: now,
        };
        let stored = self.store.insert_env(env).await?;
        info!(env_id = stored.id, env = %stored.env_name, "environment registered");
        Ok(stored)
    }

    /// Environments open to `requester`.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn list_envs(&self, requester: &Requester) -> Result<Vec<VulEnv>, VulnlabError> {
        self.store.envs_open_to(requester.access_level).await
    }

    /// Tear down every instance of an environment, delete their records,
    /// optionally remove the environment's images, and delete the
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns `LabError::EnvNotFound`, the last teardown failure (records
    /// are kept so the call can be retried), image removal errors or store
    /// failures.
    pub async fn delete_env(&self, env_id: u64, delete_images: bool) -> Result<(), VulnlabError> {
        let env = self.env(env_id).await?;

        let instances = self.store.instances_by_env(env_id).await?;
        let mut last_error = None;
        for instance in instances
            .iter()
            .filter(|instance| instance.status == InstanceStatus::Running)
        {
            if let Err(error) = self.teardown(instance).await {
                warn!(
                    instance_id = instance.id,
                    user_id = instance.user_id,
                    target = %instance.target,
                    error = %error,
                    "failed to tear down instance"
                );
                last_error = Some(error);
            }
        }
        if let Some(error) = last_error {
            return Err(error);
        }
        let removed = self.store.delete_instances_by_env(env_id).await?;
        debug!(env_id, removed, "instance records deleted");

        if delete_images {
            self.remove_env_images(&env).await?;
        }

        self.store.delete_env(env_id).await?;
        info!(env_id, env = %env.env_name, "environment deleted");
        Ok(())
    }

    async fn remove_env_images(&self, env: &VulEnv) -> Result<(), VulnlabError> {
        let images = self.deployer.images();
        match env.env_kind {
            EnvKind::Composite => {
                if let Some(compose) = env.base_compose.as_deref() {
                    let graph = self.resolve_shared(compose)?;
                    images.remove_compose_images(&graph).await?;
                }
            }
            EnvKind::SingleImage => {
                if let Some(image) = non_empty(env.base_image.as_deref()) {
                    let release = images.remove_image(image).await?;
                    debug!(image, ?release, "environment image released");
                }
            }
        }
        Ok(())
    }

    /// Deploy a private copy of an environment for `requester`.
    ///
    /// A stale record for the same user and environment that is no longer
    /// running is replaced. The requester is debited before deployment; a
    /// failed deployment is not refunded. Only one request per user and
    /// environment provisions at a time; the claim is held until the record
    /// is persisted or the attempt fails.
    ///
    /// # Errors
    ///
    /// Returns `LabError::EnvNotFound`, `LabError::EnvNotOpen`,
    /// `LabError::InstanceAlreadyRunning`, `LabError::InstanceProvisioning`,
    /// `LabError::InsufficientBalance`,
    /// `LabError::ImageMissing` or the deployment error. A failed compose
    /// deployment is torn down before the error is returned.
    pub async fn create_instance(
        &self,
        requester: &Requester,
        env_id: u64,
        cancel: &CancellationToken,
        sink: &dyn ProgressSink,
    ) -> Result<VulInstance, VulnlabError> {
        let env = self.env(env_id).await?;
        if !env.is_open_to(requester.access_level) {
            return Err(LabError::EnvNotOpen { env_id }.into());
        }

        let user_id = requester.user_id;
        let Some(_claim) = self.deployer.state().claim_provisioning(user_id, env_id) else {
            return Err(LabError::InstanceProvisioning { user_id, env_id }.into());
        };
        let stale = self.store.instance_for(user_id, env_id).await?;
        if stale
            .as_ref()
            .is_some_and(|held| held.status == InstanceStatus::Running)
        {
            return Err(LabError::InstanceAlreadyRunning { user_id, env_id }.into());
        }

        if requester.balance < env.cost {
            return Err(LabError::InsufficientBalance {
                cost: env.cost,
                balance: requester.balance,
            }
            .into());
        }
        if env.cost > 0.0 {
            self.store.debit_balance(user_id, env.cost).await?;
        }

        let name = deployment_name(user_id, &env.env_name);
        let (target, ports) = match env.env_kind {
            EnvKind::SingleImage => self.deploy_single_env(&env, &name, cancel, sink).await?,
            EnvKind::Composite => self.deploy_composite_env(&env, &name, cancel, sink).await?,
        };

        if let Some(old) = stale {
            self.store.delete_instance(old.id).await?;
            debug!(instance_id = old.id, user_id, env_id, "replaced stale instance record");
        }

        let start_time = Utc::now();
        let instance = VulInstance {
            id: 0,
            env_id,
            user_id,
            start_time,
            expire_time: start_time + self.settings.default_ttl,
            end_time: None,
            status: InstanceStatus::Running,
            ports,
            target,
        };
        match self.store.insert_instance(instance.clone()).await {
            Ok(stored) => {
                info!(
                    instance_id = stored.id,
                    user_id,
                    env_id,
                    target = %stored.target,
                    "instance running"
                );
                Ok(stored)
            }
            Err(error) => {
                warn!(
                    user_id,
                    env_id,
                    target = %instance.target,
                    error = %error,
                    "instance deployed but not recorded; engine resources are orphaned"
                );
                Err(error)
            }
        }
    }

    async fn deploy_single_env(
        &self,
        env: &VulEnv,
        name: &str,
        cancel: &CancellationToken,
        sink: &dyn ProgressSink,
    ) -> Result<(DeploymentTarget, PortMap), VulnlabError> {
        let image = non_empty(env.base_image.as_deref())
            .ok_or(LabError::MissingField { field: "base_image" })?;
        self.require_image(image).await?;
        let (id, ports) = self.deployer.deploy_single(image, name, cancel, sink).await?;
        Ok((DeploymentTarget::Container { id }, ports))
    }

    async fn deploy_composite_env(
        &self,
        env: &VulEnv,
        stack: &str,
        cancel: &CancellationToken,
        sink: &dyn ProgressSink,
    ) -> Result<(DeploymentTarget, PortMap), VulnlabError> {
        let compose = env
            .base_compose
            .as_deref()
            .ok_or(LabError::MissingField { field: "base_compose" })?;
        let graph = self.resolver.resolve_project(compose, stack)?;
        for service in &graph.services {
            self.require_image(&service.image).await?;
        }

        match self.deployer.deploy_compose(&graph, stack, cancel, sink).await {
            Ok(ports) => Ok((
                DeploymentTarget::Stack {
                    name: graph.project,
                },
                ports,
            )),
            Err(error) => {
                if let Err(cleanup) = self.deployer.remove_stack(&graph.project).await {
                    warn!(
                        stack = %graph.project,
                        error = %cleanup,
                        "failed to clean up stack after failed deployment"
                    );
                }
                Err(error)
            }
        }
    }

    async fn require_image(&self, image: &str) -> Result<(), VulnlabError> {
        if self.deployer.images().image_exists(image).await? {
            Ok(())
        } else {
            Err(LabError::ImageMissing {
                image: String::from(image),
            }
            .into())
        }
    }

    /// Tear down a user's instance of an environment and delete its record.
    ///
    /// # Errors
    ///
    /// Returns `LabError::InstanceNotFound`, the teardown failure (the record
    /// is kept) or a store failure.
    pub async fn delete_instance(&self, user_id: u64, env_id: u64) -> Result<(), VulnlabError> {
        let instance = self
            .store
            .instance_for(user_id, env_id)
            .await?
            .ok_or_else(|| LabError::InstanceNotFound {
                key: format!("user {user_id} env {env_id}"),
            })?;
        self.teardown(&instance).await?;
        self.store.delete_instance(instance.id).await?;
        info!(instance_id = instance.id, user_id, env_id, "instance deleted");
        Ok(())
    }

    /// Remove the instance `instance_id` if it is still expired at `now`.
    ///
    /// The record is re-read first, so an expiry extended since the caller
    /// listed instances is honoured. Returns whether the instance was
    /// removed.
    ///
    /// # Errors
    ///
    /// Returns the teardown failure (the record is kept) or a store failure.
    pub async fn delete_expired_instance(
        &self,
        instance_id: u64,
        now: DateTime<Utc>,
    ) -> Result<bool, VulnlabError> {
        let Some(instance) = self.store.instance(instance_id).await? else {
            return Ok(false);
        };
        if !instance.is_expired_at(now) {
            debug!(instance_id, expire_time = %instance.expire_time, "instance no longer expired");
            return Ok(false);
        }
        self.teardown(&instance).await?;
        self.store.delete_instance(instance_id).await?;
        info!(
            instance_id,
            user_id = instance.user_id,
            env_id = instance.env_id,
            "expired instance deleted"
        );
        Ok(true)
    }

    /// Tear down every running instance of an environment and mark it
    /// stopped, returning how many were stopped.
    ///
    /// # Errors
    ///
    /// Returns the last teardown or store failure; every instance is still
    /// attempted.
    pub async fn stop_instances_for_env(&self, env_id: u64) -> Result<usize, VulnlabError> {
        let instances = self.store.instances_by_env(env_id).await?;
        let mut stopped = 0_usize;
        let mut last_error = None;
        for instance in instances
            .into_iter()
            .filter(|instance| instance.status == InstanceStatus::Running)
        {
            if let Err(error) = self.teardown(&instance).await {
                warn!(
                    instance_id = instance.id,
                    user_id = instance.user_id,
                    target = %instance.target,
                    error = %error,
                    "failed to stop instance"
                );
                last_error = Some(error);
                continue;
            }
            let instance_id = instance.id;
            let finished = VulInstance {
                status: InstanceStatus::Stopped,
                end_time: Some(Utc::now()),
                ..instance
            };
            match self.store.update_instance(finished).await {
                Ok(()) => stopped = stopped.saturating_add(1),
                Err(error) => {
                    warn!(instance_id, error = %error, "failed to record stopped instance");
                    last_error = Some(error);
                }
            }
        }
        info!(env_id, stopped, "instances stopped");
        last_error.map_or(Ok(stopped), Err)
    }

    /// Push an instance's expiry back by the configured extension.
    ///
    /// The extension is added to the current expiry, not to the current
    /// time, and there is no ceiling.
    ///
    /// # Errors
    ///
    /// Returns `LabError::InstanceNotFound` or a store failure.
    pub async fn extend_expiry(&self, instance_id: u64) -> Result<VulInstance, VulnlabError> {
        let instance = self
            .store
            .instance(instance_id)
            .await?
            .ok_or_else(|| LabError::InstanceNotFound {
                key: instance_id.to_string(),
            })?;
        let extended = VulInstance {
            expire_time: instance.expire_time + self.settings.extension,
            ..instance
        };
        self.store.update_instance(extended.clone()).await?;
        debug!(instance_id, expire_time = %extended.expire_time, "instance expiry extended");
        Ok(extended)
    }

    /// Every instance.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn list_instances(&self) -> Result<Vec<VulInstance>, VulnlabError> {
        self.store.instances().await
    }

    /// Instances owned by `user_id`.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn list_instances_for_user(
        &self,
        user_id: u64,
    ) -> Result<Vec<VulInstance>, VulnlabError> {
        self.store.instances_by_user(user_id).await
    }

    async fn env(&self, env_id: u64) -> Result<VulEnv, VulnlabError> {
        self.store
            .env(env_id)
            .await?
            .ok_or_else(|| LabError::EnvNotFound { env_id }.into())
    }

    async fn teardown(&self, instance: &VulInstance) -> Result<(), VulnlabError> {
        match &instance.target {
            DeploymentTarget::Container { id } => self.deployer.remove_container(id, true).await,
            DeploymentTarget::Stack { name } => self.deployer.remove_stack(name).await,
        }
    }

    /// Resolve a compose file under its directory-derived project, the
    /// namespace its built images are tagged with.
    fn resolve_shared(&self, compose: &Utf8Path) -> Result<ServiceGraph, VulnlabError> {
        let project = default_project_name(compose);
        Ok(self.resolver.resolve_project(compose, &project)?)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|trimmed| !trimmed.is_empty())
}

fn check_compose_path(path: &Utf8Path) -> Result<(), LabError> {
    let invalid = |reason: &'static str| LabError::InvalidComposePath {
        path: String::from(path.as_str()),
        reason,
    };
    if !matches!(path.extension(), Some("yml" | "yaml")) {
        return Err(invalid("not a .yml or .yaml file"));
    }
    if !is_file(path) {
        return Err(invalid("file does not exist"));
    }
    Ok(())
}
