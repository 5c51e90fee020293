//! Stack deployment and teardown.
//!
//! A stack is every engine resource labelled with one compose project name:
//! a bridge network `{stack}_default`, named volumes `{stack}_{volume}` and
//! one container `{stack}-{service}` per service. Deployment walks the
//! dependency graph in passes, re-checking readiness against the engine
//! before each service; teardown removes resources by label so it works for
//! stacks created by earlier processes too.

mod deploy;
pub mod materialize;
mod teardown;


use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::engine::EngineClient;
use crate::image::ImagePipeline;
use crate::state::RuntimeState;

/// Container port (protocol dropped, e.g. `"80"`) to host port.
pub type PortMap = BTreeMap<String, u16>;

/// Progress of a stack or service deployment, as reported in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployPhase {
    /// Nothing created yet.
    Init,
    /// The stack network and volumes exist.
    NetworkCreated,
    /// The service image is available locally.
    ImageReady,
    /// The service container exists but is not attached.
    ContainerCreated,
    /// The container is attached to the stack network.
    NetworkAttached,
    /// The container is running.
    Started,
    /// Every service is running.
    Deployed,
    /// Deployment stopped with an error.
    Failed,
}

impl fmt::Display for DeployPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::NetworkCreated => "network-created",
            Self::ImageReady => "image-ready",
            Self::ContainerCreated => "container-created",
            Self::NetworkAttached => "network-attached",
            Self::Started => "started",
            Self::Deployed => "deployed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Deploys and removes stacks and single containers.
#[derive(Debug)]
pub struct StackDeployer<C> {
    client: Arc<C>,
    state: Arc<RuntimeState>,
    images: ImagePipeline<C>,
}

impl<C> Clone for StackDeployer<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            state: Arc::clone(&self.state),
            images: self.images.clone(),
        }
    }
}

impl<C: EngineClient> StackDeployer<C> {
    /// Create a deployer over `client`, sharing `state` with the image
    /// pipeline it builds internally.
    #[must_use]
    pub fn new(client: Arc<C>, state: Arc<RuntimeState>) -> Self {
        let images = ImagePipeline::new(Arc::clone(&client), Arc::clone(&state));
        Self {
            client,
            state,
            images,
        }
    }

    /// Forward `proxy` to every image build this deployer runs.
    #[must_use]
    pub fn with_build_proxy(mut self, proxy: Option<String>) -> Self {
        self.images = self.images.with_build_proxy(proxy);
        self
    }

    /// The image pipeline used for pulls and builds.
    #[must_use]
    pub const fn images(&self) -> &ImagePipeline<C> {
        &self.images
    }

    /// The shared runtime state.
    #[must_use]
    pub const fn state(&self) -> &Arc<RuntimeState> {
        &self.state
    }
}
