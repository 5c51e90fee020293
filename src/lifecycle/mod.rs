//! Environments, per-user instances and their expiry.
//!
//! [`LabService`] registers environments (pre-pulling their images),
//! provisions one private deployment per user and environment, and tears
//! them down again. Records live behind the [`LabStore`] seam. [`Reaper`]
//! removes instances once their expiry passes.

mod model;
mod reaper;
mod service;
mod store;


pub use model::{
    Degree, DeploymentTarget, EnvKind, InstanceStatus, NewEnv, PortMap, Requester, VulEnv,
    VulInstance,
};
pub use reaper::{DEFAULT_REAP_INTERVAL, Reaper, SweepReport};
pub use service::{LabService, LifecycleSettings, deployment_name};
pub use store::{LabStore, MemoryStore, Page, StoreFuture};
