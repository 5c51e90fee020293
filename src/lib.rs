//! On-demand, time-bounded vulnerable lab environments.
//!
//! `vulnlab` turns a catalog of vulnerable environments (a single image, or a
//! compose project of several services) into per-user running instances on a
//! Docker or Podman engine. Each instance is reachable through freshly
//! allocated host ports and is torn down automatically when its lifetime
//! expires.
//!
//! # Architecture
//!
//! The engine is reached only through the [`engine::EngineClient`] seam.
//! Above it, the [`image`] pipeline pulls and builds images, the [`stack`]
//! deployer materializes resolved [`compose`] graphs into networks, volumes
//! and containers, and [`lifecycle`] ties deployments to users, balances and
//! expiry. Long-running operations report progress through [`channel`] and
//! are cancelled through a `CancellationToken`.
//!
//! # Modules
//!
//! - [`catalog`]: Catalog JSON files and upload-name validation
//! - [`channel`]: Progress and control messages for long-running operations
//! - [`compose`]: Compose file resolution into a typed service graph
//! - [`config`]: Configuration system with layered precedence (CLI > env > file > defaults)
//! - [`engine`]: Container engine connection and the API seam
//! - [`error`]: Semantic error types for the application
//! - [`image`]: Image pull, build and reference-counted removal
//! - [`lifecycle`]: Environments, instances, balances and the expiry reaper
//! - [`logging`]: Tracing subscriber initialisation
//! - [`ports`]: Host port allocation
//! - [`stack`]: Stack deployment and teardown
//! - [`state`]: Process-wide container registry and image reference counts

pub mod catalog;
pub mod channel;
pub mod compose;
pub mod config;
pub mod engine;
pub mod error;
pub mod image;
pub mod lifecycle;
pub mod logging;
pub mod ports;
pub mod stack;
pub mod state;
