//! Scenario state for stack deployment behavioural tests.

use std::sync::Arc;

use camino::Utf8PathBuf;
use rstest::fixture;
use rstest_bdd::Slot;
use rstest_bdd_macros::ScenarioState;
use tempfile::TempDir;
use vulnlab::stack::PortMap;

use crate::fake_engine::FakeEngine;

/// How a deployment ended.
#[derive(Debug, Clone)]
pub(crate) enum DeployOutcome {
    /// The stack is up with this port map.
    Deployed(PortMap),
    /// Some services never became deployable.
    UnsatisfiedDependencies(Vec<String>),
    /// An image could not be found.
    ImageMissing(String),
    /// Any other failure.
    Failed(String),
}

#[derive(Default, ScenarioState)]
pub(crate) struct StackState {
    pub(crate) engine: Slot<Arc<FakeEngine>>,
    pub(crate) workdir: Slot<Arc<TempDir>>,
    pub(crate) compose_path: Slot<Utf8PathBuf>,
    pub(crate) outcome: Slot<DeployOutcome>,
    pub(crate) removals: Slot<Vec<Result<(), String>>>,
}

#[fixture]
pub(crate) fn stack_state() -> StackState {
    StackState::default()
}
