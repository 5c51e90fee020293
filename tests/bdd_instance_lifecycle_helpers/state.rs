//! Scenario state for instance lifecycle behavioural tests.

use std::sync::Arc;

use mockable::MockEnv;
use rstest::fixture;
use rstest_bdd::Slot;
use rstest_bdd_macros::ScenarioState;
use vulnlab::lifecycle::{LabService, MemoryStore, Requester, SweepReport, VulInstance};

use crate::fake_engine::FakeEngine;

pub(crate) type TestService = LabService<FakeEngine, MemoryStore, MockEnv>;

/// Why an instance request was refused.
#[derive(Debug, Clone)]
pub(crate) enum Refusal {
    AlreadyRunning,
    InsufficientBalance,
    Other(String),
}

#[derive(Default, ScenarioState)]
pub(crate) struct LifecycleState {
    pub(crate) engine: Slot<Arc<FakeEngine>>,
    pub(crate) service: Slot<Arc<TestService>>,
    pub(crate) store: Slot<Arc<MemoryStore>>,
    pub(crate) env_id: Slot<u64>,
    pub(crate) requester: Slot<Requester>,
    pub(crate) instance: Slot<VulInstance>,
    pub(crate) refusal: Slot<Refusal>,
    pub(crate) sweep: Slot<SweepReport>,
}

#[fixture]
pub(crate) fn lifecycle_state() -> LifecycleState {
    LifecycleState::default()
}
