//! Given/when steps for instance lifecycle scenarios.

use std::sync::Arc;

use chrono::Duration;
use mockable::MockEnv;
use rstest_bdd_macros::{given, when};
use tokio_util::sync::CancellationToken;
use vulnlab::channel::NullSink;
use vulnlab::compose::ComposeResolver;
use vulnlab::error::{LabError, VulnlabError};
use vulnlab::lifecycle::{
    DEFAULT_REAP_INTERVAL, EnvKind, LabService, LifecycleSettings, MemoryStore, NewEnv, Reaper,
    Requester,
};
use vulnlab::stack::StackDeployer;
use vulnlab::state::RuntimeState;

use super::StepResult;
use super::state::{LifecycleState, Refusal, TestService};
use crate::fake_engine::FakeEngine;

const IMAGE: &str = "vulhub/struts2:s2-045";
const USER_ID: u64 = 7;

fn runtime() -> StepResult<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|e| format!("failed to create runtime: {e}"))
}

fn service(lifecycle_state: &LifecycleState) -> StepResult<Arc<TestService>> {
    lifecycle_state
        .service
        .get()
        .ok_or_else(|| String::from("service should be configured"))
}

fn store(lifecycle_state: &LifecycleState) -> StepResult<Arc<MemoryStore>> {
    lifecycle_state
        .store
        .get()
        .ok_or_else(|| String::from("store should be configured"))
}

/// The requester with the balance the store currently holds.
fn current_requester(lifecycle_state: &LifecycleState) -> StepResult<Requester> {
    let requester = lifecycle_state
        .requester
        .get()
        .ok_or_else(|| String::from("requester should be configured"))?;
    Ok(Requester {
        balance: store(lifecycle_state)?.balance(requester.user_id),
        ..requester
    })
}

fn start_instance(lifecycle_state: &LifecycleState) -> StepResult<Result<(), VulnlabError>> {
    let service = service(lifecycle_state)?;
    let requester = current_requester(lifecycle_state)?;
    let env_id = lifecycle_state
        .env_id
        .get()
        .ok_or_else(|| String::from("environment should be registered"))?;
    let cancel = CancellationToken::new();

    match runtime()?.block_on(service.create_instance(&requester, env_id, &cancel, &NullSink)) {
        Ok(instance) => {
            lifecycle_state.instance.set(instance);
            Ok(Ok(()))
        }
        Err(error) => Ok(Err(error)),
    }
}

#[given("a single-image environment costing {cost} credits")]
fn single_image_environment(lifecycle_state: &LifecycleState, cost: f64) -> StepResult<()> {
    let engine = Arc::new(FakeEngine::new().with_local_image(IMAGE, &["8080/tcp"]));
    let store = Arc::new(MemoryStore::new());
    let mut env = MockEnv::new();
    env.expect_string().returning(|_| None);
    let service = Arc::new(LabService::new(
        StackDeployer::new(Arc::clone(&engine), Arc::new(RuntimeState::new())),
        Arc::clone(&store),
        ComposeResolver::new(env),
        LifecycleSettings::default(),
    ));

    let definition = NewEnv {
        env_name: String::from("s2-045"),
        env_desc: String::from("Struts2 OGNL injection"),
        env_kind: EnvKind::SingleImage,
        base_image: Some(String::from(IMAGE)),
        base_compose: None,
        degree: vulnlab::lifecycle::Degree::default(),
        rank: 2.0,
        source: String::from("vulhub"),
        open_level: 0,
        cost,
    };
    let cancel = CancellationToken::new();
    let env = runtime()?
        .block_on(service.create_env(definition, &cancel, &NullSink))
        .map_err(|e| format!("environment should register: {e}"))?;

    lifecycle_state.engine.set(engine);
    lifecycle_state.store.set(store);
    lifecycle_state.service.set(service);
    lifecycle_state.env_id.set(env.id);
    Ok(())
}

#[given("a requester with {balance} credits")]
fn requester_with_balance(lifecycle_state: &LifecycleState, balance: f64) -> StepResult<()> {
    store(lifecycle_state)?.set_balance(USER_ID, balance);
    lifecycle_state.requester.set(Requester {
        user_id: USER_ID,
        access_level: 1,
        balance,
    });
    Ok(())
}

#[given("the requester has already started an instance")]
fn instance_already_started(lifecycle_state: &LifecycleState) -> StepResult<()> {
    start_instance(lifecycle_state)?.map_err(|e| format!("setup instance should start: {e}"))
}

#[when("the requester starts an instance")]
fn requester_starts_instance(lifecycle_state: &LifecycleState) -> StepResult<()> {
    if let Err(error) = start_instance(lifecycle_state)? {
        lifecycle_state.refusal.set(match error {
            VulnlabError::Lab(LabError::InstanceAlreadyRunning { .. }) => Refusal::AlreadyRunning,
            VulnlabError::Lab(LabError::InsufficientBalance { .. }) => {
                Refusal::InsufficientBalance
            }
            other => Refusal::Other(other.to_string()),
        });
    }
    Ok(())
}

#[when("the instance is extended")]
fn instance_is_extended(lifecycle_state: &LifecycleState) -> StepResult<()> {
    let service = service(lifecycle_state)?;
    let instance = lifecycle_state
        .instance
        .get()
        .ok_or_else(|| String::from("instance should exist"))?;
    let extended = runtime()?
        .block_on(service.extend_expiry(instance.id))
        .map_err(|e| format!("extension should succeed: {e}"))?;
    lifecycle_state.instance.set(extended);
    Ok(())
}

#[when("the reaper sweeps {minutes} minutes later")]
fn reaper_sweeps(lifecycle_state: &LifecycleState, minutes: i64) -> StepResult<()> {
    let instance = lifecycle_state
        .instance
        .get()
        .ok_or_else(|| String::from("instance should exist"))?;
    let reaper = Reaper::new(service(lifecycle_state)?, DEFAULT_REAP_INTERVAL);
    let now = instance.start_time + Duration::minutes(minutes);
    let report = runtime()?
        .block_on(reaper.sweep_at(now))
        .map_err(|e| format!("sweep should run: {e}"))?;
    lifecycle_state.sweep.set(report);
    Ok(())
}
