//! Assertion steps for instance lifecycle scenarios.

use chrono::Duration;
use rstest_bdd_macros::then;
use vulnlab::lifecycle::{DeploymentTarget, InstanceStatus, VulInstance};

use super::StepResult;
use super::state::{LifecycleState, Refusal};

fn instance(lifecycle_state: &LifecycleState) -> StepResult<VulInstance> {
    lifecycle_state
        .instance
        .get()
        .ok_or_else(|| String::from("instance should exist"))
}

fn container_names(lifecycle_state: &LifecycleState) -> StepResult<Vec<String>> {
    lifecycle_state
        .engine
        .get()
        .map(|engine| engine.container_names())
        .ok_or_else(|| String::from("engine should be configured"))
}

#[then("the instance is running")]
fn instance_is_running(lifecycle_state: &LifecycleState) -> StepResult<()> {
    let current = instance(lifecycle_state)?;
    let DeploymentTarget::Container { id } = &current.target else {
        return Err(format!("expected a container target, got {}", current.target));
    };
    if current.status != InstanceStatus::Running {
        return Err(format!("expected Running, got {:?}", current.status));
    }
    if !current.ports.contains_key("8080") {
        return Err(format!("expected port 8080 to be published, got {:?}", current.ports));
    }
    if container_names(lifecycle_state)?.is_empty() {
        return Err(format!("container {id} is missing from the engine"));
    }
    Ok(())
}

#[then("the requester has {expected} credits left")]
#[expect(clippy::float_arithmetic, reason = "balances are stored as floating point")]
fn requester_balance(lifecycle_state: &LifecycleState, expected: u32) -> StepResult<()> {
    let store = lifecycle_state
        .store
        .get()
        .ok_or_else(|| String::from("store should be configured"))?;
    let requester = lifecycle_state
        .requester
        .get()
        .ok_or_else(|| String::from("requester should be configured"))?;
    let balance = store.balance(requester.user_id);
    let target = f64::from(expected);
    if (balance - target).abs() < 1e-9 {
        Ok(())
    } else {
        Err(format!("expected {expected} credits, found {balance}"))
    }
}

#[then("the instance expires {minutes} minutes after it started")]
fn instance_expiry(lifecycle_state: &LifecycleState, minutes: i64) -> StepResult<()> {
    let current = instance(lifecycle_state)?;
    let lifetime = current.expire_time - current.start_time;
    if lifetime == Duration::minutes(minutes) {
        Ok(())
    } else {
        Err(format!("expected a {minutes} minute lifetime, got {lifetime}"))
    }
}

#[then("the request is rejected as already running")]
fn rejected_as_running(lifecycle_state: &LifecycleState) -> StepResult<()> {
    match lifecycle_state.refusal.get() {
        Some(Refusal::AlreadyRunning) => Ok(()),
        other => Err(format!("expected an already-running refusal, got {other:?}")),
    }
}

#[then("the request is rejected for insufficient balance")]
fn rejected_for_balance(lifecycle_state: &LifecycleState) -> StepResult<()> {
    match lifecycle_state.refusal.get() {
        Some(Refusal::InsufficientBalance) => Ok(()),
        other => Err(format!("expected an insufficient-balance refusal, got {other:?}")),
    }
}

#[then("no container was created")]
fn no_container_created(lifecycle_state: &LifecycleState) -> StepResult<()> {
    let names = container_names(lifecycle_state)?;
    if names.is_empty() {
        Ok(())
    } else {
        Err(format!("expected no containers, found {names:?}"))
    }
}

#[then("the sweep removed {count} instance")]
fn sweep_removed(lifecycle_state: &LifecycleState, count: usize) -> StepResult<()> {
    let report = lifecycle_state
        .sweep
        .get()
        .ok_or_else(|| String::from("sweep should have run"))?;
    if report.removed == count && report.failed == 0 {
        Ok(())
    } else {
        Err(format!("expected {count} removal, got {report:?}"))
    }
}

#[then("no container is left")]
fn no_container_left(lifecycle_state: &LifecycleState) -> StepResult<()> {
    no_container_created(lifecycle_state)
}
