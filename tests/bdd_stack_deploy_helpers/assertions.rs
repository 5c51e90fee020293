//! Assertion steps for stack deployment scenarios.

use rstest_bdd_macros::then;

use super::StepResult;
use super::state::{DeployOutcome, StackState};

fn outcome(stack_state: &StackState) -> StepResult<DeployOutcome> {
    stack_state
        .outcome
        .get()
        .ok_or_else(|| String::from("deployment should have run"))
}

#[then("the deployment succeeds")]
fn deployment_succeeds(stack_state: &StackState) -> StepResult<()> {
    match outcome(stack_state)? {
        DeployOutcome::Deployed(_) => Ok(()),
        other => Err(format!("expected a deployed stack, got {other:?}")),
    }
}

#[then("container {first} starts before {second}")]
fn starts_before(stack_state: &StackState, first: String, second: String) -> StepResult<()> {
    let engine = stack_state
        .engine
        .get()
        .ok_or_else(|| String::from("engine should be configured"))?;
    let order = engine.start_order();
    let position = |name: &str| {
        order
            .iter()
            .position(|started| started == name)
            .ok_or_else(|| format!("{name} was never started; started: {order:?}"))
    };
    if position(&first)? < position(&second)? {
        Ok(())
    } else {
        Err(format!("{first} should start before {second}; order: {order:?}"))
    }
}

#[then("container port {port} is published")]
fn port_is_published(stack_state: &StackState, port: u16) -> StepResult<()> {
    match outcome(stack_state)? {
        DeployOutcome::Deployed(ports)
            if ports
                .get(&port.to_string())
                .is_some_and(|host| *host > 0) =>
        {
            Ok(())
        }
        other => Err(format!("expected port {port} to be published, got {other:?}")),
    }
}

#[then("the deployment fails with unsatisfied dependencies")]
fn fails_with_unsatisfied(stack_state: &StackState) -> StepResult<()> {
    match outcome(stack_state)? {
        DeployOutcome::UnsatisfiedDependencies(services) if services.len() == 2 => Ok(()),
        other => Err(format!("expected both services unsatisfied, got {other:?}")),
    }
}

#[then("the deployment fails because an image is missing")]
fn fails_with_missing_image(stack_state: &StackState) -> StepResult<()> {
    match outcome(stack_state)? {
        DeployOutcome::ImageMissing(_) => Ok(()),
        other => Err(format!("expected a missing image, got {other:?}")),
    }
}

#[then("no container was started")]
fn no_container_started(stack_state: &StackState) -> StepResult<()> {
    let engine = stack_state
        .engine
        .get()
        .ok_or_else(|| String::from("engine should be configured"))?;
    let order = engine.start_order();
    if order.is_empty() {
        Ok(())
    } else {
        Err(format!("expected no starts, got {order:?}"))
    }
}

#[then("both removals succeed")]
fn both_removals_succeed(stack_state: &StackState) -> StepResult<()> {
    let removals = stack_state
        .removals
        .get()
        .ok_or_else(|| String::from("removals should have run"))?;
    if removals.len() == 2 && removals.iter().all(Result::is_ok) {
        Ok(())
    } else {
        Err(format!("expected two successful removals, got {removals:?}"))
    }
}

#[then("the engine holds no stack resources")]
fn no_stack_resources(stack_state: &StackState) -> StepResult<()> {
    let engine = stack_state
        .engine
        .get()
        .ok_or_else(|| String::from("engine should be configured"))?;
    let leftovers = (
        engine.container_names(),
        engine.network_names(),
        engine.volume_names(),
    );
    if leftovers.0.is_empty() && leftovers.1.is_empty() && leftovers.2.is_empty() {
        Ok(())
    } else {
        Err(format!("resources left behind: {leftovers:?}"))
    }
}
