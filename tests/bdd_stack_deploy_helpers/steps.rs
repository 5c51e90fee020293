//! Given/when steps for stack deployment scenarios.

use std::sync::Arc;

use camino::Utf8PathBuf;
use mockable::MockEnv;
use rstest_bdd_macros::{given, when};
use tokio_util::sync::CancellationToken;
use vulnlab::channel::NullSink;
use vulnlab::compose::ComposeResolver;
use vulnlab::error::{ImageError, StackError, VulnlabError};
use vulnlab::stack::StackDeployer;
use vulnlab::state::RuntimeState;

use super::StepResult;
use super::state::{DeployOutcome, StackState};
use crate::fake_engine::FakeEngine;

const DEPENDENT: &str = r#"
services:
  web:
    image: nginx:1.25
    ports:
      - "80"
    depends_on:
      - db
  db:
    image: mysql:5.7
"#;

const CYCLIC: &str = r"
services:
  web:
    image: nginx:1.25
    depends_on:
      - db
  db:
    image: mysql:5.7
    depends_on:
      - web
";

fn runtime() -> StepResult<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|e| format!("failed to create runtime: {e}"))
}

fn deployer(stack_state: &StackState) -> StepResult<StackDeployer<FakeEngine>> {
    let engine = stack_state
        .engine
        .get()
        .ok_or_else(|| String::from("engine should be configured"))?;
    Ok(StackDeployer::new(engine, Arc::new(RuntimeState::new())))
}

fn write_compose(stack_state: &StackState, content: &str) -> StepResult<()> {
    let dir = tempfile::tempdir().map_err(|e| format!("failed to create tempdir: {e}"))?;
    let root = Utf8PathBuf::from_path_buf(dir.path().join("project"))
        .map_err(|path| format!("non UTF-8 tempdir: {}", path.display()))?;
    std::fs::create_dir_all(&root).map_err(|e| format!("failed to create project: {e}"))?;
    let path = root.join("docker-compose.yml");
    std::fs::write(&path, content).map_err(|e| format!("failed to write compose file: {e}"))?;
    stack_state.workdir.set(Arc::new(dir));
    stack_state.compose_path.set(path);
    Ok(())
}

fn classify(error: &VulnlabError) -> DeployOutcome {
    match error {
        VulnlabError::Stack(StackError::UnsatisfiedDependencies { services, .. }) => {
            DeployOutcome::UnsatisfiedDependencies(services.clone())
        }
        VulnlabError::Image(ImageError::NotFound { image }) => {
            DeployOutcome::ImageMissing(image.clone())
        }
        other => DeployOutcome::Failed(other.to_string()),
    }
}

fn deploy(stack_state: &StackState, stack: &str) -> StepResult<()> {
    let path = stack_state
        .compose_path
        .get()
        .ok_or_else(|| String::from("compose file should be written"))?;
    let mut env = MockEnv::new();
    env.expect_string().returning(|_| None);
    let graph = ComposeResolver::new(env)
        .resolve_project(&path, stack)
        .map_err(|e| format!("compose file should resolve: {e}"))?;
    let deployer = deployer(stack_state)?;
    let cancel = CancellationToken::new();

    let result = runtime()?.block_on(deployer.deploy_compose(&graph, stack, &cancel, &NullSink));
    stack_state.outcome.set(match result {
        Ok(ports) => DeployOutcome::Deployed(ports),
        Err(error) => classify(&error),
    });
    Ok(())
}

#[given("an engine whose registry serves the stack images")]
fn engine_with_images(stack_state: &StackState) {
    let engine = FakeEngine::new()
        .with_registry_image("nginx:1.25", &["80/tcp"])
        .with_registry_image("mysql:5.7", &["3306/tcp"]);
    stack_state.engine.set(Arc::new(engine));
}

#[given("an engine whose registry serves nothing")]
fn engine_without_images(stack_state: &StackState) {
    stack_state.engine.set(Arc::new(FakeEngine::new()));
}

#[given("a compose project where web depends on db")]
fn dependent_project(stack_state: &StackState) -> StepResult<()> {
    write_compose(stack_state, DEPENDENT)
}

#[given("a compose project where web and db depend on each other")]
fn cyclic_project(stack_state: &StackState) -> StepResult<()> {
    write_compose(stack_state, CYCLIC)
}

#[given("the project has been deployed as stack {stack}")]
fn project_deployed(stack_state: &StackState, stack: String) -> StepResult<()> {
    deploy(stack_state, &stack)?;
    match stack_state.outcome.get() {
        Some(DeployOutcome::Deployed(_)) => Ok(()),
        other => Err(format!("setup deployment failed: {other:?}")),
    }
}

#[when("the project is deployed as stack {stack}")]
fn project_is_deployed(stack_state: &StackState, stack: String) -> StepResult<()> {
    deploy(stack_state, &stack)
}

#[when("stack {stack} is removed twice")]
fn stack_removed_twice(stack_state: &StackState, stack: String) -> StepResult<()> {
    let deployer = deployer(stack_state)?;
    let rt = runtime()?;
    let removals = (0..2)
        .map(|_| {
            rt.block_on(deployer.remove_stack(&stack))
                .map_err(|e| e.to_string())
        })
        .collect();
    stack_state.removals.set(removals);
    Ok(())
}
