//! `vulnlab` application entry point.
//!
//! The binary drives the container engine directly: pulling and building
//! images and deploying or removing compose stacks. It uses
//! `eyre` for opaque error handling at the application boundary, converting
//! domain-specific errors into human-readable reports.
//!
//! Configuration is loaded with layered precedence via `OrthoConfig`:
//! 1. Application defaults
//! 2. Configuration file (`~/.config/vulnlab/config.toml` or path from `VULNLAB_CONFIG_PATH`)
//! 3. Environment variables (`VULNLAB_*`)
//! 4. Command-line arguments

use std::sync::Arc;

use bollard::Docker;
use camino::Utf8Path;
use clap::Parser;
use eyre::{Report, Result as EyreResult};
use mockable::DefaultEnv;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vulnlab::catalog::{compose_files, read_catalog};
use vulnlab::channel::LogSink;
use vulnlab::compose::{ComposeResolver, default_project_name};
use vulnlab::config::{AppConfig, BuildArgs, Cli, Commands, UpArgs, load_config};
use vulnlab::engine::{EngineConnector, EngineGuard, SocketResolver};
use vulnlab::error::Result as VulnlabResult;
use vulnlab::logging::init_tracing;
use vulnlab::stack::StackDeployer;
use vulnlab::state::RuntimeState;

/// Application entry point.
///
/// Loads configuration and installs the tracing subscriber, then runs the
/// subcommand on a multi-threaded tokio runtime.
fn main() -> EyreResult<()> {
    let cli = Cli::parse();
    let config = load_config(&cli).map_err(Report::from)?;
    init_tracing(&config.logging).map_err(Report::from)?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run(&cli, &config)).map_err(Report::from)
}

/// Execute the CLI command, returning domain-specific errors.
async fn run(cli: &Cli, config: &AppConfig) -> VulnlabResult<()> {
    // The catalog lives on disk; no engine needed.
    if matches!(cli.command, Commands::Catalog) {
        return list_catalog(&config.catalog_dir);
    }

    let guard = engine_guard(config);
    let docker = guard.client().await?;
    let deployer = StackDeployer::new(Arc::new(docker), Arc::new(RuntimeState::new()))
        .with_build_proxy(config.proxy.clone());
    let cancel = cancel_on_ctrl_c();

    match &cli.command {
        Commands::Ping => {
            info!("container engine is reachable");
            Ok(())
        }
        Commands::Images => list_images(&deployer).await,
        Commands::Pull(args) => {
            deployer
                .images()
                .pull_image(&args.image, &cancel, &LogSink)
                .await
        }
        Commands::Build(args) => build(&deployer, args, &cancel).await,
        Commands::ComposeImages(args) => compose_images(&args.compose),
        Commands::Up(args) => up(&deployer, args, &cancel).await,
        Commands::Down(args) => deployer.remove_stack(&args.stack).await,
        Commands::Rm(args) => deployer.remove_container(&args.container, args.force).await,
        Commands::Stacks => list_stacks(&deployer).await,
        Commands::Catalog => list_catalog(&config.catalog_dir),
    }
}

fn engine_guard(config: &AppConfig) -> EngineGuard {
    let env = DefaultEnv::new();
    let resolver = SocketResolver::new(&env);
    let socket = EngineConnector::resolve_socket(config.engine_socket.as_deref(), &resolver);
    EngineGuard::new(socket)
}

/// Cancel the returned token on the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            trigger.cancel();
        }
    });
    token
}

#[expect(clippy::print_stdout, reason = "CLI output is the intended behaviour")]
async fn list_images(deployer: &StackDeployer<Docker>) -> VulnlabResult<()> {
    for image in deployer.images().list_local_images().await? {
        let created = image
            .created
            .map_or_else(String::new, |time| time.to_rfc3339());
        println!("{}\t{}\t{}\t{}", image.id, image.name, image.size, created);
    }
    Ok(())
}

async fn build(
    deployer: &StackDeployer<Docker>,
    args: &BuildArgs,
    cancel: &CancellationToken,
) -> VulnlabResult<()> {
    deployer
        .images()
        .build_image(&args.dockerfile, &args.tag, cancel, &LogSink)
        .await
}

#[expect(clippy::print_stdout, reason = "CLI output is the intended behaviour")]
fn compose_images(compose: &Utf8Path) -> VulnlabResult<()> {
    let resolver = ComposeResolver::new(DefaultEnv::new());
    for image in resolver.list_images(compose)? {
        println!("{image}");
    }
    Ok(())
}

/// Deploy a compose file and print `service:container_port -> host_port`.
#[expect(clippy::print_stdout, reason = "CLI output is the intended behaviour")]
async fn up(
    deployer: &StackDeployer<Docker>,
    args: &UpArgs,
    cancel: &CancellationToken,
) -> VulnlabResult<()> {
    let stack = args
        .stack
        .clone()
        .unwrap_or_else(|| default_project_name(&args.compose));
    let resolver = ComposeResolver::new(DefaultEnv::new());
    let graph = resolver.resolve_project(&args.compose, &stack)?;
    deployer
        .images()
        .prepare_compose_images(&graph, cancel, &LogSink)
        .await?;

    match deployer
        .deploy_compose(&graph, &graph.project, cancel, &LogSink)
        .await
    {
        Ok(ports) => {
            println!("stack {}", graph.project);
            for (key, host_port) in &ports {
                println!("{key} -> {host_port}");
            }
            Ok(())
        }
        Err(error) => {
            if let Err(cleanup) = deployer.remove_stack(&graph.project).await {
                warn!(
                    stack = %graph.project,
                    error = %cleanup,
                    "cleanup after failed deploy incomplete"
                );
            }
            Err(error)
        }
    }
}

#[expect(clippy::print_stdout, reason = "CLI output is the intended behaviour")]
async fn list_stacks(deployer: &StackDeployer<Docker>) -> VulnlabResult<()> {
    for stack in deployer.stack_names().await? {
        println!("{stack}");
    }
    Ok(())
}

#[expect(clippy::print_stdout, reason = "CLI output is the intended behaviour")]
fn list_catalog(root: &Utf8Path) -> VulnlabResult<()> {
    for entry in read_catalog(root)? {
        println!(
            "{}\t{}\t{}",
            entry.image_name, entry.image_vul_name, entry.rank
        );
    }
    for compose in compose_files(root)? {
        println!("{compose}");
    }
    Ok(())
}
