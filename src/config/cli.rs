//! Command-line argument definitions for vulnlab.

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};

/// Command-line interface for vulnlab.
#[derive(Debug, Parser)]
#[command(name = "vulnlab")]
#[command(
    author,
    version,
    about = "On-demand, time-bounded vulnerable lab environments"
)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file.
    #[arg(long, global = true)]
    pub config: Option<Utf8PathBuf>,

    /// Container engine socket path or URL.
    #[arg(long, global = true)]
    pub engine_socket: Option<String>,

    /// Catalog directory.
    #[arg(long, global = true)]
    pub catalog_dir: Option<Utf8PathBuf>,

    /// Log filter directive, e.g. `debug` or `vulnlab=trace`.
    #[arg(long, global = true)]
    pub log_level: Option<String>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Check that the container engine answers.
    Ping,

    /// List local images.
    Images,

    /// Pull an image, streaming progress.
    Pull(PullArgs),

    /// Build an image from a Dockerfile.
    Build(BuildArgs),

    /// List every image a compose file needs.
    ComposeImages(ComposeArgs),

    /// Deploy a compose file as a stack and print its port map.
    Up(UpArgs),

    /// Remove a stack.
    Down(DownArgs),

    /// Remove a container.
    Rm(RmArgs),

    /// List deployed stacks.
    Stacks,

    /// List catalog entries and compose projects.
    Catalog,
}

/// Arguments for the `pull` subcommand.
#[derive(Debug, Parser)]
pub struct PullArgs {
    /// Image reference.
    #[arg(required = true)]
    pub image: String,
}

/// Arguments for the `build` subcommand.
#[derive(Debug, Parser)]
pub struct BuildArgs {
    /// Path to the Dockerfile; its directory is the build context.
    #[arg(required = true)]
    pub dockerfile: Utf8PathBuf,

    /// Tag for the built image.
    #[arg(required = true)]
    pub tag: String,
}

/// Arguments for the `compose-images` subcommand.
#[derive(Debug, Parser)]
pub struct ComposeArgs {
    /// Path to the compose file.
    #[arg(required = true)]
    pub compose: Utf8PathBuf,
}

/// Arguments for the `up` subcommand.
#[derive(Debug, Parser)]
pub struct UpArgs {
    /// Path to the compose file.
    #[arg(required = true)]
    pub compose: Utf8PathBuf,

    /// Stack name; defaults to the compose directory name.
    #[arg(long)]
    pub stack: Option<String>,
}

/// Arguments for the `down` subcommand.
#[derive(Debug, Parser)]
pub struct DownArgs {
    /// Stack name.
    #[arg(required = true)]
    pub stack: String,
}

/// Arguments for the `rm` subcommand.
#[derive(Debug, Parser)]
pub struct RmArgs {
    /// Container id or name.
    #[arg(required = true)]
    pub container: String,

    /// Remove the container even when it is running.
    #[arg(long)]
    pub force: bool,
}
