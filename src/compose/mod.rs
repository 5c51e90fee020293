//! Compose file resolution.
//!
//! A compose file is read, `${VAR}` references are interpolated, and the
//! supported subset of keys is type-checked into a [`ServiceGraph`] that the
//! image pipeline and stack deployer consume. Services are identified by the
//! standard `com.docker.compose.*` labels once deployed, so stacks remain
//! visible to other compose tooling.

pub mod dockerfile;

mod document;
mod graph;
mod interpolate;
mod project_name;
mod resolver;
mod units;

use camino::Utf8Path;

pub use graph::{
    BuildSpec, HealthcheckSpec, PortSpec, ResourceSpec, RestartSpec, ServiceGraph, ServiceSpec,
    VolumeSpec,
};
pub use interpolate::interpolate;
pub use project_name::{MAX_PROJECT_NAME_LEN, default_project_name, normalize_project_name};
pub(crate) use resolver::clean_path;
pub use resolver::{ComposeResolver, PROJECT_NAME_VAR};

/// Read a UTF-8 text file through a capability handle on its parent
/// directory.
pub(crate) fn read_text(path: &Utf8Path) -> std::io::Result<String> {
    let parent = path
        .parent()
        .filter(|dir| !dir.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path.file_name().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name")
    })?;
    let dir = cap_std::fs_utf8::Dir::open_ambient_dir(parent, cap_std::ambient_authority())?;
    dir.read_to_string(file_name)
}

/// Whether `path` names an existing regular file.
pub(crate) fn is_file(path: &Utf8Path) -> bool {
    let parent = path
        .parent()
        .filter(|dir| !dir.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    path.file_name().is_some_and(|file_name| {
        cap_std::fs_utf8::Dir::open_ambient_dir(parent, cap_std::ambient_authority())
            .and_then(|dir| dir.metadata(file_name))
            .is_ok_and(|metadata| metadata.is_file())
    })
}
