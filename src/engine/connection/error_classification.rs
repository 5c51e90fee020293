//! Classification of transport failures seen while talking to the engine.
//!
//! A failed ping against a local socket usually means the socket is missing
//! or unreadable; those cases get their own `ContainerError` variants so the
//! operator sees which path to fix.

use std::path::Path;

use crate::error::ContainerError;

/// Extract the filesystem path from a socket URI.
///
/// Strips the scheme prefix (`unix://`, `npipe://`) to get the raw path.
/// For HTTP endpoints or bare paths, returns `None` as they either do not have
/// filesystem paths or lack the scheme prefix needed for reliable extraction.
fn extract_socket_path(socket_uri: &str) -> Option<&Path> {
    socket_uri
        .strip_prefix("unix://")
        .or_else(|| socket_uri.strip_prefix("npipe://"))
        .map(Path::new)
}

/// Classify an I/O error kind into a semantic `ContainerError`.
///
/// Maps specific `ErrorKind` variants to their corresponding `ContainerError`
/// variants when a socket path is available, falling back to `ConnectionFailed`
/// for other error kinds or when no path can be extracted.
fn classify_io_error_kind(
    kind: std::io::ErrorKind,
    socket_path: Option<&Path>,
    error_msg: &str,
) -> ContainerError {
    match kind {
        std::io::ErrorKind::PermissionDenied => socket_path.map_or_else(
            || ContainerError::ConnectionFailed {
                message: error_msg.to_owned(),
            },
            |path| ContainerError::PermissionDenied {
                path: path.to_path_buf(),
            },
        ),
        std::io::ErrorKind::NotFound => socket_path.map_or_else(
            || ContainerError::ConnectionFailed {
                message: error_msg.to_owned(),
            },
            |path| ContainerError::SocketNotFound {
                path: path.to_path_buf(),
            },
        ),
        _ => ContainerError::ConnectionFailed {
            message: error_msg.to_owned(),
        },
    }
}

/// Classify a `Bollard` connection error into a semantic `ContainerError`.
///
/// Inspects the error type and underlying cause to determine the most
/// specific error variant. Falls back to `ConnectionFailed` for errors
/// that do not match known patterns or for endpoints without filesystem paths.
pub(super) fn classify_connection_error(
    bollard_error: &bollard::errors::Error,
    socket_uri: &str,
) -> ContainerError {
    let socket_path = extract_socket_path(socket_uri);
    let error_msg = bollard_error.to_string();

    match bollard_error {
        bollard::errors::Error::SocketNotFoundError(_) => {
            if let Some(path) = socket_path {
                return ContainerError::SocketNotFound {
                    path: path.to_path_buf(),
                };
            }
        }
        bollard::errors::Error::IOError { err } => {
            let direct_kind = err.kind();
            if let Some(chained_kind) = io_error_kind_in_chain(err) {
                return classify_io_error_kind(chained_kind, socket_path, &error_msg);
            }
            return classify_io_error_kind(direct_kind, socket_path, &error_msg);
        }
        _ => {}
    }

    if let Some(kind) = io_error_kind_in_chain(bollard_error) {
        return classify_io_error_kind(kind, socket_path, &error_msg);
    }

    ContainerError::ConnectionFailed { message: error_msg }
}

/// Walk the error source chain looking for an `io::Error` kind.
fn io_error_kind_in_chain(error: &dyn std::error::Error) -> Option<std::io::ErrorKind> {
    let mut current: Option<&(dyn std::error::Error + 'static)> = error.source();
    while let Some(err) = current {
        if let Some(io_err) = err.downcast_ref::<std::io::Error>() {
            return Some(io_err.kind());
        }
        current = err.source();
    }
    None
}
