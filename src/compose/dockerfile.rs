//! Base-image discovery from Dockerfile `FROM` directives.

use camino::Utf8Path;
use tracing::warn;

use super::read_text;
use crate::error::ComposeError;

/// List the external base images a Dockerfile builds on, in order of
/// appearance and without duplicates.
///
/// Directives are matched case-insensitively and may carry a `--platform=`
/// flag, an `AS alias` clause and a trailing comment. `scratch`, references
/// to earlier build stages and references that still contain unexpanded
/// `ARG` variables are skipped.
#[must_use]
pub fn base_images(content: &str) -> Vec<String> {
    let mut images: Vec<String> = Vec::new();
    let mut stages: Vec<String> = Vec::new();

    for line in content.lines() {
        let directive = line.split('#').next().unwrap_or_default();
        let mut tokens = directive.split_whitespace();
        if !tokens
            .next()
            .is_some_and(|keyword| keyword.eq_ignore_ascii_case("FROM"))
        {
            continue;
        }

        let Some(image) = tokens.find(|token| !token.starts_with("--")) else {
            continue;
        };
        let alias = match (tokens.next(), tokens.next()) {
            (Some(keyword), Some(name)) if keyword.eq_ignore_ascii_case("AS") => {
                Some(name.to_ascii_lowercase())
            }
            _ => None,
        };

        let lowered = image.to_ascii_lowercase();
        let is_stage = stages.contains(&lowered);
        if let Some(stage) = alias {
            stages.push(stage);
        }
        if lowered == "scratch" || is_stage || image.contains('$') {
            continue;
        }
        if !images.iter().any(|known| known == image) {
            images.push(String::from(image));
        }
    }

    images
}

/// Read a Dockerfile and list its base images.
///
/// A missing file yields an empty list and a warning, since the build will
/// report the real problem later.
///
/// # Errors
///
/// Returns `ComposeError::Read` when the file exists but cannot be read.
pub fn base_images_from_file(path: &Utf8Path) -> Result<Vec<String>, ComposeError> {
    match read_text(path) {
        Ok(content) => Ok(base_images(&content)),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            warn!(dockerfile = %path, "Dockerfile not found; no base images recorded");
            Ok(Vec::new())
        }
        Err(error) => Err(ComposeError::Read {
            path: path.as_std_path().to_path_buf(),
            message: error.to_string(),
        }),
    }
}
