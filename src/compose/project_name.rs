//! Project (stack) name normalization.
//!
//! Stack names end up as label values, network names and container name
//! prefixes, and are often derived from user-uploaded directory names, so
//! they are squeezed into the character set every engine accepts.

use camino::Utf8Path;

/// Longest project name handed to the engine.
pub const MAX_PROJECT_NAME_LEN: usize = 64;

/// Normalize an arbitrary string into a legal project name.
///
/// Lower-cases the input, replaces every character outside `[a-z0-9_-]` with
/// `_`, forces the first character to be alphanumeric (replacing it with `a`
/// when it is not) and truncates to [`MAX_PROJECT_NAME_LEN`] characters. An
/// empty input yields `"a"`. The function is idempotent.
#[must_use]
pub fn normalize_project_name(raw: &str) -> String {
    let mut name: String = raw
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '_' | '-' => c,
            _ => '_',
        })
        .take(MAX_PROJECT_NAME_LEN)
        .collect();

    match name.chars().next() {
        None => String::from("a"),
        Some(first) if first.is_ascii_alphanumeric() => name,
        Some(_) => {
            name.replace_range(..1, "a");
            name
        }
    }
}

/// The default project name for a compose file: its directory's name,
/// normalized.
#[must_use]
pub fn default_project_name(compose_path: &Utf8Path) -> String {
    let directory = compose_path
        .parent()
        .and_then(Utf8Path::file_name)
        .unwrap_or_default();
    normalize_project_name(directory)
}
