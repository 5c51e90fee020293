//! Catalog directory helpers.
//!
//! The catalog root holds JSON files describing known vulnerable images and
//! directories of compose projects. Every access goes through a `cap_std`
//! directory handle opened on the root, and uploaded file names are checked
//! so they cannot land outside it.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::ambient_authority;
use cap_std::fs_utf8::Dir;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::compose::clean_path;
use crate::error::FilesystemError;
use crate::lifecycle::Degree;

/// File name that marks a compose project in the catalog.
pub const COMPOSE_FILE_NAME: &str = "docker-compose.yml";

const CATALOG_EXTENSION: &str = "json";

/// One catalog record describing a vulnerable image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Image reference, e.g. `vulhub/struts2:2.3.30`.
    pub image_name: String,
    /// Vulnerability name, e.g. `S2-045`.
    pub image_vul_name: String,
    /// Free-text description.
    #[serde(default)]
    pub image_desc: String,
    /// Difficulty rank.
    #[serde(default)]
    pub rank: f64,
    /// Classification tags.
    #[serde(default)]
    pub degree: Degree,
    /// Provenance.
    #[serde(default, rename = "from")]
    pub source: String,
}

impl CatalogEntry {
    fn is_complete(&self) -> bool {
        !self.image_name.trim().is_empty() && !self.image_vul_name.trim().is_empty()
    }
}

/// A catalog file holds either a list of entries or one entry.
#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogDocument {
    Many(Vec<CatalogEntry>),
    One(CatalogEntry),
}

impl CatalogDocument {
    fn into_entries(self) -> Vec<CatalogEntry> {
        match self {
            Self::Many(entries) => entries,
            Self::One(entry) => vec![entry],
        }
    }
}

/// Check an uploaded file name and return where it would be stored.
///
/// # Errors
///
/// Returns `FilesystemError::PathTraversal` when the name is empty,
/// contains `..` or a path separator, is absolute, or resolves outside
/// `root`.
pub fn validate_upload_name(
    root: &Utf8Path,
    filename: &str,
) -> Result<Utf8PathBuf, FilesystemError> {
    let reject = |reason: &'static str| FilesystemError::PathTraversal {
        name: String::from(filename),
        reason,
    };
    if filename.trim().is_empty() {
        return Err(reject("name is empty"));
    }
    if filename.contains("..") {
        return Err(reject("name contains '..'"));
    }
    if Utf8Path::new(filename).is_absolute() || filename.starts_with('/') {
        return Err(reject("name is absolute"));
    }
    if filename.contains(['/', '\\']) {
        return Err(reject("name contains a path separator"));
    }

    let base = clean_path(root);
    let target = clean_path(&root.join(filename));
    if target == base || !target.starts_with(&base) {
        return Err(reject("name resolves outside the catalog"));
    }
    Ok(target)
}

/// Validate and store an uploaded catalog file under `root`.
///
/// The payload must parse as one catalog entry or a list of them, each with
/// a non-empty `image_name` and `image_vul_name`. An existing file of the
/// same name is replaced.
///
/// # Errors
///
/// Returns `FilesystemError::PathTraversal` for an unsafe name,
/// `FilesystemError::InvalidCatalogFile` for a non-JSON name or payload, and
/// I/O errors from writing.
pub fn save_catalog_file(
    root: &Utf8Path,
    filename: &str,
    bytes: &[u8],
) -> Result<Utf8PathBuf, FilesystemError> {
    let target = validate_upload_name(root, filename)?;
    let invalid = |reason: String| FilesystemError::InvalidCatalogFile {
        name: String::from(filename),
        reason,
    };
    if target.extension() != Some(CATALOG_EXTENSION) {
        return Err(invalid(String::from("only .json files are accepted")));
    }

    let document: CatalogDocument =
        serde_json::from_slice(bytes).map_err(|error| invalid(error.to_string()))?;
    let entries = document.into_entries();
    if entries.is_empty() || !entries.iter().all(CatalogEntry::is_complete) {
        return Err(invalid(String::from(
            "every entry needs image_name and image_vul_name",
        )));
    }

    let dir = open_root(root)?;
    dir.write(filename, bytes)
        .map_err(|error| io_failure(&target, &error))?;
    info!(file = %target, entries = entries.len(), "catalog file saved");
    Ok(target)
}

/// Parse every `*.json` file directly under `root`, creating the directory
/// when it does not exist yet.
///
/// Files are read in name order.
///
/// # Errors
///
/// Returns `FilesystemError::InvalidCatalogFile` naming the first file that
/// does not parse, or I/O errors from listing and reading.
pub fn read_catalog(root: &Utf8Path) -> Result<Vec<CatalogEntry>, FilesystemError> {
    let dir = open_root(root)?;
    let mut names = Vec::new();
    for entry in dir.entries().map_err(|error| io_failure(root, &error))? {
        let dir_entry = entry.map_err(|error| io_failure(root, &error))?;
        let name = dir_entry
            .file_name()
            .map_err(|error| io_failure(root, &error))?;
        let is_file = dir_entry
            .file_type()
            .map_err(|error| io_failure(&root.join(&name), &error))?
            .is_file();
        if is_file && Utf8Path::new(&name).extension() == Some(CATALOG_EXTENSION) {
            names.push(name);
        }
    }
    names.sort();

    let mut catalog = Vec::new();
    for name in names {
        let text = dir
            .read_to_string(&name)
            .map_err(|error| io_failure(&root.join(&name), &error))?;
        let document: CatalogDocument =
            serde_json::from_str(&text).map_err(|error| FilesystemError::InvalidCatalogFile {
                name: name.clone(),
                reason: error.to_string(),
            })?;
        let entries = document.into_entries();
        debug!(file = %name, entries = entries.len(), "read catalog file");
        catalog.extend(entries);
    }
    Ok(catalog)
}

/// Every `docker-compose.yml` below `root`, sorted.
///
/// # Errors
///
/// Returns I/O errors from opening or listing directories.
pub fn compose_files(root: &Utf8Path) -> Result<Vec<Utf8PathBuf>, FilesystemError> {
    let dir = Dir::open_ambient_dir(root, ambient_authority())
        .map_err(|error| io_failure(root, &error))?;
    let mut found = Vec::new();
    collect_compose_files(&dir, root, &mut found)?;
    found.sort();
    Ok(found)
}

fn collect_compose_files(
    dir: &Dir,
    path: &Utf8Path,
    found: &mut Vec<Utf8PathBuf>,
) -> Result<(), FilesystemError> {
    for entry in dir.entries().map_err(|error| io_failure(path, &error))? {
        let dir_entry = entry.map_err(|error| io_failure(path, &error))?;
        let name = dir_entry
            .file_name()
            .map_err(|error| io_failure(path, &error))?;
        let child = path.join(&name);
        let file_type = dir_entry
            .file_type()
            .map_err(|error| io_failure(&child, &error))?;
        if file_type.is_dir() {
            let subdir = dir
                .open_dir(&name)
                .map_err(|error| io_failure(&child, &error))?;
            collect_compose_files(&subdir, &child, found)?;
        } else if file_type.is_file() && name == COMPOSE_FILE_NAME {
            found.push(child);
        }
    }
    Ok(())
}

fn open_root(root: &Utf8Path) -> Result<Dir, FilesystemError> {
    Dir::create_ambient_dir_all(root, ambient_authority())
        .map_err(|error| io_failure(root, &error))?;
    Dir::open_ambient_dir(root, ambient_authority()).map_err(|error| io_failure(root, &error))
}

fn io_failure(path: &Utf8Path, error: &io::Error) -> FilesystemError {
    let path_buf = path.as_std_path().to_path_buf();
    match error.kind() {
        io::ErrorKind::NotFound => FilesystemError::NotFound { path: path_buf },
        io::ErrorKind::PermissionDenied => FilesystemError::PermissionDenied { path: path_buf },
        _ => FilesystemError::IoError {
            path: path_buf,
            message: error.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    use super::*;

    #[fixture]
    fn catalog_root() -> std::io::Result<(TempDir, Utf8PathBuf)> {
        let temp = tempfile::tempdir()?;
        let root = Utf8PathBuf::from_path_buf(temp.path().join("storage"))
            .map_err(|_| std::io::Error::other("temp path is not UTF-8"))?;
        Ok((temp, root))
    }

    #[rstest]
    #[case("../escape.json")]
    #[case("nested/file.json")]
    #[case("nested\\file.json")]
    #[case("/etc/passwd")]
    #[case("..")]
    #[case("")]
    fn unsafe_upload_names_are_rejected(#[case] name: &str) {
        let result = validate_upload_name(Utf8Path::new("/srv/catalog"), name);
        assert!(matches!(result, Err(FilesystemError::PathTraversal { .. })));
    }

    #[rstest]
    fn safe_upload_name_joins_the_root() {
        let result = validate_upload_name(Utf8Path::new("/srv/./catalog"), "vulhub.json");
        assert_eq!(result.ok(), Some(Utf8PathBuf::from("/srv/catalog/vulhub.json")));
    }

    #[rstest]
    fn saved_files_are_read_back(
        catalog_root: std::io::Result<(TempDir, Utf8PathBuf)>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let (_temp, root) = catalog_root?;
        let single = br#"{"image_name":"vulhub/struts2:2.3.30","image_vul_name":"S2-045","rank":3.5,"degree":{"HoleType":["RCE"]},"from":"vulhub"}"#;
        let many = br#"[{"image_name":"vulhub/php:5.4","image_vul_name":"CVE-2012-1823"}]"#;
        save_catalog_file(&root, "b.json", single)?;
        save_catalog_file(&root, "a.json", many)?;

        let catalog = read_catalog(&root)?;
        let names: Vec<&str> = catalog.iter().map(|entry| entry.image_vul_name.as_str()).collect();
        assert_eq!(names, vec!["CVE-2012-1823", "S2-045"]);
        assert_eq!(
            catalog.get(1).map(|entry| entry.degree.hole_types.clone()),
            Some(vec![String::from("RCE")])
        );
        assert_eq!(catalog.get(1).map(|entry| entry.source.as_str()), Some("vulhub"));
        Ok(())
    }

    #[rstest]
    #[case("notes.txt", b"{}".as_slice())]
    #[case("broken.json", b"{not json".as_slice())]
    #[case("blank.json", br#"{"image_name":"","image_vul_name":"x"}"#.as_slice())]
    #[case("empty.json", b"[]".as_slice())]
    fn invalid_catalog_files_are_rejected(
        catalog_root: std::io::Result<(TempDir, Utf8PathBuf)>,
        #[case] name: &str,
        #[case] bytes: &[u8],
    ) -> std::io::Result<()> {
        let (_temp, root) = catalog_root?;
        let result = save_catalog_file(&root, name, bytes);
        assert!(matches!(result, Err(FilesystemError::InvalidCatalogFile { .. })));
        Ok(())
    }

    #[rstest]
    fn missing_root_is_created_empty(
        catalog_root: std::io::Result<(TempDir, Utf8PathBuf)>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let (_temp, root) = catalog_root?;
        assert!(read_catalog(&root)?.is_empty());
        assert!(root.is_dir());
        Ok(())
    }

    #[rstest]
    fn compose_files_are_found_recursively(
        catalog_root: std::io::Result<(TempDir, Utf8PathBuf)>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let (_temp, root) = catalog_root?;
        let struts = root.join("struts2").join("s2-045");
        let php = root.join("php");
        Dir::create_ambient_dir_all(&struts, ambient_authority())?;
        Dir::create_ambient_dir_all(&php, ambient_authority())?;
        let root_dir = Dir::open_ambient_dir(&root, ambient_authority())?;
        root_dir.write("struts2/s2-045/docker-compose.yml", "services: {}\n")?;
        root_dir.write("php/docker-compose.yaml", "services: {}\n")?;
        root_dir.write("php/README.md", "docs\n")?;

        let found = compose_files(&root)?;
        assert_eq!(found, vec![struts.join(COMPOSE_FILE_NAME)]);
        Ok(())
    }
}
