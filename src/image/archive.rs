//! Build-context tar archives.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::fs::Metadata;
use cap_std::fs_utf8::Dir;
use tar::{Builder, EntryType, Header};

use crate::error::ImageError;

const DEFAULT_DIRECTORY_MODE: u32 = 0o755;
const DEFAULT_FILE_MODE: u32 = 0o644;

/// Archive every regular file and directory under `context_dir`, with paths
/// relative to it. Entries are sorted so identical trees produce identical
/// archives; symlinks and special files are skipped.
pub(super) fn context_archive(context_dir: &Utf8Path) -> Result<Vec<u8>, ImageError> {
    let to_error = |error: io::Error| ImageError::ContextArchive {
        path: context_dir.as_std_path().to_path_buf(),
        message: error.to_string(),
    };
    let root = Dir::open_ambient_dir(context_dir, cap_std::ambient_authority()).map_err(to_error)?;
    build_tar_archive(&root).map_err(to_error)
}

fn build_tar_archive(root: &Dir) -> io::Result<Vec<u8>> {
    let mut builder = Builder::new(vec![]);
    append_directory_contents(&mut builder, root, &Utf8PathBuf::new())?;
    builder.finish()?;
    builder.into_inner()
}

fn append_directory_contents(
    builder: &mut Builder<Vec<u8>>,
    current_dir: &Dir,
    current_relative_path: &Utf8Path,
) -> io::Result<()> {
    for entry in sorted_entries(current_dir)? {
        let entry_relative_path = current_relative_path.join(&entry.file_name);

        match entry.entry_kind {
            EntryKind::Directory => {
                let metadata = current_dir.metadata(&entry.file_name)?;
                append_directory_header(builder, &entry_relative_path, &metadata)?;
                let child_dir = current_dir.open_dir(&entry.file_name)?;
                append_directory_contents(builder, &child_dir, &entry_relative_path)?;
            }
            EntryKind::File => {
                append_file(builder, current_dir, &entry.file_name, &entry_relative_path)?;
            }
            EntryKind::Other => {}
        }
    }

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    Directory,
    File,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ContextEntry {
    file_name: String,
    entry_kind: EntryKind,
}

fn sorted_entries(directory: &Dir) -> io::Result<Vec<ContextEntry>> {
    let mut entries = vec![];

    for entry_result in directory.entries()? {
        let entry = entry_result?;
        let file_type = entry.file_type()?;
        let entry_kind = if file_type.is_dir() {
            EntryKind::Directory
        } else if file_type.is_file() {
            EntryKind::File
        } else {
            EntryKind::Other
        };

        entries.push(ContextEntry {
            file_name: entry.file_name()?,
            entry_kind,
        });
    }

    entries.sort_unstable_by(|left, right| left.file_name.cmp(&right.file_name));
    Ok(entries)
}

fn append_directory_header(
    builder: &mut Builder<Vec<u8>>,
    relative_path: &Utf8Path,
    metadata: &Metadata,
) -> io::Result<()> {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Directory);
    header.set_size(0);
    header.set_mode(metadata_mode(metadata, DEFAULT_DIRECTORY_MODE));
    header.set_cksum();

    let path = format!("{}/", archive_path(relative_path));
    builder.append_data(&mut header, path, io::empty())
}

fn append_file(
    builder: &mut Builder<Vec<u8>>,
    parent_dir: &Dir,
    file_name: &str,
    relative_path: &Utf8Path,
) -> io::Result<()> {
    let metadata = parent_dir.metadata(file_name)?;
    let mut file = parent_dir.open(file_name)?;

    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_size(metadata.len());
    header.set_mode(metadata_mode(&metadata, DEFAULT_FILE_MODE));
    header.set_cksum();

    builder.append_data(&mut header, archive_path(relative_path), &mut file)
}

/// Forward-slash form of a relative path, as the engine expects inside the
/// context.
pub(super) fn archive_path(path: &Utf8Path) -> String {
    path.as_str().replace('\\', "/")
}

#[cfg(unix)]
fn metadata_mode(metadata: &Metadata, _fallback: u32) -> u32 {
    use cap_std::fs::PermissionsExt;

    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn metadata_mode(_metadata: &Metadata, fallback: u32) -> u32 {
    fallback
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use rstest::rstest;

    use super::*;

    fn archive_entries(bytes: &[u8]) -> io::Result<Vec<(String, String)>> {
        let mut archive = tar::Archive::new(bytes);
        let mut entries = Vec::new();
        for entry_result in archive.entries()? {
            let mut entry = entry_result?;
            let path = entry
                .path()?
                .to_string_lossy()
                .trim_end_matches('/')
                .to_owned();
            let mut content = String::new();
            entry.read_to_string(&mut content)?;
            entries.push((path, content));
        }
        Ok(entries)
    }

    #[rstest]
    fn archives_context_with_relative_sorted_paths() -> io::Result<()> {
        let temp = tempfile::tempdir()?;
        std::fs::write(temp.path().join("Dockerfile"), "FROM php:7.4-apache\n")?;
        std::fs::create_dir(temp.path().join("src"))?;
        std::fs::write(temp.path().join("src").join("index.php"), "<?php echo 1;")?;

        let context = Utf8PathBuf::try_from(temp.path().to_path_buf())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let bytes = context_archive(&context).map_err(|e| io::Error::other(e.to_string()))?;
        let entries = archive_entries(&bytes)?;

        assert_eq!(
            entries,
            vec![
                (String::from("Dockerfile"), String::from("FROM php:7.4-apache\n")),
                (String::from("src"), String::new()),
                (String::from("src/index.php"), String::from("<?php echo 1;")),
            ]
        );
        Ok(())
    }

    #[rstest]
    fn missing_context_is_an_archive_error() {
        let result = context_archive(Utf8Path::new("/nonexistent/vulnlab/context"));
        assert!(matches!(result, Err(ImageError::ContextArchive { .. })));
    }

    #[rstest]
    #[case("web\\Dockerfile", "web/Dockerfile")]
    #[case("docker/Dockerfile.dev", "docker/Dockerfile.dev")]
    fn archive_paths_use_forward_slashes(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(archive_path(Utf8Path::new(raw)), expected);
    }
}
