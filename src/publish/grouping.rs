//! Site tree traversal and size-bounded grouping.
//!
//! Files are listed depth-first in file-name order, so the listing (and
//! therefore the grouping) is deterministic for a given tree. Grouping is
//! greedy: files accumulate into the current group until the next one would
//! push the group over the cap. A file larger than the cap on its own
//! becomes a singleton group instead of being rejected.

use super::error::PublishError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A file of the site tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileEntry {
    /// Site path: forward slashes, leading `/`.
    pub relative_path: String,

    pub absolute_path: PathBuf,

    pub size_bytes: u64,
}

/// An upload batch. Never mutated after grouping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileGroup {
    entries: Vec<FileEntry>,
}

impl FileGroup {
    pub fn new(entries: Vec<FileEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[FileEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|e| e.size_bytes).sum()
    }
}

/// List the eligible files under `root`.
///
/// Regular files only; symlinks are not followed. Entries whose name starts
/// with `.` (and everything below a hidden directory) are skipped unless
/// `include_hidden` is set.
pub fn collect_files(root: &Path, include_hidden: bool) -> Result<Vec<FileEntry>, PublishError> {
    if !root.is_dir() {
        return Err(PublishError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("upload path '{}' is not a directory", root.display()),
        )));
    }

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| include_hidden || entry.depth() == 0 || !is_hidden(entry));

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| {
            PublishError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let size_bytes = entry.metadata().map_err(|e| {
            PublishError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
        })?
        .len();

        files.push(FileEntry {
            relative_path: site_path(root, entry.path()),
            absolute_path: entry.path().to_path_buf(),
            size_bytes,
        });
    }

    Ok(files)
}

/// Greedily partition `files` into groups of at most `max_group_size` bytes.
///
/// Order is preserved: concatenating the groups yields `files` again.
pub fn group_files(files: Vec<FileEntry>, max_group_size: u64) -> Vec<FileGroup> {
    let mut groups = Vec::new();
    let mut current: Vec<FileEntry> = Vec::new();
    let mut current_size = 0u64;

    for file in files {
        let would_be = current_size.saturating_add(file.size_bytes);
        if !current.is_empty() && would_be > max_group_size {
            groups.push(FileGroup::new(std::mem::take(&mut current)));
            current_size = 0;
        }
        current_size = current_size.saturating_add(file.size_bytes);
        current.push(file);
    }

    if !current.is_empty() {
        groups.push(FileGroup::new(current));
    }

    groups
}

/// List and group the site tree. Fails with `NoFilesFound` when nothing is
/// eligible.
pub fn group_directory(
    root: &Path,
    max_group_size: u64,
    include_hidden: bool,
) -> Result<Vec<FileGroup>, PublishError> {
    let files = collect_files(root, include_hidden)?;
    if files.is_empty() {
        return Err(PublishError::NoFilesFound {
            root: root.to_path_buf(),
        });
    }
    Ok(group_files(files, max_group_size))
}

/// Upper bound on the buffer reserved up front by [`read_group_content`].
const MAX_PREALLOCATION: usize = 64 * 1024 * 1024;

/// Read a group's content in group order.
pub async fn read_group_content(group: &FileGroup) -> std::io::Result<Vec<u8>> {
    // Sizes come from traversal time, so they are only a hint.
    let hint = usize::try_from(group.total_size())
        .unwrap_or(0)
        .min(MAX_PREALLOCATION);
    let mut content = Vec::with_capacity(hint);
    for entry in group.entries() {
        let bytes = tokio::fs::read(&entry.absolute_path).await?;
        content.extend_from_slice(&bytes);
    }
    Ok(content)
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

fn site_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    format!("/{}", parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const MB: u64 = 1024 * 1024;

    fn entry(name: &str, size: u64) -> FileEntry {
        FileEntry {
            relative_path: format!("/{}", name),
            absolute_path: PathBuf::from(name),
            size_bytes: size,
        }
    }

    fn names(groups: &[FileGroup]) -> Vec<Vec<String>> {
        groups
            .iter()
            .map(|g| g.entries().iter().map(|e| e.relative_path.clone()).collect())
            .collect()
    }

    #[test]
    fn test_groups_two_megabyte_cap() {
        let files = vec![entry("f1", MB), entry("f2", MB), entry("f3", MB / 2)];
        let groups = group_files(files, 2 * MB);

        assert_eq!(
            names(&groups),
            vec![vec!["/f1", "/f2"], vec!["/f3"]]
        );
    }

    #[test]
    fn test_oversized_file_forms_its_own_group() {
        let files = vec![entry("small", 10), entry("huge", 500), entry("tail", 10)];
        let groups = group_files(files, 100);

        assert_eq!(
            names(&groups),
            vec![vec!["/small"], vec!["/huge"], vec!["/tail"]]
        );
        assert_eq!(groups[1].total_size(), 500);
    }

    #[test]
    fn test_exact_fit_stays_in_group() {
        let files = vec![entry("a", 50), entry("b", 50), entry("c", 1)];
        let groups = group_files(files, 100);
        assert_eq!(names(&groups), vec![vec!["/a", "/b"], vec!["/c"]]);
    }

    #[test]
    fn test_zero_sized_files_join_current_group() {
        let files = vec![entry("a", 100), entry("empty", 0)];
        let groups = group_files(files, 100);
        assert_eq!(groups.len(), 1);
    }

    #[test]
    fn test_empty_input_yields_no_groups() {
        assert!(group_files(Vec::new(), 100).is_empty());
    }

    #[test]
    fn test_collect_files_is_sorted_and_skips_hidden() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("assets")).unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join("index.html"), b"<html></html>").unwrap();
        fs::write(dir.path().join("assets/app.js"), b"console.log(1)").unwrap();
        fs::write(dir.path().join(".env"), b"SECRET=1").unwrap();
        fs::write(dir.path().join(".git/HEAD"), b"ref").unwrap();

        let files = collect_files(dir.path(), false).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["/assets/app.js", "/index.html"]);
        assert_eq!(files[1].size_bytes, 13);

        let all = collect_files(dir.path(), true).unwrap();
        assert_eq!(all.len(), 4);
    }

    #[test]
    fn test_empty_directory_is_no_files_found() {
        let dir = TempDir::new().unwrap();
        let result = group_directory(dir.path(), MB, false);
        assert!(matches!(result, Err(PublishError::NoFilesFound { .. })));
    }

    #[test]
    fn test_only_hidden_files_is_no_files_found() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".DS_Store"), b"x").unwrap();
        let result = group_directory(dir.path(), MB, false);
        assert!(matches!(result, Err(PublishError::NoFilesFound { .. })));
    }

    #[test]
    fn test_missing_root_is_io_error() {
        let dir = TempDir::new().unwrap();
        let result = group_directory(&dir.path().join("dist"), MB, false);
        assert!(matches!(result, Err(PublishError::Io(_))));
    }

    #[tokio::test]
    async fn test_read_group_content_concatenates_in_order() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), b"alpha").unwrap();
        fs::write(dir.path().join("b.txt"), b"beta").unwrap();

        let groups = group_directory(dir.path(), MB, false).unwrap();
        assert_eq!(groups.len(), 1);

        let content = read_group_content(&groups[0]).await.unwrap();
        assert_eq!(content, b"alphabeta");
    }

    #[tokio::test]
    async fn test_read_group_content_ignores_stale_sizes() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("grown.txt");
        fs::write(&file, b"now longer than listed").unwrap();

        // Recorded size no longer matches the file on disk.
        let group = FileGroup::new(vec![FileEntry {
            relative_path: "/grown.txt".to_string(),
            absolute_path: file,
            size_bytes: u64::MAX,
        }]);

        let content = read_group_content(&group).await.unwrap();
        assert_eq!(content, b"now longer than listed");
    }
}
