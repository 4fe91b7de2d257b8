use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::transfer::OutgoingFile;
// Filesystem enumeration into the tree the client orchestrator walks

/// A source directory with its files and subdirectories, in name order.
#[derive(Debug)]
pub struct TransferDirectory {
    pub path: PathBuf,
    pub name: String,
    pub files: Vec<OutgoingFile>,
    pub subdirs: Vec<TransferDirectory>,
}

impl TransferDirectory {
    pub fn file_count(&self) -> usize {
        self.files.len() + self.subdirs.iter().map(|d| d.file_count()).sum::<usize>()
    }

    pub fn total_bytes(&self) -> u64 {
        let own: u64 = self
            .files
            .iter()
            .filter_map(|f| std::fs::metadata(f.path()).ok())
            .map(|m| m.len())
            .sum();
        own + self.subdirs.iter().map(|d| d.total_bytes()).sum::<u64>()
    }
}

/// Everything named on the command line: loose files and directory trees.
#[derive(Debug, Default)]
pub struct Sources {
    pub files: Vec<OutgoingFile>,
    pub directories: Vec<TransferDirectory>,
}

impl Sources {
    pub fn file_count(&self) -> usize {
        self.files.len() + self.directories.iter().map(|d| d.file_count()).sum::<usize>()
    }

    pub fn total_bytes(&self) -> u64 {
        let loose: u64 = self
            .files
            .iter()
            .filter_map(|f| std::fs::metadata(f.path()).ok())
            .map(|m| m.len())
            .sum();
        loose + self.directories.iter().map(|d| d.total_bytes()).sum::<u64>()
    }
}

/// File filter options
#[derive(Debug, Default, Clone)]
pub struct FileFilter {
    pub exclude_files: Vec<String>,
    pub exclude_dirs: Vec<String>,
}

impl FileFilter {
    fn should_include_file(&self, name: &str) -> bool {
        !self.exclude_files.iter().any(|p| glob_match(p, name))
    }

    fn should_include_dir(&self, name: &str) -> bool {
        !self.exclude_dirs.iter().any(|p| glob_match(p, name))
    }
}

/// Simple glob matching (supports * wildcards)
fn glob_match(pattern: &str, text: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    if pattern.contains('*') {
        if pattern.starts_with('*') && pattern.ends_with('*') {
            let middle = &pattern[1..pattern.len() - 1];
            return text.contains(middle);
        } else if let Some(suffix) = pattern.strip_prefix('*') {
            return text.ends_with(suffix);
        } else if let Some(prefix) = pattern.strip_suffix('*') {
            return text.starts_with(prefix);
        }
    }

    pattern == text
}

fn entry_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Build a directory tree. Symlinks and special files are skipped.
pub fn enumerate_directory(root: &Path, filter: &FileFilter) -> Result<TransferDirectory> {
    let mut dir = TransferDirectory {
        path: root.to_path_buf(),
        name: entry_name(root),
        files: Vec::new(),
        subdirs: Vec::new(),
    };

    for entry in WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.with_context(|| format!("reading {}", root.display()))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type().is_dir() {
            if filter.should_include_dir(&name) {
                dir.subdirs.push(enumerate_directory(entry.path(), filter)?);
            }
        } else if entry.file_type().is_file() && filter.should_include_file(&name) {
            dir.files.push(OutgoingFile::new(entry.path()));
        }
    }

    Ok(dir)
}

/// Sort command-line paths into loose files and directory trees.
/// Paths named twice are only collected once.
pub fn collect_sources(paths: &[PathBuf], filter: &FileFilter) -> Result<Sources> {
    let mut sources = Sources::default();
    let mut seen: Vec<PathBuf> = Vec::new();

    for path in paths {
        let canonical = path
            .canonicalize()
            .with_context(|| format!("source not found: {}", path.display()))?;
        if seen.contains(&canonical) {
            continue;
        }
        seen.push(canonical.clone());

        if canonical.is_dir() {
            sources.directories.push(enumerate_directory(&canonical, filter)?);
        } else if canonical.is_file() {
            sources.files.push(OutgoingFile::new(canonical));
        } else {
            bail!("not a regular file or directory: {}", path.display());
        }
    }

    Ok(sources)
}
