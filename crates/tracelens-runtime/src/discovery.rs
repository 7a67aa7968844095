use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::report::FileFailure;

/// A discovered project: a directory holding one or more session files.
/// Transient: recomputed on every run; only per-file results are cached.
#[derive(Debug, Clone)]
pub struct ProjectDir {
    pub path: PathBuf,
    pub session_files: Vec<PathBuf>,
}

/// Walk the scan roots and group session files by their parent directory.
///
/// An unreadable root or subtree is recorded as a failure and the remaining
/// roots are still scanned. Projects and files come back sorted by path so
/// downstream output is order-stable.
pub fn discover(roots: &[PathBuf]) -> (Vec<ProjectDir>, Vec<FileFailure>) {
    let mut by_dir: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();
    let mut failures = Vec::new();

    for root in roots {
        if !root.exists() {
            failures.push(FileFailure {
                path: root.clone(),
                reason: "scan root not found".to_string(),
            });
            continue;
        }

        for entry in WalkDir::new(root).max_depth(3) {
            match entry {
                Ok(entry) => {
                    let path = entry.path();
                    if !probe(path) {
                        continue;
                    }
                    let project = path
                        .parent()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| root.clone());
                    by_dir.entry(project).or_default().push(path.to_path_buf());
                }
                Err(err) => {
                    let path = err
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| root.clone());
                    failures.push(FileFailure {
                        path,
                        reason: format!("unreadable during discovery: {}", err),
                    });
                }
            }
        }
    }

    let projects = by_dir
        .into_iter()
        .map(|(path, mut session_files)| {
            session_files.sort();
            session_files.dedup();
            ProjectDir {
                path,
                session_files,
            }
        })
        .collect();

    (projects, failures)
}

/// A candidate session file is a non-empty `.jsonl` regular file.
fn probe(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }
    if path.extension().is_none_or(|e| e != "jsonl") {
        return false;
    }
    std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false)
}
