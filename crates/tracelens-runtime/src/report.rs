use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use tracelens_types::Session;

/// One file or scan root that could not be processed. The path pins the
/// failure to its source; the run itself always completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileFailure {
    pub path: PathBuf,
    pub reason: String,
}

/// One successfully assembled session and where it came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub source_path: PathBuf,
    pub session: Session,
}

/// All sessions discovered under one project directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectReport {
    pub path: PathBuf,
    /// Working directory the transcripts report for this project, when any
    /// session carries one (project directory names on disk are munged)
    pub working_dir: Option<String>,
    pub sessions: Vec<SessionReport>,
}

/// Deterministic result of one orchestration run.
///
/// Projects sort by path, sessions within a project by start timestamp
/// (source path as tie-break), failures by path, so two runs over the same
/// input serialize byte-identically no matter how workers interleaved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateReport {
    pub projects: Vec<ProjectReport>,
    pub failures: Vec<FileFailure>,
}

impl AggregateReport {
    pub fn session_count(&self) -> usize {
        self.projects.iter().map(|p| p.sessions.len()).sum()
    }
}
