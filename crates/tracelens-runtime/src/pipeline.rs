use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};

use tracelens_cache::Store;
use tracelens_engine::assemble;
use tracelens_parser::parse_file;
use tracelens_types::{Session, normalize_path, signature_of};

use crate::discovery;
use crate::report::{AggregateReport, FileFailure, ProjectReport, SessionReport};

/// Default worker count, tied to available parallelism
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Scan roots; at least one is required
    pub roots: Vec<PathBuf>,
    /// Bounded worker pool size
    pub workers: usize,
    pub cache_path: PathBuf,
    /// Drop cache entries for files no longer on disk after discovery
    pub evict: bool,
}

impl PipelineConfig {
    pub fn new(roots: Vec<PathBuf>, cache_path: PathBuf) -> Self {
        Self {
            roots,
            workers: default_workers(),
            cache_path,
            evict: true,
        }
    }
}

/// Progress events emitted while a scan runs. Delivery order follows worker
/// completion and is not part of the determinism guarantee; the report is.
#[derive(Debug, Clone)]
pub enum ScanProgress {
    DiscoveryCompleted {
        projects: usize,
        files: usize,
    },
    FileCompleted {
        path: PathBuf,
        from_cache: bool,
        issues: usize,
    },
    FileFailed {
        path: PathBuf,
        reason: String,
    },
    FileSkipped {
        path: PathBuf,
    },
    Completed {
        sessions: usize,
        failures: usize,
        cache_hits: usize,
        cache_misses: usize,
        evicted: usize,
    },
}

enum FileWork {
    Hit(Box<Session>),
    Parsed { session: Box<Session>, issues: usize },
    Failed(String),
    Skipped,
}

/// The orchestrator: discovers projects, fans session files out over a
/// bounded worker pool, consults the cache around parse+assemble, and folds
/// everything into a deterministic `AggregateReport`.
///
/// The cache is consulted here and only here; the parser and assembler
/// stay cache-agnostic.
pub struct Pipeline {
    config: PipelineConfig,
    store: Arc<Store>,
    cancel: Arc<AtomicBool>,
}

impl Pipeline {
    /// Validates configuration and opens the cache store. An empty root set
    /// is a fatal configuration error: nothing is partially attempted.
    pub fn new(mut config: PipelineConfig) -> Result<Self> {
        if config.roots.is_empty() {
            anyhow::bail!("no scan roots supplied");
        }

        // Cache keys derive from discovered paths; normalized roots keep
        // them stable across relative/absolute invocations.
        config.roots = config.roots.iter().map(|r| normalize_path(r)).collect();

        let store = Store::open(&config.cache_path).with_context(|| {
            format!("failed to open cache at {}", config.cache_path.display())
        })?;

        Ok(Self {
            config,
            store: Arc::new(store),
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Shared stop flag. Files not yet started when it flips are skipped;
    /// in-flight files run to their single-statement cache commit, so
    /// cancellation never leaves a partial entry.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Run the full scan. Per-file and per-root failures land in the
    /// report; only store-level breakage and config errors surface as `Err`.
    pub async fn process<F>(&self, mut on_progress: F) -> Result<AggregateReport>
    where
        F: FnMut(ScanProgress),
    {
        let (projects, discovery_failures) = discovery::discover(&self.config.roots);

        let jobs: Vec<(PathBuf, PathBuf)> = projects
            .iter()
            .flat_map(|p| {
                p.session_files
                    .iter()
                    .map(move |f| (p.path.clone(), f.clone()))
            })
            .collect();

        on_progress(ScanProgress::DiscoveryCompleted {
            projects: projects.len(),
            files: jobs.len(),
        });

        let live_paths: HashSet<PathBuf> = jobs.iter().map(|(_, f)| f.clone()).collect();

        // Every discovered project appears in the report, even if all of
        // its files fail; BTreeMap keeps the path ordering.
        let mut sessions_by_project: BTreeMap<PathBuf, Vec<SessionReport>> =
            projects.iter().map(|p| (p.path.clone(), Vec::new())).collect();
        let mut failures = discovery_failures;
        let mut cache_hits = 0usize;
        let mut cache_misses = 0usize;

        let workers = self.config.workers.max(1);
        let mut results = stream::iter(jobs.into_iter().map(|(project, file)| {
            let store = Arc::clone(&self.store);
            let cancel = Arc::clone(&self.cancel);
            tokio::task::spawn_blocking(move || {
                let work = process_file(&store, &file, &cancel);
                (project, file, work)
            })
        }))
        .buffer_unordered(workers);

        while let Some(joined) = results.next().await {
            let (project, file, work) = match joined {
                Ok(result) => result,
                Err(err) => {
                    // A panicked worker loses its file, not the run; with
                    // no cache entry the file is retried on the next scan.
                    failures.push(FileFailure {
                        path: PathBuf::new(),
                        reason: format!("worker failed: {}", err),
                    });
                    continue;
                }
            };

            match work {
                FileWork::Hit(session) => {
                    cache_hits += 1;
                    on_progress(ScanProgress::FileCompleted {
                        path: file.clone(),
                        from_cache: true,
                        issues: 0,
                    });
                    push_session(&mut sessions_by_project, project, file, *session);
                }
                FileWork::Parsed { session, issues } => {
                    cache_misses += 1;
                    on_progress(ScanProgress::FileCompleted {
                        path: file.clone(),
                        from_cache: false,
                        issues,
                    });
                    push_session(&mut sessions_by_project, project, file, *session);
                }
                FileWork::Failed(reason) => {
                    on_progress(ScanProgress::FileFailed {
                        path: file.clone(),
                        reason: reason.clone(),
                    });
                    failures.push(FileFailure { path: file, reason });
                }
                FileWork::Skipped => {
                    on_progress(ScanProgress::FileSkipped { path: file });
                }
            }
        }

        let cancelled = self.cancel.load(Ordering::SeqCst);
        let evicted = if self.config.evict && !cancelled {
            self.store
                .evict_missing(&live_paths)
                .context("cache eviction failed")?
        } else {
            0
        };

        let report = finalize(sessions_by_project, failures);
        on_progress(ScanProgress::Completed {
            sessions: report.session_count(),
            failures: report.failures.len(),
            cache_hits,
            cache_misses,
            evicted,
        });

        Ok(report)
    }

    /// Convenience wrapper for synchronous callers (CLI, tests): builds a
    /// runtime and drives `process` to completion.
    pub fn process_blocking<F>(&self, on_progress: F) -> Result<AggregateReport>
    where
        F: FnMut(ScanProgress),
    {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to start worker runtime")?;
        runtime.block_on(self.process(on_progress))
    }
}

/// One file's full parse-assemble-cache sequence. Runs on the blocking
/// pool; shares nothing with sibling files except the store, which is only
/// touched for the short lookup and commit sections.
fn process_file(store: &Store, path: &Path, cancel: &AtomicBool) -> FileWork {
    if cancel.load(Ordering::SeqCst) {
        return FileWork::Skipped;
    }

    let signature = match signature_of(path) {
        Ok(signature) => signature,
        Err(err) => return FileWork::Failed(format!("cannot read file: {}", err)),
    };

    // Store trouble on lookup is a forced miss, never a file failure.
    if let Ok(Some(session)) = store.lookup(&signature) {
        return FileWork::Hit(Box::new(session));
    }

    let parse = match parse_file(path) {
        Ok(parse) => parse,
        Err(err) => return FileWork::Failed(format!("cannot read file: {}", err)),
    };
    let issues = parse.issues.len();

    match assemble(parse.entries) {
        Some(session) => {
            // A failed cache write costs a recompute next run, nothing else.
            let _ = store.store(&signature, &session);
            FileWork::Parsed {
                session: Box::new(session),
                issues,
            }
        }
        None => FileWork::Failed(format!("no usable entries ({} lines rejected)", issues)),
    }
}

fn push_session(
    by_project: &mut BTreeMap<PathBuf, Vec<SessionReport>>,
    project: PathBuf,
    source_path: PathBuf,
    session: Session,
) {
    by_project.entry(project).or_default().push(SessionReport {
        source_path,
        session,
    });
}

fn finalize(
    by_project: BTreeMap<PathBuf, Vec<SessionReport>>,
    mut failures: Vec<FileFailure>,
) -> AggregateReport {
    let projects = by_project
        .into_iter()
        .map(|(path, mut sessions)| {
            sessions.sort_by(|a, b| {
                let a_key = (a.session.summary.first_timestamp, &a.source_path);
                let b_key = (b.session.summary.first_timestamp, &b.source_path);
                a_key.cmp(&b_key)
            });
            let working_dir = sessions
                .iter()
                .find_map(|s| s.session.summary.cwd.clone());
            ProjectReport {
                path,
                working_dir,
                sessions,
            }
        })
        .collect();

    failures.sort_by(|a, b| a.path.cmp(&b.path).then_with(|| a.reason.cmp(&b.reason)));

    AggregateReport { projects, failures }
}
