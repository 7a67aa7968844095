//! End-to-end pipeline behavior: failure isolation, cache reuse, and the
//! determinism guarantees the aggregate report makes to downstream renderers.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use tracelens_runtime::{AggregateReport, Pipeline, PipelineConfig, ScanProgress};

fn user_line(uuid: &str, session: &str, minute: u32, text: &str) -> String {
    format!(
        r#"{{"type":"user","uuid":"{uuid}","parentUuid":null,"sessionId":"{session}","timestamp":"2026-01-10T12:{minute:02}:00Z","cwd":"/work/{session}","isSidechain":false,"message":{{"role":"user","content":"{text}"}}}}"#
    )
}

fn assistant_line(uuid: &str, parent: &str, session: &str, minute: u32, tokens: (u64, u64)) -> String {
    format!(
        r#"{{"type":"assistant","uuid":"{uuid}","parentUuid":"{parent}","sessionId":"{session}","timestamp":"2026-01-10T12:{minute:02}:30Z","message":{{"role":"assistant","content":[{{"type":"text","text":"on it"}}],"usage":{{"input_tokens":{},"output_tokens":{}}}}}}}"#,
        tokens.0, tokens.1
    )
}

fn write_session(dir: &Path, name: &str, session: &str, minute: u32) -> PathBuf {
    let path = dir.join(name);
    let content = format!(
        "{}\n{}\n",
        user_line(&format!("{session}-u1"), session, minute, "please help"),
        assistant_line(&format!("{session}-a1"), &format!("{session}-u1"), session, minute, (10, 5)),
    );
    std::fs::write(&path, content).unwrap();
    path
}

struct Run {
    report: AggregateReport,
    cache_hits: usize,
    cache_misses: usize,
    evicted: usize,
}

fn run_scan(roots: Vec<PathBuf>, cache_path: &Path, workers: usize) -> Run {
    let mut config = PipelineConfig::new(roots, cache_path.to_path_buf());
    config.workers = workers;
    let pipeline = Pipeline::new(config).unwrap();

    let mut cache_hits = 0;
    let mut cache_misses = 0;
    let mut evicted = 0;
    let report = pipeline
        .process_blocking(|progress| {
            if let ScanProgress::Completed {
                cache_hits: hits,
                cache_misses: misses,
                evicted: ev,
                ..
            } = progress
            {
                cache_hits = hits;
                cache_misses = misses;
                evicted = ev;
            }
        })
        .unwrap();

    Run {
        report,
        cache_hits,
        cache_misses,
        evicted,
    }
}

#[test]
fn empty_root_set_is_a_fatal_config_error() {
    let dir = TempDir::new().unwrap();
    let config = PipelineConfig::new(Vec::new(), dir.path().join("cache.db"));
    assert!(Pipeline::new(config).is_err());
}

#[test]
fn one_corrupt_file_does_not_abort_its_siblings() {
    let dir = TempDir::new().unwrap();
    // Canonicalized so reported paths compare exactly on symlinked tmpdirs
    let base = dir.path().canonicalize().unwrap();
    let project = base.join("proj");
    std::fs::create_dir_all(&project).unwrap();

    write_session(&project, "a.jsonl", "s-a", 1);
    write_session(&project, "b.jsonl", "s-b", 2);
    let corrupt = project.join("c.jsonl");
    std::fs::write(&corrupt, "{half a record\n{also broken\n").unwrap();

    let run = run_scan(vec![base.clone()], &base.join("cache.db"), 4);

    assert_eq!(run.report.session_count(), 2);
    assert_eq!(run.report.failures.len(), 1);
    assert_eq!(run.report.failures[0].path, corrupt);
    assert!(run.report.failures[0].reason.contains("no usable entries"));
}

#[test]
fn report_ordering_is_independent_of_worker_count() {
    let dir = TempDir::new().unwrap();
    for (project, minute) in [("proj-c", 3), ("proj-a", 1), ("proj-b", 2)] {
        let project_dir = dir.path().join(project);
        std::fs::create_dir_all(&project_dir).unwrap();
        for i in 0..3u32 {
            write_session(
                &project_dir,
                &format!("s{i}.jsonl"),
                &format!("{project}-s{i}"),
                minute + i,
            );
        }
    }

    let serial = run_scan(
        vec![dir.path().to_path_buf()],
        &dir.path().join("cache-serial.db"),
        1,
    );
    let parallel = run_scan(
        vec![dir.path().to_path_buf()],
        &dir.path().join("cache-parallel.db"),
        8,
    );

    let serial_json = serde_json::to_string(&serial.report).unwrap();
    let parallel_json = serde_json::to_string(&parallel.report).unwrap();
    assert_eq!(serial_json, parallel_json);

    // Sessions within each project come back in start-timestamp order
    let titles: Vec<_> = serial.report.projects[0]
        .sessions
        .iter()
        .map(|s| s.source_path.clone())
        .collect();
    let mut sorted = titles.clone();
    sorted.sort();
    assert_eq!(titles, sorted);
}

#[test]
fn second_run_over_unchanged_input_hits_cache_and_matches_byte_for_byte() {
    let dir = TempDir::new().unwrap();
    let project = dir.path().join("proj");
    std::fs::create_dir_all(&project).unwrap();
    write_session(&project, "a.jsonl", "s-a", 1);
    write_session(&project, "b.jsonl", "s-b", 2);

    let cache = dir.path().join("cache.db");
    let first = run_scan(vec![dir.path().to_path_buf()], &cache, 4);
    assert_eq!(first.cache_misses, 2);
    assert_eq!(first.cache_hits, 0);

    let second = run_scan(vec![dir.path().to_path_buf()], &cache, 4);
    assert_eq!(second.cache_hits, 2);
    assert_eq!(second.cache_misses, 0);

    assert_eq!(
        serde_json::to_string(&first.report).unwrap(),
        serde_json::to_string(&second.report).unwrap()
    );
}

#[test]
fn content_edit_preserving_length_and_mtime_still_misses() {
    let dir = TempDir::new().unwrap();
    let project = dir.path().join("proj");
    std::fs::create_dir_all(&project).unwrap();
    let path = write_session(&project, "a.jsonl", "s-a", 1);
    let cache = dir.path().join("cache.db");

    let first = run_scan(vec![dir.path().to_path_buf()], &cache, 2);
    assert_eq!(first.cache_misses, 1);

    // Same byte length, different content, modification time restored
    let mtime = filetime::FileTime::from_last_modification_time(&std::fs::metadata(&path).unwrap());
    let edited = std::fs::read_to_string(&path)
        .unwrap()
        .replace("please help", "kindly help");
    std::fs::write(&path, edited).unwrap();
    filetime::set_file_mtime(&path, mtime).unwrap();

    let second = run_scan(vec![dir.path().to_path_buf()], &cache, 2);
    assert_eq!(second.cache_hits, 0);
    assert_eq!(second.cache_misses, 1);
    let title = second.report.projects[0].sessions[0]
        .session
        .summary
        .title
        .clone()
        .unwrap();
    assert_eq!(title, "kindly help");
}

#[test]
fn entries_for_deleted_files_are_evicted() {
    let dir = TempDir::new().unwrap();
    let project = dir.path().join("proj");
    std::fs::create_dir_all(&project).unwrap();
    write_session(&project, "keep.jsonl", "s-keep", 1);
    let doomed = write_session(&project, "gone.jsonl", "s-gone", 2);
    let cache = dir.path().join("cache.db");

    let first = run_scan(vec![dir.path().to_path_buf()], &cache, 2);
    assert_eq!(first.cache_misses, 2);
    assert_eq!(first.evicted, 0);

    std::fs::remove_file(&doomed).unwrap();
    let second = run_scan(vec![dir.path().to_path_buf()], &cache, 2);
    assert_eq!(second.cache_hits, 1);
    assert_eq!(second.evicted, 1);
    assert_eq!(second.report.session_count(), 1);
}

#[test]
fn report_carries_summary_and_working_directory() {
    let dir = TempDir::new().unwrap();
    let project = dir.path().join("proj");
    std::fs::create_dir_all(&project).unwrap();
    write_session(&project, "a.jsonl", "s-a", 1);

    let run = run_scan(
        vec![dir.path().to_path_buf()],
        &dir.path().join("cache.db"),
        2,
    );

    let project_report = &run.report.projects[0];
    assert_eq!(project_report.working_dir.as_deref(), Some("/work/s-a"));

    let session = &project_report.sessions[0].session;
    assert_eq!(session.session_id, "s-a");
    assert_eq!(session.summary.title.as_deref(), Some("please help"));
    assert_eq!(session.summary.usage.input_tokens, 10);
    assert_eq!(session.summary.usage.output_tokens, 5);
    assert_eq!(session.summary.message_count, 2);
    assert_eq!(session.thread.roots, vec!["s-a-u1".to_string()]);
    assert_eq!(session.thread.children_of("s-a-u1"), ["s-a-a1".to_string()]);
}
