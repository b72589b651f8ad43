use cli::collect::{collect_paths, read_uploads};
use scanflow_core::config::AppConfig;
use scanflow_core::pipeline::{self, PipelineSummary};
use scanflow_core::ScanStatus;
use std::fs;
use std::path::PathBuf;
use tempfile::tempdir;

fn relative(root: &std::path::Path, files: &[PathBuf]) -> Vec<String> {
    files
        .iter()
        .map(|p| {
            p.strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/")
        })
        .collect()
}

#[test]
fn walks_directories_and_honours_excludes() {
    let temp = tempdir().unwrap();
    let root = temp.path();
    fs::create_dir_all(root.join("sub/.git")).unwrap();
    fs::write(root.join("a.txt"), "hello").unwrap();
    fs::write(root.join("skip.tmp"), "tmp").unwrap();
    fs::write(root.join(".env"), "SECRET=1").unwrap();
    fs::write(root.join("sub/b.bin"), [0x7f, b'E', b'L', b'F']).unwrap();
    fs::write(root.join("sub/.git/HEAD"), "ref").unwrap();

    let files = collect_paths(&[root.to_path_buf()], &["*.tmp".to_string()], false).unwrap();
    assert_eq!(relative(root, &files), vec!["a.txt", "sub/b.bin"]);

    let files = collect_paths(&[root.to_path_buf()], &[], true).unwrap();
    assert_eq!(
        relative(root, &files),
        vec![".env", "a.txt", "skip.tmp", "sub/.git/HEAD", "sub/b.bin"]
    );
}

#[test]
fn explicit_files_are_taken_as_given() {
    let temp = tempdir().unwrap();
    let file = temp.path().join(".hidden-but-named");
    fs::write(&file, "x").unwrap();
    let files = collect_paths(&[file.clone()], &[], false).unwrap();
    assert_eq!(files, vec![file]);
}

#[test]
fn missing_path_is_an_error() {
    let temp = tempdir().unwrap();
    assert!(collect_paths(&[temp.path().join("nope")], &[], false).is_err());
}

#[tokio::test]
async fn simulated_scan_of_a_directory() {
    let temp = tempdir().unwrap();
    let root = temp.path();
    fs::write(root.join("notes.txt"), "just text").unwrap();
    fs::write(root.join("tool.exe"), b"MZ\x90\x00\x03").unwrap();
    fs::write(root.join("run.sh"), "#!/bin/sh\necho hi\n").unwrap();

    let files = collect_paths(&[root.to_path_buf()], &[], false).unwrap();
    let uploads = read_uploads(&files).await.unwrap();
    assert_eq!(uploads.len(), 3);

    let mut cfg = AppConfig::default();
    cfg.backend.provider = "mock".to_string();
    cfg.backend.mock.latency_ms = 5;
    let orchestrator = pipeline::build_orchestrator(&cfg).unwrap();

    let summary = pipeline::run_uploads(&orchestrator, uploads).await;
    assert_eq!(
        summary,
        PipelineSummary {
            submitted: 3,
            clean: 1,
            suspicious: 2,
            failed: 0,
            pending: 0,
        }
    );

    let snapshot = orchestrator.snapshot();
    // Files were submitted in walk order, so the last one is listed first.
    assert_eq!(snapshot[0].file_name(), "tool.exe");
    assert_eq!(snapshot[0].status(), ScanStatus::Suspicious);
    assert!(snapshot[0].mime_type().is_some());
    let notes = snapshot
        .iter()
        .find(|r| r.file_name() == "notes.txt")
        .unwrap();
    assert_eq!(notes.status(), ScanStatus::Clean);
    assert_eq!(notes.file_size_bytes(), 9);
}
