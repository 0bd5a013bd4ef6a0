use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn ba_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_ba"))
}

fn write_docx(path: &Path, text: &str) {
    let xml = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:body></w:document>",
        text
    );
    let mut zip = zip::ZipWriter::new(fs::File::create(path).unwrap());
    zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
        .unwrap();
    zip.write_all(xml.as_bytes()).unwrap();
    zip.finish().unwrap();
}

fn setup_test_env(vector_provider: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();

    let docs_dir = root.join("personalauto");
    fs::create_dir_all(&docs_dir).unwrap();
    write_docx(
        &docs_dir.join("collision.docx"),
        "Collision coverage pays for damage to the insured vehicle.",
    );
    write_docx(
        &docs_dir.join("comprehensive.docx"),
        "Comprehensive coverage includes theft and hail.",
    );

    let config_content = format!(
        r#"[db]
path = "{root}/data/ba.sqlite"

[chunking]
chunk_size = 500
chunk_overlap = 50

[embedding]
provider = "disabled"

[vector]
provider = "{vector_provider}"

[ingest]
folder = "{root}/personalauto"
lob = "personal_auto"
"#,
        root = root.display(),
        vector_provider = vector_provider,
    );

    let config_path = config_dir.join("ba.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_ba(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = ba_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path)
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run ba binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env("disabled");

    let (stdout, stderr, success) = run_ba(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));

    let (_, _, success) = run_ba(&config_path, &["init"]);
    assert!(success, "Second init failed (not idempotent)");
}

#[test]
fn test_ingest_without_vectors_stores_documents() {
    let (_tmp, config_path) = setup_test_env("disabled");

    run_ba(&config_path, &["init"]);
    let (stdout, stderr, success) = run_ba(&config_path, &["ingest"]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("files found: 2"));
    assert!(stdout.contains("documents stored without vectors: 2"));
    assert!(stdout.contains("ok"));

    let (stdout, _, success) = run_ba(&config_path, &["docs", "list"]);
    assert!(success);
    assert!(stdout.contains("collision.docx"));
    assert!(stdout.contains("comprehensive.docx"));
    assert!(stdout.contains("processed"));
}

#[test]
fn test_ingest_dry_run() {
    let (_tmp, config_path) = setup_test_env("disabled");

    let (stdout, _, success) = run_ba(&config_path, &["ingest", "--dry-run"]);
    assert!(success);
    assert!(stdout.contains("dry-run"));
    assert!(stdout.contains("files found: 2"));

    let (stdout, _, _) = run_ba(&config_path, &["docs", "list"]);
    assert!(stdout.contains("No documents."));
}

#[test]
fn test_ingest_missing_folder_fails() {
    let (tmp, config_path) = setup_test_env("disabled");

    let missing = tmp.path().join("absent");
    let (_, stderr, success) = run_ba(&config_path, &["ingest", missing.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("does not exist"));
}

#[test]
fn test_search_without_vectors_is_empty() {
    let (_tmp, config_path) = setup_test_env("disabled");

    let (stdout, _, success) = run_ba(&config_path, &["search", "collision"]);
    assert!(success);
    assert!(stdout.contains("No results."));

    let (stdout, _, success) = run_ba(&config_path, &["search", "collision", "--json"]);
    assert!(success);
    assert_eq!(stdout.trim(), "[]");
}

#[test]
fn test_memory_index_needs_no_setup() {
    let (_tmp, config_path) = setup_test_env("memory");

    let (stdout, _, success) = run_ba(&config_path, &["index", "setup"]);
    assert!(success);
    assert!(stdout.contains("needs no setup"));
}

#[test]
fn test_ingest_with_memory_index_warns_vectors_are_discarded() {
    let (_tmp, config_path) = setup_test_env("memory");

    run_ba(&config_path, &["init"]);
    let (stdout, stderr, success) = run_ba(&config_path, &["ingest"]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("in-memory index is discarded"));

    let (_tmp, config_path) = setup_test_env("disabled");
    run_ba(&config_path, &["init"]);
    let (stdout, _, success) = run_ba(&config_path, &["ingest"]);
    assert!(success);
    assert!(!stdout.contains("in-memory index"));
}

#[test]
fn test_deploy_requires_embedder() {
    let (_tmp, config_path) = setup_test_env("memory");

    let (_, stderr, success) = run_ba(&config_path, &["deploy"]);
    assert!(!success);
    assert!(stderr.contains("embedder"));
}

#[test]
fn test_approval_status_rejects_unknown_value() {
    let (_tmp, config_path) = setup_test_env("disabled");

    run_ba(&config_path, &["init"]);
    let (_, stderr, success) = run_ba(&config_path, &["approvals", "set-status", "abc", "maybe"]);
    assert!(!success);
    assert!(stderr.to_lowercase().contains("maybe"));
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_ba(&tmp.path().join("nope.toml"), &["init"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}
