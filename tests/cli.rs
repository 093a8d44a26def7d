use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn kbh_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_kbh"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("alpha.md"),
        "# Alpha Document\n\nThis is the alpha document about Rust programming.\n\nIt contains information about cargo and crates.",
    )
    .unwrap();
    fs::write(
        files_dir.join("beta.md"),
        "# Beta Document\n\nThis document discusses Python and machine learning.\n\nDeep learning frameworks like PyTorch are covered.",
    )
    .unwrap();
    fs::write(
        files_dir.join("gamma.txt"),
        "Gamma plain text file.\n\nContains notes about deployment and infrastructure.\n\nKubernetes and Docker are mentioned here.",
    )
    .unwrap();

    let config_content = format!(
        r#"[store]
path = "{}/store"
max_collections = 5

[retrieval]
top_k = 2

[embedding]
provider = "disabled"
"#,
        root.display()
    );

    let config_path = config_dir.join("kbh.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_kbh(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = kbh_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run kbh binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn collection_from(stdout: &str) -> String {
    stdout
        .lines()
        .find_map(|l| l.strip_prefix("collection: "))
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| panic!("no collection line in output: {stdout}"))
}

#[test]
fn test_kb_local_then_query() {
    let (tmp, config) = setup_test_env();
    let files = tmp.path().join("files");

    let (stdout, stderr, success) = run_kbh(&config, &["kb", "local", files.to_str().unwrap()]);
    assert!(success, "kb local failed: {stderr}");
    let collection = collection_from(&stdout);
    assert!(collection.starts_with("kb_"));
    assert!(stdout.contains("locations:  3"));

    let (stdout, stderr, success) = run_kbh(&config, &["query", &collection, "kubernetes docker"]);
    assert!(success, "query failed: {stderr}");
    assert!(stdout.lines().next().unwrap().contains("gamma.txt"), "{stdout}");
}

#[test]
fn test_kb_local_is_idempotent() {
    let (tmp, config) = setup_test_env();
    let files = tmp.path().join("files");
    let files = files.to_str().unwrap();

    let (first, _, ok) = run_kbh(&config, &["kb", "local", files]);
    assert!(ok);
    let (second, stderr, ok) = run_kbh(&config, &["kb", "local", files]);
    assert!(ok);
    assert_eq!(collection_from(&first), collection_from(&second));
    assert!(stderr.contains("reusing"), "{stderr}");

    let (stdout, _, ok) = run_kbh(&config, &["collections"]);
    assert!(ok);
    assert_eq!(stdout.lines().count(), 1);
}

#[test]
fn test_keyword_with_no_match_fails() {
    let (tmp, config) = setup_test_env();
    let files = tmp.path().join("files");
    let (_, stderr, success) = run_kbh(
        &config,
        &["kb", "local", files.to_str().unwrap(), "--keyword", "haskell"],
    );
    assert!(!success);
    assert!(stderr.contains("no documents found"), "{stderr}");
}

#[test]
fn test_cleanup_with_max() {
    let (tmp, config) = setup_test_env();
    let root = tmp.path();
    for name in ["alpha.md", "beta.md", "gamma.txt"] {
        let path = root.join("files").join(name);
        let (_, stderr, ok) = run_kbh(&config, &["kb", "local", path.to_str().unwrap()]);
        assert!(ok, "{stderr}");
    }

    let (stdout, _, ok) = run_kbh(&config, &["cleanup", "--max", "1"]);
    assert!(ok);
    assert!(stdout.contains("1 collections remain"), "{stdout}");
    assert_eq!(stdout.matches("deleted ").count(), 2);
}

#[test]
fn test_query_unknown_collection_fails() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, success) = run_kbh(&config, &["query", "kb_missing", "anything"]);
    assert!(!success);
    assert!(stderr.contains("collection not found"), "{stderr}");
}

#[test]
fn test_crawl_does_not_open_store_or_embedder() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    let config_path = root.join("kbh.toml");
    fs::write(
        &config_path,
        format!(
            r#"[store]
path = "{}/store"

[crawl]
min_delay = 0.0
max_delay = 0.0
timeout_secs = 2
sitemap_timeout_secs = 2

[embedding]
provider = "openai"
model = "text-embedding-3-small"
"#,
            root.display()
        ),
    )
    .unwrap();

    // Nothing listens on the discard port; the seed is still collected.
    let output = Command::new(kbh_binary())
        .arg("--config")
        .arg(&config_path)
        .args(["crawl", "http://127.0.0.1:9/", "--max-pages", "1"])
        .env_remove("OPENAI_API_KEY")
        .output()
        .unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "crawl failed: {stderr}");
    assert!(stdout.contains("1 URLs"), "{stdout}");
    assert!(!root.join("store").exists());

    // The same config cannot open the knowledge base without a key.
    let output = Command::new(kbh_binary())
        .arg("--config")
        .arg(&config_path)
        .arg("collections")
        .env_remove("OPENAI_API_KEY")
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("OPENAI_API_KEY"));
}
