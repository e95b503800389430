use assert_cmd::prelude::*;
use assert_fs::prelude::*;
use predicates::prelude::*;
use predicates::str::contains;
use std::process::Command;

const INPUT: &str = r#"{
  "feed_date": "2025-03-10",
  "category": "ai",
  "trends": [
    {"topic": "Autonomous coding agents", "reason": "r", "score": 9,
     "links": [], "search_keywords": ["agents"]},
    {"topic": "Quantum error correction", "reason": "r", "score": 7,
     "links": [], "search_keywords": ["qubits"]},
    {"topic": "Coral reef restoration", "reason": "r", "score": 3,
     "links": [], "search_keywords": ["ocean"]}
  ]
}"#;

/// Write a config rooted at the temp dir and return its path
fn write_config(temp: &assert_fs::TempDir, provider: &str) -> std::path::PathBuf {
  let root = temp.path().display();
  let config = temp.child("config.yaml");
  config
    .write_str(&format!(
      r#"
deduplication:
  history-keywords: {root}/history
  collection-name: tech_trends
  dedup-analysis-report: {root}/dedup
  similarity-threshold: 0.85
  lookback-days: 7
  target-count: 2
  log: {root}/logs
  embedding-provider: {provider}
  embedding-model: hashing-v1
tech-trend-analysis:
  analysis-report: {root}/analysis
  org-analysis-report: {root}/org
"#
    ))
    .unwrap();
  config.path().to_path_buf()
}

fn dedup_cmd(config: &std::path::Path) -> Command {
  let mut cmd = Command::cargo_bin("trend-dedup").expect("binary exists");
  cmd.arg("--config").arg(config);
  cmd
}

#[test]
fn test_run_rotates_and_reports_per_category() {
  let temp = assert_fs::TempDir::new().unwrap();
  let config = write_config(&temp, "hashing");
  temp.child("analysis/2025-03-10/ai.json").write_str(INPUT).unwrap();

  dedup_cmd(&config)
    .args(["--feed-date", "2025-03-10"])
    .assert()
    .success()
    .stdout(contains("ai: 2 selected").and(contains("1 completed, 0 skipped, 0 failed")));

  temp.child("org/2025-03-10/ai.json").assert(INPUT);
  temp
    .child("analysis/2025-03-10/ai.json")
    .assert(contains("Autonomous coding agents").and(contains("Coral reef").not()));
  temp.child("dedup/2025-03-10/.ai.done").assert(predicate::path::exists());
  temp.child("logs/deduplication.log").assert(contains("\"run_id\""));

  // Second invocation finds the finished category
  dedup_cmd(&config)
    .args(["--feed-date", "2025-03-10"])
    .assert()
    .success()
    .stdout(contains("ai: skipped (already processed)"));

  temp.close().unwrap();
}

#[test]
fn test_config_from_environment() {
  let temp = assert_fs::TempDir::new().unwrap();
  let config = write_config(&temp, "hashing");

  Command::cargo_bin("trend-dedup")
    .unwrap()
    .env("TREND_DEDUP_CONFIG", &config)
    .args(["--feed-date", "2025-03-10", "--category", "ai"])
    .assert()
    .success()
    .stdout(contains("ai: skipped (no input)"));
}

#[test]
fn test_missing_config_exits_with_failure() {
  let temp = assert_fs::TempDir::new().unwrap();

  dedup_cmd(&temp.path().join("absent.yaml"))
    .args(["--feed-date", "2025-03-10"])
    .assert()
    .code(1)
    .stderr(contains("Configuration file not found"));
}

#[test]
fn test_unavailable_provider_exits_with_failure() {
  let temp = assert_fs::TempDir::new().unwrap();
  let config = write_config(&temp, "openai");

  dedup_cmd(&config)
    .args(["--feed-date", "2025-03-10"])
    .assert()
    .code(1)
    .stderr(contains("not built into this binary"));
}

#[test]
fn test_invalid_feed_date_is_rejected() {
  let temp = assert_fs::TempDir::new().unwrap();
  let config = write_config(&temp, "hashing");

  dedup_cmd(&config).args(["--feed-date", "10/03/2025"]).assert().failure();
}
