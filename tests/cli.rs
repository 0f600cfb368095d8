mod repos;

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use repos::test_repo::TestRepo;
use rusqlite::{Connection, params};
use serde_json::json;

const T: i64 = 1_700_000_000_000;

fn ai_context(repo: &TestRepo) -> Command {
    let mut cmd = Command::cargo_bin("ai-context").unwrap();
    cmd.current_dir(repo.path())
        .env("AI_CONTEXT_CONFIG", repo.path().join("no-such-config.json"));
    cmd
}

fn write_chat_db(path: &Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch("CREATE TABLE cursorDiskKV (key TEXT UNIQUE ON CONFLICT REPLACE, value BLOB);")
        .unwrap();
    let rows = [
        ("composerData:c1", json!({"composerId": "c1"})),
        ("bubbleId:c1:u1", json!({"type": 1, "createdAt": T - 1_000, "text": "add logging"})),
        ("bubbleId:c1:b1", json!({"type": 2, "createdAt": T, "text": "Sure."})),
    ];
    for (key, value) in rows {
        conn.execute(
            "INSERT INTO cursorDiskKV (key, value) VALUES (?1, ?2)",
            params![key, value.to_string()],
        )
        .unwrap();
    }
}

fn repo_with_edit() -> TestRepo {
    let repo = TestRepo::new();
    let original: String = (1..=10).map(|i| format!("line {}\n", i)).collect();
    repo.write_file("src/x.ts", &original);
    repo.stage_all_and_commit("initial").unwrap();
    let edited: String = (1..=10)
        .map(|i| {
            if (3..=6).contains(&i) {
                format!("line {} // ai\n", i)
            } else {
                format!("line {}\n", i)
            }
        })
        .collect();
    repo.write_file("src/x.ts", &edited);
    repo
}

#[test]
fn test_version() {
    let repo = TestRepo::new_plain_dir();
    ai_context(&repo)
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_ranges_prints_json() {
    let repo = repo_with_edit();
    let output = ai_context(&repo).arg("ranges").assert().success().get_output().stdout.clone();

    let parsed: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(parsed["src/x.ts"], json!([{"start": 3, "end": 6}]));
}

#[test]
fn test_show_on_empty_store() {
    let repo = TestRepo::new();
    ai_context(&repo)
        .arg("show")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("[]"));
}

#[test]
fn test_show_unknown_id_fails() {
    let repo = TestRepo::new();
    ai_context(&repo)
        .args(["show", "--id", "missing"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no provenance record with id missing"));
}

#[test]
fn test_lookup_rejects_malformed_location() {
    let repo = TestRepo::new();
    ai_context(&repo)
        .args(["lookup", "src/x.ts"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("expected <file>:<line>"));
}

#[test]
fn test_process_latest_then_lookup() {
    let repo = repo_with_edit();
    let db_dir = tempfile::tempdir().unwrap();
    let db = db_dir.path().join("state.vscdb");
    write_chat_db(&db);

    ai_context(&repo)
        .args(["process-latest", "--db"])
        .arg(&db)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"responseId\": \"b1\""))
        .stdout(predicate::str::contains("\"prompt\": \"add logging\""));

    assert_eq!(repo.current_branch().as_deref(), Some("main"));
    assert!(repo.branches().contains(&"ai-context-Test-User".to_string()));

    ai_context(&repo)
        .args(["lookup", "src/x.ts:4"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"source\": \"record\""))
        .stdout(predicate::str::contains("b1"));

    let metadata = fs::read_to_string(repo.path().join(".ai-context/metadata.json")).unwrap();
    assert!(metadata.contains("src/x.ts"));
}

#[test]
fn test_process_latest_without_database_fails() {
    let repo = repo_with_edit();
    ai_context(&repo)
        .args(["process-latest", "--db"])
        .arg(repo.path().join("missing.vscdb"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}
