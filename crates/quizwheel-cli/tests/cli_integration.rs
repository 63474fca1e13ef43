use std::ffi::OsStr;
use std::fs;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|err| panic!("clock should be >= UNIX_EPOCH: {err}"))
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{prefix}-{now}"));
    fs::create_dir_all(&dir)
        .unwrap_or_else(|err| panic!("failed to create temp dir {}: {err}", dir.display()));
    dir
}

fn run_qw<I, S>(args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(env!("CARGO_BIN_EXE_qw"))
        .args(args)
        .env_remove("QUIZWHEEL_QUESTIONS_URL")
        .env_remove("QUIZWHEEL_QUESTIONS_KEY")
        .output()
        .unwrap_or_else(|err| panic!("failed to execute qw binary: {err}"))
}

fn run_json<I, S>(args: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_qw(args);
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "qw command failed (status={}):\nstdout:\n{}\nstderr:\n{}",
            output.status, stdout, stderr
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    serde_json::from_str(&stdout)
        .unwrap_or_else(|err| panic!("stdout is not valid JSON: {err}\nstdout:\n{stdout}"))
}

fn as_u64(value: &Value, key: &str) -> u64 {
    value
        .get(key)
        .and_then(Value::as_u64)
        .unwrap_or_else(|| panic!("missing integer field `{key}` in payload: {value}"))
}

fn as_str<'a>(value: &'a Value, key: &str) -> &'a str {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("missing string field `{key}` in payload: {value}"))
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap_or_else(|| panic!("path should be valid UTF-8: {}", path.display()))
}

fn add_item(db: &Path, name: &str, prompt: &str) -> Value {
    run_json([
        "--db",
        path_str(db),
        "wheel",
        "add",
        "--name",
        name,
        "--prompt",
        prompt,
    ])
}

fn spin(db: &Path, seed: u64) -> Value {
    run_json([
        "--db",
        path_str(db),
        "spin",
        "--seed",
        &seed.to_string(),
        "--settle-ms",
        "0",
    ])
}

// Test IDs: TCLI-001
#[test]
fn wheel_mutations_persist_across_invocations() {
    let sandbox = unique_temp_dir("quizwheel-cli-wheel");
    let db = sandbox.join("wheel.sqlite3");

    for (name, prompt) in [("1", "First?"), ("2", "Second?"), ("3", "Third?")] {
        let added = add_item(&db, name, prompt);
        assert_eq!(as_str(&added, "status"), "added");
    }

    let duplicate = add_item(&db, " 2 ", "Duplicate of second?");
    assert_eq!(as_str(&duplicate, "status"), "ignored");
    assert_eq!(as_u64(&duplicate, "count"), 3);

    let removed = run_json(["--db", path_str(&db), "wheel", "remove", "--position", "1"]);
    assert_eq!(as_str(&removed, "status"), "removed");
    assert_eq!(as_u64(&removed, "count"), 2);

    // A fresh invocation sees the same state, including the retirement.
    let listed = run_json(["--db", path_str(&db), "wheel", "list"]);
    assert_eq!(as_u64(&listed, "count"), 2);
    let retired = listed
        .get("retired")
        .and_then(Value::as_array)
        .unwrap_or_else(|| panic!("retired should be an array: {listed}"));
    assert_eq!(retired, &[Value::String("2".to_string())]);

    // Explicit re-add of a retired name lifts the retirement.
    let readded = add_item(&db, "2", "Second again?");
    assert_eq!(as_str(&readded, "status"), "added");
    let relisted = run_json(["--db", path_str(&db), "wheel", "list"]);
    assert_eq!(as_u64(&relisted, "count"), 3);
    let retired_after = relisted
        .get("retired")
        .and_then(Value::as_array)
        .unwrap_or_else(|| panic!("retired should be an array: {relisted}"));
    assert!(retired_after.is_empty());
}

// Test IDs: TCLI-002
#[test]
fn seeded_spins_are_deterministic_and_consume_the_winner() {
    let sandbox = unique_temp_dir("quizwheel-cli-spin");
    let db_a = sandbox.join("a.sqlite3");
    let db_b = sandbox.join("b.sqlite3");

    for db in [&db_a, &db_b] {
        for (name, prompt) in [("1", "First?"), ("2", "Second?"), ("3", "Third?")] {
            add_item(db, name, prompt);
        }
    }

    let settled_a = spin(&db_a, 42);
    let settled_b = spin(&db_b, 42);
    assert_eq!(as_str(&settled_a, "status"), "settled");
    assert_eq!(settled_a.get("winner"), settled_b.get("winner"));
    assert_eq!(as_u64(&settled_a, "remaining"), 2);

    let winner_name = settled_a
        .get("winner")
        .and_then(|winner| winner.get("name"))
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("winner should carry a name: {settled_a}"));

    let history = run_json(["--db", path_str(&db_a), "history", "show"]);
    assert_eq!(as_u64(&history, "count"), 1);
    let first_entry_name = history
        .get("entries")
        .and_then(Value::as_array)
        .and_then(|entries| entries.first())
        .and_then(|entry| entry.get("name"))
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("history entry should carry a name: {history}"));
    assert_eq!(first_entry_name, winner_name);

    // The consumed name is not retired: the wheel list shows no retirement.
    let listed = run_json(["--db", path_str(&db_a), "wheel", "list"]);
    let retired = listed
        .get("retired")
        .and_then(Value::as_array)
        .unwrap_or_else(|| panic!("retired should be an array: {listed}"));
    assert!(retired.is_empty());
}

// Test IDs: TCLI-003
#[test]
fn spin_on_an_empty_wheel_reports_empty() {
    let sandbox = unique_temp_dir("quizwheel-cli-empty");
    let db = sandbox.join("empty.sqlite3");

    let spun = spin(&db, 1);
    assert_eq!(as_str(&spun, "status"), "empty");
    assert!(spun.get("winner").is_some_and(Value::is_null));
}

// Test IDs: TCLI-004
#[test]
fn repopulate_moves_history_back_onto_the_wheel() {
    let sandbox = unique_temp_dir("quizwheel-cli-repopulate");
    let db = sandbox.join("repopulate.sqlite3");

    for (name, prompt) in [("1", "First?"), ("2", "Second?")] {
        add_item(&db, name, prompt);
    }
    spin(&db, 7);
    spin(&db, 8);

    let history = run_json(["--db", path_str(&db), "history", "show"]);
    assert_eq!(as_u64(&history, "count"), 2);
    let listed = run_json(["--db", path_str(&db), "wheel", "list"]);
    assert_eq!(as_u64(&listed, "count"), 0);

    let repopulated = run_json(["--db", path_str(&db), "wheel", "repopulate"]);
    assert_eq!(as_str(&repopulated, "status"), "repopulated");
    assert_eq!(as_u64(&repopulated, "count"), 2);

    let history_after = run_json(["--db", path_str(&db), "history", "show"]);
    assert_eq!(as_u64(&history_after, "count"), 0);
}

// Test IDs: TCLI-005
#[test]
fn history_keeps_only_the_five_most_recent_draws() {
    let sandbox = unique_temp_dir("quizwheel-cli-history-cap");
    let db = sandbox.join("cap.sqlite3");

    for position in 1..=7 {
        add_item(&db, &position.to_string(), &format!("Question {position}?"));
    }
    for seed in 0..6 {
        let settled = spin(&db, seed);
        assert_eq!(as_str(&settled, "status"), "settled");
    }

    let history = run_json(["--db", path_str(&db), "history", "show"]);
    assert_eq!(as_u64(&history, "count"), 5);

    let cleared = run_json(["--db", path_str(&db), "history", "clear"]);
    assert_eq!(as_str(&cleared, "status"), "cleared");
    let history_after = run_json(["--db", path_str(&db), "history", "show"]);
    assert_eq!(as_u64(&history_after, "count"), 0);

    // Clearing history leaves the wheel alone.
    let listed = run_json(["--db", path_str(&db), "wheel", "list"]);
    assert_eq!(as_u64(&listed, "count"), 1);
}

// Test IDs: TCLI-006
#[test]
fn clear_resets_the_wheel_and_history() {
    let sandbox = unique_temp_dir("quizwheel-cli-clear");
    let db = sandbox.join("clear.sqlite3");

    for (name, prompt) in [("1", "First?"), ("2", "Second?")] {
        add_item(&db, name, prompt);
    }
    spin(&db, 3);

    let cleared = run_json(["--db", path_str(&db), "wheel", "clear"]);
    assert_eq!(as_str(&cleared, "status"), "cleared");
    assert_eq!(as_u64(&cleared, "count"), 0);

    let history = run_json(["--db", path_str(&db), "history", "show"]);
    assert_eq!(as_u64(&history, "count"), 0);

    // A cleared user-added item does not resurrect on the next load.
    let listed = run_json(["--db", path_str(&db), "wheel", "list"]);
    assert_eq!(as_u64(&listed, "count"), 0);
}

// Test IDs: TCLI-007
#[test]
fn questions_commands_require_configuration() {
    let sandbox = unique_temp_dir("quizwheel-cli-questions-env");
    let db = sandbox.join("questions.sqlite3");

    let output = run_qw(["--db", path_str(&db), "questions", "list"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("not configured"),
        "stderr should mention missing configuration:\n{stderr}"
    );
}

// Test IDs: TCLI-008
#[test]
fn questions_list_talks_to_the_configured_repository() {
    let listener = TcpListener::bind("127.0.0.1:0")
        .unwrap_or_else(|err| panic!("bind failed: {err}"));
    let addr = listener.local_addr().unwrap_or_else(|err| panic!("local_addr failed: {err}"));
    let server = thread::spawn(move || {
        let (mut stream, _) =
            listener.accept().unwrap_or_else(|err| panic!("accept failed: {err}"));
        let mut buf = [0u8; 4096];
        let _ = stream.read(&mut buf);
        let body = r#"[{"index":1,"question":"Capital of France?","answers":"Paris"}]"#;
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        stream
            .write_all(response.as_bytes())
            .unwrap_or_else(|err| panic!("write failed: {err}"));
    });

    let sandbox = unique_temp_dir("quizwheel-cli-questions-list");
    let db = sandbox.join("questions.sqlite3");
    let output = Command::new(env!("CARGO_BIN_EXE_qw"))
        .args(["--db", path_str(&db), "questions", "list"])
        .env("QUIZWHEEL_QUESTIONS_URL", format!("http://{addr}"))
        .env("QUIZWHEEL_QUESTIONS_KEY", "test-key")
        .output()
        .unwrap_or_else(|err| panic!("failed to execute qw binary: {err}"));
    server.join().unwrap_or_else(|_| panic!("server thread panicked"));

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let listed: Value = serde_json::from_str(&stdout)
        .unwrap_or_else(|err| panic!("stdout is not valid JSON: {err}\nstdout:\n{stdout}"));
    assert_eq!(as_u64(&listed, "count"), 1);
    assert_eq!(as_str(&listed, "contract_version"), "cli.v1");
    let question = listed
        .get("questions")
        .and_then(Value::as_array)
        .and_then(|questions| questions.first())
        .unwrap_or_else(|| panic!("questions should be a non-empty array: {listed}"));
    assert_eq!(as_u64(question, "index"), 1);
    assert_eq!(as_str(question, "question"), "Capital of France?");
}
