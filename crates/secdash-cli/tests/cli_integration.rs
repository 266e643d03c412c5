use std::ffi::OsStr;
use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;
use tempfile::TempDir;

fn run_secdash<I, S>(dir: &Path, args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(env!("CARGO_BIN_EXE_secdash"))
        .arg("--db")
        .arg(dir.join("secdash.sqlite3"))
        .args(args)
        // Keep the assistant offline regardless of the host environment.
        .env_remove("OPENROUTER_API_KEY")
        .output()
        .unwrap_or_else(|err| panic!("failed to execute secdash binary: {err}"))
}

fn run_json<I, S>(dir: &Path, args: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_secdash(dir, args);
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "secdash command failed (status={}):\nstdout:\n{stdout}\nstderr:\n{stderr}",
            output.status
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    serde_json::from_str(&stdout)
        .unwrap_or_else(|err| panic!("stdout is not valid JSON: {err}\nstdout:\n{stdout}"))
}

fn run_text<I, S>(dir: &Path, args: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_secdash(dir, args);
    assert!(output.status.success(), "secdash command failed: {:?}", output.status);
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn as_u64(value: &Value, key: &str) -> u64 {
    value
        .get(key)
        .and_then(Value::as_u64)
        .unwrap_or_else(|| panic!("missing integer field `{key}` in payload: {value}"))
}

fn write_fixtures(data_dir: &Path) {
    fs::create_dir_all(data_dir)
        .unwrap_or_else(|err| panic!("failed to create data dir: {err}"));
    fs::write(
        data_dir.join("cyber_incidents.csv"),
        "incident_id,incident_type,severity,status,reported_at,resolved_at,assigned_to,description\n\
         INC-001,Phishing Email,High,Open,2025-01-06 09:15:00,,amir,Credential harvesting mail\n\
         INC-002,Malware,Critical,In Progress,2025-01-06 11:40:00,,lena,Endpoint beaconing\n\
         ,Malware,Low,Open,2025-01-07 08:00:00,,,row without a key\n\
         INC-001,Phishing Email,Low,Open,2025-01-07 09:00:00,,amir,duplicate inside file\n",
    )
    .unwrap_or_else(|err| panic!("failed to write incidents fixture: {err}"));
    fs::write(
        data_dir.join("it_tickets.csv"),
        "ticket_id,category,priority,status,opened_at,closed_at,assigned_to\n\
         TCK-100,Access,P2,Open,2025-01-03 10:00:00,,lena\n",
    )
    .unwrap_or_else(|err| panic!("failed to write tickets fixture: {err}"));
}

#[test]
fn load_reports_reconciliation_counts_and_is_idempotent() {
    let dir = TempDir::new().unwrap_or_else(|err| panic!("failed to create temp dir: {err}"));
    let data_dir = dir.path().join("DATA");
    write_fixtures(&data_dir);

    run_json(dir.path(), ["db", "init"]);

    let data_arg = data_dir.to_string_lossy().into_owned();
    let summary = run_json(dir.path(), ["load", "--data-dir", data_arg.as_str()]);
    // 2 valid incidents + 1 ticket; datasets file is absent.
    assert_eq!(as_u64(&summary, "total_inserted"), 3);
    assert_eq!(as_u64(&summary, "total_skipped"), 0);

    let incidents = summary["tables"][0].clone();
    assert_eq!(as_u64(&incidents, "inserted"), 2);
    assert_eq!(as_u64(&incidents, "dropped_missing_key"), 1);
    assert_eq!(as_u64(&incidents, "dropped_duplicate_key"), 1);

    let summary = run_json(dir.path(), ["load", "--data-dir", data_arg.as_str()]);
    assert_eq!(as_u64(&summary, "total_inserted"), 0);
    assert_eq!(as_u64(&summary, "total_skipped"), 3);
}

#[test]
fn first_occurrence_wins_for_in_file_duplicates() {
    let dir = TempDir::new().unwrap_or_else(|err| panic!("failed to create temp dir: {err}"));
    let data_dir = dir.path().join("DATA");
    write_fixtures(&data_dir);

    let data_arg = data_dir.to_string_lossy().into_owned();
    run_json(dir.path(), ["load", "--data-dir", data_arg.as_str()]);

    let incidents = run_json(dir.path(), ["incident", "list"]);
    let first = incidents
        .as_array()
        .and_then(|list| list.iter().find(|i| i["incident_id"] == "INC-001"))
        .unwrap_or_else(|| panic!("INC-001 missing from listing: {incidents}"));
    assert_eq!(first["severity"], "High");
}

#[test]
fn crud_round_trip_through_the_binary() {
    let dir = TempDir::new().unwrap_or_else(|err| panic!("failed to create temp dir: {err}"));

    let outcome = run_json(
        dir.path(),
        [
            "incident",
            "add",
            "--incident-id",
            "INC-900",
            "--severity",
            "High",
            "--assigned-to",
            "amir",
        ],
    );
    assert_eq!(outcome["ok"], true);

    let outcome = run_json(
        dir.path(),
        ["incident", "add", "--incident-id", "INC-900", "--severity", "Low"],
    );
    assert_eq!(outcome["ok"], false);

    let outcome = run_json(dir.path(), ["incident", "set-status", "INC-900", "Resolved"]);
    assert_eq!(outcome["ok"], true);

    let outcome = run_json(dir.path(), ["incident", "set-status", "INC-404", "Resolved"]);
    assert_eq!(outcome["ok"], false);

    let incidents = run_json(dir.path(), ["incident", "list"]);
    assert_eq!(incidents.as_array().map(Vec::len), Some(1));
    assert_eq!(incidents[0]["status"], "Resolved");

    let outcome = run_json(dir.path(), ["incident", "delete", "INC-900"]);
    assert_eq!(outcome["ok"], true);
    let incidents = run_json(dir.path(), ["incident", "list"]);
    assert_eq!(incidents.as_array().map(Vec::len), Some(0));
}

#[test]
fn single_table_load_supports_the_degraded_users_path() {
    let dir = TempDir::new().unwrap_or_else(|err| panic!("failed to create temp dir: {err}"));
    let data_dir = dir.path().join("DATA");
    fs::create_dir_all(&data_dir).unwrap_or_else(|err| panic!("failed to create data dir: {err}"));
    fs::write(
        data_dir.join("users.csv"),
        "username,password_hash,role\nadmin,YWJjMTIz,admin\n",
    )
    .unwrap_or_else(|err| panic!("failed to write users fixture: {err}"));

    let data_arg = data_dir.to_string_lossy().into_owned();
    let report = run_json(
        dir.path(),
        ["load", "--data-dir", data_arg.as_str(), "--only", "users"],
    );
    assert_eq!(report["unkeyed_append"], true);
    assert_eq!(as_u64(&report, "inserted"), 1);

    let user = run_json(dir.path(), ["user", "get", "admin"]);
    assert_eq!(user["role"], "admin");
}

#[test]
fn ask_is_deterministic_offline() {
    let dir = TempDir::new().unwrap_or_else(|err| panic!("failed to create temp dir: {err}"));

    let first = run_text(dir.path(), ["ask", "What should I prioritize?"]);
    let second = run_text(dir.path(), ["ask", "What should I prioritize?"]);
    assert_eq!(first, second);
    assert!(first.contains("Prioritisation advice:"));
    assert!(first.contains("OpenRouter model via the OpenRouter API."));

    let health = run_text(dir.path(), ["health"]);
    assert!(health.contains("OPENROUTER_API_KEY is not set"));
}
