use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

/// Two corpora: one equal pair, one changed pair, one orphan, one malformed pair
fn corpora() -> (TempDir, TempDir) {
    let a = TempDir::new().unwrap();
    let b = TempDir::new().unwrap();

    write(a.path(), "equal.json", r#"{"Id":1,"Tags":["x","y"]}"#);
    write(b.path(), "equal.json", r#"{"Tags":["x","y"],"Id":1}"#);

    write(a.path(), "orders/changed.json", r#"{"Status":"Processing","UpdatedAt":"2024-01-01T00:00:00Z"}"#);
    write(b.path(), "orders/changed.json", r#"{"Status":"Shipped","UpdatedAt":"2024-02-01T00:00:00Z"}"#);

    write(a.path(), "only-a.json", "{}");

    write(a.path(), "broken.json", r#"{"ok":true}"#);
    write(b.path(), "broken.json", r#"{"ok": tru"#);

    (a, b)
}

fn run_json(args: &[&str]) -> (Value, i32) {
    let mut cmd = assert_cmd::cargo_bin_cmd!("divergent");
    cmd.args(args).arg("--json").arg("--quiet");
    let output = cmd.output().unwrap();
    let json: Value = serde_json::from_slice(&output.stdout).expect("Output should be valid JSON");
    (json, output.status.code().unwrap_or(-1))
}

fn result<'a>(json: &'a Value, id: &str) -> &'a Value {
    json["results"]
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["id"] == id)
        .unwrap_or_else(|| panic!("no record for {}", id))
}

#[test]
fn test_every_discovered_name_yields_one_record() {
    let (a, b) = corpora();
    let (json, code) = run_json(&["files", a.path().to_str().unwrap(), b.path().to_str().unwrap()]);

    assert_eq!(code, 1);
    let summary = &json["summary"];
    assert_eq!(summary["total"], 4);
    assert_eq!(summary["equal"], 1);
    assert_eq!(summary["different"], 1);
    assert_eq!(summary["errors"], 2);

    assert_eq!(result(&json, "only-a.json")["payload"]["error"]["kind"], "read");
    assert_eq!(result(&json, "broken.json")["payload"]["error"]["kind"], "decode");

    let changed = &result(&json, "orders/changed.json")["payload"]["result"];
    let paths: Vec<&str> = changed["differences"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["property_path"].as_str().unwrap())
        .collect();
    assert_eq!(paths, vec!["Status", "UpdatedAt"]);
}

#[test]
fn test_results_are_sorted_by_id() {
    let (a, b) = corpora();
    let (json, _) = run_json(&["files", a.path().to_str().unwrap(), b.path().to_str().unwrap()]);

    let ids: Vec<&str> = json["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_str().unwrap())
        .collect();
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);
}

#[test]
fn test_ignore_flags_suppress_noise() {
    let (a, b) = corpora();
    let (json, code) = run_json(&[
        "files",
        a.path().to_str().unwrap(),
        b.path().to_str().unwrap(),
        "--include",
        "orders/*",
        "--ignore",
        "Status",
        "--smart-ignore",
        "At$",
    ]);

    assert_eq!(code, 0);
    assert_eq!(json["summary"]["total"], 1);
    assert_eq!(json["summary"]["equal"], 1);
}

#[test]
fn test_config_file_rules_apply() {
    let (a, b) = corpora();
    let config_dir = TempDir::new().unwrap();
    let config = config_dir.path().join("config.toml");
    fs::write(
        &config,
        r#"
[engine]
max_differences = 1

[[rules.ignore]]
path = "UpdatedAt"
"#,
    )
    .unwrap();

    let (json, _) = run_json(&[
        "files",
        a.path().to_str().unwrap(),
        b.path().to_str().unwrap(),
        "--config",
        config.to_str().unwrap(),
        "--include",
        "orders/*",
    ]);

    let changed = &result(&json, "orders/changed.json")["payload"]["result"];
    assert_eq!(changed["differences"].as_array().unwrap().len(), 1);
    assert_eq!(changed["differences"][0]["property_path"], "Status");
}

#[test]
fn test_equal_corpora_exit_zero_with_human_output() {
    let a = TempDir::new().unwrap();
    let b = TempDir::new().unwrap();
    write(a.path(), "one.json", r#"{"Items":[1,2,3]}"#);
    write(b.path(), "one.json", r#"{"Items":[3,1,2]}"#);

    let mut cmd = assert_cmd::cargo_bin_cmd!("divergent");
    cmd.args(["files", a.path().to_str().unwrap(), b.path().to_str().unwrap(), "--ignore-order", "-q"]);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("All 1 units are equal."))
        .stdout(predicate::str::contains("Batch Summary:"));
}

#[test]
fn test_report_written_to_output_file() {
    let (a, b) = corpora();
    let out_dir = TempDir::new().unwrap();
    let out = out_dir.path().join("report.json");

    let mut cmd = assert_cmd::cargo_bin_cmd!("divergent");
    cmd.args([
        "files",
        a.path().to_str().unwrap(),
        b.path().to_str().unwrap(),
        "--json",
        "--quiet",
        "--output",
        out.to_str().unwrap(),
    ]);
    cmd.assert().code(1).stdout(predicate::str::is_empty());

    let json: Value = serde_json::from_str(&fs::read_to_string(out).unwrap()).unwrap();
    assert!(json.get("batch_id").is_some());
    assert_eq!(json["summary"]["total"], 4);
}

#[test]
fn test_missing_directory_is_rejected() {
    let a = TempDir::new().unwrap();
    let mut cmd = assert_cmd::cargo_bin_cmd!("divergent");
    cmd.args(["files", a.path().to_str().unwrap(), "/definitely/not/here"]);

    cmd.assert()
        .code(2)
        .stderr(predicate::str::contains("Path does not exist"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let a = TempDir::new().unwrap();
    let config = a.path().join("bad.toml");
    fs::write(&config, "[engine]\nmax_depth = 0\n").unwrap();

    let mut cmd = assert_cmd::cargo_bin_cmd!("divergent");
    cmd.args([
        "files",
        a.path().to_str().unwrap(),
        a.path().to_str().unwrap(),
        "--config",
        config.to_str().unwrap(),
    ]);

    cmd.assert()
        .code(2)
        .stderr(predicate::str::contains("max_depth"));
}
