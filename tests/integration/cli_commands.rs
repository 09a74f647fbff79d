#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use tempfile::TempDir;

const TRIPLES: &str = "\
# subject predicate object
1 100 2
1 101 3

2 100 3
3 100 1
3 102 7
";

const QUERY: &str = r#"{
    "query": {
        "nodes": [
            { "subject": { "var": 0 }, "predicate": { "const": 100 }, "object": { "var": 1 } },
            { "subject": { "var": 1 }, "predicate": { "const": 100 }, "object": { "var": 2 } }
        ]
    },
    "projection": [0, 2]
}"#;

fn setup(name: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("tempdir");
    let input = dir.path().join("triples.txt");
    fs::write(&input, TRIPLES).expect("write triples");
    let db_path = dir.path().join(format!("{name}.db"));
    cargo_bin_cmd!("tristore")
        .arg("load")
        .arg(&db_path)
        .arg(&input)
        .assert()
        .success();
    (dir, db_path)
}

fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).expect("write file");
    path
}

#[test]
fn load_reports_triples_and_pages() {
    let dir = TempDir::new().expect("tempdir");
    let input = write_file(dir.path(), "triples.txt", TRIPLES);
    let output = cargo_bin_cmd!("tristore")
        .arg("load")
        .arg(dir.path().join("load.db"))
        .arg(&input)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let stdout = String::from_utf8_lossy(&output);
    assert!(stdout.starts_with("Loaded 5 triples into "), "{stdout}");
}

#[test]
fn stats_json_lists_every_order() {
    let (_dir, db_path) = setup("stats");
    let output = cargo_bin_cmd!("tristore")
        .args(["--format", "json", "stats"])
        .arg(&db_path)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["triples"], 5);
    let orders = json["orders"].as_array().expect("orders array");
    assert_eq!(orders.len(), 6);
    for order in orders {
        assert_eq!(order["facts"]["cardinality"], 5);
    }
    assert_eq!(json["fully_aggregated"].as_array().map(Vec::len), Some(3));
    assert!(json["predicate_sets"]["count"].as_u64().unwrap_or(0) >= 1);
}

#[test]
fn stats_text_has_sections() {
    let (_dir, db_path) = setup("stats-text");
    let output = cargo_bin_cmd!("tristore")
        .arg("stats")
        .arg(&db_path)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let stdout = String::from_utf8_lossy(&output);
    for section in ["Database: triples=5", "Facts:", "Aggregated:", "Fully aggregated:", "Predicate sets:"] {
        assert!(stdout.contains(section), "missing {section} in {stdout}");
    }
}

#[test]
fn plan_prints_tree_and_fingerprint() {
    let (dir, db_path) = setup("plan");
    let query = write_file(dir.path(), "query.json", QUERY);
    let text = cargo_bin_cmd!("tristore")
        .arg("plan")
        .arg(&db_path)
        .arg(&query)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8_lossy(&text);
    assert!(text.contains("Scan"), "{text}");
    assert!(text.lines().any(|l| l.starts_with("fingerprint=")), "{text}");

    let json = cargo_bin_cmd!("tristore")
        .args(["plan", "--format", "json"])
        .arg(&db_path)
        .arg(&query)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&json).expect("valid json");
    let fingerprint = json["fingerprint"].as_str().expect("fingerprint");
    assert_eq!(fingerprint.len(), 16);
    assert!(text.contains(fingerprint));
    assert_eq!(json["plan"]["inputs"].as_array().map(Vec::len), Some(2));
}

#[test]
fn plan_without_solution_exits_with_two() {
    let (dir, db_path) = setup("narrow");
    let query = write_file(dir.path(), "query.json", QUERY);
    let config = write_file(dir.path(), "narrow.toml", "[planner]\nmax_relations = 1\n");
    cargo_bin_cmd!("tristore")
        .arg("--config")
        .arg(&config)
        .arg("plan")
        .arg(&db_path)
        .arg(&query)
        .assert()
        .code(2);
}

#[test]
fn malformed_triples_name_the_line() {
    let dir = TempDir::new().expect("tempdir");
    let input = write_file(dir.path(), "bad.txt", "1 2 3\n4 5\n");
    let output = cargo_bin_cmd!("tristore")
        .arg("load")
        .arg(dir.path().join("bad.db"))
        .arg(&input)
        .assert()
        .failure()
        .get_output()
        .stderr
        .clone();
    let stderr = String::from_utf8_lossy(&output);
    assert!(stderr.contains("line 2"), "{stderr}");

    let input = write_file(dir.path(), "words.txt", "1 knows 3\n");
    cargo_bin_cmd!("tristore")
        .arg("load")
        .arg(dir.path().join("words.db"))
        .arg(&input)
        .assert()
        .failure();
}
