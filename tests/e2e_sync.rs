mod common;

use common::{BdWorkspace, read_jsonl_values};
use predicates::prelude::*;
use serde_json::Value;

#[test]
fn sync_exports_sorted_jsonl() {
    let workspace = BdWorkspace::initialized();
    let a = workspace.create_issue("Alpha");
    let b = workspace.create_issue("Beta");

    workspace.bd(["sync"]).assert().success();

    let lines = read_jsonl_values(&workspace.jsonl_path());
    assert_eq!(lines.len(), 2);
    let mut ids: Vec<String> = lines
        .iter()
        .map(|v| v["id"].as_str().unwrap().to_string())
        .collect();
    let sorted = {
        let mut s = ids.clone();
        s.sort();
        s
    };
    assert_eq!(ids, sorted);
    ids.sort();
    let mut expected = vec![a, b];
    expected.sort();
    assert_eq!(ids, expected);
}

#[test]
fn clone_imports_archive_on_first_command() {
    let origin = BdWorkspace::initialized();
    origin.create_issue("Shared work");
    origin.bd(["sync"]).assert().success();

    // A "clone": fresh workspace with the same archive file.
    let clone = BdWorkspace::initialized();
    std::fs::copy(origin.jsonl_path(), clone.jsonl_path()).expect("copy archive");

    // The staleness oracle sees a fresh store and imports before listing.
    let output = clone.bd(["list", "--json"]).output().expect("list");
    assert!(output.status.success());
    let issues: Vec<Value> = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0]["title"], "Shared work");
}

#[test]
fn export_import_export_is_byte_stable() {
    let workspace = BdWorkspace::initialized();
    workspace.create_issue("Round");
    workspace.create_issue("Trip");

    workspace.bd(["sync"]).assert().success();
    let first = std::fs::read(workspace.jsonl_path()).expect("read");

    workspace.bd(["import"]).assert().success();
    workspace.bd(["export"]).assert().success();
    let second = std::fs::read(workspace.jsonl_path()).expect("read");

    assert_eq!(first, second);
}

#[test]
fn empty_db_guard_uses_policy_exit_code() {
    let workspace = BdWorkspace::initialized();
    // Archive with content, store with none.
    std::fs::write(
        workspace.jsonl_path(),
        "{\"id\":\"bd-1\",\"title\":\"Archived\",\"created_at\":\"2026-01-01T00:00:00Z\",\"updated_at\":\"2026-01-01T00:00:00Z\"}\n",
    )
    .expect("write archive");

    // --no-auto-import keeps the store empty so the guard trips.
    workspace
        .bd(["export", "--no-auto-import"])
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("refusing to export"));

    // The archive is untouched.
    let lines = read_jsonl_values(&workspace.jsonl_path());
    assert_eq!(lines.len(), 1);

    // --force overrides after inspection.
    workspace
        .bd(["export", "--force", "--no-auto-import"])
        .assert()
        .success();
}

#[test]
fn prefix_mismatch_fails_then_renames() {
    let workspace = BdWorkspace::initialized();
    let foreign = workspace.root.join("foreign.jsonl");
    std::fs::write(
        &foreign,
        "{\"id\":\"foo-3\",\"title\":\"References foo-3 here\",\"created_at\":\"2026-01-01T00:00:00Z\",\"updated_at\":\"2026-01-01T00:00:00Z\"}\n",
    )
    .expect("write foreign");

    workspace
        .bd(["import", foreign.to_str().unwrap()])
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("prefix_mismatch"));

    workspace
        .bd([
            "import",
            foreign.to_str().unwrap(),
            "--rename-on-import",
            "--json",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"foo-3\":\"bd-3\""));

    let output = workspace.bd(["show", "bd-3", "--json"]).output().expect("show");
    let payload: Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(payload["issue"]["title"], "References bd-3 here");
}

#[test]
fn tombstone_propagates_and_blocks_resurrection() {
    let workspace = BdWorkspace::initialized();
    let id = workspace.create_issue("Mortal");
    workspace.bd(["sync"]).assert().success();

    workspace.bd(["delete", id.as_str()]).assert().success();
    workspace.bd(["sync"]).assert().success();

    // The tombstone is in the archive.
    let lines = read_jsonl_values(&workspace.jsonl_path());
    assert_eq!(lines[0]["status"], "tombstone");

    // An older live version arriving by import does not resurrect it.
    let stale = workspace.root.join("stale.jsonl");
    std::fs::write(
        &stale,
        format!(
            "{{\"id\":\"{id}\",\"title\":\"Mortal\",\"created_at\":\"2026-01-01T00:00:00Z\",\"updated_at\":\"2026-01-01T00:00:00Z\"}}\n"
        ),
    )
    .expect("write stale");
    workspace
        .bd(["import", stale.to_str().unwrap()])
        .assert()
        .success();

    let output = workspace
        .bd(["list", "--include-tombstones", "--json"])
        .output()
        .expect("list");
    let issues: Vec<Value> = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0]["status"], "tombstone");
}

#[test]
fn orphan_policies_on_import() {
    let workspace = BdWorkspace::initialized();
    let orphan = workspace.root.join("orphan.jsonl");
    std::fs::write(
        &orphan,
        "{\"id\":\"bd-zz.1\",\"title\":\"Orphan child\",\"created_at\":\"2026-01-01T00:00:00Z\",\"updated_at\":\"2026-01-01T00:00:00Z\"}\n",
    )
    .expect("write orphan");

    // Default is strict: the batch aborts.
    workspace
        .bd(["import", orphan.to_str().unwrap()])
        .assert()
        .failure()
        .code(3);

    // Resurrect synthesizes a closed parent.
    workspace
        .bd(["import", orphan.to_str().unwrap(), "--orphans", "resurrect"])
        .assert()
        .success();

    let output = workspace.bd(["show", "bd-zz", "--json"]).output().expect("show");
    let payload: Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(payload["issue"]["status"], "closed");
    assert_eq!(payload["issue"]["priority"], 4);
    assert!(
        payload["issue"]["description"]
            .as_str()
            .unwrap()
            .starts_with("[RESURRECTED]")
    );
}

#[test]
fn wisps_are_skipped_on_import() {
    let workspace = BdWorkspace::initialized();
    let mixed = workspace.root.join("mixed.jsonl");
    std::fs::write(
        &mixed,
        "{\"id\":\"bd-1\",\"title\":\"Durable\",\"created_at\":\"2026-01-01T00:00:00Z\",\"updated_at\":\"2026-01-01T00:00:00Z\"}\n\
         {\"id\":\"bd-wisp-x1\",\"title\":\"Scratch\",\"created_at\":\"2026-01-01T00:00:00Z\",\"updated_at\":\"2026-01-01T00:00:00Z\"}\n",
    )
    .expect("write mixed");

    let output = workspace
        .bd(["import", mixed.to_str().unwrap(), "--json"])
        .output()
        .expect("import");
    assert!(output.status.success());
    let summary: Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(summary["created"], 1);
    assert_eq!(summary["skipped"], 1);

    workspace.bd(["sync"]).assert().success();
    let text = std::fs::read_to_string(workspace.jsonl_path()).expect("read");
    assert!(!text.contains("wisp"));
}

#[test]
fn info_reports_workspace_state() {
    let workspace = BdWorkspace::initialized();
    workspace.create_issue("Visible");

    let output = workspace.bd(["info", "--json"]).output().expect("info");
    assert!(output.status.success());
    let payload: Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(payload["mode"], "direct");
    assert_eq!(payload["issues"]["total"], 1);
}
