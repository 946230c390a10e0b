mod common;

use common::BdWorkspace;
use predicates::prelude::*;
use serde_json::Value;

#[test]
fn init_create_update_close() {
    let workspace = BdWorkspace::initialized();

    let id = workspace.create_issue("Fix the widget");
    assert!(id.starts_with("bd-"), "unexpected id: {id}");

    workspace
        .bd(["update", id.as_str(), "--status", "in_progress", "--priority", "1"])
        .assert()
        .success();

    let output = workspace
        .bd(["show", id.as_str(), "--json"])
        .output()
        .expect("show");
    assert!(output.status.success());
    let payload: Value = serde_json::from_slice(&output.stdout).expect("show json");
    assert_eq!(payload["issue"]["status"], "in_progress");
    assert_eq!(payload["issue"]["priority"], 1);

    workspace.bd(["close", id.as_str()]).assert().success();
    let output = workspace
        .bd(["show", id.as_str(), "--json"])
        .output()
        .expect("show");
    let payload: Value = serde_json::from_slice(&output.stdout).expect("show json");
    assert_eq!(payload["issue"]["status"], "closed");
    assert!(payload["issue"]["closed_at"].is_string());
}

#[test]
fn init_twice_fails_without_force() {
    let workspace = BdWorkspace::initialized();
    workspace.bd(["init"]).assert().failure();
    workspace.bd(["init", "--force"]).assert().success();
}

#[test]
fn unknown_id_is_an_error() {
    let workspace = BdWorkspace::initialized();
    workspace
        .bd(["show", "bd-nope"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn update_with_no_fields_is_invalid_input() {
    let workspace = BdWorkspace::initialized();
    let id = workspace.create_issue("A");
    workspace.bd(["update", id.as_str()]).assert().failure();
}

#[test]
fn delete_tombstones_by_default() {
    let workspace = BdWorkspace::initialized();
    let id = workspace.create_issue("Doomed");

    workspace
        .bd(["delete", id.as_str(), "--reason", "obsolete"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Tombstoned"));

    // Tombstones are hidden from list by default but visible when asked.
    let output = workspace.bd(["list", "--json"]).output().expect("list");
    let issues: Vec<Value> = serde_json::from_slice(&output.stdout).expect("list json");
    assert!(issues.is_empty());

    let output = workspace
        .bd(["list", "--include-tombstones", "--json"])
        .output()
        .expect("list");
    let issues: Vec<Value> = serde_json::from_slice(&output.stdout).expect("list json");
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0]["status"], "tombstone");
}

#[test]
fn partial_ids_resolve() {
    let workspace = BdWorkspace::initialized();
    let id = workspace.create_issue("Target");
    // Strip the prefix: "bd-abc" resolves from "abc".
    let suffix = id.strip_prefix("bd-").unwrap();
    workspace
        .bd(["show", suffix])
        .assert()
        .success()
        .stdout(predicate::str::contains("Target"));
}

#[test]
fn ready_and_blocked_reflect_dependencies() {
    let workspace = BdWorkspace::initialized();
    let a = workspace.create_issue("Needs work");
    let b = workspace.create_issue("Blocker");

    workspace
        .bd(["dep", "add", a.as_str(), b.as_str()])
        .assert()
        .success();

    let output = workspace.bd(["ready", "--json"]).output().expect("ready");
    let ready: Vec<Value> = serde_json::from_slice(&output.stdout).expect("ready json");
    let ready_ids: Vec<&str> = ready.iter().map(|i| i["id"].as_str().unwrap()).collect();
    assert!(ready_ids.contains(&b.as_str()));
    assert!(!ready_ids.contains(&a.as_str()));

    workspace
        .bd(["blocked", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains(a.as_str()));

    // Closing the blocker frees the dependent issue.
    workspace.bd(["close", b.as_str()]).assert().success();
    let output = workspace.bd(["ready", "--json"]).output().expect("ready");
    let ready: Vec<Value> = serde_json::from_slice(&output.stdout).expect("ready json");
    let ready_ids: Vec<&str> = ready.iter().map(|i| i["id"].as_str().unwrap()).collect();
    assert!(ready_ids.contains(&a.as_str()));
}

#[test]
fn dependency_cycles_are_refused() {
    let workspace = BdWorkspace::initialized();
    let a = workspace.create_issue("A");
    let b = workspace.create_issue("B");

    workspace.bd(["dep", "add", a.as_str(), b.as_str()]).assert().success();
    workspace
        .bd(["dep", "add", b.as_str(), a.as_str()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Cycle"));
}

#[test]
fn hierarchical_children_via_parent_flag() {
    let workspace = BdWorkspace::initialized();
    let epic = workspace.create_issue("Epic");

    let output = workspace
        .bd(["create", "First child", "--parent", epic.as_str()])
        .output()
        .expect("create child");
    assert!(output.status.success());
    let child = common::parse_created_id(&String::from_utf8_lossy(&output.stdout));
    assert_eq!(child, format!("{epic}.1"));

    let output = workspace
        .bd(["create", "Second child", "--parent", epic.as_str()])
        .output()
        .expect("create child");
    let child2 = common::parse_created_id(&String::from_utf8_lossy(&output.stdout));
    assert_eq!(child2, format!("{epic}.2"));

    let output = workspace
        .bd(["list", "--parent", epic.as_str(), "--json"])
        .output()
        .expect("list children");
    let children: Vec<Value> = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(children.len(), 2);
}

#[test]
fn labels_and_comments() {
    let workspace = BdWorkspace::initialized();
    let id = workspace.create_issue("Labeled");

    workspace
        .bd(["label", "add", id.as_str(), "urgent"])
        .assert()
        .success();
    workspace
        .bd(["comment", id.as_str(), "looking into it"])
        .assert()
        .success();

    let output = workspace.bd(["show", id.as_str(), "--json"]).output().expect("show");
    let payload: Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(payload["issue"]["labels"][0], "urgent");
    assert_eq!(payload["issue"]["comments"][0]["text"], "looking into it");
    assert_eq!(payload["issue"]["comments"][0]["author"], "e2e");

    let output = workspace
        .bd(["list", "--label", "urgent", "--json"])
        .output()
        .expect("list");
    let issues: Vec<Value> = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(issues.len(), 1);
}

#[test]
fn json_errors_carry_envelope() {
    let workspace = BdWorkspace::initialized();
    let output = workspace
        .bd(["show", "bd-missing", "--json"])
        .output()
        .expect("show");
    assert!(!output.status.success());
    let envelope: Value = serde_json::from_slice(&output.stderr).expect("envelope json");
    assert_eq!(envelope["ok"], false);
    assert_eq!(envelope["result"], "issue_not_found");
}
