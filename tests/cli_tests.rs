//! Integration tests for the koji-sync CLI binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn koji_sync_cmd() -> Command {
    Command::cargo_bin("koji-sync").unwrap()
}

fn data_dir(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (name, content) in files {
        fs::write(dir.path().join(name), content).unwrap();
    }
    dir
}

#[test]
fn test_no_args_fails_with_usage() {
    koji_sync_cmd().assert().failure();
}

#[test]
fn test_help_flag() {
    koji_sync_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("koji-sync"));
}

#[test]
fn test_dump_parses_and_prints_records() {
    let dir = data_dir(&[("tags.yaml", "type: tag\nname: f40-build\n")]);
    koji_sync_cmd()
        .arg("dump")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("tag f40-build"));
}

#[test]
fn test_expand_prints_yaml_documents() {
    let dir = data_dir(&[("tags.yaml", "type: tag\nname: f40-build\n")]);
    koji_sync_cmd()
        .arg("expand")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("name: f40-build"));
}

#[test]
fn test_compare_against_mock_profile_reports_summary() {
    let dir = data_dir(&[("tags.yaml", "type: tag\nname: f40-build\n")]);
    koji_sync_cmd()
        .arg("compare")
        .arg(dir.path())
        .arg("--profile")
        .arg("mock")
        .assert()
        .success()
        .stdout(predicate::str::contains("Summary:"));
}

#[test]
fn test_sync_against_mock_profile_applies_changes() {
    let dir = data_dir(&[("tags.yaml", "type: tag\nname: f40-build\n")]);
    koji_sync_cmd()
        .arg("sync")
        .arg(dir.path())
        .arg("--profile")
        .arg("mock")
        .assert()
        .code(0)
        .stdout(predicate::str::contains("Summary:"));
}

#[test]
fn test_fetch_unknown_object_reports_not_found() {
    koji_sync_cmd()
        .arg("fetch")
        .arg("tag")
        .arg("does-not-exist")
        .arg("--profile")
        .arg("mock")
        .assert()
        .success()
        .stdout(predicate::str::contains("not found"));
}

#[test]
fn test_template_list_shows_defined_templates() {
    let dir = data_dir(&[(
        "templates.yaml",
        "type: template\nname: make-tag\ntemplate: |\n  type: tag\n  name: ${n}-build\n",
    )]);
    koji_sync_cmd()
        .arg("template")
        .arg("list")
        .arg("--templates")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("make-tag"));
}

#[test]
fn test_invalid_data_path_surfaces_loader_error() {
    koji_sync_cmd()
        .arg("dump")
        .arg("/no/such/path/at/all")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error:"));
}
