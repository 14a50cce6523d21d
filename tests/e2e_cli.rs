//! CLI end-to-end tests
//!
//! Tests for the convforge command-line interface.

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

/// Get a command for the convforge binary
#[allow(deprecated)]
fn convforge_cmd() -> Command {
    Command::cargo_bin("convforge").unwrap()
}

const PACKAGE: &str = r#"{
    "segments": ["urn:uuid:3f1c8a52-9b1e-4c55-a0f2-7d7c2b5e9a10"],
    "dynamic": { "title": "Feature" }
}"#;

fn write_inputs(dir: &Path, pipeline: &str) {
    fs::write(dir.join("pipeline.toml"), pipeline).unwrap();
    fs::write(dir.join("package.json"), PACKAGE).unwrap();
    fs::write(
        dir.join("convforge.toml"),
        "[probe]\nenabled = false\n",
    )
    .unwrap();
}

#[test]
fn test_cli_no_args_shows_help() {
    let mut cmd = convforge_cmd();
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_help_flag() {
    let mut cmd = convforge_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("convforge"))
        .stdout(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_version_command() {
    let mut cmd = convforge_cmd();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_cli_convert_help() {
    let mut cmd = convforge_cmd();
    cmd.args(["convert", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--package"))
        .stdout(predicate::str::contains("--dry-run"));
}

#[test]
fn test_cli_check_tools_command() {
    let mut cmd = convforge_cmd();
    cmd.arg("check-tools").assert().success().stdout(
        predicate::str::contains("ffmpeg").and(predicate::str::contains("ffprobe")),
    );
}

#[test]
fn test_cli_validate_valid_pipeline() {
    let temp = tempdir().unwrap();
    write_inputs(
        temp.path(),
        r#"
name = "demo"

[[operations]]
kind = "exec-each-segment"

[[operations.operations]]
kind = "exec-once"
name = "mark"
template = "touch segment-%{segm.index}"
"#,
    );

    let mut cmd = convforge_cmd();
    cmd.arg("validate")
        .arg(temp.path().join("pipeline.toml"))
        .assert()
        .success()
        .stdout(predicate::str::contains("demo"))
        .stdout(predicate::str::contains("exec-each-segment"));
}

#[test]
fn test_cli_validate_rejects_unknown_kind() {
    let temp = tempdir().unwrap();
    write_inputs(
        temp.path(),
        r#"
[[operations]]
kind = "teleport"
"#,
    );

    let mut cmd = convforge_cmd();
    cmd.arg("validate")
        .arg(temp.path().join("pipeline.toml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized operation kind"));
}

#[test]
fn test_cli_validate_missing_file() {
    let mut cmd = convforge_cmd();
    cmd.args(["validate", "/nonexistent/pipeline.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read pipeline file"));
}

#[test]
fn test_cli_convert_bad_param() {
    let temp = tempdir().unwrap();
    write_inputs(temp.path(), "");

    let mut cmd = convforge_cmd();
    cmd.arg("convert")
        .arg(temp.path().join("pipeline.toml"))
        .arg("--package")
        .arg(temp.path().join("package.json"))
        .args(["--param", "novalue"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("KEY=VALUE"));
}

#[cfg(unix)]
#[test]
fn test_cli_convert_runs_pipeline() {
    let temp = tempdir().unwrap();
    let work = temp.path().join("work");
    write_inputs(
        temp.path(),
        r#"
[[operations]]
kind = "exec-once"
name = "title"
template = "printf %{dynamic.title}"
output = "title.txt"
"#,
    );

    let mut cmd = convforge_cmd();
    cmd.arg("-c")
        .arg(temp.path().join("convforge.toml"))
        .arg("convert")
        .arg(temp.path().join("pipeline.toml"))
        .arg("--package")
        .arg(temp.path().join("package.json"))
        .arg("--working-dir")
        .arg(&work)
        .args(["--param", "title=Override"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Conversion complete"));

    assert_eq!(fs::read_to_string(work.join("title.txt")).unwrap(), "Override");
    assert!(work.join("logs").join("0001-printf.log").exists());
}

#[cfg(unix)]
#[test]
fn test_cli_convert_failure_exit_code() {
    let temp = tempdir().unwrap();
    write_inputs(
        temp.path(),
        r#"
[[operations]]
kind = "exec-once"
name = "explode"
template = "sh -c \"exit 2\""
"#,
    );

    let mut cmd = convforge_cmd();
    cmd.arg("-c")
        .arg(temp.path().join("convforge.toml"))
        .arg("convert")
        .arg(temp.path().join("pipeline.toml"))
        .arg("--package")
        .arg(temp.path().join("package.json"))
        .arg("--working-dir")
        .arg(temp.path().join("work"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("explode"));
}

#[test]
fn test_cli_convert_dry_run_starts_nothing() {
    let temp = tempdir().unwrap();
    let work = temp.path().join("work");
    write_inputs(
        temp.path(),
        r#"
[[operations]]
kind = "exec-once"
name = "never"
template = "nonexistent_tool_12345 --go"
output = "never.txt"
"#,
    );

    let mut cmd = convforge_cmd();
    cmd.arg("-c")
        .arg(temp.path().join("convforge.toml"))
        .arg("convert")
        .arg(temp.path().join("pipeline.toml"))
        .arg("--package")
        .arg(temp.path().join("package.json"))
        .arg("--working-dir")
        .arg(&work)
        .arg("--dry-run")
        .assert()
        .success()
        .stdout(predicate::str::contains("DRY RUN"));

    assert!(!work.join("never.txt").exists());
}
