//! CLI tests for `taskloop run`, `validate` and `init-config`.
//!
//! Spawns the binary in a temp dir and checks exit codes for completed,
//! failed, exhausted and invalid runs.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use taskloop::exit_codes;
use taskloop::io::config::{DEFAULT_CONFIG_FILE, EngineConfig, load_config};
use taskloop::test_support::temp_scenario;

fn bundled(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("scenarios")
        .join(name)
}

fn taskloop(dir: &Path) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_taskloop"));
    command.current_dir(dir);
    command
}

#[test]
fn run_completed_scenario_exits_ok_and_writes_log() {
    let temp = tempfile::tempdir().expect("tempdir");
    let log_dir = temp.path().join("run-log");

    let status = taskloop(temp.path())
        .args(["run", "--seed", "1", "--log-dir"])
        .arg(&log_dir)
        .arg(bundled("door.toml"))
        .status()
        .expect("taskloop run");

    assert_eq!(status.code(), Some(exit_codes::OK));
    assert!(log_dir.join("summary.json").exists());
    assert!(log_dir.join("ticks.jsonl").exists());
}

#[test]
fn run_failed_scenario_exits_with_failed_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    let status = taskloop(temp.path())
        .args(["run", "--seed", "1"])
        .arg(bundled("stuck_gate.toml"))
        .status()
        .expect("taskloop run");
    assert_eq!(status.code(), Some(exit_codes::FAILED));
}

#[test]
fn run_out_of_ticks_exits_with_exhausted_code() {
    let (dir, path) = temp_scenario(
        r#"
[scenario]
name = "long wait"

[task]
type = "wait"
ticks = 100
"#,
    );
    let status = taskloop(dir.path())
        .args(["run", "--seed", "1", "--max-ticks", "5"])
        .arg(&path)
        .status()
        .expect("taskloop run");
    assert_eq!(status.code(), Some(exit_codes::EXHAUSTED));
}

#[test]
fn invalid_scenario_exits_with_invalid_code() {
    let (dir, path) = temp_scenario(
        r#"
[scenario]
name = "broken"

[task]
type = "teleport"
"#,
    );
    let output = taskloop(dir.path())
        .args(["validate"])
        .arg(&path)
        .output()
        .expect("taskloop validate");
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("schema validation failed"), "{stderr}");
}

#[test]
fn validate_bundled_scenario_exits_ok() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = taskloop(temp.path())
        .arg("validate")
        .arg(bundled("woodcutting.toml"))
        .output()
        .expect("taskloop validate");
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("woodcutting: ok"));
}

#[test]
fn init_config_refuses_to_overwrite_without_force() {
    let temp = tempfile::tempdir().expect("tempdir");
    let status = taskloop(temp.path())
        .arg("init-config")
        .status()
        .expect("init-config");
    assert_eq!(status.code(), Some(exit_codes::OK));
    let path = temp.path().join(DEFAULT_CONFIG_FILE);
    assert_eq!(load_config(&path).expect("load"), EngineConfig::default());

    fs::write(&path, "max_ticks = 77\n").expect("edit config");
    let status = taskloop(temp.path())
        .arg("init-config")
        .status()
        .expect("init-config again");
    assert_eq!(status.code(), Some(exit_codes::INVALID));
    assert_eq!(load_config(&path).expect("load").max_ticks, 77);

    let status = taskloop(temp.path())
        .args(["init-config", "--force"])
        .status()
        .expect("init-config --force");
    assert_eq!(status.code(), Some(exit_codes::OK));
    assert_eq!(load_config(&path).expect("load").max_ticks, 10_000);
}
