// Stepper - Thread-plan execution engine
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use std::{fs, path::PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;
use tracing::info;

const PROGRAM: &str = r#"
[[functions]]
name = "main"
body = [
    { line = 10, op = "set", var = "foo", value = 10 },
    { line = 11, op = "call", function = "bar" },
    { line = 12, op = "nop" },
    { line = 13, op = "add", var = "foo", value = 1 },
    { line = 14, op = "ret" },
]

[[functions]]
name = "bar"
body = [
    { line = 20, op = "nop" },
    { line = 20, op = "nop" },
    { line = 21, op = "ret" },
]
"#;

fn write_program(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("program.toml");
    fs::write(&path, PROGRAM).unwrap();
    path
}

fn stepper() -> Command {
    Command::cargo_bin("stepper").unwrap()
}

#[test]
fn test_help_command() {
    stepper_common::logging::ensure_test_logging(None);
    info!("Testing CLI help command");

    stepper()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Run thread plans against a simulated inferior"));
}

#[test]
fn test_version_command() {
    stepper_common::logging::ensure_test_logging(None);
    info!("Running test");
    stepper().arg("--version").assert().success().stdout(predicate::str::contains("stepper"));
}

#[test]
fn test_missing_subcommand() {
    stepper_common::logging::ensure_test_logging(None);
    info!("Running test");
    stepper().assert().failure().stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_step_subcommand_help() {
    stepper_common::logging::ensure_test_logging(None);
    info!("Running test");
    stepper()
        .args(["step", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Run one step plan on a thread"));
}

#[test]
fn test_plans_lists_steps_library() {
    stepper_common::logging::ensure_test_logging(None);
    info!("Running test");
    stepper()
        .arg("plans")
        .assert()
        .success()
        .stdout(predicate::str::contains("Steps.StepOut"))
        .stdout(predicate::str::contains("Steps.StepUntil"));
}

#[test]
fn test_classify_mnemonics() {
    stepper_common::logging::ensure_test_logging(None);
    info!("Running test");
    stepper()
        .args(["classify", "--arch", "x86-64", "callq", "ret", "jne"])
        .assert()
        .success()
        .stdout(predicate::str::contains("callq\tcall"))
        .stdout(predicate::str::contains("ret\treturn"))
        .stdout(predicate::str::contains("jne\tcond-jump"));
}

#[test]
fn test_builtin_step_out() {
    stepper_common::logging::ensure_test_logging(None);
    info!("Running test");
    let dir = TempDir::new().unwrap();
    let program = write_program(&dir);

    stepper()
        .arg("step")
        .arg("--program")
        .arg(&program)
        .args(["--break", "bar", "--builtin", "out"])
        .assert()
        .success()
        .stdout(predicate::str::contains("stop reason = plan complete"))
        .stdout(predicate::str::contains("Stepping out from bar"))
        .stdout(predicate::str::contains("0x1009 main"));
}

#[test]
fn test_scripted_step_until_with_key_values() {
    stepper_common::logging::ensure_test_logging(None);
    info!("Running test");
    let dir = TempDir::new().unwrap();
    let program = write_program(&dir);

    stepper()
        .arg("step")
        .arg("--program")
        .arg(&program)
        .args(["--break", "bar", "-C", "Steps.StepOut"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Stepping out from bar"));

    stepper()
        .arg("step")
        .arg("--program")
        .arg(&program)
        .args(["--break-line", "11", "-C", "Steps.StepUntil", "-k", "variable_name", "-v", "foo"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Stepped until foo changed"));
}

#[test]
fn test_misspelled_plan_fails() {
    stepper_common::logging::ensure_test_logging(None);
    info!("Running test");
    let dir = TempDir::new().unwrap();
    let program = write_program(&dir);

    stepper()
        .arg("step")
        .arg("--program")
        .arg(&program)
        .args(["--break", "bar", "-C", "NoSuchModule.NoSuchPlan"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("NoSuchModule.NoSuchPlan"));
}

#[test]
fn test_unpaired_arguments_fail() {
    stepper_common::logging::ensure_test_logging(None);
    info!("Running test");
    let dir = TempDir::new().unwrap();
    let program = write_program(&dir);

    stepper()
        .arg("step")
        .arg("--program")
        .arg(&program)
        .args(["-C", "Steps.StepUntil", "-k", "variable_name"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("matching keys and values"));
}

#[test]
fn test_json_output_and_run_mode() {
    stepper_common::logging::ensure_test_logging(None);
    info!("Running test");
    let dir = TempDir::new().unwrap();
    let program = write_program(&dir);

    stepper()
        .arg("step")
        .arg("--program")
        .arg(&program)
        .args(["--break", "bar", "--run-mode", "all-threads", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"reason\": \"plan-complete\""))
        .stdout(predicate::str::contains("\"stop_others\": false"))
        .stdout(predicate::str::contains("\"run_mode_source\": \"explicit\""));
}

#[test]
fn test_reported_stop_others_is_printed() {
    stepper_common::logging::ensure_test_logging(None);
    info!("Running test");
    let dir = TempDir::new().unwrap();
    let program = write_program(&dir);

    stepper()
        .arg("step")
        .arg("--program")
        .arg(&program)
        .args(["--break", "bar", "-C", "Steps.StepReportsStopOthers", "-k", "token", "-v", "cli"])
        .assert()
        .success()
        .stdout(predicate::str::contains("recorded stop-others [cli]: true"));

    stepper()
        .arg("step")
        .arg("--program")
        .arg(&program)
        .args(["--break", "bar", "-C", "Steps.StepReportsStopOthers", "-k", "token", "-v", "cli"])
        .args(["--run-mode", "all-threads", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"stop_others_ledger\""))
        .stdout(predicate::str::contains("\"cli\": false"));
}

#[test]
fn test_settings_and_config_file() {
    stepper_common::logging::ensure_test_logging(None);
    info!("Running test");
    let dir = TempDir::new().unwrap();
    let program = write_program(&dir);
    let config = dir.path().join("stepper.toml");
    fs::write(&config, "max_stops = 100\n").unwrap();

    stepper()
        .arg("step")
        .arg("--program")
        .arg(&program)
        .arg("--config")
        .arg(&config)
        .args(["--break", "bar", "--set", "process.run-all-threads=true", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"run_mode_source\": \"setting\""));

    stepper()
        .arg("step")
        .arg("--program")
        .arg(&program)
        .args(["--set", "process.no-such-setting=1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown setting"));
}
