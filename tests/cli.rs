//! Integration tests for the assetline binary

mod common;

use assert_cmd::Command;
use common::{create_test_config, create_test_config_in_subdir, write_file};
use predicates::prelude::*;
use std::fs;

const SHELL_CONFIG: &str = r#"
environments:
  source:
    root: site/source
    assets: site/source/assets
  development:
    root: site/development
    assets: site/development/assets
    variables:
      NODE_ENV: development
tasks:
  copy:
    plugin: copy
    development:
      files:
        - cwd: "<%= env.options.source.assets %>"
          src: ["fonts/**/*"]
          dest: "<%= env.options.development.assets %>"
  stamp:
    plugin: shell
    development:
      command: 'mkdir -p "<%= env.active.assets %>" && echo "$NODE_ENV" > "<%= env.active.assets %>/env.txt"'
  fail:
    plugin: shell
    now:
      command: "exit 3"
  lookup:
    plugin: shell
    broken:
      command: "echo <%= env.options.nowhere.assets %>"
  lint:
    plugin: jshint
    all: {}
sequences:
  development: [env:development, copy:development, stamp:development]
  failing: [env:development, fail:now, stamp:development]
"#;

fn assetline() -> Command {
    Command::cargo_bin("assetline").unwrap()
}

#[test]
fn test_run_sequence() {
    let (temp_dir, config_path) = create_test_config(SHELL_CONFIG);
    write_file(temp_dir.path(), "site/source/assets/fonts/icons.woff", "font");

    assetline()
        .arg("-f")
        .arg(&config_path)
        .args(["run", "development"])
        .assert()
        .success();

    let root = temp_dir.path();
    assert!(root.join("site/development/assets/fonts/icons.woff").is_file());
    let env = fs::read_to_string(root.join("site/development/assets/env.txt")).unwrap();
    assert_eq!(env.trim(), "development");
}

#[test]
fn test_run_discovers_config_from_subdirectory() {
    let (temp_dir, _config_path, sub_dir) = create_test_config_in_subdir(SHELL_CONFIG);
    write_file(temp_dir.path(), "site/source/assets/fonts/icons.woff", "font");

    assetline()
        .current_dir(&sub_dir)
        .args(["run", "development"])
        .assert()
        .success();

    assert!(temp_dir
        .path()
        .join("site/development/assets/fonts/icons.woff")
        .is_file());
}

#[test]
fn test_failing_step_is_named_and_stops_the_run() {
    let (temp_dir, config_path) = create_test_config(SHELL_CONFIG);

    assetline()
        .arg("-f")
        .arg(&config_path)
        .args(["run", "failing"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("fail:now"));

    assert!(!temp_dir.path().join("site/development/assets/env.txt").exists());
}

#[test]
fn test_unknown_task_exit_code() {
    let (_temp_dir, config_path) = create_test_config(SHELL_CONFIG);

    assetline()
        .arg("-f")
        .arg(&config_path)
        .args(["run", "copy:staging"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("copy:staging"));
}

#[test]
fn test_unknown_plugin_exit_code() {
    let (_temp_dir, config_path) = create_test_config(SHELL_CONFIG);

    assetline()
        .arg("-f")
        .arg(&config_path)
        .args(["run", "lint"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("jshint"));
}

#[test]
fn test_unknown_lookup_exit_code() {
    let (_temp_dir, config_path) = create_test_config(SHELL_CONFIG);

    assetline()
        .arg("-f")
        .arg(&config_path)
        .args(["run", "lookup:broken"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("env.options.nowhere.assets"));
}

#[test]
fn test_cyclic_reference_exit_code() {
    let (_temp_dir, config_path) = create_test_config(
        r#"
vars:
  a: "<%= b %>"
  b: "<%= a %>"
tasks:
  echo:
    plugin: shell
    loop:
      command: "echo <%= a %>"
"#,
    );

    assetline()
        .arg("-f")
        .arg(&config_path)
        .args(["run", "echo:loop"])
        .assert()
        .code(5)
        .stderr(predicate::str::contains("Cyclic reference"));
}

#[test]
fn test_invalid_config_exit_code() {
    let (_temp_dir, config_path) = create_test_config(
        r#"
tasks:
  env:
    plugin: shell
"#,
    );

    assetline()
        .arg("-f")
        .arg(&config_path)
        .arg("list")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("reserved"));
}

#[test]
fn test_dry_run_prints_resolved_options() {
    let (temp_dir, config_path) = create_test_config(SHELL_CONFIG);

    assetline()
        .arg("-f")
        .arg(&config_path)
        .args(["run", "development", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("copy:development"))
        .stdout(predicate::str::contains("dest: site/development/assets"))
        .stdout(predicate::str::contains("<%=").not());

    assert!(!temp_dir.path().join("site/development").exists());
}

#[test]
fn test_list() {
    let (_temp_dir, config_path) = create_test_config(SHELL_CONFIG);

    assetline()
        .arg("-f")
        .arg(&config_path)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("development"))
        .stdout(predicate::str::contains("stamp"))
        .stdout(predicate::str::contains("jshint"));
}

#[test]
fn test_completions() {
    assetline()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("assetline"));
}

#[test]
fn test_missing_config_file() {
    let temp_dir = tempfile::TempDir::new().unwrap();

    assetline()
        .arg("-f")
        .arg(temp_dir.path().join("assetline.yml"))
        .arg("list")
        .assert()
        .code(2);
}

#[test]
fn test_usage_error_exit_code() {
    assetline()
        .args(["run"])
        .assert()
        .code(64)
        .stderr(predicate::str::contains("SEQUENCE"));

    assetline().arg("deploy").assert().code(64);
}

#[test]
fn test_help_exits_successfully() {
    assetline()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("watch"));
}
