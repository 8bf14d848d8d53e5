//! Binary-level tests for the queue-provisioner command

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

fn command() -> Command {
    let mut cmd = Command::cargo_bin("queue-provisioner").unwrap();
    cmd.env_remove("QUEUE_PROVISIONER_CONFIG");
    cmd
}

fn config_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

/// Verify that help lists every command
#[test]
fn test_help_lists_commands() {
    command()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("send"))
        .stdout(predicate::str::contains("receive"))
        .stdout(predicate::str::contains("config"));
}

/// Verify that in-memory sends succeed and print one line per message
#[test]
fn test_in_memory_send() {
    command()
        .args(["--in-memory", "send", "--queue", "orders", "--body", "hi", "--count", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Sent message").count(2));
}

/// Verify that an empty in-memory queue is reported
#[test]
fn test_in_memory_receive_empty() {
    command()
        .args(["--in-memory", "receive", "--queue", "orders"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No messages"));
}

/// Verify that the resolved configuration is printed
#[test]
fn test_config_command_prints_yaml() {
    let file = config_file("region: eu-north-1\n");

    command()
        .arg("--config")
        .arg(file.path())
        .args(["config", "--format", "yaml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("region: eu-north-1"))
        .stdout(predicate::str::contains("max_batch_size: 10"));
}

/// Verify that the config file can come from the environment
#[test]
fn test_config_path_from_environment() {
    let file = config_file("region: ap-south-1\n");

    command()
        .env("QUEUE_PROVISIONER_CONFIG", file.path())
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("region: ap-south-1"));
}

/// Verify that a missing config file exits with the configuration code
#[test]
fn test_missing_config_file_exit_code() {
    command()
        .args(["--config", "/definitely/not/here.yaml", "config"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Configuration file not found"));
}

/// Verify that an invalid queue name exits with the argument code
#[test]
fn test_invalid_queue_name_exit_code() {
    command()
        .args(["--in-memory", "send", "--queue", "no spaces", "--body", "x"])
        .assert()
        .code(4);
}

/// Verify that invalid buffer settings are rejected before any client is built
#[test]
fn test_invalid_buffer_config_exit_code() {
    let file = config_file("buffer:\n  max_batch_size: 50\n");

    command()
        .arg("--in-memory")
        .arg("--config")
        .arg(file.path())
        .args(["send", "--queue", "orders", "--body", "x"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("buffer.max_batch_size"));
}
