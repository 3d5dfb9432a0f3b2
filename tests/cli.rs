//! Integration tests for CLI commands
//!
//! Commands run with `--sim`, so every invocation starts from the demo
//! backend, and with `--config` pointing into a temp dir.

#![allow(deprecated)]
#![cfg(feature = "test-sim")]

use assert_cmd::{assert::OutputAssertExt, cargo::CommandCargoExt};
use predicates::prelude::*;
use std::process::Command;
use tempfile::TempDir;

fn lmdesk(tmp: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("lmdesk").unwrap();
    cmd.arg("--sim")
        .arg("--config")
        .arg(tmp.path().join("config.toml"))
        .env("NO_COLOR", "1")
        .env_remove("HF_TOKEN")
        .env_remove("LMDESK_GATEWAY_URL");
    cmd
}

#[test]
fn test_main_command_help() {
    let mut cmd = Command::cargo_bin("lmdesk").unwrap();
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("locally hosted LLM"))
        .stdout(predicate::str::contains("models"))
        .stdout(predicate::str::contains("ask"));
}

#[test]
fn test_version_flag() {
    let mut cmd = Command::cargo_bin("lmdesk").unwrap();
    cmd.arg("--version");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_chats_lists_demo_chat() {
    let tmp = TempDir::new().unwrap();
    lmdesk(&tmp)
        .arg("chats")
        .assert()
        .success()
        .stdout(predicate::str::contains("Getting started"));
}

#[test]
fn test_models_table_sorted_by_size() {
    let tmp = TempDir::new().unwrap();
    let output = lmdesk(&tmp)
        .args(["models", "--sort", "size"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let tiny = stdout.find("TinyLlama-1.1B-Chat").unwrap();
    let mistral = stdout.find("Mistral-7B-Instruct").unwrap();
    assert!(tiny < mistral, "smaller model should come first:\n{}", stdout);
    assert!(stdout.contains("4.7 GB"));
}

#[test]
fn test_models_rejects_unknown_sort_key() {
    let tmp = TempDir::new().unwrap();
    lmdesk(&tmp)
        .args(["models", "--sort", "colour"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown sort key"));
}

#[test]
fn test_ask_prints_reply() {
    let tmp = TempDir::new().unwrap();
    lmdesk(&tmp)
        .args(["ask", "what is rust"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[Mistral-7B-Instruct] what is rust"));
}

#[test]
fn test_ask_unknown_chat_fails() {
    let tmp = TempDir::new().unwrap();
    lmdesk(&tmp)
        .args(["ask", "--chat", "nope", "hello"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown chat"));
}

#[test]
fn test_select_is_remembered() {
    let tmp = TempDir::new().unwrap();
    lmdesk(&tmp)
        .args(["select", "TinyLlama-1.1B-Chat"])
        .assert()
        .success();

    let saved = std::fs::read_to_string(tmp.path().join("config.toml")).unwrap();
    assert!(saved.contains("preferred_model = \"TinyLlama-1.1B-Chat\""));

    lmdesk(&tmp)
        .args(["ask", "hi"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[TinyLlama-1.1B-Chat] hi"));
}

#[test]
fn test_select_requires_installed_model() {
    let tmp = TempDir::new().unwrap();
    lmdesk(&tmp)
        .args(["select", "Phi-2"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not installed"));
}

#[test]
fn test_install_then_status() {
    let tmp = TempDir::new().unwrap();
    lmdesk(&tmp)
        .args(["install", "Phi-2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Installed Phi-2"));

    lmdesk(&tmp).arg("status").assert().success();
}

#[test]
fn test_delete_unknown_chat_fails() {
    let tmp = TempDir::new().unwrap();
    lmdesk(&tmp)
        .args(["delete", "missing-id", "--yes"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown chat"));
}

#[test]
fn test_settings_set_clamps() {
    let tmp = TempDir::new().unwrap();
    lmdesk(&tmp)
        .args(["settings", "set", "--temperature", "5", "--max-tokens", "128"])
        .assert()
        .success()
        .stdout(predicate::str::contains("max_tokens"))
        .stdout(predicate::str::contains("128"))
        .stdout(predicate::str::contains("temperature"))
        .stdout(predicate::str::contains(": 2"));
}

#[test]
fn test_token_reloads_catalog() {
    let tmp = TempDir::new().unwrap();
    lmdesk(&tmp)
        .args(["token", "hf_demo"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Token saved"));
}

#[test]
fn test_clear_history() {
    let tmp = TempDir::new().unwrap();
    lmdesk(&tmp)
        .arg("clear-history")
        .assert()
        .success()
        .stderr(predicate::str::contains("Dialog history cleared"));
}
