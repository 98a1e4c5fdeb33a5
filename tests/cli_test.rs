//! End-to-end tests for the `gettokens` binary

mod common;

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;
use wiremock::MockServer;

fn gettokens(config_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("gettokens").unwrap();
    cmd.arg("--config")
        .arg(config_dir.path().join("config.yaml"))
        .env_remove("RUST_LOG")
        .env_remove("GETTOKENS_CLIENT_NAME")
        .env_remove("GETTOKENS_REDIRECT_URI")
        .env_remove("GETTOKENS_SCOPES")
        .env_remove("GETTOKENS_TIMEOUT_SECONDS")
        .env_remove("GETTOKENS_REFRESH_LEEWAY_SECONDS")
        .env_remove("GETTOKENS_INITIAL_ACCESS_TOKEN");
    cmd
}

#[test]
fn test_help_lists_commands() {
    Command::cargo_bin("gettokens")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("discover"))
        .stdout(predicate::str::contains("register"))
        .stdout(predicate::str::contains("login"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("config.yaml"),
        "client:\n  response_type: token\n",
    )
    .unwrap();

    gettokens(&dir)
        .args(["discover", "https://op.example"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("response_type"));
}

#[test]
fn test_zero_timeout_is_rejected() {
    let dir = TempDir::new().unwrap();
    gettokens(&dir)
        .args(["--timeout", "0", "discover", "https://op.example"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("timeout_seconds"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_discover_prints_provider_document() {
    let server = MockServer::start().await;
    common::mount_discovery(&server).await;
    let dir = TempDir::new().unwrap();
    let issuer = server.uri();

    let assert = tokio::task::spawn_blocking(move || {
        gettokens(&dir).args(["discover", &issuer]).assert()
    })
    .await
    .unwrap();

    let output = assert.success().get_output().stdout.clone();
    let document: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(document["issuer"], server.uri());
    assert_eq!(document["token_endpoint"], format!("{}/token", server.uri()));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_register_prints_client_information() {
    let server = MockServer::start().await;
    common::mount_discovery(&server).await;
    common::mount_registration(&server).await;
    let dir = TempDir::new().unwrap();
    let issuer = server.uri();

    let assert = tokio::task::spawn_blocking(move || {
        gettokens(&dir)
            .args(["register", &issuer, "--client-name", "cli-test"])
            .assert()
    })
    .await
    .unwrap();

    assert
        .success()
        .stdout(predicate::str::contains(common::CLIENT_ID));
    let requests = server.received_requests().await.unwrap();
    let registration = requests
        .iter()
        .find(|r| r.url.path() == "/register")
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&registration.body).unwrap();
    assert_eq!(body["client_name"], "cli-test");
}
