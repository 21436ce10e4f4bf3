//! Command-line surface of the `orchid` binary.

use assert_cmd::Command;
use predicates::prelude::*;

fn orchid() -> Command {
    let mut cmd = Command::cargo_bin("orchid").unwrap();
    cmd.env_remove("ORCHID_BASE_URL")
        .env_remove("ORCHID_EMAIL")
        .env_remove("ORCHID_USERNAME")
        .env_remove("ORCHID_TOKEN")
        .timeout(std::time::Duration::from_secs(10));
    cmd
}

#[test]
fn help_lists_subcommands() {
    orchid()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("conversations"))
        .stdout(predicate::str::contains("open"))
        .stdout(predicate::str::contains("send"));
}

#[test]
fn empty_message_is_rejected_before_any_request() {
    orchid()
        .args(["send", "bob@x.com", "   "])
        .env("ORCHID_BASE_URL", "http://127.0.0.1:9")
        .env("ORCHID_EMAIL", "a@x.com")
        .assert()
        .failure()
        .stderr(predicate::str::contains("message body is empty"));
}

#[test]
fn login_requires_email() {
    orchid()
        .args(["login", "--server", "board.example"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--email <EMAIL>"));
}

#[test]
fn open_requires_a_target() {
    orchid()
        .arg("open")
        .assert()
        .failure()
        .stderr(predicate::str::contains("<WHO>"));
}
