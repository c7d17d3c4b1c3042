mod common;

use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use common::events_file;
use predicates::prelude::*;
use std::process::Command;

#[test]
fn test_cli_end_to_end() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::new(cargo_bin!("topup-ledger"));
    cmd.arg("tests/fixtures/events.csv");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains(
            "account,balance,total_spent,total_deposit,monthly_spent,monthly_earned",
        ))
        // o4 was swept back after the timeout
        .stdout(predicate::str::contains("u1,440,60,500,60,0"))
        // o2 refunded, o3 over balance
        .stdout(predicate::str::contains("u2,100,0,0,0,0"));

    Ok(())
}

#[test]
fn test_cli_disabled_auto_refund_keeps_money_in_flight() {
    let events = events_file(&[
        "2026-10-01T09:00:00Z,open,u1,,,,",
        "2026-10-01T09:00:00Z,adjust,u1,,100,add,",
        "2026-10-01T09:00:00Z,purchase,u1,o1,60,uid:12345678,",
        "2026-10-01T10:00:00Z,sweep,,,,,",
    ]);

    let mut cmd = Command::new(cargo_bin!("topup-ledger"));
    cmd.arg(events.path()).arg("--no-auto-refund");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("u1,40,0,0,0,0"));
}

#[test]
fn test_cli_short_timeout_from_flag() {
    let events = events_file(&[
        "2026-10-01T09:00:00Z,open,u1,,,,",
        "2026-10-01T09:00:00Z,adjust,u1,,100,add,",
        "2026-10-01T09:00:00Z,purchase,u1,o1,60,uid:12345678,",
        "2026-10-01T09:06:00Z,sweep,,,,,",
    ]);

    let mut cmd = Command::new(cargo_bin!("topup-ledger"));
    cmd.arg(events.path()).arg("--auto-refund-minutes").arg("5");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("u1,100,0,0,0,0"));
}

#[test]
fn test_cli_reports_rejected_rows_and_continues() {
    let events = events_file(&[
        "2026-10-01T09:00:00Z,open,u1,,,,",
        "2026-10-01T09:00:00Z,refund,u1,,,,",
        "2026-10-01T09:00:00Z,purchase,u1,o1,60,uid:12345678,",
        "2026-10-01T09:01:00Z,adjust,u1,,25,add,",
    ]);

    let mut cmd = Command::new(cargo_bin!("topup-ledger"));
    cmd.arg(events.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("u1,25,0,0,0,0"))
        .stderr(predicate::str::contains("unreadable event"))
        .stderr(predicate::str::contains("rejected=2"));
}

#[test]
fn test_cli_missing_input_fails() {
    let mut cmd = Command::new(cargo_bin!("topup-ledger"));
    cmd.arg("tests/fixtures/does_not_exist.csv");

    cmd.assert().failure();
}
