//! Integration tests for live dedup runs: backup-then-delete, the
//! backup-completeness precondition, and session restore flows.

use std::{fs, path::Path};

use assert_cmd::Command;
use assert_fs::prelude::*;
use predicates::prelude::*;

/// Write a result record under `dir`.
fn write_record(
    dir: &Path,
    name: &str,
    body: &str,
)
{
    fs::write(dir.join(name), body).unwrap();
}

/// Minimal record body for one model/website/task combination.
fn record_body(
    task: &str,
    success: bool,
    timestamp: &str,
) -> String
{
    format!(
        r#"{{"model":"m1","website":"w1","task":{{"id":"{task}"}},"success":{success},"timestamp":"{timestamp}"}}"#
    )
}

/// Run `bsw dedup --execute` against `data` with `backup` as backup root.
fn run_live(
    data: &Path,
    backup: &Path,
    report: &Path,
) -> assert_cmd::assert::Assert
{
    Command::cargo_bin("bsw")
        .unwrap()
        .args([
            "--quiet",
            "dedup",
            "--dir",
            data.to_str().unwrap(),
            "--backup-dir",
            backup.to_str().unwrap(),
            "--report",
            report.to_str().unwrap(),
            "--policy",
            "worst",
            "--execute",
        ])
        .assert()
}

#[test]
fn test_live_run_leaves_one_file_per_key()
{
    let tmp = assert_fs::TempDir::new().unwrap();
    let data = tmp.child("data");
    data.create_dir_all().unwrap();

    // One duplicated combination (keep-worst must keep the failure) plus a
    // singleton that must survive untouched.
    write_record(
        data.path(),
        "result_a.json",
        &record_body("t1", false, "2024-01-01T00:00:00Z"),
    );
    write_record(
        data.path(),
        "result_b.json",
        &record_body("t1", true, "2024-01-02T00:00:00Z"),
    );
    write_record(
        data.path(),
        "result_c.json",
        &record_body("t2", true, "2024-01-03T00:00:00Z"),
    );

    let backup = tmp.child("backups");
    let report = tmp.child("report.json");
    run_live(data.path(), backup.path(), report.path()).success();

    // Exactly one file per composite key remains.
    data.child("result_a.json")
        .assert(predicate::path::exists());
    data.child("result_b.json")
        .assert(predicate::path::missing());
    data.child("result_c.json")
        .assert(predicate::path::exists());

    // The removed file was backed up verbatim before deletion.
    let parsed: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(report.path()).unwrap()).unwrap();
    assert_eq!(parsed["filesRemoved"], 1);
    assert_eq!(parsed["dryRun"], false);

    let session = parsed["backupSession"]
        .as_str()
        .unwrap()
        .to_string();
    let backed = backup
        .path()
        .join(&session)
        .join("result_b.json");
    assert_eq!(
        fs::read_to_string(&backed).unwrap(),
        record_body("t1", true, "2024-01-02T00:00:00Z")
    );
    assert!(
        backup
            .path()
            .join(&session)
            .join("DONE")
            .exists()
    );
}

#[test]
fn test_backup_failure_aborts_before_any_deletion()
{
    let tmp = assert_fs::TempDir::new().unwrap();
    let data = tmp.child("data");
    data.create_dir_all().unwrap();

    write_record(
        data.path(),
        "result_a.json",
        &record_body("t1", false, "2024-01-01T00:00:00Z"),
    );
    write_record(
        data.path(),
        "result_b.json",
        &record_body("t1", true, "2024-01-02T00:00:00Z"),
    );

    // A plain file where the backup root should be makes every backup
    // write fail before the destructive phase starts.
    let backup = tmp.child("backups");
    backup.write_str("not a directory").unwrap();

    let report = tmp.child("report.json");
    run_live(data.path(), backup.path(), report.path()).failure();

    // Nothing was deleted.
    data.child("result_a.json")
        .assert(predicate::path::exists());
    data.child("result_b.json")
        .assert(predicate::path::exists());
}

#[test]
fn test_live_run_with_no_duplicates_deletes_nothing()
{
    let tmp = assert_fs::TempDir::new().unwrap();
    let data = tmp.child("data");
    data.create_dir_all().unwrap();

    write_record(
        data.path(),
        "result_a.json",
        &record_body("t1", true, "2024-01-01T00:00:00Z"),
    );
    write_record(
        data.path(),
        "result_b.json",
        &record_body("t2", true, "2024-01-02T00:00:00Z"),
    );

    let backup = tmp.child("backups");
    let report = tmp.child("report.json");
    run_live(data.path(), backup.path(), report.path()).success();

    data.child("result_a.json")
        .assert(predicate::path::exists());
    data.child("result_b.json")
        .assert(predicate::path::exists());

    let parsed: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(report.path()).unwrap()).unwrap();
    assert_eq!(parsed["filesRemoved"], 0);
    // No removals means no backup session was created.
    assert!(parsed.get("backupSession").is_none());
}

#[test]
fn test_backup_list_and_restore_roundtrip()
{
    let tmp = assert_fs::TempDir::new().unwrap();
    let data = tmp.child("data");
    data.create_dir_all().unwrap();

    write_record(
        data.path(),
        "result_a.json",
        &record_body("t1", false, "2024-01-01T00:00:00Z"),
    );
    write_record(
        data.path(),
        "result_b.json",
        &record_body("t1", true, "2024-01-02T00:00:00Z"),
    );

    let backup = tmp.child("backups");
    let report = tmp.child("report.json");
    run_live(data.path(), backup.path(), report.path()).success();

    data.child("result_b.json")
        .assert(predicate::path::missing());

    // The session shows up in the listing.
    let list_out = Command::cargo_bin("bsw")
        .unwrap()
        .args([
            "backup",
            "list",
            "--backup-dir",
            backup.path().to_str().unwrap(),
            "--json",
        ])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let sessions: serde_json::Value = serde_json::from_slice(&list_out).unwrap();
    assert_eq!(
        sessions
            .as_array()
            .unwrap()
            .len(),
        1
    );
    assert_eq!(sessions[0]["success"], true);
    assert_eq!(sessions[0]["policy"], "worst");
    assert_eq!(sessions[0]["files"], 1);

    // Restoring the latest session brings the deleted file back.
    Command::cargo_bin("bsw")
        .unwrap()
        .args([
            "backup",
            "restore",
            "latest",
            "--backup-dir",
            backup.path().to_str().unwrap(),
            "--into",
            data.path().to_str().unwrap(),
        ])
        .assert()
        .success();

    data.child("result_a.json")
        .assert(predicate::path::exists());
    data.child("result_b.json")
        .assert(predicate::path::exists());
    assert_eq!(
        fs::read_to_string(data.path().join("result_b.json")).unwrap(),
        record_body("t1", true, "2024-01-02T00:00:00Z")
    );
}

#[test]
fn test_backup_cleanup_keep_latest()
{
    let tmp = assert_fs::TempDir::new().unwrap();
    let backup = tmp.child("backups");

    // Two live runs against separate data dirs create two sessions.
    for round in 0..2
    {
        let data = tmp.child(format!("data{round}"));
        data.create_dir_all().unwrap();

        write_record(
            data.path(),
            "result_a.json",
            &record_body("t1", false, "2024-01-01T00:00:00Z"),
        );
        write_record(
            data.path(),
            "result_b.json",
            &record_body("t1", true, "2024-01-02T00:00:00Z"),
        );

        let report = tmp.child(format!("report{round}.json"));
        run_live(data.path(), backup.path(), report.path()).success();
    }

    // Keep only the newest session; the other one is pruned.
    let cleanup_out = Command::cargo_bin("bsw")
        .unwrap()
        .args([
            "backup",
            "cleanup",
            "--backup-dir",
            backup.path().to_str().unwrap(),
            "--keep-latest",
            "1",
            "--json",
        ])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let outcome: serde_json::Value = serde_json::from_slice(&cleanup_out).unwrap();
    assert_eq!(
        outcome["sessionsRemoved"]
            .as_array()
            .unwrap()
            .len(),
        1
    );

    let list_out = Command::cargo_bin("bsw")
        .unwrap()
        .args([
            "backup",
            "list",
            "--backup-dir",
            backup.path().to_str().unwrap(),
            "--json",
        ])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let sessions: serde_json::Value = serde_json::from_slice(&list_out).unwrap();
    assert_eq!(
        sessions
            .as_array()
            .unwrap()
            .len(),
        1
    );
}
