/// Command-line surface of the reference worker

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_help_lists_options() {
    Command::cargo_bin("pipeplot-worker")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--log-level"))
        .stdout(predicate::str::contains("--connect-wait-ms"));
}

#[test]
fn test_requires_job_file() {
    Command::cargo_bin("pipeplot-worker")
        .unwrap()
        .assert()
        .failure()
        .stderr(predicate::str::contains("JOB"));
}

#[test]
fn test_missing_job_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    Command::cargo_bin("pipeplot-worker")
        .unwrap()
        .arg(dir.path().join("absent.toml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("reading job file"));
}

#[test]
fn test_invalid_job_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let job = dir.path().join("job.toml");
    std::fs::write(&job, "rounds = []\n").unwrap();

    Command::cargo_bin("pipeplot-worker")
        .unwrap()
        .arg(&job)
        .assert()
        .failure()
        .stderr(predicate::str::contains("at least one round"));
}

#[test]
fn test_gives_up_when_no_host_listens() {
    let dir = tempfile::tempdir().unwrap();
    let job = dir.path().join("job.toml");
    std::fs::write(&job, "").unwrap();

    Command::cargo_bin("pipeplot-worker")
        .unwrap()
        .env("PIPEPLOT_CHANNEL_DIR", dir.path())
        .arg(&job)
        .args(["--connect-wait-ms", "200"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("connecting for round 1"));
}
