use predicates::prelude::*;

#[test]
fn test_help_lists_subcommands() {
    let mut cmd = assert_cmd::cargo_bin_cmd!("divergent");
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("files"))
        .stdout(predicate::str::contains("requests"))
        .stdout(predicate::str::contains("--json"))
        .stdout(predicate::str::contains("--config"))
        .stdout(predicate::str::contains("--ignore"))
        .stdout(predicate::str::contains("--version"));
}

#[test]
fn test_requests_help_describes_endpoints() {
    let mut cmd = assert_cmd::cargo_bin_cmd!("divergent");
    cmd.args(["requests", "--help"]);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("--endpoint-a"))
        .stdout(predicate::str::contains("--endpoint-b"))
        .stdout(predicate::str::contains("--header"))
        .stdout(predicate::str::contains("--timeout-ms"));
}

#[test]
fn test_no_arguments_prints_usage() {
    let mut cmd = assert_cmd::cargo_bin_cmd!("divergent");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}
