use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn runs_true_successfully() {
    let mut cmd = Command::cargo_bin("runlim").unwrap();
    cmd.arg("/bin/true");
    cmd.assert()
        .success()
        .stderr(predicate::str::contains("status:").and(predicate::str::contains("ok")));
}

#[test]
fn time_limit_of_one_second_kills_a_busy_loop() {
    let mut cmd = Command::cargo_bin("runlim").unwrap();
    cmd.args(["-t", "1", "sh", "-c", "while :; do :; done"]);
    cmd.assert()
        .code(2)
        .stderr(predicate::str::contains("out of time"));
}

#[test]
fn real_time_limit_kills_a_long_sleep() {
    let mut cmd = Command::cargo_bin("runlim").unwrap();
    cmd.args(["-r", "1", "sleep", "10"]);
    cmd.assert()
        .code(2)
        .stderr(predicate::str::contains("out of time"));
}

#[test]
fn nonexistent_binary_is_reported_as_execvp_failed() {
    let mut cmd = Command::cargo_bin("runlim").unwrap();
    cmd.arg("/no/such/binary");
    cmd.assert()
        .code(1)
        .stderr(predicate::str::contains("execvp failed"));
}

#[test]
fn missing_program_is_a_configuration_error() {
    let mut cmd = Command::cargo_bin("runlim").unwrap();
    cmd.assert()
        .code(1)
        .stderr(predicate::str::contains("runlim error: no program specified"));
}

#[test]
fn version_flag_short_circuits() {
    let mut cmd = Command::cargo_bin("runlim").unwrap();
    cmd.arg("--version");
    cmd.assert().success();
}
