use assert_cmd::cargo::cargo_bin_cmd;

#[test]
fn help_lists_workload_flags() {
    let mut cmd = cargo_bin_cmd!("jobmon");
    cmd.arg("--help");
    let out = cmd.assert().success();
    let stdout = String::from_utf8(out.get_output().stdout.clone()).expect("utf8");

    for flag in ["--config", "--parallel", "--jobs", "--job-millis", "--banner", "--fail-job"] {
        assert!(stdout.contains(flag), "missing {flag} in:\n{stdout}");
    }
}

#[test]
fn zero_parallelism_is_rejected() {
    let mut cmd = cargo_bin_cmd!("jobmon");
    cmd.arg("--parallel").arg("0");
    let out = cmd.assert().failure().code(1);
    let stderr = String::from_utf8(out.get_output().stderr.clone()).expect("utf8");
    assert!(stderr.contains("workload.parallel"), "{stderr}");
}

#[test]
fn unknown_config_key_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("jobmon.toml");
    std::fs::write(&path, "[workload]\nthreads = 4\n").expect("write config");

    let mut cmd = cargo_bin_cmd!("jobmon");
    cmd.arg("--config").arg(&path);
    let out = cmd.assert().failure();
    let stderr = String::from_utf8(out.get_output().stderr.clone()).expect("utf8");
    assert!(stderr.contains("config parse error"), "{stderr}");
}

#[test]
fn missing_config_file_exits_nonzero() {
    let mut cmd = cargo_bin_cmd!("jobmon");
    cmd.arg("--config").arg("/nonexistent/jobmon.toml");
    cmd.assert().failure();
}
