use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const REPODATA: &str = r#"{
  "info": {"subdir": "noarch"},
  "packages": {
    "python-3.10.0-0.tar.bz2": {"name": "python", "version": "3.10.0", "build": "0"},
    "python-3.11.0-0.tar.bz2": {"name": "python", "version": "3.11.0", "build": "0"},
    "numpy-1.26.0-0.tar.bz2": {"name": "numpy", "version": "1.26.0", "build": "0", "depends": ["python >=3.9"]},
    "pkg-x-1.0-0.tar.bz2": {"name": "pkg-x", "version": "1.0", "build": "0", "depends": ["libfoo <2.0"]},
    "pkg-y-1.0-0.tar.bz2": {"name": "pkg-y", "version": "1.0", "build": "0", "depends": ["libfoo >=2.0"]},
    "libfoo-1.5-0.tar.bz2": {"name": "libfoo", "version": "1.5", "build": "0"}
  }
}"#;

struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let noarch = dir.path().join("channel").join("noarch");
        fs::create_dir_all(&noarch).unwrap();
        fs::write(noarch.join("repodata.json"), REPODATA).unwrap();
        let home = dir.path().join("home");
        fs::create_dir_all(&home).unwrap();
        fs::write(
            home.join("config.toml"),
            "subdirs = [\"noarch\"]\nvirtual-packages = [\"__unix=0\"]\n",
        )
        .unwrap();
        Self { dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn channel(&self) -> String {
        self.path().join("channel").to_string_lossy().into_owned()
    }

    fn state(&self) -> PathBuf {
        self.path().join("env.json")
    }

    #[allow(deprecated)]
    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("corral").unwrap();
        cmd.env("CORRAL_HOME", self.path().join("home"))
            .env_remove("RUST_LOG")
            .current_dir(self.path());
        cmd
    }
}

#[test]
fn test_install_prints_plan() {
    let sb = Sandbox::new();
    sb.cmd()
        .args(["install", "numpy", "-c", &sb.channel()])
        .assert()
        .success()
        .stdout(predicate::str::contains("## Package Plan ##"))
        .stdout(predicate::str::contains("The following NEW packages will be INSTALLED:"))
        .stdout(predicate::str::contains("numpy"))
        .stdout(predicate::str::contains("python"));
}

#[test]
fn test_install_json_reports_next_state() {
    let sb = Sandbox::new();
    let output = sb
        .cmd()
        .args(["install", "numpy", "--json", "-c", &sb.channel()])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let ops = report["plan"]["operations"].as_array().unwrap();
    assert_eq!(ops.len(), 2);
    assert_eq!(ops[0]["op"], "link");
    assert_eq!(ops[0]["record"]["name"], "python");
    assert_eq!(report["next_state"]["requested"][0], "numpy");
}

#[test]
fn test_update_keeps_and_upgrades() {
    let sb = Sandbox::new();
    fs::write(
        sb.state(),
        r#"{"requested": ["python"], "packages": [{"name": "python", "version": "3.10.0", "build": "0", "channel": "channel"}]}"#,
    )
    .unwrap();

    sb.cmd()
        .args(["install", "python", "--state"])
        .arg(sb.state())
        .args(["-c", &sb.channel()])
        .assert()
        .success()
        .stdout(predicate::str::contains("All requested packages already installed."));

    sb.cmd()
        .args(["update", "python", "--state"])
        .arg(sb.state())
        .args(["-c", &sb.channel()])
        .assert()
        .success()
        .stdout(predicate::str::contains("The following packages will be UPDATED:"))
        .stdout(predicate::str::contains("3.11.0"));
}

#[test]
fn test_update_without_names_requires_all() {
    let sb = Sandbox::new();
    sb.cmd()
        .args(["update", "-c", &sb.channel()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--all"));
}

#[test]
fn test_unsatisfiable_install_explains_conflict() {
    let sb = Sandbox::new();
    sb.cmd()
        .args(["install", "pkg-x", "pkg-y", "-c", &sb.channel()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be satisfied together"))
        .stderr(predicate::str::contains("libfoo"));
}

#[test]
fn test_zero_timeout_fails_distinctly() {
    let sb = Sandbox::new();
    sb.cmd()
        .args(["install", "numpy", "--timeout-ms", "0", "-c", &sb.channel()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("timed out"));
}

#[test]
fn test_invalid_spec_is_rejected() {
    let sb = Sandbox::new();
    sb.cmd()
        .args(["install", "num$py", "-c", &sb.channel()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid spec"));
}

#[test]
fn test_remove_requires_state() {
    let sb = Sandbox::new();
    sb.cmd()
        .args(["remove", "numpy", "-c", &sb.channel()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No environment state"));
}

#[test]
fn test_remove_drops_dependents() {
    let sb = Sandbox::new();
    fs::write(
        sb.state(),
        r#"{
          "requested": ["numpy"],
          "packages": [
            {"name": "python", "version": "3.11.0", "build": "0", "channel": "channel"},
            {"name": "numpy", "version": "1.26.0", "build": "0", "channel": "channel", "depends": ["python >=3.9"]}
          ]
        }"#,
    )
    .unwrap();

    sb.cmd()
        .args(["remove", "python", "--state"])
        .arg(sb.state())
        .args(["-c", &sb.channel()])
        .assert()
        .success()
        .stdout(predicate::str::contains("The following packages will be REMOVED:"))
        .stdout(predicate::str::contains("numpy"));
}

#[test]
fn test_no_channels_is_a_config_error() {
    let sb = Sandbox::new();
    sb.cmd()
        .args(["install", "numpy"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no channels configured"));
}
