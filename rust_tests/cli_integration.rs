//! CLI integration tests
//!
//! Argument parsing through clap, plus end-to-end runs of the built binary
//! for commands that need no external toolchain.

use clap::Parser;
use cryptid_harness::config::{Cli, Commands, OutputFormat};
use std::fs;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::time::Duration;
use tempfile::TempDir;
use wait_timeout::ChildExt;

/// Run the harness binary in `root`, killing it after 30 seconds
fn run_harness(root: &Path, args: &[&str]) -> Option<Output> {
    let mut child = Command::new(env!("CARGO_BIN_EXE_cryptid-harness"))
        .args(args)
        .current_dir(root)
        .env_remove("CRYPTID_HARNESS_ROOT")
        .env_remove("CRYPTID_HARNESS_FORMAT")
        .env("CRYPTID_HARNESS_LOG", "info")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to spawn cryptid-harness");

    match child.wait_timeout(Duration::from_secs(30)) {
        Ok(Some(_status)) => child.wait_with_output().ok(),
        Ok(None) => {
            let _ = child.kill();
            None
        }
        Err(_) => None,
    }
}

#[test]
fn test_parse_memcheck_aliases() {
    let cli = Cli::try_parse_from(["cryptid-harness", "memory-check", "Hash", "--xmlOutput"]).unwrap();
    assert_eq!(
        cli.command,
        Commands::Memcheck {
            components: vec!["Hash".into()],
            xml_output: true,
        }
    );

    let cli = Cli::try_parse_from(["cryptid-harness", "memcheck", "--xml-output"]).unwrap();
    assert!(matches!(cli.command, Commands::Memcheck { xml_output: true, .. }));
}

#[test]
fn test_parse_build_passes_flags_through() {
    let cli = Cli::try_parse_from([
        "cryptid-harness",
        "build",
        "--compiler",
        "clang",
        "-O2",
        "-DNDEBUG",
    ])
    .unwrap();
    assert_eq!(
        cli.command,
        Commands::Build {
            compiler: Some("clang".into()),
            flags: vec!["-O2".into(), "-DNDEBUG".into()],
        }
    );
}

#[test]
fn test_parse_global_format_after_subcommand() {
    let cli = Cli::try_parse_from(["cryptid-harness", "test", "Hash", "--coverage", "--format", "json"]).unwrap();
    assert_eq!(cli.format, OutputFormat::Json);
    assert_eq!(
        cli.command,
        Commands::Test {
            components: vec!["Hash".into()],
            coverage: true,
        }
    );
}

#[test]
fn test_unknown_command_is_rejected() {
    assert!(Cli::try_parse_from(["cryptid-harness", "deploy"]).is_err());
}

#[test]
fn test_binary_clean_is_idempotent() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("Hash.o"), b"").unwrap();
    fs::write(temp.path().join("Hash.out"), b"").unwrap();
    fs::create_dir_all(temp.path().join("test-results")).unwrap();

    let first = run_harness(temp.path(), &["clean"]).expect("clean timed out");
    assert!(first.status.success(), "{}", String::from_utf8_lossy(&first.stderr));
    assert!(String::from_utf8_lossy(&first.stdout).contains("removed 2 file(s) and 1 director(ies)"));
    assert!(!temp.path().join("Hash.o").exists());

    let second = run_harness(temp.path(), &["clean"]).expect("clean timed out");
    assert!(second.status.success());
    assert!(String::from_utf8_lossy(&second.stdout).contains("removed 0 file(s) and 0 director(ies)"));
}

#[test]
fn test_binary_json_output_is_pure() {
    let temp = TempDir::new().unwrap();

    let output = run_harness(temp.path(), &["--format", "json", "clean"]).expect("clean timed out");
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    for line in stdout.lines() {
        let event: serde_json::Value = serde_json::from_str(line).expect("stdout must be NDJSON");
        assert_eq!(event["event"], "notice");
    }
    // logs go to stderr
    assert!(String::from_utf8_lossy(&output.stderr).contains("Removing files"));
}

#[test]
fn test_binary_rejects_invalid_config() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("harness.toml"), "[paths]\nsource_directory = \"src\"\n").unwrap();

    let output = run_harness(temp.path(), &["clean"]).expect("clean timed out");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("harness.toml"));
}

#[test]
fn test_binary_report_coverage_without_data_fails() {
    let temp = TempDir::new().unwrap();

    let output = run_harness(temp.path(), &["report-coverage"]).expect("timed out");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("no merged coverage data"));
}
