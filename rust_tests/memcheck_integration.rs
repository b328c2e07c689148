//! Memory-check integration tests

mod support;

use cryptid_harness::commands::execute;
use cryptid_harness::config::{Commands, HarnessConfig};
use cryptid_harness::error::HarnessError;
use cryptid_harness::memcheck::MemoryCheckRunner;
use cryptid_harness::orchestrator::ExecutionFailureKind;
use cryptid_harness::reporter::SilentReporter;
use support::{names, project, stray_artifacts, touch, FakeToolchain};

#[test]
fn test_two_failures_raise_after_all_attempted() {
    let (temp, config) = project(&["Hash", "Pairing", "Complex"]);
    let tools = FakeToolchain::new()
        .analyzer_fails("Hash")
        .analyzer_fails("Pairing");
    let runner = MemoryCheckRunner::new(&config, &tools);

    let err = runner
        .run(&names(&["Hash", "Pairing", "Complex"]), true, &mut SilentReporter)
        .unwrap_err();

    match err {
        HarnessError::ComponentFailures { stage, failed } => {
            assert_eq!(stage, "memcheck");
            assert_eq!(failed, vec!["Hash", "Pairing"]);
        }
        other => panic!("expected component failures, got {:?}", other),
    }

    assert_eq!(tools.calls_to("valgrind").len(), 3);
    assert!(runner.xml_report_path("Hash").is_file());
    assert!(runner.xml_report_path("Pairing").is_file());
    assert!(runner.xml_report_path("Complex").is_file());
    assert!(stray_artifacts(temp.path()).is_empty());
}

#[test]
fn test_single_failure_is_collected_but_fails_command() {
    let (temp, config) = project(&["Hash", "Pairing"]);
    let tools = FakeToolchain::new().analyzer_fails("Pairing");

    let run = MemoryCheckRunner::new(&config, &tools)
        .run(&names(&["Hash", "Pairing"]), false, &mut SilentReporter)
        .unwrap();

    assert_eq!(run.outcome.failed_components(), vec!["Pairing"]);
    let pairing = run.outcome.result("Pairing").unwrap();
    assert_eq!(
        pairing.failure.as_ref().map(|f| f.kind),
        Some(ExecutionFailureKind::Analyzer)
    );
    assert!(stray_artifacts(temp.path()).is_empty());

    let tools = FakeToolchain::new().analyzer_fails("Pairing");
    let err = execute(
        &config,
        &tools,
        &Commands::Memcheck {
            components: names(&["Hash", "Pairing"]),
            xml_output: false,
        },
        &mut SilentReporter,
    )
    .unwrap_err();
    assert!(matches!(err, HarnessError::ComponentFailures { .. }));
}

#[test]
fn test_analyzer_invocation() {
    let (_temp, config) = project(&["Hash", "CryptID"]);
    let tools = FakeToolchain::new();

    MemoryCheckRunner::new(&config, &tools)
        .run(&names(&["Hash", "CryptID"]), false, &mut SilentReporter)
        .unwrap();

    let calls = tools.calls_to("valgrind");
    let hash = &calls[0];
    assert_eq!(
        &hash.args[..3],
        &["--leak-check=full", "--show-reachable=yes", "--error-exitcode=1"]
    );
    assert!(hash.args.last().unwrap().ends_with("Hash.out"));
    assert!(!hash.args.iter().any(|a| a.starts_with("--xml")));

    // the fast self-check mode is appended after the program
    let cryptid = &calls[1];
    let tail: Vec<&str> = cryptid.args.iter().rev().take(3).rev().map(String::as_str).collect();
    assert!(tail[0].ends_with("CryptID.out"));
    assert_eq!(&tail[1..], &["--", "--lowest-quick-check"]);
}

#[test]
fn test_compiles_with_debug_symbols_only() {
    let (_temp, config) = project(&["Hash"]);
    let tools = FakeToolchain::new();

    MemoryCheckRunner::new(&config, &tools)
        .run(&names(&["Hash"]), false, &mut SilentReporter)
        .unwrap();

    let compile = &tools.calls()[0];
    assert!(compile.has_arg("-g"));
    assert!(!compile.has_arg("-fprofile-arcs"));
}

#[test]
fn test_xml_directory_is_recreated_and_parsed() {
    let (_temp, config) = project(&["Hash", "Pairing"]);
    touch(&config.memcheck_dir().join("Stale.xml"));
    let tools = FakeToolchain::new().analyzer_fails("Pairing");

    let run = MemoryCheckRunner::new(&config, &tools)
        .run(&names(&["Hash", "Pairing"]), true, &mut SilentReporter)
        .unwrap();

    assert!(!config.memcheck_dir().join("Stale.xml").exists());
    assert_eq!(run.reports.len(), 2);
    assert!(run.reports[0].is_clean());
    assert_eq!(run.reports[1].component, "Pairing");
    assert_eq!(run.reports[1].error_count, 1);
    assert_eq!(run.reports[1].kinds.get("Leak_DefinitelyLost"), Some(&1));

    let hash = &tools.calls_to("valgrind")[0];
    assert!(hash.has_arg("--xml=yes"));
}

#[test]
fn test_without_xml_output_no_directory_is_created() {
    let (_temp, config) = project(&["Hash"]);
    let tools = FakeToolchain::new();

    let run = MemoryCheckRunner::new(&config, &tools)
        .run(&names(&["Hash"]), false, &mut SilentReporter)
        .unwrap();

    assert!(run.reports.is_empty());
    assert!(!config.memcheck_dir().exists());
}

#[test]
fn test_compile_failure_aborts_memcheck() {
    let (temp, config) = project(&["Hash"]);
    let tools = FakeToolchain::new().compile_fails();

    let err = MemoryCheckRunner::new(&config, &tools)
        .run(&names(&["Hash"]), true, &mut SilentReporter)
        .unwrap_err();

    assert!(matches!(err, HarnessError::Compilation(_)));
    assert!(tools.calls_to("valgrind").is_empty());
    assert!(stray_artifacts(temp.path()).is_empty());
}

#[test]
fn test_missing_component_aborts_after_cleaning_earlier_executables() {
    let (temp, config) = project(&["Hash"]);
    let tools = FakeToolchain::new();

    let err = MemoryCheckRunner::new(&config, &tools)
        .run(&names(&["Hash", "Ghost"]), false, &mut SilentReporter)
        .unwrap_err();

    assert!(matches!(err, HarnessError::MissingComponentSource { .. }));
    assert_eq!(tools.calls_to("valgrind").len(), 1);
    assert!(stray_artifacts(temp.path()).is_empty());
}

#[test]
fn test_extensionless_executables_keep_project_files() {
    let (temp, _) = project(&["Hash"]);
    std::fs::write(temp.path().join("harness.toml"), "[paths]\nexecutable_extension = \"\"\n").unwrap();
    let config = HarnessConfig::load(temp.path()).unwrap();
    let tools = FakeToolchain::new().compile_fails();

    MemoryCheckRunner::new(&config, &tools)
        .run(&names(&["Hash"]), false, &mut SilentReporter)
        .unwrap_err();

    assert!(temp.path().join("VERSION").is_file());
    assert!(temp.path().join("harness.toml").is_file());
}
