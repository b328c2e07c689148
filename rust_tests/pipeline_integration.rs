//! Pipeline integration tests
//!
//! Drive compilation, linking, execution, report emission and packaging
//! against the scripted toolchain in `support`.

mod support;

use cryptid_harness::commands::execute;
use cryptid_harness::compiler::BuildMode;
use cryptid_harness::config::{Commands, HarnessConfig};
use cryptid_harness::error::{FailureKind, HarnessError};
use cryptid_harness::orchestrator::{ExecutionFailureKind, TestOrchestrator};
use cryptid_harness::packager::ArtifactPackager;
use cryptid_harness::reporter::SilentReporter;
use std::fs;
use support::{
    greatest_output, names, project, stray_artifacts, touch, FakeToolchain, RecordingReporter,
};

#[test]
fn test_hash_passes_pairing_fails() {
    let (temp, config) = project(&["Hash", "Pairing"]);
    let tools = FakeToolchain::new()
        .script(
            "Hash",
            0,
            &greatest_output("hash_suite", &["deterministic", "distinct", "empty_input"], &[]),
        )
        .script("Pairing", 1, &greatest_output("pairing_suite", &[], &["bilinear"]));

    let err = execute(
        &config,
        &tools,
        &Commands::Test {
            components: names(&["Hash", "Pairing"]),
            coverage: false,
        },
        &mut SilentReporter,
    )
    .unwrap_err();

    match err {
        HarnessError::ComponentFailures { stage, failed } => {
            assert_eq!(stage, "tests");
            assert_eq!(failed, vec!["Pairing"]);
        }
        other => panic!("expected component failures, got {:?}", other),
    }

    let hash_report = fs::read_to_string(config.results_dir().join("Hash.xml")).unwrap();
    assert_eq!(hash_report.matches("<testcase ").count(), 3);
    assert!(!hash_report.contains("<failure"));
    assert!(!config.results_dir().join("Pairing.xml").exists());

    assert!(stray_artifacts(temp.path()).is_empty());
}

#[test]
fn test_outcome_records_each_component_in_order() {
    let (_temp, config) = project(&["Hash", "Pairing"]);
    let tools = FakeToolchain::new().script("Pairing", 1, "FAIL bilinear: no\n");

    let outcome = TestOrchestrator::new(&config, &tools)
        .run(&names(&["Hash", "Pairing"]), &BuildMode::test(), &mut SilentReporter)
        .unwrap();

    let order: Vec<_> = outcome.results.iter().map(|r| r.component.as_str()).collect();
    assert_eq!(order, vec!["Hash", "Pairing"]);
    assert!(outcome.results[0].is_success());

    let pairing = outcome.result("Pairing").unwrap();
    assert_eq!(pairing.exit_status, Some(1));
    assert_eq!(pairing.stdout, "FAIL bilinear: no\n");
    assert_eq!(
        pairing.failure.as_ref().map(|f| f.kind),
        Some(ExecutionFailureKind::Test)
    );
}

#[test]
fn test_every_component_attempted_after_failures() {
    let (temp, config) = project(&["Complex", "Hash", "Pairing"]);
    let tools = FakeToolchain::new()
        .script("Complex", 1, "")
        .script("Hash", 2, "");

    let outcome = TestOrchestrator::new(&config, &tools)
        .run(
            &names(&["Complex", "Hash", "Pairing"]),
            &BuildMode::test(),
            &mut SilentReporter,
        )
        .unwrap();

    assert_eq!(tools.executed(), vec!["Complex", "Hash", "Pairing"]);
    assert_eq!(outcome.failed_components(), vec!["Complex", "Hash"]);
    assert!(stray_artifacts(temp.path()).is_empty());
}

#[test]
fn test_compilation_precedes_every_link() {
    let (_temp, config) = project(&["Hash", "Pairing"]);
    let tools = FakeToolchain::new();

    TestOrchestrator::new(&config, &tools)
        .run(&names(&["Hash", "Pairing"]), &BuildMode::test(), &mut SilentReporter)
        .unwrap();

    // CryptID.o, Pairing.o and sha.o are all present for both links
    assert_eq!(tools.objects_at_link(), vec![3, 3]);

    let compiles: Vec<_> = tools
        .calls_to("gcc")
        .into_iter()
        .filter(|c| c.has_arg("-c"))
        .collect();
    assert_eq!(compiles.len(), 1);
    assert_eq!(tools.calls()[0], compiles[0]);
}

#[test]
fn test_compile_invocation_flags() {
    let (_temp, config) = project(&["Hash"]);
    let tools = FakeToolchain::new();

    TestOrchestrator::new(&config, &tools)
        .run(&names(&["Hash"]), &BuildMode::test(), &mut SilentReporter)
        .unwrap();

    let compile = &tools.calls()[0];
    let sources: Vec<_> = compile.args.iter().filter(|a| a.ends_with(".c")).collect();
    assert_eq!(sources.len(), 3);
    assert!(compile.has_arg("-std=c99"));
    assert!(compile.has_arg("-Werror"));
    assert!(compile.has_arg("-g"));
    assert!(!compile.has_arg("-fprofile-arcs"));
    assert_eq!(compile.args.last().map(String::as_str), Some("-c"));

    let link = &tools.calls()[1];
    assert!(link.has_arg("-lgmp"));
    assert!(link.has_arg("-o"));
    assert!(link.value_after("-o").unwrap().ends_with("Hash.out"));
}

#[test]
fn test_executables_run_verbose_in_project_root() {
    let (_temp, config) = project(&["Hash"]);
    let tools = FakeToolchain::new();

    TestOrchestrator::new(&config, &tools)
        .run(&names(&["Hash"]), &BuildMode::test(), &mut SilentReporter)
        .unwrap();

    let run = tools.calls().into_iter().find(|c| c.program_name() == "Hash.out").unwrap();
    assert_eq!(run.args, vec!["-v"]);
    assert_eq!(run.cwd.as_deref(), Some(config.root.as_path()));
}

#[test]
fn test_compilation_failure_aborts_before_any_component() {
    let (temp, config) = project(&["Hash", "Pairing"]);
    let tools = FakeToolchain::new().compile_fails();

    let err = TestOrchestrator::new(&config, &tools)
        .run(&names(&["Hash", "Pairing"]), &BuildMode::test(), &mut SilentReporter)
        .unwrap_err();

    assert_eq!(err.kind(), FailureKind::Compilation);
    assert!(err.to_string().contains("expected ';'"));
    assert!(tools.executed().is_empty());
    assert_eq!(tools.calls().len(), 1);
    assert!(stray_artifacts(temp.path()).is_empty());
}

#[test]
fn test_compile_failure_is_reported_once() {
    let (_temp, config) = project(&["Hash"]);
    let tools = FakeToolchain::new().compile_fails();
    let mut reporter = RecordingReporter::default();

    execute(
        &config,
        &tools,
        &Commands::Test {
            components: names(&["Hash"]),
            coverage: false,
        },
        &mut reporter,
    )
    .unwrap_err();

    assert_eq!(reporter.errors.len(), 1);
    assert!(reporter.errors[0].contains("compilation failed"));
}

/// Reload the fixture with executables that carry no extension
fn without_executable_extension(root: &std::path::Path) -> HarnessConfig {
    fs::write(root.join("harness.toml"), "[paths]\nexecutable_extension = \"\"\n").unwrap();
    HarnessConfig::load(root).unwrap()
}

#[test]
fn test_extensionless_executables_keep_project_files_on_compile_failure() {
    let (temp, _) = project(&["Hash"]);
    let config = without_executable_extension(temp.path());
    let tools = FakeToolchain::new().compile_fails();

    TestOrchestrator::new(&config, &tools)
        .run(&names(&["Hash"]), &BuildMode::test(), &mut SilentReporter)
        .unwrap_err();

    assert!(temp.path().join("VERSION").is_file());
    assert!(temp.path().join("harness.toml").is_file());
    assert!(stray_artifacts(temp.path()).is_empty());
}

#[test]
fn test_extensionless_executables_are_removed_exactly() {
    let (temp, _) = project(&["Hash"]);
    let config = without_executable_extension(temp.path());
    let tools = FakeToolchain::new().script("Hash", 0, &greatest_output("hash_suite", &["a"], &[]));

    let outcome = TestOrchestrator::new(&config, &tools)
        .run(&names(&["Hash"]), &BuildMode::test(), &mut SilentReporter)
        .unwrap();

    assert!(outcome.is_success());
    assert!(tools.calls().iter().any(|c| c.program == config.executable_path("Hash").to_string_lossy()));
    assert!(!temp.path().join("Hash").exists());
    assert!(temp.path().join("VERSION").is_file());
    assert!(temp.path().join("harness.toml").is_file());
}

#[test]
fn test_missing_component_is_fatal_and_cleans_up() {
    let (temp, config) = project(&["Hash"]);
    let tools = FakeToolchain::new();

    let err = TestOrchestrator::new(&config, &tools)
        .run(&names(&["Hash", "Ghost"]), &BuildMode::test(), &mut SilentReporter)
        .unwrap_err();

    assert!(matches!(
        err,
        HarnessError::MissingComponentSource { ref component, .. } if component == "Ghost"
    ));
    assert_eq!(tools.executed(), vec!["Hash"]);
    assert!(stray_artifacts(temp.path()).is_empty());
}

#[test]
fn test_without_components_runs_all_discovered() {
    let (_temp, config) = project(&["Pairing", "Complex", "Hash"]);
    let tools = FakeToolchain::new();

    execute(
        &config,
        &tools,
        &Commands::Test {
            components: Vec::new(),
            coverage: false,
        },
        &mut SilentReporter,
    )
    .unwrap();

    assert_eq!(tools.executed(), vec!["Complex", "Hash", "Pairing"]);
    for component in ["Complex", "Hash", "Pairing"] {
        assert!(config.results_dir().join(format!("{}.xml", component)).exists());
    }
}

#[test]
fn test_build_static_archives_objects() {
    let (temp, config) = project(&[]);
    let tools = FakeToolchain::new();

    execute(
        &config,
        &tools,
        &Commands::BuildStatic {
            flags: vec!["-O2".into()],
        },
        &mut SilentReporter,
    )
    .unwrap();

    let artifact = config.build_dir().join("libcryptid-0.4.1.a");
    let members = fs::read_to_string(&artifact).unwrap();
    let members: Vec<_> = members
        .lines()
        .map(|m| m.rsplit('/').next().unwrap().to_string())
        .collect();
    assert_eq!(members, vec!["CryptID.o", "Pairing.o", "sha.o"]);

    let compile = &tools.calls()[0];
    assert!(compile.has_arg("-O2"));
    assert!(!compile.has_arg("-g"));
    assert_eq!(tools.calls_to("ar")[0].args[0], "rcs");
    assert!(stray_artifacts(temp.path()).is_empty());
}

#[test]
fn test_build_with_compiler_override() {
    let (_temp, config) = project(&[]);
    let tools = FakeToolchain::new();

    execute(
        &config,
        &tools,
        &Commands::Build {
            compiler: Some("clang".into()),
            flags: Vec::new(),
        },
        &mut SilentReporter,
    )
    .unwrap();

    assert_eq!(tools.calls_to("clang").len(), 1);
    assert!(tools.calls_to("gcc").is_empty());
}

#[test]
fn test_archiver_failure_leaves_no_objects() {
    let (temp, config) = project(&[]);
    let tools = FakeToolchain::new().tool_fails("ar");

    let err = ArtifactPackager::new(&config, &tools).build(Vec::new()).unwrap_err();

    assert!(matches!(err, HarnessError::Archive(_)));
    assert!(err.is_fatal());
    assert!(stray_artifacts(temp.path()).is_empty());
}

#[test]
fn test_build_compile_failure_produces_no_artifact() {
    let (_temp, config) = project(&[]);
    let tools = FakeToolchain::new().compile_fails();

    let err = ArtifactPackager::new(&config, &tools).build(Vec::new()).unwrap_err();

    assert_eq!(err.kind(), FailureKind::Compilation);
    assert!(tools.calls_to("ar").is_empty());
    assert!(!config.build_dir().join("libcryptid-0.4.1.a").exists());
}

#[test]
fn test_clean_then_clean_again() {
    let (temp, config) = project(&["Hash"]);
    touch(&temp.path().join("Hash.o"));
    touch(&temp.path().join("Hash.out"));
    touch(&temp.path().join("nested/stale.o"));
    touch(&config.build_dir().join("libcryptid-0.4.1.a"));

    execute(&config, &FakeToolchain::new(), &Commands::Clean, &mut SilentReporter).unwrap();
    assert!(stray_artifacts(temp.path()).is_empty());
    assert!(!temp.path().join("nested/stale.o").exists());
    assert!(!config.build_dir().exists());

    // second run finds nothing and still succeeds
    execute(&config, &FakeToolchain::new(), &Commands::Clean, &mut SilentReporter).unwrap();
}
