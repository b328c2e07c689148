//! Coverage integration tests
//!
//! Counters must either end up harvested or merged, or be gone: never left
//! in the project root, never persisted after a failed run.

mod support;

use cryptid_harness::commands::execute;
use cryptid_harness::config::Commands;
use cryptid_harness::coverage::CoverageAggregator;
use cryptid_harness::error::{FailureKind, HarnessError};
use cryptid_harness::reporter::SilentReporter;
use std::fs;
use support::{
    greatest_output, names, project, stray_artifacts, touch, FakeToolchain, RecordingReporter,
};

fn file_names(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn test_gcov_coverage_harvests_filtered_counters() {
    let (temp, config) = project(&["Hash"]);
    let tools = FakeToolchain::new();

    let report = CoverageAggregator::new(&config, &tools)
        .generate_gcov_coverage(&names(&["Hash"]), &mut SilentReporter)
        .unwrap();

    let raw_dir = report.raw_dir.unwrap();
    assert_eq!(raw_dir, config.coverage_raw_dir());
    assert_eq!(
        file_names(&raw_dir),
        vec!["CryptID.gcda", "CryptID.gcno", "Pairing.gcda", "Pairing.gcno"]
    );
    assert!(stray_artifacts(temp.path()).is_empty());
    assert!(tools.calls_to("lcov").is_empty());
}

#[test]
fn test_instrumentation_reaches_compile_and_link() {
    let (_temp, config) = project(&["Hash"]);
    let tools = FakeToolchain::new();

    CoverageAggregator::new(&config, &tools)
        .generate_gcov_coverage(&names(&["Hash"]), &mut SilentReporter)
        .unwrap();

    let gcc = tools.calls_to("gcc");
    assert_eq!(gcc.len(), 2);
    for call in gcc {
        assert!(call.has_arg("-fprofile-arcs"));
        assert!(call.has_arg("-ftest-coverage"));
    }
}

#[test]
fn test_coverage_merges_renders_and_keeps_tracefile() {
    let (temp, config) = project(&["Hash", "Pairing"]);
    let tools = FakeToolchain::new();

    execute(
        &config,
        &tools,
        &Commands::Coverage {
            components: names(&["Hash", "Pairing"]),
            report: false,
        },
        &mut SilentReporter,
    )
    .unwrap();

    // excluded counters were gone before the merge
    let merged = tools.counters_at_merge();
    assert!(merged.contains(&"CryptID.gcda".to_string()));
    assert!(!merged.iter().any(|c| c.starts_with("sha.")));
    assert!(!merged.iter().any(|c| c.contains(".test.")));

    assert!(config.merged_coverage_file().is_file());
    assert!(config.coverage_html_dir().join("index.html").is_file());
    assert!(stray_artifacts(temp.path()).is_empty());
    assert!(tools.calls_to("coveralls-lcov").is_empty());
}

#[test]
fn test_merge_summary_is_parsed() {
    let (_temp, config) = project(&["Hash"]);
    let tools = FakeToolchain::new();

    let report = CoverageAggregator::new(&config, &tools)
        .generate_coverage(&names(&["Hash"]), &mut SilentReporter)
        .unwrap();

    let summary = report.summary.unwrap();
    assert_eq!(summary.lines_found, 10);
    assert_eq!(summary.lines_hit, 7);
    assert_eq!(summary.branch_percent(), Some(50.0));
    assert_eq!(report.merged_file, Some(config.merged_coverage_file()));
}

#[test]
fn test_html_coverage_removes_tracefile_after_rendering() {
    let (temp, config) = project(&["Hash"]);
    let tools = FakeToolchain::new();

    execute(
        &config,
        &tools,
        &Commands::HtmlCoverage {
            components: names(&["Hash"]),
        },
        &mut SilentReporter,
    )
    .unwrap();

    assert!(config.coverage_html_dir().join("index.html").is_file());
    assert!(!config.merged_coverage_file().exists());
    assert!(stray_artifacts(temp.path()).is_empty());

    let render = &tools.calls_to("genhtml")[0];
    assert_eq!(render.value_after("-o").map(std::path::PathBuf::from), Some(config.coverage_html_dir()));
}

#[test]
fn test_compile_failure_leaves_no_counters_or_merged_data() {
    let (temp, config) = project(&["Hash"]);
    // stale data from an earlier run
    touch(&config.merged_coverage_file());
    let tools = FakeToolchain::new().compile_fails();

    let err = CoverageAggregator::new(&config, &tools)
        .generate_html_coverage(&names(&["Hash"]), &mut SilentReporter, true)
        .unwrap_err();

    assert_eq!(err.kind(), FailureKind::Compilation);
    assert!(stray_artifacts(temp.path()).is_empty());
    assert!(!config.merged_coverage_file().exists());
    assert!(tools.calls_to("lcov").is_empty());
}

#[test]
fn test_failed_html_run_removes_earlier_html_report() {
    let (_temp, config) = project(&["Hash"]);
    let stale_index = config.coverage_html_dir().join("index.html");
    touch(&stale_index);
    let tools = FakeToolchain::new().compile_fails();

    CoverageAggregator::new(&config, &tools)
        .generate_html_coverage(&names(&["Hash"]), &mut SilentReporter, false)
        .unwrap_err();

    assert!(!stale_index.exists());
    assert!(!config.coverage_html_dir().exists());
}

#[test]
fn test_renderer_failure_leaves_no_partial_coverage() {
    let (_temp, config) = project(&["Hash"]);
    touch(&config.coverage_html_dir().join("index.html"));
    let tools = FakeToolchain::new().tool_fails("genhtml");

    CoverageAggregator::new(&config, &tools)
        .generate_html_coverage(&names(&["Hash"]), &mut SilentReporter, true)
        .unwrap_err();

    assert!(!config.coverage_html_dir().exists());
    assert!(!config.merged_coverage_file().exists());
}

#[test]
fn test_component_failure_discards_counters() {
    let (temp, config) = project(&["Hash", "Pairing"]);
    let tools = FakeToolchain::new().script("Pairing", 1, "");

    let err = CoverageAggregator::new(&config, &tools)
        .generate_coverage(&names(&["Hash", "Pairing"]), &mut SilentReporter)
        .unwrap_err();

    assert!(matches!(err, HarnessError::ComponentFailures { ref stage, .. } if stage == "coverage"));
    assert_eq!(tools.executed(), vec!["Hash", "Pairing"]);
    assert!(stray_artifacts(temp.path()).is_empty());
    assert!(tools.calls_to("lcov").is_empty());
    assert!(!config.merged_coverage_file().exists());
}

#[test]
fn test_merger_failure_is_fatal_and_cleans_up() {
    let (temp, config) = project(&["Hash"]);
    let tools = FakeToolchain::new().tool_fails("lcov");

    let err = CoverageAggregator::new(&config, &tools)
        .generate_coverage(&names(&["Hash"]), &mut SilentReporter)
        .unwrap_err();

    assert_eq!(err.kind(), FailureKind::ToolInvocation);
    assert!(stray_artifacts(temp.path()).is_empty());
    assert!(!config.merged_coverage_file().exists());
}

#[test]
fn test_merger_failure_is_reported_once() {
    let (_temp, config) = project(&["Hash"]);
    let tools = FakeToolchain::new().tool_fails("lcov");
    let mut reporter = RecordingReporter::default();

    execute(
        &config,
        &tools,
        &Commands::Coverage {
            components: names(&["Hash"]),
            report: false,
        },
        &mut reporter,
    )
    .unwrap_err();

    assert_eq!(reporter.errors.len(), 1);
    assert!(reporter.errors[0].contains("lcov"));
}

#[test]
fn test_renderer_failure_is_fatal() {
    let (temp, config) = project(&["Hash"]);
    let tools = FakeToolchain::new().tool_fails("genhtml");

    let err = execute(
        &config,
        &tools,
        &Commands::HtmlCoverage {
            components: names(&["Hash"]),
        },
        &mut SilentReporter,
    )
    .unwrap_err();

    assert!(err.is_fatal());
    assert!(stray_artifacts(temp.path()).is_empty());
}

#[test]
fn test_coverage_report_uploads_tracefile() {
    let (_temp, config) = project(&["Hash"]);
    let tools = FakeToolchain::new();

    execute(
        &config,
        &tools,
        &Commands::Coverage {
            components: names(&["Hash"]),
            report: true,
        },
        &mut SilentReporter,
    )
    .unwrap();

    let upload = &tools.calls_to("coveralls-lcov")[0];
    assert_eq!(
        upload.args,
        vec![config.merged_coverage_file().to_string_lossy().into_owned()]
    );
}

#[test]
fn test_report_coverage_requires_merged_data() {
    let (_temp, config) = project(&["Hash"]);
    let tools = FakeToolchain::new();

    let err = execute(&config, &tools, &Commands::ReportCoverage, &mut SilentReporter).unwrap_err();
    assert!(matches!(err, HarnessError::MissingCoverageData(_)));
    assert!(tools.calls().is_empty());
}

#[test]
fn test_test_with_coverage_reports_passed_and_drops_counters_on_failure() {
    let (temp, config) = project(&["Hash", "Pairing"]);
    let tools = FakeToolchain::new()
        .script("Hash", 0, &greatest_output("hash_suite", &["a", "b"], &[]))
        .script("Pairing", 1, "");

    let err = execute(
        &config,
        &tools,
        &Commands::Test {
            components: names(&["Hash", "Pairing"]),
            coverage: true,
        },
        &mut SilentReporter,
    )
    .unwrap_err();

    assert!(matches!(err, HarnessError::ComponentFailures { .. }));
    assert!(config.results_dir().join("Hash.xml").is_file());
    assert!(!config.coverage_raw_dir().exists());
    assert!(stray_artifacts(temp.path()).is_empty());
}
