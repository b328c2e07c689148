//! Native protocol -> TAP -> JUnit conversion tests

use cryptid_harness::config::HarnessConfig;
use cryptid_harness::error::{HarnessError, ToolOutput};
use cryptid_harness::junit::{render_report, ReportEmitter};
use cryptid_harness::orchestrator::ExecutionResult;
use cryptid_harness::protocol::{parse_greatest, tapify, AssertionStatus, TapStream};
use std::fs;
use tempfile::TempDir;

/// Interleaved PASS/FAIL lines as greatest prints them in verbose mode
const MIXED_OUTPUT: &str = "\
* Suite pairing_suite:
PASS pairing_is_bilinear:
FAIL pairing_is_non_degenerate: expected nonzero (Pairing.test.c:58)
PASS pairing_of_identity:
FAIL pairing_matches_vector: mismatch at byte 3 (Pairing.test.c:91)
PASS pairing_is_symmetric:

5 tests - 3 passed, 2 failed, 0 skipped (40 ticks, 0.001 sec)

Total: 5 tests (40 ticks, 0.001 sec), 12 assertions
Pass: 3, fail: 2, skip: 0.
";

const EXPECTED_ORDER: [(&str, bool); 5] = [
    ("pairing_is_bilinear", true),
    ("pairing_is_non_degenerate", false),
    ("pairing_of_identity", true),
    ("pairing_matches_vector", false),
    ("pairing_is_symmetric", true),
];

#[test]
fn test_round_trip_preserves_counts_and_order() {
    let stream = TapStream::parse(&tapify(MIXED_OUTPUT).unwrap()).unwrap();
    assert_eq!(stream.entries.len(), 5);
    assert_eq!(stream.passed(), 3);
    assert_eq!(stream.failed(), 2);

    for (entry, (name, ok)) in stream.entries.iter().zip(EXPECTED_ORDER) {
        assert_eq!(entry.description, format!("pairing_suite::{}", name));
        assert_eq!(entry.ok, ok);
    }

    let xml = render_report("Pairing", &stream, 1).unwrap();
    assert_eq!(xml.matches("<testcase ").count(), 5);
    assert_eq!(xml.matches("<failure ").count(), 2);

    let mut cursor = 0;
    for (name, _) in EXPECTED_ORDER {
        let found = xml[cursor..]
            .find(&format!("name=\"{}\"", name))
            .unwrap_or_else(|| panic!("{} missing or out of order", name));
        cursor += found;
    }
}

#[test]
fn test_failure_text_reaches_report() {
    let stream = TapStream::parse(&tapify(MIXED_OUTPUT).unwrap()).unwrap();
    let xml = render_report("Pairing", &stream, 1).unwrap();
    assert!(xml.contains("mismatch at byte 3 (Pairing.test.c:91)"));
    assert!(xml.contains("classname=\"Pairing.pairing_suite\""));
}

#[test]
fn test_multiple_suites_keep_their_names() {
    let output = "* Suite first:\nPASS a:\n* Suite second:\nSKIP b: not yet\n";
    let assertions = parse_greatest(output);
    assert_eq!(assertions[0].suite.as_deref(), Some("first"));
    assert_eq!(assertions[1].suite.as_deref(), Some("second"));
    assert_eq!(assertions[1].status, AssertionStatus::Skip);
}

#[test]
fn test_emitter_writes_declaration_and_suite() {
    let temp = TempDir::new().unwrap();
    let config = HarnessConfig::with_root(temp.path());
    let result = ExecutionResult::passed(
        "Pairing",
        ToolOutput {
            status: Some(0),
            stdout: "* Suite s:\nPASS only:\n".to_string(),
            stderr: String::new(),
        },
        3,
    );

    let path = ReportEmitter::new(&config).emit_one(&result).unwrap();
    assert_eq!(path, config.results_dir().join("Pairing.xml"));

    let xml = fs::read_to_string(path).unwrap();
    assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<testsuites>"));
    assert!(xml.contains("<testsuite name=\"Pairing\""));
}

#[test]
fn test_emitter_rejects_output_disagreeing_with_totals() {
    let temp = TempDir::new().unwrap();
    let config = HarnessConfig::with_root(temp.path());
    let result = ExecutionResult::passed(
        "Pairing",
        ToolOutput {
            status: Some(0),
            stdout: "* Suite s:\nPASS a:\nwarming up...PASS b:\n\n2 tests - 2 passed, 0 failed, 0 skipped\n"
                .to_string(),
            stderr: String::new(),
        },
        3,
    );

    let err = ReportEmitter::new(&config).emit_one(&result).unwrap_err();
    assert!(matches!(err, HarnessError::ReportGeneration { ref component, .. } if component == "Pairing"));
    assert!(!config.results_dir().join("Pairing.xml").exists());
}

#[test]
fn test_emitter_reports_unwritable_results_dir() {
    let temp = TempDir::new().unwrap();
    let config = HarnessConfig::with_root(temp.path());
    fs::write(config.results_dir(), b"not a directory").unwrap();

    let result = ExecutionResult::passed("Hash", ToolOutput::default(), 0);
    let err = ReportEmitter::new(&config).emit_one(&result).unwrap_err();
    assert!(matches!(err, HarnessError::ReportGeneration { .. }));
    assert!(!err.is_fatal());
}
