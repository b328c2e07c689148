//! JUnit XML reports for CI integration
//!
//! Each passed component's captured stdout is normalized to TAP
//! (`protocol::tapify`), re-parsed, and written as
//! `<results>/<component>.xml` with one `<testsuite>` named after the
//! component. Failed components get no file. A conversion problem for one
//! component is logged and never fails the run.

use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::orchestrator::{AggregateOutcome, ExecutionResult};
use crate::protocol::{tapify, TapDirective, TapEntry, TapStream};
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tracing::{info, warn};

const XML_DECLARATION: &[u8] = b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";

/// Strip ANSI color codes and NUL bytes from strings
fn strip_ansi_codes(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\x1b' {
            if chars.peek() == Some(&'[') {
                chars.next();
                // CSI sequences end at the first letter
                while let Some(&next) = chars.peek() {
                    chars.next();
                    if next.is_ascii_alphabetic() {
                        break;
                    }
                }
            }
        } else if c != '\0' {
            result.push(c);
        }
    }
    result
}

// =============================================================================
// XML Schema Structs (JUnit Format)
// =============================================================================

#[derive(Serialize)]
#[serde(rename = "testsuites")]
struct TestSuites {
    #[serde(rename = "testsuite")]
    suites: Vec<TestSuite>,
}

#[derive(Serialize)]
struct TestSuite {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@tests")]
    tests: usize,
    #[serde(rename = "@failures")]
    failures: usize,
    #[serde(rename = "@errors")]
    errors: usize,
    #[serde(rename = "@skipped")]
    skipped: usize,
    #[serde(rename = "@time")]
    time: f64,
    #[serde(rename = "testcase")]
    cases: Vec<TestCase>,
}

#[derive(Serialize)]
struct TestCase {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@classname")]
    classname: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure: Option<Failure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    skipped: Option<Skipped>,
}

#[derive(Serialize)]
struct Failure {
    #[serde(rename = "@message")]
    message: String,
    #[serde(rename = "$text")]
    body: String,
}

#[derive(Serialize)]
struct Skipped {
    #[serde(rename = "@message")]
    message: String,
}

impl TestCase {
    /// "suite::test" -> classname `<component>.suite`, name `test`
    fn from_entry(component: &str, entry: &TapEntry) -> Self {
        let (classname, name) = match entry.description.split_once("::") {
            Some((suite, test)) => (format!("{}.{}", component, suite), test.to_string()),
            None => (component.to_string(), entry.description.clone()),
        };

        let failure = entry.is_failure().then(|| {
            let body = strip_ansi_codes(&entry.diagnostics.join("\n"));
            Failure {
                message: body
                    .lines()
                    .next()
                    .unwrap_or("Test failed")
                    .to_string(),
                body,
            }
        });

        let skipped = match &entry.directive {
            Some(TapDirective::Skip(reason)) => Some(Skipped {
                message: strip_ansi_codes(reason),
            }),
            _ => None,
        };

        Self {
            name,
            classname,
            failure,
            skipped,
        }
    }
}

/// Render one component's assertion stream as a JUnit document
pub fn render_report(component: &str, stream: &TapStream, duration_ms: u64) -> Result<String> {
    let suite = TestSuite {
        name: component.to_string(),
        tests: stream.entries.len(),
        failures: stream.failed(),
        errors: 0,
        skipped: stream.skipped(),
        time: duration_ms as f64 / 1000.0,
        cases: stream
            .entries
            .iter()
            .map(|entry| TestCase::from_entry(component, entry))
            .collect(),
    };
    let root = TestSuites {
        suites: vec![suite],
    };

    quick_xml::se::to_string(&root).map_err(|e| HarnessError::ReportGeneration {
        component: component.to_string(),
        message: e.to_string(),
    })
}

// =============================================================================
// ReportEmitter
// =============================================================================

/// Written and failed report files of one `emit` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmitSummary {
    pub written: Vec<PathBuf>,
    pub failed: Vec<String>,
}

pub struct ReportEmitter {
    results_dir: PathBuf,
}

impl ReportEmitter {
    pub fn new(config: &HarnessConfig) -> Self {
        Self {
            results_dir: config.results_dir(),
        }
    }

    pub fn report_path(&self, component: &str) -> PathBuf {
        self.results_dir.join(format!("{}.xml", component))
    }

    /// Write a report for every passed component of `outcome`
    pub fn emit(&self, outcome: &AggregateOutcome) -> EmitSummary {
        let mut summary = EmitSummary::default();

        for result in outcome.passed() {
            match self.emit_one(result) {
                Ok(path) => {
                    info!("Wrote {}", path.display());
                    summary.written.push(path);
                }
                Err(e) => {
                    warn!("{}", e);
                    summary.failed.push(result.component.clone());
                }
            }
        }

        summary
    }

    /// Convert one component's captured output and write its report file
    pub fn emit_one(&self, result: &ExecutionResult) -> Result<PathBuf> {
        let component = &result.component;
        let to_report_error = |message: String| HarnessError::ReportGeneration {
            component: component.clone(),
            message,
        };

        let tap = tapify(&result.stdout).map_err(|e| to_report_error(e.to_string()))?;
        let stream = TapStream::parse(&tap).map_err(|e| to_report_error(e.to_string()))?;
        let xml = render_report(component, &stream, result.duration_ms)?;

        fs::create_dir_all(&self.results_dir).map_err(|e| to_report_error(e.to_string()))?;
        let path = self.report_path(component);
        let mut file = fs::File::create(&path).map_err(|e| to_report_error(e.to_string()))?;
        file.write_all(XML_DECLARATION)
            .and_then(|_| file.write_all(xml.as_bytes()))
            .map_err(|e| to_report_error(e.to_string()))?;

        Ok(path)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolOutput;
    use crate::orchestrator::{ExecutionFailure, ExecutionFailureKind};
    use tempfile::TempDir;

    const HASH_OUTPUT: &str = "\
* Suite hash_suite:
PASS hash_is_deterministic:
PASS hash_differs_on_input:
PASS hash_of_empty_input:

3 tests - 3 passed, 0 failed, 0 skipped (4 ticks, 0.000 sec)
";

    fn passed(component: &str, stdout: &str) -> ExecutionResult {
        ExecutionResult::passed(
            component,
            ToolOutput {
                status: Some(0),
                stdout: stdout.to_string(),
                stderr: String::new(),
            },
            12,
        )
    }

    #[test]
    fn test_strip_ansi_codes() {
        assert_eq!(strip_ansi_codes("\x1b[31mRed text\x1b[0m"), "Red text");
        assert_eq!(strip_ansi_codes("plain text"), "plain text");
        assert_eq!(strip_ansi_codes("\x1b[1;31;40mColored\x1b[0m normal"), "Colored normal");
        assert_eq!(strip_ansi_codes("text\0with\0nulls"), "textwithnulls");
    }

    #[test]
    fn test_case_classname_from_suite() {
        let stream = TapStream::parse(&tapify(HASH_OUTPUT).unwrap()).unwrap();
        let case = TestCase::from_entry("Hash", &stream.entries[0]);
        assert_eq!(case.classname, "Hash.hash_suite");
        assert_eq!(case.name, "hash_is_deterministic");
        assert!(case.failure.is_none());
    }

    #[test]
    fn test_failure_message_strips_ansi() {
        let stream =
            TapStream::parse("not ok 1 - check\n  # \x1b[31mexpected 1\x1b[0m (a.c:3)\n").unwrap();
        let case = TestCase::from_entry("Hash", &stream.entries[0]);
        let failure = case.failure.unwrap();
        assert_eq!(failure.body, "expected 1 (a.c:3)");
        assert_eq!(case.classname, "Hash");
    }

    #[test]
    fn test_render_report_counts() {
        let output = "PASS a:\nFAIL b: nope\nSKIP c: later\n";
        let stream = TapStream::parse(&tapify(output).unwrap()).unwrap();
        let xml = render_report("Pairing", &stream, 1500).unwrap();

        assert!(xml.starts_with("<testsuites>"));
        assert!(xml.contains("name=\"Pairing\""));
        assert!(xml.contains("tests=\"3\""));
        assert!(xml.contains("failures=\"1\""));
        assert!(xml.contains("skipped=\"1\""));
        assert_eq!(xml.matches("<testcase ").count(), 3);
        assert!(xml.contains("<skipped message=\"later\""));
    }

    #[test]
    fn test_emit_writes_one_file_per_passed_component() {
        let temp = TempDir::new().unwrap();
        let config = HarnessConfig::with_root(temp.path());
        let emitter = ReportEmitter::new(&config);

        let outcome = AggregateOutcome {
            results: vec![
                passed("Hash", HASH_OUTPUT),
                ExecutionResult {
                    failure: Some(ExecutionFailure {
                        kind: ExecutionFailureKind::Test,
                        message: "exit status 1".into(),
                    }),
                    ..passed("Pairing", "FAIL pairing_is_bilinear: no\n")
                },
            ],
            duration_ms: 24,
        };

        let summary = emitter.emit(&outcome);
        assert_eq!(summary.written, vec![config.results_dir().join("Hash.xml")]);
        assert!(summary.failed.is_empty());
        assert!(!config.results_dir().join("Pairing.xml").exists());

        let xml = fs::read_to_string(config.results_dir().join("Hash.xml")).unwrap();
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert_eq!(xml.matches("<testcase ").count(), 3);
        assert!(!xml.contains("<failure"));
    }

    #[test]
    fn test_emit_logs_and_continues_when_results_dir_is_blocked() {
        let temp = TempDir::new().unwrap();
        let config = HarnessConfig::with_root(temp.path());
        // a file where the results directory should be
        fs::write(config.results_dir(), b"").unwrap();

        let outcome = AggregateOutcome {
            results: vec![passed("Hash", HASH_OUTPUT)],
            duration_ms: 1,
        };
        let summary = ReportEmitter::new(&config).emit(&outcome);
        assert!(summary.written.is_empty());
        assert_eq!(summary.failed, vec!["Hash"]);
    }
}
