//! Test output protocols
//!
//! Test executables print the `greatest` verbose protocol:
//!
//! ```text
//! * Suite cryptid_hash_suite:
//! PASS hash_is_deterministic:
//! FAIL hash_of_empty_input: expected 0 (Hash.test.c:41)
//! SKIP hash_of_huge_input: too slow
//!
//! 3 tests - 1 passed, 1 failed, 1 skipped (9 ticks, 0.000 sec)
//! ```
//!
//! `tapify` normalizes that into a TAP version 13 assertion stream, which
//! `TapStream::parse` reads back for report generation. Lines that belong to
//! neither protocol (test chatter) are ignored, but the assertion lines that
//! were recognized must add up to the totals greatest printed.

use std::fmt;
use thiserror::Error;

/// Result of one assertion line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssertionStatus {
    Pass,
    Fail,
    Skip,
}

/// One test result parsed from native framework output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assertion {
    pub suite: Option<String>,
    pub name: String,
    pub status: AssertionStatus,
    pub message: Option<String>,
}

impl Assertion {
    /// `suite::name` when the suite is known
    pub fn id(&self) -> String {
        match &self.suite {
            Some(suite) => format!("{}::{}", suite, self.name),
            None => self.name.clone(),
        }
    }
}

/// Parse greatest verbose output, keeping input order
pub fn parse_greatest(output: &str) -> Vec<Assertion> {
    let mut suite: Option<String> = None;
    let mut assertions = Vec::new();

    for line in output.lines() {
        let line = line.trim_end();

        if let Some(rest) = line.strip_prefix("* Suite ") {
            suite = Some(rest.trim_end_matches(':').trim().to_string());
            continue;
        }

        let (status, rest) = if let Some(rest) = line.strip_prefix("PASS ") {
            (AssertionStatus::Pass, rest)
        } else if let Some(rest) = line.strip_prefix("FAIL ") {
            (AssertionStatus::Fail, rest)
        } else if let Some(rest) = line.strip_prefix("SKIP ") {
            (AssertionStatus::Skip, rest)
        } else {
            continue;
        };

        // "<name>: <message>"; the name itself never contains ':'
        let (name, message) = match rest.split_once(':') {
            Some((name, message)) => (name.trim(), message.trim()),
            None => (rest.trim(), ""),
        };
        if name.is_empty() || name.contains(char::is_whitespace) {
            continue;
        }

        assertions.push(Assertion {
            suite: suite.clone(),
            name: name.to_string(),
            status,
            message: if message.is_empty() {
                None
            } else {
                Some(message.to_string())
            },
        });
    }

    assertions
}

/// Render assertions as a TAP version 13 stream
pub fn to_tap(assertions: &[Assertion]) -> String {
    let mut tap = String::from("TAP version 13\n");
    tap.push_str(&format!("1..{}\n", assertions.len()));

    for (index, assertion) in assertions.iter().enumerate() {
        let number = index + 1;
        let id = assertion.id();
        match assertion.status {
            AssertionStatus::Pass => tap.push_str(&format!("ok {} - {}\n", number, id)),
            AssertionStatus::Skip => tap.push_str(&format!(
                "ok {} - {} # SKIP {}\n",
                number,
                id,
                assertion.message.as_deref().unwrap_or("")
            )),
            AssertionStatus::Fail => {
                tap.push_str(&format!("not ok {} - {}\n", number, id));
                if let Some(message) = &assertion.message {
                    for line in message.lines() {
                        tap.push_str(&format!("  # {}\n", line));
                    }
                }
            }
        }
    }

    tap
}

/// Pass/fail/skip counts of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Totals {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl Totals {
    pub fn of(assertions: &[Assertion]) -> Self {
        let mut totals = Self::default();
        for assertion in assertions {
            match assertion.status {
                AssertionStatus::Pass => totals.passed += 1,
                AssertionStatus::Fail => totals.failed += 1,
                AssertionStatus::Skip => totals.skipped += 1,
            }
        }
        totals
    }

    fn add(&mut self, other: Totals) {
        self.passed += other.passed;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}

impl fmt::Display for Totals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} passed, {} failed, {} skipped",
            self.passed, self.failed, self.skipped
        )
    }
}

/// Totals printed by greatest itself.
///
/// The closing `Pass: P, fail: F, skip: S.` line wins; without it the
/// per-suite `N tests - P passed, F failed, S skipped` lines are summed.
/// `None` when the output carries neither.
pub fn parse_greatest_totals(output: &str) -> Option<Totals> {
    let mut suites: Option<Totals> = None;

    for line in output.lines() {
        let line = line.trim();
        if let Some(totals) = overall_totals(line) {
            return Some(totals);
        }
        if let Some(totals) = suite_totals(line) {
            suites.get_or_insert_with(Totals::default).add(totals);
        }
    }

    suites
}

/// `Pass: 3, fail: 2, skip: 0.`
fn overall_totals(line: &str) -> Option<Totals> {
    let rest = line.strip_prefix("Pass: ")?.trim_end_matches('.');
    let mut parts = rest.split(',').map(str::trim);

    let passed = parts.next()?.parse().ok()?;
    let failed = parts.next()?.strip_prefix("fail: ")?.parse().ok()?;
    let skipped = parts.next()?.strip_prefix("skip: ")?.parse().ok()?;
    Some(Totals {
        passed,
        failed,
        skipped,
    })
}

/// `3 tests - 1 passed, 1 failed, 1 skipped (9 ticks, 0.000 sec)`
fn suite_totals(line: &str) -> Option<Totals> {
    let (tests, rest) = line.split_once(" - ")?;
    let mut words = tests.split_whitespace();
    words.next()?.parse::<usize>().ok()?;
    if !matches!(words.next(), Some("test" | "tests")) || words.next().is_some() {
        return None;
    }

    let counts = rest.split(" (").next()?;
    let mut totals = Totals::default();
    for part in counts.split(',') {
        let (count, label) = part.trim().split_once(' ')?;
        let count = count.parse().ok()?;
        match label {
            "passed" => totals.passed = count,
            "failed" => totals.failed = count,
            "skipped" => totals.skipped = count,
            _ => return None,
        }
    }
    Some(totals)
}

/// greatest verbose output -> TAP text.
///
/// Fails when the recognized assertion lines disagree with the totals
/// greatest printed, e.g. a result line glued to test chatter.
pub fn tapify(output: &str) -> Result<String, ProtocolError> {
    let assertions = parse_greatest(output);

    if let Some(reported) = parse_greatest_totals(output) {
        let parsed = Totals::of(&assertions);
        if parsed != reported {
            return Err(ProtocolError::TotalsMismatch { reported, parsed });
        }
    }

    Ok(to_tap(&assertions))
}

// =============================================================================
// TAP parsing
// =============================================================================

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("line {line}: malformed test line `{text}`")]
    MalformedTestLine { line: usize, text: String },

    #[error("plan announces {planned} tests but {found} were reported")]
    PlanMismatch { planned: usize, found: usize },

    #[error("line {line}: invalid plan `{text}`")]
    InvalidPlan { line: usize, text: String },

    #[error("test output reports {reported} but its result lines give {parsed}")]
    TotalsMismatch { reported: Totals, parsed: Totals },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TapDirective {
    Skip(String),
    Todo(String),
}

/// One `ok` / `not ok` line plus its diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapEntry {
    pub number: usize,
    pub ok: bool,
    pub description: String,
    pub directive: Option<TapDirective>,
    pub diagnostics: Vec<String>,
}

impl TapEntry {
    pub fn is_skip(&self) -> bool {
        matches!(self.directive, Some(TapDirective::Skip(_)))
    }

    pub fn is_failure(&self) -> bool {
        !self.ok && !matches!(self.directive, Some(TapDirective::Todo(_)))
    }
}

/// Parsed TAP stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TapStream {
    pub plan: Option<usize>,
    pub entries: Vec<TapEntry>,
}

impl TapStream {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let mut stream = TapStream::default();

        for (index, raw) in text.lines().enumerate() {
            let line_no = index + 1;
            let line = raw.trim();

            if line.is_empty() || line.starts_with("TAP version") {
                continue;
            }

            if let Some(diagnostic) = line.strip_prefix('#') {
                if let Some(entry) = stream.entries.last_mut() {
                    entry.diagnostics.push(diagnostic.trim().to_string());
                }
                continue;
            }

            if let Some(count) = line.strip_prefix("1..") {
                let count = count
                    .split_whitespace()
                    .next()
                    .and_then(|c| c.parse().ok())
                    .ok_or_else(|| ProtocolError::InvalidPlan {
                        line: line_no,
                        text: line.to_string(),
                    })?;
                stream.plan = Some(count);
                continue;
            }

            let (ok, rest) = if let Some(rest) = line.strip_prefix("not ok") {
                (false, rest)
            } else if let Some(rest) = line.strip_prefix("ok") {
                (true, rest)
            } else {
                // Unknown lines are allowed by TAP and ignored
                continue;
            };
            // "okay" is prose, not a test line
            if !(rest.is_empty() || rest.starts_with(char::is_whitespace)) {
                continue;
            }

            let entry = parse_test_line(ok, rest, stream.entries.len() + 1).ok_or_else(|| {
                ProtocolError::MalformedTestLine {
                    line: line_no,
                    text: line.to_string(),
                }
            })?;
            stream.entries.push(entry);
        }

        if let Some(planned) = stream.plan {
            if planned != stream.entries.len() {
                return Err(ProtocolError::PlanMismatch {
                    planned,
                    found: stream.entries.len(),
                });
            }
        }

        Ok(stream)
    }

    pub fn passed(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.ok && !e.is_skip())
            .count()
    }

    pub fn failed(&self) -> usize {
        self.entries.iter().filter(|e| e.is_failure()).count()
    }

    pub fn skipped(&self) -> usize {
        self.entries.iter().filter(|e| e.is_skip()).count()
    }
}

fn parse_test_line(ok: bool, rest: &str, next_number: usize) -> Option<TapEntry> {
    let rest = rest.trim_start();

    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    let (number, rest) = if digits.is_empty() {
        (next_number, rest)
    } else {
        let after = &rest[digits.len()..];
        // a test number ends at whitespace: "ok 1x" is malformed
        if !(after.is_empty() || after.starts_with(char::is_whitespace)) {
            return None;
        }
        (digits.parse().ok()?, after.trim_start())
    };

    let rest = rest.strip_prefix('-').unwrap_or(rest).trim_start();
    let (description, directive) = match rest.split_once(" # ") {
        Some((description, directive)) => (description, parse_directive(directive)),
        None => (rest, None),
    };

    Some(TapEntry {
        number,
        ok,
        description: description.trim().to_string(),
        directive,
        diagnostics: Vec::new(),
    })
}

fn parse_directive(text: &str) -> Option<TapDirective> {
    let text = text.trim();
    let (word, reason) = text.split_once(char::is_whitespace).unwrap_or((text, ""));
    match word.to_ascii_uppercase().as_str() {
        "SKIP" => Some(TapDirective::Skip(reason.trim().to_string())),
        "TODO" => Some(TapDirective::Todo(reason.trim().to_string())),
        _ => None,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const GREATEST_OUTPUT: &str = "\
--lowest-quick-check detected: only the LOWEST level will be checked
* Suite cryptid_hash_suite:
PASS hash_is_deterministic:
FAIL hash_of_empty_input: expected 0, got 1 (Hash.test.c:41)
SKIP hash_of_huge_input: too slow

3 tests - 1 passed, 1 failed, 1 skipped (9 ticks, 0.000 sec)
";

    #[test]
    fn test_parse_greatest_lines() {
        let assertions = parse_greatest(GREATEST_OUTPUT);
        assert_eq!(assertions.len(), 3);

        assert_eq!(assertions[0].suite.as_deref(), Some("cryptid_hash_suite"));
        assert_eq!(assertions[0].name, "hash_is_deterministic");
        assert_eq!(assertions[0].status, AssertionStatus::Pass);
        assert_eq!(assertions[0].message, None);

        assert_eq!(assertions[1].status, AssertionStatus::Fail);
        // only the first ':' separates name from message
        assert_eq!(
            assertions[1].message.as_deref(),
            Some("expected 0, got 1 (Hash.test.c:41)")
        );

        assert_eq!(assertions[2].status, AssertionStatus::Skip);
    }

    #[test]
    fn test_parse_greatest_without_suite_header() {
        let assertions = parse_greatest("PASS lonely_test: \n");
        assert_eq!(assertions[0].suite, None);
        assert_eq!(assertions[0].id(), "lonely_test");
    }

    #[test]
    fn test_parse_greatest_ignores_prose_starting_with_keywords() {
        let assertions = parse_greatest("PASS the salt please: now\nFAILURE is not an option\n");
        assert!(assertions.is_empty());
    }

    #[test]
    fn test_tapify_output() {
        let tap = tapify(GREATEST_OUTPUT).unwrap();
        let lines: Vec<&str> = tap.lines().collect();
        assert_eq!(lines[0], "TAP version 13");
        assert_eq!(lines[1], "1..3");
        assert_eq!(lines[2], "ok 1 - cryptid_hash_suite::hash_is_deterministic");
        assert_eq!(lines[3], "not ok 2 - cryptid_hash_suite::hash_of_empty_input");
        assert_eq!(lines[4], "  # expected 0, got 1 (Hash.test.c:41)");
        assert_eq!(
            lines[5],
            "ok 3 - cryptid_hash_suite::hash_of_huge_input # SKIP too slow"
        );
    }

    #[test]
    fn test_suite_totals_are_summed() {
        let output = "\
* Suite a:
PASS one:

1 test - 1 passed, 0 failed, 0 skipped (1 ticks, 0.000 sec)
* Suite b:
FAIL two: no

1 test - 0 passed, 1 failed, 0 skipped (1 ticks, 0.000 sec)
";
        assert_eq!(
            parse_greatest_totals(output),
            Some(Totals {
                passed: 1,
                failed: 1,
                skipped: 0
            })
        );
        assert!(tapify(output).is_ok());
    }

    #[test]
    fn test_overall_totals_line_wins() {
        let output = "2 tests - 2 passed, 0 failed, 0 skipped\nPass: 5, fail: 1, skip: 2.\n";
        assert_eq!(
            parse_greatest_totals(output),
            Some(Totals {
                passed: 5,
                failed: 1,
                skipped: 2
            })
        );
    }

    #[test]
    fn test_output_without_totals_is_not_checked() {
        assert_eq!(parse_greatest_totals("PASS a:\nsome - chatter here\n"), None);
        assert!(tapify("PASS a:\n").is_ok());
    }

    #[test]
    fn test_glued_result_line_is_a_totals_mismatch() {
        let output = "\
* Suite hash_suite:
PASS hash_is_deterministic:
seeding rng...PASS hash_of_empty_input:

2 tests - 2 passed, 0 failed, 0 skipped (3 ticks, 0.000 sec)
";
        let err = tapify(output).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::TotalsMismatch {
                reported: Totals {
                    passed: 2,
                    failed: 0,
                    skipped: 0
                },
                parsed: Totals {
                    passed: 1,
                    failed: 0,
                    skipped: 0
                },
            }
        );
    }

    #[test]
    fn test_tap_parse_counts() {
        let stream = TapStream::parse(&tapify(GREATEST_OUTPUT).unwrap()).unwrap();
        assert_eq!(stream.plan, Some(3));
        assert_eq!(stream.passed(), 1);
        assert_eq!(stream.failed(), 1);
        assert_eq!(stream.skipped(), 1);
        assert_eq!(
            stream.entries[1].diagnostics,
            vec!["expected 0, got 1 (Hash.test.c:41)"]
        );
    }

    #[test]
    fn test_tap_parse_plan_mismatch() {
        let err = TapStream::parse("1..2\nok 1 - only\n").unwrap_err();
        assert_eq!(err, ProtocolError::PlanMismatch { planned: 2, found: 1 });
    }

    #[test]
    fn test_tap_parse_invalid_plan() {
        let err = TapStream::parse("1..many\n").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidPlan { line: 1, .. }));
    }

    #[test]
    fn test_tap_parse_malformed_line() {
        let err = TapStream::parse("ok 1x - bad\n").unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedTestLine { .. }));
    }

    #[test]
    fn test_tap_parse_without_numbers_or_plan() {
        let stream = TapStream::parse("ok - first\nnot ok - second # TODO later\nokay\n").unwrap();
        assert_eq!(stream.plan, None);
        assert_eq!(stream.entries.len(), 2);
        assert_eq!(stream.entries[1].number, 2);
        // TODO failures do not count as failures
        assert_eq!(stream.failed(), 0);
    }

    #[test]
    fn test_empty_output_gives_empty_plan() {
        let stream = TapStream::parse(&tapify("no tests here\n").unwrap()).unwrap();
        assert_eq!(stream.plan, Some(0));
        assert!(stream.entries.is_empty());
    }
}
