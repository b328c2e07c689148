//! Sequential test orchestration
//!
//! One run is: compile everything once, then for each component in order
//! link, execute and capture. A failing component is recorded and the next
//! one still runs; a failing compilation aborts the run. Objects and
//! executables are removed on every exit path.
//!
//! What happens to a linked executable is a `ComponentExecutor`: the test
//! run executes it verbosely, memory checks run it under the analyzer.

use crate::compiler::{BuildMode, SourceCompiler, TestExecutableBuilder};
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result, ToolOutput};
use crate::invoker::{Invocation, ToolRunner};
use crate::lifecycle::{ArtifactGuard, OBJECT_GLOBS};
use crate::reporter::Reporter;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

/// Runtime flag that makes the test framework print every assertion
pub const VERBOSE_FLAG: &str = "-v";

/// Which stage produced an isolated failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionFailureKind {
    /// The test executable exited non-zero or could not be started
    Test,
    /// The memory analyzer reported errors for the executable
    Analyzer,
}

/// Why one component failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionFailure {
    pub kind: ExecutionFailureKind,
    pub message: String,
}

/// Outcome of executing one component
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub component: String,
    pub exit_status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub failure: Option<ExecutionFailure>,
}

impl ExecutionResult {
    pub fn passed(component: &str, output: ToolOutput, duration_ms: u64) -> Self {
        Self {
            component: component.to_string(),
            exit_status: output.status,
            stdout: output.stdout,
            stderr: output.stderr,
            duration_ms,
            failure: None,
        }
    }

    /// Build a failed result from the error raised by the tool runner
    pub fn failed(
        component: &str,
        kind: ExecutionFailureKind,
        error: HarnessError,
        duration_ms: u64,
    ) -> Self {
        let message = match error.tool_failure() {
            Some(failure) => failure.output.status_label(),
            None => error.to_string(),
        };
        let output = match error {
            HarnessError::ToolInvocation(failure) => failure.output,
            _ => ToolOutput::default(),
        };
        Self {
            component: component.to_string(),
            exit_status: output.status,
            stdout: output.stdout,
            stderr: output.stderr,
            duration_ms,
            failure: Some(ExecutionFailure { kind, message }),
        }
    }

    /// Passed or isolated-failed result of one timed tool invocation
    pub fn from_invocation(
        component: &str,
        kind: ExecutionFailureKind,
        invoked: Result<ToolOutput>,
        started: Instant,
    ) -> Self {
        let duration_ms = started.elapsed().as_millis() as u64;
        match invoked {
            Ok(output) => Self::passed(component, output, duration_ms),
            Err(e) => Self::failed(component, kind, e, duration_ms),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn status_str(&self) -> &'static str {
        if self.is_success() {
            "pass"
        } else {
            "fail"
        }
    }
}

/// Every component's result, in the order the components were supplied
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateOutcome {
    pub results: Vec<ExecutionResult>,
    pub duration_ms: u64,
}

impl AggregateOutcome {
    pub fn failures(&self) -> Vec<&ExecutionResult> {
        self.results.iter().filter(|r| !r.is_success()).collect()
    }

    pub fn passed(&self) -> Vec<&ExecutionResult> {
        self.results.iter().filter(|r| r.is_success()).collect()
    }

    pub fn failed_components(&self) -> Vec<String> {
        self.failures().iter().map(|r| r.component.clone()).collect()
    }

    pub fn is_success(&self) -> bool {
        self.results.iter().all(ExecutionResult::is_success)
    }

    pub fn result(&self, component: &str) -> Option<&ExecutionResult> {
        self.results.iter().find(|r| r.component == component)
    }

    /// Convert a failed outcome into the aggregate error for `stage`
    pub fn into_result(self, stage: &str) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(HarnessError::ComponentFailures {
                stage: stage.to_string(),
                failed: self.failed_components(),
            })
        }
    }
}

/// What to do with a component's linked executable.
///
/// `Err` aborts the whole run; failures confined to the component belong
/// in the returned result.
pub trait ComponentExecutor {
    fn execute(&self, component: &str, executable: &Path) -> Result<ExecutionResult>;
}

/// Runs the executable itself with the framework's verbose flag
pub struct VerboseExecutor<'a> {
    config: &'a HarnessConfig,
    runner: &'a dyn ToolRunner,
}

impl<'a> VerboseExecutor<'a> {
    pub fn new(config: &'a HarnessConfig, runner: &'a dyn ToolRunner) -> Self {
        Self { config, runner }
    }
}

impl ComponentExecutor for VerboseExecutor<'_> {
    fn execute(&self, component: &str, executable: &Path) -> Result<ExecutionResult> {
        let invocation = Invocation::executable(executable)
            .arg(VERBOSE_FLAG)
            .current_dir(&self.config.root);

        let started = Instant::now();
        Ok(ExecutionResult::from_invocation(
            component,
            ExecutionFailureKind::Test,
            self.runner.invoke(&invocation),
            started,
        ))
    }
}

/// Drives compilation and per-component execution
pub struct TestOrchestrator<'a> {
    config: &'a HarnessConfig,
    runner: &'a dyn ToolRunner,
}

impl<'a> TestOrchestrator<'a> {
    pub fn new(config: &'a HarnessConfig, runner: &'a dyn ToolRunner) -> Self {
        Self { config, runner }
    }

    /// Compile once with `mode`, then link and execute every component.
    ///
    /// Returns `Err` only for fatal failures (compilation, missing component
    /// source, link errors); failing executables are recorded in the outcome.
    pub fn run(
        &self,
        components: &[String],
        mode: &BuildMode,
        reporter: &mut dyn Reporter,
    ) -> Result<AggregateOutcome> {
        let stage = if mode.instrumented { "coverage" } else { "tests" };
        let executor = VerboseExecutor::new(self.config, self.runner);
        self.run_with(stage, components, mode, &executor, reporter)
    }

    /// `run` with a custom executor, reported under `stage`
    pub fn run_with(
        &self,
        stage: &str,
        components: &[String],
        mode: &BuildMode,
        executor: &dyn ComponentExecutor,
        reporter: &mut dyn Reporter,
    ) -> Result<AggregateOutcome> {
        let _objects = ArtifactGuard::for_patterns(&self.config.root, "objects", OBJECT_GLOBS);

        let start = Instant::now();
        let mode = BuildMode {
            debug_symbols: true,
            ..mode.clone()
        };
        SourceCompiler::new(self.config, self.runner).compile_all(&mode)?;

        info!("Running {} component(s) for {}", components.len(), stage);
        reporter.on_run_start(stage, components.len());
        let builder = TestExecutableBuilder::new(self.config, self.runner);
        let mut outcome = AggregateOutcome::default();

        for component in components {
            debug!("linking and running {}", component);
            reporter.on_component_start(component);

            let result = self.run_component(&builder, executor, component, &mode)?;
            reporter.on_component_finished(&result);
            outcome.results.push(result);
        }

        outcome.duration_ms = start.elapsed().as_millis() as u64;
        reporter.on_run_finished(
            stage,
            outcome.passed().len(),
            outcome.failures().len(),
            outcome.duration_ms,
        );

        Ok(outcome)
    }

    fn run_component(
        &self,
        builder: &TestExecutableBuilder<'_>,
        executor: &dyn ComponentExecutor,
        component: &str,
        mode: &BuildMode,
    ) -> Result<ExecutionResult> {
        // guarded before linking: a failed link may leave partial output
        let _executable =
            ArtifactGuard::for_path(&self.config.executable_path(component), "executable");

        let executable = builder.build_executable(component, mode)?;
        executor.execute(component, &executable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolFailure;

    fn output(code: i32, stdout: &str) -> ToolOutput {
        ToolOutput {
            status: Some(code),
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    #[test]
    fn test_failed_result_keeps_captured_streams() {
        let error = HarnessError::ToolInvocation(ToolFailure {
            command: "./Pairing.out -v".into(),
            output: output(1, "FAIL test_pairing"),
        });
        let result = ExecutionResult::failed("Pairing", ExecutionFailureKind::Test, error, 5);

        assert_eq!(result.exit_status, Some(1));
        assert_eq!(result.stdout, "FAIL test_pairing");
        assert_eq!(result.failure.as_ref().unwrap().message, "exit status 1");
        assert_eq!(result.status_str(), "fail");
    }

    #[test]
    fn test_failed_result_from_spawn_error() {
        let error = HarnessError::Spawn {
            program: "./Hash.out".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        };
        let result = ExecutionResult::failed("Hash", ExecutionFailureKind::Test, error, 0);
        assert_eq!(result.exit_status, None);
        assert!(result.failure.unwrap().message.contains("failed to spawn"));
    }

    #[test]
    fn test_outcome_preserves_order_and_collects_failures() {
        let outcome = AggregateOutcome {
            results: vec![
                ExecutionResult::passed("Hash", output(0, ""), 1),
                ExecutionResult {
                    failure: Some(ExecutionFailure {
                        kind: ExecutionFailureKind::Test,
                        message: "exit status 1".into(),
                    }),
                    ..ExecutionResult::passed("Pairing", output(1, ""), 1)
                },
                ExecutionResult::passed("Complex", output(0, ""), 1),
            ],
            duration_ms: 3,
        };

        assert!(!outcome.is_success());
        assert_eq!(outcome.failed_components(), vec!["Pairing"]);
        let names: Vec<_> = outcome.passed().iter().map(|r| r.component.as_str()).collect();
        assert_eq!(names, vec!["Hash", "Complex"]);

        let err = outcome.into_result("tests").unwrap_err();
        assert!(matches!(err, HarnessError::ComponentFailures { ref failed, .. } if failed == &vec!["Pairing".to_string()]));
    }

    #[test]
    fn test_from_invocation_classifies_by_result() {
        let started = Instant::now();
        let passed = ExecutionResult::from_invocation(
            "Hash",
            ExecutionFailureKind::Test,
            Ok(output(0, "PASS a:")),
            started,
        );
        assert!(passed.is_success());

        let failed = ExecutionResult::from_invocation(
            "Hash",
            ExecutionFailureKind::Analyzer,
            Err(HarnessError::ToolInvocation(ToolFailure {
                command: "valgrind ./Hash.out".into(),
                output: output(1, ""),
            })),
            started,
        );
        assert_eq!(failed.failure.unwrap().kind, ExecutionFailureKind::Analyzer);
    }

    #[test]
    fn test_empty_outcome_is_success() {
        assert!(AggregateOutcome::default().into_result("tests").is_ok());
    }
}
