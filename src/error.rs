//! Error taxonomy for the harness
//!
//! Every failure the pipeline can produce is a `HarnessError`. Callers inspect
//! `kind()` to decide whether a failure is isolated to one component or must
//! abort the whole command.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Captured result of one external process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code, `None` when the process was killed by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    pub fn status_label(&self) -> String {
        match self.status {
            Some(code) => format!("exit status {}", code),
            None => "termination by signal".to_string(),
        }
    }
}

/// A tool ran but exited non-zero
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolFailure {
    /// Rendered command line
    pub command: String,
    pub output: ToolOutput,
}

impl fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}` failed with {}", self.command, self.output.status_label())?;
        let stderr = self.output.stderr.trim();
        if !stderr.is_empty() {
            // Compiler diagnostics can be long; the tail carries the cause
            let tail: Vec<&str> = stderr.lines().rev().take(20).collect();
            for line in tail.into_iter().rev() {
                write!(f, "\n  {}", line)?;
            }
        }
        Ok(())
    }
}

/// Classification of failures (see `HarnessError::kind`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Compilation,
    MissingComponentSource,
    Execution,
    ReportGeneration,
    ToolInvocation,
    Cleanup,
    Configuration,
    Io,
}

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("compilation failed: {0}")]
    Compilation(ToolFailure),

    #[error("component {component} does not exist ({})", .path.display())]
    MissingComponentSource { component: String, path: PathBuf },

    #[error("archiving failed: {0}")]
    Archive(ToolFailure),

    #[error("{0}")]
    ToolInvocation(ToolFailure),

    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("report for {component} could not be generated: {message}")]
    ReportGeneration { component: String, message: String },

    #[error("{stage} failed for {} component(s): {}", .failed.len(), .failed.join(", "))]
    ComponentFailures { stage: String, failed: Vec<String> },

    #[error("components {} and {} share the name {name}", .first.display(), .second.display())]
    DuplicateComponent {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("no merged coverage data at {} (run `coverage` first)", .0.display())]
    MissingCoverageData(PathBuf),

    #[error("failed to remove {}: {source}", .path.display())]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid file pattern {pattern}: {message}")]
    Pattern { pattern: String, message: String },

    #[error("directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    pub fn kind(&self) -> FailureKind {
        match self {
            HarnessError::Compilation(_) => FailureKind::Compilation,
            HarnessError::MissingComponentSource { .. } => FailureKind::MissingComponentSource,
            HarnessError::ComponentFailures { .. } => FailureKind::Execution,
            HarnessError::ReportGeneration { .. } => FailureKind::ReportGeneration,
            HarnessError::Archive(_)
            | HarnessError::ToolInvocation(_)
            | HarnessError::Spawn { .. }
            | HarnessError::MissingCoverageData(_) => FailureKind::ToolInvocation,
            HarnessError::Cleanup { .. } => FailureKind::Cleanup,
            HarnessError::Config(_)
            | HarnessError::Pattern { .. }
            | HarnessError::DuplicateComponent { .. } => FailureKind::Configuration,
            HarnessError::Walk(_) | HarnessError::Io(_) => FailureKind::Io,
        }
    }

    /// Fatal errors abort the current command. Report and cleanup failures
    /// are logged and never escalate on their own.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self.kind(),
            FailureKind::ReportGeneration | FailureKind::Cleanup
        )
    }

    /// Reclassify a generic tool failure raised by the compiler
    pub fn into_compilation(self) -> Self {
        match self {
            HarnessError::ToolInvocation(failure) => HarnessError::Compilation(failure),
            other => other,
        }
    }

    /// Reclassify a generic tool failure raised by the archiver
    pub fn into_archive(self) -> Self {
        match self {
            HarnessError::ToolInvocation(failure) => HarnessError::Archive(failure),
            other => other,
        }
    }

    /// The captured tool result, when the error carries one
    pub fn tool_failure(&self) -> Option<&ToolFailure> {
        match self {
            HarnessError::Compilation(f)
            | HarnessError::Archive(f)
            | HarnessError::ToolInvocation(f) => Some(f),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(code: Option<i32>, stderr: &str) -> ToolFailure {
        ToolFailure {
            command: "gcc -c a.c".to_string(),
            output: ToolOutput {
                status: code,
                stdout: String::new(),
                stderr: stderr.to_string(),
            },
        }
    }

    #[test]
    fn test_compiler_failure_is_reclassified() {
        let err = HarnessError::ToolInvocation(failure(Some(1), "a.c:1: error")).into_compilation();
        assert_eq!(err.kind(), FailureKind::Compilation);
        assert!(err.is_fatal());
        assert_eq!(err.tool_failure().unwrap().output.status, Some(1));
    }

    #[test]
    fn test_reclassification_leaves_other_errors_alone() {
        let err = HarnessError::Config("bad".into()).into_archive();
        assert_eq!(err.kind(), FailureKind::Configuration);
    }

    #[test]
    fn test_report_and_cleanup_failures_are_not_fatal() {
        let report = HarnessError::ReportGeneration {
            component: "Hash".into(),
            message: "bad plan".into(),
        };
        assert!(!report.is_fatal());

        let cleanup = HarnessError::Cleanup {
            path: PathBuf::from("a.o"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(!cleanup.is_fatal());
    }

    #[test]
    fn test_tool_failure_display_includes_stderr_tail() {
        let text = failure(Some(2), "line one\nline two").to_string();
        assert!(text.contains("exit status 2"));
        assert!(text.contains("line two"));
    }

    #[test]
    fn test_signal_termination_label() {
        let text = failure(None, "").to_string();
        assert!(text.contains("termination by signal"));
    }

    #[test]
    fn test_component_failures_message_lists_names() {
        let err = HarnessError::ComponentFailures {
            stage: "tests".into(),
            failed: vec!["Pairing".into(), "Hash".into()],
        };
        assert_eq!(err.to_string(), "tests failed for 2 component(s): Pairing, Hash");
        assert_eq!(err.kind(), FailureKind::Execution);
    }
}
