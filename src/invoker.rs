//! External tool invocation
//!
//! Every compiler, archiver, analyzer and test executable run goes through a
//! `ToolRunner`. One call spawns exactly one process, blocks until it exits,
//! and turns a non-zero exit into `HarnessError::ToolInvocation`. There are no
//! retries at this layer or above it.

use crate::error::{HarnessError, Result, ToolFailure, ToolOutput};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use tracing::debug;

/// A single external process invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Bytes fed to the child's stdin
    pub stdin: Option<Vec<u8>>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            stdin: None,
        }
    }

    /// Invocation of an executable addressed by path
    pub fn executable(path: &Path) -> Self {
        Self::new(path.to_string_lossy())
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn arg_path(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy())
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// File name of the program, without any directory part
    pub fn program_name(&self) -> &str {
        Path::new(&self.program)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.program)
    }

    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }

    /// Value following `flag`, e.g. the path after `-o`
    pub fn value_after(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", quote(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", quote(arg))?;
        }
        Ok(())
    }
}

fn quote(s: &str) -> String {
    if s.is_empty() || s.contains(char::is_whitespace) {
        format!("'{}'", s.replace('\'', "'\\''"))
    } else {
        s.to_string()
    }
}

/// Runs external processes synchronously
pub trait ToolRunner {
    /// Run `invocation` to completion.
    ///
    /// Returns the captured output on exit status 0, and
    /// `HarnessError::ToolInvocation` carrying the same output otherwise.
    fn invoke(&self, invocation: &Invocation) -> Result<ToolOutput>;
}

/// Production runner backed by `std::process::Command`
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl ToolRunner for ProcessRunner {
    fn invoke(&self, invocation: &Invocation) -> Result<ToolOutput> {
        debug!(command = %invocation, "invoking");

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });
        if let Some(dir) = &invocation.cwd {
            command.current_dir(dir);
        }

        let spawn_error = |source| HarnessError::Spawn {
            program: invocation.program.clone(),
            source,
        };

        let mut child = command.spawn().map_err(spawn_error)?;

        // Feed stdin from a separate thread so a child that fills its stdout
        // pipe before draining stdin cannot deadlock us.
        let feeder = match (invocation.stdin.clone(), child.stdin.take()) {
            (Some(bytes), Some(mut pipe)) => Some(thread::spawn(move || pipe.write_all(&bytes))),
            _ => None,
        };

        let output = child.wait_with_output().map_err(spawn_error)?;

        if let Some(feeder) = feeder {
            // A child may legitimately exit without reading all of its input
            if let Ok(Err(e)) = feeder.join() {
                debug!("stdin of {} closed early: {}", invocation.program_name(), e);
            }
        }

        let result = ToolOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if result.success() {
            Ok(result)
        } else {
            debug!(command = %invocation, status = ?result.status, "tool failed");
            Err(HarnessError::ToolInvocation(ToolFailure {
                command: invocation.to_string(),
                output: result,
            }))
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_builder_and_display() {
        let inv = Invocation::new("gcc")
            .args(["-c", "a.c"])
            .arg("-DNAME=with space")
            .current_dir(Path::new("/tmp"));
        assert_eq!(inv.to_string(), "gcc -c a.c '-DNAME=with space'");
        assert_eq!(inv.cwd, Some(PathBuf::from("/tmp")));
        assert!(inv.has_arg("-c"));
    }

    #[test]
    fn test_value_after_flag() {
        let inv = Invocation::new("gcc").args(["x.c", "-o", "x.out", "-lm"]);
        assert_eq!(inv.value_after("-o"), Some("x.out"));
        assert_eq!(inv.value_after("-lm"), None);
        assert_eq!(inv.value_after("-g"), None);
    }

    #[test]
    fn test_program_name_strips_directory() {
        let inv = Invocation::executable(Path::new("/project/Hash.out"));
        assert_eq!(inv.program_name(), "Hash.out");
        assert_eq!(Invocation::new("valgrind").program_name(), "valgrind");
    }

    #[cfg(unix)]
    #[test]
    fn test_process_runner_captures_stdout() {
        let out = ProcessRunner
            .invoke(&Invocation::new("sh").args(["-c", "echo hello; echo oops >&2"]))
            .unwrap();
        assert_eq!(out.status, Some(0));
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
    }

    #[cfg(unix)]
    #[test]
    fn test_process_runner_nonzero_exit_carries_output() {
        let err = ProcessRunner
            .invoke(&Invocation::new("sh").args(["-c", "echo partial; exit 3"]))
            .unwrap_err();
        let failure = err.tool_failure().expect("tool failure");
        assert_eq!(failure.output.status, Some(3));
        assert_eq!(failure.output.stdout.trim(), "partial");
    }

    #[cfg(unix)]
    #[test]
    fn test_process_runner_feeds_stdin() {
        let out = ProcessRunner
            .invoke(&Invocation::new("cat").stdin("piped input"))
            .unwrap();
        assert_eq!(out.stdout, "piped input");
    }

    #[cfg(unix)]
    #[test]
    fn test_process_runner_respects_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let out = ProcessRunner
            .invoke(&Invocation::new("pwd").current_dir(dir.path()))
            .unwrap();
        assert_eq!(
            PathBuf::from(out.stdout.trim()).canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }

    #[test]
    fn test_process_runner_missing_program_is_spawn_error() {
        let err = ProcessRunner
            .invoke(&Invocation::new("definitely-not-a-real-tool-4711"))
            .unwrap_err();
        assert!(matches!(err, HarnessError::Spawn { .. }));
    }
}
