//! Reporter Module: Trait-based output for Human (CLI) and Machine (JSON) formats
//!
//! ## Architecture
//!
//! - `Reporter` trait defines the event callbacks of one run
//! - `JsonReporter` outputs NDJSON to stdout (for --format=json)
//! - `HumanReporter` outputs progress plus captured child output to stdout
//!
//! ## Stdout Purity
//!
//! When JsonReporter is active, ONLY valid JSON goes to stdout.
//! Logs go to stderr through `tracing`.

use crate::orchestrator::ExecutionResult;
use serde::Serialize;

/// Machine-readable events for JSON output
#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MachineEvent<'a> {
    /// Emitted once compilation succeeded and components are about to run
    RunStart { stage: &'a str, count: usize },
    /// Emitted when a component begins linking and execution
    ComponentStart { component: &'a str },
    /// Emitted when a component's executable has finished
    ComponentFinished {
        component: &'a str,
        status: &'a str, // "pass", "fail"
        #[serde(skip_serializing_if = "Option::is_none")]
        exit_status: Option<i32>,
        duration_ms: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<&'a str>,
    },
    /// Emitted after the last component
    RunFinished {
        stage: &'a str,
        passed: usize,
        failed: usize,
        duration_ms: u64,
    },
    /// Emitted for command-level results (artifact written, files cleaned)
    Notice { message: &'a str },
    /// Emitted on fatal error
    Error { message: &'a str },
}

/// Reporter trait for output abstraction
pub trait Reporter {
    /// Called after compilation, before the first component
    fn on_run_start(&mut self, stage: &str, count: usize);

    /// Called when a component begins
    fn on_component_start(&mut self, component: &str);

    /// Called when a component completes, passed or failed
    fn on_component_finished(&mut self, result: &ExecutionResult);

    /// Called after every component was attempted
    fn on_run_finished(&mut self, stage: &str, passed: usize, failed: usize, duration_ms: u64);

    /// Called with a one-line command result
    fn on_notice(&mut self, message: &str);

    /// Called on fatal error
    fn on_error(&mut self, message: &str);
}

/// Reporter that ignores every event
pub struct SilentReporter;

impl Reporter for SilentReporter {
    fn on_run_start(&mut self, _stage: &str, _count: usize) {}
    fn on_component_start(&mut self, _component: &str) {}
    fn on_component_finished(&mut self, _result: &ExecutionResult) {}
    fn on_run_finished(&mut self, _stage: &str, _passed: usize, _failed: usize, _duration_ms: u64) {}
    fn on_notice(&mut self, _message: &str) {}
    fn on_error(&mut self, _message: &str) {}
}

/// JSON Reporter - outputs NDJSON to stdout
pub struct JsonReporter;

impl JsonReporter {
    fn emit(event: &MachineEvent<'_>) {
        match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => tracing::warn!("failed to serialize event: {}", e),
        }
    }
}

impl Reporter for JsonReporter {
    fn on_run_start(&mut self, stage: &str, count: usize) {
        Self::emit(&MachineEvent::RunStart { stage, count });
    }

    fn on_component_start(&mut self, component: &str) {
        Self::emit(&MachineEvent::ComponentStart { component });
    }

    fn on_component_finished(&mut self, result: &ExecutionResult) {
        Self::emit(&MachineEvent::ComponentFinished {
            component: &result.component,
            status: result.status_str(),
            exit_status: result.exit_status,
            duration_ms: result.duration_ms,
            message: result.failure.as_ref().map(|f| f.message.as_str()),
        });
    }

    fn on_run_finished(&mut self, stage: &str, passed: usize, failed: usize, duration_ms: u64) {
        Self::emit(&MachineEvent::RunFinished {
            stage,
            passed,
            failed,
            duration_ms,
        });
    }

    fn on_notice(&mut self, message: &str) {
        Self::emit(&MachineEvent::Notice { message });
    }

    fn on_error(&mut self, message: &str) {
        Self::emit(&MachineEvent::Error { message });
    }
}

/// Human Reporter - progress and captured child output on stdout
pub struct HumanReporter;

impl Reporter for HumanReporter {
    fn on_run_start(&mut self, stage: &str, count: usize) {
        println!("[harness] {}: {} component(s)\n", stage, count);
    }

    fn on_component_start(&mut self, component: &str) {
        println!("Testing {}", component);
    }

    fn on_component_finished(&mut self, result: &ExecutionResult) {
        let stdout = result.stdout.trim_end();
        if !stdout.is_empty() {
            println!("{}", stdout);
        }
        match &result.failure {
            None => println!("  ✓ {} ({}ms)\n", result.component, result.duration_ms),
            Some(failure) => {
                println!("  ✗ {} ({}ms)", result.component, result.duration_ms);
                for line in failure.message.lines().take(10) {
                    println!("    {}", line);
                }
                let stderr = result.stderr.trim_end();
                for line in stderr.lines().rev().take(10).collect::<Vec<_>>().into_iter().rev() {
                    println!("    │ {}", line);
                }
                println!();
            }
        }
    }

    fn on_run_finished(&mut self, stage: &str, passed: usize, failed: usize, duration_ms: u64) {
        println!(
            "[harness] {}: {} passed, {} failed in {}ms",
            stage, passed, failed, duration_ms
        );
    }

    fn on_notice(&mut self, message: &str) {
        println!("[harness] {}", message);
    }

    fn on_error(&mut self, message: &str) {
        println!("[harness] FATAL ERROR: {}", message);
    }
}

// =============================================================================
// MultiReporter
// =============================================================================

/// MultiReporter - broadcasts events to multiple reporters
pub struct MultiReporter {
    reporters: Vec<Box<dyn Reporter>>,
}

impl MultiReporter {
    pub fn new(reporters: Vec<Box<dyn Reporter>>) -> Self {
        Self { reporters }
    }
}

impl Reporter for MultiReporter {
    fn on_run_start(&mut self, stage: &str, count: usize) {
        for r in &mut self.reporters {
            r.on_run_start(stage, count);
        }
    }

    fn on_component_start(&mut self, component: &str) {
        for r in &mut self.reporters {
            r.on_component_start(component);
        }
    }

    fn on_component_finished(&mut self, result: &ExecutionResult) {
        for r in &mut self.reporters {
            r.on_component_finished(result);
        }
    }

    fn on_run_finished(&mut self, stage: &str, passed: usize, failed: usize, duration_ms: u64) {
        for r in &mut self.reporters {
            r.on_run_finished(stage, passed, failed, duration_ms);
        }
    }

    fn on_notice(&mut self, message: &str) {
        for r in &mut self.reporters {
            r.on_notice(message);
        }
    }

    fn on_error(&mut self, message: &str) {
        for r in &mut self.reporters {
            r.on_error(message);
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_json_event_serialization() {
        let event = MachineEvent::ComponentFinished {
            component: "Hash",
            status: "pass",
            exit_status: Some(0),
            duration_ms: 42,
            message: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"component_finished\""));
        assert!(json.contains("\"component\":\"Hash\""));
        assert!(json.contains("\"status\":\"pass\""));
        assert!(!json.contains("message")); // skip_serializing_if = None
    }

    #[test]
    fn test_json_event_with_message() {
        let event = MachineEvent::ComponentFinished {
            component: "Pairing",
            status: "fail",
            exit_status: Some(1),
            duration_ms: 100,
            message: Some("exit status 1"),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"message\":\"exit status 1\""));
        assert!(json.contains("\"exit_status\":1"));
    }

    #[test]
    fn test_error_event() {
        let event = MachineEvent::Error {
            message: "compilation failed",
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"error\""));
    }

    struct Counting(Rc<RefCell<Vec<String>>>);

    impl Reporter for Counting {
        fn on_run_start(&mut self, stage: &str, _count: usize) {
            self.0.borrow_mut().push(format!("start:{}", stage));
        }
        fn on_component_start(&mut self, component: &str) {
            self.0.borrow_mut().push(format!("begin:{}", component));
        }
        fn on_component_finished(&mut self, result: &ExecutionResult) {
            self.0.borrow_mut().push(format!("end:{}", result.component));
        }
        fn on_run_finished(&mut self, stage: &str, _p: usize, _f: usize, _d: u64) {
            self.0.borrow_mut().push(format!("finish:{}", stage));
        }
        fn on_notice(&mut self, message: &str) {
            self.0.borrow_mut().push(format!("notice:{}", message));
        }
        fn on_error(&mut self, message: &str) {
            self.0.borrow_mut().push(format!("error:{}", message));
        }
    }

    #[test]
    fn test_multi_reporter_broadcasts() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut multi = MultiReporter::new(vec![
            Box::new(Counting(log.clone())),
            Box::new(Counting(log.clone())),
        ]);

        multi.on_run_start("tests", 1);
        multi.on_component_start("Hash");
        multi.on_error("boom");

        assert_eq!(
            *log.borrow(),
            vec![
                "start:tests",
                "start:tests",
                "begin:Hash",
                "begin:Hash",
                "error:boom",
                "error:boom"
            ]
        );
    }
}
