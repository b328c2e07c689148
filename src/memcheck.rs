//! Memory-safety checks
//!
//! The orchestrator pipeline with `AnalyzerExecutor`: each component's
//! executable runs under the analyzer (valgrind by default). Analyzer
//! findings are isolated per component; the run only raises the aggregate
//! error when two or more components fail, after every component has been
//! attempted.

use crate::compiler::BuildMode;
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::invoker::{Invocation, ToolRunner};
use crate::lifecycle::recreate_dir;
use crate::orchestrator::{
    AggregateOutcome, ComponentExecutor, ExecutionFailureKind, ExecutionResult, TestOrchestrator,
};
use crate::reporter::Reporter;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

const STAGE: &str = "memcheck";

/// Number of failed components at which the run itself fails
pub const AGGREGATE_FAILURE_THRESHOLD: usize = 2;

// =============================================================================
// Analyzer XML
// =============================================================================

#[derive(Deserialize)]
struct AnalyzerOutput {
    #[serde(rename = "error", default)]
    errors: Vec<AnalyzerError>,
}

#[derive(Deserialize)]
struct AnalyzerError {
    kind: String,
}

/// Findings of the analyzer for one component
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryReport {
    pub component: String,
    pub error_count: usize,
    /// Error kind (`Leak_DefinitelyLost`, `InvalidRead`, ...) -> occurrences
    pub kinds: BTreeMap<String, usize>,
}

impl MemoryReport {
    pub fn parse(component: &str, xml: &str) -> Result<Self> {
        let output: AnalyzerOutput =
            quick_xml::de::from_str(xml).map_err(|e| HarnessError::ReportGeneration {
                component: component.to_string(),
                message: e.to_string(),
            })?;

        let mut kinds = BTreeMap::new();
        for error in &output.errors {
            *kinds.entry(error.kind.clone()).or_insert(0) += 1;
        }

        Ok(Self {
            component: component.to_string(),
            error_count: output.errors.len(),
            kinds,
        })
    }

    pub fn from_file(component: &str, path: &Path) -> Result<Self> {
        let xml = fs::read_to_string(path).map_err(|e| HarnessError::ReportGeneration {
            component: component.to_string(),
            message: format!("{}: {}", path.display(), e),
        })?;
        Self::parse(component, &xml)
    }

    pub fn is_clean(&self) -> bool {
        self.error_count == 0
    }
}

// =============================================================================
// MemoryCheckRunner
// =============================================================================

/// Results of one memory-check run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemcheckRun {
    pub outcome: AggregateOutcome,
    /// Parsed analyzer files, only with XML output
    pub reports: Vec<MemoryReport>,
}

fn xml_report_path(config: &HarnessConfig, component: &str) -> PathBuf {
    config.memcheck_dir().join(format!("{}.xml", component))
}

/// Runs a linked executable under the memory analyzer
pub struct AnalyzerExecutor<'a> {
    config: &'a HarnessConfig,
    runner: &'a dyn ToolRunner,
    xml_output: bool,
}

impl ComponentExecutor for AnalyzerExecutor<'_> {
    fn execute(&self, component: &str, executable: &Path) -> Result<ExecutionResult> {
        let settings = &self.config.memcheck;
        let mut invocation = Invocation::new(&self.config.toolchain.analyzer)
            .args(settings.analyzer_args.iter().cloned());
        if self.xml_output {
            invocation = invocation.arg("--xml=yes").arg(format!(
                "--xml-file={}",
                xml_report_path(self.config, component).display()
            ));
        }
        invocation = invocation.arg_path(executable);
        if settings.quick_check_components.iter().any(|c| c == component) {
            invocation = invocation.args(settings.quick_check_args.iter().cloned());
        }
        let invocation = invocation.current_dir(&self.config.root);

        let started = Instant::now();
        match self.runner.invoke(&invocation) {
            // the analyzer itself is missing; no component can be checked
            Err(e @ HarnessError::Spawn { .. }) => Err(e),
            invoked => Ok(ExecutionResult::from_invocation(
                component,
                ExecutionFailureKind::Analyzer,
                invoked,
                started,
            )),
        }
    }
}

pub struct MemoryCheckRunner<'a> {
    config: &'a HarnessConfig,
    runner: &'a dyn ToolRunner,
}

impl<'a> MemoryCheckRunner<'a> {
    pub fn new(config: &'a HarnessConfig, runner: &'a dyn ToolRunner) -> Self {
        Self { config, runner }
    }

    pub fn xml_report_path(&self, component: &str) -> PathBuf {
        xml_report_path(self.config, component)
    }

    pub fn run(
        &self,
        components: &[String],
        xml_output: bool,
        reporter: &mut dyn Reporter,
    ) -> Result<MemcheckRun> {
        if xml_output {
            recreate_dir(&self.config.memcheck_dir())?;
        }

        let executor = AnalyzerExecutor {
            config: self.config,
            runner: self.runner,
            xml_output,
        };
        let outcome = TestOrchestrator::new(self.config, self.runner).run_with(
            STAGE,
            components,
            &BuildMode::memcheck(),
            &executor,
            reporter,
        )?;

        let mut run = MemcheckRun {
            outcome,
            reports: Vec::new(),
        };
        if xml_output {
            for result in &run.outcome.results {
                let component = &result.component;
                match MemoryReport::from_file(component, &self.xml_report_path(component)) {
                    Ok(report) => {
                        info!(
                            "{}: {} analyzer error(s) {:?}",
                            component, report.error_count, report.kinds
                        );
                        run.reports.push(report);
                    }
                    Err(e) => warn!("{}", e),
                }
            }
        }

        let failed = run.outcome.failed_components();
        if failed.len() >= AGGREGATE_FAILURE_THRESHOLD {
            return Err(HarnessError::ComponentFailures {
                stage: STAGE.to_string(),
                failed,
            });
        }
        Ok(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEAKY_XML: &str = r#"<?xml version="1.0"?>
<valgrindoutput>
  <protocolversion>4</protocolversion>
  <tool>memcheck</tool>
  <status><state>RUNNING</state></status>
  <error>
    <unique>0x0</unique>
    <tid>1</tid>
    <kind>InvalidRead</kind>
    <what>Invalid read of size 4</what>
  </error>
  <status><state>FINISHED</state></status>
  <error>
    <unique>0x1</unique>
    <tid>1</tid>
    <kind>Leak_DefinitelyLost</kind>
    <xwhat><text>16 bytes in 1 blocks are definitely lost</text><leakedbytes>16</leakedbytes></xwhat>
  </error>
  <error>
    <unique>0x2</unique>
    <tid>1</tid>
    <kind>Leak_DefinitelyLost</kind>
  </error>
  <errorcounts></errorcounts>
  <suppcounts></suppcounts>
</valgrindoutput>
"#;

    #[test]
    fn test_parse_counts_errors_by_kind() {
        let report = MemoryReport::parse("Pairing", LEAKY_XML).unwrap();
        assert_eq!(report.error_count, 3);
        assert_eq!(report.kinds.get("Leak_DefinitelyLost"), Some(&2));
        assert_eq!(report.kinds.get("InvalidRead"), Some(&1));
        assert!(!report.is_clean());
    }

    #[test]
    fn test_parse_clean_output() {
        let xml = "<valgrindoutput><tool>memcheck</tool><errorcounts/></valgrindoutput>";
        let report = MemoryReport::parse("Hash", xml).unwrap();
        assert!(report.is_clean());
        assert!(report.kinds.is_empty());
    }

    #[test]
    fn test_parse_garbage_is_report_error() {
        let err = MemoryReport::parse("Hash", "<valgrindoutput><error>").unwrap_err();
        assert!(matches!(err, HarnessError::ReportGeneration { .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_missing_file_is_report_error() {
        let err = MemoryReport::from_file("Hash", Path::new("/nonexistent/Hash.xml")).unwrap_err();
        assert!(matches!(err, HarnessError::ReportGeneration { .. }));
    }
}
