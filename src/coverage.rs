//! Coverage aggregation
//!
//! Runs the orchestrator with gcov instrumentation, then either harvests the
//! raw counters (`gcov`), merges them into one LCOV tracefile, or renders the
//! tracefile as HTML. Counters never outlive the command in the project root:
//! on any failure they are discarded so no partial coverage is persisted.

use crate::compiler::BuildMode;
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::invoker::{Invocation, ToolRunner};
use crate::lifecycle::{
    matching_files, recreate_dir, remove_dir_if_exists, remove_file_if_exists, remove_files,
    ArtifactGuard, COUNTER_GLOBS,
};
use crate::orchestrator::{AggregateOutcome, TestOrchestrator};
use crate::reporter::Reporter;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

const STAGE: &str = "coverage";

/// Line and branch totals of an LCOV tracefile
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoverageSummary {
    pub lines_found: u64,
    pub lines_hit: u64,
    pub branches_found: u64,
    pub branches_hit: u64,
}

impl CoverageSummary {
    /// Sum the `LF`/`LH`/`BRF`/`BRH` records of every source file
    pub fn parse(tracefile: &str) -> Self {
        let mut summary = Self::default();
        for line in tracefile.lines() {
            let Some((key, value)) = line.trim().split_once(':') else {
                continue;
            };
            let Ok(value) = value.trim().parse::<u64>() else {
                continue;
            };
            match key {
                "LF" => summary.lines_found += value,
                "LH" => summary.lines_hit += value,
                "BRF" => summary.branches_found += value,
                "BRH" => summary.branches_hit += value,
                _ => {}
            }
        }
        summary
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        Ok(Self::parse(&fs::read_to_string(path)?))
    }

    pub fn line_percent(&self) -> Option<f64> {
        percent(self.lines_hit, self.lines_found)
    }

    pub fn branch_percent(&self) -> Option<f64> {
        percent(self.branches_hit, self.branches_found)
    }
}

fn percent(hit: u64, found: u64) -> Option<f64> {
    (found > 0).then(|| hit as f64 * 100.0 / found as f64)
}

/// What one coverage command produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoverageReport {
    pub outcome: AggregateOutcome,
    /// Harvested raw counters
    pub raw_dir: Option<PathBuf>,
    /// Merged tracefile, `None` once it has been removed
    pub merged_file: Option<PathBuf>,
    pub html_dir: Option<PathBuf>,
    pub summary: Option<CoverageSummary>,
}

impl CoverageReport {
    fn from_outcome(outcome: AggregateOutcome) -> Self {
        Self {
            outcome,
            ..Self::default()
        }
    }
}

pub struct CoverageAggregator<'a> {
    config: &'a HarnessConfig,
    runner: &'a dyn ToolRunner,
}

impl<'a> CoverageAggregator<'a> {
    pub fn new(config: &'a HarnessConfig, runner: &'a dyn ToolRunner) -> Self {
        Self { config, runner }
    }

    /// Guard removing every counter left in the project root
    fn counter_guard(&self) -> ArtifactGuard {
        ArtifactGuard::for_patterns(&self.config.root, "counters", COUNTER_GLOBS)
    }

    /// Run the instrumented tests and drop excluded counters.
    ///
    /// Callers hold a `counter_guard` across this call; counters that remain
    /// after a failed run are removed when that guard drops.
    fn run_instrumented(
        &self,
        components: &[String],
        reporter: &mut dyn Reporter,
    ) -> Result<AggregateOutcome> {
        let outcome = TestOrchestrator::new(self.config, self.runner).run(
            components,
            &BuildMode::coverage(),
            reporter,
        )?;

        if outcome.is_success() {
            let patterns: Vec<&str> = self.config.coverage.exclude.iter().map(String::as_str).collect();
            remove_files(&self.config.root, &patterns)?;
        }
        Ok(outcome)
    }

    /// Run instrumented tests and move the filtered counters into the raw
    /// coverage directory. Component failures are left in the outcome, with
    /// no counters kept.
    pub fn collect_gcov(
        &self,
        components: &[String],
        reporter: &mut dyn Reporter,
    ) -> Result<CoverageReport> {
        let raw_dir = self.config.coverage_raw_dir();
        remove_dir_if_exists(&raw_dir)?;

        let _counters = self.counter_guard();
        let outcome = self.run_instrumented(components, reporter)?;
        if !outcome.is_success() {
            return Ok(CoverageReport::from_outcome(outcome));
        }

        recreate_dir(&raw_dir)?;
        let counters = matching_files(&self.config.root, COUNTER_GLOBS)?;
        for counter in &counters {
            if let Some(name) = counter.file_name() {
                fs::rename(counter, raw_dir.join(name))?;
            }
        }
        info!("Moved {} counter file(s) to {}", counters.len(), raw_dir.display());

        Ok(CoverageReport {
            raw_dir: Some(raw_dir),
            ..CoverageReport::from_outcome(outcome)
        })
    }

    /// Raw counters only; any component failure is an error
    pub fn generate_gcov_coverage(
        &self,
        components: &[String],
        reporter: &mut dyn Reporter,
    ) -> Result<CoverageReport> {
        let report = self.collect_gcov(components, reporter)?;
        report.outcome.clone().into_result(STAGE)?;
        Ok(report)
    }

    /// Run instrumented tests and merge the counters into one LCOV tracefile
    pub fn generate_coverage(
        &self,
        components: &[String],
        reporter: &mut dyn Reporter,
    ) -> Result<CoverageReport> {
        let merged_file = self.config.merged_coverage_file();
        // stale merged or rendered data would read as this run's result
        remove_file_if_exists(&merged_file)?;
        remove_dir_if_exists(&self.config.coverage_html_dir())?;

        let _counters = self.counter_guard();
        let outcome = self.run_instrumented(components, reporter)?.into_result(STAGE)?;

        fs::create_dir_all(self.config.coverage_merged_dir())?;
        info!("Merging coverage counters into {}", merged_file.display());
        let invocation = Invocation::new(&self.config.toolchain.merger)
            .arg("--directory")
            .arg_path(&self.config.root)
            .arg("--capture")
            .arg("--output-file")
            .arg_path(&merged_file)
            .current_dir(&self.config.root);
        if let Err(e) = self.runner.invoke(&invocation) {
            remove_file_if_exists(&merged_file)?;
            return Err(e);
        }

        let summary = CoverageSummary::from_file(&merged_file)?;
        log_summary(&summary);

        Ok(CoverageReport {
            merged_file: Some(merged_file),
            summary: Some(summary),
            ..CoverageReport::from_outcome(outcome)
        })
    }

    /// Merge, then render the tracefile as a browsable HTML tree.
    ///
    /// The tracefile is removed after rendering unless `retain_merged` is
    /// set, which `coverage` uses so the data can still be uploaded.
    pub fn generate_html_coverage(
        &self,
        components: &[String],
        reporter: &mut dyn Reporter,
        retain_merged: bool,
    ) -> Result<CoverageReport> {
        let mut report = self.generate_coverage(components, reporter)?;
        let merged_file = self.config.merged_coverage_file();
        let html_dir = self.config.coverage_html_dir();

        info!("Rendering HTML coverage into {}", html_dir.display());
        let invocation = Invocation::new(&self.config.toolchain.renderer)
            .arg("-o")
            .arg_path(&html_dir)
            .arg_path(&merged_file)
            .current_dir(&self.config.root);
        if let Err(e) = self.runner.invoke(&invocation) {
            remove_dir_if_exists(&html_dir)?;
            remove_file_if_exists(&merged_file)?;
            return Err(e);
        }
        report.html_dir = Some(html_dir);

        if !retain_merged {
            remove_file_if_exists(&merged_file)?;
            report.merged_file = None;
        }
        Ok(report)
    }

    /// Send the merged tracefile to the coverage service
    pub fn upload(&self) -> Result<()> {
        let merged_file = self.config.merged_coverage_file();
        if !merged_file.is_file() {
            return Err(HarnessError::MissingCoverageData(merged_file));
        }

        info!("Uploading {}", merged_file.display());
        let invocation = Invocation::new(&self.config.toolchain.uploader)
            .arg_path(&merged_file)
            .current_dir(&self.config.root);
        self.runner.invoke(&invocation)?;
        Ok(())
    }
}

fn log_summary(summary: &CoverageSummary) {
    match summary.line_percent() {
        Some(lines) => info!(
            "Lines: {:.1}% ({} of {}), branches: {}",
            lines,
            summary.lines_hit,
            summary.lines_found,
            summary
                .branch_percent()
                .map(|b| format!("{:.1}%", b))
                .unwrap_or_else(|| "n/a".to_string())
        ),
        None => info!("No lines recorded in coverage data"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRACEFILE: &str = "\
TN:
SF:/project/src/Hash.c
DA:1,1
LF:10
LH:8
BRF:4
BRH:1
end_of_record
SF:/project/src/Pairing.c
LF:30
LH:12
end_of_record
";

    #[test]
    fn test_summary_sums_all_records() {
        let summary = CoverageSummary::parse(TRACEFILE);
        assert_eq!(summary.lines_found, 40);
        assert_eq!(summary.lines_hit, 20);
        assert_eq!(summary.branches_found, 4);
        assert_eq!(summary.branches_hit, 1);
        assert_eq!(summary.line_percent(), Some(50.0));
        assert_eq!(summary.branch_percent(), Some(25.0));
    }

    #[test]
    fn test_empty_summary_has_no_percentages() {
        let summary = CoverageSummary::parse("TN:\nend_of_record\n");
        assert_eq!(summary, CoverageSummary::default());
        assert_eq!(summary.line_percent(), None);
    }

    #[test]
    fn test_upload_without_tracefile_fails() {
        struct NoTools;
        impl ToolRunner for NoTools {
            fn invoke(&self, _invocation: &Invocation) -> Result<crate::error::ToolOutput> {
                panic!("no tool should run");
            }
        }

        let temp = tempfile::TempDir::new().unwrap();
        let config = HarnessConfig::with_root(temp.path());
        let err = CoverageAggregator::new(&config, &NoTools).upload().unwrap_err();
        assert!(matches!(err, HarnessError::MissingCoverageData(_)));
    }
}
