//! Command dispatch
//!
//! Maps each CLI subcommand onto the pipeline stages. Every command returns
//! `Err` for fatal failures and for component failures, so the process exits
//! non-zero whenever a component, the compiler or a required tool failed.

use crate::compiler::BuildMode;
use crate::config::{Commands, HarnessConfig, OutputFormat};
use crate::coverage::{CoverageAggregator, CoverageReport};
use crate::discovery::resolve_components;
use crate::error::Result;
use crate::invoker::ToolRunner;
use crate::junit::ReportEmitter;
use crate::lifecycle::clean;
use crate::memcheck::MemoryCheckRunner;
use crate::orchestrator::TestOrchestrator;
use crate::packager::ArtifactPackager;
use crate::reporter::{HumanReporter, JsonReporter, Reporter};

pub fn reporter_for(format: &OutputFormat) -> Box<dyn Reporter> {
    match format {
        OutputFormat::Human => Box::new(HumanReporter),
        OutputFormat::Json => Box::new(JsonReporter),
    }
}

/// Run one subcommand against `config`. A fatal failure of any stage is
/// also reported through `reporter.on_error`.
pub fn execute(
    config: &HarnessConfig,
    runner: &dyn ToolRunner,
    command: &Commands,
    reporter: &mut dyn Reporter,
) -> Result<()> {
    let result = dispatch(config, runner, command, reporter);
    if let Err(e) = &result {
        if e.is_fatal() {
            reporter.on_error(&e.to_string());
        }
    }
    result
}

fn dispatch(
    config: &HarnessConfig,
    runner: &dyn ToolRunner,
    command: &Commands,
    reporter: &mut dyn Reporter,
) -> Result<()> {
    match command {
        Commands::Build { compiler, flags } => {
            let artifact = ArtifactPackager::new(config, runner)
                .with_compiler(compiler.clone())
                .build(flags.clone())?;
            reporter.on_notice(&format!("built {}", artifact.display()));
        }

        Commands::BuildStatic { flags } => {
            let artifact = ArtifactPackager::new(config, runner).build(flags.clone())?;
            reporter.on_notice(&format!("built {}", artifact.display()));
        }

        Commands::Test {
            components,
            coverage,
        } => {
            let components = resolve_components(config, components)?;
            let outcome = if *coverage {
                let report = CoverageAggregator::new(config, runner)
                    .collect_gcov(&components, reporter)?;
                notice_coverage(&report, reporter);
                report.outcome
            } else {
                TestOrchestrator::new(config, runner).run(
                    &components,
                    &BuildMode::test(),
                    reporter,
                )?
            };

            ReportEmitter::new(config).emit(&outcome);
            outcome.into_result("tests")?;
        }

        Commands::Coverage { components, report } => {
            let components = resolve_components(config, components)?;
            let aggregator = CoverageAggregator::new(config, runner);
            let coverage = aggregator.generate_html_coverage(&components, reporter, true)?;
            notice_coverage(&coverage, reporter);
            if *report {
                aggregator.upload()?;
                reporter.on_notice("coverage uploaded");
            }
        }

        Commands::GcovCoverage { components } => {
            let components = resolve_components(config, components)?;
            let coverage = CoverageAggregator::new(config, runner)
                .generate_gcov_coverage(&components, reporter)?;
            notice_coverage(&coverage, reporter);
        }

        Commands::HtmlCoverage { components } => {
            let components = resolve_components(config, components)?;
            let coverage = CoverageAggregator::new(config, runner)
                .generate_html_coverage(&components, reporter, false)?;
            notice_coverage(&coverage, reporter);
        }

        Commands::Memcheck {
            components,
            xml_output,
        } => {
            let components = resolve_components(config, components)?;
            let run = MemoryCheckRunner::new(config, runner).run(&components, *xml_output, reporter)?;
            // a single failure does not fail the run, but still fails the command
            run.outcome.into_result("memcheck")?;
        }

        Commands::ReportCoverage => {
            CoverageAggregator::new(config, runner).upload()?;
            reporter.on_notice("coverage uploaded");
        }

        Commands::Clean => {
            let summary = clean(config)?;
            reporter.on_notice(&format!(
                "removed {} file(s) and {} director(ies)",
                summary.files, summary.directories
            ));
        }
    }

    Ok(())
}

fn notice_coverage(report: &CoverageReport, reporter: &mut dyn Reporter) {
    if let Some(dir) = &report.raw_dir {
        reporter.on_notice(&format!("gcov counters in {}", dir.display()));
    }
    if let Some(file) = &report.merged_file {
        reporter.on_notice(&format!("merged coverage in {}", file.display()));
    }
    if let Some(dir) = &report.html_dir {
        reporter.on_notice(&format!("HTML coverage in {}", dir.display()));
    }
    if let Some(lines) = report.summary.and_then(|s| s.line_percent()) {
        reporter.on_notice(&format!("line coverage {:.1}%", lines));
    }
}
