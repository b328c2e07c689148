use anyhow::{Context, Result};
use clap::Parser;
use cryptid_harness::commands::{execute, reporter_for};
use cryptid_harness::config::{Cli, HarnessConfig};
use cryptid_harness::invoker::ProcessRunner;
use tracing_subscriber::EnvFilter;

/// Filter directives for log output on stderr
const LOG_ENV: &str = "CRYPTID_HARNESS_LOG";

fn main() -> Result<()> {
    let env_filter = match EnvFilter::try_from_env(LOG_ENV) {
        Ok(f) => f,
        Err(_) => EnvFilter::new("info"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let mut reporter = reporter_for(&cli.format);

    let config = match HarnessConfig::load(&cli.root) {
        Ok(config) => config,
        Err(e) => {
            reporter.on_error(&e.to_string());
            return Err(e)
                .with_context(|| format!("loading configuration from {}", cli.root.display()));
        }
    };

    execute(&config, &ProcessRunner, &cli.command, reporter.as_mut())?;
    Ok(())
}
