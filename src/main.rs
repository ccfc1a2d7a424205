use std::{path::PathBuf, process::ExitCode};

use clap::{Parser, ValueEnum};
use surge::{
    Error, JsonReporter, LoadTestConfig, Report, Scenario, StdoutReporter, TracingReporter,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Output {
    /// Human readable progress lines and a final report
    Stdout,
    /// One JSON object per line
    Json,
    /// `tracing` events on stderr
    Log,
}

/// Drive virtual users against an HTTP endpoint following a staged ramp.
#[derive(Debug, Parser)]
#[command(name = "surge", version)]
struct Cli {
    /// Plan file. Parsed as JSON when it ends in `.json`, as TOML otherwise.
    plan: PathBuf,

    /// Where progress and the final report go.
    #[arg(long, short, value_enum, default_value_t = Output::Stdout)]
    output: Output,
}

async fn run(cli: &Cli, interrupt: CancellationToken) -> Result<Report, Error> {
    let config = LoadTestConfig::from_path(&cli.plan)?;
    let executor = config.executor(interrupt)?;
    let scenario = Scenario::new(config.name.clone(), config.http_action()?);

    tracing::info!(
        plan = %cli.plan.display(),
        url = %config.request.url,
        stages = executor.plan.stages().len(),
        duration = ?executor.plan.total_duration(),
        "Loaded test plan"
    );

    let report = match cli.output {
        Output::Stdout => scenario.run(&executor, &StdoutReporter).await?,
        Output::Json => scenario.run(&executor, &JsonReporter::stdout()).await?,
        Output::Log => scenario.run(&executor, &TracingReporter).await?,
    };
    Ok(report)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let interrupt = CancellationToken::new();
    tokio::spawn({
        let interrupt = interrupt.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::warn!("Received Ctrl+C, draining virtual users...");
                    interrupt.cancel();
                }
                Err(e) => tracing::error!("Failed to listen for Ctrl+C: {e}"),
            }
        }
    });

    match run(&cli, interrupt).await {
        Ok(report) if report.interrupted => ExitCode::from(130),
        Ok(_) => ExitCode::SUCCESS,
        Err(Error::Config(e)) => {
            tracing::error!("Invalid test plan: {e}");
            ExitCode::from(2)
        }
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
