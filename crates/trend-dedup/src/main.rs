use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};
use uuid::Uuid;

use trend_dedup::config::{Config, DEFAULT_CONFIG_PATH};
use trend_dedup::Pipeline;

#[derive(Parser)]
#[command(name = "trend-dedup")]
#[command(about = "Trend Dedup - drop trends already covered in recent history")]
#[command(version)]
struct Cli {
  /// Feed date to process (YYYY-MM-DD), defaults to today
  #[arg(long)]
  feed_date: Option<NaiveDate>,

  /// Process only this category
  #[arg(long)]
  category: Option<String>,

  /// Path to the YAML configuration
  #[arg(long, env = "TREND_DEDUP_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
  config: PathBuf,

  /// Show debug output on the console
  #[arg(short, long)]
  verbose: bool,
}

fn init_tracing(verbose: bool) {
  let filter = if verbose {
    EnvFilter::new("info,lance=warn,lance_datafusion=warn,datafusion=warn")
  } else {
    EnvFilter::new("trend_dedup=info,lance=error,lance_datafusion=error,datafusion=error,warn")
  };

  tracing_subscriber::registry()
    .with(fmt::layer().with_writer(std::io::stderr))
    .with(filter)
    .init();
}

async fn run(cli: Cli) -> Result<()> {
  let config = Config::load(&cli.config)?;

  let run_log = bentley::RunLog::open(config.log_file())
    .with_context(|| format!("Failed to open run log {}", config.log_file().display()))?;
  let run_id = Uuid::new_v4().to_string();
  let log = bentley::Logger::new("trend-dedup")
    .with_run_log(run_log)
    .with_verbosity(cli.verbose)
    .with_run_id(&run_id);

  let date = cli.feed_date.unwrap_or_else(|| Local::now().date_naive());
  log.info(&format!("Starting deduplication run {run_id} for {date}"));

  let pipeline = Pipeline::from_config(&config, &log).await?;
  let summary = pipeline.run(date, cli.category.as_deref()).await;

  for outcome in &summary.outcomes {
    println!("{outcome}");
  }
  println!(
    "{date}: {} completed, {} skipped, {} failed",
    summary.completed(),
    summary.skipped(),
    summary.failed()
  );

  log.success(&format!("Finished deduplication run {run_id}"));
  Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
  let cli = Cli::parse();
  init_tracing(cli.verbose);

  // Everything that reaches here is configuration-level; per-category
  // failures are contained in the run summary
  match run(cli).await {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      bentley::error!(&format!("{e:#}"));
      ExitCode::FAILURE
    }
  }
}
