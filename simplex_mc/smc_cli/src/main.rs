use std::{path::PathBuf, time::Instant};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde_json::json;
use shared_logging::LogLevel;
use simplex_mc_engine::{
    EngineTelemetry, ErrorEstimate, StudyConfig, StudyEngine, StudyMode, StudySummary,
};
use tokio::runtime::Runtime;

#[derive(Parser, Debug)]
#[command(name = "smc", version, about = "Monte Carlo studies over probability simplices")]
struct Cli {
    /// Worker threads.
    #[arg(short = 't', long)]
    threads: Option<usize>,
    /// Study mode: pa, entryN, simplex, fix, none.
    #[arg(short = 'm', long, default_value = "pa")]
    mode: StudyMode,
    /// Entries per multinomial draw.
    #[arg(short = 'e', long = "entry-n")]
    entry_n: Option<u64>,
    /// First entry count of an entry sweep.
    #[arg(long)]
    e_min: Option<u64>,
    /// End (exclusive) of an entry sweep.
    #[arg(long)]
    e_max: Option<u64>,
    /// Draws per epoch.
    #[arg(short = 'r', long)]
    r_num: Option<u64>,
    /// Probability of the central bin.
    #[arg(long)]
    pb: Option<f64>,
    /// Probability of the bin before the center in a fixed study.
    #[arg(long)]
    pa: Option<f64>,
    /// Points in a pre-probability sweep.
    #[arg(long)]
    pa_size: Option<usize>,
    /// Epochs in a random-simplex sweep.
    #[arg(long)]
    epochs: Option<usize>,
    /// Categories per generated simplex.
    #[arg(long)]
    simplex_size: Option<usize>,
    /// Upper bound for randomly drawn centers.
    #[arg(long)]
    center_max: Option<f64>,
    /// Base seed, or `random`.
    #[arg(long)]
    seed: Option<String>,
    /// Start every worker from the base seed.
    #[arg(long)]
    shared_seed: bool,
    /// Dispersion figure reported as the error.
    #[arg(long, value_enum)]
    error_estimate: Option<ErrorArg>,
    /// Directory for every output file.
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// TOML study configuration; flags override it.
    #[arg(long)]
    config: Option<PathBuf>,
    /// JSON-lines log file; logs go to stderr without it.
    #[arg(long)]
    log_file: Option<PathBuf>,
    /// Minimum log level.
    #[arg(long, default_value = "info")]
    log_level: LogLevel,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ErrorArg {
    /// Standard deviation of the recorded positions.
    StdDev,
    /// Standard error of the mean.
    Sem,
}

impl From<ErrorArg> for ErrorEstimate {
    fn from(arg: ErrorArg) -> Self {
        match arg {
            ErrorArg::StdDev => Self::StdDev,
            ErrorArg::Sem => Self::StdErrorOfMean,
        }
    }
}

impl Cli {
    fn study_config(&self) -> Result<StudyConfig> {
        let mut config = match &self.config {
            Some(path) => StudyConfig::load(path)?,
            None => StudyConfig::default(),
        };
        if let Some(threads) = self.threads {
            config.threads = threads;
        }
        if let Some(entries) = self.entry_n {
            config.entry_count = entries;
        }
        if let Some(min) = self.e_min {
            config.entry_min = min;
        }
        if let Some(max) = self.e_max {
            config.entry_max = max;
        }
        if let Some(loops) = self.r_num {
            config.loop_count = loops;
        }
        if let Some(pb) = self.pb {
            config.pb = pb;
        }
        if let Some(pa) = self.pa {
            config.pa = pa;
        }
        if let Some(points) = self.pa_size {
            config.pa_size = points;
        }
        if let Some(epochs) = self.epochs {
            config.epochs = epochs;
        }
        if let Some(size) = self.simplex_size {
            config.simplex_size = size;
        }
        if let Some(center_max) = self.center_max {
            config.center_max = center_max;
        }
        if let Some(seed) = &self.seed {
            config.seed = parse_seed(seed)?;
        }
        if self.shared_seed {
            config.shared_seed = true;
        }
        if let Some(estimate) = self.error_estimate {
            config.error_estimate = estimate.into();
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir.clone_from(dir);
        }
        Ok(config)
    }

    fn telemetry(&self) -> Result<EngineTelemetry> {
        let builder = EngineTelemetry::builder("smc").threshold(self.log_level);
        let builder = match &self.log_file {
            Some(path) => builder.log_path(path),
            None => builder.console(true),
        };
        builder.build().context("opening log output")
    }
}

fn parse_seed(raw: &str) -> Result<Option<u64>> {
    if raw.eq_ignore_ascii_case("random") {
        return Ok(None);
    }
    let seed = raw
        .parse()
        .with_context(|| format!("seed {raw} is neither an integer nor `random`"))?;
    Ok(Some(seed))
}

fn report(summary: &StudySummary) {
    match (summary.fixed, summary.boundaries) {
        (Some(estimate), Some((low, high))) => println!(
            "mean: {}, error: {}, center interval: [{low}, {high})",
            estimate.mean, estimate.error
        ),
        _ => {
            for output in &summary.outputs {
                println!("wrote {} records to {}", summary.records, output.display());
            }
        }
    }
}

fn main() -> Result<()> {
    let clock = Instant::now();
    let cli = Cli::parse();
    let config = cli.study_config()?;
    let telemetry = cli.telemetry()?;
    let engine = StudyEngine::builder(config)
        .telemetry(telemetry.clone())
        .build();

    let runtime = Runtime::new().context("starting tokio runtime")?;
    let outcome = runtime.block_on(engine.run(cli.mode));
    let elapsed_ms = clock.elapsed().as_millis();
    match outcome {
        Ok(summary) => {
            report(&summary);
            let _ = telemetry.log(
                LogLevel::Info,
                "smc.finished",
                json!({ "run_id": summary.run_id, "mode": cli.mode, "elapsed_ms": elapsed_ms }),
            );
            println!("Execution time: {elapsed_ms}[ms]");
            Ok(())
        }
        Err(err) => {
            let _ = telemetry.log(
                LogLevel::Error,
                "smc.failed",
                json!({ "mode": cli.mode, "error": err.to_string(), "elapsed_ms": elapsed_ms }),
            );
            Err(err).with_context(|| format!("{} study failed", cli.mode))
        }
    }
}
