use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use fsri_actions::RuleTable;
use fsri_calibration::{
    dataset::{read_labels, read_observations, write_features, write_labels},
    CalibrationTrainer, FeatureBuilder, LabelBuilder, LabeledScore,
};
use fsri_fusion::PillarSet;
use fsri_signals::{FsriConfig, SignalRequest, SignalRuntime, ACTIONS_FILE_ENV};
use serde::Serialize;
use serde_json::json;
use shared_logging::Telemetry;

#[derive(Parser, Debug)]
#[command(name = "fsri", version, about = "Food supply risk index operator tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scores one set of pillar results and matches actions.
    Evaluate {
        /// JSON file holding the four pillar results.
        #[arg(long)]
        pillars: PathBuf,
        #[arg(long)]
        crop: String,
        #[arg(long, default_value = "us")]
        region: String,
        /// Case-insensitive persona filter.
        #[arg(long)]
        persona: Option<String>,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Fits movement calibration from a labels CSV.
    Train {
        #[arg(long, default_value = "data/mr_labels.csv")]
        labels: PathBuf,
        #[arg(long, default_value = "models/movement_calibration.json")]
        out: PathBuf,
        /// Gate thresholds reported alongside the artifact.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Builds the daily movement score and 7-day labels from gauge histories.
    Labels {
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,
        #[arg(long, default_value = "data/mr_labels.csv")]
        out: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Derives rolling gauge and precipitation features.
    Features {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
    /// Validates an action rule document.
    Rules {
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Evaluate {
            pillars,
            crop,
            region,
            persona,
            config,
        } => handle_evaluate(pillars, crop, region, persona, config),
        Commands::Train {
            labels,
            out,
            config,
        } => handle_train(&labels, &out, config),
        Commands::Labels {
            data_dir,
            out,
            config,
        } => {
            let config = load_config(config)?;
            let rows = LabelBuilder::new(config.gauges)
                .build_from_dir(&data_dir)
                .with_context(|| format!("building labels from {}", data_dir.display()))?;
            write_labels(&out, &rows)?;
            let positives = rows.iter().filter(|row| row.y > 0).count();
            print_json(&json!({ "out": out, "rows": rows.len(), "positives": positives }))
        }
        Commands::Features { input, out } => {
            let observations = read_observations(&input)?;
            let rows = FeatureBuilder::default().build(&observations);
            write_features(&out, &rows)?;
            print_json(&json!({ "out": out, "rows": rows.len() }))
        }
        Commands::Rules { file } => handle_rules(file),
    }
}

fn handle_evaluate(
    pillars: PathBuf,
    crop: String,
    region: String,
    persona: Option<String>,
    config: Option<PathBuf>,
) -> Result<()> {
    let raw = fs::read_to_string(&pillars)
        .with_context(|| format!("reading pillars {}", pillars.display()))?;
    let pillars: PillarSet =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", pillars.display()))?;
    let config = load_config(config)?;
    let runtime = SignalRuntime::from_config(&config)?;
    if let Some(err) = runtime.rules().startup_error() {
        eprintln!("warning: action rules unavailable: {err}");
    }
    let report = runtime.signals(&SignalRequest {
        crop,
        region,
        pillars,
        persona,
        extras: None,
    });
    print_json(&report)
}

fn handle_train(labels: &Path, out: &Path, config: Option<PathBuf>) -> Result<()> {
    let config = load_config(config)?;
    let samples = read_labels(labels)?
        .into_iter()
        .map(LabeledScore::from)
        .collect::<Vec<_>>();
    let mut trainer = CalibrationTrainer::default();
    if let Some(path) = &config.paths.log_path {
        trainer = trainer.with_telemetry(
            Telemetry::builder("calibration")
                .log_path(path)
                .build()
                .context("building telemetry")?,
        );
    }
    let params = trainer
        .train(&samples)
        .with_context(|| format!("training on {}", labels.display()))?;
    params.write(out)?;
    let gate = config.gate.evaluate(&params);
    print_json(&json!({ "out": out, "params": params, "gate": gate }))
}

fn handle_rules(file: Option<PathBuf>) -> Result<()> {
    let path = match file {
        Some(path) => path,
        None => load_config(None)?.paths.actions_file,
    };
    let raw = fs::read_to_string(&path)
        .with_context(|| format!("reading rules {}", path.display()))?;
    match RuleTable::parse(&raw) {
        Ok(table) => print_json(&json!({
            "file": path,
            "rules": table.rule_count(),
            "buckets": table.keys().collect::<Vec<_>>(),
        })),
        Err(err) => {
            print_json(&json!({ "file": path, "issues": err.issues() }))?;
            bail!("{}: {err}", path.display())
        }
    }
}

fn load_config(path: Option<PathBuf>) -> Result<FsriConfig> {
    match path {
        Some(path) => FsriConfig::load(path),
        None => Ok(FsriConfig::default()
            .with_actions_override(std::env::var_os(ACTIONS_FILE_ENV).map(PathBuf::from))),
    }
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
