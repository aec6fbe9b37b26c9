//! ZSL - zero-shot evaluation and calibration CLI
//!
//! The `zsl` command scores recorded model outputs and prepares runs.
//!
//! ## Commands
//!
//! - `evaluate`: Score recorded seen/unseen outputs and run domain calibration
//! - `plan`: Resolve an experiment config into output paths and pipelines
//! - `inspect`: Summarise a semantic data file

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, Level};

use zsl_core::{
    emit_eval_finished, init_tracing, write_json_report, CalibrationConfig, ConfidenceSource,
    EvaluationReport, ExperimentConfig, LogFormat, OverrideStrategy, RecordedScores, RunLog,
    RunSpan, SemanticData, TransformPlan,
};

#[derive(Parser)]
#[command(name = "zsl")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Zero-shot recognition evaluation and domain calibration", long_about = None)]
struct Cli {
    /// Enable verbose output (also logs every calibration step)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log line format
    #[arg(long, global = true, env = "ZSL_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score recorded outputs of both test streams
    Evaluate {
        /// Semantic data file (JSON: class splits and attribute table)
        #[arg(short, long)]
        semantic: PathBuf,

        /// Recorded scores (JSON: seen and unseen streams)
        #[arg(long)]
        scores: PathBuf,

        /// Run log to create; metric lines are appended to it
        #[arg(long)]
        log: Option<PathBuf>,

        /// Write the full report as JSON
        #[arg(long)]
        report_json: Option<PathBuf>,

        /// How overrides carry between calibration steps
        #[arg(long, value_enum, default_value_t = StrategyArg::Reset)]
        strategy: StrategyArg,

        /// Head used for the all-class prediction during calibration
        #[arg(long, value_enum, default_value_t = SourceArg::Embedding)]
        source: SourceArg,

        /// Scores are already probabilities (e.g. averaged flip-test views)
        #[arg(long)]
        flip_averaged: bool,
    },

    /// Resolve an experiment config and print the run plan as JSON
    Plan {
        /// Experiment config (JSON); defaults are used when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the dataset name
        #[arg(long)]
        data: Option<String>,

        /// Root directory holding one folder per dataset
        #[arg(long, env = "ZSL_DATA_ROOT")]
        data_root: Option<PathBuf>,

        /// Override the augmentation profile (v1, v2, v3, v4, v6, v7)
        #[arg(long)]
        aug: Option<String>,

        /// Fix the seed instead of drawing one
        #[arg(long)]
        seed: Option<u64>,

        /// Evaluate with horizontal-flip views
        #[arg(long)]
        flipping_test: bool,
    },

    /// Summarise a semantic data file
    Inspect {
        /// Semantic data file
        #[arg(short, long)]
        semantic: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StrategyArg {
    Reset,
    Ratchet,
}

impl From<StrategyArg> for OverrideStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Reset => OverrideStrategy::ResetPerStep,
            StrategyArg::Ratchet => OverrideStrategy::Ratchet,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SourceArg {
    Embedding,
    ClosedSet,
}

impl From<SourceArg> for ConfidenceSource {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Embedding => ConfidenceSource::Embedding,
            SourceArg::ClosedSet => ConfidenceSource::ClosedSet,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.log_format, level);

    match cli.command {
        Commands::Evaluate {
            semantic,
            scores,
            log,
            report_json,
            strategy,
            source,
            flip_averaged,
        } => {
            let calibration = CalibrationConfig::default()
                .with_strategy(strategy.into())
                .with_source(source.into());
            let report = cmd_evaluate(
                &semantic,
                &scores,
                log.as_deref(),
                &calibration,
                flip_averaged,
            )?;
            if let Some(path) = report_json {
                write_json_report(&path, &report)?;
                info!(path = %path.display(), "report written");
            }
            Ok(())
        }
        Commands::Plan {
            config,
            data,
            data_root,
            aug,
            seed,
            flipping_test,
        } => {
            let overrides = PlanOverrides {
                data,
                data_root,
                aug,
                seed,
                flipping_test,
            };
            let plan = cmd_plan(config.as_deref(), overrides)?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
            Ok(())
        }
        Commands::Inspect { semantic } => {
            let summary = cmd_inspect(&semantic)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
    }
}

fn cmd_evaluate(
    semantic_path: &Path,
    scores_path: &Path,
    log_path: Option<&Path>,
    calibration: &CalibrationConfig,
    flip_averaged: bool,
) -> Result<EvaluationReport> {
    let semantic = SemanticData::load(semantic_path)
        .with_context(|| format!("Failed to load semantic data: {:?}", semantic_path))?;
    let _span = RunSpan::enter(&semantic_path.display().to_string());

    let mut scores = RecordedScores::load(scores_path)
        .with_context(|| format!("Failed to load recorded scores: {:?}", scores_path))?;
    scores.normalized |= flip_averaged;
    let (seen, unseen) = scores.aggregate(semantic.num_classes())?;

    let report = EvaluationReport::from_results(&seen, &unseen, &semantic, calibration)?;
    match log_path {
        Some(path) => {
            let log = RunLog::create(path, &scores_path.display().to_string())?;
            report.report(&log)?;
        }
        None => {
            println!("{}", report.conventional_line());
            println!("{}", report.calibrated_line());
        }
    }
    emit_eval_finished(
        report.counts.seen,
        report.counts.unseen,
        report.h,
        report.calibration.harmonic,
        report.score,
    );
    Ok(report)
}

#[derive(Debug, Serialize)]
struct RunPlan {
    seed: u64,
    output_dir: PathBuf,
    log_path: PathBuf,
    semantic_data: PathBuf,
    train_list: PathBuf,
    seen_test_list: PathBuf,
    unseen_test_list: PathBuf,
    eval_views: usize,
    transforms: TransformPlan,
    config: ExperimentConfig,
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Default)]
struct PlanOverrides {
    data: Option<String>,
    data_root: Option<PathBuf>,
    aug: Option<String>,
    seed: Option<u64>,
    flipping_test: bool,
}

fn cmd_plan(config_path: Option<&Path>, overrides: PlanOverrides) -> Result<RunPlan> {
    let mut config = match config_path {
        Some(path) => ExperimentConfig::load(path)
            .with_context(|| format!("Failed to load experiment config: {:?}", path))?,
        None => ExperimentConfig::default(),
    };
    if let Some(data) = overrides.data {
        config.data = data;
    }
    if let Some(root) = overrides.data_root {
        config.data_root = root;
    }
    if let Some(aug) = overrides.aug {
        config.aug = aug;
    }
    if overrides.seed.is_some() {
        config.seed = overrides.seed;
    }
    config.flipping_test |= overrides.flipping_test;
    config.validate()?;

    let seed = config.resolve_seed(&mut rand::thread_rng());
    let transforms = TransformPlan::new(config.augmentation_profile()?, config.flipping_test);
    Ok(RunPlan {
        seed,
        output_dir: config.output_dir()?,
        log_path: config.log_path()?,
        semantic_data: config.semantic_data_path(),
        train_list: config.train_list(),
        seen_test_list: config.seen_test_list(),
        unseen_test_list: config.unseen_test_list(),
        eval_views: transforms.eval_views(),
        transforms,
        config,
    })
}

#[derive(Debug, Serialize, PartialEq)]
struct SemanticSummary {
    img_path: PathBuf,
    num_classes: usize,
    seen_classes: usize,
    unseen_classes: usize,
    attribute_dim: usize,
}

fn cmd_inspect(path: &Path) -> Result<SemanticSummary> {
    let semantic = SemanticData::load(path)
        .with_context(|| format!("Failed to load semantic data: {:?}", path))?;
    Ok(SemanticSummary {
        img_path: semantic.img_path.clone(),
        num_classes: semantic.num_classes(),
        seen_classes: semantic.seen_classes.len(),
        unseen_classes: semantic.unseen_classes.len(),
        attribute_dim: semantic.attribute_dim(),
    })
}
