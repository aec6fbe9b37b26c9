//! Zero-shot recognition evaluation and domain calibration.
//!
//! Re-exports the components needed to aggregate model outputs over the
//! seen and unseen test streams, score them, calibrate the seen/unseen
//! decision and drive a training run around an external model.

pub mod aggregate;
pub mod augment;
pub mod calibration;
pub mod checkpoint;
pub mod config;
pub mod domain;
pub mod evaluation;
pub mod metrics;
pub mod obs;
pub mod reporting;
pub mod restrict;
pub mod scores;
pub mod softmax;
pub mod telemetry;
pub mod tensor;
pub mod training;

pub use domain::{AttributeTable, ClassSet, Result, SemanticData, SemanticDataFile, ZslError};

pub use aggregate::{
    aggregate_stream, AggregatedResult, Batch, BatchAggregator, CombinedResult, InferenceModel,
    ModelOutput, StreamCounts,
};
pub use augment::{AugmentationProfile, ImageBackend, Pipeline, TransformOp, TransformPlan};
pub use calibration::{
    calibrate, optimal_domain_separation, search, CalibrationConfig, CalibrationInput,
    CalibrationOutcome, CalibrationSearch, CalibrationStep, ConfidenceSource, DomainSeparation,
    OverrideStrategy,
};
pub use checkpoint::{
    checkpoint_path, load_checkpoint, resume, save_checkpoint, Checkpoint, ResumeOutcome,
};
pub use config::ExperimentConfig;
pub use evaluation::{validate, EvalOptions, EvaluationReport};
pub use metrics::{
    domain_membership_accuracy, entropy_of_max, harmonic_mean, per_class_accuracy,
    top_k_precision,
};
pub use restrict::{restricted_argmax, suppress_classes, RestrictedPredictions, SUPPRESSED};
pub use scores::{RecordedScores, RecordedStream};
pub use softmax::{softmax_rows, softmax_view_mean};
pub use training::{
    run_training, train_epoch, BatchStream, BestScore, DataSource, EpochOutcome, EpochSummary,
    LearningRates, LossBreakdown, LrSchedule, TrainableModel, UpdatePlan,
};

pub use obs::{
    emit_checkpoint_missing, emit_checkpoint_saved, emit_epoch_finished, emit_eval_finished,
    emit_run_started, RunSpan,
};
pub use reporting::{write_json_report, MetricLine, RunLog};
pub use telemetry::{init_tracing, LogFormat};

/// zsl-core version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
